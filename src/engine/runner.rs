//! The sequencer: executes a [`Plan`] over the registered tasks.
//!
//! Sequential elements are awaited one after another. A parallel group spawns
//! every member onto a [`JoinSet`] and joins them all before the next element
//! starts, so every file written inside the group is on disk by then. The
//! first failure stops the plan; the other members of a failing group are
//! detached rather than cancelled and whatever they produce afterwards is
//! ignored.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{Instrument, Level};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::Environment;
use crate::engine::{Action, Element, Plan, TaskGraph};
use crate::error::{PipelineError, TaskError};
use crate::stage::{Artifact, StageReport};
use crate::transform::lint::LintFinding;

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    Started,
    Finished,
    Failed,
}

/// A single state change of a task during a run.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub task: String,
    pub kind: TraceKind,
    /// Time since the run started.
    pub at: Duration,
}

/// Everything that happened during a run, in order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub trace: Vec<TraceEvent>,
    pub stages: Vec<StageReport>,
    pub cleaned: Vec<Utf8PathBuf>,
    pub durations: HashMap<String, Duration>,
}

impl RunReport {
    /// Names of tasks in the order they started.
    pub fn started(&self) -> Vec<&str> {
        self.names_with(TraceKind::Started)
    }

    /// Names of tasks in the order they finished successfully.
    pub fn finished(&self) -> Vec<&str> {
        self.names_with(TraceKind::Finished)
    }

    /// Whether the task was started at all during this run.
    pub fn ran(&self, task: &str) -> bool {
        self.position(task, TraceKind::Started).is_some()
    }

    /// Index of the first matching event in the trace.
    pub fn position(&self, task: &str, kind: TraceKind) -> Option<usize> {
        self.trace
            .iter()
            .position(|event| event.task == task && event.kind == kind)
    }

    pub fn findings(&self) -> impl Iterator<Item = &LintFinding> {
        self.stages.iter().flat_map(|stage| &stage.findings)
    }

    pub fn written(&self) -> impl Iterator<Item = &Artifact> {
        self.stages.iter().flat_map(|stage| &stage.written)
    }

    fn names_with(&self, kind: TraceKind) -> Vec<&str> {
        self.trace
            .iter()
            .filter(|event| event.kind == kind)
            .map(|event| event.task.as_str())
            .collect()
    }
}

/// A failed run: the error that stopped it and what happened before.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Aborted {
    pub error: PipelineError,
    pub report: RunReport,
}

/// State shared by every task of one run.
#[derive(Clone)]
struct Run {
    env: Environment,
    start: Instant,
    report: Arc<Mutex<RunReport>>,
}

impl Run {
    fn new(env: Environment) -> Self {
        Self {
            env,
            start: Instant::now(),
            report: Arc::default(),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut RunReport) -> R) -> R {
        let mut report = self.report.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut report)
    }

    fn record(&self, task: &str, kind: TraceKind) {
        let at = self.start.elapsed();
        self.with(|report| {
            report.trace.push(TraceEvent {
                task: task.to_string(),
                kind,
                at,
            })
        });
    }

    fn take(&self) -> RunReport {
        self.with(std::mem::take)
    }
}

impl TaskGraph {
    /// Executes the plan left to right.
    ///
    /// Returns the report of the run, or the first failure together with the
    /// report of everything that ran before it.
    pub async fn run(self: &Arc<Self>, plan: &Plan, env: &Environment) -> Result<RunReport, Aborted> {
        let run = Run::new(env.clone());
        let result = execute_plan(self.clone(), plan.clone(), run.clone()).await;
        let report = run.take();

        match result {
            Ok(()) => {
                tracing::info!("Run complete!");
                Ok(report)
            }
            Err(error) => Err(Aborted { error, report }),
        }
    }

    /// Runs a single registered task, as invoked from the command line.
    pub async fn run_task(
        self: &Arc<Self>,
        name: &str,
        env: &Environment,
    ) -> Result<RunReport, Aborted> {
        self.run(&Plan::new().then(name), env).await
    }
}

fn execute_plan(graph: Arc<TaskGraph>, plan: Plan, run: Run) -> TaskFuture {
    Box::pin(async move {
        for element in plan.elements() {
            match element {
                Element::Task(name) => {
                    execute_task(graph.clone(), name.clone(), run.clone()).await?;
                }
                Element::Parallel(names) => {
                    execute_group(&graph, names, &run).await?;
                }
            }
        }

        Ok(())
    })
}

async fn execute_group(
    graph: &Arc<TaskGraph>,
    names: &[String],
    run: &Run,
) -> Result<(), PipelineError> {
    let mut set = JoinSet::new();
    for name in names {
        set.spawn(execute_task(graph.clone(), name.clone(), run.clone()));
    }

    while let Some(joined) = set.join_next().await {
        let result = joined
            .map_err(|source| PipelineError::Join {
                group: names.join(", "),
                source,
            })
            .and_then(|result| result);

        if let Err(error) = result {
            set.detach_all();
            return Err(error);
        }
    }

    Ok(())
}

fn execute_task(graph: Arc<TaskGraph>, name: String, run: Run) -> TaskFuture {
    Box::pin(async move {
        let task = graph
            .get(&name)
            .ok_or_else(|| PipelineError::UnknownTask(name.clone()))?;

        run.record(&name, TraceKind::Started);
        let start = Instant::now();

        let span = tracing::span!(Level::INFO, "task", name = %name);
        if let Ok(style) = crate::utils::get_style_task() {
            span.pb_set_style(&style);
        }
        span.pb_set_message(&format!("Running {name}"));

        let result = match &task.action {
            Action::Stage(stage) => stage
                .run(&run.env)
                .instrument(span)
                .await
                .map(|report| run.with(|r| r.stages.push(report)))
                .map_err(TaskError::from),
            Action::Clean(cleanup) => cleanup
                .clean()
                .instrument(span)
                .await
                .map(|removed| run.with(|r| r.cleaned.extend(removed)))
                .map_err(TaskError::from),
            Action::Serve(config) => {
                crate::server::serve(graph.clone(), config.clone(), run.env.clone())
                    .instrument(span)
                    .await
                    .map_err(TaskError::from)
            }
            Action::Composite(plan) => {
                let result = execute_plan(graph.clone(), plan.clone(), run.clone()).await;
                finish(&run, &name, start, result.is_ok());
                return result;
            }
        };

        finish(&run, &name, start, result.is_ok());
        result.map_err(|source| PipelineError::Task { task: name, source })
    })
}

fn finish(run: &Run, name: &str, start: Instant, ok: bool) {
    let elapsed = start.elapsed();
    run.with(|r| r.durations.insert(name.to_string(), elapsed));

    if ok {
        run.record(name, TraceKind::Finished);
    } else {
        run.record(name, TraceKind::Failed);
    }
}
