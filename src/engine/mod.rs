mod runner;

use std::collections::HashMap;
use std::fmt::Debug;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::clean::Cleanup;
use crate::error::PipelineError;
use crate::server::ServeConfig;
use crate::stage::Stage;

pub use crate::engine::runner::{Aborted, RunReport, TraceEvent, TraceKind};

/// What a task does when it runs.
#[derive(Debug)]
pub enum Action {
    /// Run a file transformation stage.
    Stage(Stage),
    /// Delete paths at a checkpoint.
    Clean(Cleanup),
    /// Run a sub-plan of other tasks.
    Composite(Plan),
    /// Start the development server. Never completes on success.
    Serve(ServeConfig),
}

impl Action {
    fn kind(&self) -> &'static str {
        match self {
            Action::Stage(_) => "stage",
            Action::Clean(_) => "clean",
            Action::Composite(_) => "composite",
            Action::Serve(_) => "serve",
        }
    }
}

/// A named action registered in the [`TaskGraph`].
#[derive(Debug)]
pub struct Task {
    pub name: String,
    pub action: Action,
}

/// One element of a [`Plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    /// Runs to completion before the next element starts.
    Task(String),
    /// All members start together; the group ends when all of them have
    /// finished or the first one failed.
    Parallel(Vec<String>),
}

impl Element {
    pub fn names(&self) -> &[String] {
        match self {
            Element::Task(name) => std::slice::from_ref(name),
            Element::Parallel(names) => names,
        }
    }
}

/// A static, ordered list of sequential steps and parallel groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    elements: Vec<Element>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sequential step.
    pub fn then(mut self, name: impl Into<String>) -> Self {
        self.elements.push(Element::Task(name.into()));
        self
    }

    /// Appends a parallel group.
    pub fn parallel<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements
            .push(Element::Parallel(names.into_iter().map(Into::into).collect()));
        self
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Every task name referenced by this plan, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.elements
            .iter()
            .flat_map(Element::names)
            .map(String::as_str)
    }
}

/// Collects task registrations before they are frozen into a [`TaskGraph`].
///
/// ```rust
/// use tagpack::{Action, Blueprint, Cleanup, Plan};
///
/// let mut blueprint = Blueprint::new();
/// blueprint.register("clean", Action::Clean(Cleanup::new(["dist"]))).unwrap();
/// blueprint.register("default", Action::Composite(Plan::new().then("clean"))).unwrap();
///
/// let graph = blueprint.finish().unwrap();
/// assert!(graph.get("default").is_some());
/// ```
#[derive(Debug, Default)]
pub struct Blueprint {
    graph: Graph<Task, ()>,
    index: HashMap<String, NodeIndex>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task. Every name can be registered once.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        action: Action,
    ) -> Result<&mut Self, PipelineError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(PipelineError::Duplicate(name));
        }

        let index = self.graph.add_node(Task {
            name: name.clone(),
            action,
        });
        self.index.insert(name, index);

        Ok(self)
    }

    /// Wires composite tasks to their members and checks the result.
    ///
    /// Fails when a composite names a task that was never registered, or when
    /// composites refer to each other in a cycle.
    pub fn finish(mut self) -> Result<TaskGraph, PipelineError> {
        let mut edges = Vec::new();
        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            if let Action::Composite(plan) = &task.action {
                for name in plan.names() {
                    let member = self
                        .index
                        .get(name)
                        .ok_or_else(|| PipelineError::Dangling(task.name.clone(), name.into()))?;
                    edges.push((index, *member));
                }
            }
        }

        for (source, target) in edges {
            self.graph.add_edge(source, target, ());
        }

        petgraph::algo::toposort(&self.graph, None)
            .map_err(|cycle| PipelineError::Cycle(self.graph[cycle.node_id()].name.clone()))?;

        Ok(TaskGraph {
            graph: self.graph,
            index: self.index,
        })
    }
}

/// The frozen registry of named tasks.
///
/// Plans are executed with [`TaskGraph::run`], see the runner module.
#[derive(Debug)]
pub struct TaskGraph {
    graph: Graph<Task, ()>,
    index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&index| &self.graph[index])
    }

    /// Task names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.graph
            .node_indices()
            .map(|index| self.graph[index].name.as_str())
    }
}

impl std::fmt::Display for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            let name = task.name.replace('"', "\\\""); // Simple escape
            writeln!(
                f,
                "    {:?}[\"{}\\n({})\"]",
                index.index(),
                name,
                task.action.kind()
            )?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}
