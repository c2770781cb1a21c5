//! The fixed component packaging workflow.
//!
//! Every task of the workflow is registered here, with its inputs, its
//! destination and the transform doing the work. The transforms come from a
//! [`Toolchain`], so any of them can be replaced, e.g. by stubs in tests.

use std::fmt::Display;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::clean::Cleanup;
use crate::engine::{Action, Blueprint, Plan, RunReport, TaskGraph, TraceKind};
use crate::error::PipelineError;
use crate::fileset::{Patterns, glob_in, literal};
use crate::server::ServeConfig;
use crate::stage::{Rename, Stage, Step, Transform};
use crate::transform::{
    Eslint, Inliner, ScriptCompiler, StyleChecker, StyleProcessor, TagCompiler, TemplateCompiler,
};

/// Directories of a component project. Every path is absolute from `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: Utf8PathBuf,
    /// Component sources: `*.template`, `*.style`, `*.script`.
    pub src: Utf8PathBuf,
    /// Intermediate artifacts, removed at the end of a build.
    pub tmp: Utf8PathBuf,
    pub dist: Utf8PathBuf,
    pub demo: Utf8PathBuf,
    pub maps: Utf8PathBuf,
    pub test: Utf8PathBuf,
    /// Third-party browser packages served next to the demo.
    pub vendor: Utf8PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        let root = root.into();
        Self {
            src: root.join("src"),
            tmp: root.join(".tmp"),
            dist: root.join("dist"),
            demo: root.join("demo"),
            maps: root.join("maps"),
            test: root.join("test"),
            vendor: root.join("bower_components"),
            root,
        }
    }

    /// The rendered demo page.
    pub fn demo_page(&self) -> Utf8PathBuf {
        self.demo.join("index.html")
    }

    /// The demo template.
    pub fn demo_template(&self) -> Utf8PathBuf {
        self.src.join("demo.template")
    }
}

/// The transforms used by the workflow, one per stage.
#[derive(Clone)]
pub struct Toolchain {
    pub lint: Arc<dyn Transform>,
    pub lint_tests: Arc<dyn Transform>,
    pub style_check: Arc<dyn Transform>,
    pub template: Arc<dyn Transform>,
    pub demo: Arc<dyn Transform>,
    pub style: Arc<dyn Transform>,
    pub script: Arc<dyn Transform>,
    pub inline: Arc<dyn Transform>,
    pub tag: Arc<dyn Transform>,
    pub minify: Arc<dyn Transform>,
}

impl Toolchain {
    /// The default implementations, `eslint` and `esbuild` included.
    pub fn native() -> Self {
        Self {
            lint: Arc::new(Eslint::new()),
            lint_tests: Arc::new(Eslint::new().env("jasmine")),
            style_check: Arc::new(StyleChecker::new()),
            template: Arc::new(TemplateCompiler::new()),
            demo: Arc::new(TemplateCompiler::new().inject_reload(true)),
            style: Arc::new(StyleProcessor::new()),
            script: Arc::new(ScriptCompiler::new()),
            inline: Arc::new(Inliner::new()),
            tag: Arc::new(TagCompiler::new()),
            minify: Arc::new(ScriptCompiler::new().keep_extension()),
        }
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::native()
    }
}

fn glob(dir: &Utf8Path, pattern: &str) -> String {
    glob_in(dir, pattern)
}

fn not(dir: &Utf8Path, pattern: &str) -> String {
    format!("!{}", glob_in(dir, pattern))
}

fn using(prefix: &str) -> Step {
    Step::Using(prefix.into())
}

/// `prep`: lint everything, then start from a clean slate.
pub fn prep_plan() -> Plan {
    Plan::new()
        .parallel(["lint", "lint:tests", "style-check"])
        .then("clean:prep")
}

/// `build`: the whole packaging run.
pub fn build_plan() -> Plan {
    Plan::new()
        .then("prep")
        .parallel(["build:html", "build:css", "build:js"])
        .then("inline")
        .then("clean:tmp")
        .then("build:tag")
        .then("minify:js")
        .then("clean:final")
}

/// Registers every task of the workflow, leaving the blueprint open for
/// additional tasks.
pub fn blueprint(
    layout: &Layout,
    tools: Toolchain,
    serve: ServeConfig,
) -> Result<Blueprint, PipelineError> {
    let Layout {
        src,
        tmp,
        dist,
        demo,
        maps,
        test,
        ..
    } = layout;

    let mut bp = Blueprint::new();

    bp.register(
        "lint",
        Action::Stage(
            Stage::new("lint", Patterns::new([glob(src, "*.script")]), tools.lint)
                .step(using("Linting: ")),
        ),
    )?
    .register(
        "lint:tests",
        Action::Stage(
            Stage::new(
                "lint:tests",
                Patterns::new([glob(test, "*.spec")]),
                tools.lint_tests,
            )
            .step(using("Linting: ")),
        ),
    )?
    .register(
        "style-check",
        Action::Stage(
            Stage::new(
                "style-check",
                Patterns::new([glob(src, "*.script")]),
                tools.style_check,
            )
            .step(using("Checking style: ")),
        ),
    )?;

    bp.register(
        "clean:prep",
        Action::Clean(Cleanup::new([literal(dist), literal(tmp), literal(maps)])),
    )?
    .register(
        "clean:tmp",
        Action::Clean(Cleanup::new([glob(tmp, "*.css"), glob(tmp, "*.js")])),
    )?
    .register("clean:final", Action::Clean(Cleanup::new([literal(tmp)])))?;

    bp.register(
        "build:html",
        Action::Stage(
            Stage::new(
                "build:html",
                Patterns::new([glob(src, "*.template"), not(src, "demo.template")]),
                tools.template,
            )
            .dest(tmp.clone())
            .step(using("Processing template: ")),
        ),
    )?
    .register(
        "build:demo",
        Action::Stage(
            Stage::new(
                "build:demo",
                Patterns::new([literal(&layout.demo_template())]).required(),
                tools.demo,
            )
            .dest(demo.clone())
            .step(using("Processing template: "))
            .step(Step::Rename(Rename::To("index.html".into()))),
        ),
    )?
    .register(
        "build:css",
        Action::Stage(
            Stage::new(
                "build:css",
                Patterns::new([glob(src, "*.style")]),
                tools.style,
            )
            .dest(tmp.clone())
            .step(using("Processing CSS: ")),
        ),
    )?
    .register(
        "build:js",
        Action::Stage(
            Stage::new(
                "build:js",
                Patterns::new([glob(src, "*.script")]),
                tools.script,
            )
            .dest(tmp.clone())
            .step(using("Processing JS: "))
            .step(Step::SourceMaps(maps.clone())),
        ),
    )?;

    bp.register(
        "inline",
        Action::Stage(
            Stage::new(
                "inline",
                Patterns::new([glob(tmp, "*.html"), glob(tmp, "*.css"), glob(tmp, "*.js")])
                    .required(),
                tools.inline,
            )
            .dest(tmp.clone())
            .step(using("Inlining CSS and JS: ")),
        ),
    )?
    .register(
        "build:tag",
        Action::Stage(
            Stage::new(
                "build:tag",
                Patterns::new([glob(tmp, "*.html")]).required(),
                tools.tag,
            )
            .dest(dist.clone())
            .step(using("Generating Tag JS: ")),
        ),
    )?
    .register(
        "minify:js",
        Action::Stage(
            Stage::new(
                "minify:js",
                Patterns::new([glob(dist, "*.js"), not(dist, "*.min.js")]).required(),
                tools.minify,
            )
            .dest(dist.clone())
            .step(using("Minifying Tag JS: "))
            .step(Step::Rename(Rename::Extension("min.js".into())))
            .step(Step::SourceMaps(maps.clone())),
        ),
    )?;

    bp.register("prep", Action::Composite(prep_plan()))?
        .register("build", Action::Composite(build_plan()))?
        .register("default", Action::Composite(Plan::new().then("build")))?
        .register("serve", Action::Serve(serve))?;

    Ok(bp)
}

/// The complete, validated task graph of the workflow.
pub fn task_graph(
    layout: &Layout,
    tools: Toolchain,
    serve: ServeConfig,
) -> Result<TaskGraph, PipelineError> {
    blueprint(layout, tools, serve)?.finish()
}

/// Where a packaging run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Linting,
    PreBuildClean,
    /// Templates, styles and scripts, compiled side by side.
    Compiling,
    Inline,
    IntermediateClean,
    CompileTag,
    Minify,
    FinalClean,
    Done,
    Aborted,
}

impl Phase {
    /// The phase a leaf task belongs to. Composites and the server have none.
    pub fn of(task: &str) -> Option<Phase> {
        let phase = match task {
            "lint" | "lint:tests" | "style-check" => Phase::Linting,
            "clean:prep" => Phase::PreBuildClean,
            "build:html" | "build:css" | "build:js" => Phase::Compiling,
            "inline" => Phase::Inline,
            "clean:tmp" => Phase::IntermediateClean,
            "build:tag" => Phase::CompileTag,
            "minify:js" => Phase::Minify,
            "clean:final" => Phase::FinalClean,
            _ => return None,
        };
        Some(phase)
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Linting => "linting",
            Phase::PreBuildClean => "pre-build clean",
            Phase::Compiling => "compiling",
            Phase::Inline => "inlining",
            Phase::IntermediateClean => "intermediate clean",
            Phase::CompileTag => "compiling tag",
            Phase::Minify => "minifying",
            Phase::FinalClean => "final clean",
            Phase::Done => "done",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

impl RunReport {
    /// Replays the trace into the sequence of phases the run went through,
    /// from [`Phase::Idle`] to either [`Phase::Done`] or [`Phase::Aborted`].
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases = vec![Phase::Idle];

        for event in &self.trace {
            if event.kind != TraceKind::Started {
                continue;
            }
            if let Some(phase) = Phase::of(&event.task)
                && phases.last() != Some(&phase)
            {
                phases.push(phase);
            }
        }

        let failed = self.trace.iter().any(|e| e.kind == TraceKind::Failed);
        phases.push(if failed { Phase::Aborted } else { Phase::Done });
        phases
    }
}
