#![forbid(unsafe_code)]
//! Packages a UI component (a template, a stylesheet and a script) into a
//! distributable custom-tag module, plain and minified, with source maps.
//!
//! The work is organised as a graph of named tasks. Each task is either a
//! [`Stage`] (resolve files, transform them, write them), a [`Cleanup`]
//! checkpoint, a composite [`Plan`] of other tasks, or the development
//! server. The fixed component workflow lives in [`pipeline`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tagpack::{Environment, pipeline::{self, Layout, Toolchain}, server::ServeConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let layout = Layout::new("my-component");
//! let serve = ServeConfig::new(&layout);
//! let graph = Arc::new(pipeline::task_graph(&layout, Toolchain::native(), serve)?);
//!
//! graph.run_task("build", &Environment::default()).await?;
//! # Ok(())
//! # }
//! ```

mod clean;
mod engine;
mod error;
mod fileset;
mod stage;
mod utils;

pub mod pipeline;
pub mod server;
pub mod transform;

pub use crate::clean::Cleanup;
pub use crate::engine::{
    Aborted, Action, Blueprint, Element, Plan, RunReport, Task, TaskGraph, TraceEvent, TraceKind,
};
pub use crate::error::*;
pub use crate::fileset::{FileHandle, FileSet, Patterns, SourceMap, resolve};
pub use crate::stage::{
    Artifact, Hash32, Rename, Stage, StageContext, StageReport, Step, Transform, TransformResult,
};
pub use crate::transform::lint::{LintFinding, Severity};

/// Whether a run happens as a one-off build or under the development server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// A single packaging run.
    #[default]
    Build,
    /// Running under `serve`, with a live-reload socket available.
    Watch,
}

/// Per-run settings passed down to every stage.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// The current mode (Build or Watch).
    pub mode: Mode,
    /// Port of the live-reload socket, only set while serving.
    pub port: Option<u16>,
    /// Turn error-level lint findings into stage failures.
    pub strict: bool,
}

impl Environment {
    /// Environment for a one-off build.
    pub fn build() -> Self {
        Self::default()
    }

    /// Same settings with lint findings treated as failures.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Returns a JavaScript snippet to enable live-reloading.
    ///
    /// Only available in `Watch` mode, once the live-reload socket has been
    /// reserved. The snippet reloads the page on any message.
    pub fn get_refresh_script(&self) -> Option<String> {
        match (self.mode, self.port) {
            (Mode::Watch, Some(port)) => Some(format!(
                r#"
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
"#
            )),
            _ => None,
        }
    }
}
