use std::net::SocketAddr;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while turning glob patterns into a [`FileSet`](crate::FileSet).
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Couldn't compile glob pattern '{0}'.\n{1}")]
    Pattern(String, #[source] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't read '{0}'.\n{1}")]
    Read(Utf8PathBuf, #[source] std::io::Error),

    #[error("No files matched required input {0}")]
    Empty(String),
}

/// Errors raised by a single [`Stage`](crate::Stage) run.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Transform failed.\n{0}")]
    Transform(anyhow::Error),

    #[error("Lint reported {0} error(s) in strict mode")]
    Lint(usize),

    #[error("Couldn't write '{0}'.\n{1}")]
    Write(Utf8PathBuf, #[source] std::io::Error),

    #[error("Transform worker stopped unexpectedly.\n{0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Errors raised while deleting paths at a checkpoint.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("Couldn't compile cleanup pattern '{0}'.\n{1}")]
    Pattern(String, #[source] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't remove '{}'.\n{}", .0.display(), .1)]
    Remove(PathBuf, #[source] std::io::Error),
}

/// Errors raised by the development server.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Couldn't bind the HTTP server to {0}.\n{1}")]
    Bind(SocketAddr, #[source] std::io::Error),

    #[error("Couldn't reserve a port for live reload.\n{0}")]
    Reload(#[source] std::io::Error),

    #[error("Initial demo build failed.\n{0}")]
    Prebuild(Box<PipelineError>),

    #[error("Error while watching for file changes:\n{0}")]
    Notify(#[from] notify::Error),

    #[error("Couldn't resolve watched path '{0}'.\n{1}")]
    WatchPath(String, anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The failure of a leaf task action.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    #[error(transparent)]
    Serve(#[from] ServeError),
}

/// Errors surfaced by the task graph and the sequencer.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Task '{task}' failed.\n{source}")]
    Task {
        task: String,
        #[source]
        source: TaskError,
    },

    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("Task '{0}' is already registered")]
    Duplicate(String),

    #[error("Task '{0}' refers to unknown task '{1}'")]
    Dangling(String, String),

    #[error("Composite task '{0}' is part of a cycle")]
    Cycle(String),

    #[error("A task in the group [{group}] stopped unexpectedly.\n{source}")]
    Join {
        group: String,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl PipelineError {
    /// Name of the leaf task the failure is attributed to, if any.
    pub fn task(&self) -> Option<&str> {
        match self {
            PipelineError::Task { task, .. } => Some(task),
            PipelineError::UnknownTask(task)
            | PipelineError::Duplicate(task)
            | PipelineError::Dangling(task, _)
            | PipelineError::Cycle(task) => Some(task),
            PipelineError::Join { .. } => None,
        }
    }
}
