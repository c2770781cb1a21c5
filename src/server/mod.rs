//! Development server: static files over HTTP, a file watcher, and live
//! reload over a WebSocket.

mod http;
mod watch;

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tracing::{error, info};

use crate::engine::TaskGraph;
use crate::error::ServeError;
use crate::fileset::{glob_in, literal};
use crate::pipeline::Layout;
use crate::{Environment, Mode};

pub use crate::server::http::bind;

/// Settings of the development server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeConfig {
    /// HTTP port on localhost.
    pub port: u16,
    /// Directory served at `/`.
    pub base: Utf8PathBuf,
    /// Extra directories, mounted under a URL prefix.
    pub routes: Vec<(String, Utf8PathBuf)>,
    /// Globs whose changes reload connected browsers.
    pub reload_on: Vec<String>,
    /// Globs whose changes re-run a task.
    pub rebuild_on: Vec<(String, String)>,
    /// Task to run before the server starts.
    pub prebuild: Option<String>,
    /// Preferred port of the live-reload socket, any free port otherwise.
    pub reload_port: u16,
}

impl ServeConfig {
    pub fn new(layout: &Layout) -> Self {
        Self {
            port: 9000,
            base: layout.demo.clone(),
            routes: vec![
                ("/bower_components".into(), layout.vendor.clone()),
                ("/dist".into(), layout.dist.clone()),
            ],
            reload_on: vec![glob_in(&layout.dist, "*.js"), literal(&layout.demo_page())],
            rebuild_on: vec![(literal(&layout.demo_template()), "build:demo".into())],
            prebuild: Some("build:demo".into()),
            reload_port: 35729,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Builds the demo, then serves it until the process is terminated.
///
/// Runs the prebuild task to completion first, so the demo page exists
/// before the first request. When binding the HTTP port fails no watcher is
/// installed. Failed rebuilds are logged and the server keeps running.
pub async fn serve(
    graph: Arc<TaskGraph>,
    config: ServeConfig,
    env: Environment,
) -> Result<(), ServeError> {
    let (tcp, reload_port) = watch::reserve_port(config.reload_port).map_err(ServeError::Reload)?;

    let env = Environment {
        mode: Mode::Watch,
        port: Some(reload_port),
        ..env
    };

    if let Some(task) = &config.prebuild {
        info!("running initial build...");
        graph
            .run_task(task, &env)
            .await
            .map_err(|aborted| ServeError::Prebuild(Box::new(aborted.error)))?;
    }

    let listener = bind(&config).await?;

    let tx_reload = watch::start_reload(tcp);
    http::start(listener, &config)?;

    let rules = watch::Rules::new(&config).await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut debouncer = new_debouncer(
        Duration::from_millis(250),
        None,
        move |result: DebounceEventResult| {
            // the receiver only goes away together with the server
            let _ = tx.send(result);
        },
    )?;

    for path in rules.roots() {
        info!("watching {}", path);
        debouncer.watch(path, RecursiveMode::Recursive)?;
    }

    while let Some(result) = rx.recv().await {
        let events = match result {
            Ok(events) => events,
            Err(errors) => {
                for e in errors {
                    error!("watch error: {e:?}");
                }
                continue;
            }
        };

        let batch = rules.classify(events.iter().map(|event| &event.event));

        for task in &batch.rebuild {
            info!("change detected, re-running {task}...");
            if let Err(aborted) = graph.run_task(task, &env).await {
                error!("{}", aborted.error);
            }
        }

        if batch.reload && tx_reload.send(()).is_err() {
            error!("live-reload thread stopped");
        }
    }

    Ok(())
}
