//! Watching is a three-part system:
//!
//! 1. **File watcher**: the `notify` crate monitors the watched directories,
//!    debounced so that one save produces one batch of events.
//! 2. **WebSocket server**: a dedicated thread accepts `tungstenite`
//!    connections from open browser tabs, a second one broadcasts to them.
//! 3. **Client script**: [`Environment`](crate::Environment) provides a small
//!    JavaScript snippet, injected into the demo page, which reloads the page
//!    on any message.
//!
//! Every batch of changes is matched against [`Rules`]: a match on a reload
//! glob sends a single `"reload"` to every client, a match on a rebuild glob
//! re-runs the associated task.

use std::collections::HashSet;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind};
use tungstenite::WebSocket;

use crate::error::ServeError;
use crate::fileset::split_glob;
use crate::server::ServeConfig;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Binds the live-reload socket, on the preferred port when it is free.
pub(crate) fn reserve_port(preferred: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Starts the WebSocket threads and returns the sender triggering a reload.
pub(crate) fn start_reload(server: TcpListener) -> Sender<()> {
    let clients = Clients::default();
    let _incoming = new_thread_ws_incoming(server, clients.clone());
    let (tx, _reload) = new_thread_ws_reload(clients);
    tx
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let Ok(stream) = stream else { continue };
            match tungstenite::accept(stream) {
                Ok(socket) => clients
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(socket),
                Err(e) => tracing::warn!("rejected live-reload client: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(
                        tungstenite::error::Error::ConnectionClosed
                        | tungstenite::error::Error::AlreadyClosed,
                    ) => broken.push(i),
                    Err(e) => {
                        tracing::error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }

            tracing::info!(clients = clients.len(), "reload sent");
        }
    });

    (tx, thread)
}

/// What a batch of changes asks for.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Batch {
    pub reload: bool,
    pub rebuild: Vec<String>,
}

/// Compiled watch globs together with the directories to watch for them.
#[derive(Debug)]
pub(crate) struct Rules {
    reload: Vec<Pattern>,
    rebuild: Vec<(Pattern, String)>,
    roots: Vec<Utf8PathBuf>,
}

impl Rules {
    /// Resolves the globs of the config. Watched directories are created when
    /// missing, so a fresh project can be served before its first build.
    pub(crate) async fn new(config: &ServeConfig) -> Result<Self, ServeError> {
        let mut roots = HashSet::new();

        let mut reload = Vec::new();
        for glob in &config.reload_on {
            let (root, pattern) = watch_glob(glob).await?;
            roots.insert(root);
            reload.push(pattern);
        }

        let mut rebuild = Vec::new();
        for (glob, task) in &config.rebuild_on {
            let (root, pattern) = watch_glob(glob).await?;
            roots.insert(root);
            rebuild.push((pattern, task.clone()));
        }

        Ok(Self {
            reload,
            rebuild,
            // Collapse watched paths to reduce the number of watches
            roots: collapse_watch_paths(roots),
        })
    }

    /// Directories handed to the watcher.
    pub(crate) fn roots(&self) -> &[Utf8PathBuf] {
        &self.roots
    }

    /// At most one reload per batch, and every rebuild task once. Events that
    /// only read a file are skipped.
    pub(crate) fn classify<'a>(&self, events: impl IntoIterator<Item = &'a Event>) -> Batch {
        let mut batch = Batch::default();

        let paths = events
            .into_iter()
            .filter(|event| is_change(&event.kind))
            .flat_map(|event| &event.paths);

        for path in paths {
            if self.reload.iter().any(|p| p.matches_path(path)) {
                batch.reload = true;
            }
            for (pattern, task) in &self.rebuild {
                if pattern.matches_path(path) && !batch.rebuild.contains(task) {
                    batch.rebuild.push(task.clone());
                }
            }
        }

        batch
    }
}

/// Whether an event may have altered the file. Serving a page opens the
/// files under watch, and rebuilding reads its sources.
fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(_)
            | EventKind::Remove(_)
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

async fn watch_glob(glob: &str) -> Result<(Utf8PathBuf, Pattern), ServeError> {
    let (root, _) = split_glob(glob);
    tokio::fs::create_dir_all(&root).await?;

    resolve_watch_path(glob).map_err(|e| ServeError::WatchPath(glob.to_string(), e))
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
///
/// The root must exist on disk; the file part may not exist yet. A literal
/// file path is watched through its parent so that atomic writes are caught.
pub(crate) fn resolve_watch_path(glob_str: impl AsRef<str>) -> anyhow::Result<(Utf8PathBuf, Pattern)> {
    let (root, suffix) = split_glob(glob_str.as_ref());

    let root = if root.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        root.as_path()
    };
    let absolute_root = root
        .canonicalize_utf8()
        .with_context(|| format!("couldn't canonicalize {root}"))?;

    let pattern = Pattern::new(&format!(
        "{}/{suffix}",
        Pattern::escape(absolute_root.as_str())
    ))?;

    Ok((absolute_root, pattern))
}

/// Watch roots with every directory nested in another root dropped, since
/// each root is watched recursively.
fn collapse_watch_paths(roots: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut roots: Vec<_> = roots.into_iter().collect();
    roots.sort();

    let mut outer: Vec<Utf8PathBuf> = Vec::new();
    for root in roots {
        // `Utf8Path::starts_with` compares whole components
        if !outer.last().is_some_and(|last| root.starts_with(last)) {
            outer.push(root);
        }
    }

    outer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Layout;
    use notify::event::{CreateKind, DataChange, ModifyKind};
    use tempfile::TempDir;

    fn rules() -> Rules {
        Rules {
            reload: vec![
                Pattern::new("/p/dist/*.js").unwrap(),
                Pattern::new("/p/demo/index.html").unwrap(),
            ],
            rebuild: vec![(
                Pattern::new("/p/src/demo.template").unwrap(),
                "build:demo".into(),
            )],
            roots: vec![],
        }
    }

    fn written(path: &str) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path(path.into())
    }

    fn opened(path: &str) -> Event {
        Event::new(EventKind::Access(AccessKind::Open(AccessMode::Any))).add_path(path.into())
    }

    fn closed_after_read(path: &str) -> Event {
        Event::new(EventKind::Access(AccessKind::Close(AccessMode::Read))).add_path(path.into())
    }

    #[test]
    fn one_reload_per_batch() {
        let events = [
            Event::new(EventKind::Create(CreateKind::File)).add_path("/p/dist/widget.js".into()),
            written("/p/dist/widget.js"),
            written("/p/dist/widget.min.js"),
            Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write)))
                .add_path("/p/demo/index.html".into()),
        ];

        let batch = rules().classify(&events);
        assert_eq!(
            batch,
            Batch {
                reload: true,
                rebuild: vec![]
            }
        );
    }

    #[test]
    fn demo_template_triggers_rebuild_only() {
        let events = [
            written("/p/src/demo.template"),
            written("/p/src/demo.template"),
        ];

        let batch = rules().classify(&events);
        assert_eq!(
            batch,
            Batch {
                reload: false,
                rebuild: vec!["build:demo".into()]
            }
        );
    }

    #[test]
    fn reads_are_not_changes() {
        // a browser fetching the page, then a rebuild reading its template
        let events = [
            opened("/p/demo/index.html"),
            closed_after_read("/p/demo/index.html"),
            opened("/p/dist/widget.js"),
            closed_after_read("/p/dist/widget.js"),
            opened("/p/src/demo.template"),
            closed_after_read("/p/src/demo.template"),
        ];

        assert_eq!(rules().classify(&events), Batch::default());
    }

    #[test]
    fn unrelated_changes_are_ignored() {
        let events = [
            written("/p/src/widget.script"),
            written("/p/maps/widget.js.map"),
        ];
        assert_eq!(rules().classify(&events), Batch::default());
    }

    #[tokio::test]
    async fn rules_create_missing_roots() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let layout = Layout::new(root.clone());

        let rules = Rules::new(&ServeConfig::new(&layout)).await.unwrap();

        let canonical = root.canonicalize_utf8().unwrap();
        assert!(layout.dist.is_dir());
        assert_eq!(
            rules.roots(),
            [canonical.join("demo"), canonical.join("dist"), canonical.join("src")]
        );

        let batch = rules.classify(&[written(canonical.join("dist/widget.js").as_str())]);
        assert!(batch.reload);
    }

    #[tokio::test]
    async fn rules_match_under_a_root_with_metacharacters() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf())
            .unwrap()
            .join("widget[v2]");
        let layout = Layout::new(root.clone());

        let rules = Rules::new(&ServeConfig::new(&layout)).await.unwrap();

        let canonical = root.canonicalize_utf8().unwrap();
        assert!(rules.roots().contains(&canonical.join("dist")));

        let events = [
            written(canonical.join("dist/widget.js").as_str()),
            written(canonical.join("src/demo.template").as_str()),
        ];
        assert_eq!(
            rules.classify(&events),
            Batch {
                reload: true,
                rebuild: vec!["build:demo".into()]
            }
        );
    }

    #[test]
    fn test_resolve_watch_path() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let canonical = root.canonicalize_utf8().unwrap();

        let (watch, pattern) = resolve_watch_path(format!("{root}/*.js")).unwrap();
        assert_eq!(watch, canonical);
        assert_eq!(pattern.as_str(), canonical.join("*.js"));

        // concrete file which does not exist yet: watch the parent
        let (watch, pattern) = resolve_watch_path(format!("{root}/index.html")).unwrap();
        assert_eq!(watch, canonical);
        assert_eq!(pattern.as_str(), canonical.join("index.html"));
    }

    #[test]
    fn nested_roots_collapse_into_the_project() {
        let roots = HashSet::from([
            Utf8PathBuf::from("/p/demo"),
            Utf8PathBuf::from("/p"),
            Utf8PathBuf::from("/p/src/nested"),
            Utf8PathBuf::from("/p-old/dist"),
        ]);

        assert_eq!(
            collapse_watch_paths(roots),
            [Utf8PathBuf::from("/p"), Utf8PathBuf::from("/p-old/dist")]
        );
    }

    #[test]
    fn layout_roots_stay_apart() {
        let layout = Layout::new("/p");
        let roots = HashSet::from([layout.src.clone(), layout.dist.clone(), layout.demo.clone()]);

        assert_eq!(
            collapse_watch_paths(roots),
            [layout.demo, layout.dist, layout.src]
        );
    }
}
