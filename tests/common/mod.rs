//! Fixture project shared by the integration tests.
//!
//! `eslint` and `esbuild` are replaced by stubs; every other transform is the
//! native one.

#![allow(dead_code)]

use std::fs;
use std::sync::Arc;

use camino::Utf8PathBuf;
use tagpack::pipeline::{self, Layout, Toolchain};
use tagpack::server::ServeConfig;
use tagpack::{FileSet, SourceMap, StageContext, TaskGraph, Transform, TransformResult};
use tempfile::TempDir;

pub const TEMPLATE: &str = r#"<widget>
  <link rel="stylesheet" href="widget.css">
  <h1>{ opts.title }</h1>
  <script src="widget.js"></script>
</widget>
"#;

pub struct Project {
    _dir: TempDir,
    pub layout: Layout,
}

impl Project {
    pub fn new() -> Self {
        Self::named("widget")
    }

    /// A project in a directory called `name` inside a fresh temp dir.
    pub fn named(name: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf())
            .unwrap()
            .join(name);
        let layout = Layout::new(root);

        fs::create_dir_all(&layout.src).unwrap();
        fs::create_dir_all(&layout.test).unwrap();
        fs::write(layout.src.join("widget.template"), TEMPLATE).unwrap();
        fs::write(layout.src.join("widget.style"), "widget h1 { color: #ff0000; }\n").unwrap();
        fs::write(layout.src.join("widget.script"), "this.title = opts.title;\n").unwrap();
        fs::write(
            layout.demo_template(),
            "<html><body><widget></widget></body></html>\n",
        )
        .unwrap();
        fs::write(layout.test.join("widget.spec"), "describe('widget', () => {});\n").unwrap();

        Self { _dir: dir, layout }
    }

    pub fn write(&self, path: &str, contents: &str) {
        let path = self.layout.root.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    pub fn exists(&self, path: &str) -> bool {
        self.layout.root.join(path).exists()
    }

    pub fn read(&self, path: &str) -> String {
        fs::read_to_string(self.layout.root.join(path)).unwrap()
    }

    pub fn graph(&self) -> Arc<TaskGraph> {
        self.graph_with(ServeConfig::new(&self.layout))
    }

    pub fn graph_with(&self, serve: ServeConfig) -> Arc<TaskGraph> {
        let tools = Toolchain {
            lint: noop(),
            lint_tests: noop(),
            script: stub_script(Some("js")),
            minify: stub_script(None),
            ..Toolchain::native()
        };
        Arc::new(pipeline::task_graph(&self.layout, tools, serve).unwrap())
    }
}

fn noop() -> Arc<dyn Transform> {
    Arc::new(|_: &mut StageContext, files: FileSet| -> TransformResult<FileSet> { Ok(files) })
}

/// Collapses whitespace and attaches a trivial source map.
fn stub_script(ext: Option<&'static str>) -> Arc<dyn Transform> {
    Arc::new(
        move |_: &mut StageContext, files: FileSet| -> TransformResult<FileSet> {
            files.try_map(|file| {
                let code = file.text()?.split_whitespace().collect::<Vec<_>>().join(" ");
                let map = format!(
                    r#"{{"version":3,"sources":["{}"],"mappings":""}}"#,
                    file.relative()
                );

                let file = file.with_contents(code).with_map(SourceMap {
                    contents: map.into_bytes(),
                });
                Ok(match ext {
                    Some(ext) => file.with_extension(ext),
                    None => file,
                })
            })
        },
    )
}
