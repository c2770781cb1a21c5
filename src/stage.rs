//! A stage is one named file transformation: resolve the inputs, hand them to
//! a [`Transform`], and write whatever comes back out.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::Environment;
use crate::error::StageError;
use crate::fileset::{FileSet, Patterns, resolve};
use crate::transform::lint::{LintFinding, Severity};
use crate::utils::{as_overhead, relative_path};

/// Result of a single transform call.
pub type TransformResult<T> = anyhow::Result<T, anyhow::Error>;

/// Everything a transform may see besides the files themselves.
#[derive(Debug)]
pub struct StageContext {
    /// Name of the running stage.
    pub stage: String,
    /// Per-run settings.
    pub env: Environment,
    findings: Vec<LintFinding>,
}

impl StageContext {
    pub fn new(stage: impl Into<String>, env: Environment) -> Self {
        Self {
            stage: stage.into(),
            env,
            findings: Vec::new(),
        }
    }

    /// Records a non-fatal lint finding.
    pub fn report(&mut self, finding: LintFinding) {
        self.findings.push(finding);
    }

    pub fn findings(&self) -> &[LintFinding] {
        &self.findings
    }
}

/// A file transformation, from an input [`FileSet`] to an output one.
///
/// Implementations should not touch the filesystem for their inputs or
/// outputs; reading and writing belongs to the [`Stage`]. Closures with the
/// matching signature are transforms too, which keeps stub transforms cheap
/// in tests.
pub trait Transform: Send + Sync {
    fn apply(&self, ctx: &mut StageContext, files: FileSet) -> TransformResult<FileSet>;
}

impl<F> Transform for F
where
    F: Fn(&mut StageContext, FileSet) -> TransformResult<FileSet> + Send + Sync,
{
    fn apply(&self, ctx: &mut StageContext, files: FileSet) -> TransformResult<FileSet> {
        self(ctx, files)
    }
}

/// How a stage renames its outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rename {
    /// Force a fixed file name, keeping the relative directory.
    To(String),
    /// Replace the final extension, `widget.js` with `min.js` becomes
    /// `widget.min.js`.
    Extension(String),
}

impl Rename {
    fn apply(&self, path: &Utf8Path) -> Utf8PathBuf {
        match self {
            Rename::To(name) => path.with_file_name(name),
            Rename::Extension(ext) => path.with_extension(ext),
        }
    }
}

/// Extra steps around the transform, applied at the stage boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Log every input file with this prefix.
    Using(String),
    /// Rename outputs before they are written.
    Rename(Rename),
    /// Write attached source maps into this directory and link to them.
    SourceMaps(Utf8PathBuf),
}

/// 32 bytes length generic hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        Hash32(blake3::hash(buffer.as_ref()).into())
    }

    pub fn to_hex(self) -> String {
        use std::fmt::Write;

        self.0.iter().fold(String::with_capacity(64), |mut acc, byte| {
            let _ = write!(acc, "{byte:02x}");
            acc
        })
    }
}

impl Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// A file written by a stage.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: Utf8PathBuf,
    pub hash: Hash32,
}

/// What a stage did.
#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub stage: String,
    pub written: Vec<Artifact>,
    pub findings: Vec<LintFinding>,
}

/// A named, immutable file transformation.
pub struct Stage {
    name: String,
    inputs: Patterns,
    dest: Option<Utf8PathBuf>,
    steps: Vec<Step>,
    transform: Arc<dyn Transform>,
}

impl Stage {
    pub fn new(name: impl Into<String>, inputs: Patterns, transform: Arc<dyn Transform>) -> Self {
        Self {
            name: name.into(),
            inputs,
            dest: None,
            steps: Vec::new(),
            transform,
        }
    }

    /// Directory receiving the outputs. Without one nothing is written.
    pub fn dest(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.dest = Some(dir.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &Patterns {
        &self.inputs
    }

    pub fn destination(&self) -> Option<&Utf8Path> {
        self.dest.as_deref()
    }

    /// Resolve, annotate, transform, write.
    pub async fn run(&self, env: &Environment) -> Result<StageReport, StageError> {
        let s = Instant::now();
        let files = resolve(&self.inputs).await?;
        debug!(stage = %self.name, files = files.len(), "resolved inputs");

        for step in &self.steps {
            if let Step::Using(prefix) = step {
                for file in &files {
                    info!("{prefix}{}", file.relative());
                }
            }
        }

        let transform = self.transform.clone();
        let mut ctx = StageContext::new(&self.name, env.clone());
        let (ctx, files) = tokio::task::spawn_blocking(move || {
            transform
                .apply(&mut ctx, files)
                .map(|files| (ctx, files))
        })
        .await?
        .map_err(StageError::Transform)?;

        for finding in ctx.findings() {
            warn!(stage = %self.name, "{finding}");
        }

        let errors = ctx
            .findings()
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count();
        if env.strict && errors > 0 {
            return Err(StageError::Lint(errors));
        }

        let written = match &self.dest {
            Some(dest) => self.write(dest, files).await?,
            None => Vec::new(),
        };

        info!(stage = %self.name, "finished {}", as_overhead(s));

        Ok(StageReport {
            stage: self.name.clone(),
            written,
            findings: ctx.findings,
        })
    }

    async fn write(&self, dest: &Utf8Path, files: FileSet) -> Result<Vec<Artifact>, StageError> {
        let maps = self.steps.iter().find_map(|step| match step {
            Step::SourceMaps(dir) => Some(dir.as_path()),
            _ => None,
        });

        let mut written = Vec::with_capacity(files.len());
        for mut file in files {
            let mut relative = file.relative().to_path_buf();
            for step in &self.steps {
                if let Step::Rename(rename) = step {
                    relative = rename.apply(&relative);
                }
            }

            let target = dest.join(&relative);

            if let (Some(dir), Some(map)) = (maps, file.map.take()) {
                let map_path = dir.join(format!("{relative}.map"));
                let map_file = target.file_name().unwrap_or_default();
                let from = target.parent().unwrap_or(dest);

                let url = relative_path(from, &map_path);
                file.contents
                    .extend_from_slice(format!("\n//# sourceMappingURL={url}\n").as_bytes());

                let map = retarget_map(&map.contents, map_file);
                write_file(&map_path, &map).await?;
                written.push(Artifact {
                    hash: Hash32::hash(&map),
                    path: map_path,
                });
            }

            write_file(&target, &file.contents).await?;
            written.push(Artifact {
                hash: Hash32::hash(&file.contents),
                path: target,
            });
        }

        Ok(written)
    }
}

impl Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("dest", &self.dest)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

async fn write_file(path: &Utf8Path, contents: &[u8]) -> Result<(), StageError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StageError::Write(dir.to_path_buf(), e))?;
    }

    tokio::fs::write(path, contents)
        .await
        .map_err(|e| StageError::Write(path.to_path_buf(), e))
}

/// Points the `file` field of a JSON source map at the renamed output.
fn retarget_map(map: &[u8], file: &str) -> Vec<u8> {
    match serde_json::from_slice::<serde_json::Value>(map) {
        Ok(serde_json::Value::Object(mut obj)) => {
            obj.insert("file".into(), file.into());
            serde_json::to_vec(&obj).unwrap_or_else(|_| map.to_vec())
        }
        _ => map.to_vec(),
    }
}
