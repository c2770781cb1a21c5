//! Glob resolution into in-memory file handles.
//!
//! Patterns follow the usual shell glob syntax; a leading `!` turns a
//! pattern into an exclusion. Each handle remembers the static part of the
//! pattern that matched it (its `base`), so a stage can write the file back
//! out at the same relative location under a different directory.

use std::fmt::Display;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{Pattern, glob};

use crate::error::ResolutionError;

/// A source map attached to a file by a transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMap {
    /// Raw JSON of the map.
    pub contents: Vec<u8>,
}

/// A single resolved file, held in memory between reading and writing.
#[derive(Debug, Clone)]
pub struct FileHandle {
    /// Full path of the file.
    pub path: Utf8PathBuf,
    /// Static prefix of the glob pattern which matched this file.
    pub base: Utf8PathBuf,
    /// File contents.
    pub contents: Vec<u8>,
    /// Source map produced for this file, if any.
    pub map: Option<SourceMap>,
}

impl FileHandle {
    pub fn new(
        path: impl Into<Utf8PathBuf>,
        base: impl Into<Utf8PathBuf>,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            path: path.into(),
            base: base.into(),
            contents: contents.into(),
            map: None,
        }
    }

    /// Path relative to the pattern base, or the bare file name when the
    /// path lies outside of it.
    pub fn relative(&self) -> &Utf8Path {
        match self.path.strip_prefix(&self.base) {
            Ok(rel) if !rel.as_str().is_empty() => rel,
            _ => Utf8Path::new(self.path.file_name().unwrap_or(self.path.as_str())),
        }
    }

    /// File stem, e.g. `widget` for `src/widget.template`.
    pub fn stem(&self) -> &str {
        self.path.file_stem().unwrap_or_default()
    }

    /// Contents as UTF-8 text.
    pub fn text(&self) -> anyhow::Result<&str> {
        std::str::from_utf8(&self.contents)
            .map_err(|e| anyhow::anyhow!("'{}' is not valid UTF-8: {e}", self.path))
    }

    /// Replace the contents, dropping any stale source map.
    pub fn with_contents(mut self, contents: impl Into<Vec<u8>>) -> Self {
        self.contents = contents.into();
        self.map = None;
        self
    }

    /// Replace the final extension of the path.
    pub fn with_extension(mut self, ext: &str) -> Self {
        self.path.set_extension(ext);
        self
    }

    pub fn with_map(mut self, map: SourceMap) -> Self {
        self.map = Some(map);
        self
    }
}

/// Ordered collection of resolved files. Duplicates are kept.
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    files: Vec<FileHandle>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, file: FileHandle) {
        self.files.push(file);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileHandle> {
        self.files.iter()
    }

    /// Looks a file up by its full path.
    pub fn get(&self, path: &Utf8Path) -> Option<&FileHandle> {
        self.files.iter().find(|file| file.path == path)
    }

    /// Applies `f` to every file, stopping at the first error.
    pub fn try_map<F>(self, f: F) -> anyhow::Result<FileSet>
    where
        F: FnMut(FileHandle) -> anyhow::Result<FileHandle>,
    {
        self.files.into_iter().map(f).collect()
    }
}

impl IntoIterator for FileSet {
    type Item = FileHandle;
    type IntoIter = std::vec::IntoIter<FileHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

impl<'a> IntoIterator for &'a FileSet {
    type Item = &'a FileHandle;
    type IntoIter = std::slice::Iter<'a, FileHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

impl FromIterator<FileHandle> for FileSet {
    fn from_iter<T: IntoIterator<Item = FileHandle>>(iter: T) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

/// Input patterns of a stage.
#[derive(Debug, Clone, Default)]
pub struct Patterns {
    include: Vec<String>,
    exclude: Vec<String>,
    required: bool,
}

impl Patterns {
    /// Patterns prefixed with `!` are exclusions.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for pattern in patterns {
            let pattern = pattern.into();
            match pattern.strip_prefix('!') {
                Some(negated) => exclude.push(negated.to_string()),
                None => include.push(pattern),
            }
        }

        Self {
            include,
            exclude,
            required: false,
        }
    }

    /// An empty match becomes a [`ResolutionError::Empty`].
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    /// Matching paths paired with their pattern base, without reading them.
    pub fn paths(&self) -> Result<Vec<(Utf8PathBuf, Utf8PathBuf)>, ResolutionError> {
        let exclude = self
            .exclude
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| ResolutionError::Pattern(p.clone(), e)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut paths = Vec::new();
        for entry in &self.include {
            let (base, _) = split_glob(entry);
            let matches = glob(entry).map_err(|e| ResolutionError::Pattern(entry.clone(), e))?;

            for path in matches {
                // Handle glob errors immediately here
                let path = Utf8PathBuf::try_from(path?)?;
                if path.is_dir() || exclude.iter().any(|p| p.matches(path.as_str())) {
                    continue;
                }
                paths.push((base.clone(), path));
            }
        }

        if paths.is_empty() && self.required {
            return Err(ResolutionError::Empty(self.to_string()));
        }

        Ok(paths)
    }
}

impl Display for Patterns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let all: Vec<_> = self
            .include
            .iter()
            .cloned()
            .chain(self.exclude.iter().map(|p| format!("!{p}")))
            .collect();
        write!(f, "[{}]", all.join(", "))
    }
}

/// Resolves patterns into a [`FileSet`], reading every matched file.
pub async fn resolve(patterns: &Patterns) -> Result<FileSet, ResolutionError> {
    let mut files = FileSet::new();

    for (base, path) in patterns.paths()? {
        let contents = tokio::fs::read(&path)
            .await
            .map_err(|e| ResolutionError::Read(path.clone(), e))?;

        files.push(FileHandle::new(path, base, contents));
    }

    Ok(files)
}

/// A glob matching `pattern` inside `dir`, taken literally even when the
/// directory name holds glob metacharacters.
pub fn glob_in(dir: &Utf8Path, pattern: &str) -> String {
    format!("{}/{pattern}", Pattern::escape(dir.as_str()))
}

/// A glob matching exactly `path`.
pub fn literal(path: &Utf8Path) -> String {
    Pattern::escape(path.as_str())
}

/// Splits a glob into its static root and the suffix holding wildcards.
///
/// `/app/src/*.script` becomes `(/app/src, *.script)`. For a literal file
/// path the root is the parent directory. Escaped characters in the root
/// (`[[]`, `[*]`) are turned back into plain ones.
pub(crate) fn split_glob(glob_str: &str) -> (Utf8PathBuf, String) {
    let components: Vec<_> = Utf8Path::new(glob_str).components().collect();
    let split_idx = components
        .iter()
        .position(|c| unescape(c.as_str()).is_none())
        .unwrap_or(components.len().saturating_sub(1));

    let root: Utf8PathBuf = components[..split_idx]
        .iter()
        .filter_map(|c| unescape(c.as_str()))
        .collect();
    let suffix = components[split_idx..]
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/");

    (root, suffix)
}

/// Literal text of one glob component, `None` when it holds a wildcard.
fn unescape(component: &str) -> Option<String> {
    let mut literal = String::with_capacity(component.len());
    let mut chars = component.chars();

    while let Some(c) = chars.next() {
        match c {
            '*' | '?' => return None,
            '[' => {
                let mut rest = chars.clone();
                match (rest.next(), rest.next()) {
                    (Some(escaped), Some(']')) => {
                        literal.push(escaped);
                        chars = rest;
                    }
                    _ => return None,
                }
            }
            _ => literal.push(c),
        }
    }

    Some(literal)
}
