use anyhow::anyhow;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use crate::fileset::{FileHandle, FileSet};
use crate::stage::{StageContext, Transform, TransformResult};

/// Encodes a browser version the way `lightningcss` expects it.
const fn version(major: u32, minor: u32) -> Option<u32> {
    Some((major << 16) | (minor << 8))
}

/// Adds vendor prefixes for the configured browsers and minifies.
#[derive(Debug, Clone)]
pub struct StyleProcessor {
    browsers: Browsers,
}

impl StyleProcessor {
    /// Targets roughly the last release of every major browser.
    pub fn new() -> Self {
        Self {
            browsers: Browsers {
                chrome: version(120, 0),
                edge: version(120, 0),
                firefox: version(120, 0),
                safari: version(15, 4),
                ios_saf: version(15, 4),
                samsung: version(23, 0),
                android: version(120, 0),
                ..Browsers::default()
            },
        }
    }

    pub fn browsers(mut self, browsers: Browsers) -> Self {
        self.browsers = browsers;
        self
    }

    fn targets(&self) -> Targets {
        Targets::from(self.browsers)
    }

    fn process(&self, file: &FileHandle) -> TransformResult<String> {
        let source = file.text()?;
        let mut sheet = StyleSheet::parse(
            source,
            ParserOptions {
                filename: file.path.to_string(),
                ..ParserOptions::default()
            },
        )
        .map_err(|e| anyhow!("{}: {e}", file.path))?;

        sheet
            .minify(MinifyOptions {
                targets: self.targets(),
                ..MinifyOptions::default()
            })
            .map_err(|e| anyhow!("{}: {e}", file.path))?;

        let out = sheet
            .to_css(PrinterOptions {
                minify: true,
                targets: self.targets(),
                ..PrinterOptions::default()
            })
            .map_err(|e| anyhow!("{}: {e}", file.path))?;

        Ok(out.code)
    }
}

impl Default for StyleProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for StyleProcessor {
    fn apply(&self, _: &mut StageContext, files: FileSet) -> TransformResult<FileSet> {
        files.try_map(|file| {
            let css = self.process(&file)?;
            Ok(file.with_contents(css).with_extension("css"))
        })
    }
}
