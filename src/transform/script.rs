use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::fileset::{FileHandle, FileSet, SourceMap};
use crate::stage::{StageContext, Transform, TransformResult};

const INLINE_MAP: &str = "//# sourceMappingURL=data:application/json;base64,";

/// Compiles and minifies scripts with `esbuild`, keeping the source map.
///
/// Each file is piped through `esbuild` on stdin with an inline source map,
/// which is then cut out of the code and attached to the file handle. The
/// stage decides where the map ends up.
///
/// **Note:** This requires the `esbuild` binary to be available in the PATH.
#[derive(Debug, Clone)]
pub struct ScriptCompiler {
    program: String,
    target: String,
    extension: Option<String>,
}

impl ScriptCompiler {
    pub fn new() -> Self {
        Self {
            program: "esbuild".into(),
            target: "es2015".into(),
            extension: Some("js".into()),
        }
    }

    /// Uses a different executable, e.g. `node_modules/.bin/esbuild`.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Language level of the output, e.g. `es2015`.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Keep the input file names as they are.
    pub fn keep_extension(mut self) -> Self {
        self.extension = None;
        self
    }

    fn compile(&self, file: &FileHandle) -> TransformResult<(String, Option<Vec<u8>>)> {
        let mut child = Command::new(&self.program)
            .arg("--minify")
            .arg("--loader=js")
            .arg("--sourcemap=inline")
            .arg(format!("--target={}", self.target))
            .arg(format!("--sourcefile={}", file.relative()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("couldn't start {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&file.contents)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            bail!(
                "{} failed on {}:\n{}",
                self.program,
                file.path,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let code = String::from_utf8(output.stdout)?;
        split_inline_map(&code)
    }
}

impl Default for ScriptCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for ScriptCompiler {
    fn apply(&self, _: &mut StageContext, files: FileSet) -> TransformResult<FileSet> {
        files.try_map(|file| {
            let (code, map) = self.compile(&file)?;

            let mut file = file.with_contents(code);
            if let Some(ext) = &self.extension {
                file = file.with_extension(ext);
            }
            if let Some(contents) = map {
                file = file.with_map(SourceMap { contents });
            }

            Ok(file)
        })
    }
}

/// Cuts a trailing base64 source map comment off the code.
pub(crate) fn split_inline_map(code: &str) -> TransformResult<(String, Option<Vec<u8>>)> {
    let Some(at) = code.rfind(INLINE_MAP) else {
        return Ok((code.to_string(), None));
    };

    let encoded = code[at + INLINE_MAP.len()..].trim();
    let map = STANDARD
        .decode(encoded)
        .context("couldn't decode inline source map")?;

    let mut code = code[..at].trim_end().to_string();
    code.push('\n');

    Ok((code, Some(map)))
}

/// Drops a trailing `//# sourceMappingURL=` comment, inline or not.
pub(crate) fn strip_map_comment(code: &str) -> &str {
    match code.rfind("//# sourceMappingURL=") {
        Some(at) if !code[at..].trim_end().contains('\n') => code[..at].trim_end(),
        _ => code.trim_end(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_inline_map() {
        let map = r#"{"version":3,"sources":["widget.script"],"mappings":"AAAA"}"#;
        let code = format!("this.a=1;\n{INLINE_MAP}{}\n", STANDARD.encode(map));

        let (code, extracted) = split_inline_map(&code).unwrap();
        assert_eq!(code, "this.a=1;\n");
        assert_eq!(extracted.unwrap(), map.as_bytes());
    }

    #[test]
    fn test_split_without_map() {
        let (code, map) = split_inline_map("this.a=1;\n").unwrap();
        assert_eq!(code, "this.a=1;\n");
        assert!(map.is_none());
    }

    #[test]
    fn test_strip_map_comment() {
        assert_eq!(
            strip_map_comment("this.a=1;\n//# sourceMappingURL=../maps/widget.js.map\n"),
            "this.a=1;"
        );
        assert_eq!(strip_map_comment("this.a=1;\n"), "this.a=1;");
    }

    #[test]
    fn missing_program_is_a_transform_failure() {
        let files: FileSet = [FileHandle::new("/p/src/widget.script", "/p/src", "let a;")]
            .into_iter()
            .collect();
        let mut ctx = StageContext::new("build:js", crate::Environment::build());

        let err = ScriptCompiler::new()
            .program("tagpack-no-such-esbuild")
            .apply(&mut ctx, files)
            .unwrap_err();
        assert!(err.to_string().contains("couldn't start tagpack-no-such-esbuild"));
    }
}
