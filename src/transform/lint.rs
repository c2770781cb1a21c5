//! Linting. Findings are reported through the stage context and never change
//! the files; whether they fail the stage is decided by the stage itself.

use std::fmt::Display;
use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, bail};
use camino::Utf8PathBuf;
use regex::Regex;
use serde::Deserialize;

use crate::fileset::{FileHandle, FileSet};
use crate::stage::{StageContext, Transform, TransformResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// A single problem reported by a linter. Never fatal on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintFinding {
    pub file: Utf8PathBuf,
    pub line: usize,
    pub column: usize,
    pub rule: String,
    pub message: String,
    pub severity: Severity,
}

impl Display for LintFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{} {} {} ({})",
            self.file, self.line, self.column, self.severity, self.message, self.rule
        )
    }
}

/// Runs `eslint` on every file through stdin and collects its JSON report.
///
/// **Note:** This requires the `eslint` binary to be available in the PATH.
#[derive(Debug, Clone)]
pub struct Eslint {
    program: String,
    envs: Vec<String>,
}

impl Eslint {
    pub fn new() -> Self {
        Self {
            program: "eslint".into(),
            envs: Vec::new(),
        }
    }

    /// Uses a different executable, e.g. `node_modules/.bin/eslint`.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Adds a predefined environment, e.g. `jasmine` for test sources.
    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.envs.push(env.into());
        self
    }

    fn lint(&self, file: &FileHandle) -> TransformResult<Vec<LintFinding>> {
        let mut command = Command::new(&self.program);
        command
            .arg("--format")
            .arg("json")
            .arg("--stdin")
            .arg("--stdin-filename")
            .arg(file.path.as_str());
        for env in &self.envs {
            command.arg("--env").arg(env);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("couldn't start {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&file.contents)?;
        }

        let output = child.wait_with_output()?;

        // 0: clean, 1: problems found, anything else: eslint itself failed
        if !matches!(output.status.code(), Some(0 | 1)) {
            bail!(
                "{} failed on {}:\n{}",
                self.program,
                file.path,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        parse_eslint_report(&output.stdout, &file.path)
    }
}

impl Default for Eslint {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Eslint {
    fn apply(&self, ctx: &mut StageContext, files: FileSet) -> TransformResult<FileSet> {
        for file in &files {
            for finding in self.lint(file)? {
                ctx.report(finding);
            }
        }
        Ok(files)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintResult {
    messages: Vec<EslintMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintMessage {
    rule_id: Option<String>,
    severity: u8,
    message: String,
    #[serde(default)]
    line: usize,
    #[serde(default)]
    column: usize,
}

fn parse_eslint_report(json: &[u8], file: &Utf8PathBuf) -> TransformResult<Vec<LintFinding>> {
    let results: Vec<EslintResult> =
        serde_json::from_slice(json).context("couldn't parse eslint report")?;

    Ok(results
        .into_iter()
        .flat_map(|result| result.messages)
        .map(|message| LintFinding {
            file: file.clone(),
            line: message.line,
            column: message.column,
            rule: message.rule_id.unwrap_or_else(|| "parse".into()),
            message: message.message,
            severity: if message.severity >= 2 {
                Severity::Error
            } else {
                Severity::Warning
            },
        })
        .collect())
}

/// Native code-style checks: indentation, trailing whitespace, line length
/// and the final newline.
#[derive(Debug, Clone)]
pub struct StyleChecker {
    max_line_length: usize,
    trailing: Regex,
    mixed_indent: Regex,
}

impl StyleChecker {
    pub fn new() -> Self {
        Self {
            max_line_length: 100,
            trailing: Regex::new(r"[ \t]+$").expect("static regex"),
            mixed_indent: Regex::new(r"^(\t+ |\s* \t)").expect("static regex"),
        }
    }

    pub fn max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// Checks one file's text.
    pub fn check(&self, file: &FileHandle) -> TransformResult<Vec<LintFinding>> {
        let text = file.text()?;
        let mut findings = Vec::new();

        let mut finding = |line: usize, column: usize, rule: &str, message: String| {
            findings.push(LintFinding {
                file: file.path.clone(),
                line,
                column,
                rule: rule.into(),
                message,
                severity: Severity::Warning,
            })
        };

        for (i, line) in text.lines().enumerate() {
            let n = i + 1;

            if let Some(m) = self.trailing.find(line) {
                finding(n, m.start() + 1, "no-trailing-spaces", "Trailing whitespace".into());
            }

            if self.mixed_indent.is_match(line) {
                finding(n, 1, "no-mixed-indentation", "Mixed tabs and spaces".into());
            }

            let length = line.chars().count();
            if length > self.max_line_length {
                finding(
                    n,
                    self.max_line_length + 1,
                    "max-len",
                    format!("Line is {length} characters long, max is {}", self.max_line_length),
                );
            }
        }

        if !text.is_empty() && !text.ends_with('\n') {
            let lines = text.lines().count();
            finding(lines, 1, "eol-last", "Missing newline at end of file".into());
        }

        Ok(findings)
    }
}

impl Default for StyleChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for StyleChecker {
    fn apply(&self, ctx: &mut StageContext, files: FileSet) -> TransformResult<FileSet> {
        for file in &files {
            for finding in self.check(file)? {
                ctx.report(finding);
            }
        }
        Ok(files)
    }
}
