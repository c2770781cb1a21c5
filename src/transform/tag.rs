use anyhow::Context;
use regex::Regex;

use crate::fileset::{FileHandle, FileSet};
use crate::stage::{StageContext, Transform, TransformResult};

/// Compiles an inlined component document into a `riot.tag2(...)` module.
///
/// The root element names the tag, its attributes become the tag
/// attributes, and the `<style>` and `<script>` elements found inside are
/// lifted out into the css and constructor arguments. A document without a
/// single root element is treated as the markup of a tag named after the
/// file.
#[derive(Debug, Clone)]
pub struct TagCompiler {
    compact: bool,
    root: Regex,
    style: Regex,
    script: Regex,
    between: Regex,
    space: Regex,
}

/// The parts a tag module is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagParts {
    pub name: String,
    pub markup: String,
    pub css: String,
    pub attrs: String,
    pub script: String,
}

impl TagCompiler {
    pub fn new() -> Self {
        Self {
            compact: true,
            root: Regex::new(r"(?s)^\s*(?:<!--.*?-->\s*)*<([a-zA-Z][a-zA-Z0-9-]*)([^>]*)>")
                .expect("static regex"),
            style: Regex::new(r"(?is)<style\b[^>]*>(.*?)</style>").expect("static regex"),
            script: Regex::new(r"(?is)<script\b[^>]*>(.*?)</script>").expect("static regex"),
            between: Regex::new(r">\s+<").expect("static regex"),
            space: Regex::new(r"\s+").expect("static regex"),
        }
    }

    /// Collapse the whitespace of the markup.
    pub fn compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    /// Splits a document into the parts of a tag.
    pub fn parts(&self, file: &FileHandle) -> TransformResult<TagParts> {
        let text = file.text()?;

        let (name, attrs, body) = match self.root_element(text) {
            Some(root) => root,
            None => (file.stem().to_string(), String::new(), text.to_string()),
        };

        let css = collect(&self.style, &body);
        let script = collect(&self.script, &body);

        let markup = self.script.replace_all(&body, "");
        let markup = self.style.replace_all(&markup, "");
        let markup = if self.compact {
            let markup = self.between.replace_all(markup.trim(), "><");
            self.space.replace_all(&markup, " ").into_owned()
        } else {
            markup.trim().to_string()
        };

        Ok(TagParts {
            name,
            markup,
            css: self.space.replace_all(css.trim(), " ").into_owned(),
            attrs,
            script: script.trim().to_string(),
        })
    }

    /// Name, attributes and inner content of the single root element.
    fn root_element(&self, text: &str) -> Option<(String, String, String)> {
        let caps = self.root.captures(text)?;
        let open = caps.get(0)?;
        let name = caps[1].to_string();

        // the regex crate has no backreferences, so look for the closing tag
        // by hand and make sure nothing but whitespace follows it
        let close = format!("</{name}>");
        let end = text.rfind(&close)?;
        if end < open.end() || !text[end + close.len()..].trim().is_empty() {
            return None;
        }

        let attrs = caps[2].trim().trim_end_matches('/').trim_end().to_string();
        let body = text[open.end()..end].to_string();

        Some((name, attrs, body))
    }

    fn compile(&self, file: &FileHandle) -> TransformResult<String> {
        let parts = self
            .parts(file)
            .with_context(|| format!("couldn't compile tag {}", file.path))?;

        let quote = |s: &str| serde_json::to_string(s);

        Ok(format!(
            "riot.tag2({}, {}, {}, {}, function(opts) {{\n{}\n}});\n",
            quote(&parts.name)?,
            quote(&parts.markup)?,
            quote(&parts.css)?,
            quote(&parts.attrs)?,
            parts.script,
        ))
    }
}

impl Default for TagCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for TagCompiler {
    fn apply(&self, _: &mut StageContext, files: FileSet) -> TransformResult<FileSet> {
        files.try_map(|file| {
            let module = self.compile(&file)?;
            Ok(file.with_contents(module).with_extension("js"))
        })
    }
}

fn collect(re: &Regex, text: &str) -> String {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
