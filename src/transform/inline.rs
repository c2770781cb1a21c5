use anyhow::bail;
use camino::Utf8PathBuf;
use regex::{Captures, Regex};

use crate::fileset::{FileHandle, FileSet};
use crate::stage::{StageContext, Transform, TransformResult};
use crate::transform::script::strip_map_comment;
use crate::utils::normalize_path;

/// Embeds local stylesheets and scripts into the HTML that references them.
///
/// The inputs are the HTML documents together with the assets they point
/// to; only the HTML comes out. `<link rel="stylesheet" href>` becomes a
/// `<style>` element and `<script src></script>` an inline `<script>`.
/// Remote and `data:` URLs are left alone, while a local reference with no
/// matching input is an error.
#[derive(Debug, Clone)]
pub struct Inliner {
    link: Regex,
    script: Regex,
    attr: Regex,
}

impl Inliner {
    pub fn new() -> Self {
        Self {
            link: Regex::new(r"(?is)<link\b[^>]*>").expect("static regex"),
            script: Regex::new(r"(?is)<script\b([^>]*)>\s*</script>").expect("static regex"),
            attr: Regex::new(r#"(?i)([a-z][a-z0-9-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
                .expect("static regex"),
        }
    }

    fn attribute<'t>(&self, tag: &'t str, name: &str) -> Option<&'t str> {
        self.attr.captures_iter(tag).find_map(|c| {
            if !c[1].eq_ignore_ascii_case(name) {
                return None;
            }
            c.get(2).or(c.get(3)).or(c.get(4)).map(|m| m.as_str())
        })
    }

    fn inline(&self, html: &FileHandle, assets: &FileSet) -> TransformResult<String> {
        let text = html.text()?;

        let text = replace_all(&self.link, text, |caps| {
            let tag = &caps[0];
            let stylesheet = self
                .attribute(tag, "rel")
                .is_some_and(|rel| rel.eq_ignore_ascii_case("stylesheet"));
            let Some(href) = self.attribute(tag, "href").filter(|_| stylesheet) else {
                return Ok(None);
            };
            let Some(css) = lookup(html, assets, href)? else {
                return Ok(None);
            };

            Ok(Some(format!("<style>{}</style>", css.text()?.trim())))
        })?;

        replace_all(&self.script, &text, |caps| {
            let Some(src) = self.attribute(&caps[1], "src") else {
                return Ok(None);
            };
            let Some(js) = lookup(html, assets, src)? else {
                return Ok(None);
            };

            let code = strip_map_comment(js.text()?).replace("</script", "<\\/script");
            Ok(Some(format!("<script>{code}</script>")))
        })
    }
}

impl Default for Inliner {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Inliner {
    fn apply(&self, _: &mut StageContext, files: FileSet) -> TransformResult<FileSet> {
        let mut out = FileSet::new();

        for file in files.iter().filter(|file| is_html(file)) {
            let html = self.inline(file, &files)?;
            out.push(file.clone().with_contents(html));
        }

        Ok(out)
    }
}

fn is_html(file: &FileHandle) -> bool {
    file.path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html"))
}

/// The input a local reference points to. Remote references yield `None`.
fn lookup<'a>(
    html: &FileHandle,
    assets: &'a FileSet,
    url: &str,
) -> TransformResult<Option<&'a FileHandle>> {
    let Some(path) = local_path(html, url) else {
        return Ok(None);
    };
    match assets.get(&path) {
        Some(file) => Ok(Some(file)),
        None => bail!("{}: '{url}' is not among the inputs ({path})", html.path),
    }
}

/// Full path of a local reference, resolved against the document directory.
fn local_path(html: &FileHandle, url: &str) -> Option<Utf8PathBuf> {
    let remote = ["http:", "https:", "data:", "//"];
    if remote.iter().any(|prefix| url.starts_with(prefix)) {
        return None;
    }

    let url = url.split(['?', '#']).next().unwrap_or(url);
    let dir = html.path.parent().unwrap_or(&html.base);
    Some(normalize_path(&dir.join(url)))
}

/// Like [`Regex::replace_all`], with a fallible replacer that may keep a
/// match as it is by returning `None`.
fn replace_all<F>(re: &Regex, text: &str, mut f: F) -> TransformResult<String>
where
    F: FnMut(&Captures) -> TransformResult<Option<String>>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in re.captures_iter(text) {
        let Some(m) = caps.get(0) else { continue };
        out.push_str(&text[last..m.start()]);
        match f(&caps)? {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(m.as_str()),
        }
        last = m.end();
    }

    out.push_str(&text[last..]);
    Ok(out)
}
