use anyhow::Context;
use minijinja::{Environment, context};

use crate::fileset::FileSet;
use crate::stage::{StageContext, Transform, TransformResult};

/// Renders `.template` files into HTML.
///
/// Templates are rendered with `minijinja`; the context holds `name` (the
/// file stem, which is also the tag name) and `live_reload`, the reload
/// client snippet while serving and an empty string otherwise.
#[derive(Debug, Clone, Default)]
pub struct TemplateCompiler {
    inject_reload: bool,
}

impl TemplateCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the live-reload client before `</body>` when serving.
    pub fn inject_reload(mut self, inject: bool) -> Self {
        self.inject_reload = inject;
        self
    }
}

impl Transform for TemplateCompiler {
    fn apply(&self, ctx: &mut StageContext, files: FileSet) -> TransformResult<FileSet> {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);

        let reload = ctx.env.get_refresh_script();

        files.try_map(|file| {
            let source = file.text()?;
            let mut html = env
                .render_str(
                    source,
                    context! {
                        name => file.stem(),
                        live_reload => reload.as_deref().unwrap_or_default(),
                    },
                )
                .with_context(|| format!("couldn't render {}", file.path))?;

            if self.inject_reload
                && let Some(script) = &reload
            {
                html = inject_before_body_end(&html, &format!("<script>{script}</script>"));
            }

            Ok(file.with_contents(html).with_extension("html"))
        })
    }
}

fn inject_before_body_end(html: &str, snippet: &str) -> String {
    match html.rfind("</body>") {
        Some(at) => format!("{}{snippet}\n{}", &html[..at], &html[at..]),
        None => format!("{html}{snippet}\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileset::FileHandle;
    use crate::{Environment as Env, Mode};

    fn set(path: &str, source: &str) -> FileSet {
        [FileHandle::new(path, "/p/src", source)].into_iter().collect()
    }

    #[test]
    fn renders_with_component_name() {
        let mut ctx = StageContext::new("build:html", Env::build());
        let out = TemplateCompiler::new()
            .apply(
                &mut ctx,
                set("/p/src/widget.template", "<{{ name }}><p>hi</p></{{ name }}>\n"),
            )
            .unwrap();

        let file = out.iter().next().unwrap();
        assert_eq!(file.path.as_str(), "/p/src/widget.html");
        assert_eq!(file.text().unwrap(), "<widget><p>hi</p></widget>\n");
    }

    #[test]
    fn template_errors_fail_the_transform() {
        let mut ctx = StageContext::new("build:html", Env::build());
        let err = TemplateCompiler::new()
            .apply(&mut ctx, set("/p/src/widget.template", "{% if %}"))
            .unwrap_err();
        assert!(err.to_string().contains("widget.template"));
    }

    #[test]
    fn injects_reload_client_while_serving() {
        let env = Env {
            mode: Mode::Watch,
            port: Some(4000),
            strict: false,
        };
        let mut ctx = StageContext::new("build:demo", env);
        let out = TemplateCompiler::new()
            .inject_reload(true)
            .apply(
                &mut ctx,
                set("/p/src/demo.template", "<html><body><widget></widget></body></html>"),
            )
            .unwrap();

        let html = out.iter().next().unwrap().text().unwrap().to_string();
        let script = html.find("ws://localhost:4000").unwrap();
        assert!(script < html.find("</body>").unwrap());
    }

    #[test]
    fn no_injection_in_build_mode() {
        let mut ctx = StageContext::new("build:demo", Env::build());
        let out = TemplateCompiler::new()
            .inject_reload(true)
            .apply(&mut ctx, set("/p/src/demo.template", "<body></body>"))
            .unwrap();
        assert_eq!(out.iter().next().unwrap().text().unwrap(), "<body></body>");
    }
}
