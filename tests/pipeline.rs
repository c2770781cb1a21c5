//! End-to-end runs of the packaging workflow on a fixture project.

mod common;

use std::fs;

use common::Project;
use tagpack::pipeline::Phase;
use tagpack::{Environment, Plan, RunReport, TraceKind};

async fn build(project: &Project) -> RunReport {
    project
        .graph()
        .run_task("build", &Environment::build())
        .await
        .unwrap()
}

#[tokio::test]
async fn build_packages_the_component() {
    let project = Project::new();
    let report = build(&project).await;

    let module = project.read("dist/widget.js");
    assert!(module.starts_with(r#"riot.tag2("widget", "<h1>{ opts.title }</h1>", "widget h1{color:red}""#));
    assert!(module.contains("this.title = opts.title;"));

    let minified = project.read("dist/widget.min.js");
    assert!(minified.starts_with("riot.tag2("));
    assert!(minified.ends_with("//# sourceMappingURL=../maps/widget.min.js.map\n"));

    assert!(project.exists("maps/widget.js.map"));
    assert!(project.exists("maps/widget.min.js.map"));
    assert!(!project.exists(".tmp"));
    assert!(!project.exists("demo/index.html"));

    assert_eq!(
        report.phases(),
        [
            Phase::Idle,
            Phase::Linting,
            Phase::PreBuildClean,
            Phase::Compiling,
            Phase::Inline,
            Phase::IntermediateClean,
            Phase::CompileTag,
            Phase::Minify,
            Phase::FinalClean,
            Phase::Done,
        ]
    );
}

#[tokio::test]
async fn inline_waits_for_every_compile_stage() {
    let project = Project::new();
    let report = build(&project).await;

    let inline = report.position("inline", TraceKind::Started).unwrap();
    for stage in ["build:html", "build:css", "build:js"] {
        assert!(report.position(stage, TraceKind::Finished).unwrap() < inline);
    }

    let clean = report.position("clean:prep", TraceKind::Started).unwrap();
    for stage in ["lint", "lint:tests", "style-check"] {
        assert!(report.position(stage, TraceKind::Finished).unwrap() < clean);
    }
}

#[tokio::test]
async fn style_failure_halts_before_the_tag() {
    let project = Project::new();
    project.write("src/widget.style", "!!! { color: red }\n");

    let aborted = project
        .graph()
        .run_task("build", &Environment::build())
        .await
        .unwrap_err();

    assert_eq!(aborted.error.task(), Some("build:css"));
    assert!(aborted.error.to_string().starts_with("Task 'build:css' failed."));
    assert!(!aborted.report.ran("inline"));
    assert!(!aborted.report.ran("build:tag"));
    assert!(!project.exists("dist/widget.js"));
    assert_eq!(aborted.report.phases().last(), Some(&Phase::Aborted));
}

#[tokio::test]
async fn repeated_builds_are_identical() {
    let project = Project::new();

    let hashes = |report: &RunReport| {
        let mut hashes: Vec<_> = report
            .written()
            .map(|artifact| (artifact.path.clone(), artifact.hash.to_hex()))
            .collect();
        hashes.sort();
        hashes
    };

    let first = hashes(&build(&project).await);
    let second = hashes(&build(&project).await);

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[tokio::test]
async fn inlined_html_only_references_its_inputs() {
    let project = Project::new();
    let graph = project.graph();

    let plan = Plan::new()
        .parallel(["build:html", "build:css", "build:js"])
        .then("inline");
    graph.run(&plan, &Environment::build()).await.unwrap();

    let html = project.read(".tmp/widget.html");
    assert!(html.contains("<style>widget h1{color:red}</style>"));
    assert!(html.contains("<script>this.title = opts.title;</script>"));
    assert!(!html.contains("href="));
    assert!(!html.contains("src="));
}

#[tokio::test]
async fn unresolved_asset_fails_the_inline_stage() {
    let project = Project::new();
    project.write(
        "src/widget.template",
        r#"<widget><link rel="stylesheet" href="theme.css"></widget>"#,
    );

    let aborted = project
        .graph()
        .run_task("build", &Environment::build())
        .await
        .unwrap_err();

    assert_eq!(aborted.error.task(), Some("inline"));
    assert!(!project.exists("dist/widget.js"));
}

#[tokio::test]
async fn missing_template_fails_on_required_input() {
    let project = Project::new();
    fs::remove_file(project.layout.src.join("widget.template")).unwrap();

    let aborted = project
        .graph()
        .run_task("build", &Environment::build())
        .await
        .unwrap_err();

    assert_eq!(aborted.error.task(), Some("build:tag"));
    assert!(aborted.error.to_string().contains("No files matched required input"));
}

#[tokio::test]
async fn demo_is_rendered_to_index() {
    let project = Project::new();
    project
        .graph()
        .run_task("build:demo", &Environment::build())
        .await
        .unwrap();

    assert_eq!(
        project.read("demo/index.html"),
        "<html><body><widget></widget></body></html>\n"
    );
}

#[tokio::test]
async fn clean_prep_removes_outputs() {
    let project = Project::new();
    for dir in ["dist", ".tmp", "maps"] {
        fs::create_dir_all(project.layout.root.join(dir)).unwrap();
        project.write(&format!("{dir}/stale.js"), "old");
    }

    let report = project
        .graph()
        .run_task("clean:prep", &Environment::build())
        .await
        .unwrap();

    assert_eq!(report.cleaned.len(), 3);
    assert!(!project.exists("dist"));
    assert!(!project.exists(".tmp"));
    assert!(!project.exists("maps"));
    assert!(project.exists("src/widget.script"));
}

#[tokio::test]
async fn root_with_glob_metacharacters_is_taken_literally() {
    let project = Project::named("widget[v2]");
    build(&project).await;

    assert!(project.read("dist/widget.js").starts_with(r#"riot.tag2("widget""#));
    assert!(project.exists("dist/widget.min.js"));
    assert!(!project.exists(".tmp"));

    project.write(".tmp/stale.js", "old");
    let report = project
        .graph()
        .run_task("clean:prep", &Environment::build())
        .await
        .unwrap();

    assert_eq!(report.cleaned.len(), 3);
    assert!(!project.exists("dist"));
    assert!(!project.exists("maps"));
}
