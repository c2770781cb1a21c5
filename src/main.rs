use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use camino::Utf8PathBuf;
use clap::Parser;
use console::style;
use tagpack::pipeline::{self, Layout, Toolchain};
use tagpack::server::ServeConfig;
use tagpack::{Environment, RunReport};
use tracing::{debug, info, warn};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
struct Args {
    /// Task to run, e.g. `build`, `serve` or `lint`.
    #[clap(index = 1, default_value = "default")]
    task: String,

    /// Project directory holding `src/`, `test/` and friends.
    #[clap(long, default_value = ".")]
    root: Utf8PathBuf,

    /// HTTP port of the development server.
    #[clap(long)]
    port: Option<u16>,

    /// Fail a lint stage on error-level findings.
    #[clap(long)]
    strict: bool,

    /// Print the task graph as a Mermaid diagram and exit.
    #[clap(long)]
    graph: bool,

    /// Log debug output.
    #[clap(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .try_init()
        .context("couldn't install the logger")
}

fn summary(report: &RunReport, start: Instant) {
    let findings = report.findings().count();
    if findings > 0 {
        warn!("{findings} lint finding(s)");
    }

    debug!(phases = ?report.phases(), "run finished");
    info!(
        "{} file(s) written, {} path(s) cleaned {}",
        report.written().count(),
        report.cleaned.len(),
        style(format!("(+{}ms)", start.elapsed().as_millis())).blue()
    );
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let root = args
        .root
        .canonicalize_utf8()
        .with_context(|| format!("couldn't open project directory {}", args.root))?;
    let layout = Layout::new(root);

    let mut serve = ServeConfig::new(&layout);
    if let Some(port) = args.port {
        serve = serve.port(port);
    }

    let graph = Arc::new(pipeline::task_graph(&layout, Toolchain::native(), serve)?);

    if args.graph {
        println!("{graph}");
        return Ok(());
    }

    if graph.get(&args.task).is_none() {
        let known: Vec<_> = graph.names().collect();
        bail!("Unknown task '{}'. Known tasks: {}", args.task, known.join(", "));
    }

    eprintln!(
        "{} {} {} in {}",
        style("tagpack").bold().cyan(),
        style(env!("CARGO_PKG_VERSION")).dim(),
        style(&args.task).yellow(),
        layout.root
    );

    let env = Environment::build().strict(args.strict);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let start = Instant::now();
    match runtime.block_on(graph.run_task(&args.task, &env)) {
        Ok(report) => {
            summary(&report, start);
            Ok(())
        }
        Err(aborted) => {
            debug!(phases = ?aborted.report.phases(), "run aborted");
            Err(aborted.error.into())
        }
    }
}
