//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tessella_core::{BuildContext, BuildOptions, BuildSummary, ProgressReporter, run_build};
use tessella_plugins::PluginRegistry;
use tessella_shared::{init_config, load_config, load_config_from};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Tessella — build a static IIIF site from configured content stores.
#[derive(Parser)]
#[command(
    name = "tessella",
    version,
    about = "Build a static, cacheable IIIF site from local and remote content stores.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the build pipeline over every configured store.
    Build {
        /// Config file path (defaults to ./tessella.toml).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Ignore cached state and rebuild everything.
        #[arg(long)]
        no_cache: bool,

        /// Build a single resource, by slug or source path.
        #[arg(long)]
        exact: Option<String>,

        /// Build only the named stores (comma-separated).
        #[arg(long, value_delimiter = ',')]
        stores: Vec<String>,

        /// Output directory override.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Write a default tessella.toml into the current directory.
    Init,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

pub(crate) fn init_tracing(cli: &Cli) {
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let directives = [
        "tessella_cli",
        "tessella_core",
        "tessella_stores",
        "tessella_plugins",
        "tessella_cache",
        "tessella_slugs",
        "tessella_shared",
    ]
    .map(|krate| format!("{krate}={level}"))
    .join(",");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{directives}")));

    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

// ---------------------------------------------------------------------------
// Command routing
// ---------------------------------------------------------------------------

pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build {
            config,
            no_cache,
            exact,
            stores,
            out,
        } => build(config, no_cache, exact, stores, out).await,
        Command::Init => init(),
    }
}

async fn build(
    config_path: Option<PathBuf>,
    no_cache: bool,
    exact: Option<String>,
    stores: Vec<String>,
    out: Option<PathBuf>,
) -> Result<()> {
    let config = match &config_path {
        Some(path) => load_config_from(path)?,
        None => load_config(&std::env::current_dir()?)?,
    };

    let registry = PluginRegistry::with_builtins();
    let options = BuildOptions {
        cache: !no_cache,
        exact,
        stores,
        out,
    };

    let ctx = BuildContext::new(config, registry, options)?;
    let progress = CliProgress::default();
    let summary = run_build(&ctx, &progress).await?;

    println!(
        "Built {} resources ({} cached, {} rebuilt) in {:.2}s",
        summary.resources,
        summary.cached,
        summary.rebuilt,
        summary.elapsed.as_secs_f64(),
    );
    Ok(())
}

fn init() -> Result<()> {
    let path = init_config(&std::env::current_dir()?)?;
    println!("Created {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Progress display
// ---------------------------------------------------------------------------

/// Renders Load progress as a bar and stage transitions as messages.
#[derive(Default)]
struct CliProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliProgress {
    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock()
            && let Some(bar) = guard.take()
        {
            bar.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, name: &str) {
        self.finish_bar();
        info!("{name}");
        eprintln!("• {name}");
    }

    fn resource(&self, slug: &str, current: usize, total: usize) {
        let Ok(mut guard) = self.bar.lock() else {
            return;
        };
        let bar = guard.get_or_insert_with(|| {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template("  {bar:40.cyan/blue} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        });
        bar.set_position(current as u64);
        bar.set_message(slug.to_string());
    }

    fn done(&self, summary: &BuildSummary) {
        self.finish_bar();
        info!(
            resources = summary.resources,
            elapsed_ms = summary.elapsed.as_millis(),
            "pipeline finished"
        );
    }
}
