use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use image_harvest::app::{Pipeline, ProgressSink};
use image_harvest::config::{ConfigLoader, RunOverrides};
use image_harvest::error::{EXIT_INTERRUPTED, exit_code};
use image_harvest::http::HttpFetcher;
use image_harvest::output::{JsonOutput, OutputMode, render_report, render_run};
use image_harvest::paths::ArtifactLayout;
use image_harvest::progress::{BarProgress, QuietProgress};
use image_harvest::report::TOP_ERRORS;
use image_harvest::source::SourceStore;
use image_harvest::tracker::Tracker;
use image_harvest::worker::FetchWorker;

#[derive(Parser)]
#[command(name = "image-harvest")]
#[command(about = "Download scraped image variants into a local folder, resumably")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download every item not yet marked downloaded")]
    Run(RunArgs),
    #[command(about = "Print the cumulative tracker summary without downloading")]
    Report(SourceArgs),
}

#[derive(Args, Clone)]
struct SourceArgs {
    /// Named source from the config file, or a built-in one (`yandex`, `vk`).
    preset: Option<String>,

    /// Source SQLite database with an `image_variants` table.
    #[arg(long)]
    database: Option<Utf8PathBuf>,

    /// Destination directory for images and sidecars.
    #[arg(long)]
    dest: Option<Utf8PathBuf>,

    /// Tracker database (default: <dest>/tracker.db).
    #[arg(long)]
    tracker: Option<Utf8PathBuf>,

    #[arg(long)]
    config: Option<Utf8PathBuf>,

    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Maximum number of downloads in flight.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Extra attempts per item after the first one.
    #[arg(long)]
    retries: Option<u32>,

    /// Try `origin_url` before `url`.
    #[arg(long)]
    prefer_origin: bool,

    #[arg(long)]
    no_progress: bool,
}

enum Completion {
    Done,
    Interrupted,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(Completion::Done) => ExitCode::SUCCESS,
        Ok(Completion::Interrupted) => {
            eprintln!("\nDownload interrupted by user.");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(report) => {
            eprintln!("{report:?}");
            ExitCode::from(exit_code(&report))
        }
    }
}

async fn run(cli: Cli) -> miette::Result<Completion> {
    match cli.command {
        Commands::Run(args) => run_download(args).await,
        Commands::Report(args) => run_report(args),
    }
}

fn overrides(source: &SourceArgs) -> RunOverrides {
    RunOverrides {
        preset: source.preset.clone(),
        database: source.database.clone(),
        destination: source.dest.clone(),
        tracker: source.tracker.clone(),
        ..RunOverrides::default()
    }
}

fn output_mode(source: &SourceArgs) -> OutputMode {
    if source.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    }
}

async fn run_download(args: RunArgs) -> miette::Result<Completion> {
    let config = ConfigLoader::load(args.source.config.as_deref())?;
    let overrides = RunOverrides {
        concurrency: args.concurrency,
        retries: args.retries,
        prefer_origin: args.prefer_origin,
        no_progress: args.no_progress,
        ..overrides(&args.source)
    };
    let settings = ConfigLoader::resolve(&config, &overrides)?;
    let mode = output_mode(&args.source);

    let items = {
        let source = SourceStore::open(&settings.database)?;
        source.load_items()?
    };

    let layout = ArtifactLayout::new(settings.destination.clone());
    layout.ensure_root()?;
    let tracker = Tracker::open(&settings.tracker)?;
    let fetcher = HttpFetcher::new(&settings.http)?;
    let worker = FetchWorker::new(fetcher, layout, settings.retry.clone(), settings.prefer_origin);
    let pipeline = Pipeline::new(tracker, worker, settings.concurrency);

    if mode == OutputMode::Text {
        println!(
            "Downloading from {} into {} (tracker {}, concurrency {})",
            settings.database, settings.destination, settings.tracker, settings.concurrency
        );
    }

    let sink: Box<dyn ProgressSink> = match (mode, settings.progress) {
        (OutputMode::Json, _) => Box::new(JsonOutput),
        (OutputMode::Text, true) => Box::new(BarProgress::new()),
        (OutputMode::Text, false) => Box::new(QuietProgress),
    };

    let summary = tokio::select! {
        result = pipeline.run(&items, sink.as_ref()) => result?,
        _ = interrupted() => return Ok(Completion::Interrupted),
    };

    match mode {
        OutputMode::Json => JsonOutput::print_run(&summary).into_diagnostic()?,
        OutputMode::Text => print!("{}", render_run(&summary)),
    }
    Ok(Completion::Done)
}

fn run_report(args: SourceArgs) -> miette::Result<Completion> {
    let config = ConfigLoader::load(args.config.as_deref())?;
    let tracker_path = ConfigLoader::resolve_tracker(&config, &overrides(&args))?;
    let tracker = Tracker::open(&tracker_path)?;
    tracker.initialize()?;
    let report = tracker.report(TOP_ERRORS)?;

    match output_mode(&args) {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Text => print!("{}", render_report(&report)),
    }
    Ok(Completion::Done)
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
