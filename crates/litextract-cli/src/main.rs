use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use litextract_core::aggregate::aggregate_file;
use litextract_core::config_file::{self, ConfigFile, LOCAL_CONFIG_FILE};
use litextract_core::pipeline::load_bib_index;
use litextract_core::{HttpClient, OutputPaths, ProgressEvent, Provider, RunContext, run_pipeline};
use litextract_pdf_mupdf::MupdfBackend;
use tokio_util::sync::CancellationToken;

mod output;
mod run_log;
mod settings;

use output::ColorMode;
use run_log::RunLog;
use settings::RunArgs;

/// Batch-extract answers to a question sheet from a folder of PDFs with a
/// chat-completion model
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Show routine progress lines and debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask every question of every PDF and write the long and wide tables
    Run(Box<RunArgs>),

    /// Rebuild the wide table from an existing long table
    Aggregate(AggregateArgs),

    /// List the known providers and their models
    Models {
        /// Only this provider
        #[arg(long)]
        provider: Option<Provider>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Show the merged config file, or write a starter one
    Config {
        /// Write a starter config to the platform config directory
        #[arg(long)]
        init: bool,

        /// Overwrite an existing config with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct AggregateArgs {
    /// Folder holding Results_Long.csv
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// RIS export used to add bibliographic columns
    #[arg(long, value_name = "FILE")]
    ris: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.verbose)?;

    match cli.command {
        Command::Run(args) => run(*args, cli.verbose).await,
        Command::Aggregate(args) => aggregate(args),
        Command::Models { provider, no_color } => {
            let providers = provider.map_or_else(|| Provider::ALL.to_vec(), |p| vec![p]);
            output::print_models(&mut std::io::stdout(), &providers, ColorMode(!no_color))?;
            Ok(())
        }
        Command::Config { init, force } => show_config(init, force),
    }
}

/// Tracing goes to stderr through a non-blocking writer so worker tasks never
/// wait on the terminal. The returned guard flushes it on drop.
fn init_tracing(verbose: bool) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let default = if verbose {
        "warn,litextract=debug,litextract_core=debug,litextract_ris=debug"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("LITEXTRACT_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(guard)
}

async fn run(args: RunArgs, verbose: bool) -> anyhow::Result<()> {
    let file = config_file::load_config();
    let inputs = settings::resolve_inputs(&args.paths, &file)?;
    let config = settings::resolve_config(&args, &file, settings::env_var)?;
    let color = ColorMode(!args.no_color);

    std::fs::create_dir_all(&inputs.output_folder).with_context(|| {
        format!(
            "cannot create output folder {}",
            inputs.output_folder.display()
        )
    })?;
    let mut paths = OutputPaths::in_folder(&inputs.output_folder);
    if let Some(log_file) = &args.log_file {
        paths.log = log_file.clone();
    }
    let run_log = Arc::new(
        RunLog::open(&paths.log)
            .with_context(|| format!("cannot open run log {}", paths.log.display()))?,
    );

    let mut stdout = std::io::stdout();
    output::print_run_header(&mut stdout, &inputs, &config, color)?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.green/dim}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let observer = {
        let bar = bar.clone();
        let run_log = Arc::clone(&run_log);
        move |event: ProgressEvent| match event {
            ProgressEvent::Log { message, important } => {
                run_log.append(&message);
                if important || verbose {
                    bar.println(output::format_log_line(&message, color));
                }
            }
            ProgressEvent::Progress { completed, total } => {
                bar.set_length(total as u64);
                bar.set_position(completed as u64);
            }
            ProgressEvent::Status(status) => bar.set_message(status),
        }
    };

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone(), bar.clone());
    let ctx = Arc::new(RunContext::new(Arc::new(observer), cancel));

    let client = Arc::new(HttpClient::new(&config)?);
    let backend = Arc::new(MupdfBackend::new().with_page_limit(args.page_limit.unwrap_or(0)));

    let result = run_pipeline(&inputs, &config, client, backend, ctx).await;
    bar.finish_and_clear();
    let report = result?;

    output::print_summary(&mut stdout, &report, &paths, color)?;
    stdout.flush()?;
    Ok(())
}

/// First Ctrl+C: stop starting new documents and let in-flight ones finish.
/// Second Ctrl+C: exit immediately.
fn spawn_interrupt_handler(cancel: CancellationToken, bar: ProgressBar) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        bar.println("Stopping: waiting for in-flight requests (Ctrl+C again to quit now)...");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            bar.abandon();
            std::process::exit(130);
        }
    });
}

fn aggregate(args: AggregateArgs) -> anyhow::Result<()> {
    let file = config_file::load_config();
    let folder = settings::resolve_output_folder(args.output.as_deref(), &file)?;
    let ris = args.ris.or_else(|| {
        file.paths
            .as_ref()
            .and_then(|p| p.ris_file.clone())
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
    });
    let color = ColorMode(!args.no_color);

    let paths = OutputPaths::in_folder(&folder);
    if !paths.long.exists() {
        anyhow::bail!(
            "No long-format results at {} (run `litextract run` first)",
            paths.long.display()
        );
    }
    if paths.temp.exists() {
        tracing::warn!(
            temp = %paths.temp.display(),
            "an unfinished run left results that are not in the long table yet"
        );
    }

    let ctx = RunContext::new(
        Arc::new(move |event: ProgressEvent| {
            if let ProgressEvent::Log { message, .. } = event {
                println!("{}", output::format_log_line(&message, color));
            }
        }),
        CancellationToken::new(),
    );
    let index = load_bib_index(ris.as_deref(), &ctx);
    let summary = aggregate_file(&paths.long, &paths.wide, &index, &ctx)?;

    output::print_aggregate_summary(&mut std::io::stdout(), &summary, &paths, color)?;
    Ok(())
}

fn show_config(init: bool, force: bool) -> anyhow::Result<()> {
    let platform = config_file::config_path();
    let describe = |path: &std::path::Path| {
        if path.exists() { "found" } else { "not found" }
    };

    match &platform {
        Some(path) => println!("Platform config: {} ({})", path.display(), describe(path)),
        None => println!("Platform config: (no config directory on this system)"),
    }
    let local = std::path::Path::new(LOCAL_CONFIG_FILE);
    println!("Local override:  {} ({})", local.display(), describe(local));

    if init {
        let path = platform.context("Could not determine config directory")?;
        if path.exists() && !force {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                path.display()
            );
        }
        let written = config_file::save_config(&ConfigFile::starter()).map_err(anyhow::Error::msg)?;
        println!("Wrote starter config to {}", written.display());
        return Ok(());
    }

    let mut merged = config_file::load_config();
    if let Some(api) = merged.api.as_mut()
        && api.api_key.is_some()
    {
        api.api_key = Some("***".into());
    }
    println!();
    print!("{}", toml::to_string_pretty(&merged)?);
    Ok(())
}
