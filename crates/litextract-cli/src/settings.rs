//! Flag, environment and config-file resolution for the `run` and
//! `aggregate` commands. Precedence: flags > environment > config file >
//! built-in defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Args;
use litextract_core::config_file::ConfigFile;
use litextract_core::{Config, Provider, RunInputs};

/// Sample size used by `--test-mode` when neither the flag nor the config
/// file names one.
pub const DEFAULT_SAMPLE_SIZE: usize = 5;

#[derive(Args, Debug, Clone, Default)]
pub struct PathArgs {
    /// Folder searched recursively for PDFs
    #[arg(long = "pdfs", value_name = "DIR")]
    pub pdf_folder: Option<PathBuf>,

    /// Question sheet (CSV with a "Question" column)
    #[arg(short, long, value_name = "CSV")]
    pub questions: Option<PathBuf>,

    /// RIS export used to add bibliographic columns to the wide table
    #[arg(long, value_name = "FILE")]
    pub ris: Option<PathBuf>,

    /// Folder for result tables and the run log (default: the PDF folder)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ApiArgs {
    /// API key (default: $LITEXTRACT_API_KEY, then the provider's own variable)
    #[arg(long)]
    pub api_key: Option<String>,

    /// deepseek or openai
    #[arg(long)]
    pub provider: Option<Provider>,

    #[arg(long)]
    pub model: Option<String>,

    /// Chat-completions URL replacing the provider's endpoint
    #[arg(long)]
    pub base_url: Option<String>,

    /// Sampling temperature, 0.0-2.0
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Nucleus sampling, 0.1-1.0
    #[arg(long)]
    pub top_p: Option<f64>,

    /// Concurrent batches, 1-100
    #[arg(short = 'w', long)]
    pub max_workers: Option<usize>,

    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Replace the built-in system prompt
    #[arg(long)]
    pub system_prompt: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub paths: PathArgs,

    #[command(flatten)]
    pub api: ApiArgs,

    /// Process a random sample of the remaining PDFs
    #[arg(long)]
    pub test_mode: bool,

    /// Sample size for --test-mode, 1-50
    #[arg(long, requires = "test_mode")]
    pub sample_size: Option<usize>,

    /// Read at most this many pages of each PDF
    #[arg(long, value_name = "PAGES")]
    pub page_limit: Option<usize>,

    /// Run log path (default: <output>/processing_log.txt)
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Non-empty environment variable.
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn file_path(value: Option<&String>) -> Option<PathBuf> {
    value.filter(|v| !v.trim().is_empty()).map(PathBuf::from)
}

/// Work out where a run reads from and writes to.
pub fn resolve_inputs(args: &PathArgs, file: &ConfigFile) -> anyhow::Result<RunInputs> {
    let paths = file.paths.as_ref();

    let Some(pdf_folder) = args
        .pdf_folder
        .clone()
        .or_else(|| file_path(paths.and_then(|p| p.pdf_folder.as_ref())))
    else {
        bail!("No PDF folder given (use --pdfs or [paths] pdf_folder in the config file)");
    };
    if !pdf_folder.is_dir() {
        bail!("PDF folder not found: {}", pdf_folder.display());
    }

    let Some(questions_file) = args
        .questions
        .clone()
        .or_else(|| file_path(paths.and_then(|p| p.questions_file.as_ref())))
    else {
        bail!("No question sheet given (use --questions or [paths] questions_file)");
    };
    if !questions_file.is_file() {
        bail!("Questions file not found: {}", questions_file.display());
    }

    let ris_file = args
        .ris
        .clone()
        .or_else(|| file_path(paths.and_then(|p| p.ris_file.as_ref())));
    let output_folder = args
        .output
        .clone()
        .or_else(|| file_path(paths.and_then(|p| p.output_folder.as_ref())))
        .unwrap_or_else(|| pdf_folder.clone());

    Ok(RunInputs {
        pdf_folder,
        questions_file,
        ris_file,
        output_folder,
    })
}

/// Output folder for commands that only read existing results.
pub fn resolve_output_folder(flag: Option<&Path>, file: &ConfigFile) -> anyhow::Result<PathBuf> {
    let paths = file.paths.as_ref();
    flag.map(Path::to_path_buf)
        .or_else(|| file_path(paths.and_then(|p| p.output_folder.as_ref())))
        .or_else(|| file_path(paths.and_then(|p| p.pdf_folder.as_ref())))
        .context("No output folder given (use --output or [paths] output_folder)")
}

fn switch_provider(config: &mut Config, provider: Provider) {
    if config.provider != provider {
        config.provider = provider;
        config.model = provider.default_model().to_string();
    }
}

/// Build the run configuration. `env` looks up environment variables.
pub fn resolve_config(
    args: &RunArgs,
    file: &ConfigFile,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Config> {
    let mut config = Config::default();
    file.apply_to(&mut config);
    // A sample size in the config file only sets the --test-mode default.
    let file_sample = config.sample_size.take();

    if let Some(name) = env("LITEXTRACT_PROVIDER") {
        let provider = name
            .parse::<Provider>()
            .map_err(anyhow::Error::msg)
            .context("LITEXTRACT_PROVIDER")?;
        switch_provider(&mut config, provider);
    }
    if let Some(model) = env("LITEXTRACT_MODEL") {
        config.model = model;
    }
    if let Some(n) = env("LITEXTRACT_MAX_WORKERS") {
        config.max_workers = n
            .trim()
            .parse()
            .with_context(|| format!("LITEXTRACT_MAX_WORKERS is not a number: {n}"))?;
    }

    let api = &args.api;
    if let Some(provider) = api.provider {
        switch_provider(&mut config, provider);
    }
    if let Some(key) = api
        .api_key
        .clone()
        .or_else(|| env("LITEXTRACT_API_KEY"))
        .or_else(|| env(config.provider.api_key_env()))
    {
        config.api_key = key;
    }
    if let Some(model) = &api.model {
        config.model = model.clone();
    }
    if let Some(url) = &api.base_url {
        config.base_url = Some(url.clone());
    }
    if let Some(t) = api.temperature {
        config.temperature = t;
    }
    if let Some(p) = api.top_p {
        config.top_p = p;
    }
    if let Some(n) = api.max_workers {
        config.max_workers = n;
    }
    if let Some(n) = api.max_retries {
        config.max_retries = n;
    }
    if let Some(secs) = api.timeout {
        config.request_timeout_secs = secs;
    }
    if let Some(prompt) = &api.system_prompt {
        config.system_prompt = prompt.clone();
    }

    config.sample_size = args
        .test_mode
        .then(|| args.sample_size.or(file_sample).unwrap_or(DEFAULT_SAMPLE_SIZE));

    if config.api_key.trim().is_empty() {
        bail!(
            "No API key: pass --api-key or set LITEXTRACT_API_KEY or {}",
            config.provider.api_key_env()
        );
    }
    config.validate()?;
    Ok(config)
}
