use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::client::Provider;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api: Option<ApiConfig>,
    pub sampling: Option<SamplingConfig>,
    pub run: Option<RunConfig>,
    pub paths: Option<PathsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub api_key: Option<String>,
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub max_workers: Option<usize>,
    pub sample_size: Option<usize>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    pub pdf_folder: Option<String>,
    pub questions_file: Option<String>,
    pub ris_file: Option<String>,
    pub output_folder: Option<String>,
}

/// Working-directory config file name.
pub const LOCAL_CONFIG_FILE: &str = ".litextract.toml";

/// Platform config directory path: `<config_dir>/litextract/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("litextract").join("config.toml"))
}

/// Load config by cascading CWD `.litextract.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(LOCAL_CONFIG_FILE));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

/// First of `overlay`/`base` whose section has the field set.
fn pick<S, T>(overlay: Option<&S>, base: Option<&S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay.and_then(&field).or_else(|| base.and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (ba, oa) = (base.api.as_ref(), overlay.api.as_ref());
    let (bs, os) = (base.sampling.as_ref(), overlay.sampling.as_ref());
    let (br, or) = (base.run.as_ref(), overlay.run.as_ref());
    let (bp, op) = (base.paths.as_ref(), overlay.paths.as_ref());

    ConfigFile {
        api: Some(ApiConfig {
            api_key: pick(oa, ba, |a| a.api_key.clone()),
            provider: pick(oa, ba, |a| a.provider),
            model: pick(oa, ba, |a| a.model.clone()),
            base_url: pick(oa, ba, |a| a.base_url.clone()),
            request_timeout_secs: pick(oa, ba, |a| a.request_timeout_secs),
            max_retries: pick(oa, ba, |a| a.max_retries),
        }),
        sampling: Some(SamplingConfig {
            temperature: pick(os, bs, |s| s.temperature),
            top_p: pick(os, bs, |s| s.top_p),
        }),
        run: Some(RunConfig {
            max_workers: pick(or, br, |r| r.max_workers),
            sample_size: pick(or, br, |r| r.sample_size),
            system_prompt: pick(or, br, |r| r.system_prompt.clone()),
        }),
        paths: Some(PathsConfig {
            pdf_folder: pick(op, bp, |p| p.pdf_folder.clone()),
            questions_file: pick(op, bp, |p| p.questions_file.clone()),
            ris_file: pick(op, bp, |p| p.ris_file.clone()),
            output_folder: pick(op, bp, |p| p.output_folder.clone()),
        }),
    }
}

impl ConfigFile {
    /// Overwrite the fields of `config` that this file sets.
    ///
    /// Changing the provider without naming a model switches to that
    /// provider's default model.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(api) = &self.api {
            if let Some(key) = &api.api_key {
                config.api_key = key.clone();
            }
            if let Some(provider) = api.provider
                && provider != config.provider
            {
                config.provider = provider;
                config.model = provider.default_model().to_string();
            }
            if let Some(model) = &api.model {
                config.model = model.clone();
            }
            if let Some(url) = &api.base_url {
                config.base_url = Some(url.clone());
            }
            if let Some(secs) = api.request_timeout_secs {
                config.request_timeout_secs = secs;
            }
            if let Some(n) = api.max_retries {
                config.max_retries = n;
            }
        }
        if let Some(sampling) = &self.sampling {
            if let Some(t) = sampling.temperature {
                config.temperature = t;
            }
            if let Some(p) = sampling.top_p {
                config.top_p = p;
            }
        }
        if let Some(run) = &self.run {
            if let Some(n) = run.max_workers {
                config.max_workers = n;
            }
            if let Some(n) = run.sample_size {
                config.sample_size = Some(n);
            }
            if let Some(prompt) = &run.system_prompt {
                config.system_prompt = prompt.clone();
            }
        }
    }

    /// Starter file holding the built-in defaults.
    pub fn starter() -> Self {
        let defaults = Config::default();
        ConfigFile {
            api: Some(ApiConfig {
                api_key: None,
                provider: Some(defaults.provider),
                model: Some(defaults.model),
                base_url: None,
                request_timeout_secs: Some(defaults.request_timeout_secs),
                max_retries: Some(defaults.max_retries),
            }),
            sampling: Some(SamplingConfig {
                temperature: Some(defaults.temperature),
                top_p: Some(defaults.top_p),
            }),
            run: Some(RunConfig {
                max_workers: Some(defaults.max_workers),
                sample_size: None,
                system_prompt: None,
            }),
            paths: None,
        }
    }
}

/// Save the config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    save_to_path(config, &path)?;
    Ok(path)
}

pub fn save_to_path(config: &ConfigFile, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {e}"))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {e}"))?;
    std::fs::write(path, content).map_err(|e| format!("Failed to write config: {e}"))?;
    Ok(())
}
