use std::path::PathBuf;

use anyhow::{Context, Result};
use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const ENV_PREFIX: &str = "GREETER";
const CONFIG_FILE: &str = "greeter";

/// Runtime settings. Defaults, then `greeter.toml`, then `GREETER_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub input_path: PathBuf,
    pub input_column: String,
    pub ledger_path: PathBuf,
    pub profile_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub concurrency: usize,
    pub country: String,
    pub accept_language: String,
    pub model: String,
    pub language: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let builder = with_defaults()?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings: Settings = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if settings.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        Ok(settings)
    }
}

fn with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("input_path", "data/profile_links.csv")?
        .set_default("input_column", "Profile_Links")?
        .set_default("ledger_path", "data/scraped_links.txt")?
        .set_default("profile_dir", "data/profile_jsons")?
        .set_default("audio_dir", "data/welcome_audio")?
        .set_default("concurrency", 10)?
        .set_default("country", "US")?
        .set_default("accept_language", "en-US,en;q=0.5")?
        .set_default("model", "llama-3.2-1b-preview")?
        .set_default("language", "en")
}

/// Read a required credential from the process environment.
pub fn api_key(var: &str) -> Result<String> {
    std::env::var(var).with_context(|| format!("{} environment variable must be set", var))
}
