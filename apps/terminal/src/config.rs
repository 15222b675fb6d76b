use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use clap::Parser;
use client_core::{api::DEFAULT_API_URL, live::DEFAULT_LIVE_URL, Credentials, LiveStreamConfig};
use serde::Deserialize;
use storage::normalize_database_url;

pub const DEFAULT_CONFIG_FILE: &str = "threadline.toml";

#[derive(Parser, Debug, Default)]
#[command(name = "threadline", about = "Terminal chat client")]
pub struct Args {
    /// TOML settings file; defaults to ./threadline.toml when present.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Conversation to open instead of the first one the user belongs to.
    #[arg(long)]
    pub conversation: Option<String>,
    #[arg(long)]
    pub token: Option<String>,
    #[arg(long)]
    pub api_url: Option<String>,
    #[arg(long)]
    pub ws_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub token: Option<String>,
    pub cookie: Option<String>,
    pub api_url: String,
    pub ws_url: String,
    pub snapshot_url: String,
    pub idle_timeout_secs: u64,
    pub log_filter: String,
    pub log_file: Option<PathBuf>,
    pub conversation: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            token: None,
            cookie: None,
            api_url: DEFAULT_API_URL.into(),
            ws_url: DEFAULT_LIVE_URL.into(),
            snapshot_url: "sqlite://./data/threadline.db".into(),
            idle_timeout_secs: 60,
            log_filter: "info".into(),
            log_file: None,
            conversation: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    token: Option<String>,
    cookie: Option<String>,
    api_url: Option<String>,
    ws_url: Option<String>,
    snapshot_url: Option<String>,
    idle_timeout_secs: Option<u64>,
    log_filter: Option<String>,
    log_file: Option<PathBuf>,
    conversation: Option<String>,
}

/// Defaults, then the settings file, then `THREADLINE_*` variables, then flags.
pub fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    load_settings_with(args, |key| std::env::var(key).ok())
}

pub fn load_settings_with(
    args: &Args,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match &args.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?;
            settings.apply_file(&raw, path)?;
        }
        None => {
            let path = Path::new(DEFAULT_CONFIG_FILE);
            if let Ok(raw) = fs::read_to_string(path) {
                settings.apply_file(&raw, path)?;
            }
        }
    }

    settings.apply_env(env)?;
    settings.apply_args(args);
    settings.validate()?;
    settings.snapshot_url = normalize_database_url(&settings.snapshot_url);
    Ok(settings)
}

impl Settings {
    fn apply_file(&mut self, raw: &str, path: &Path) -> anyhow::Result<()> {
        let file_cfg: FileSettings = toml::from_str(raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?;

        if let Some(v) = file_cfg.token {
            self.token = Some(v);
        }
        if let Some(v) = file_cfg.cookie {
            self.cookie = Some(v);
        }
        if let Some(v) = file_cfg.api_url {
            self.api_url = v;
        }
        if let Some(v) = file_cfg.ws_url {
            self.ws_url = v;
        }
        if let Some(v) = file_cfg.snapshot_url {
            self.snapshot_url = v;
        }
        if let Some(v) = file_cfg.idle_timeout_secs {
            self.idle_timeout_secs = v;
        }
        if let Some(v) = file_cfg.log_filter {
            self.log_filter = v;
        }
        if let Some(v) = file_cfg.log_file {
            self.log_file = Some(v);
        }
        if let Some(v) = file_cfg.conversation {
            self.conversation = Some(v);
        }
        Ok(())
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = env("THREADLINE_TOKEN") {
            self.token = Some(v);
        }
        if let Some(v) = env("THREADLINE_COOKIE") {
            self.cookie = Some(v);
        }
        if let Some(v) = env("THREADLINE_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = env("THREADLINE_WS_URL") {
            self.ws_url = v;
        }
        if let Some(v) = env("THREADLINE_SNAPSHOT_URL") {
            self.snapshot_url = v;
        }
        if let Some(v) = env("THREADLINE_IDLE_TIMEOUT_SECS") {
            self.idle_timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("THREADLINE_IDLE_TIMEOUT_SECS is not a number: '{v}'"))?;
        }
        if let Some(v) = env("THREADLINE_LOG") {
            self.log_filter = v;
        }
        Ok(())
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(v) = &args.token {
            self.token = Some(v.clone());
        }
        if let Some(v) = &args.api_url {
            self.api_url = v.clone();
        }
        if let Some(v) = &args.ws_url {
            self.ws_url = v.clone();
        }
        if let Some(v) = &args.conversation {
            self.conversation = Some(v.clone());
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.token.as_deref().map_or(true, |token| token.trim().is_empty()) {
            bail!("no API token configured; set THREADLINE_TOKEN, --token or `token` in the config file");
        }
        if self.idle_timeout_secs == 0 {
            bail!("idle_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            token: self.token.clone().unwrap_or_default(),
            cookie: self.cookie.clone(),
        }
    }

    pub fn live_config(&self) -> LiveStreamConfig {
        LiveStreamConfig {
            token: self.token.clone(),
            cookie: self.cookie.clone(),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            ..LiveStreamConfig::new(self.ws_url.clone())
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
