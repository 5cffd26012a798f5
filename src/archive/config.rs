use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ArchiveError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub api_base_url: String,
    /// Fernet ciphertext of the API token.
    pub api_token: Option<String>,
    pub page_size: u32,
    pub request_timeout_secs: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://slack.com/api".to_string(),
            api_token: None,
            page_size: 100,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub request_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 2_000,
        }
    }
}

impl PacingConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSection {
    pub include_direct_messages: bool,
    pub package_zip: bool,
    pub workspace_dir: Option<String>,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            include_direct_messages: false,
            package_zip: true,
            workspace_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArchiveConfig {
    pub slack: SlackConfig,
    pub pacing: PacingConfig,
    pub archive: ArchiveSection,
    /// Plaintext token from `SLACK_ARCHIVE_API_TOKEN`; never read from the file.
    #[serde(skip)]
    pub plain_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialArchiveConfig {
    slack: Option<SlackConfig>,
    pacing: Option<PacingConfig>,
    archive: Option<ArchiveSection>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_string(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn invalid(msg: &str) -> Result<()> {
    Err(ArchiveError::InvalidConfig(msg.to_string()).into())
}

fn validate(cfg: &ArchiveConfig) -> Result<()> {
    if cfg.slack.page_size == 0 || cfg.slack.page_size > 1_000 {
        return invalid("slack.page_size must be between 1 and 1000");
    }
    if cfg.slack.request_timeout_secs == 0 {
        return invalid("slack.request_timeout_secs must be >= 1");
    }
    let base = cfg.slack.api_base_url.trim();
    if !(base.starts_with("https://") || base.starts_with("http://")) {
        return invalid("slack.api_base_url must be an http(s) url");
    }
    if cfg
        .archive
        .workspace_dir
        .as_deref()
        .is_some_and(|dir| dir.trim().is_empty())
    {
        return invalid("archive.workspace_dir cannot be empty");
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Some(custom) = env_string("SLACK_ARCHIVE_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }

    let home = dirs::home_dir()?;
    Some(home.join(".slack_archive").join("config.toml"))
}

fn merge_file_config(base: &mut ArchiveConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path).map_err(|err| {
        ArchiveError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
    })?;
    let parsed: PartialArchiveConfig = toml::from_str(&raw)
        .map_err(|err| ArchiveError::InvalidConfig(format!("{}: {err}", path.display())))?;
    if let Some(slack) = parsed.slack {
        base.slack = slack;
    }
    if let Some(pacing) = parsed.pacing {
        base.pacing = pacing;
    }
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    Ok(())
}

/// Defaults, then the TOML file, then `SLACK_ARCHIVE_*` overrides.
pub fn load_config() -> Result<ArchiveConfig> {
    let mut cfg = ArchiveConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.slack.api_base_url = env_or_string("SLACK_ARCHIVE_API_BASE_URL", &cfg.slack.api_base_url);
    if let Some(cipher_text) = env_string("SLACK_ARCHIVE_ENCRYPTED_TOKEN") {
        cfg.slack.api_token = Some(cipher_text);
    }
    cfg.slack.page_size = u32::try_from(env_or_u64(
        "SLACK_ARCHIVE_PAGE_SIZE",
        u64::from(cfg.slack.page_size),
    ))
    .unwrap_or(cfg.slack.page_size);
    cfg.slack.request_timeout_secs = env_or_u64(
        "SLACK_ARCHIVE_REQUEST_TIMEOUT_SECS",
        cfg.slack.request_timeout_secs,
    );
    cfg.pacing.request_delay_ms =
        env_or_u64("SLACK_ARCHIVE_REQUEST_DELAY_MS", cfg.pacing.request_delay_ms);
    cfg.archive.include_direct_messages = env_or_bool(
        "SLACK_ARCHIVE_INCLUDE_DMS",
        cfg.archive.include_direct_messages,
    );
    cfg.archive.package_zip = env_or_bool("SLACK_ARCHIVE_PACKAGE_ZIP", cfg.archive.package_zip);
    if let Some(dir) = env_string("SLACK_ARCHIVE_WORKSPACE_DIR") {
        cfg.archive.workspace_dir = Some(dir);
    }
    cfg.plain_token = env_string("SLACK_ARCHIVE_API_TOKEN");

    validate(&cfg)?;
    Ok(cfg)
}
