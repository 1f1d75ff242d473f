use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/api";
pub const DEFAULT_PAGE_SIZE: usize = 20;

pub struct Config {
    pub data_dir: PathBuf,
    pub api_url: String,
    pub token: Option<String>,
    pub poll_interval: Duration,
    pub prefs_path: PathBuf,
}

impl Config {
    pub fn load(api_url: &str, poll_interval_secs: u64) -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "nutriscan").context("Could not determine home directory")?;
        Self::in_dir(proj_dirs.data_dir(), api_url, poll_interval_secs)
    }

    fn in_dir(data_dir: &Path, api_url: &str, poll_interval_secs: u64) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let api_url = api_url.trim().trim_end_matches('/').to_string();
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            bail!("Invalid API URL '{api_url}'. Expected http:// or https://");
        }
        if poll_interval_secs == 0 {
            bail!("Poll interval must be at least 1 second");
        }

        Ok(Config {
            data_dir: data_dir.to_path_buf(),
            token: read_token(&data_dir.join("token"))?,
            api_url,
            poll_interval: Duration::from_secs(poll_interval_secs),
            prefs_path: data_dir.join("preferences.json"),
        })
    }
}

/// Bearer token for the analysis API, if the user has stored one.
fn read_token(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let token = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read token file: {}", path.display()))?;
    let token = token.trim();
    Ok((!token.is_empty()).then(|| token.to_string()))
}

/// Remembered UI choices. Losing this file only loses convenience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub last_month: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            last_month: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Preferences {
    /// Missing or unreadable preferences fall back to defaults.
    pub fn load(path: &Path) -> Self {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&raw) {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt preferences");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write preferences: {}", path.display()))
    }
}
