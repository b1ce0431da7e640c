//! Configuration for the updater.
//!
//! Loaded once from a JSON file and passed by reference into each component.
//! There is no ambient global configuration state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, UpdateError};

const FILL_IN: &str = "<FILL IN";

/// Immutable configuration for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Portal query URL template; `{version}` is replaced with the game version.
    pub mods_api_url: String,
    /// Path to the manifest of installed mods.
    pub mod_packs_path: PathBuf,
    /// Live mod directory the game server loads from.
    pub mods_dir: PathBuf,
    /// JSON file carrying the installed game version (`{"version": "2.0.28"}`).
    pub factorio_version_file: PathBuf,
    /// Portal credentials for authenticated downloads.
    pub username: String,
    pub token: String,

    /// Timeout for the catalog request.
    pub request_timeout_secs: u64,
    /// Timeout for each archive download.
    pub download_timeout_secs: u64,
    /// Upper bound on concurrent downloads within one run.
    pub max_concurrent_downloads: usize,
    /// Bounded retries for transient download failures (0 disables retrying).
    pub max_retries: usize,
    /// Initial delay between retries (doubles each retry).
    pub retry_delay_ms: u64,
    /// Cap on the exponential backoff delay.
    pub max_retry_delay_ms: u64,
    pub user_agent: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            mods_api_url:
                "https://mods.factorio.com/api/mods?page_size=max&full=True&version={version}"
                    .to_string(),
            mod_packs_path: PathBuf::from("./mod-packs.json"),
            mods_dir: PathBuf::from("<FILL IN - path to mods folder>"),
            factorio_version_file: PathBuf::from("<FILL IN - path to base-info.json>"),
            username: "<FILL IN>".to_string(),
            token: "<FILL IN>".to_string(),
            request_timeout_secs: 120,
            download_timeout_secs: 300,
            max_concurrent_downloads: 4,
            max_retries: 2,
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 60_000,
            user_agent: concat!("factorio-mod-updater/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl UpdaterConfig {
    /// Load configuration from a JSON file.
    ///
    /// When the file does not exist, a template with placeholder values is
    /// written in its place and the load fails, telling the operator to fill
    /// it in. A config still carrying placeholders is rejected with every
    /// offending field named.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("config not found, creating default: {}", path.display());
            let template = serde_json::to_string_pretty(&Self::default()).map_err(|e| {
                UpdateError::Configuration {
                    message: format!("could not render config template: {e}"),
                    field: None,
                }
            })?;
            std::fs::write(path, template).map_err(|e| UpdateError::Configuration {
                message: format!("could not write config template '{}': {e}", path.display()),
                field: None,
            })?;
            return Err(UpdateError::Configuration {
                message: format!(
                    "config '{}' did not exist; a template was written - fill it in and run again",
                    path.display()
                ),
                field: None,
            });
        }

        let body = std::fs::read_to_string(path).map_err(|e| UpdateError::Configuration {
            message: format!("could not read config '{}': {e}", path.display()),
            field: None,
        })?;
        let config: Self =
            serde_json::from_str(&body).map_err(|e| UpdateError::Configuration {
                message: format!("invalid JSON in config '{}': {e}", path.display()),
                field: None,
            })?;
        config.reject_placeholders()?;
        Ok(config)
    }

    /// Check that the path-valued options point at something usable.
    ///
    /// All problems are collected and reported together so the operator can
    /// fix the config in one pass.
    pub fn validate_paths(&self) -> Result<()> {
        let mut problems = Vec::new();

        if !self.mods_dir.is_dir() {
            problems.push(format!(
                "mods_dir: directory does not exist: {}",
                self.mods_dir.display()
            ));
        }

        if !self.factorio_version_file.is_file() {
            problems.push(format!(
                "factorio_version_file: file does not exist: {}",
                self.factorio_version_file.display()
            ));
        }

        // The manifest itself may be absent (first run), but its parent
        // directory must exist and an existing file must be valid JSON.
        if self.mod_packs_path.exists() {
            match std::fs::read_to_string(&self.mod_packs_path) {
                Ok(body) => {
                    if let Err(e) = serde_json::from_str::<serde_json::Value>(&body) {
                        problems.push(format!("mod_packs_path: invalid JSON: {e}"));
                    }
                }
                Err(e) => problems.push(format!("mod_packs_path: unreadable: {e}")),
            }
        } else if let Some(parent) = self.mod_packs_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.is_dir()
        {
            problems.push(format!(
                "mod_packs_path: parent directory does not exist: {}",
                parent.display()
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(UpdateError::Configuration {
                message: problems.join("; "),
                field: None,
            })
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Retry delay for the given attempt, exponential with a cap.
    pub fn retry_delay(&self, attempt: usize) -> Duration {
        let delay = self.retry_delay_ms.saturating_mul(1 << attempt.min(16));
        Duration::from_millis(delay.min(self.max_retry_delay_ms))
    }

    fn reject_placeholders(&self) -> Result<()> {
        let fields = [
            ("mods_api_url", self.mods_api_url.clone()),
            ("username", self.username.clone()),
            ("token", self.token.clone()),
            ("mods_dir", self.mods_dir.to_string_lossy().into_owned()),
            (
                "factorio_version_file",
                self.factorio_version_file.to_string_lossy().into_owned(),
            ),
        ];
        let incomplete: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.starts_with(FILL_IN))
            .map(|(name, _)| *name)
            .collect();
        if incomplete.is_empty() {
            Ok(())
        } else {
            Err(UpdateError::Configuration {
                message: format!("incomplete fields in config: {}", incomplete.join(", ")),
                field: Some(incomplete.join(", ")),
            })
        }
    }
}
