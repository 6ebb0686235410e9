//! Supervisor settings: data directory, engine location, timeouts and the
//! cache-file contention policy. Loadable from JSON; every field has a default.

use crate::singbox::types::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the platform local-data dir.
pub const APP_DIR_NAME: &str = "VeilBox";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Cache policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the supervisor acquires the engine's cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Preferred cache file name inside the data directory.
    pub file_name: String,
    pub fallback_prefix: String,
    pub fallback_suffix: String,
    /// Total time to wait for the preferred file.
    pub contention_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub fallback_attempts: u32,
    pub fallback_backoff_ms: u64,
    /// Fallback files kept after pruning, including the new one.
    pub retain: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            file_name: "cache.db".into(),
            fallback_prefix: "cache-".into(),
            fallback_suffix: ".db".into(),
            contention_timeout_ms: 6_000,
            poll_interval_ms: 200,
            fallback_attempts: 6,
            fallback_backoff_ms: 100,
            retain: 3,
        }
    }
}

impl CachePolicy {
    pub fn contention_timeout(&self) -> Duration {
        Duration::from_millis(self.contention_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fallback_backoff(&self) -> Duration {
        Duration::from_millis(self.fallback_backoff_ms)
    }

    /// Does `name` look like one of our fallback files?
    pub fn is_fallback_name(&self, name: &str) -> bool {
        name.len() > self.fallback_prefix.len() + self.fallback_suffix.len()
            && name.starts_with(&self.fallback_prefix)
            && name.ends_with(&self.fallback_suffix)
    }

    pub fn fallback_name(&self, unique: i64) -> String {
        format!("{}{}{}", self.fallback_prefix, unique, self.fallback_suffix)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Supervisor settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Working directory for the engine; holds the config and cache files.
    pub data_dir: PathBuf,
    /// Explicit engine binary. When unset, `<exe dir>/core/sing-box[.exe]`.
    pub engine_path: Option<PathBuf>,
    pub config_file_name: String,
    /// Grace period before a stop escalates to a kill.
    pub grace_timeout_ms: u64,
    pub cache: CachePolicy,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            engine_path: None,
            config_file_name: "sb_config.json".into(),
            grace_timeout_ms: 2_000,
            cache: CachePolicy::default(),
        }
    }
}

impl SupervisorSettings {
    /// Defaults rooted at a specific data directory.
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_millis(self.grace_timeout_ms)
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(&self.config_file_name)
    }

    /// Read settings from a JSON file and validate them.
    pub fn load(path: &Path) -> Result<Self, SingBoxError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SingBoxError::io(
                SingBoxErrorKind::SettingsInvalid,
                format!("Failed to read settings {}", path.display()),
                &e,
            )
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, SingBoxError> {
        let settings: Self = serde_json::from_str(text).map_err(|e| {
            SingBoxError::new(SingBoxErrorKind::SettingsInvalid, "Malformed settings JSON")
                .with_detail(e.to_string())
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make the supervisor spin or never wait.
    pub fn validate(&self) -> Result<(), SingBoxError> {
        let mut problems = Vec::new();
        if self.data_dir.as_os_str().is_empty() {
            problems.push("data_dir is empty");
        }
        if self.config_file_name.trim().is_empty() {
            problems.push("config_file_name is empty");
        }
        if self.cache.file_name.trim().is_empty() {
            problems.push("cache.file_name is empty");
        }
        if self.cache.poll_interval_ms == 0 {
            problems.push("cache.poll_interval_ms must be > 0");
        }
        if self.cache.fallback_attempts == 0 {
            problems.push("cache.fallback_attempts must be > 0");
        }
        if self.cache.retain == 0 {
            problems.push("cache.retain must be > 0");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(
                SingBoxError::new(SingBoxErrorKind::SettingsInvalid, "Invalid supervisor settings")
                    .with_detail(problems.join("; ")),
            )
        }
    }
}

/// `<local data dir>/VeilBox`, or a relative `VeilBox` if the platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(APP_DIR_NAME))
}
