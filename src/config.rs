//! Configuration for the session core.
//!
//! Loaded from `config.toml` under the opsgate home directory. Every section
//! and every field is optional; a missing or partial file still yields a
//! working configuration with the documented defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default session lifetime: 8 hours (seconds).
const DEFAULT_SESSION_TTL_SECS: u64 = 8 * 3600;

/// Default consecutive failures before a block.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default block duration: 15 minutes (seconds).
const DEFAULT_BLOCK_SECS: u64 = 15 * 60;

/// Default credential backend endpoint.
const DEFAULT_VERIFIER_URL: &str = "http://127.0.0.1:8080";

/// Default verifier request timeout (seconds).
const DEFAULT_VERIFIER_TIMEOUT_SECS: u64 = 10;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub lockout: LockoutConfig,
    pub verifier: VerifierConfig,
}

/// Session lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a session stays valid after login or refresh (seconds).
    pub ttl_secs: u64,
}

/// Failed-login throttling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Consecutive failures that trigger a block.
    pub max_attempts: u32,
    /// How long the block lasts (seconds).
    pub block_secs: u64,
}

/// Credential backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Base URL of the console backend (no trailing slash required).
    pub base_url: String,
    /// Request timeout for the login call (seconds).
    pub timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            block_secs: DEFAULT_BLOCK_SECS,
        }
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_VERIFIER_URL.to_string(),
            timeout_secs: DEFAULT_VERIFIER_TIMEOUT_SECS,
        }
    }
}

impl SessionConfig {
    /// Session lifetime as a `chrono` duration.
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }
}

impl LockoutConfig {
    /// Block duration as a `chrono` duration.
    pub fn block_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.block_secs as i64)
    }
}

impl Config {
    /// Parse a TOML document. Unknown keys are tolerated.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse config")
    }

    /// Load configuration from the given file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// Conventional config location: `~/.opsgate/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::UserDirs::new()
            .map(|u| u.home_dir().join(".opsgate").join("config.toml"))
    }
}
