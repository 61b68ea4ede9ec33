//! Runtime configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::framing::envelope::IdPolicy;
use crate::{PeerError, Result};

/// Terminal session manager tunables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TerminalConfig {
    /// Output buffer cap in bytes for new terminals without an explicit limit.
    #[serde(default = "default_byte_limit")]
    pub default_byte_limit: usize,
    /// Capacity of the released-terminal cache (FIFO eviction).
    #[serde(default = "default_released_capacity")]
    pub released_capacity: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            default_byte_limit: default_byte_limit(),
            released_capacity: default_released_capacity(),
        }
    }
}

fn default_byte_limit() -> usize {
    1_000_000
}

fn default_released_capacity() -> usize {
    50
}

/// Process supervisor tunables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Milliseconds to wait between the graceful terminate signal and the
    /// forceful kill escalation.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: Option<u64>,
    /// Override for the orphan registry file location. When absent the
    /// platform app-support directory is used.
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
}

fn default_kill_grace_ms() -> Option<u64> {
    None
}

/// Runtime configuration parsed from `conduit.toml`.
///
/// Every field has a default so an absent or empty config file yields a
/// fully working runtime.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Classification policy for frames with a malformed request id.
    #[serde(default)]
    pub id_policy: IdPolicy,
    /// Unterminated non-JSON prefix length that triggers a buffer discard.
    #[serde(default = "default_noise_prefix_limit")]
    pub noise_prefix_limit: Option<usize>,
    /// Buffer size that triggers a frame-stall warning.
    #[serde(default = "default_frame_warn_bytes")]
    pub frame_warn_bytes: Option<usize>,
    /// Terminal manager settings.
    #[serde(default)]
    pub terminal: TerminalConfig,
    /// Supervisor settings.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

fn default_noise_prefix_limit() -> Option<usize> {
    None
}

fn default_frame_warn_bytes() -> Option<usize> {
    None
}

impl RuntimeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| PeerError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `PeerError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.terminal.default_byte_limit == 0 {
            return Err(PeerError::Config(
                "terminal.default_byte_limit must be greater than zero".into(),
            ));
        }
        if self.terminal.released_capacity == 0 {
            return Err(PeerError::Config(
                "terminal.released_capacity must be greater than zero".into(),
            ));
        }
        if self.noise_prefix_limit == Some(0) {
            return Err(PeerError::Config(
                "noise_prefix_limit must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
