//! Acquisition settings.
//!
//! These are plain values handed to the core by whoever owns configuration (a settings
//! dialog, a YAML file, command line flags). Nothing in the crate reads them from global
//! state.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::DEFAULT_RECORD_PATH;
use crate::errors::{DaqError, Result};

#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM8";
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";

pub const DEFAULT_BAUD_RATE: u32 = 12_000_000;
pub const DEFAULT_CHUNK_SIZE: usize = 256;
pub const DEFAULT_TIMEOUT_MS: u64 = 400;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_RECORD_BYTES: usize = 50_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port_name: String,
    pub baud_rate: u32,
    /// Per-read timeout in continuous mode, in milliseconds.
    pub timeout_ms: u64,
    /// Maximum bytes per read in continuous mode.
    pub chunk_size: usize,
    /// Device sample rate in Hz, used for the time and frequency axes.
    pub sample_rate: u32,
    /// Bytes to read in one capture.
    pub record_bytes: usize,
    pub record_path: PathBuf,
    /// Carry partial samples between reads in continuous mode.
    pub carry_residual: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port_name: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            record_bytes: DEFAULT_RECORD_BYTES,
            record_path: PathBuf::from(DEFAULT_RECORD_PATH),
            carry_residual: false,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file; missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Self::from_yaml(&text)
            .map_err(|e| DaqError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let settings: Settings =
            serde_yaml_ng::from_str(text).map_err(|e| DaqError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| DaqError::Config(e.to_string()))
    }

    /// Reject values the acquisition loop cannot run with.
    ///
    /// `record_bytes` is checked when a capture starts, not here.
    pub fn validate(&self) -> Result<()> {
        if self.port_name.trim().is_empty() {
            return Err(DaqError::Config("port name is empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(DaqError::Config("baud rate must be positive".into()));
        }
        if self.timeout_ms == 0 {
            return Err(DaqError::Config("timeout must be positive".into()));
        }
        if self.chunk_size == 0 {
            return Err(DaqError::Config("chunk size must be positive".into()));
        }
        if self.sample_rate == 0 {
            return Err(DaqError::Config("sample rate must be positive".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
