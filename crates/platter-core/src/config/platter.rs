//! Top-level platter configuration

use crate::rig::RigConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Scanner program used when none is configured
pub const DEFAULT_SCANNER: &str = "platter-scan";

/// Cue loader program used when none is configured
pub const DEFAULT_CUE_LOADER: &str = "platter-cues";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatterConfig {
    /// Program run once per library source to list its records
    pub scanner: PathBuf,

    /// Program run to load and save cue points
    pub cue_loader: PathBuf,

    /// Sources imported at startup, one crate each
    pub library: Vec<PathBuf>,

    /// Time a helper is given to exit after SIGTERM before it is killed
    /// Default: 5000 ms
    pub terminate_grace_ms: u64,
}

impl Default for PlatterConfig {
    fn default() -> Self {
        Self {
            scanner: PathBuf::from(DEFAULT_SCANNER),
            cue_loader: PathBuf::from(DEFAULT_CUE_LOADER),
            library: Vec::new(),
            terminate_grace_ms: 5000,
        }
    }
}

impl PlatterConfig {
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn rig_config(&self) -> RigConfig {
        RigConfig {
            terminate_grace: self.terminate_grace(),
        }
    }
}
