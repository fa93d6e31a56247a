use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Engine tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Concurrent primary uploads process-wide; uploads are bandwidth- and
    /// battery-sensitive so this stays small
    pub max_concurrent_uploads: usize,
    /// Concurrent downloads process-wide
    pub max_concurrent_downloads: usize,
    /// In-attempt retry policy for transient transfer failures
    #[serde(default)]
    pub retry: RetryConfig,
    /// Persist upload progress when it advances by at least this fraction;
    /// intermediate values are still broadcast to observers
    #[serde(default = "default_progress_persist_step")]
    pub progress_persist_step: f32,
}

fn default_progress_persist_step() -> f32 {
    0.05
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 2,
            max_concurrent_downloads: 3,
            retry: RetryConfig::default(),
            progress_persist_step: default_progress_persist_step(),
        }
    }
}
