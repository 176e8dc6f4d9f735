//! Synchronization settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Configuration for sync behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum objects fetched per pull round-trip.
    pub page_size: usize,
    /// How far before the stored watermark an incremental pull starts.
    /// Tolerates clock skew and writes in flight at the watermark instant.
    #[serde(with = "millis")]
    pub clock_skew: Duration,
    /// Fetch the next page while the previous one is still being applied.
    pub pipeline_apply: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            clock_skew: Duration::from_secs(3),
            pipeline_apply: true,
        }
    }
}

impl SyncConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    pub fn with_pipeline_apply(mut self, pipeline_apply: bool) -> Self {
        self.pipeline_apply = pipeline_apply;
        self
    }

    /// Reject settings the pull loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(SyncError::InvalidConfig("page_size must be positive".into()));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
