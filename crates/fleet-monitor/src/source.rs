//! Position sample sources.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use fleet_domain::PositionSample;

/// Where the ingestion loop pulls samples from
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Samples received since the previous call, in any order
    async fn latest_samples(&self) -> Result<Vec<PositionSample>>;
}

/// Push-fed source; each pull drains what was pushed since
#[derive(Debug, Default)]
pub struct QueueSource {
    queue: Mutex<Vec<PositionSample>>,
}

impl QueueSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, sample: PositionSample) {
        self.queue.lock().await.push(sample);
    }

    pub async fn extend(&self, samples: impl IntoIterator<Item = PositionSample> + Send) {
        self.queue.lock().await.extend(samples);
    }
}

#[async_trait]
impl PositionSource for QueueSource {
    async fn latest_samples(&self) -> Result<Vec<PositionSample>> {
        Ok(std::mem::take(&mut *self.queue.lock().await))
    }
}
