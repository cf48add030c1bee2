//! Tick-wide encoding.
//!
//! Viewers are split into contiguous shards, one scoped thread per shard,
//! all reading the same snapshot. Masks and movement are cleared only after
//! every shard has joined.

use std::sync::Arc;
use std::thread;

use tracing::{debug, error};

use crate::config::UpdateConfig;
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::{Metrics, Timer};

use super::encoder::{UpdateEncoder, UpdateLimits, ViewerFrames};
use super::entity::{Snapshot, Viewer};

#[derive(Debug, Clone)]
pub struct TickEncoder {
    encoder: UpdateEncoder,
    workers: usize,
    metrics: Option<Arc<Metrics>>,
}

impl TickEncoder {
    pub fn new(limits: UpdateLimits, workers: usize) -> Self {
        Self {
            encoder: UpdateEncoder::new(limits),
            workers: workers.max(1),
            metrics: None,
        }
    }

    pub fn from_config(config: &UpdateConfig) -> Self {
        Self::new(UpdateLimits::from(config), config.tick_workers)
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn encoder(&self) -> &UpdateEncoder {
        &self.encoder
    }

    /// Encode one tick for every viewer, then reset the snapshot.
    ///
    /// Results are in viewer order. A failed viewer does not affect the
    /// others; its anchor and tracked sets are left as the encoder found them.
    pub fn encode_tick(&self, viewers: &mut [Viewer], snapshot: &mut Snapshot) -> Vec<Result<ViewerFrames>> {
        let _timer = Timer::start("tick_encode");
        let shard = viewers.len().div_ceil(self.workers).max(1);
        let shared: &Snapshot = snapshot;

        let results: Vec<Result<ViewerFrames>> = thread::scope(|scope| {
            let handles: Vec<_> = viewers
                .chunks_mut(shard)
                .map(|group| {
                    let len = group.len();
                    let handle = scope.spawn(move || {
                        group
                            .iter_mut()
                            .map(|viewer| self.encoder.encode(viewer, shared))
                            .collect::<Vec<_>>()
                    });
                    (len, handle)
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|(len, handle)| match handle.join() {
                    Ok(frames) => frames,
                    Err(_) => {
                        error!(viewers = len, "Update shard panicked");
                        (0..len)
                            .map(|_| Err(ProtocolError::Custom("update shard panicked".into())))
                            .collect()
                    }
                })
                .collect()
        });

        snapshot.reset_all();

        let failed = results.iter().filter(|r| r.is_err()).count();
        debug!(viewers = results.len(), failed, shards = viewers.len().div_ceil(shard), "Tick encoded");
        if let Some(metrics) = &self.metrics {
            metrics.tick_encoded();
        }
        results
    }
}
