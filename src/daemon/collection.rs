use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::{
    daemon::storage::entities::SnapshotBatch, snapshot_api::SnapshotSource, utils::clock::Clock,
};

pub struct SnapshotCollectionModule {
    next: mpsc::Sender<SnapshotBatch>,
    source: Box<dyn SnapshotSource>,
    shutdown: CancellationToken,
    collection_frequency: Duration,
    time_provider: Box<dyn Clock>,
}

impl SnapshotCollectionModule {
    pub fn new(
        next: mpsc::Sender<SnapshotBatch>,
        source: Box<dyn SnapshotSource>,
        shutdown: CancellationToken,
        collection_frequency: Duration,
        time_provider: Box<dyn Clock>,
    ) -> Self {
        Self {
            next,
            source,
            collection_frequency,
            time_provider,
            shutdown,
        }
    }

    async fn collect_batch(&mut self) -> Result<SnapshotBatch> {
        let snapshots = self.source.fetch().await?;
        let taken_at = self.time_provider.time();

        Ok(SnapshotBatch { snapshots, taken_at })
    }

    /// Executes the collector event loop.
    pub async fn run(mut self) -> Result<()> {
        let mut collection_point = self.time_provider.instant();
        loop {
            collection_point += self.collection_frequency;

            // The fetch runs an external command, so cancelation has to be able to interrupt
            // it. The command itself is killed when the fetch future drops.
            let shutdown = self.shutdown.clone();
            tokio::select! {
                _ = shutdown.cancelled() => {
                    return Ok(())
                }
                collected = self.collect_batch() => match collected {
                    Ok(batch) => {
                        let span = info_span!("Queueing collected snapshots");
                        debug!("Sending batch of {} snapshots", batch.snapshots.len());
                        self.next
                            .send(batch)
                            .instrument(span)
                            .await
                            .inspect_err(|e| error!("Unexpected error during sending {e:?}"))?;
                        info!("Successfully sent batch")
                    }
                    Err(e) => {
                        error!("Encountered an error during collection {:?}", e)
                    }
                }
            }

            tokio::select! {
                // Cancelation means we stop execution of the event loop. Which means we also drop
                // the sender channel and consequently stop the processing module.
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.time_provider.sleep_until(collection_point) => ()
            }
        }
    }
}
