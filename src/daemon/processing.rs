use anyhow::Result;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info};

use super::storage::{entities::SnapshotBatch, playtime_store::PlaytimeStore};

/// Represents the consumer half of the daemon. This module is responsible for receiving snapshot
/// batches, recording them, and running retention when the day rolls over.
pub struct ProcessingModule {
    receiver: Receiver<SnapshotBatch>,
    store: PlaytimeStore,
}

impl ProcessingModule {
    pub fn new(receiver: Receiver<SnapshotBatch>, store: PlaytimeStore) -> Self {
        Self { receiver, store }
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            mut receiver,
            mut store,
        } = self;
        let mut current_date = None;

        while let Some(batch) = receiver.recv().await {
            debug!("Processing batch of {} snapshots", batch.snapshots.len());
            let today = batch.taken_at.date_naive();
            let run_retention = current_date != Some(today);

            // Store calls are blocking sqlite work, including the lock retry sleeps, so they
            // run on the blocking pool instead of stalling the collector and shutdown tasks.
            let (returned, recorded, pruned) = tokio::task::spawn_blocking(move || {
                let recorded = store.ingest_batch(&batch.snapshots, batch.taken_at);
                let pruned = run_retention.then(|| store.prune(today));
                (store, recorded, pruned)
            })
            .await?;
            store = returned;

            match recorded {
                Ok(written) => {
                    info!("Recorded {written} snapshots")
                }
                Err(e) => {
                    error!("Error recording batch: {e:?}")
                }
            }

            match pruned {
                Some(Ok(deleted)) => {
                    if deleted > 0 {
                        info!("Retention pass removed {deleted} records");
                    }
                    current_date = Some(today);
                }
                Some(Err(e)) => {
                    // current_date stays stale, so the next batch retries retention.
                    error!("Error pruning old records: {e:?}")
                }
                None => {}
            }
        }

        receiver.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use tokio::sync::mpsc;

    use super::ProcessingModule;
    use crate::{
        daemon::storage::{entities::SnapshotBatch, playtime_store::PlaytimeStore},
        snapshot_api::AppSnapshot,
        utils::logging::TEST_LOGGING,
    };

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 20).unwrap() + Duration::days(offset)
    }

    fn batch(total: i64, taken_at: DateTime<Utc>) -> SnapshotBatch {
        SnapshotBatch {
            snapshots: vec![AppSnapshot {
                app_id: 10,
                name: "Factory Game".into(),
                playtime_total: total,
                playtime_recent: None,
            }],
            taken_at,
        }
    }

    #[tokio::test]
    async fn retention_runs_when_the_day_rolls_over() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("playtimes.db");

        let (sender, receiver) = mpsc::channel(10);
        let processor = ProcessingModule::new(receiver, PlaytimeStore::open(&path)?);

        // Three records on one day, then a batch ten days later triggers retention.
        for (hour, total) in [(8, 100), (12, 110), (20, 130)] {
            let taken_at = Utc.from_utc_datetime(&day(0).and_hms_opt(hour, 0, 0).unwrap());
            sender.send(batch(total, taken_at)).await?;
        }
        let later = Utc.from_utc_datetime(&day(10).and_hms_opt(8, 0, 0).unwrap());
        sender.send(batch(130, later)).await?;
        drop(sender);

        processor.run().await?;

        let store = PlaytimeStore::open(&path)?;
        let records = store.history(10, None, None)?;
        // The old day got thinned to its first and last record.
        assert_eq!(records.len(), 3);
        let old_deltas = records
            .iter()
            .filter(|record| record.record_date == day(0))
            .map(|record| record.playtime_today)
            .collect::<Vec<_>>();
        assert_eq!(old_deltas, vec![30, 0]);
        Ok(())
    }
}
