use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use collection::SnapshotCollectionModule;
use processing::ProcessingModule;
use storage::{
    entities::SnapshotBatch,
    playtime_store::{PlaytimeStore, DB_FILE_NAME},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{
    snapshot_api::{command::CommandSource, SnapshotSource},
    utils::clock::{Clock, DefaultClock},
};

pub mod collection;
pub mod processing;
pub mod shutdown;
pub mod storage;

pub const DEFAULT_COLLECTION_INTERVAL: Duration = Duration::from_secs(20 * 60);

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf, snapshot_command: String, interval: Duration) -> Result<()> {
    let (sender, receiver) = mpsc::channel::<SnapshotBatch>(10);
    let source = CommandSource::new(snapshot_command);

    let shutdown_token = CancellationToken::new();

    let collector = create_collector(sender, source, &shutdown_token, interval, DefaultClock);

    let processor = create_processor(&dir.join(DB_FILE_NAME), receiver)?;

    let (_, collection_result, processing_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token),
        collector.run(),
        processor.run(),
    );

    if let Err(collection_result) = collection_result {
        error!("Collection module got an error {:?}", collection_result);
    }

    if let Err(processing_result) = processing_result {
        error!("Processing module got an error {:?}", processing_result);
    }

    Ok(())
}

fn create_collector(
    sender: mpsc::Sender<SnapshotBatch>,
    source: impl SnapshotSource + 'static,
    shutdown_token: &CancellationToken,
    interval: Duration,
    clock: impl Clock,
) -> SnapshotCollectionModule {
    SnapshotCollectionModule::new(
        sender,
        Box::new(source),
        shutdown_token.clone(),
        interval,
        Box::new(clock),
    )
}

fn create_processor(
    db_path: &Path,
    receiver: mpsc::Receiver<SnapshotBatch>,
) -> Result<ProcessingModule> {
    let store = PlaytimeStore::open(db_path)?;
    Ok(ProcessingModule::new(receiver, store))
}

#[cfg(test)]
mod daemon_tests {
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio::{sync::mpsc, time::Instant};
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            create_collector, create_processor,
            storage::{
                entities::SnapshotBatch,
                playtime_store::{PlaytimeStore, DB_FILE_NAME},
            },
        },
        snapshot_api::{AppSnapshot, MockSnapshotSource},
        utils::{clock::Clock, logging::TEST_LOGGING},
    };

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(), NaiveTime::MIN);

    fn test_snapshots(total: i64) -> Vec<AppSnapshot> {
        vec![
            AppSnapshot {
                app_id: 10,
                name: "Factory Game".into(),
                playtime_total: total,
                playtime_recent: Some(120),
            },
            AppSnapshot {
                app_id: 20,
                name: "Roguelike".into(),
                playtime_total: 40,
                playtime_recent: None,
            },
        ]
    }

    struct TestClock {
        start_time: DateTime<Utc>,
        reference: Instant,
    }

    #[async_trait]
    impl Clock for TestClock {
        fn time(&self) -> DateTime<Utc> {
            self.start_time + self.reference.elapsed()
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep_until(&self, instant: tokio::time::Instant) {
            tokio::time::sleep_until(instant).await;
        }
    }

    struct HangingSource;

    #[async_trait]
    impl crate::snapshot_api::SnapshotSource for HangingSource {
        async fn fetch(&mut self) -> Result<Vec<AppSnapshot>> {
            std::future::pending().await
        }
    }

    /// Very simple smoke test to check if the application is working properly. Time is paused,
    /// so exactly four collection rounds land before the cancelation fires.
    #[tokio::test(start_paused = true)]
    async fn smoke_test_daemon() -> Result<()> {
        *TEST_LOGGING;
        let mut source = MockSnapshotSource::new();
        let mut totals = [100, 130, 130, 145].into_iter();
        source
            .expect_fetch()
            .returning(move || Ok(test_snapshots(totals.next().unwrap())))
            .times(4);

        let shutdown_token = CancellationToken::new();

        let (sender, receiver) = mpsc::channel::<SnapshotBatch>(10);
        let test_clock = TestClock {
            start_time: Utc.from_utc_datetime(&TEST_START_DATE),
            reference: Instant::now(),
        };
        let collector = create_collector(
            sender,
            source,
            &shutdown_token,
            Duration::from_millis(100),
            test_clock,
        );

        let dir = tempdir()?;
        let db_path = dir.path().join(DB_FILE_NAME);

        let processor = create_processor(&db_path, receiver)?;

        let (_, collection_result, processing_result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(350)).await;
                shutdown_token.cancel()
            },
            collector.run(),
            processor.run(),
        );

        collection_result?;
        processing_result?;

        let store = PlaytimeStore::open(&db_path)?;
        let today = TEST_START_DATE.date();

        let records = store.history(10, None, None)?;
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].playtime_today, 45);

        let overview = store.overview(today)?;
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].app_id, 10);
        assert_eq!(overview[0].playtime_week, 45);
        assert_eq!(overview[1].app_id, 20);
        assert_eq!(overview[1].playtime_today, 0);

        Ok(())
    }

    /// A provider that never answers must not keep the daemon from shutting down.
    #[tokio::test(start_paused = true)]
    async fn cancelation_interrupts_a_hung_provider() -> Result<()> {
        *TEST_LOGGING;
        let shutdown_token = CancellationToken::new();
        let (sender, _receiver) = mpsc::channel::<SnapshotBatch>(10);
        let test_clock = TestClock {
            start_time: Utc.from_utc_datetime(&TEST_START_DATE),
            reference: Instant::now(),
        };
        let collector = create_collector(
            sender,
            HangingSource,
            &shutdown_token,
            Duration::from_millis(100),
            test_clock,
        );

        let (_, collection_result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                shutdown_token.cancel()
            },
            collector.run(),
        );
        collection_result?;

        Ok(())
    }
}
