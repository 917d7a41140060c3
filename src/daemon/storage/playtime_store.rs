use std::{collections::HashSet, path::Path, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::{
    snapshot_api::AppSnapshot,
    utils::time::{decode_date, decode_datetime, encode_date, encode_datetime},
};

use super::{
    entities::{AppActivity, AppDetail, DailyTotal, PlaytimeRecord, Priority},
    error::StoreError,
};

pub const DB_FILE_NAME: &str = "playtimes.db";

/// Days covered by the activity window, today included.
pub const ACTIVITY_WINDOW_DAYS: i64 = 7;

/// First day of the activity window ending at `today`.
pub fn window_start(today: NaiveDate) -> NaiveDate {
    today - chrono::Duration::days(ACTIVITY_WINDOW_DAYS - 1)
}

const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS apps (
    app_id          INTEGER PRIMARY KEY,
    name            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS playtime_records (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    app_id          INTEGER NOT NULL REFERENCES apps (app_id),
    record_date     TEXT NOT NULL,
    recorded_at     TEXT NOT NULL,
    playtime_total  INTEGER NOT NULL,
    playtime_today  INTEGER NOT NULL,
    playtime_recent INTEGER
);

CREATE INDEX IF NOT EXISTS idx_records_date ON playtime_records (record_date);
CREATE INDEX IF NOT EXISTS idx_records_app_date ON playtime_records (app_id, record_date);

-- MAX rather than the latest record, so a counter reset can't erase playtime already
-- seen that day.
CREATE VIEW IF NOT EXISTS daily_totals (app_id, record_date, minutes) AS
    SELECT app_id, record_date, MAX(playtime_today)
    FROM playtime_records
    GROUP BY app_id, record_date;
";

/// How writes behave when another process holds the database lock. `busy_timeout` is how long
/// sqlite itself waits before reporting BUSY; on top of that a write is re-run up to
/// `max_attempts` times with a growing `backoff` between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub busy_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(250),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// The main storage of the application. One instance owns one sqlite connection, and the
/// daemon routes every write through a single instance so ingestion and retention never
/// interleave.
pub struct PlaytimeStore {
    connection: Connection,
    retry: RetryPolicy,
}

impl PlaytimeStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::with_retry_policy(path, RetryPolicy::default())
    }

    pub fn with_retry_policy(path: &Path, retry: RetryPolicy) -> Result<Self, StoreError> {
        let connection = Connection::open(path)?;
        connection.execute_batch(PRAGMAS)?;
        connection.busy_timeout(retry.busy_timeout)?;
        connection.execute_batch(SCHEMA)?;

        Ok(Self { connection, retry })
    }

    /// Stores one batch of snapshots as records dated by `taken_at`. The batch goes into a
    /// single transaction, so one bad snapshot rejects all of them. Returns how many records
    /// were written.
    pub fn ingest_batch(
        &self,
        snapshots: &[AppSnapshot],
        taken_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        for snapshot in snapshots {
            validate(snapshot)?;
        }

        let deduped = dedup_last_wins(snapshots);
        let record_date = taken_at.date_naive();
        debug!("Ingesting {} snapshots for {record_date}", deduped.len());

        self.retry_write("Ingesting", || {
            self.ingest_once(&deduped, record_date, taken_at)
        })
    }

    fn ingest_once(
        &self,
        snapshots: &[&AppSnapshot],
        record_date: NaiveDate,
        taken_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let date = encode_date(record_date);
        let recorded_at = encode_datetime(taken_at);

        let tx = self.connection.unchecked_transaction()?;
        for snapshot in snapshots {
            upsert_app(&tx, snapshot)?;

            let baseline = first_total_of_day(&tx, snapshot.app_id, &date)?;
            let playtime_today =
                baseline.map_or(0, |first| (snapshot.playtime_total - first).max(0));

            tx.execute(
                "INSERT INTO playtime_records
                    (app_id, record_date, recorded_at, playtime_total, playtime_today, playtime_recent)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot.app_id,
                    &date,
                    &recorded_at,
                    snapshot.playtime_total,
                    playtime_today,
                    snapshot.playtime_recent,
                ],
            )?;
        }
        tx.commit()?;

        Ok(snapshots.len())
    }

    /// Removes records that fell out of the activity window, keeping the first and the last
    /// record of every (application, day) pair so daily totals stay derivable. Returns how
    /// many records were deleted.
    pub fn prune(&self, today: NaiveDate) -> Result<usize, StoreError> {
        let cutoff = window_start(today);
        let deleted = self.retry_write("Pruning", || self.prune_once(cutoff))?;

        if deleted > 0 {
            info!("Pruned {deleted} records older than {cutoff}");
            self.retry_write("Compacting", || self.vacuum())?;
        }

        Ok(deleted)
    }

    fn prune_once(&self, cutoff: NaiveDate) -> Result<usize, StoreError> {
        let tx = self.connection.unchecked_transaction()?;
        let deleted = tx.execute(
            "DELETE FROM playtime_records
             WHERE id NOT IN (
                SELECT id FROM playtime_records WHERE record_date >= ?1
                UNION
                SELECT MIN(id) FROM playtime_records GROUP BY app_id, record_date
                UNION
                SELECT MAX(id) FROM playtime_records GROUP BY app_id, record_date
             )",
            params![encode_date(cutoff)],
        )?;
        tx.commit()?;

        Ok(deleted)
    }

    // Vacuum can't run inside a transaction.
    fn vacuum(&self) -> Result<(), StoreError> {
        self.connection.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Builds the activity overview for `today`. Applications without a record inside the
    /// activity window are left out. Active applications sort before idle ones, then by
    /// playtime today, then by lifetime total.
    pub fn overview(&self, today: NaiveDate) -> Result<Vec<AppActivity>, StoreError> {
        let mut statement = self.connection.prepare(
            "SELECT app_id, name, playtime_total, playtime_today, playtime_week,
                    last_played, last_record_at
             FROM (
                SELECT
                    a.app_id AS app_id,
                    a.name AS name,
                    (SELECT r.playtime_total FROM playtime_records r
                     WHERE r.app_id = a.app_id
                     ORDER BY r.id DESC LIMIT 1) AS playtime_total,
                    COALESCE((SELECT r.playtime_today FROM playtime_records r
                     WHERE r.app_id = a.app_id AND r.record_date = ?1
                     ORDER BY r.id DESC LIMIT 1), 0) AS playtime_today,
                    COALESCE((SELECT SUM(d.minutes) FROM daily_totals d
                     WHERE d.app_id = a.app_id AND d.record_date >= ?2), 0) AS playtime_week,
                    (SELECT MAX(d.record_date) FROM daily_totals d
                     WHERE d.app_id = a.app_id AND d.minutes > 0) AS last_played,
                    (SELECT r.recorded_at FROM playtime_records r
                     WHERE r.app_id = a.app_id
                     ORDER BY r.id DESC LIMIT 1) AS last_record_at
                FROM apps a
                WHERE EXISTS (SELECT 1 FROM playtime_records r
                     WHERE r.app_id = a.app_id AND r.record_date >= ?2)
             )
             ORDER BY CASE WHEN playtime_today > 0 THEN 1 ELSE 2 END,
                 playtime_today DESC,
                 playtime_total DESC",
        )?;

        let rows = statement.query_map(
            params![encode_date(today), encode_date(window_start(today))],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )?;

        let mut activities = Vec::new();
        for row in rows {
            let (app_id, name, playtime_total, playtime_today, playtime_week, last_played, last_record_at) =
                row?;
            activities.push(AppActivity {
                app_id,
                name: name.into(),
                playtime_total,
                playtime_today,
                playtime_week,
                last_played: last_played.as_deref().map(read_date).transpose()?,
                last_record_at: read_datetime(&last_record_at)?,
                priority: Priority::for_playtime_today(playtime_today),
            });
        }
        Ok(activities)
    }

    /// Returns raw records of one application, newest first. `since` and `until` bound the
    /// record dates on both ends when given.
    pub fn history(
        &self,
        app_id: i64,
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> Result<Vec<PlaytimeRecord>, StoreError> {
        let mut statement = self.connection.prepare(
            "SELECT id, app_id, record_date, recorded_at, playtime_total, playtime_today, playtime_recent
             FROM playtime_records
             WHERE app_id = ?1
               AND record_date >= COALESCE(?2, record_date)
               AND record_date <= COALESCE(?3, record_date)
             ORDER BY id DESC",
        )?;

        let rows = statement.query_map(
            params![app_id, since.map(encode_date), until.map(encode_date)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                ))
            },
        )?;

        let mut records = Vec::new();
        for row in rows {
            let (id, app_id, record_date, recorded_at, playtime_total, playtime_today, playtime_recent) =
                row?;
            records.push(PlaytimeRecord {
                id,
                app_id,
                record_date: read_date(&record_date)?,
                recorded_at: read_datetime(&recorded_at)?,
                playtime_total,
                playtime_today,
                playtime_recent,
            });
        }
        Ok(records)
    }

    /// Drilldown for a single application. Returns [None] when the application was never
    /// recorded.
    pub fn app_detail(
        &self,
        app_id: i64,
        today: NaiveDate,
    ) -> Result<Option<AppDetail>, StoreError> {
        let name = self
            .connection
            .query_row(
                "SELECT name FROM apps WHERE app_id = ?1",
                params![app_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        let Some(name) = name else {
            return Ok(None);
        };

        let cutoff = encode_date(window_start(today));

        let playtime_total = self
            .connection
            .query_row(
                "SELECT playtime_total FROM playtime_records
                 WHERE app_id = ?1 ORDER BY id DESC LIMIT 1",
                params![app_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .unwrap_or(0);

        let playtime_today = self
            .connection
            .query_row(
                "SELECT playtime_today FROM playtime_records
                 WHERE app_id = ?1 AND record_date = ?2
                 ORDER BY id DESC LIMIT 1",
                params![app_id, encode_date(today)],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .unwrap_or(0);

        let playtime_week = self.connection.query_row(
            "SELECT COALESCE(SUM(minutes), 0) FROM daily_totals
             WHERE app_id = ?1 AND record_date >= ?2",
            params![app_id, &cutoff],
            |row| row.get::<_, i64>(0),
        )?;

        let last_played = self
            .connection
            .query_row(
                "SELECT record_date, minutes FROM daily_totals
                 WHERE app_id = ?1 AND minutes > 0
                 ORDER BY record_date DESC LIMIT 1",
                params![app_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        let mut statement = self.connection.prepare(
            "SELECT record_date, minutes FROM daily_totals
             WHERE app_id = ?1 AND record_date >= ?2
             ORDER BY record_date DESC",
        )?;
        let rows = statement.query_map(params![app_id, &cutoff], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut daily = Vec::new();
        for row in rows {
            let (date, minutes) = row?;
            daily.push(DailyTotal {
                date: read_date(&date)?,
                minutes,
            });
        }

        let last_played = match last_played {
            Some((date, minutes)) => Some(DailyTotal {
                date: read_date(&date)?,
                minutes,
            }),
            None => None,
        };

        Ok(Some(AppDetail {
            app_id,
            name: name.into(),
            playtime_total,
            playtime_today,
            playtime_week,
            last_played,
            daily,
        }))
    }

    /// Runs a write, sleeping and retrying a bounded number of times when another process
    /// holds the database lock.
    fn retry_write<T>(
        &self,
        operation: &str,
        mut run: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 1;
        loop {
            match run() {
                Err(error) if error.is_transient() && attempt < self.retry.max_attempts => {
                    warn!("{operation} hit a locked database on attempt {attempt}: {error}");
                    std::thread::sleep(self.retry.backoff * attempt);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn validate(snapshot: &AppSnapshot) -> Result<(), StoreError> {
    if snapshot.playtime_total < 0 {
        return Err(StoreError::Integrity(format!(
            "app {} has negative playtime_total {}",
            snapshot.app_id, snapshot.playtime_total
        )));
    }
    if snapshot.playtime_recent.is_some_and(|recent| recent < 0) {
        return Err(StoreError::Integrity(format!(
            "app {} has negative playtime_recent",
            snapshot.app_id
        )));
    }
    Ok(())
}

/// When a batch mentions the same application twice, the later snapshot wins.
fn dedup_last_wins(snapshots: &[AppSnapshot]) -> Vec<&AppSnapshot> {
    let mut seen = HashSet::new();
    let mut kept = snapshots
        .iter()
        .rev()
        .filter(|snapshot| seen.insert(snapshot.app_id))
        .collect::<Vec<_>>();
    kept.reverse();
    kept
}

fn upsert_app(connection: &Connection, snapshot: &AppSnapshot) -> Result<(), StoreError> {
    connection.execute(
        "INSERT INTO apps (app_id, name) VALUES (?1, ?2)
         ON CONFLICT (app_id) DO UPDATE SET name = excluded.name",
        params![snapshot.app_id, snapshot.name.as_ref()],
    )?;
    Ok(())
}

// Earliest by insertion order, not by recorded_at. A clock going backwards must not move
// the day's baseline.
fn first_total_of_day(
    connection: &Connection,
    app_id: i64,
    date: &str,
) -> Result<Option<i64>, StoreError> {
    let total = connection
        .query_row(
            "SELECT playtime_total FROM playtime_records
             WHERE app_id = ?1 AND record_date = ?2
             ORDER BY id ASC LIMIT 1",
            params![app_id, date],
            |row| row.get(0),
        )
        .optional()?;
    Ok(total)
}

fn read_date(raw: &str) -> Result<NaiveDate, StoreError> {
    decode_date(raw).map_err(|e| StoreError::Integrity(format!("unreadable date {raw:?}: {e}")))
}

fn read_datetime(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    decode_datetime(raw)
        .map_err(|e| StoreError::Integrity(format!("unreadable timestamp {raw:?}: {e}")))
}
