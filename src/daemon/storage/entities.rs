use chrono::NaiveDate;
use chrono::Utc;

use chrono::DateTime;
use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;

use std::sync::Arc;

use crate::snapshot_api::AppSnapshot;

/// One collection cycle worth of snapshots, stamped with the moment they were taken. The whole
/// batch is written in a single transaction so it either lands completely or not at all.
#[derive(Debug, Clone)]
pub struct SnapshotBatch {
    pub snapshots: Vec<AppSnapshot>,
    pub taken_at: DateTime<Utc>,
}

/// A stored playtime measurement. `playtime_today` is derived against the first measurement of
/// `record_date`, so the latest record of a day carries everything earned that day.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct PlaytimeRecord {
    pub id: i64,
    pub app_id: i64,
    pub record_date: NaiveDate,
    pub recorded_at: DateTime<Utc>,
    pub playtime_total: i64,
    pub playtime_today: i64,
    pub playtime_recent: Option<i64>,
}

/// Aggregated view of one application over the trailing week.
#[derive(PartialEq, Eq, Debug, Serialize, Clone)]
pub struct AppActivity {
    pub app_id: i64,
    pub name: Arc<str>,
    pub playtime_total: i64,
    pub playtime_today: i64,
    pub playtime_week: i64,
    pub last_played: Option<NaiveDate>,
    pub last_record_at: DateTime<Utc>,
    pub priority: Priority,
}

/// Minutes one application earned on one day.
#[derive(PartialEq, Eq, Debug, Serialize, Clone, Copy)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub minutes: i64,
}

/// Drilldown for a single application, with the trailing week broken down by day.
/// `last_played` carries the minutes of that day as well, and may point at a day
/// older than the week window.
#[derive(PartialEq, Eq, Debug, Serialize, Clone)]
pub struct AppDetail {
    pub app_id: i64,
    pub name: Arc<str>,
    pub playtime_total: i64,
    pub playtime_today: i64,
    pub playtime_week: i64,
    pub last_played: Option<DailyTotal>,
    pub daily: Vec<DailyTotal>,
}

/// Applications that earned playtime today sort ahead of everything else.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub enum Priority {
    Active = 1,
    Idle = 2,
}

impl Priority {
    pub fn for_playtime_today(minutes: i64) -> Self {
        if minutes > 0 {
            Priority::Active
        } else {
            Priority::Idle
        }
    }

    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl Serialize for Priority {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.rank())
    }
}
