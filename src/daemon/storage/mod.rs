//!  Storage is organized through [playtime_store::PlaytimeStore].
//!  The basic idea is:
//!   - One sqlite database holds every application and its playtime records.
//!   - A record stores the cumulative counter at one moment plus the minutes earned that UTC day.
//!   - Daily totals are derived as the best per day value, so old days can be thinned out to
//!     their first and last record without losing them.

pub mod entities;
pub mod error;
pub mod playtime_store;
