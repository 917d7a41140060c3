//! Contains logic for fetching usage snapshots from an external provider.
//! [SnapshotSource] is the contract of this module, [CommandSource](command::CommandSource)
//! is the main realization that shells out to a user supplied command.

pub mod command;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One application's usage counters as reported by a provider. Counters are cumulative, the
/// provider never reports per day values itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSnapshot {
    pub app_id: i64,
    pub name: Arc<str>,
    /// Minutes across the whole lifetime of the application.
    #[serde(alias = "playtime_forever")]
    pub playtime_total: i64,
    /// Minutes over the provider's own recent window, if it reports one.
    #[serde(default, alias = "playtime_2weeks")]
    pub playtime_recent: Option<i64>,
}

/// Intended to serve as a contract every snapshot provider must implement.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + 'static {
    /// Produces the current snapshot of every application the provider knows about.
    async fn fetch(&mut self) -> Result<Vec<AppSnapshot>>;
}

/// Parses a provider payload, which is expected to be a json array of snapshots.
pub fn parse_snapshots(payload: &str) -> Result<Vec<AppSnapshot>> {
    serde_json::from_str(payload).context("Payload wasn't a json array of snapshots")
}
