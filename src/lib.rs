//! Simple to use cli/daemon for keeping track of how long your applications are used each day.
//! Providers only expose lifetime usage counters, so the daemon records them on a schedule and
//! works out how much of that time belongs to today.
//!

pub mod cli;
pub mod daemon;
pub mod snapshot_api;
pub mod utils;
