use std::fmt::Display;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use chrono_english::parse_date_string;
use clap::{CommandFactory, ValueEnum};

use crate::daemon::storage::entities::{AppActivity, AppDetail, PlaytimeRecord};

use super::Args;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct HistoryRange {
    #[arg(
        long = "start",
        short,
        help = "First day of the range. Examples are \"yesterday\", \"3 days ago\", \"15/03/2025\""
    )]
    start_date: Option<String>,
    #[arg(
        long = "end",
        short,
        help = "Last day of the range. Examples are \"yesterday\", \"3 days ago\", \"15/03/2025\""
    )]
    end_date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
}

impl HistoryRange {
    /// Turns the raw arguments into date bounds. An absent argument leaves that end open.
    pub fn resolve(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let dialect: chrono_english::Dialect = self.date_style.into();
        let since = self
            .start_date
            .as_deref()
            .map(|raw| parse_bound(raw, dialect, "start"))
            .transpose()?;
        let until = self
            .end_date
            .as_deref()
            .map(|raw| parse_bound(raw, dialect, "end"))
            .transpose()?;
        Ok((since, until))
    }
}

fn parse_bound(raw: &str, dialect: chrono_english::Dialect, which: &str) -> Result<NaiveDate> {
    match parse_date_string(raw, Local::now(), dialect) {
        Ok(v) => Ok(v.date_naive()),
        Err(e) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to validate {which} date {e}"),
            )
            .into()),
    }
}

pub fn print_activities(activities: &[AppActivity], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(activities)?);
        return Ok(());
    }

    for activity in activities {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            activity.app_id,
            format_minutes(activity.playtime_today),
            format_minutes(activity.playtime_week),
            format_minutes(activity.playtime_total),
            format_date_opt(activity.last_played),
            activity.name,
        );
    }
    Ok(())
}

pub fn print_detail(detail: &AppDetail, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(detail)?);
        return Ok(());
    }

    println!("{}\t{}", detail.app_id, detail.name);
    println!("total\t{}", format_minutes(detail.playtime_total));
    println!("today\t{}", format_minutes(detail.playtime_today));
    println!("week\t{}", format_minutes(detail.playtime_week));
    match &detail.last_played {
        Some(last) => println!(
            "last played\t{}\t{}",
            last.date.format("%x"),
            format_minutes(last.minutes)
        ),
        None => println!("last played\t-"),
    }
    for day in &detail.daily {
        println!("{}\t{}", day.date.format("%x"), format_minutes(day.minutes));
    }
    Ok(())
}

pub fn print_records(records: &[PlaytimeRecord], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    for record in records {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            record.record_date.format("%x"),
            record
                .recorded_at
                .with_timezone(&Local)
                .format("%x %H:%M:%S"),
            format_minutes(record.playtime_today),
            format_minutes(record.playtime_total),
            record
                .playtime_recent
                .map_or_else(|| "-".to_string(), format_minutes),
        );
    }
    Ok(())
}

fn format_minutes(v: i64) -> String {
    if v >= 60 {
        format!("{}h{}m", v / 60, v % 60)
    } else {
        format!("{v}m")
    }
}

fn format_date_opt(date: Option<NaiveDate>) -> String {
    date.map_or_else(|| "-".to_string(), |v| v.format("%x").to_string())
}
