use chrono::{DateTime, NaiveDate, ParseResult, Utc};

/// This is the standard way of converting a date to a string in playtally. The format sorts
/// lexicographically in date order, which the sql range filters rely on.
pub fn encode_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn decode_date(raw: &str) -> ParseResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
}

/// Timestamps are stored as rfc3339 text so that they stay readable with plain sql tools.
pub fn encode_datetime(moment: DateTime<Utc>) -> String {
    moment.to_rfc3339()
}

pub fn decode_datetime(raw: &str) -> ParseResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
