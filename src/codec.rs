//! Line codec for the shared log.
//!
//! Canonical form, one record per line:
//!
//! ```text
//! 2025-01-31 09:15:02.123456 - alice : hello there
//! ```
//!
//! Older producers wrote an en-dash instead of the hyphen, millisecond
//! precision, or a `T` between date and time. All of those decode; only the
//! canonical form is ever encoded.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

use crate::model::Record;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const FIELD_BOUNDARY: &str = " : ";
const HYPHEN: char = '-';
const EN_DASH: char = '\u{2013}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line does not start with a timestamp")]
    MissingTimestamp,
    #[error("timestamp is not a valid date/time")]
    InvalidTimestamp,
    #[error("missing dash separator after timestamp")]
    MissingSeparator,
    #[error("missing ' : ' between sender and body")]
    MissingBoundary,
    #[error("sender is empty")]
    EmptySender,
}

/// Encode a record as one newline-terminated log line.
pub fn encode(timestamp: &NaiveDateTime, sender: &str, body: &str) -> String {
    format!(
        "{} {HYPHEN} {sender}{FIELD_BOUNDARY}{body}\n",
        timestamp.format(TIMESTAMP_FORMAT)
    )
}

pub fn encode_record(record: &Record) -> String {
    encode(&record.timestamp, &record.sender, &record.body)
}

/// Decode one log line. A trailing `\n` or `\r\n` is ignored.
pub fn decode(line: &str) -> Result<Record, ParseError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);

    let (timestamp, rest) = split_timestamp(line)?;
    let rest = strip_separator(rest)?;
    let (sender, body) = rest
        .split_once(FIELD_BOUNDARY)
        .ok_or(ParseError::MissingBoundary)?;
    let sender = sender.trim();
    if sender.is_empty() {
        return Err(ParseError::EmptySender);
    }

    Ok(Record {
        timestamp,
        sender: sender.to_string(),
        body: body.to_string(),
    })
}

fn split_timestamp(line: &str) -> Result<(NaiveDateTime, &str), ParseError> {
    let date = line.get(..10).ok_or(ParseError::MissingTimestamp)?;
    if !date.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(ParseError::MissingTimestamp);
    }
    let rest = &line[10..];
    let rest = rest
        .strip_prefix(' ')
        .or_else(|| rest.strip_prefix('T'))
        .ok_or(ParseError::MissingTimestamp)?;

    let time_len = rest
        .find(|c: char| !(c.is_ascii_digit() || c == ':' || c == '.'))
        .unwrap_or(rest.len());
    let (time, rest) = rest.split_at(time_len);
    if time.is_empty() {
        return Err(ParseError::MissingTimestamp);
    }

    let date =
        NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| ParseError::InvalidTimestamp)?;
    let time = if time.contains('.') {
        NaiveTime::parse_from_str(time, "%H:%M:%S%.f")
    } else {
        NaiveTime::parse_from_str(time, "%H:%M:%S")
    }
    .map_err(|_| ParseError::InvalidTimestamp)?;

    Ok((date.and_time(time), rest))
}

fn strip_separator(rest: &str) -> Result<&str, ParseError> {
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    let rest = rest
        .strip_prefix(HYPHEN)
        .or_else(|| rest.strip_prefix(EN_DASH))
        .ok_or(ParseError::MissingSeparator)?;
    rest.strip_prefix(' ').ok_or(ParseError::MissingSeparator)
}

static LAST_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Local wall-clock time truncated to microseconds, never earlier than the
/// previous value handed out by this process.
pub fn now() -> NaiveDateTime {
    let current = Local::now().naive_local().and_utc().timestamp_micros();
    let previous = LAST_MICROS.fetch_max(current, Ordering::SeqCst);
    let micros = previous.max(current);
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .unwrap_or_else(|| Local::now().naive_local())
}
