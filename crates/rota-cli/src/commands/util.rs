//! Shared utilities for CLI commands.

use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use regex::Regex;
use rota_core::TimeInterval;

/// Pre-compiled regex for relative time parsing.
static RELATIVE_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:in\s+(\d+)\s+(minute|hour|day|week)s?|(\d+)\s+(minute|hour|day|week)s?\s+ago)$")
        .unwrap()
});

/// Conservative bounds for relative time parsing (~1000 years in minutes).
const MAX_RELATIVE_MINUTES: i64 = 1000 * 365 * 24 * 60;

/// Parse a datetime string as ISO 8601, `now`, or a time relative to `now`.
///
/// Supports:
/// - ISO 8601: "2026-03-02T14:00:00Z"
/// - Future: "in 2 hours", "in 30 minutes", "in 1 day"
/// - Past: "2 hours ago", "1 week ago"
pub fn parse_datetime(s: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if s == "now" {
        return Ok(now);
    }

    let Some(caps) = RELATIVE_TIME_RE.captures(s) else {
        bail!(
            "Invalid datetime: {s}. Use ISO 8601 (e.g., 2026-03-02T14:00:00Z) or relative (e.g., 'in 2 hours', '30 minutes ago')"
        );
    };
    let (future, number, unit) = match (caps.get(1), caps.get(2)) {
        (Some(n), Some(unit)) => (true, n.as_str(), unit.as_str()),
        _ => (false, &caps[3], &caps[4]),
    };

    let n: i64 = number
        .parse()
        .context("failed to parse number in relative time")?;

    let (max_for_unit, minutes_per_unit) = match unit {
        "minute" => (MAX_RELATIVE_MINUTES, 1),
        "hour" => (MAX_RELATIVE_MINUTES / 60, 60),
        "day" => (MAX_RELATIVE_MINUTES / (60 * 24), 60 * 24),
        "week" => (MAX_RELATIVE_MINUTES / (60 * 24 * 7), 60 * 24 * 7),
        unit => bail!("Unknown time unit: {unit}"),
    };
    if n > max_for_unit {
        bail!("Relative time value too large: {n} {unit}");
    }

    let offset = Duration::minutes(n * minutes_per_unit);
    Ok(if future { now + offset } else { now - offset })
}

/// Parses a start/end pair into a non-empty interval.
pub fn parse_interval(start: &str, end: &str, now: DateTime<Utc>) -> Result<TimeInterval> {
    let start = parse_datetime(start, now).context("invalid --start")?;
    let end = parse_datetime(end, now).context("invalid --end")?;
    TimeInterval::new(start, end).with_context(|| {
        format!(
            "end ({}) must be after start ({})",
            format_time(end),
            format_time(start)
        )
    })
}

/// Compact UTC timestamp for terminal output.
pub fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn format_interval(interval: &TimeInterval) -> String {
    format!("{} - {}", format_time(interval.start), format_time(interval.end))
}

/// Writes `value` as pretty JSON followed by a newline.
pub fn write_json<W: std::io::Write, T: serde::Serialize>(writer: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, value)?;
    writeln!(writer)?;
    Ok(())
}
