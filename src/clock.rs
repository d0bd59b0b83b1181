use crate::models::EpochMillis;
use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use std::sync::Arc;

/// Source of "now" in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> EpochMillis + Send + Sync>;

pub const MINUTE_MS: i64 = 60_000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;

pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp_millis())
}

pub fn fixed_clock(at: EpochMillis) -> Clock {
    Arc::new(move || at)
}

/// Local date and time, or "Time unknown" for a zero timestamp.
pub fn format_when(ms: EpochMillis) -> String {
    if ms == 0 {
        return "Time unknown".to_string();
    }
    match Local.timestamp_millis_opt(ms).single() {
        Some(at) => at.format("%d/%m/%Y, %H:%M:%S").to_string(),
        None => "Time unknown".to_string(),
    }
}

pub fn format_time_of_day(ms: EpochMillis) -> String {
    match Local.timestamp_millis_opt(ms).single() {
        Some(at) => at.format("%H:%M:%S").to_string(),
        None => "--:--:--".to_string(),
    }
}

/// Parses a `YYYY-MM-DDTHH:MM` (or `YYYY-MM-DD HH:MM`) local time.
pub fn parse_local_datetime(value: &str) -> Option<EpochMillis> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let naive = ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|at| at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::{format_when, parse_local_datetime};

    #[test]
    fn zero_timestamp_is_unknown() {
        assert_eq!(format_when(0), "Time unknown");
    }

    #[test]
    fn parses_datetime_local_input() {
        let parsed = parse_local_datetime("2026-03-01T14:30").expect("parse");
        let round_trip = format_when(parsed);
        assert!(round_trip.starts_with("01/03/2026, 14:30"));
        assert!(parse_local_datetime("").is_none());
        assert!(parse_local_datetime("yesterday").is_none());
    }
}
