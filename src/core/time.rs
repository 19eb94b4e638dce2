use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Duration, FixedOffset, Utc};

/// Current UTC time, overridable via `HW_FIXED_TIME` (RFC 3339) for
/// deterministic runs and replayable tests.
pub fn now_utc() -> DateTime<Utc> {
    if let Ok(value) = std::env::var("HW_FIXED_TIME") {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
            return dt.with_timezone(&Utc);
        }
    }
    Utc::now()
}

/// Shift an instant into the deployment's local timezone. Season boundaries
/// are calendar-local, so every month lookup goes through this.
pub fn to_local(dt: DateTime<Utc>, utc_offset_hours: i32) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
    dt.with_timezone(&offset)
}

/// Calendar month (1-12) of an instant in local time.
pub fn local_month(dt: DateTime<Utc>, utc_offset_hours: i32) -> u32 {
    to_local(dt, utc_offset_hours).month()
}

pub fn parse_window(value: &str) -> Result<Duration> {
    let trimmed = value.trim().to_lowercase();
    if let Some(days_str) = trimmed.strip_suffix('d') {
        let days: i64 = days_str
            .parse()
            .map_err(|_| anyhow!("invalid window: {}", value))?;
        if matches!(days, 7 | 30) {
            return Ok(Duration::days(days));
        }
    }
    Err(anyhow!("invalid window (use 7d|30d): {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_month_crosses_date_line() {
        // 23:30 UTC on Jan 31 is already February at UTC+2.
        let dt = DateTime::parse_from_rfc3339("2025-01-31T23:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(local_month(dt, 2), 2);
        assert_eq!(local_month(dt, 0), 1);
    }

    #[test]
    fn window_accepts_known_tags() {
        assert_eq!(parse_window("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_window("30d").unwrap(), Duration::days(30));
        assert!(parse_window("90d").is_err());
        assert!(parse_window("week").is_err());
    }
}
