use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::core::time::to_local;

/// Calendar season for the deployment region. Rainy runs Nov-Apr,
/// cool dry May-Aug, hot dry Sep-Oct.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Rainy,
    CoolDry,
    HotDry,
}

impl Season {
    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Rainy => "rainy",
            Season::CoolDry => "cool_dry",
            Season::HotDry => "hot_dry",
        }
    }
}

/// Fixed per-season scoring constants.
#[derive(Debug, Clone, Copy)]
pub struct SeasonWeights {
    pub flood_mult: f64,
    pub drought_mult: f64,
    /// Rainy days expected in a trailing 7-day window; used to gauge deficit.
    pub expected_rain_days_per_week: u32,
}

pub fn season_of(month: u32) -> Season {
    match month {
        11 | 12 | 1..=4 => Season::Rainy,
        5..=8 => Season::CoolDry,
        9 | 10 => Season::HotDry,
        _ => unreachable!("month out of range: {month}"),
    }
}

pub fn season_weights(season: Season) -> SeasonWeights {
    match season {
        Season::Rainy => SeasonWeights {
            flood_mult: 1.25,
            drought_mult: 0.75,
            expected_rain_days_per_week: 3,
        },
        Season::CoolDry => SeasonWeights {
            flood_mult: 0.85,
            drought_mult: 1.0,
            expected_rain_days_per_week: 1,
        },
        Season::HotDry => SeasonWeights {
            flood_mult: 0.75,
            drought_mult: 1.25,
            expected_rain_days_per_week: 0,
        },
    }
}

pub fn is_rainy_season(month: u32) -> bool {
    season_of(month) == Season::Rainy
}

/// Long-term mean temperature (degrees C) per calendar month.
const MONTHLY_TEMP_BASELINE: [f64; 12] = [
    28.0, 28.0, 27.0, 26.0, 24.0, 22.0, 22.0, 24.0, 29.0, 31.0, 30.0, 29.0,
];

pub fn monthly_baseline(month: u32) -> f64 {
    MONTHLY_TEMP_BASELINE[(month as usize - 1) % 12]
}

/// Observed temperature minus the monthly baseline. Missing temperature
/// resolves to a neutral 0.0 anomaly.
pub fn temp_anomaly(temp: Option<f64>, month: u32) -> f64 {
    match temp {
        Some(t) => t - monthly_baseline(month),
        None => 0.0,
    }
}

pub fn next_month(month: u32) -> u32 {
    if month == 12 {
        1
    } else {
        month + 1
    }
}

/// UTC bounds of the rainy-season window (Nov 1 -> Apr 30 local) that
/// contains `now`. The window spans a calendar year boundary.
pub fn rainy_window(now: DateTime<Utc>, utc_offset_hours: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    let local = to_local(now, utc_offset_hours);
    let year = local.year();
    let (start_year, end_year) = if local.month() >= 11 {
        (year, year + 1)
    } else {
        (year - 1, year)
    };
    let tz = local.timezone();
    let start = tz
        .with_ymd_and_hms(start_year, 11, 1, 0, 0, 0)
        .single()
        .expect("valid rainy window start");
    let end = tz
        .with_ymd_and_hms(end_year, 4, 30, 23, 59, 59)
        .single()
        .expect("valid rainy window end");
    (start.with_timezone(&Utc), end.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn season_is_total_over_months() {
        for month in 1..=12 {
            let season = season_of(month);
            assert_eq!(season, season_of(month), "mapping must be stable");
        }
        assert_eq!(season_of(11), Season::Rainy);
        assert_eq!(season_of(4), Season::Rainy);
        assert_eq!(season_of(6), Season::CoolDry);
        assert_eq!(season_of(9), Season::HotDry);
        assert_eq!(season_of(10), Season::HotDry);
    }

    #[test]
    fn weights_match_season_table() {
        assert_eq!(season_weights(Season::Rainy).flood_mult, 1.25);
        assert_eq!(season_weights(Season::HotDry).drought_mult, 1.25);
        assert_eq!(season_weights(Season::HotDry).expected_rain_days_per_week, 0);
    }

    #[test]
    fn anomaly_uses_monthly_baseline() {
        assert_eq!(temp_anomaly(Some(34.0), 10), 3.0);
        assert_eq!(temp_anomaly(Some(22.0), 6), 0.0);
        assert_eq!(temp_anomaly(None, 1), 0.0);
    }

    #[test]
    fn rainy_window_spans_year_boundary() {
        let feb = DateTime::parse_from_rfc3339("2025-02-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (start, end) = rainy_window(feb, 2);
        assert_eq!(start.with_timezone(&chrono::FixedOffset::east_opt(7200).unwrap()).year(), 2024);
        assert!(start < feb && feb < end);

        let dec = DateTime::parse_from_rfc3339("2025-12-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let (start, end) = rainy_window(dec, 2);
        assert!(start < dec && dec < end);
    }
}
