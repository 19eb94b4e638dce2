use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::config::AppConfig;
use crate::core::alert::{
    meets_alert_threshold, severity_for_risk, AlertDirective, AlertSeverity, RecipientSelector,
};
use crate::core::geo::{CircleArea, GeoPoint};
use crate::core::season::{
    is_rainy_season, next_month, rainy_window, season_of, season_weights, Season,
};
use crate::core::store::Store;
use crate::core::time::{local_month, to_local};
use crate::core::types::{City, ForecastResult, RiskLevel, WeatherObservation};
use crate::pipeline::features::distinct_rainy_days;
use crate::pipeline::features::rain_indicator;
use crate::pipeline::forecast::{
    finish_run, forecast_date, RunReport, ADVISORY_BUFFER_M, ADVISORY_FALLBACK_DEG,
    WIDE_BUFFER_M, WIDE_FALLBACK_DEG,
};
use crate::pipeline::scorer::expected_rainfall_risk;

pub const RAIN_CHECK_MODEL: &str = "seasonal-rain-check";
pub const MONTHLY_MODEL: &str = "monthly-rainfall-trend";
pub const ANOMALY_MODEL: &str = "rainy-season-anomaly";
pub const OUTLOOK_MODEL: &str = "seasonal-outlook";

const HISTORY_YEARS: i32 = 5;
/// Dec-Mar core of the rainy season.
const OUTLOOK_MONTHS: [u32; 4] = [12, 1, 2, 3];

fn city_point(city: &City) -> GeoPoint {
    GeoPoint::new(city.lat, city.lon)
}

fn city_logs<'a>(logs: &'a [WeatherObservation], city: &City) -> Vec<&'a WeatherObservation> {
    logs.iter()
        .filter(|l| {
            l.city_name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(&city.name))
        })
        .collect()
}

/// Mid-season advisory: during the rainy season, flag cities whose trailing
/// 14 days fall short of the expected rain-day pace. A no-op outside the
/// rainy season by policy, not by failure.
pub fn run_seasonal_rain_check(
    store: &mut Store,
    cfg: &AppConfig,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let month = local_month(now, cfg.utc_offset_hours);
    if !is_rainy_season(month) {
        return Ok(RunReport::empty(RAIN_CHECK_MODEL, "out of season"));
    }
    let model = store.get_or_create_model(
        RAIN_CHECK_MODEL,
        "heuristic",
        "Mid-season advisory for cities behind the expected rain-day pace",
        now,
    )?;

    let logs = store.weather_since(now - Duration::days(14))?;
    if logs.is_empty() {
        return Ok(RunReport::empty(RAIN_CHECK_MODEL, "no data"));
    }

    let expected_week = season_weights(Season::Rainy).expected_rain_days_per_week;
    // two weeks of pace, minus one day of slack
    let threshold = (expected_week * 2).saturating_sub(1) as usize;

    let date = forecast_date(now, cfg.utc_offset_hours);
    let mut results = Vec::new();
    let mut alerts = Vec::new();
    for city in &cfg.cities {
        let observed = distinct_rainy_days(&city_logs(&logs, city), cfg.utc_offset_hours);
        if observed >= threshold {
            continue;
        }

        results.push(ForecastResult {
            model_id: model.id,
            forecast_date: date,
            predicted_at: now,
            affected_area: CircleArea::buffer(
                city_point(city),
                ADVISORY_BUFFER_M,
                ADVISORY_FALLBACK_DEG,
            ),
            area_name: city.name.clone(),
            risk_level: RiskLevel::High,
            confidence: 0.9,
            details: format!(
                "distinct_rainy_days_14d={observed} threshold={threshold} month={month}"
            ),
        });
        alerts.push(AlertDirective::critical(
            "Rainy Season Shortfall",
            format!(
                "{} recorded {} distinct rainy days in the last 14 days; \
                 at least {} expected at this point of the season.",
                city.name, observed, threshold
            ),
            RecipientSelector::Responders,
        ));
    }

    if results.is_empty() {
        return Ok(RunReport::empty(RAIN_CHECK_MODEL, "all cities on pace"));
    }
    finish_run(store, RAIN_CHECK_MODEL, results, alerts)
}

/// Forecast the coming local month's rainfall per city against its own
/// multi-year history for that month.
pub fn run_monthly_rainfall_forecast(
    store: &mut Store,
    cfg: &AppConfig,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let model = store.get_or_create_model(
        MONTHLY_MODEL,
        "heuristic",
        "Next-month rainfall trend from per-city multi-year history",
        now,
    )?;

    let current = local_month(now, cfg.utc_offset_hours);
    let target = next_month(current);
    let season = season_of(target);

    let local = to_local(now, cfg.utc_offset_hours);
    let target_year = if current == 12 { local.year() + 1 } else { local.year() };
    let date = NaiveDate::from_ymd_opt(target_year, target, 1)
        .unwrap_or_else(|| local.date_naive());

    let mut results = Vec::new();
    let mut alerts = Vec::new();
    for city in &cfg.cities {
        let Some(avg_days) = crate::pipeline::features::monthly_rainfall_history(
            store,
            &city.name,
            target,
            HISTORY_YEARS,
            now,
            cfg.utc_offset_hours,
        )?
        else {
            continue;
        };
        let (risk_level, confidence, baseline) = expected_rainfall_risk(avg_days, season);

        results.push(ForecastResult {
            model_id: model.id,
            forecast_date: date,
            predicted_at: now,
            affected_area: CircleArea::buffer(
                city_point(city),
                WIDE_BUFFER_M,
                WIDE_FALLBACK_DEG,
            ),
            area_name: city.name.clone(),
            risk_level,
            confidence,
            details: format!(
                "target_month={target} avg_rainy_days={avg_days:.2} baseline={baseline} season={}",
                season.as_str()
            ),
        });

        if risk_level >= RiskLevel::Medium {
            let severity = severity_for_risk(risk_level);
            let title = "Monthly Rainfall Outlook";
            let message = format!(
                "{} is trending {} for {}-{:02}: {:.1} historical rainy days \
                 against a seasonal baseline of {}.",
                city.name,
                if risk_level == RiskLevel::High { "well below normal" } else { "below normal" },
                target_year,
                target,
                avg_days,
                baseline
            );
            alerts.push(match severity {
                AlertSeverity::Critical => {
                    AlertDirective::critical(title, message, RecipientSelector::Responders)
                }
                _ => AlertDirective::warning(title, message, RecipientSelector::Responders),
            });
        }
    }

    if results.is_empty() {
        return Ok(RunReport::empty(MONTHLY_MODEL, "no data"));
    }
    finish_run(store, MONTHLY_MODEL, results, alerts)
}

/// During the rainy season, flag cities whose trailing 14 days are anomalously
/// dry against the full expected pace. Cities with no recent observations are
/// skipped rather than flagged on silence.
pub fn run_rainy_season_anomaly(
    store: &mut Store,
    cfg: &AppConfig,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let month = local_month(now, cfg.utc_offset_hours);
    if !is_rainy_season(month) {
        return Ok(RunReport::empty(ANOMALY_MODEL, "out of season"));
    }
    let model = store.get_or_create_model(
        ANOMALY_MODEL,
        "heuristic",
        "Dry-spell anomaly detection per city inside the rainy season",
        now,
    )?;

    let logs = store.weather_since(now - Duration::days(14))?;
    if logs.is_empty() {
        return Ok(RunReport::empty(ANOMALY_MODEL, "no data"));
    }
    // two weeks of expected pace with the same one-day slack as the
    // mid-season rain check
    let threshold = (season_weights(Season::Rainy).expected_rain_days_per_week * 2)
        .saturating_sub(1) as usize;

    let date = forecast_date(now, cfg.utc_offset_hours);
    let mut results = Vec::new();
    let mut alerts = Vec::new();
    for city in &cfg.cities {
        let observations = city_logs(&logs, city);
        if observations.is_empty() {
            continue;
        }
        let observed = distinct_rainy_days(&observations, cfg.utc_offset_hours);
        if observed >= threshold {
            continue;
        }

        let risk_level = RiskLevel::High;
        let confidence = 0.8;
        results.push(ForecastResult {
            model_id: model.id,
            forecast_date: date,
            predicted_at: now,
            affected_area: CircleArea::buffer(
                city_point(city),
                ADVISORY_BUFFER_M,
                ADVISORY_FALLBACK_DEG,
            ),
            area_name: city.name.clone(),
            risk_level,
            confidence,
            details: format!(
                "distinct_rainy_days_14d={observed} expected={threshold} month={month}"
            ),
        });
        alerts.push(AlertDirective::critical(
            "Rainy Season Anomaly",
            format!(
                "Anomalous dry spell in {}: {} distinct rainy days over 14 days \
                 against an expected {}.",
                city.name, observed, threshold
            ),
            RecipientSelector::Responders,
        ));
    }

    if results.is_empty() {
        return Ok(RunReport::empty(ANOMALY_MODEL, "no anomalies"));
    }
    finish_run(store, ANOMALY_MODEL, results, alerts)
}

/// Classify the current rainy season per city from the distinct rainy days
/// accumulated over its Dec-Mar core, against the seasonal baseline.
pub fn run_seasonal_outlook(
    store: &mut Store,
    cfg: &AppConfig,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let model = store.get_or_create_model(
        OUTLOOK_MODEL,
        "heuristic",
        "Season-total rainy-day classification of the current rainy window",
        now,
    )?;

    let (start, end) = rainy_window(now, cfg.utc_offset_hours);
    let logs = store.weather_between(start, end.min(now))?;
    if logs.is_empty() {
        return Ok(RunReport::empty(OUTLOOK_MODEL, "no data"));
    }

    let expected_week = season_weights(Season::Rainy).expected_rain_days_per_week;
    let baseline = (expected_week * 4 * OUTLOOK_MONTHS.len() as u32) as f64;
    let date = to_local(end, cfg.utc_offset_hours).date_naive();

    let mut results = Vec::new();
    let mut failed_cities = Vec::new();
    for city in &cfg.cities {
        let observations = city_logs(&logs, city);
        if observations.is_empty() {
            continue;
        }

        let mut rainy_dates: BTreeSet<NaiveDate> = BTreeSet::new();
        for &log in &observations {
            let local = to_local(log.recorded_at, cfg.utc_offset_hours);
            if OUTLOOK_MONTHS.contains(&local.month()) && rain_indicator(log) {
                rainy_dates.insert(local.date_naive());
            }
        }
        let total = rainy_dates.len() as f64;
        let ratio = total / baseline;
        let (verdict, risk_level, confidence) = if ratio < 0.50 {
            ("failed", RiskLevel::High, (0.7 + (0.50 - ratio) * 0.6).min(1.0))
        } else if ratio < 0.80 {
            ("delayed", RiskLevel::Medium, (0.5 + (0.80 - ratio) * 0.6).min(0.9))
        } else {
            ("normal", RiskLevel::Low, 0.6)
        };

        if meets_alert_threshold(risk_level, confidence, cfg.alert_confidence_floor) {
            failed_cities.push(city.name.clone());
        }
        results.push(ForecastResult {
            model_id: model.id,
            forecast_date: date,
            predicted_at: now,
            affected_area: CircleArea::buffer(
                city_point(city),
                WIDE_BUFFER_M,
                WIDE_FALLBACK_DEG,
            ),
            area_name: city.name.clone(),
            risk_level,
            confidence,
            details: format!(
                "verdict={verdict} rainy_days={total:.0} baseline={baseline:.0} ratio={ratio:.2}"
            ),
        });
    }

    if results.is_empty() {
        return Ok(RunReport::empty(OUTLOOK_MODEL, "no data"));
    }
    let alerts = if failed_cities.is_empty() {
        Vec::new()
    } else {
        vec![AlertDirective::critical(
            "Seasonal Outlook: Rains Failing",
            format!(
                "The current rainy season is failing in: {}.",
                failed_cities.join(", ")
            ),
            RecipientSelector::Global,
        )]
    };
    finish_run(store, OUTLOOK_MODEL, results, alerts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(city: &str, condition: &str, rain_mm: Option<f64>, at: DateTime<Utc>) -> WeatherObservation {
        WeatherObservation {
            city_name: Some(city.to_string()),
            location: Some(GeoPoint::new(-15.40, 28.30)),
            temperature: Some(26.0),
            humidity: Some(70.0),
            wind_speed: None,
            condition: condition.to_string(),
            rainfall_mm: rain_mm,
            recorded_at: at,
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn gated_generators_noop_in_june() {
        let mut store = Store::in_memory().unwrap();
        let cfg = AppConfig::default();
        let june = ts("2025-06-15T12:00:00Z");
        store.insert_weather_log(&log("Lusaka", "light rain", Some(3.0), june)).unwrap();

        let check = run_seasonal_rain_check(&mut store, &cfg, june).unwrap();
        assert_eq!(check.status, "out of season");
        assert!(check.results.is_empty());

        let anomaly = run_rainy_season_anomaly(&mut store, &cfg, june).unwrap();
        assert_eq!(anomaly.status, "out of season");
        assert!(anomaly.results.is_empty());
    }

    #[test]
    fn rain_check_flags_dry_cities_at_high_nine_tenths() {
        let mut store = Store::in_memory().unwrap();
        let cfg = AppConfig::default();
        let now = ts("2026-01-20T12:00:00Z");
        // Lusaka: 6 distinct rainy days, on pace. Ndola: 2, behind.
        for d in 0..6 {
            store
                .insert_weather_log(&log("Lusaka", "rain", Some(5.0), now - Duration::days(d)))
                .unwrap();
        }
        for d in 0..2 {
            store
                .insert_weather_log(&log("Ndola", "thunderstorm", None, now - Duration::days(d)))
                .unwrap();
        }

        let report = run_seasonal_rain_check(&mut store, &cfg, now).unwrap();
        let names: Vec<&str> = report.results.iter().map(|r| r.area_name.as_str()).collect();
        assert!(names.contains(&"Ndola"));
        assert!(!names.contains(&"Lusaka"));
        assert!(report.results.iter().all(|r| r.risk_level == RiskLevel::High));
        assert!(report.results.iter().all(|r| r.confidence == 0.9));
        assert_eq!(report.alerts.len(), report.results.len());
    }

    #[test]
    fn anomaly_skips_cities_without_observations() {
        let mut store = Store::in_memory().unwrap();
        let cfg = AppConfig::default();
        let now = ts("2026-01-20T12:00:00Z");
        // only one city reports at all, and it is dry
        store
            .insert_weather_log(&log("Lusaka", "clear sky", Some(0.0), now - Duration::days(1)))
            .unwrap();

        let report = run_rainy_season_anomaly(&mut store, &cfg, now).unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].area_name, "Lusaka");
        assert_eq!(report.results[0].confidence, 0.8);
        assert_eq!(report.results[0].risk_level, RiskLevel::High);
    }

    #[test]
    fn anomaly_tolerates_one_day_short_of_pace() {
        let mut store = Store::in_memory().unwrap();
        let cfg = AppConfig::default();
        let now = ts("2026-01-20T12:00:00Z");
        // exactly 5 distinct rainy days in 14: one under the full pace of 6,
        // which the slack absorbs
        for d in 0..5 {
            store
                .insert_weather_log(&log("Lusaka", "rain", Some(6.0), now - Duration::days(d * 2)))
                .unwrap();
        }
        let report = run_rainy_season_anomaly(&mut store, &cfg, now).unwrap();
        assert_eq!(report.status, "no anomalies");
        assert!(report.results.is_empty());

        // four days is genuinely behind and gets flagged
        let mut behind = Store::in_memory().unwrap();
        for d in 0..4 {
            behind
                .insert_weather_log(&log("Lusaka", "rain", Some(6.0), now - Duration::days(d * 2)))
                .unwrap();
        }
        let report = run_rainy_season_anomaly(&mut behind, &cfg, now).unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].area_name, "Lusaka");
    }

    #[test]
    fn outlook_classifies_failed_season_globally() {
        let mut store = Store::in_memory().unwrap();
        let cfg = AppConfig::default();
        let now = ts("2026-03-20T12:00:00Z");
        // 10 distinct rainy days across Dec-Mar: ratio 10/48 < 0.5
        for d in 0..10 {
            store
                .insert_weather_log(&log(
                    "Lusaka",
                    "rain showers",
                    Some(4.0),
                    ts("2026-01-05T10:00:00Z") + Duration::days(d * 3),
                ))
                .unwrap();
        }

        let report = run_seasonal_outlook(&mut store, &cfg, now).unwrap();
        assert_eq!(report.results.len(), 1);
        let row = &report.results[0];
        assert_eq!(row.risk_level, RiskLevel::High);
        assert!(row.details.contains("verdict=failed"));
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].recipients, RecipientSelector::Global);
    }

    #[test]
    fn monthly_forecast_skips_cities_without_history() {
        let mut store = Store::in_memory().unwrap();
        let cfg = AppConfig::default();
        let report =
            run_monthly_rainfall_forecast(&mut store, &cfg, ts("2026-01-20T12:00:00Z")).unwrap();
        assert_eq!(report.status, "no data");
    }
}
