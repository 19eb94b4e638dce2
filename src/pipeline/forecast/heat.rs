use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::core::alert::{meets_alert_threshold, AlertDirective, RecipientSelector};
use crate::core::geo::CircleArea;
use crate::core::store::Store;
use crate::core::types::{ForecastResult, RiskLevel};
use crate::pipeline::features::extract_heat_features;
use crate::pipeline::forecast::{
    finish_run, forecast_date, RunReport, WIDE_BUFFER_M, WIDE_FALLBACK_DEG,
};
use crate::pipeline::scorer::heat_risk;

pub const MODEL_NAME: &str = "heat-wave-forecast";

/// Per-city heat-wave forecast from the trailing 3-day temperature anomaly.
/// Low-risk cities are not persisted; only elevated rows are worth a record.
pub fn run_heat_wave_forecast(
    store: &mut Store,
    cfg: &AppConfig,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let model = store.get_or_create_model(
        MODEL_NAME,
        "heuristic",
        "Season-shifted heat-wave thresholds over 3-day city anomalies",
        now,
    )?;

    let cities = extract_heat_features(store, cfg, now)?;
    if cities.is_empty() {
        return Ok(RunReport::empty(MODEL_NAME, "no data"));
    }

    let date = forecast_date(now, cfg.utc_offset_hours);
    let mut results = Vec::new();
    let mut alerts = Vec::new();
    for city in &cities {
        let (risk_level, confidence) = heat_risk(city.avg_anomaly, city.season);
        if risk_level == RiskLevel::Low {
            continue;
        }

        results.push(ForecastResult {
            model_id: model.id,
            forecast_date: date,
            predicted_at: now,
            affected_area: CircleArea::buffer(city.location, WIDE_BUFFER_M, WIDE_FALLBACK_DEG),
            area_name: city.city.clone(),
            risk_level,
            confidence,
            details: format!(
                "avg_temp={:.1} anomaly={:.1} samples={} season={}",
                city.avg_temperature,
                city.avg_anomaly,
                city.sample_count,
                city.season.as_str()
            ),
        });

        if meets_alert_threshold(risk_level, confidence, cfg.alert_confidence_floor) {
            alerts.push(AlertDirective::critical(
                "Heat Wave Forecast",
                format!(
                    "High heat-wave risk for {} on {}: average anomaly {:.1} degrees \
                     over {} readings.",
                    city.city, date, city.avg_anomaly, city.sample_count
                ),
                RecipientSelector::Responders,
            ));
        }
    }

    if results.is_empty() {
        return Ok(RunReport::empty(MODEL_NAME, "no elevated cities"));
    }
    finish_run(store, MODEL_NAME, results, alerts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::GeoPoint;
    use crate::core::types::WeatherObservation;

    fn hot_log(city: &str, temp: f64, hours_ago: i64, now: DateTime<Utc>) -> WeatherObservation {
        WeatherObservation {
            city_name: Some(city.to_string()),
            location: Some(GeoPoint::new(-15.40, 28.30)),
            temperature: Some(temp),
            humidity: Some(20.0),
            wind_speed: None,
            condition: "sunny".to_string(),
            rainfall_mm: None,
            recorded_at: now - chrono::Duration::hours(hours_ago),
        }
    }

    #[test]
    fn hot_dry_city_at_threshold_gets_boundary_confidence() {
        let mut store = Store::in_memory().unwrap();
        // October baseline is 31; 37 degrees is a +6 anomaly, exactly the
        // season-shifted high threshold
        let now = DateTime::parse_from_rfc3339("2025-10-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        for h in 0..6 {
            store.insert_weather_log(&hot_log("Lusaka", 37.0, h * 8, now)).unwrap();
        }

        let report = run_heat_wave_forecast(&mut store, &AppConfig::default(), now).unwrap();
        assert_eq!(report.results.len(), 1);
        let row = &report.results[0];
        assert_eq!(row.area_name, "Lusaka");
        assert_eq!(row.risk_level, RiskLevel::High);
        assert!((row.confidence - 0.6).abs() < 1e-9);
        // 0.6 sits below the default 0.75 alert floor
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn mild_cities_are_skipped_entirely() {
        let mut store = Store::in_memory().unwrap();
        let now = DateTime::parse_from_rfc3339("2025-10-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        for h in 0..6 {
            store.insert_weather_log(&hot_log("Ndola", 31.5, h * 8, now)).unwrap();
        }

        let report = run_heat_wave_forecast(&mut store, &AppConfig::default(), now).unwrap();
        assert_eq!(report.status, "no elevated cities");
        assert!(report.results.is_empty());
    }
}
