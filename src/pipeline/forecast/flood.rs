use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::core::alert::{meets_alert_threshold, AlertDirective, RecipientSelector};
use crate::core::geo::CircleArea;
use crate::core::store::Store;
use crate::core::types::ForecastResult;
use crate::pipeline::features::extract_flood_features;
use crate::pipeline::forecast::{
    finish_run, forecast_date, RunReport, FLOOD_BUFFER_M, FLOOD_FALLBACK_DEG,
};
use crate::pipeline::scorer::{risk_bucket, score_flood_cell};

pub const MODEL_NAME: &str = "flood-forecast";

/// Regional flood forecast over the trailing 24/72h rain cells.
pub fn run_flood_forecast(
    store: &mut Store,
    cfg: &AppConfig,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let model = store.get_or_create_model(
        MODEL_NAME,
        "heuristic",
        "Season-weighted flood risk from recent rainfall cells",
        now,
    )?;

    let cells = extract_flood_features(store, cfg, now)?;
    if cells.is_empty() {
        return Ok(RunReport::empty(MODEL_NAME, "no data"));
    }

    let date = forecast_date(now, cfg.utc_offset_hours);
    let mut results = Vec::new();
    let mut alerts = Vec::new();
    for cell in &cells {
        let score = score_flood_cell(cell);
        let (risk_level, confidence) = risk_bucket(score);
        let area_name = format!("Cell ({:.2}, {:.2})", cell.location.lat, cell.location.lon);

        results.push(ForecastResult {
            model_id: model.id,
            forecast_date: date,
            predicted_at: now,
            affected_area: CircleArea::buffer(cell.location, FLOOD_BUFFER_M, FLOOD_FALLBACK_DEG),
            area_name: area_name.clone(),
            risk_level,
            confidence,
            details: format!(
                "rain24={} rain72={} flag={} anomaly={:.1} history={} season={}",
                cell.rainfall_recent_24h,
                cell.rainfall_recent_72h,
                cell.rain_flag,
                cell.temp_anomaly,
                cell.flood_history,
                cell.season.as_str()
            ),
        });

        if meets_alert_threshold(risk_level, confidence, cfg.alert_confidence_floor) {
            alerts.push(AlertDirective::critical(
                "Flood Risk Forecast",
                format!(
                    "High flood risk forecast for {} on {} (confidence {:.0}%).",
                    area_name,
                    date,
                    confidence * 100.0
                ),
                RecipientSelector::Responders,
            ));
        }
    }

    finish_run(store, MODEL_NAME, results, alerts)
}
