use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::AppConfig;
use crate::core::alert::AlertDirective;
use crate::core::store::Store;
use crate::core::types::ForecastResult;

mod drought;
mod flood;
mod heat;
mod seasonal;

pub use drought::run_drought_forecast;
pub use flood::run_flood_forecast;
pub use heat::run_heat_wave_forecast;
pub use seasonal::{
    run_monthly_rainfall_forecast, run_rainy_season_anomaly, run_seasonal_outlook,
    run_seasonal_rain_check,
};

/// Footprint buffers per hazard, in meters on the ground, with the fixed
/// degree fallback used when geometry degenerates.
pub(crate) const FLOOD_BUFFER_M: f64 = 3_000.0;
pub(crate) const FLOOD_FALLBACK_DEG: f64 = 0.01;
pub(crate) const DROUGHT_BUFFER_M: f64 = 5_000.0;
pub(crate) const DROUGHT_FALLBACK_DEG: f64 = 0.02;
pub(crate) const ADVISORY_BUFFER_M: f64 = 8_000.0;
pub(crate) const ADVISORY_FALLBACK_DEG: f64 = 0.04;
pub(crate) const WIDE_BUFFER_M: f64 = 10_000.0;
pub(crate) const WIDE_FALLBACK_DEG: f64 = 0.05;

/// Outcome of one generator run. The status string is what an external
/// scheduler logs; alerts are emitted only after the rows are committed.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub model: String,
    pub status: String,
    pub results: Vec<ForecastResult>,
    pub alerts: Vec<AlertDirective>,
}

impl RunReport {
    pub(crate) fn empty(model: &str, status: impl Into<String>) -> Self {
        Self {
            model: model.to_string(),
            status: status.into(),
            results: Vec::new(),
            alerts: Vec::new(),
        }
    }
}

/// Commit a run's rows, then release its alerts. A write failure propagates
/// and suppresses every alert for the run.
pub(crate) fn finish_run(
    store: &mut Store,
    model: &str,
    results: Vec<ForecastResult>,
    alerts: Vec<AlertDirective>,
) -> Result<RunReport> {
    store.insert_forecast_results(&results)?;
    let status = format!("{} results, {} alerts", results.len(), alerts.len());
    info!(model, %status, "forecast run finished");
    Ok(RunReport {
        model: model.to_string(),
        status,
        results,
        alerts,
    })
}

/// Forecast rows are stamped with the current local calendar date.
pub(crate) fn forecast_date(now: DateTime<Utc>, utc_offset_hours: i32) -> chrono::NaiveDate {
    crate::core::time::to_local(now, utc_offset_hours).date_naive()
}

/// Run every generator in a fixed order, collecting the per-run reports.
/// One failing run aborts the batch; the scheduler retries the whole batch.
pub fn run_all(store: &mut Store, cfg: &AppConfig, now: DateTime<Utc>) -> Result<Vec<RunReport>> {
    Ok(vec![
        run_flood_forecast(store, cfg, now)?,
        run_drought_forecast(store, cfg, now)?,
        run_heat_wave_forecast(store, cfg, now)?,
        run_seasonal_rain_check(store, cfg, now)?,
        run_monthly_rainfall_forecast(store, cfg, now)?,
        run_rainy_season_anomaly(store, cfg, now)?,
        run_seasonal_outlook(store, cfg, now)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn rows_are_stamped_with_the_local_calendar_date() {
        // late UTC evening is already past midnight at UTC+2
        assert_eq!(
            forecast_date(ts("2025-01-31T23:30:00Z"), 2),
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()
        );
        // midday stays on the same calendar date
        assert_eq!(
            forecast_date(ts("2025-06-10T12:00:00Z"), 2),
            NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
        );
    }
}
