use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::AppConfig;
use crate::core::alert::{AlertDirective, RecipientSelector};
use crate::core::season::{season_weights, Season};
use crate::core::store::Store;
use crate::core::types::{
    AssessmentCause, RiskAssessment, RiskDrivers, RiskLabel, RiskLevel,
};
use crate::pipeline::features::{
    extract_incident_features, DroughtCell, FeatureBundle, FloodCell,
};

pub const SCORING_VERSION: &str = "v0.1";

/// Per-incident weights; fixed, sum to 1.0 with the unused residual on wind.
const W_TEXT: f64 = 0.25;
const W_RAIN30: f64 = 0.25;
const W_FCAST7: f64 = 0.20;
const W_PROX_WATER: f64 = 0.10;
const W_INFRA: f64 = 0.10;
const W_IMG: f64 = 0.10;

const HIGH_BREAKPOINT: f64 = 75.0;
const MEDIUM_BREAKPOINT: f64 = 40.0;

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Min-max normalization against a fixed reasonable range, clamped [0,1].
pub fn normalize(x: f64, lo: f64, hi: f64) -> f64 {
    if hi == lo {
        return 0.0;
    }
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

pub fn label_for(risk_score: f64) -> RiskLabel {
    if risk_score >= HIGH_BREAKPOINT {
        RiskLabel::High
    } else if risk_score >= MEDIUM_BREAKPOINT {
        RiskLabel::Medium
    } else {
        RiskLabel::Low
    }
}

/// Documented default substitution for absent features. The extractors
/// produce `None` for missing inputs; this mapping is the only place
/// defaults are decided.
fn resolved(bundle: &FeatureBundle) -> (f64, f64, f64, f64, f64, f64) {
    (
        bundle.text_prob.unwrap_or(0.2),
        bundle.rain30.unwrap_or(0.0),
        bundle.fcast7.unwrap_or(0.0),
        bundle.prox_water.unwrap_or(0.0),
        bundle.infra.unwrap_or(0.0),
        bundle.img.unwrap_or(0.2),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredIncident {
    /// 0-100, one decimal.
    pub risk_score: f64,
    /// 0.6-1.0.
    pub confidence: f64,
    pub label: RiskLabel,
    pub drivers: RiskDrivers,
    pub explanation: String,
    pub version: String,
}

/// Combine normalized per-incident features into a 0-100 score. Pure: the
/// same bundle always yields the same score, confidence and drivers. Inputs
/// arrive pre-clamped; no validation happens here and no finite input can
/// push the score outside [0,100].
pub fn compute_risk_score(bundle: &FeatureBundle) -> ScoredIncident {
    let (text_prob, rain30, fcast7, prox_water, infra, img) = resolved(bundle);

    let score01 = W_TEXT * text_prob
        + W_RAIN30 * rain30
        + W_FCAST7 * fcast7
        + W_PROX_WATER * prox_water
        + W_INFRA * infra
        + W_IMG * img;
    let risk_score = round1(score01 * 100.0);
    let label = label_for(risk_score);

    let drivers = RiskDrivers {
        report_conf: round3(text_prob),
        rain_30d_pct: round3(rain30),
        forecast_7d_risk: round3(fcast7),
        proximity_water: round3(prox_water),
        infra_exposure: round3(infra),
        image_score: round3(img),
        flood_prob_0_7d: None,
    };
    let explanation = format!(
        "{} risk: text={}, rain30={}, fcst7={}, water={}, infra={}, img={}.",
        label.as_str(),
        drivers.report_conf,
        drivers.rain_30d_pct,
        drivers.forecast_7d_risk,
        drivers.proximity_water,
        drivers.infra_exposure,
        drivers.image_score
    );

    ScoredIncident {
        risk_score,
        confidence: 0.6 + 0.4 * score01,
        label,
        drivers,
        explanation,
        version: SCORING_VERSION.to_string(),
    }
}

/// Near-term flood probability from lagged rain features and water
/// proximity. Requires all three inputs; anything missing yields `None`.
pub fn near_term_flood_probability(bundle: &FeatureBundle) -> Option<f64> {
    let (rain30, fcast7, prox_water) = (bundle.rain30?, bundle.fcast7?, bundle.prox_water?);
    Some((0.5 * rain30 + 0.3 * fcast7 + 0.2 * prox_water).clamp(0.0, 1.0))
}

// --- regional formulas -------------------------------------------------------

/// Season-aware flood score for one cell row, clamped [0,1].
pub fn score_flood_cell(cell: &FloodCell) -> f64 {
    let c_intensity = normalize(cell.rainfall_recent_24h as f64, 0.0, 6.0);
    let c_persistence = normalize(cell.rainfall_recent_72h as f64, 0.0, 12.0);
    let c_rainflag = if cell.rain_flag { 0.6 } else { 0.0 };
    // warm anomalies boost convection
    let c_temp = normalize(cell.temp_anomaly, 0.0, 6.0) * 0.3;
    let c_history = if cell.flood_history { 0.5 } else { 0.0 };

    let raw = 0.35 * c_intensity
        + 0.25 * c_persistence
        + 0.20 * c_rainflag
        + 0.10 * c_temp
        + 0.10 * c_history;
    (raw * cell.flood_mult).clamp(0.0, 1.0)
}

/// Season-aware drought score for one cell row, clamped [0,1].
pub fn score_drought_cell(cell: &DroughtCell) -> f64 {
    let c_deficit = normalize(cell.rain_deficit, 0.0, 5.0);
    let c_temp = normalize(cell.mean_temperature.unwrap_or(0.0), 20.0, 38.0);
    let c_anom = normalize(cell.mean_temp_anomaly, 0.0, 8.0);
    // drier air raises risk
    let c_dryair = normalize(60.0 - cell.mean_humidity.unwrap_or(50.0), 0.0, 40.0);

    let raw = 0.45 * c_deficit + 0.25 * c_temp + 0.20 * c_dryair + 0.10 * c_anom;
    (raw * cell.drought_mult).clamp(0.0, 1.0)
}

/// Map a 0..1 regional score to a risk bucket; confidence is the score.
pub fn risk_bucket(score: f64) -> (RiskLevel, f64) {
    if score >= 0.70 {
        (RiskLevel::High, score)
    } else if score >= 0.40 {
        (RiskLevel::Medium, score)
    } else {
        (RiskLevel::Low, score)
    }
}

/// Heat-wave bucket from an average temperature anomaly, with season-shifted
/// thresholds: +1.0 in hot dry, -0.5 in cool dry.
pub fn heat_risk(avg_anomaly: f64, season: Season) -> (RiskLevel, f64) {
    let shift = match season {
        Season::HotDry => 1.0,
        Season::CoolDry => -0.5,
        Season::Rainy => 0.0,
    };
    let high_threshold = 5.0 + shift;
    let medium_threshold = 3.0 + shift;

    if avg_anomaly >= high_threshold {
        (
            RiskLevel::High,
            (0.6 + (avg_anomaly - high_threshold) / 6.0).min(1.0),
        )
    } else if avg_anomaly >= medium_threshold {
        (
            RiskLevel::Medium,
            (0.45 + (avg_anomaly - medium_threshold) / 6.0).min(0.9),
        )
    } else {
        (RiskLevel::Low, (0.2 + avg_anomaly / 12.0).max(0.1))
    }
}

/// Compare average rainy days against the season baseline for a month
/// (`expected_rain_days_per_week * 4`). A zero baseline downgrades to low
/// risk with neutral confidence instead of dividing by zero.
pub fn expected_rainfall_risk(avg_days: f64, season: Season) -> (RiskLevel, f64, u32) {
    let baseline = season_weights(season).expected_rain_days_per_week * 4;
    if baseline == 0 {
        return (RiskLevel::Low, 0.5, baseline);
    }
    let ratio = avg_days / baseline as f64;
    if ratio < 0.50 {
        (
            RiskLevel::High,
            (0.7 + (0.50 - ratio) * 0.6).min(1.0),
            baseline,
        )
    } else if ratio < 0.80 {
        (
            RiskLevel::Medium,
            (0.5 + (0.80 - ratio) * 0.6).min(0.9),
            baseline,
        )
    } else {
        (RiskLevel::Low, 0.6, baseline)
    }
}

// --- orchestration -----------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScoreReport {
    pub assessment: RiskAssessment,
    pub alert: Option<AlertDirective>,
}

/// Score one incident end to end: extract the feature bundle, compute the
/// score, replace the assessment history with a fresh base revision, and
/// emit a critical alert when the score crosses the High breakpoint.
pub fn score_incident(
    store: &mut Store,
    _cfg: &AppConfig,
    incident_id: &str,
    now: DateTime<Utc>,
) -> Result<ScoreReport> {
    let incident = store
        .get_incident(incident_id)?
        .ok_or_else(|| anyhow!("incident not found: {incident_id}"))?;

    let bundle = extract_incident_features(store, &incident)?;
    let scored = compute_risk_score(&bundle);

    let assessment = RiskAssessment {
        incident_id: incident.id.clone(),
        revision: 1,
        cause: AssessmentCause::Base,
        risk_score: scored.risk_score,
        confidence: scored.confidence,
        label: scored.label,
        drivers: scored.drivers,
        explanation: scored.explanation,
        version: scored.version,
        cluster_key: None,
        created_at: now,
    };
    store.replace_assessment(&assessment)?;
    info!(
        incident = %incident.id,
        score = assessment.risk_score,
        label = assessment.label.as_str(),
        "incident scored"
    );

    let alert = if assessment.risk_score >= HIGH_BREAKPOINT {
        let location = incident
            .location
            .map(|p| format!("({:.4}, {:.4})", p.lat, p.lon))
            .unwrap_or_else(|| "unknown location".to_string());
        Some(AlertDirective::critical(
            "High-Risk Incident Detected",
            format!(
                "A new {} incident was scored HIGH RISK ({:.1}/100).\n\nLocation: {}",
                incident.incident_type, assessment.risk_score, location
            ),
            RecipientSelector::Responders,
        ))
    } else {
        None
    };

    Ok(ScoreReport { assessment, alert })
}

/// Compute the near-term flood probability for an already scored incident
/// and attach it to the latest assessment's drivers.
pub fn attach_near_term_flood(
    store: &mut Store,
    incident_id: &str,
) -> Result<Option<f64>> {
    let incident = store
        .get_incident(incident_id)?
        .ok_or_else(|| anyhow!("incident not found: {incident_id}"))?;
    let bundle = extract_incident_features(store, &incident)?;
    let Some(p) = near_term_flood_probability(&bundle) else {
        return Ok(None);
    };
    let p = round3(p);

    if let Some(mut assessment) = store.latest_assessment(incident_id)? {
        assessment.drivers.flood_prob_0_7d = Some(p);
        store.update_latest_assessment(&assessment)?;
    }
    Ok(Some(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::GeoPoint;
    use crate::core::season::Season;

    fn bundle() -> FeatureBundle {
        FeatureBundle {
            text_prob: Some(0.8),
            rain30: Some(0.6),
            fcast7: Some(0.5),
            wind7: Some(0.1),
            prox_water: Some(0.3),
            infra: Some(0.2),
            img: Some(0.4),
        }
    }

    #[test]
    fn worked_example_scores_medium() {
        let scored = compute_risk_score(&bundle());
        // 0.25*0.8 + 0.25*0.6 + 0.20*0.5 + 0.10*0.3 + 0.10*0.2 + 0.10*0.4 = 0.54
        assert_eq!(scored.risk_score, 54.0);
        assert_eq!(scored.label, RiskLabel::Medium);
        assert!((scored.confidence - 0.816).abs() < 1e-9);
        assert_eq!(scored.drivers.report_conf, 0.8);
        assert_eq!(scored.drivers.image_score, 0.4);
        assert!(scored.explanation.starts_with("Medium risk:"));
    }

    #[test]
    fn scoring_is_pure() {
        assert_eq!(compute_risk_score(&bundle()), compute_risk_score(&bundle()));
    }

    #[test]
    fn absent_features_use_documented_defaults() {
        let scored = compute_risk_score(&FeatureBundle::default());
        // text 0.2 and image 0.2 floors, everything else 0.0
        let expected = 0.25 * 0.2 + 0.10 * 0.2;
        assert_eq!(scored.risk_score, round1(expected * 100.0));
        assert_eq!(scored.label, RiskLabel::Low);
    }

    #[test]
    fn score_stays_in_bounds_at_extremes() {
        let all_max = FeatureBundle {
            text_prob: Some(1.0),
            rain30: Some(1.0),
            fcast7: Some(1.0),
            wind7: Some(1.0),
            prox_water: Some(1.0),
            infra: Some(1.0),
            img: Some(1.0),
        };
        let scored = compute_risk_score(&all_max);
        assert!(scored.risk_score <= 100.0);
        assert_eq!(scored.label, RiskLabel::High);

        let all_min = FeatureBundle {
            text_prob: Some(0.0),
            rain30: Some(0.0),
            fcast7: Some(0.0),
            wind7: Some(0.0),
            prox_water: Some(0.0),
            infra: Some(0.0),
            img: Some(0.0),
        };
        assert_eq!(compute_risk_score(&all_min).risk_score, 0.0);
    }

    #[test]
    fn label_breakpoints() {
        assert_eq!(label_for(75.0), RiskLabel::High);
        assert_eq!(label_for(74.9), RiskLabel::Medium);
        assert_eq!(label_for(40.0), RiskLabel::Medium);
        assert_eq!(label_for(39.9), RiskLabel::Low);
    }

    #[test]
    fn flood_cell_at_maximum_clamps_to_one() {
        let cell = FloodCell {
            location: GeoPoint::new(-15.4, 28.3),
            rain_flag: true,
            temp_anomaly: 6.0,
            rainfall_recent_24h: 6,
            rainfall_recent_72h: 12,
            flood_history: true,
            season: Season::Rainy,
            flood_mult: 1.25,
            recorded_at: chrono::Utc::now(),
        };
        assert_eq!(score_flood_cell(&cell), 1.0);
    }

    #[test]
    fn drought_cell_at_maximum_clamps_to_one() {
        let cell = DroughtCell {
            location: GeoPoint::new(-15.4, 28.3),
            mean_temperature: Some(38.0),
            mean_humidity: Some(20.0),
            rain_days: 0,
            mean_temp_anomaly: 8.0,
            season: Season::HotDry,
            expected_rain_days: 0,
            rain_deficit: 5.0,
            drought_mult: 1.25,
        };
        assert_eq!(score_drought_cell(&cell), 1.0);
    }

    #[test]
    fn bucket_thresholds() {
        assert_eq!(risk_bucket(0.70).0, RiskLevel::High);
        assert_eq!(risk_bucket(0.69).0, RiskLevel::Medium);
        assert_eq!(risk_bucket(0.40).0, RiskLevel::Medium);
        assert_eq!(risk_bucket(0.39).0, RiskLevel::Low);
        assert_eq!(risk_bucket(0.55).1, 0.55);
    }

    #[test]
    fn heat_worked_example_hot_dry() {
        let (risk, conf) = heat_risk(6.0, Season::HotDry);
        assert_eq!(risk, RiskLevel::High);
        assert!((conf - 0.6).abs() < 1e-9);
    }

    #[test]
    fn heat_thresholds_shift_by_season() {
        // 5.5 is High in rainy (threshold 5.0) but Medium in hot dry (6.0).
        assert_eq!(heat_risk(5.5, Season::Rainy).0, RiskLevel::High);
        assert_eq!(heat_risk(5.5, Season::HotDry).0, RiskLevel::Medium);
        assert_eq!(heat_risk(2.6, Season::CoolDry).0, RiskLevel::Medium);
        let (risk, conf) = heat_risk(-3.0, Season::Rainy);
        assert_eq!(risk, RiskLevel::Low);
        assert!(conf >= 0.1);
    }

    #[test]
    fn monthly_worked_example() {
        // rainy baseline 12; ratio 0.45 means 5.4 average rainy days
        let (risk, conf, baseline) = expected_rainfall_risk(5.4, Season::Rainy);
        assert_eq!(baseline, 12);
        assert_eq!(risk, RiskLevel::High);
        assert!((conf - 0.73).abs() < 1e-9);
    }

    #[test]
    fn monthly_zero_baseline_downgrades() {
        let (risk, conf, baseline) = expected_rainfall_risk(0.0, Season::HotDry);
        assert_eq!(baseline, 0);
        assert_eq!(risk, RiskLevel::Low);
        assert_eq!(conf, 0.5);
    }

    #[test]
    fn near_term_requires_all_inputs() {
        let mut b = bundle();
        let p = near_term_flood_probability(&b).unwrap();
        assert!((p - (0.5 * 0.6 + 0.3 * 0.5 + 0.2 * 0.3)).abs() < 1e-9);
        b.prox_water = None;
        assert_eq!(near_term_flood_probability(&b), None);
    }
}
