use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::core::geo::{CircleArea, GeoPoint};

/// A citizen- or responder-reported incident. Location is optional: reports
/// without coordinates are scored but never clustered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub description: String,
    pub incident_type: String,
    pub location: Option<GeoPoint>,
    pub reported_at: DateTime<Utc>,
    /// Paths to attached media files; at most the first three are inspected.
    #[serde(default)]
    pub media: Vec<String>,
}

/// Pre-computed weather and spatial context for one incident, produced by
/// upstream enrichment jobs. Every column is optional by schema; absent
/// values resolve to documented defaults at scoring time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentFeatures {
    pub rain_30d_pct: Option<f64>,
    pub forecast_7d_risk: Option<f64>,
    pub wind_7d: Option<f64>,
    pub proximity_water: Option<f64>,
    pub infra_exposure: Option<f64>,
}

/// One raw weather observation. The schema is fixed and versioned; optional
/// columns are explicit `Option`s, never discovered at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub city_name: Option<String>,
    pub location: Option<GeoPoint>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub condition: String,
    pub rainfall_mm: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// A past confirmed incident used for flood-history lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalIncident {
    pub incident_type: String,
    pub location: GeoPoint,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLabel {
    Low,
    Medium,
    High,
}

impl RiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::Low => "Low",
            RiskLabel::Medium => "Medium",
            RiskLabel::High => "High",
        }
    }
}

/// Why an assessment revision exists. `Base` revisions replace all prior
/// ones; `ClusterAdjusted` revisions append on top of the latest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentCause {
    Base,
    ClusterAdjusted,
}

impl AssessmentCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentCause::Base => "base",
            AssessmentCause::ClusterAdjusted => "cluster_adjusted",
        }
    }
}

/// Named driver contributions, serialized in computation order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskDrivers {
    pub report_conf: f64,
    pub rain_30d_pct: f64,
    pub forecast_7d_risk: f64,
    pub proximity_water: f64,
    pub infra_exposure: f64,
    pub image_score: f64,
    /// Near-term flood probability, attached after the base scoring pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flood_prob_0_7d: Option<f64>,
}

/// One revision of an incident's risk assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub incident_id: String,
    pub revision: u32,
    pub cause: AssessmentCause,
    /// 0-100, one decimal.
    pub risk_score: f64,
    /// 0.6-1.0, derived from the raw 0-1 score.
    pub confidence: f64,
    pub label: RiskLabel,
    pub drivers: RiskDrivers,
    pub explanation: String,
    /// Scoring-formula version tag.
    pub version: String,
    /// Fingerprint of the cluster detection that produced this revision.
    pub cluster_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A persisted density cluster of recent incidents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hotspot {
    pub window: String,
    pub centroid: GeoPoint,
    pub area: CircleArea,
    /// Mean risk score of member incidents, 0.0 when none are scored.
    pub intensity: f64,
    pub dominant_type: String,
    pub member_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Named, versioned metadata for a forecast generator; resolved or created
/// once per run so repeated runs stay idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastModelMeta {
    pub id: i64,
    pub name: String,
    pub model_type: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// One forecast row. Appended in bulk per run, never updated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResult {
    pub model_id: i64,
    pub forecast_date: NaiveDate,
    pub predicted_at: DateTime<Utc>,
    pub affected_area: CircleArea,
    pub area_name: String,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    /// Human-readable diagnostic of the inputs that produced the score.
    pub details: String,
}

/// Reference city: name plus coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}
