use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::core::alert::{AlertDirective, RecipientSelector};
use crate::core::geo::haversine_km;
use crate::core::ids::cluster_key;
use crate::core::store::Store;
use crate::core::types::{AssessmentCause, RiskAssessment, RiskLabel};

const MIN_NEIGHBORS: usize = 2;
const ADJUSTMENT_PER_NEIGHBOR: f64 = 5.0;
const MAX_ADJUSTMENT: f64 = 20.0;

/// Result of one cluster-detection pass over a scored incident.
#[derive(Debug, Clone)]
pub enum ClusterOutcome {
    /// Fewer than two neighbors in the radius, or the incident has no
    /// location. Nothing written.
    NoCluster { neighbor_count: usize },
    /// The latest revision already carries this exact cluster fingerprint.
    /// Nothing written, no alert.
    AlreadyApplied { key: String, neighbor_count: usize },
    /// A new cluster-adjusted revision was appended.
    Applied {
        assessment: RiskAssessment,
        alert: AlertDirective,
        neighbor_count: usize,
        adjustment: f64,
    },
}

/// Count located incidents within `radius_km` of the incident and, when the
/// neighborhood is dense enough, append an escalated assessment revision.
/// Re-running against an unchanged neighborhood is a detected no-op: the
/// cluster fingerprint on the latest revision short-circuits the write.
pub fn detect_cluster(
    store: &mut Store,
    incident_id: &str,
    radius_km: f64,
    now: DateTime<Utc>,
) -> Result<ClusterOutcome> {
    let incident = store
        .get_incident(incident_id)?
        .ok_or_else(|| anyhow!("incident not found: {incident_id}"))?;
    let Some(center) = incident.location else {
        return Ok(ClusterOutcome::NoCluster { neighbor_count: 0 });
    };

    let neighbor_count = store
        .located_incidents()?
        .iter()
        .filter(|other| other.id != incident.id)
        .filter(|other| {
            other
                .location
                .is_some_and(|p| haversine_km(center, p) <= radius_km)
        })
        .count();

    if neighbor_count < MIN_NEIGHBORS {
        return Ok(ClusterOutcome::NoCluster { neighbor_count });
    }

    let latest = store
        .latest_assessment(incident_id)?
        .ok_or_else(|| anyhow!("incident has no assessment: {incident_id}"))?;

    let key = cluster_key(radius_km, neighbor_count);
    if latest.cluster_key.as_deref() == Some(key.as_str()) {
        info!(incident = incident_id, %key, "cluster adjustment already applied");
        return Ok(ClusterOutcome::AlreadyApplied { key, neighbor_count });
    }

    let adjustment = (ADJUSTMENT_PER_NEIGHBOR * neighbor_count as f64).min(MAX_ADJUSTMENT);
    let adjusted_score = (latest.risk_score + adjustment).min(100.0);

    let assessment = RiskAssessment {
        incident_id: latest.incident_id.clone(),
        revision: latest.revision + 1,
        cause: AssessmentCause::ClusterAdjusted,
        risk_score: adjusted_score,
        confidence: latest.confidence,
        label: RiskLabel::High,
        drivers: latest.drivers.clone(),
        explanation: format!(
            "{} Escalated by cluster of {} nearby incidents within {:.1} km (+{:.0}).",
            latest.explanation, neighbor_count, radius_km, adjustment
        ),
        version: latest.version.clone(),
        cluster_key: Some(key),
        created_at: now,
    };
    store.append_assessment(&assessment)?;
    info!(
        incident = incident_id,
        neighbors = neighbor_count,
        score = assessment.risk_score,
        "cluster adjustment applied"
    );

    let alert = AlertDirective::critical(
        "Incident Cluster Detected",
        format!(
            "{} incidents reported within {:.1} km of ({:.4}, {:.4}). \
             Incident {} escalated to HIGH RISK ({:.1}/100).",
            neighbor_count + 1,
            radius_km,
            center.lat,
            center.lon,
            incident.id,
            assessment.risk_score
        ),
        RecipientSelector::Responders,
    );

    Ok(ClusterOutcome::Applied {
        assessment,
        alert,
        neighbor_count,
        adjustment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::GeoPoint;
    use crate::core::types::{Incident, RiskDrivers};

    fn incident(id: &str, lat: f64, lon: f64) -> Incident {
        Incident {
            id: id.to_string(),
            description: "flooded road".to_string(),
            incident_type: "flood".to_string(),
            location: Some(GeoPoint::new(lat, lon)),
            reported_at: Utc::now(),
            media: Vec::new(),
        }
    }

    fn base_assessment(incident_id: &str, score: f64) -> RiskAssessment {
        RiskAssessment {
            incident_id: incident_id.to_string(),
            revision: 1,
            cause: AssessmentCause::Base,
            risk_score: score,
            confidence: 0.8,
            label: RiskLabel::Medium,
            drivers: RiskDrivers {
                report_conf: 0.5,
                rain_30d_pct: 0.5,
                forecast_7d_risk: 0.5,
                proximity_water: 0.5,
                infra_exposure: 0.5,
                image_score: 0.5,
                flood_prob_0_7d: None,
            },
            explanation: "Medium risk.".to_string(),
            version: "v0.1".to_string(),
            cluster_key: None,
            created_at: Utc::now(),
        }
    }

    fn seeded_store(neighbors: usize) -> Store {
        let mut store = Store::in_memory().unwrap();
        store.upsert_incident(&incident("target", -15.40, 28.30)).unwrap();
        store.replace_assessment(&base_assessment("target", 60.0)).unwrap();
        for i in 0..neighbors {
            // ~1 km apart, all inside a 3 km radius
            store
                .upsert_incident(&incident(&format!("n{i}"), -15.40 + 0.008 * i as f64, 28.30))
                .unwrap();
        }
        store
    }

    #[test]
    fn single_neighbor_is_not_a_cluster() {
        let mut store = seeded_store(1);
        let outcome = detect_cluster(&mut store, "target", 3.0, Utc::now()).unwrap();
        assert!(matches!(outcome, ClusterOutcome::NoCluster { neighbor_count: 1 }));
        assert_eq!(store.assessment_revisions("target").unwrap().len(), 1);
    }

    #[test]
    fn three_neighbors_escalate_by_fifteen() {
        let mut store = seeded_store(3);
        let outcome = detect_cluster(&mut store, "target", 3.0, Utc::now()).unwrap();
        let ClusterOutcome::Applied { assessment, adjustment, neighbor_count, .. } = outcome
        else {
            panic!("expected Applied");
        };
        assert_eq!(neighbor_count, 3);
        assert_eq!(adjustment, 15.0);
        assert_eq!(assessment.risk_score, 75.0);
        assert_eq!(assessment.label, RiskLabel::High);
        assert_eq!(assessment.revision, 2);
        assert_eq!(assessment.cause, AssessmentCause::ClusterAdjusted);
    }

    #[test]
    fn adjustment_caps_at_twenty_and_score_at_hundred() {
        let mut store = seeded_store(6);
        store.replace_assessment(&base_assessment("target", 95.0)).unwrap();
        let outcome = detect_cluster(&mut store, "target", 3.0, Utc::now()).unwrap();
        let ClusterOutcome::Applied { assessment, adjustment, .. } = outcome else {
            panic!("expected Applied");
        };
        assert_eq!(adjustment, 20.0);
        assert_eq!(assessment.risk_score, 100.0);
    }

    #[test]
    fn rerun_with_unchanged_neighborhood_is_a_noop() {
        let mut store = seeded_store(3);
        let first = detect_cluster(&mut store, "target", 3.0, Utc::now()).unwrap();
        assert!(matches!(first, ClusterOutcome::Applied { .. }));

        let second = detect_cluster(&mut store, "target", 3.0, Utc::now()).unwrap();
        assert!(matches!(second, ClusterOutcome::AlreadyApplied { .. }));
        assert_eq!(store.assessment_revisions("target").unwrap().len(), 2);
    }

    #[test]
    fn changed_neighborhood_appends_a_new_revision() {
        let mut store = seeded_store(2);
        detect_cluster(&mut store, "target", 3.0, Utc::now()).unwrap();
        store.upsert_incident(&incident("extra", -15.401, 28.301)).unwrap();

        let outcome = detect_cluster(&mut store, "target", 3.0, Utc::now()).unwrap();
        let ClusterOutcome::Applied { assessment, .. } = outcome else {
            panic!("expected Applied after neighborhood change");
        };
        assert_eq!(assessment.revision, 3);
    }

    #[test]
    fn unlocated_incident_is_skipped() {
        let mut store = Store::in_memory().unwrap();
        let mut unlocated = incident("nowhere", 0.0, 0.0);
        unlocated.location = None;
        store.upsert_incident(&unlocated).unwrap();
        let outcome = detect_cluster(&mut store, "nowhere", 3.0, Utc::now()).unwrap();
        assert!(matches!(outcome, ClusterOutcome::NoCluster { .. }));
    }
}
