use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stable id for one forecast run, derived from the model identity and the
/// run instant. Identical inputs always hash to the same id.
pub fn forecast_run_id(model_name: &str, predicted_at: &str) -> String {
    let payload = format!("{model_name}|{predicted_at}");
    format!("run_{}", sha256_hex(payload.as_bytes()))
}

/// Fingerprint of a cluster detection outcome. Two detections with the same
/// radius and neighbourhood produce the same key, which is what makes
/// re-applied adjustments detectable.
pub fn cluster_key(radius_km: f64, neighbor_count: usize) -> String {
    format!("r{radius_km}:n{neighbor_count}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_deterministic() {
        let a = forecast_run_id("Season-Aware Flood Predictor", "2025-01-02T00:00:00Z");
        let b = forecast_run_id("Season-Aware Flood Predictor", "2025-01-02T00:00:00Z");
        assert_eq!(a, b);
        assert!(a.starts_with("run_"));
    }

    #[test]
    fn cluster_key_encodes_neighborhood() {
        assert_eq!(cluster_key(3.0, 4), "r3:n4");
        assert_ne!(cluster_key(3.0, 4), cluster_key(3.0, 5));
    }
}
