use std::{fs, path::Path};

use serde::Deserialize;

use crate::core::error::CoreError;
use crate::core::types::City;

/// Deployment configuration. A missing file yields the compiled-in defaults
/// (Zambian reference deployment); any present field overrides them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// UTC offset of the deployment's local timezone in whole hours.
    /// Season boundaries are calendar-local, so this drives every month
    /// lookup. Central Africa Time is +2.
    pub utc_offset_hours: i32,
    pub db_path: String,
    pub cluster_radius_km: f64,
    pub hotspot_window_days: u32,
    pub hotspot_radius_km: f64,
    /// Minimum confidence for high-risk forecast alerts.
    pub alert_confidence_floor: f64,
    pub cities: Vec<City>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: 2,
            db_path: "data/hazardwatch.db".to_string(),
            cluster_radius_km: 3.0,
            hotspot_window_days: 7,
            hotspot_radius_km: 3.0,
            alert_confidence_floor: 0.75,
            cities: default_cities(),
        }
    }
}

pub fn load_config(path: Option<&str>) -> Result<AppConfig, CoreError> {
    let default_path = Path::new("config/hazardwatch.toml");
    let path = path.map(Path::new).unwrap_or(default_path);

    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| CoreError::Config(e.to_string()))?;
    let mut cfg: AppConfig =
        toml::from_str(&content).map_err(|e| CoreError::Config(e.to_string()))?;
    if cfg.cities.is_empty() {
        cfg.cities = default_cities();
    }
    Ok(cfg)
}

fn city(name: &str, lat: f64, lon: f64) -> City {
    City {
        name: name.to_string(),
        lat,
        lon,
    }
}

fn default_cities() -> Vec<City> {
    vec![
        city("Lusaka", -15.3875, 28.3228),
        city("Ndola", -12.9587, 28.6366),
        city("Kitwe", -12.8156, 28.2132),
        city("Livingstone", -17.8572, 25.8567),
        city("Chipata", -13.6367, 32.6455),
        city("Kasama", -10.2129, 31.1800),
        city("Mansa", -11.1998, 28.8943),
        city("Solwezi", -12.1833, 26.4000),
        city("Choma", -16.8122, 26.9833),
        city("Mongu", -15.2796, 23.1274),
        city("Kabwe", -14.4469, 28.4464),
        city("Mazabuka", -15.8580, 27.7485),
        city("Siavonga", -16.5380, 28.7087),
        city("Mpika", -11.8366, 31.4521),
    ]
}
