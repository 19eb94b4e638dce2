use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::Regex;
use tracing::warn;

use crate::config::AppConfig;
use crate::core::error::CoreError;
use crate::core::geo::{cell_key, haversine_km, GeoPoint};
use crate::core::season::{season_of, season_weights, temp_anomaly, Season};
use crate::core::store::Store;
use crate::core::time::{local_month, to_local};
use crate::core::types::{Incident, WeatherObservation};

/// Flood-history lookup radius around an observation.
const FLOOD_HISTORY_KM: f64 = 5.0;
const IO_RETRIES: u32 = 3;
const IO_BACKOFF_MS: u64 = 200;

/// Per-incident feature bundle. Every signal is optional; the scorer owns
/// the default substitution for absent ones. Built fresh per scoring call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureBundle {
    pub text_prob: Option<f64>,
    pub rain30: Option<f64>,
    pub fcast7: Option<f64>,
    pub wind7: Option<f64>,
    pub prox_water: Option<f64>,
    pub infra: Option<f64>,
    pub img: Option<f64>,
}

pub fn clamp01(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Pull and normalize every per-incident signal. Each sub-extractor fails
/// soft: missing or malformed inputs become `None` and are defaulted by the
/// scorer, never raised.
pub fn extract_incident_features(
    store: &Store,
    incident: &Incident,
) -> Result<FeatureBundle, CoreError> {
    let hazard = incident.incident_type.as_str();
    let stored = store.get_incident_features(&incident.id)?.unwrap_or_default();

    Ok(FeatureBundle {
        text_prob: Some(text_severity_prob(&incident.description, hazard)),
        rain30: stored.rain_30d_pct.map(clamp01),
        fcast7: stored.forecast_7d_risk.map(clamp01),
        wind7: stored.wind_7d.map(clamp01),
        prox_water: stored.proximity_water.map(clamp01),
        infra: stored.infra_exposure.map(clamp01),
        img: image_evidence(&incident.media, hazard),
    })
}

// --- text severity ---------------------------------------------------------

/// Reference phrases per hazard; the lexical stand-in for the original
/// embedding priors.
fn hazard_priors(hazard: &str) -> &'static [&'static str] {
    match hazard {
        "flood" => &[
            "river burst",
            "water level",
            "inundated",
            "washed away",
            "bridge submerged",
        ],
        "fire" => &["flames", "smoke", "burning", "bushfire", "wildfire"],
        "drought" => &[
            "dry wells",
            "no rain",
            "crop failure",
            "parched",
            "water scarcity",
        ],
        "storm" => &["strong winds", "storm", "lightning", "thunder", "hail"],
        _ => &[],
    }
}

/// Severity likelihood in [0,1] from free text. Floors: 0.2 for empty text,
/// 0.3 for a hazard with no reference phrases.
pub fn text_severity_prob(text: &str, hazard: &str) -> f64 {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return 0.2;
    }
    let priors = hazard_priors(hazard);
    if priors.is_empty() {
        return 0.3;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut best = 0.0f64;
    for prior in priors {
        best = best.max(phrase_similarity(prior, &words));
    }
    // Similarity below 0.5 is noise for Jaro-Winkler; rescale the
    // informative band and stretch so very close matches read stronger.
    let s = ((best - 0.5) / 0.5).clamp(0.0, 1.0);
    (0.1 + 0.9 * s).clamp(0.0, 1.0)
}

/// Best Jaro-Winkler similarity between the phrase and any equally sized
/// word window of the text.
fn phrase_similarity(phrase: &str, words: &[&str]) -> f64 {
    let span = phrase.split_whitespace().count().max(1);
    if words.is_empty() {
        return 0.0;
    }
    let mut best = 0.0f64;
    if words.len() <= span {
        return strsim::jaro_winkler(phrase, &words.join(" "));
    }
    for window in words.windows(span) {
        best = best.max(strsim::jaro_winkler(phrase, &window.join(" ")));
    }
    best
}

// --- image evidence --------------------------------------------------------

/// Per-hazard color-dominance evidence over up to 3 media items. Returns the
/// max across items; no media yields the documented 0.2 default, and every
/// item that fails to decode contributes the same default.
pub fn image_evidence(media: &[String], hazard: &str) -> Option<f64> {
    if media.is_empty() {
        return Some(0.2);
    }
    let mut best = 0.0f64;
    for path in media.iter().take(3) {
        let score = match load_image_with_retry(path) {
            Some(img) => color_dominance_score(&img, hazard),
            None => {
                warn!(path = %path, "media decode failed; using default evidence");
                0.2
            }
        };
        best = best.max(score);
    }
    Some(best)
}

/// Read and decode a media file, retrying reads with linear backoff before
/// treating the item as unavailable.
fn load_image_with_retry(path: &str) -> Option<image::DynamicImage> {
    let mut bytes = None;
    for attempt in 1..=IO_RETRIES {
        match std::fs::read(path) {
            Ok(data) => {
                bytes = Some(data);
                break;
            }
            Err(err) if attempt < IO_RETRIES => {
                warn!(path, attempt, %err, "media read failed; retrying");
                std::thread::sleep(Duration::from_millis(IO_BACKOFF_MS * attempt as u64));
            }
            Err(_) => return None,
        }
    }
    image::load_from_memory(&bytes?).ok()
}

fn color_dominance_score(img: &image::DynamicImage, hazard: &str) -> f64 {
    let small = img.thumbnail(64, 64).to_rgb8();
    let count = (small.width() * small.height()) as f64;
    if count == 0.0 {
        return 0.2;
    }
    let (mut r, mut g, mut b) = (0.0f64, 0.0f64, 0.0f64);
    for px in small.pixels() {
        r += px[0] as f64;
        g += px[1] as f64;
        b += px[2] as f64;
    }
    r /= 255.0 * count;
    g /= 255.0 * count;
    b /= 255.0 * count;

    let score = match hazard {
        // blue dominance reads as standing water
        "flood" => (b - r.max(g)).max(0.0),
        // red dominance reads as flames
        "fire" => (r - g.max(b)).max(0.0),
        _ => (r + g + b) / 3.0 * 0.2,
    };
    (score * 1.8).min(1.0)
}

// --- rain indicator --------------------------------------------------------

fn rain_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)rain|storm|shower|thunder").expect("valid rain pattern"))
}

/// Binary rain flag. Numeric rainfall takes precedence when present;
/// otherwise the condition text decides.
pub fn rain_indicator(log: &WeatherObservation) -> bool {
    if let Some(mm) = log.rainfall_mm {
        return mm > 0.0;
    }
    rain_pattern().is_match(log.condition.trim())
}

/// Distinct local dates with rain across a set of observations.
pub fn distinct_rainy_days(logs: &[&WeatherObservation], utc_offset_hours: i32) -> usize {
    let mut dates: std::collections::BTreeSet<NaiveDate> = Default::default();
    for log in logs {
        if rain_indicator(log) {
            dates.insert(to_local(log.recorded_at, utc_offset_hours).date_naive());
        }
    }
    dates.len()
}

// --- regional flood features ------------------------------------------------

/// One scorable flood row: a recent observation enriched with cell-local
/// rain counts, anomaly, history and season signals.
#[derive(Debug, Clone)]
pub struct FloodCell {
    pub location: GeoPoint,
    pub rain_flag: bool,
    pub temp_anomaly: f64,
    pub rainfall_recent_24h: u32,
    pub rainfall_recent_72h: u32,
    pub flood_history: bool,
    pub season: Season,
    pub flood_mult: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Rain counts per ~1 km cell over the trailing window.
fn recent_rain_counts(logs: &[WeatherObservation]) -> HashMap<(i64, i64), u32> {
    let mut buckets = HashMap::new();
    for log in logs {
        let Some(point) = log.location else { continue };
        if rain_indicator(log) {
            *buckets.entry(cell_key(point, 2)).or_insert(0) += 1;
        }
    }
    buckets
}

pub fn extract_flood_features(
    store: &Store,
    cfg: &AppConfig,
    now: DateTime<Utc>,
) -> Result<Vec<FloodCell>, CoreError> {
    let month = local_month(now, cfg.utc_offset_hours);
    let season = season_of(month);
    let weights = season_weights(season);

    let logs_72h = store.weather_since(now - chrono::Duration::hours(72))?;
    let logs_24h: Vec<WeatherObservation> = logs_72h
        .iter()
        .filter(|l| l.recorded_at >= now - chrono::Duration::hours(24))
        .cloned()
        .collect();

    let rain24 = recent_rain_counts(&logs_24h);
    let rain72 = recent_rain_counts(&logs_72h);
    let flood_history = store.historical_incidents_of_type("flood")?;

    let mut rows = Vec::new();
    for log in &logs_24h {
        let Some(point) = log.location else { continue };
        let key = cell_key(point, 2);
        let history = flood_history
            .iter()
            .any(|h| haversine_km(point, h.location) <= FLOOD_HISTORY_KM);

        rows.push(FloodCell {
            location: point,
            rain_flag: rain_indicator(log),
            temp_anomaly: temp_anomaly(log.temperature, month),
            rainfall_recent_24h: rain24.get(&key).copied().unwrap_or(0),
            rainfall_recent_72h: rain72.get(&key).copied().unwrap_or(0),
            flood_history: history,
            season,
            flood_mult: weights.flood_mult,
            recorded_at: log.recorded_at,
        });
    }
    Ok(rows)
}

// --- regional drought features ----------------------------------------------

/// One ~10 km drought cell aggregated over the trailing 7 days.
#[derive(Debug, Clone)]
pub struct DroughtCell {
    /// Representative point: first observation seen in the cell.
    pub location: GeoPoint,
    pub mean_temperature: Option<f64>,
    pub mean_humidity: Option<f64>,
    pub rain_days: u32,
    pub mean_temp_anomaly: f64,
    pub season: Season,
    pub expected_rain_days: u32,
    pub rain_deficit: f64,
    pub drought_mult: f64,
}

pub fn extract_drought_features(
    store: &Store,
    cfg: &AppConfig,
    now: DateTime<Utc>,
) -> Result<Vec<DroughtCell>, CoreError> {
    let logs = store.weather_since(now - chrono::Duration::days(7))?;
    if logs.is_empty() {
        return Ok(Vec::new());
    }

    // The window can straddle a season boundary; the most frequent local
    // month across it decides the season.
    let months: Vec<u32> = logs
        .iter()
        .map(|l| local_month(l.recorded_at, cfg.utc_offset_hours))
        .collect();
    let month = dominant(&months).unwrap_or_else(|| local_month(now, cfg.utc_offset_hours));
    let season = season_of(month);
    let weights = season_weights(season);

    struct Acc {
        location: GeoPoint,
        temps: Vec<f64>,
        humids: Vec<f64>,
        anomalies: Vec<f64>,
        rain_days: u32,
    }
    let mut cells: HashMap<(i64, i64), Acc> = HashMap::new();
    for log in &logs {
        let Some(point) = log.location else { continue };
        let acc = cells.entry(cell_key(point, 1)).or_insert_with(|| Acc {
            location: point,
            temps: Vec::new(),
            humids: Vec::new(),
            anomalies: Vec::new(),
            rain_days: 0,
        });
        if let Some(t) = log.temperature {
            acc.temps.push(t);
        }
        if let Some(h) = log.humidity {
            acc.humids.push(h);
        }
        acc.anomalies.push(temp_anomaly(log.temperature, month));
        if rain_indicator(log) {
            acc.rain_days += 1;
        }
    }

    let mut keys: Vec<(i64, i64)> = cells.keys().copied().collect();
    keys.sort();
    let mut rows = Vec::new();
    for key in keys {
        let acc = &cells[&key];
        let deficit =
            (weights.expected_rain_days_per_week as f64 - acc.rain_days as f64).max(0.0);
        rows.push(DroughtCell {
            location: acc.location,
            mean_temperature: mean(&acc.temps),
            mean_humidity: mean(&acc.humids),
            rain_days: acc.rain_days,
            mean_temp_anomaly: mean(&acc.anomalies).unwrap_or(0.0),
            season,
            expected_rain_days: weights.expected_rain_days_per_week,
            rain_deficit: deficit,
            drought_mult: weights.drought_mult,
        });
    }
    Ok(rows)
}

// --- per-city heat features --------------------------------------------------

/// Per-city temperature summary over the trailing 3 days.
#[derive(Debug, Clone)]
pub struct CityHeat {
    pub city: String,
    pub location: GeoPoint,
    pub avg_temperature: f64,
    pub avg_anomaly: f64,
    pub sample_count: usize,
    pub season: Season,
    pub dominant_month: u32,
}

pub fn extract_heat_features(
    store: &Store,
    cfg: &AppConfig,
    now: DateTime<Utc>,
) -> Result<Vec<CityHeat>, CoreError> {
    let logs = store.weather_since(now - chrono::Duration::days(3))?;

    struct Acc {
        location: GeoPoint,
        temps: Vec<f64>,
        anomalies: Vec<f64>,
        months: Vec<u32>,
    }
    let mut per_city: HashMap<String, Acc> = HashMap::new();
    for log in &logs {
        let (Some(temp), Some(point)) = (log.temperature, log.location) else {
            continue;
        };
        let city = log
            .city_name
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("Unknown")
            .to_string();
        let month = local_month(log.recorded_at, cfg.utc_offset_hours);
        let acc = per_city.entry(city).or_insert_with(|| Acc {
            location: point,
            temps: Vec::new(),
            anomalies: Vec::new(),
            months: Vec::new(),
        });
        acc.temps.push(temp);
        acc.anomalies.push(temp_anomaly(Some(temp), month));
        acc.months.push(month);
    }

    let mut cities: Vec<String> = per_city.keys().cloned().collect();
    cities.sort();
    let mut rows = Vec::new();
    for city in cities {
        let acc = &per_city[&city];
        if acc.temps.is_empty() {
            continue;
        }
        let dominant_month =
            dominant(&acc.months).unwrap_or_else(|| local_month(now, cfg.utc_offset_hours));
        rows.push(CityHeat {
            city,
            location: acc.location,
            avg_temperature: acc.temps.iter().sum::<f64>() / acc.temps.len() as f64,
            avg_anomaly: acc.anomalies.iter().sum::<f64>() / acc.anomalies.len() as f64,
            sample_count: acc.temps.len(),
            season: season_of(dominant_month),
            dominant_month,
        });
    }
    Ok(rows)
}

// --- monthly rainfall history -------------------------------------------------

/// Average number of distinct local rainy days in `month` for the city over
/// the past `years_back` years. `None` when no history exists.
pub fn monthly_rainfall_history(
    store: &Store,
    city: &str,
    month: u32,
    years_back: i32,
    now: DateTime<Utc>,
    utc_offset_hours: i32,
) -> Result<Option<f64>, CoreError> {
    let local_now = to_local(now, utc_offset_hours);
    let start_year = local_now.year() - years_back;
    let since = now - chrono::Duration::days(366 * (years_back as i64 + 1));
    let logs = store.weather_for_city_since(city, since)?;

    let mut per_year: HashMap<i32, std::collections::BTreeSet<NaiveDate>> = HashMap::new();
    for log in &logs {
        let local = to_local(log.recorded_at, utc_offset_hours);
        if local.month() != month || local.year() < start_year {
            continue;
        }
        if rain_indicator(log) {
            per_year.entry(local.year()).or_default().insert(local.date_naive());
        }
    }
    if per_year.is_empty() {
        return Ok(None);
    }
    let total: usize = per_year.values().map(|d| d.len()).sum();
    let avg = total as f64 / per_year.len() as f64;
    Ok(Some((avg * 100.0).round() / 100.0))
}

// --- small helpers -----------------------------------------------------------

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Most frequent value; first-encountered wins ties.
pub fn dominant<T: Copy + PartialEq>(values: &[T]) -> Option<T> {
    let mut best: Option<(T, usize)> = None;
    for &v in values {
        let count = values.iter().filter(|&&x| x == v).count();
        match best {
            Some((_, n)) if count <= n => {}
            _ => best = Some((v, count)),
        }
    }
    best.map(|(v, _)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(condition: &str, rainfall_mm: Option<f64>) -> WeatherObservation {
        WeatherObservation {
            city_name: Some("Lusaka".into()),
            location: Some(GeoPoint::new(-15.39, 28.32)),
            temperature: Some(28.0),
            humidity: Some(55.0),
            wind_speed: Some(3.0),
            condition: condition.to_string(),
            rainfall_mm,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn numeric_rainfall_takes_precedence() {
        assert!(rain_indicator(&obs("clear sky", Some(2.5))));
        assert!(!rain_indicator(&obs("thunderstorm", Some(0.0))));
    }

    #[test]
    fn condition_text_matches_rain_pattern() {
        assert!(rain_indicator(&obs("Thunderstorm", None)));
        assert!(rain_indicator(&obs("light showers", None)));
        assert!(rain_indicator(&obs("RAIN", None)));
        assert!(!rain_indicator(&obs("sunny", None)));
    }

    #[test]
    fn text_floors_for_missing_inputs() {
        assert_eq!(text_severity_prob("", "flood"), 0.2);
        assert_eq!(text_severity_prob("   ", "flood"), 0.2);
        assert_eq!(text_severity_prob("houses damaged", "landslide"), 0.3);
    }

    #[test]
    fn text_similarity_rises_with_matching_phrases() {
        let close = text_severity_prob("the bridge submerged after heavy rain", "flood");
        let far = text_severity_prob("zebra crossing painted yellow", "flood");
        assert!(close > far, "close={close} far={far}");
        assert!((0.0..=1.0).contains(&close));
        assert!((0.0..=1.0).contains(&far));
    }

    #[test]
    fn no_media_defaults_image_evidence() {
        assert_eq!(image_evidence(&[], "flood"), Some(0.2));
    }

    #[test]
    fn undecodable_media_defaults_per_item() {
        let missing = vec!["/nonexistent/evidence.jpg".to_string()];
        assert_eq!(image_evidence(&missing, "flood"), Some(0.2));
    }

    #[test]
    fn dominant_breaks_ties_by_first_encountered() {
        assert_eq!(dominant(&[3u32, 4, 3, 4]), Some(3));
        assert_eq!(dominant(&[7u32]), Some(7));
        assert_eq!(dominant::<u32>(&[]), None);
    }

    #[test]
    fn clamp_handles_out_of_range_and_nan() {
        assert_eq!(clamp01(1.7), 1.0);
        assert_eq!(clamp01(-0.2), 0.0);
        assert_eq!(clamp01(f64::NAN), 0.0);
    }
}
