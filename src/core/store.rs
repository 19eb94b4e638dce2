use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::error::CoreError;
use crate::core::types::{
    ForecastModelMeta, ForecastResult, HistoricalIncident, Hotspot, Incident, IncidentFeatures,
    RiskAssessment, WeatherObservation,
};

/// SQLite-backed store for incidents, weather logs, assessments, hotspots
/// and forecast rows. Multi-step writes (assessment replace, hotspot window
/// replace, forecast bulk append) run inside a transaction.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn new(path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), CoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS incidents (
              id TEXT PRIMARY KEY,
              incident_type TEXT NOT NULL,
              lat REAL,
              lon REAL,
              reported_at TEXT NOT NULL,
              data_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_reported ON incidents(reported_at);

            CREATE TABLE IF NOT EXISTS incident_features (
              incident_id TEXT PRIMARY KEY,
              data_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS weather_logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              city_name TEXT,
              lat REAL,
              lon REAL,
              recorded_at TEXT NOT NULL,
              data_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_weather_recorded ON weather_logs(recorded_at);
            CREATE INDEX IF NOT EXISTS idx_weather_city ON weather_logs(city_name);

            CREATE TABLE IF NOT EXISTS historical_incidents (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              incident_type TEXT NOT NULL,
              lat REAL NOT NULL,
              lon REAL NOT NULL,
              occurred_at TEXT NOT NULL,
              data_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS assessments (
              incident_id TEXT NOT NULL,
              revision INTEGER NOT NULL,
              cause TEXT NOT NULL,
              risk_score REAL NOT NULL,
              label TEXT NOT NULL,
              cluster_key TEXT,
              created_at TEXT NOT NULL,
              data_json TEXT NOT NULL,
              PRIMARY KEY (incident_id, revision)
            );

            CREATE TABLE IF NOT EXISTS hotspots (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              window TEXT NOT NULL,
              created_at TEXT NOT NULL,
              data_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_hotspots_window ON hotspots(window);

            CREATE TABLE IF NOT EXISTS forecast_models (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL UNIQUE,
              model_type TEXT NOT NULL,
              description TEXT NOT NULL,
              created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS forecast_results (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              model_id INTEGER NOT NULL,
              predicted_at TEXT NOT NULL,
              risk_level TEXT NOT NULL,
              confidence REAL NOT NULL,
              data_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_forecast_model ON forecast_results(model_id);
            ",
        )?;
        Ok(())
    }

    // --- incidents ---------------------------------------------------------

    pub fn upsert_incident(&mut self, incident: &Incident) -> Result<(), CoreError> {
        let data_json = serde_json::to_string(incident)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO incidents (id, incident_type, lat, lon, reported_at, data_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                incident.id,
                incident.incident_type,
                incident.location.map(|p| p.lat),
                incident.location.map(|p| p.lon),
                incident.reported_at.to_rfc3339(),
                data_json
            ],
        )?;
        Ok(())
    }

    pub fn get_incident(&self, id: &str) -> Result<Option<Incident>, CoreError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT data_json FROM incidents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(CoreError::from))
            .transpose()
    }

    /// Incidents reported within the window that carry a location.
    pub fn located_incidents_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Incident>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT data_json FROM incidents
             WHERE reported_at >= ?1 AND lat IS NOT NULL AND lon IS NOT NULL
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| row.get::<_, String>(0))?;
        collect_json(rows)
    }

    /// All located incidents, regardless of age. Used by cluster detection,
    /// which considers the full incident history.
    pub fn located_incidents(&self) -> Result<Vec<Incident>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT data_json FROM incidents
             WHERE lat IS NOT NULL AND lon IS NOT NULL ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        collect_json(rows)
    }

    pub fn upsert_incident_features(
        &mut self,
        incident_id: &str,
        features: &IncidentFeatures,
    ) -> Result<(), CoreError> {
        let data_json = serde_json::to_string(features)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO incident_features (incident_id, data_json) VALUES (?1, ?2)",
            params![incident_id, data_json],
        )?;
        Ok(())
    }

    pub fn get_incident_features(
        &self,
        incident_id: &str,
    ) -> Result<Option<IncidentFeatures>, CoreError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT data_json FROM incident_features WHERE incident_id = ?1",
                params![incident_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(CoreError::from))
            .transpose()
    }

    // --- weather -----------------------------------------------------------

    pub fn insert_weather_log(&mut self, log: &WeatherObservation) -> Result<(), CoreError> {
        let data_json = serde_json::to_string(log)?;
        self.conn.execute(
            "INSERT INTO weather_logs (city_name, lat, lon, recorded_at, data_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.city_name,
                log.location.map(|p| p.lat),
                log.location.map(|p| p.lon),
                log.recorded_at.to_rfc3339(),
                data_json
            ],
        )?;
        Ok(())
    }

    pub fn weather_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<WeatherObservation>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT data_json FROM weather_logs WHERE recorded_at >= ?1 ORDER BY recorded_at",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| row.get::<_, String>(0))?;
        collect_json(rows)
    }

    pub fn weather_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WeatherObservation>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT data_json FROM weather_logs
             WHERE recorded_at >= ?1 AND recorded_at <= ?2 ORDER BY recorded_at",
        )?;
        let rows = stmt.query_map(
            params![start.to_rfc3339(), end.to_rfc3339()],
            |row| row.get::<_, String>(0),
        )?;
        collect_json(rows)
    }

    pub fn weather_for_city_since(
        &self,
        city: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WeatherObservation>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT data_json FROM weather_logs
             WHERE city_name = ?1 COLLATE NOCASE AND recorded_at >= ?2
             ORDER BY recorded_at",
        )?;
        let rows = stmt.query_map(params![city, since.to_rfc3339()], |row| {
            row.get::<_, String>(0)
        })?;
        collect_json(rows)
    }

    pub fn insert_historical_incident(
        &mut self,
        incident: &HistoricalIncident,
    ) -> Result<(), CoreError> {
        let data_json = serde_json::to_string(incident)?;
        self.conn.execute(
            "INSERT INTO historical_incidents (incident_type, lat, lon, occurred_at, data_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                incident.incident_type,
                incident.location.lat,
                incident.location.lon,
                incident.occurred_at.to_rfc3339(),
                data_json
            ],
        )?;
        Ok(())
    }

    /// Historical incidents whose type contains `type_fragment`
    /// (case-insensitive). Radius filtering happens in the caller.
    pub fn historical_incidents_of_type(
        &self,
        type_fragment: &str,
    ) -> Result<Vec<HistoricalIncident>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT data_json FROM historical_incidents
             WHERE incident_type LIKE '%' || ?1 || '%' COLLATE NOCASE",
        )?;
        let rows = stmt.query_map(params![type_fragment], |row| row.get::<_, String>(0))?;
        collect_json(rows)
    }

    // --- assessments -------------------------------------------------------

    /// Replace every revision for the incident with a fresh base revision.
    /// All fields land atomically; a scoring re-run starts the history over.
    pub fn replace_assessment(&mut self, assessment: &RiskAssessment) -> Result<(), CoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM assessments WHERE incident_id = ?1",
            params![assessment.incident_id],
        )?;
        insert_assessment(&tx, assessment)?;
        tx.commit()?;
        Ok(())
    }

    /// Append a new revision on top of the existing history.
    pub fn append_assessment(&mut self, assessment: &RiskAssessment) -> Result<(), CoreError> {
        let tx = self.conn.transaction()?;
        insert_assessment(&tx, assessment)?;
        tx.commit()?;
        Ok(())
    }

    pub fn latest_assessment(
        &self,
        incident_id: &str,
    ) -> Result<Option<RiskAssessment>, CoreError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT data_json FROM assessments WHERE incident_id = ?1
                 ORDER BY revision DESC LIMIT 1",
                params![incident_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(CoreError::from))
            .transpose()
    }

    pub fn assessment_revisions(
        &self,
        incident_id: &str,
    ) -> Result<Vec<RiskAssessment>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT data_json FROM assessments WHERE incident_id = ?1 ORDER BY revision",
        )?;
        let rows = stmt.query_map(params![incident_id], |row| row.get::<_, String>(0))?;
        collect_json(rows)
    }

    /// Latest risk score per incident, for hotspot intensity aggregation.
    pub fn latest_scores(&self) -> Result<HashMap<String, f64>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT incident_id, risk_score FROM assessments a
             WHERE revision = (SELECT MAX(revision) FROM assessments
                               WHERE incident_id = a.incident_id)",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (id, score) = row?;
            out.insert(id, score);
        }
        Ok(out)
    }

    /// Rewrite the drivers payload of the incident's latest revision.
    pub fn update_latest_assessment(
        &mut self,
        assessment: &RiskAssessment,
    ) -> Result<(), CoreError> {
        let data_json = serde_json::to_string(assessment)?;
        self.conn.execute(
            "UPDATE assessments SET data_json = ?1
             WHERE incident_id = ?2 AND revision = ?3",
            params![data_json, assessment.incident_id, assessment.revision],
        )?;
        Ok(())
    }

    // --- hotspots ----------------------------------------------------------

    /// Full replace of the hotspot set for one window tag, in a single
    /// transaction so readers never observe the empty intermediate state.
    pub fn replace_hotspots(
        &mut self,
        window: &str,
        hotspots: &[Hotspot],
    ) -> Result<(), CoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM hotspots WHERE window = ?1", params![window])?;
        for hotspot in hotspots {
            let data_json = serde_json::to_string(hotspot)?;
            tx.execute(
                "INSERT INTO hotspots (window, created_at, data_json) VALUES (?1, ?2, ?3)",
                params![window, hotspot.created_at.to_rfc3339(), data_json],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn hotspots_for_window(&self, window: &str) -> Result<Vec<Hotspot>, CoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT data_json FROM hotspots WHERE window = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![window], |row| row.get::<_, String>(0))?;
        collect_json(rows)
    }

    // --- forecasts ---------------------------------------------------------

    pub fn get_or_create_model(
        &mut self,
        name: &str,
        model_type: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<ForecastModelMeta, CoreError> {
        let existing: Option<(i64, String, String, String, String)> = self
            .conn
            .query_row(
                "SELECT id, name, model_type, description, created_at
                 FROM forecast_models WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;

        if let Some((id, name, model_type, description, created_at)) = existing {
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| CoreError::Db(e.to_string()))?
                .with_timezone(&Utc);
            return Ok(ForecastModelMeta {
                id,
                name,
                model_type,
                description,
                created_at,
            });
        }

        self.conn.execute(
            "INSERT INTO forecast_models (name, model_type, description, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, model_type, description, now.to_rfc3339()],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(ForecastModelMeta {
            id,
            name: name.to_string(),
            model_type: model_type.to_string(),
            description: description.to_string(),
            created_at: now,
        })
    }

    /// Append-only bulk write of one run's forecast rows.
    pub fn insert_forecast_results(
        &mut self,
        results: &[ForecastResult],
    ) -> Result<(), CoreError> {
        let tx = self.conn.transaction()?;
        for result in results {
            let data_json = serde_json::to_string(result)?;
            tx.execute(
                "INSERT INTO forecast_results (model_id, predicted_at, risk_level, confidence, data_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    result.model_id,
                    result.predicted_at.to_rfc3339(),
                    result.risk_level.as_str(),
                    result.confidence,
                    data_json
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn forecast_results_for_model(
        &self,
        model_id: i64,
    ) -> Result<Vec<ForecastResult>, CoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT data_json FROM forecast_results WHERE model_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![model_id], |row| row.get::<_, String>(0))?;
        collect_json(rows)
    }
}

fn insert_assessment(
    tx: &rusqlite::Transaction<'_>,
    assessment: &RiskAssessment,
) -> Result<(), CoreError> {
    let data_json = serde_json::to_string(assessment)?;
    tx.execute(
        "INSERT INTO assessments
         (incident_id, revision, cause, risk_score, label, cluster_key, created_at, data_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            assessment.incident_id,
            assessment.revision,
            assessment.cause.as_str(),
            assessment.risk_score,
            assessment.label.as_str(),
            assessment.cluster_key,
            assessment.created_at.to_rfc3339(),
            data_json
        ],
    )?;
    Ok(())
}

fn collect_json<T, I>(rows: I) -> Result<Vec<T>, CoreError>
where
    T: serde::de::DeserializeOwned,
    I: Iterator<Item = rusqlite::Result<String>>,
{
    let mut out = Vec::new();
    for row in rows {
        let json = row?;
        out.push(serde_json::from_str(&json)?);
    }
    Ok(out)
}
