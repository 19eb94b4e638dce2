use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::core::error::CoreError;
use crate::core::types::{ForecastResult, RiskAssessment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jsonl,
    Markdown,
}

pub fn write_forecasts(
    results: &[ForecastResult],
    format: OutputFormat,
    path: &Path,
    generated_at: DateTime<Utc>,
) -> Result<(), CoreError> {
    match format {
        OutputFormat::Jsonl => write_jsonl(results, path),
        OutputFormat::Markdown => write_forecast_markdown(results, path, generated_at),
    }
}

pub fn write_assessment(
    assessment: &RiskAssessment,
    format: OutputFormat,
    path: &Path,
) -> Result<(), CoreError> {
    match format {
        OutputFormat::Jsonl => write_jsonl(std::slice::from_ref(assessment), path),
        OutputFormat::Markdown => write_assessment_markdown(assessment, path),
    }
}

fn write_jsonl<T: serde::Serialize>(items: &[T], path: &Path) -> Result<(), CoreError> {
    let mut lines = String::new();
    for item in items {
        let json = serde_json::to_string(item)?;
        lines.push_str(&json);
        lines.push('\n');
    }
    fs::write(path, lines)?;
    Ok(())
}

fn write_forecast_markdown(
    results: &[ForecastResult],
    path: &Path,
    generated_at: DateTime<Utc>,
) -> Result<(), CoreError> {
    let mut out = String::new();
    out.push_str("# Forecast Results\n\n");
    out.push_str(&format!("Generated: {}\n\n", generated_at.to_rfc3339()));
    if results.is_empty() {
        out.push_str("_No forecast rows produced._\n");
    }
    for result in results {
        out.push_str(&format!(
            "## {} — {}\n",
            result.area_name,
            result.risk_level.as_str()
        ));
        out.push_str(&format!(
            "- Forecast date: {}\n- Confidence: {:.2}\n- Centroid: ({:.4}, {:.4})\n- Details: {}\n\n",
            result.forecast_date,
            result.confidence,
            result.affected_area.center.lat,
            result.affected_area.center.lon,
            result.details
        ));
    }
    fs::write(path, out)?;
    Ok(())
}

fn write_assessment_markdown(assessment: &RiskAssessment, path: &Path) -> Result<(), CoreError> {
    let mut out = String::new();
    out.push_str(&format!(
        "# Risk Assessment — incident {}\n\n",
        assessment.incident_id
    ));
    out.push_str(&format!(
        "- Score: {:.1} ({})\n- Confidence: {:.3}\n- Cause: {}\n- Version: {}\n- Created: {}\n\n{}\n",
        assessment.risk_score,
        assessment.label.as_str(),
        assessment.confidence,
        assessment.cause.as_str(),
        assessment.version,
        assessment.created_at.to_rfc3339(),
        assessment.explanation
    ));
    fs::write(path, out)?;
    Ok(())
}
