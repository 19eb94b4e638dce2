use serde::{Deserialize, Serialize};

use crate::core::types::RiskLevel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Who an alert should reach. Delivery belongs to the surrounding system;
/// the core only selects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecipientSelector {
    /// Active admins and responders.
    Responders,
    /// Every active user.
    Global,
    User(String),
}

/// An instruction to notify someone. Transient output: emitted by scoring
/// and forecast runs, handed to the caller, never persisted here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertDirective {
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub recipients: RecipientSelector,
}

impl AlertDirective {
    pub fn critical(
        title: impl Into<String>,
        message: impl Into<String>,
        recipients: RecipientSelector,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: AlertSeverity::Critical,
            recipients,
        }
    }

    pub fn warning(
        title: impl Into<String>,
        message: impl Into<String>,
        recipients: RecipientSelector,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: AlertSeverity::Warning,
            recipients,
        }
    }
}

/// Standard forecast alert gate: high risk with strong confidence.
pub fn meets_alert_threshold(risk: RiskLevel, confidence: f64, confidence_floor: f64) -> bool {
    risk == RiskLevel::High && confidence >= confidence_floor
}

/// Map a forecast risk level to the severity its alert carries.
pub fn severity_for_risk(risk: RiskLevel) -> AlertSeverity {
    match risk {
        RiskLevel::High => AlertSeverity::Critical,
        RiskLevel::Medium => AlertSeverity::Warning,
        RiskLevel::Low => AlertSeverity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_requires_high_and_confident() {
        assert!(meets_alert_threshold(RiskLevel::High, 0.75, 0.75));
        assert!(!meets_alert_threshold(RiskLevel::High, 0.74, 0.75));
        assert!(!meets_alert_threshold(RiskLevel::Medium, 0.99, 0.75));
    }
}
