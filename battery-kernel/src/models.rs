//! Data contracts shared by the gate, the monitor and the stores.

use crate::error::FieldError;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const DEVICE_ID_MAX_LEN: usize = 64;

/// RFC 3339 rendering for logs and API views ("2025-01-15T10:00:00Z").
pub fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// Registry entry for one device. `status` is informational only: staleness
/// is always derived from `last_seen`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    pub status: DeviceStatus,
}

/// A recorded offline episode. `last_seen` is the device checkpoint the
/// monitor observed and is the deduplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub detected_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

impl Alert {
    pub fn new(device_id: &str, detected_at: OffsetDateTime, last_seen: OffsetDateTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            detected_at,
            last_seen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMetrics {
    pub soc_percent: f64,
    pub voltage_v: f64,
    pub current_a: f64,
    pub temp_c: f64,
}

impl TelemetryMetrics {
    /// (name, value) pairs in a stable order, used by summaries.
    pub fn named(&self) -> [(&'static str, f64); 4] {
        [
            ("soc_percent", self.soc_percent),
            ("voltage_v", self.voltage_v),
            ("current_a", self.current_a),
            ("temp_c", self.temp_c),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub metrics: TelemetryMetrics,
}

/// Inbound telemetry payload (`POST /telemetry`).
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySubmission {
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub metrics: TelemetryMetrics,
}

// (field, min, max) inclusive
const METRIC_BOUNDS: [(&str, f64, f64); 4] = [
    ("soc_percent", 0.0, 100.0),
    ("voltage_v", 200.0, 500.0),
    ("current_a", -100.0, 100.0),
    ("temp_c", -20.0, 60.0),
];

impl TelemetrySubmission {
    /// Checks the payload, collecting every field error instead of stopping
    /// at the first one.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if let Err(msg) = validate_device_id(&self.device_id) {
            errors.push(FieldError::new(&["body", "device_id"], msg, "value_error"));
        }

        for ((name, value), (_, min, max)) in self.metrics.named().into_iter().zip(METRIC_BOUNDS) {
            if !value.is_finite() {
                errors.push(FieldError::new(
                    &["body", "metrics", name],
                    "value must be a finite number",
                    "finite_number",
                ));
            } else if value < min {
                errors.push(FieldError::new(
                    &["body", "metrics", name],
                    format!("value must be greater than or equal to {min}"),
                    "greater_than_equal",
                ));
            } else if value > max {
                errors.push(FieldError::new(
                    &["body", "metrics", name],
                    format!("value must be less than or equal to {max}"),
                    "less_than_equal",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn into_record(self) -> TelemetryRecord {
        TelemetryRecord {
            device_id: self.device_id,
            timestamp: self.timestamp,
            metrics: self.metrics,
        }
    }
}

pub fn validate_device_id(device_id: &str) -> Result<(), String> {
    if device_id.is_empty() || device_id.chars().count() > DEVICE_ID_MAX_LEN {
        return Err(format!(
            "device_id must be between 1 and {DEVICE_ID_MAX_LEN} characters"
        ));
    }
    if !device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(
            "device_id must be alphanumeric (letters, digits, hyphens, underscores)".to_string(),
        );
    }
    Ok(())
}
