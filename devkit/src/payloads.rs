/*!
Builder for `POST /telemetry` bodies.

Defaults are inside every accepted range, so a test only sets the field it
is about.
*/

use serde_json::{json, Map, Value};

#[derive(Debug, Clone)]
pub struct TelemetryPayloadBuilder {
    device_id: String,
    timestamp: String,
    metrics: Map<String, Value>,
}

impl TelemetryPayloadBuilder {
    pub fn new(device_id: &str) -> Self {
        let mut metrics = Map::new();
        metrics.insert("soc_percent".into(), json!(80.0));
        metrics.insert("voltage_v".into(), json!(400.0));
        metrics.insert("current_a".into(), json!(-5.0));
        metrics.insert("temp_c".into(), json!(25.0));
        Self {
            device_id: device_id.to_string(),
            timestamp: "2025-01-15T10:00:00Z".to_string(),
            metrics,
        }
    }

    pub fn timestamp(mut self, rfc3339: &str) -> Self {
        self.timestamp = rfc3339.to_string();
        self
    }

    pub fn soc_percent(self, value: f64) -> Self {
        self.metric("soc_percent", json!(value))
    }

    pub fn voltage_v(self, value: f64) -> Self {
        self.metric("voltage_v", json!(value))
    }

    pub fn current_a(self, value: f64) -> Self {
        self.metric("current_a", json!(value))
    }

    pub fn temp_c(self, value: f64) -> Self {
        self.metric("temp_c", json!(value))
    }

    /// Raw override, for wrong types.
    pub fn metric(mut self, name: &str, value: Value) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn without_metric(mut self, name: &str) -> Self {
        self.metrics.remove(name);
        self
    }

    pub fn build(&self) -> Value {
        json!({
            "device_id": self.device_id,
            "timestamp": self.timestamp,
            "metrics": Value::Object(self.metrics.clone()),
        })
    }
}
