//! Error taxonomy of the kernel.
//!
//! Rate-limit rejections are not errors: they are an ordinary
//! [`Admission`](crate::limiter::Admission) outcome.

use serde::Serialize;

/// Failures of the persistence layer (journal, backing store).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("unknown device: {0}")]
    UnknownDevice(String),
}

/// Startup configuration problems. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value {value:?} for {key}")]
    Env { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One rejected field of an inbound payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    pub fn new(loc: &[&str], msg: impl Into<String>, kind: &str) -> Self {
        Self {
            loc: loc.iter().map(|s| s.to_string()).collect(),
            msg: msg.into(),
            kind: kind.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("store operation `{operation}` failed: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("validation failed ({} field errors)", .0.len())]
    Validation(Vec<FieldError>),
}

impl KernelError {
    pub fn store(operation: &'static str) -> impl FnOnce(StoreError) -> KernelError {
        move |source| KernelError::Store { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_carries_operation() {
        let err = KernelError::store("append_alerts")(StoreError::Unavailable("down".into()));
        assert_eq!(
            err.to_string(),
            "store operation `append_alerts` failed: store unavailable: down"
        );
    }

    #[test]
    fn test_field_error_serializes_type_key() {
        let fe = FieldError::new(&["body", "device_id"], "too long", "value_error");
        let v = serde_json::to_value(&fe).unwrap();
        assert_eq!(v["type"], "value_error");
        assert_eq!(v["loc"][1], "device_id");
    }
}
