/**
 * CONFIGURATION KERNEL - kernel.yaml + surcharges d'environnement
 *
 * ROLE :
 * Builds the runtime settings once at startup: YAML file (path from
 * BATTERY_KERNEL_CONFIG, default kernel.yaml), then BATTERY_* environment
 * overrides, then validation. Any failure is fatal to startup.
 *
 * A missing or empty file means "all defaults".
 */

use crate::error::ConfigError;
use crate::monitor::MonitorSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "BATTERY_KERNEL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "kernel.yaml";
const JOURNAL_FILE: &str = "journal.jsonl";

/// Upper bound for every duration setting (ten years).
pub const MAX_DURATION_SECONDS: u64 = 10 * 365 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub limiter: LimiterConf,
    pub monitor: MonitorConf,
    pub storage: StorageConf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConf {
    pub max_requests: usize,
    pub window_seconds: f64,
    pub idle_retention_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for LimiterConf {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_seconds: 1.0,
            idle_retention_seconds: 3600,
            sweep_interval_seconds: 60,
        }
    }
}

impl LimiterConf {
    /// Zero when `window_seconds` is not a usable duration; `validate` rejects those.
    pub fn window(&self) -> Duration {
        Duration::try_from_secs_f64(self.window_seconds).unwrap_or(Duration::ZERO)
    }

    pub fn idle_retention(&self) -> Duration {
        Duration::from_secs(self.idle_retention_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConf {
    pub staleness_threshold_seconds: u64,
    pub check_interval_seconds: u64,
    pub dedup_tolerance_seconds: u64,
}

impl Default for MonitorConf {
    fn default() -> Self {
        Self {
            staleness_threshold_seconds: 600,
            check_interval_seconds: 300,
            dedup_tolerance_seconds: 60,
        }
    }
}

impl MonitorConf {
    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            staleness_threshold: time::Duration::seconds(to_i64(self.staleness_threshold_seconds)),
            check_interval: Duration::from_secs(self.check_interval_seconds),
            dedup_tolerance: time::Duration::seconds(to_i64(self.dedup_tolerance_seconds)),
        }
    }
}

fn to_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConf {
    pub data_dir: PathBuf,
    /// No journal: everything is lost on restart.
    pub in_memory: bool,
}

impl Default for StorageConf {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./data"), in_memory: false }
    }
}

impl StorageConf {
    pub fn journal_path(&self) -> Option<PathBuf> {
        (!self.in_memory).then(|| self.data_dir.join(JOURNAL_FILE))
    }
}

impl KernelConfig {
    /// File, then process environment, then validation.
    pub async fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut cfg = Self::from_file(&path).await?;
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&txt)
    }

    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    /// Applies `BATTERY_*` overrides through `lookup` (the process environment
    /// in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("BATTERY_HTTP_BIND") {
            self.http.bind = bind;
        }
        override_parsed(&lookup, "BATTERY_RATE_LIMIT_REQUESTS", &mut self.limiter.max_requests)?;
        override_parsed(&lookup, "BATTERY_RATE_LIMIT_WINDOW_SECONDS", &mut self.limiter.window_seconds)?;
        override_parsed(
            &lookup,
            "BATTERY_RATE_LIMIT_IDLE_RETENTION_SECONDS",
            &mut self.limiter.idle_retention_seconds,
        )?;
        override_parsed(
            &lookup,
            "BATTERY_STALENESS_THRESHOLD_SECONDS",
            &mut self.monitor.staleness_threshold_seconds,
        )?;
        override_parsed(&lookup, "BATTERY_CHECK_INTERVAL_SECONDS", &mut self.monitor.check_interval_seconds)?;
        override_parsed(&lookup, "BATTERY_DEDUP_TOLERANCE_SECONDS", &mut self.monitor.dedup_tolerance_seconds)?;
        if let Some(dir) = lookup("BATTERY_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limiter.max_requests == 0 {
            return Err(ConfigError::Invalid("limiter.max_requests must be at least 1".into()));
        }
        let window = self.limiter.window_seconds;
        let usable = window.is_finite()
            && window > 0.0
            && window <= MAX_DURATION_SECONDS as f64
            && !self.limiter.window().is_zero();
        if !usable {
            return Err(ConfigError::Invalid(format!(
                "limiter.window_seconds must be between 1ns and {MAX_DURATION_SECONDS}s, got {window}"
            )));
        }
        check_seconds("limiter.idle_retention_seconds", self.limiter.idle_retention_seconds, false)?;
        check_seconds("limiter.sweep_interval_seconds", self.limiter.sweep_interval_seconds, false)?;
        check_seconds(
            "monitor.staleness_threshold_seconds",
            self.monitor.staleness_threshold_seconds,
            false,
        )?;
        check_seconds("monitor.check_interval_seconds", self.monitor.check_interval_seconds, false)?;
        check_seconds("monitor.dedup_tolerance_seconds", self.monitor.dedup_tolerance_seconds, true)?;
        Ok(())
    }
}

fn check_seconds(key: &str, value: u64, zero_ok: bool) -> Result<(), ConfigError> {
    if value == 0 && !zero_ok {
        return Err(ConfigError::Invalid(format!("{key} must be positive")));
    }
    if value > MAX_DURATION_SECONDS {
        return Err(ConfigError::Invalid(format!(
            "{key} must be at most {MAX_DURATION_SECONDS}, got {value}"
        )));
    }
    Ok(())
}

fn override_parsed<T, F>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else { return Ok(()) };
    *slot = raw.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: raw.clone(),
    })?;
    Ok(())
}
