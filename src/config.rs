//! Configuration loader for the `solar-telemetry` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
//! Every value has a default, so an empty environment yields a working
//! service that stores its state under `./data`.
use std::{env, path::PathBuf};

use anyhow::{anyhow, ensure, Result};

use crate::estimator::EstimatorConfig;
use crate::history::DayKeyPolicy;

/// Parse an optional environment variable into `$ty`, falling back to a default.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Read an optional string environment variable, treating blank values as unset.
macro_rules! string_env {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| $default.to_string())
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Directory holding `latest.json` and `history.json`.
    pub storage_dir: PathBuf,

    /// Maximum accepted ingest request body, in bytes.
    pub max_body_bytes: usize,

    /// TCP port the HTTP server listens on.
    pub port: u16,

    /// Whether the history document is persisted next to the latest payload.
    pub persist_history: bool,

    /// Virtual energy model parameters.
    pub estimator: EstimatorConfig,

    /// Classifier deadband in watts.
    pub deadband_w: f64,

    /// Longest single integration step, in seconds.
    pub max_step_secs: i64,

    /// Per-series sample bound.
    pub series_max_samples: usize,

    /// Number of closed day records retained.
    pub history_max_days: usize,

    /// Number of audit events retained.
    pub events_max: usize,

    /// Calendar policy used to derive day keys.
    pub day_key: DayKeyPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./data"),
            max_body_bytes: 64 * 1024,
            port: 8080,
            persist_history: true,
            estimator: EstimatorConfig::default(),
            deadband_w: 0.05,
            max_step_secs: 60,
            series_max_samples: 2000,
            history_max_days: 14,
            events_max: 200,
            day_key: DayKeyPolicy::Utc,
        }
    }
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `STORAGE_DIR`, `MAX_BODY_BYTES`, `PORT`, `PERSIST_HISTORY`
/// - `PANEL_MAX_W`, `FULL_SCALE_LUX`, `PANEL_GAMMA`, `LUX_NOISE_FLOOR`
/// - `SUPPLY_VOLTAGE`, `BASELINE_CURRENT_MA`, `FAN_MAX_CURRENT_MA`, `FAN_DUTY_MAX`
/// - `POWER_DEADBAND_W`, `INTEGRATION_MAX_STEP_SECS`
/// - `SERIES_MAX_SAMPLES`, `HISTORY_MAX_DAYS`, `EVENTS_MAX`, `DAY_KEY_TZ`
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let defaults = Config::default();
    let est = defaults.estimator.clone();

    let storage_dir = PathBuf::from(string_env!("STORAGE_DIR", "./data"));
    let max_body_bytes = parse_env!("MAX_BODY_BYTES", usize, defaults.max_body_bytes);
    let port = parse_env!("PORT", u16, defaults.port);
    let persist_history = parse_env!("PERSIST_HISTORY", bool, defaults.persist_history);

    let estimator = EstimatorConfig {
        max_panel_w: parse_env!("PANEL_MAX_W", f64, est.max_panel_w),
        full_scale_lux: parse_env!("FULL_SCALE_LUX", f64, est.full_scale_lux),
        gamma: parse_env!("PANEL_GAMMA", f64, est.gamma),
        noise_floor_lux: parse_env!("LUX_NOISE_FLOOR", f64, est.noise_floor_lux),
        supply_voltage: parse_env!("SUPPLY_VOLTAGE", f64, est.supply_voltage),
        baseline_current_ma: parse_env!("BASELINE_CURRENT_MA", f64, est.baseline_current_ma),
        fan_max_current_ma: parse_env!("FAN_MAX_CURRENT_MA", f64, est.fan_max_current_ma),
        duty_max: parse_env!("FAN_DUTY_MAX", f64, est.duty_max),
    };

    let deadband_w = parse_env!("POWER_DEADBAND_W", f64, defaults.deadband_w);
    let max_step_secs = parse_env!("INTEGRATION_MAX_STEP_SECS", i64, defaults.max_step_secs);
    let series_max_samples = parse_env!("SERIES_MAX_SAMPLES", usize, defaults.series_max_samples);
    let history_max_days = parse_env!("HISTORY_MAX_DAYS", usize, defaults.history_max_days);
    let events_max = parse_env!("EVENTS_MAX", usize, defaults.events_max);
    let day_key: DayKeyPolicy = string_env!("DAY_KEY_TZ", "UTC")
        .parse()
        .map_err(|e| anyhow!("Invalid DAY_KEY_TZ: {}", e))?;

    let config = Config {
        storage_dir,
        max_body_bytes,
        port,
        persist_history,
        estimator,
        deadband_w,
        max_step_secs,
        series_max_samples,
        history_max_days,
        events_max,
        day_key,
    };
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Reject physically meaningless values before the service starts.
    pub fn validate(&self) -> Result<()> {
        // ---
        let est = &self.estimator;
        for (name, value) in [
            ("PANEL_MAX_W", est.max_panel_w),
            ("FULL_SCALE_LUX", est.full_scale_lux),
            ("PANEL_GAMMA", est.gamma),
            ("LUX_NOISE_FLOOR", est.noise_floor_lux),
            ("SUPPLY_VOLTAGE", est.supply_voltage),
            ("FAN_MAX_CURRENT_MA", est.fan_max_current_ma),
            ("FAN_DUTY_MAX", est.duty_max),
            ("POWER_DEADBAND_W", self.deadband_w),
        ] {
            ensure!(
                value.is_finite() && value > 0.0,
                "{} must be a positive number, got {}",
                name,
                value
            );
        }
        ensure!(
            est.baseline_current_ma.is_finite() && est.baseline_current_ma >= 0.0,
            "BASELINE_CURRENT_MA must be >= 0, got {}",
            est.baseline_current_ma
        );
        ensure!(self.max_step_secs > 0, "INTEGRATION_MAX_STEP_SECS must be > 0");
        ensure!(self.series_max_samples > 0, "SERIES_MAX_SAMPLES must be > 0");
        ensure!(self.history_max_days > 0, "HISTORY_MAX_DAYS must be > 0");
        ensure!(self.events_max > 0, "EVENTS_MAX must be > 0");
        ensure!(self.max_body_bytes > 0, "MAX_BODY_BYTES must be > 0");
        Ok(())
    }

    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        let est = &self.estimator;
        tracing::info!("Configuration loaded:");
        tracing::info!("  STORAGE_DIR               : {}", self.storage_dir.display());
        tracing::info!("  MAX_BODY_BYTES            : {}", self.max_body_bytes);
        tracing::info!("  PORT                      : {}", self.port);
        tracing::info!("  PERSIST_HISTORY           : {}", self.persist_history);
        tracing::info!("  PANEL_MAX_W               : {}", est.max_panel_w);
        tracing::info!("  FULL_SCALE_LUX            : {}", est.full_scale_lux);
        tracing::info!("  PANEL_GAMMA               : {}", est.gamma);
        tracing::info!("  LUX_NOISE_FLOOR           : {}", est.noise_floor_lux);
        tracing::info!("  SUPPLY_VOLTAGE            : {}", est.supply_voltage);
        tracing::info!("  BASELINE_CURRENT_MA       : {}", est.baseline_current_ma);
        tracing::info!("  FAN_MAX_CURRENT_MA        : {}", est.fan_max_current_ma);
        tracing::info!("  FAN_DUTY_MAX              : {}", est.duty_max);
        tracing::info!("  POWER_DEADBAND_W          : {}", self.deadband_w);
        tracing::info!("  INTEGRATION_MAX_STEP_SECS : {}", self.max_step_secs);
        tracing::info!("  SERIES_MAX_SAMPLES        : {}", self.series_max_samples);
        tracing::info!("  HISTORY_MAX_DAYS          : {}", self.history_max_days);
        tracing::info!("  EVENTS_MAX                : {}", self.events_max);
        tracing::info!("  DAY_KEY_TZ                : {}", self.day_key);
    }
}
