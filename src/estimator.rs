//! Virtual energy estimator.
//!
//! The sensor unit has no current or voltage sensing, so power is inferred
//! from what it does measure: illuminance on the panel side and the fan duty
//! cycle on the load side. The model is intentionally approximate.

use serde::{Deserialize, Serialize};

/// Tunable parameters of the virtual power model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    // ---
    /// Panel output at full-scale illuminance, in watts.
    pub max_panel_w: f64,
    /// Illuminance at which the panel reaches `max_panel_w`.
    pub full_scale_lux: f64,
    /// Exponent applied to the illuminance fraction (> 1 flattens low light).
    pub gamma: f64,
    /// Illuminance below which the panel is considered dark.
    pub noise_floor_lux: f64,
    /// Assumed supply rail voltage.
    pub supply_voltage: f64,
    /// Always-on controller and sensor draw, in milliamps. Zero by default so
    /// a dark, fan-off unit reads as idle.
    pub baseline_current_ma: f64,
    /// Fan draw at full duty, in milliamps.
    pub fan_max_current_ma: f64,
    /// Duty value that means full drive.
    pub duty_max: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            max_panel_w: 5.0,
            full_scale_lux: 60_000.0,
            gamma: 1.2,
            noise_floor_lux: 10.0,
            supply_voltage: 5.0,
            baseline_current_ma: 0.0,
            fan_max_current_ma: 180.0,
            duty_max: 255.0,
        }
    }
}

/// Estimate panel input power from illuminance.
///
/// Returns 0 for non-finite input, for anything under the noise floor, and
/// whenever the configuration produces a non-finite result.
pub fn estimate_input_power(cfg: &EstimatorConfig, lux: f64) -> f64 {
    // ---
    if !lux.is_finite() || lux < cfg.noise_floor_lux {
        return 0.0;
    }
    let fraction = (lux / cfg.full_scale_lux).clamp(0.0, 1.0);
    finite_or_zero(cfg.max_panel_w * fraction.powf(cfg.gamma))
}

/// Estimate load power from the fan duty value.
pub fn estimate_output_power(cfg: &EstimatorConfig, duty: f64) -> f64 {
    // ---
    let duty = if duty.is_finite() { duty } else { 0.0 };
    let duty = duty.clamp(0.0, cfg.duty_max.max(0.0));
    let load_ma = cfg.baseline_current_ma + cfg.fan_max_current_ma * (duty / cfg.duty_max);
    finite_or_zero(cfg.supply_voltage * (load_ma / 1000.0))
}

pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
