//! Power-path classification from the two instantaneous power estimates.

use serde::{Deserialize, Serialize};

/// Coarse operating state of the power system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    #[default]
    Idle,
    Charging,
    Discharging,
    Mixed,
}

/// Direction energy is believed to be flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerPath {
    SolarToLoad,
    SolarToBattery,
    BatteryToLoad,
    #[default]
    Unknown,
}

/// Classify `(p_in, p_out)` against a deadband. Values at or below the
/// deadband count as no flow, so near-zero noise never flips the state.
pub fn classify(p_in: f64, p_out: f64, deadband_w: f64) -> (PowerState, PowerPath) {
    // ---
    let has_in = p_in > deadband_w;
    let has_out = p_out > deadband_w;

    match (has_in, has_out) {
        (true, true) => (PowerState::Mixed, PowerPath::SolarToLoad),
        (true, false) => (PowerState::Charging, PowerPath::SolarToBattery),
        (false, true) => (PowerState::Discharging, PowerPath::BatteryToLoad),
        (false, false) => (PowerState::Idle, PowerPath::Unknown),
    }
}
