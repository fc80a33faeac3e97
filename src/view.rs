//! Read-view construction.
//!
//! Views are built from an owned copy of the [`Snapshot`], so nothing here can
//! reach back into live state. Besides the canonical history the view carries
//! a legacy `timeseries` alias shaped the way older dashboards expect.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::classifier::{PowerPath, PowerState};
use crate::history::{DaySeries, History, SERIES_NAMES};
use crate::integrator::DayTotals;
use crate::models::{Device, Environment, Event, Snapshot};

/// Energy block as served: instantaneous powers plus today's totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyView {
    #[serde(rename = "in")]
    pub p_in_w: f64,
    #[serde(rename = "out")]
    pub p_out_w: f64,
    pub power_state: PowerState,
    pub power_path_state: PowerPath,
    #[serde(rename = "energyInWh")]
    pub energy_in_wh: f64,
    #[serde(rename = "energyOutWh")]
    pub energy_out_wh: f64,
    #[serde(rename = "energyNetWh")]
    pub energy_net_wh: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TotalsView {
    #[serde(rename = "energyInWh")]
    pub in_wh: f64,
    #[serde(rename = "energyOutWh")]
    pub out_wh: f64,
    #[serde(rename = "energyNetWh")]
    pub net_wh: f64,
}

impl From<DayTotals> for TotalsView {
    fn from(totals: DayTotals) -> Self {
        Self {
            in_wh: totals.in_wh,
            out_wh: totals.out_wh,
            net_wh: totals.net_wh(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySummary {
    pub key: String,
    pub totals: TotalsView,
}

/// Legacy history shape: always fully populated, never null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyHistory {
    pub day: String,
    pub counts: BTreeMap<&'static str, usize>,
    #[serde(flatten)]
    pub series: DaySeries,
    pub totals: TotalsView,
    pub days: Vec<DaySummary>,
}

impl LegacyHistory {
    fn alias(history: &History) -> Self {
        // ---
        Self {
            day: history.today.key.clone(),
            counts: counts_of(&history.today.series),
            series: history.today.series.clone(),
            totals: history.today.totals.into(),
            days: history
                .days
                .iter()
                .map(|d| DaySummary {
                    key: d.key.clone(),
                    totals: d.totals.into(),
                })
                .collect(),
        }
    }

    fn skeleton(day: &str) -> Self {
        // ---
        let series = DaySeries::default();
        Self {
            day: day.to_string(),
            counts: counts_of(&series),
            series,
            totals: DayTotals::default().into(),
            days: Vec::new(),
        }
    }
}

/// Full payload served by the state read operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewPayload {
    pub ok: bool,
    pub server_time: DateTime<Utc>,
    pub last_ingest_at: Option<DateTime<Utc>>,
    pub last_payload_bytes: Option<usize>,
    pub status: String,
    pub environment: Environment,
    pub device: Device,
    pub energy: EnergyView,
    pub history: History,
    pub timeseries: LegacyHistory,
    pub events: Vec<Event>,
}

/// Build the served view from an owned snapshot copy.
pub fn build_view(snapshot: Snapshot, server_time: DateTime<Utc>) -> ViewPayload {
    // ---
    let totals = snapshot.history.today.totals;
    let energy = EnergyView {
        p_in_w: snapshot.energy.p_in_w,
        p_out_w: snapshot.energy.p_out_w,
        power_state: snapshot.energy.power_state,
        power_path_state: snapshot.energy.power_path_state,
        energy_in_wh: totals.in_wh,
        energy_out_wh: totals.out_wh,
        energy_net_wh: totals.net_wh(),
    };

    let timeseries = if snapshot.history.is_populated() {
        LegacyHistory::alias(&snapshot.history)
    } else {
        LegacyHistory::skeleton(&snapshot.history.today.key)
    };

    ViewPayload {
        ok: true,
        server_time,
        last_ingest_at: snapshot.last_ingest_at,
        last_payload_bytes: snapshot.last_payload_bytes,
        status: snapshot.status,
        environment: snapshot.environment,
        device: snapshot.device,
        energy,
        timeseries,
        history: snapshot.history,
        events: snapshot.events.iter().cloned().collect(),
    }
}

fn counts_of(series: &DaySeries) -> BTreeMap<&'static str, usize> {
    SERIES_NAMES
        .iter()
        .map(|name| (name.as_str(), series.get(*name).len()))
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::config::Config;
    use crate::ingest::Engine;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_boot_view_has_empty_skeleton() {
        // ---
        let engine = Engine::new(&Config::default(), t0());
        let view = build_view(engine.snapshot().clone(), t0());
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["timeseries"]["day"], "2025-06-01");
        for name in ["temperature", "lux", "energy_in", "energy_out", "risk"] {
            assert_eq!(json["timeseries"][name], json!([]), "{name} present and empty");
            assert_eq!(json["timeseries"]["counts"][name], 0);
        }
        assert_eq!(json["timeseries"]["totals"]["energyNetWh"], 0.0);
        assert!(json["last_ingest_at"].is_null());
    }

    #[test]
    fn test_populated_view_aliases_history() {
        // ---
        let mut engine = Engine::new(&Config::default(), t0());
        for i in 0..3 {
            engine
                .ingest(
                    &json!({ "temperature": 20 + i, "lux": 45_000, "duty": 64 }),
                    48,
                    t0() + Duration::seconds(30 * i),
                )
                .unwrap();
        }
        let view = build_view(engine.snapshot().clone(), t0() + Duration::minutes(5));

        assert_eq!(view.timeseries.series, view.history.today.series);
        assert_eq!(view.timeseries.counts["temperature"], 3);
        assert_eq!(view.timeseries.counts["energy_in"], 3);
        assert_eq!(view.energy.energy_net_wh, view.energy.energy_in_wh - view.energy.energy_out_wh);
        assert_eq!(view.last_payload_bytes, Some(48));
        assert_eq!(view.events.len(), 3);
        assert_eq!(view.server_time, t0() + Duration::minutes(5));
    }

    #[test]
    fn test_building_view_leaves_snapshot_untouched() {
        // ---
        let mut engine = Engine::new(&Config::default(), t0());
        engine.ingest(&json!({ "lux": 100 }), 12, t0()).unwrap();
        let before = engine.snapshot().clone();

        let mut view = build_view(engine.snapshot().clone(), t0());
        view.history.today.series.lux.clear();
        view.environment.lux = None;

        assert_eq!(engine.snapshot(), &before);
    }

    #[test]
    fn test_energy_wire_names() {
        // ---
        let engine = Engine::new(&Config::default(), t0());
        let json = serde_json::to_value(build_view(engine.snapshot().clone(), t0())).unwrap();
        let energy = &json["energy"];
        for key in [
            "in",
            "out",
            "power_state",
            "power_path_state",
            "energyInWh",
            "energyOutWh",
            "energyNetWh",
        ] {
            assert!(energy.get(key).is_some(), "missing energy.{key}");
        }
    }
}
