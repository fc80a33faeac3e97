//! Ingestion pipeline.
//!
//! [`Engine`] owns the [`Snapshot`] together with the integrator baseline and
//! the model parameters. One call to [`Engine::ingest`] validates a payload,
//! updates sticky fields, rolls the day over if needed, appends samples, runs
//! the virtual energy model, and records an audit event.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::classifier::classify;
use crate::config::Config;
use crate::estimator::{estimate_input_power, estimate_output_power, EstimatorConfig};
use crate::extract::Readings;
use crate::history::{DayKeyPolicy, History, HistoryLimits, SeriesName};
use crate::integrator::EnergyIntegrator;
use crate::models::{EnergyBlock, Event, EventCategory, Severity, Snapshot};
use crate::persistence::{LatestSnapshot, PersistJob};

/// Comfort bands used when the device does not report its own risk score.
const TEMP_BAND_C: (f64, f64) = (-10.0, 60.0);
const HUMIDITY_BAND_PCT: (f64, f64) = (10.0, 90.0);

/// Caller-visible ingest failures. Everything else is absorbed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("invalid JSON body: {0}")]
    InvalidJson(String),

    #[error("payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("no recognised telemetry fields in payload")]
    NoRecognisedFields,
}

/// Acknowledgement returned for an accepted payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestAck {
    pub ok: bool,
    pub bytes: usize,
    pub ts: DateTime<Utc>,
}

/// Mutable core state plus everything needed to advance it.
#[derive(Debug, Clone)]
pub struct Engine {
    snapshot: Snapshot,
    integrator: EnergyIntegrator,
    estimator: EstimatorConfig,
    deadband_w: f64,
    day_key: DayKeyPolicy,
    persist_history: bool,
    /// Bumped on every accepted payload; orders persisted copies.
    generation: u64,
}

impl Engine {
    pub fn new(config: &Config, now: DateTime<Utc>) -> Self {
        // ---
        let limits = HistoryLimits {
            max_samples: config.series_max_samples,
            max_days: config.history_max_days,
        };
        let today = config.day_key.day_key(now);

        Self {
            snapshot: Snapshot::new(today, limits, config.events_max),
            integrator: EnergyIntegrator::new(config.max_step_secs),
            estimator: config.estimator.clone(),
            deadband_w: config.deadband_w,
            day_key: config.day_key,
            persist_history: config.persist_history,
            generation: 0,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn integrator(&self) -> &EnergyIntegrator {
        &self.integrator
    }

    pub fn record_event(&mut self, event: Event) {
        self.snapshot.events.push(event);
    }

    /// Run one payload through the pipeline.
    ///
    /// Failures leave an `error` audit event behind and change nothing else.
    pub fn ingest(
        &mut self,
        payload: &Value,
        bytes: usize,
        now: DateTime<Utc>,
    ) -> Result<IngestAck, IngestError> {
        // ---
        match self.apply(payload, bytes, now) {
            Ok(ack) => {
                let detail = json!({
                    "bytes": bytes,
                    "power_state": self.snapshot.energy.power_state,
                    "day": self.snapshot.history.today.key,
                });
                self.record_event(
                    Event::new(now, EventCategory::Ingest, Severity::Info, "telemetry ingested")
                        .with_detail(detail),
                );
                Ok(ack)
            }
            Err(err) => {
                self.reject(&err, bytes, now);
                Err(err)
            }
        }
    }

    /// Audit a payload refused before or during validation.
    pub fn reject(&mut self, err: &IngestError, bytes: usize, now: DateTime<Utc>) {
        // ---
        tracing::warn!(error = %err, bytes, "rejected telemetry payload");
        self.record_event(
            Event::new(now, EventCategory::Ingest, Severity::Error, "telemetry rejected")
                .with_detail(json!({ "error": err.to_string(), "bytes": bytes })),
        );
    }

    fn apply(
        &mut self,
        payload: &Value,
        bytes: usize,
        now: DateTime<Utc>,
    ) -> Result<IngestAck, IngestError> {
        // ---
        if !payload.is_object() {
            return Err(IngestError::NotAnObject(json_kind(payload)));
        }
        let readings = Readings::extract(payload);
        if readings.is_empty() {
            return Err(IngestError::NoRecognisedFields);
        }

        // Out-of-order arrivals are recorded at the last accepted instant so
        // samples stay chronological and the day key only moves forward.
        let now = match self.snapshot.last_ingest_at {
            Some(last) if now < last => {
                tracing::warn!(%now, %last, "telemetry timestamp behind last ingest, clamping");
                last
            }
            _ => now,
        };

        self.apply_sticky(&readings);

        if let Some(closed) = self.snapshot.history.rollover(&self.day_key, now) {
            self.integrator.reset();
            tracing::info!(
                closed = %closed.key,
                today = %self.snapshot.history.today.key,
                in_wh = closed.totals.in_wh,
                out_wh = closed.totals.out_wh,
                "day rollover"
            );
            self.record_event(
                Event::new(now, EventCategory::History, Severity::Info, "day rollover")
                    .with_detail(json!({
                        "closed": closed.key,
                        "energyInWh": closed.totals.in_wh,
                        "energyOutWh": closed.totals.out_wh,
                        "energyNetWh": closed.totals.net_wh(),
                    })),
            );
        }

        let history = &mut self.snapshot.history;
        if let Some(t) = readings.temperature {
            history.append_sample(SeriesName::Temperature, now, t);
        }
        if let Some(lux) = readings.lux {
            history.append_sample(SeriesName::Lux, now, lux);
        }
        if readings.risk.is_some() || readings.temperature.is_some() || readings.humidity.is_some() {
            let env = &self.snapshot.environment;
            let risk = readings
                .risk
                .map(|r| r.clamp(0.0, 100.0))
                .or_else(|| derive_risk(env.temperature, env.humidity));
            if let Some(risk) = risk {
                history.append_sample(SeriesName::Risk, now, risk);
            }
        }

        self.refresh_energy_block();
        let energy = self.snapshot.energy;
        let step = self.integrator.integrate(
            &mut self.snapshot.history.today.totals,
            energy.p_in_w,
            energy.p_out_w,
            now,
        );
        let history = &mut self.snapshot.history;
        history.append_sample(SeriesName::EnergyIn, now, step.in_wh);
        history.append_sample(SeriesName::EnergyOut, now, step.out_wh);

        self.snapshot.status = self.status_message();
        self.snapshot.last_ingest_at = Some(now);
        self.snapshot.last_payload_bytes = Some(bytes);
        self.snapshot.last_payload = Some(payload.clone());
        self.generation += 1;

        tracing::debug!(
            p_in = energy.p_in_w,
            p_out = energy.p_out_w,
            state = ?energy.power_state,
            dt_secs = step.dt_secs,
            "energy step"
        );

        Ok(IngestAck {
            ok: true,
            bytes,
            ts: now,
        })
    }

    /// Overwrite sticky fields with whatever this payload carried.
    fn apply_sticky(&mut self, readings: &Readings) {
        // ---
        let env = &mut self.snapshot.environment;
        let device = &mut self.snapshot.device;

        if let Some(t) = readings.temperature {
            env.temperature = Some(t);
            device.sensors.insert("temperature".to_string(), t);
        }
        if let Some(t) = readings.probe_temperature {
            env.probe_temperature = Some(t);
            device.sensors.insert("probe_temperature".to_string(), t);
        }
        if let Some(h) = readings.humidity {
            env.humidity = Some(h);
            device.sensors.insert("humidity".to_string(), h);
        }
        if let Some(lux) = readings.lux {
            env.lux = Some(lux);
            env.lux_display = Some(lux.round() as i64);
            device.sensors.insert("lux".to_string(), lux);
        }
        if let Some(duty) = readings.duty {
            device.fan_duty = Some(duty);
            device.fan_on = duty > 0.0;
            device.sensors.insert("fan_duty".to_string(), duty);
        }

        match (readings.is_night, readings.lux) {
            (Some(flag), _) => env.is_night = Some(flag),
            (None, Some(lux)) => env.is_night = Some(lux < self.estimator.noise_floor_lux),
            (None, None) => {}
        }
    }

    /// Recompute power estimates and classification from sticky inputs.
    fn refresh_energy_block(&mut self) {
        // ---
        let lux = self.snapshot.environment.lux.unwrap_or(0.0);
        let duty = self.snapshot.device.fan_duty.unwrap_or(0.0);
        let p_in_w = estimate_input_power(&self.estimator, lux);
        let p_out_w = estimate_output_power(&self.estimator, duty);
        let (power_state, power_path_state) = classify(p_in_w, p_out_w, self.deadband_w);

        self.snapshot.energy = EnergyBlock {
            p_in_w,
            p_out_w,
            power_state,
            power_path_state,
        };
    }

    fn status_message(&self) -> String {
        // ---
        let fan = if self.snapshot.device.fan_on { "on" } else { "off" };
        match self.snapshot.environment.is_night {
            Some(true) => format!("Night: panel idle, running on battery, fan {fan}"),
            Some(false) => format!(
                "Day: harvesting ~{:.2} W, fan {fan}",
                self.snapshot.energy.p_in_w
            ),
            None => format!("Phase unknown, fan {fan}"),
        }
    }

    /// Re-apply a persisted latest payload at boot.
    ///
    /// Sticky fields and the instantaneous energy block are restored; no
    /// samples are appended and nothing is integrated.
    pub fn prime(&mut self, latest: &LatestSnapshot) {
        // ---
        let readings = Readings::extract(&latest.payload);
        self.apply_sticky(&readings);
        self.refresh_energy_block();
        self.snapshot.status = self.status_message();
        self.snapshot.last_ingest_at = Some(latest.received_at);
        self.snapshot.last_payload_bytes = Some(latest.bytes);
        self.snapshot.last_payload = Some(latest.payload.clone());
    }

    /// Replace history with a persisted copy, keeping the configured bounds.
    pub fn restore_history(&mut self, history: History) {
        let limits = self.snapshot.history.limits();
        self.snapshot.history = history.with_limits(limits);
    }

    /// Copy out what the persistence gateway writes. Called under the state
    /// lock; the write itself happens after the lock is released.
    pub fn persist_job(&self) -> PersistJob {
        // ---
        let latest = match (&self.snapshot.last_payload, self.snapshot.last_ingest_at) {
            (Some(payload), Some(received_at)) => Some(LatestSnapshot {
                received_at,
                bytes: self.snapshot.last_payload_bytes.unwrap_or(0),
                payload: payload.clone(),
            }),
            _ => None,
        };
        let history = self.persist_history.then(|| self.snapshot.history.clone());
        PersistJob {
            generation: self.generation,
            latest,
            history,
        }
    }
}

/// Environmental risk in `0..=100` from temperature and humidity excursions.
pub fn derive_risk(temperature: Option<f64>, humidity: Option<f64>) -> Option<f64> {
    // ---
    if temperature.is_none() && humidity.is_none() {
        return None;
    }
    let temp_part = temperature
        .map(|t| excursion(t, TEMP_BAND_C, 10.0))
        .unwrap_or(0.0);
    let hum_part = humidity
        .map(|h| excursion(h, HUMIDITY_BAND_PCT, 10.0))
        .unwrap_or(0.0);
    Some((temp_part + hum_part).clamp(0.0, 100.0))
}

/// 0 inside the band, ramping linearly to 50 at `span` outside it.
fn excursion(value: f64, (low, high): (f64, f64), span: f64) -> f64 {
    let outside = if value < low {
        low - value
    } else if value > high {
        value - high
    } else {
        0.0
    };
    (outside / span * 50.0).min(50.0)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::classifier::{PowerPath, PowerState};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn create_test_engine() -> Engine {
        Engine::new(&Config::default(), t0())
    }

    #[test]
    fn test_rejects_non_object_with_audit_event() {
        // ---
        let mut engine = create_test_engine();
        for payload in [json!([1, 2]), json!("hi"), json!(null), json!(42)] {
            let err = engine.ingest(&payload, 4, t0()).unwrap_err();
            assert!(matches!(err, IngestError::NotAnObject(_)));
        }
        let snap = engine.snapshot();
        assert!(!snap.has_data());
        assert_eq!(snap.events.len(), 4);
        assert!(snap.events.iter().all(|e| e.severity == Severity::Error));
        assert!(!snap.history.is_populated());
    }

    #[test]
    fn test_rejects_object_without_fields() {
        // ---
        let mut engine = create_test_engine();
        let err = engine
            .ingest(&json!({ "hello": "world", "lux": "dark" }), 30, t0())
            .unwrap_err();
        assert_eq!(err, IngestError::NoRecognisedFields);
        assert_eq!(engine.snapshot().environment, Default::default());
    }

    #[test]
    fn test_sticky_fields_survive_missing_values() {
        // ---
        let mut engine = create_test_engine();
        engine
            .ingest(&json!({ "temperature": 22.0, "humidity": 55.0, "lux": 1234.6 }), 10, t0())
            .unwrap();
        engine
            .ingest(&json!({ "temperature": "garbage", "lux": 900 }), 10, t0())
            .unwrap();

        let env = &engine.snapshot().environment;
        assert_eq!(env.temperature, Some(22.0));
        assert_eq!(env.humidity, Some(55.0));
        assert_eq!(env.lux, Some(900.0));
        assert_eq!(env.lux_display, Some(900));
        assert_eq!(engine.snapshot().device.sensors.get("temperature"), Some(&22.0));
        assert_eq!(engine.snapshot().history.today.series.temperature.len(), 1);
    }

    #[test]
    fn test_dark_payloads_stay_idle() {
        // ---
        let mut engine = create_test_engine();
        for i in 0..5 {
            engine
                .ingest(&json!({ "illuminance": 0 }), 16, t0() + Duration::seconds(30 * i))
                .unwrap();
            let energy = engine.snapshot().energy;
            assert_eq!(energy.power_state, PowerState::Idle);
            assert_eq!(energy.power_path_state, PowerPath::Unknown);
        }
        assert_eq!(engine.snapshot().history.today.totals, Default::default());
        assert_eq!(engine.snapshot().environment.is_night, Some(true));
    }

    #[test]
    fn test_full_light_charging_then_mixed() {
        // ---
        let mut engine = create_test_engine();
        let full = Config::default().estimator.full_scale_lux;

        engine
            .ingest(&json!({ "illuminance": full, "duty": 0 }), 20, t0())
            .unwrap();
        assert_eq!(engine.snapshot().energy.power_state, PowerState::Charging);
        assert_eq!(engine.snapshot().energy.power_path_state, PowerPath::SolarToBattery);
        assert_eq!(engine.snapshot().energy.p_in_w, 5.0);

        engine
            .ingest(&json!({ "illuminance": full, "duty": 255 }), 20, t0() + Duration::seconds(60))
            .unwrap();
        assert_eq!(engine.snapshot().energy.power_state, PowerState::Mixed);
        assert!(engine.snapshot().device.fan_on);
        assert!(engine.snapshot().history.today.totals.in_wh > 0.0);
    }

    #[test]
    fn test_net_energy_is_in_minus_out() {
        // ---
        let mut engine = create_test_engine();
        for i in 0..10 {
            engine
                .ingest(
                    &json!({ "lux": 30_000, "fan_duty": 200 }),
                    10,
                    t0() + Duration::seconds(20 * i),
                )
                .unwrap();
        }
        let totals = engine.snapshot().history.today.totals;
        assert_eq!(totals.net_wh(), totals.in_wh - totals.out_wh);
        let last_in = engine.snapshot().history.today.series.energy_in.back().unwrap();
        assert_eq!(last_in.v, totals.in_wh);
    }

    #[test]
    fn test_day_rollover_resets_baseline() {
        // ---
        let mut engine = create_test_engine();
        let late = Utc.with_ymd_and_hms(2025, 6, 1, 23, 59, 30).unwrap();
        engine.ingest(&json!({ "lux": 60_000 }), 10, late).unwrap();

        let next = late + Duration::seconds(40);
        engine.ingest(&json!({ "lux": 60_000 }), 10, next).unwrap();

        let snap = engine.snapshot();
        assert_eq!(snap.history.days.len(), 1);
        assert_eq!(snap.history.days[0].key, "2025-06-01");
        assert_eq!(snap.history.today.key, "2025-06-02");
        // The 40 s across midnight is not credited to the new day
        assert_eq!(snap.history.today.totals.in_wh, 0.0);
        assert_eq!(snap.history.today.series.lux.len(), 1);
        assert!(snap
            .events
            .iter()
            .any(|e| e.category == EventCategory::History));
    }

    #[test]
    fn test_skewed_timestamp_does_not_reopen_closed_day() {
        // ---
        let mut engine = create_test_engine();
        let before_midnight = Utc.with_ymd_and_hms(2025, 6, 1, 23, 59, 59).unwrap();
        let after_midnight = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 1).unwrap();

        for ts in [before_midnight, after_midnight, before_midnight] {
            engine
                .ingest(&json!({ "temperature": 20, "lux": 60_000 }), 10, ts)
                .unwrap();
        }

        let snap = engine.snapshot();
        let closed: Vec<&str> = snap.history.days.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(closed, vec!["2025-06-01"]);
        assert_eq!(snap.history.today.key, "2025-06-02");
        assert_eq!(snap.last_ingest_at, Some(after_midnight));

        let times: Vec<i64> = snap.history.today.series.temperature.iter().map(|s| s.t).collect();
        assert_eq!(times, vec![after_midnight.timestamp_millis(); 2]);
        assert_eq!(snap.history.today.totals.in_wh, 0.0);
    }

    #[test]
    fn test_generation_counts_accepted_payloads() {
        // ---
        let mut engine = create_test_engine();
        assert_eq!(engine.persist_job().generation, 0);

        engine.ingest(&json!({ "lux": 10 }), 11, t0()).unwrap();
        engine.ingest(&json!({ "nothing": 1 }), 12, t0()).unwrap_err();
        engine.ingest(&json!({ "lux": 20 }), 11, t0()).unwrap();
        assert_eq!(engine.persist_job().generation, 2);
    }

    #[test]
    fn test_full_day_of_minutely_ingests() {
        // ---
        let mut engine = create_test_engine();
        for i in 0..1440 {
            engine
                .ingest(&json!({ "temperature": 20.0 }), 22, t0() + Duration::seconds(60 * i))
                .unwrap();
        }
        // Bounded at the default 2000 samples; a day of minutes fits
        assert_eq!(engine.snapshot().history.today.series.temperature.len(), 1440);

        let mut cfg = Config::default();
        cfg.series_max_samples = 1000;
        let mut engine = Engine::new(&cfg, t0());
        for i in 0..1440 {
            engine
                .ingest(&json!({ "temperature": i }), 22, t0() + Duration::seconds(60 * i))
                .unwrap();
        }
        let series = &engine.snapshot().history.today.series.temperature;
        assert_eq!(series.len(), 1000);
        assert_eq!(series.front().unwrap().v, 440.0);
        assert_eq!(series.back().unwrap().v, 1439.0);
    }

    #[test]
    fn test_risk_prefers_device_value() {
        // ---
        let mut engine = create_test_engine();
        engine
            .ingest(&json!({ "temperature": 70.0, "risk": 140 }), 10, t0())
            .unwrap();
        assert_eq!(engine.snapshot().history.today.series.risk[0].v, 100.0);

        engine.ingest(&json!({ "temperature": 65.0 }), 10, t0()).unwrap();
        assert_eq!(engine.snapshot().history.today.series.risk[1].v, 25.0);
    }

    #[test]
    fn test_derive_risk() {
        // ---
        assert_eq!(derive_risk(None, None), None);
        assert_eq!(derive_risk(Some(25.0), Some(50.0)), Some(0.0));
        assert_eq!(derive_risk(Some(-20.0), None), Some(50.0));
        assert_eq!(derive_risk(Some(100.0), Some(0.0)), Some(100.0));
        assert_eq!(derive_risk(None, Some(95.0)), Some(25.0));
    }

    #[test]
    fn test_status_follows_phase() {
        // ---
        let mut engine = create_test_engine();
        engine.ingest(&json!({ "lux": 5000, "is_night": false }), 10, t0()).unwrap();
        assert!(engine.snapshot().status.starts_with("Day"));
        engine.ingest(&json!({ "night": true }), 10, t0()).unwrap();
        assert!(engine.snapshot().status.starts_with("Night"));
    }

    #[test]
    fn test_persist_job_respects_history_flag() {
        // ---
        let mut cfg = Config::default();
        cfg.persist_history = false;
        let mut engine = Engine::new(&cfg, t0());
        assert!(engine.persist_job().latest.is_none());

        engine.ingest(&json!({ "lux": 10 }), 11, t0()).unwrap();
        let job = engine.persist_job();
        assert!(job.history.is_none());
        assert_eq!(job.latest.unwrap().bytes, 11);
    }

    #[test]
    fn test_prime_restores_sticky_state_without_samples() {
        // ---
        let mut engine = create_test_engine();
        let latest = LatestSnapshot {
            received_at: t0(),
            bytes: 40,
            payload: json!({ "temperature": 19.5, "lux": 60_000, "duty": 0 }),
        };
        engine.prime(&latest);

        let snap = engine.snapshot();
        assert!(snap.has_data());
        assert_eq!(snap.environment.temperature, Some(19.5));
        assert_eq!(snap.energy.power_state, PowerState::Charging);
        assert!(!snap.history.is_populated());
        assert!(engine.integrator().last_timestamp().is_none());
    }
}
