//! Data model for the in-memory system snapshot.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::classifier::{PowerPath, PowerState};
use crate::history::{History, HistoryLimits};

// ---

/// Environmental readings. Every field is sticky once observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub temperature: Option<f64>,
    pub probe_temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub lux: Option<f64>,
    /// `lux` rounded for display.
    pub lux_display: Option<i64>,
    pub is_night: Option<bool>,
}

/// Last-known device readings and actuator state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Legacy per-sensor mapping mirroring the latest readings.
    pub sensors: BTreeMap<String, f64>,
    pub fan_duty: Option<f64>,
    pub fan_on: bool,
}

/// Instantaneous power estimates and the derived operating state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyBlock {
    #[serde(rename = "in")]
    pub p_in_w: f64,
    #[serde(rename = "out")]
    pub p_out_w: f64,
    pub power_state: PowerState,
    pub power_path_state: PowerPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Ingest,
    History,
    Persistence,
    System,
}

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub category: EventCategory,
    pub message: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl Event {
    pub fn new(
        ts: DateTime<Utc>,
        category: EventCategory,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts,
            category,
            message: message.into(),
            severity,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Bounded ring of audit events, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLog {
    entries: VecDeque<Event>,
    max: usize,
}

impl EventLog {
    pub fn new(max: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max: max.max(1),
        }
    }

    pub fn push(&mut self, event: Event) {
        self.entries.push_back(event);
        while self.entries.len() > self.max {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&Event> {
        self.entries.back()
    }
}

/// The complete current state. Handlers only ever see clones of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub environment: Environment,
    pub device: Device,
    pub energy: EnergyBlock,
    pub history: History,
    pub events: EventLog,
    pub status: String,
    pub last_ingest_at: Option<DateTime<Utc>>,
    pub last_payload_bytes: Option<usize>,
    pub last_payload: Option<Value>,
}

impl Snapshot {
    pub fn new(today_key: impl Into<String>, limits: HistoryLimits, events_max: usize) -> Self {
        Self {
            environment: Environment::default(),
            device: Device::default(),
            energy: EnergyBlock::default(),
            history: History::new(today_key, limits),
            events: EventLog::new(events_max),
            status: "Waiting for first telemetry".to_string(),
            last_ingest_at: None,
            last_payload_bytes: None,
            last_payload: None,
        }
    }

    pub fn has_data(&self) -> bool {
        self.last_ingest_at.is_some()
    }
}
