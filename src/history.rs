//! Bounded time-series history: today's open record plus closed past days.
//!
//! Day keys are calendar dates (`YYYY-MM-DD`) in an explicit zone. Both the
//! zone and the clock are injected so the rollover point is deterministic.

use std::{collections::VecDeque, fmt, str::FromStr, sync::Mutex};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::integrator::DayTotals;

/// Every tracked metric. Order here is the order used in views.
pub const SERIES_NAMES: [SeriesName; 5] = [
    SeriesName::Temperature,
    SeriesName::Lux,
    SeriesName::EnergyIn,
    SeriesName::EnergyOut,
    SeriesName::Risk,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesName {
    Temperature,
    Lux,
    EnergyIn,
    EnergyOut,
    Risk,
}

impl SeriesName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesName::Temperature => "temperature",
            SeriesName::Lux => "lux",
            SeriesName::EnergyIn => "energy_in",
            SeriesName::EnergyOut => "energy_out",
            SeriesName::Risk => "risk",
        }
    }
}

/// One point of a series. `t` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub t: i64,
    pub v: f64,
}

/// Per-metric sample sequences for one day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaySeries {
    #[serde(default)]
    pub temperature: VecDeque<Sample>,
    #[serde(default)]
    pub lux: VecDeque<Sample>,
    #[serde(default)]
    pub energy_in: VecDeque<Sample>,
    #[serde(default)]
    pub energy_out: VecDeque<Sample>,
    #[serde(default)]
    pub risk: VecDeque<Sample>,
}

impl DaySeries {
    pub fn get(&self, name: SeriesName) -> &VecDeque<Sample> {
        match name {
            SeriesName::Temperature => &self.temperature,
            SeriesName::Lux => &self.lux,
            SeriesName::EnergyIn => &self.energy_in,
            SeriesName::EnergyOut => &self.energy_out,
            SeriesName::Risk => &self.risk,
        }
    }

    fn get_mut(&mut self, name: SeriesName) -> &mut VecDeque<Sample> {
        match name {
            SeriesName::Temperature => &mut self.temperature,
            SeriesName::Lux => &mut self.lux,
            SeriesName::EnergyIn => &mut self.energy_in,
            SeriesName::EnergyOut => &mut self.energy_out,
            SeriesName::Risk => &mut self.risk,
        }
    }

    pub fn is_empty(&self) -> bool {
        SERIES_NAMES.iter().all(|name| self.get(*name).is_empty())
    }
}

/// A calendar day's worth of samples and energy totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    pub key: String,
    #[serde(default)]
    pub series: DaySeries,
    #[serde(default)]
    pub totals: DayTotals,
}

impl DayRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            series: DaySeries::default(),
            totals: DayTotals::default(),
        }
    }
}

/// What [`History::rollover`] closed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedDay {
    pub key: String,
    pub totals: DayTotals,
}

/// Calendar policy for day keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayKeyPolicy {
    Utc,
    Zone(Tz),
}

impl DayKeyPolicy {
    pub fn day_key(&self, ts: DateTime<Utc>) -> String {
        // ---
        match self {
            DayKeyPolicy::Utc => ts.date_naive().to_string(),
            DayKeyPolicy::Zone(tz) => ts.with_timezone(tz).date_naive().to_string(),
        }
    }
}

impl FromStr for DayKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "UTC" | "utc" | "Z" => Ok(DayKeyPolicy::Utc),
            name => name
                .parse::<Tz>()
                .map(DayKeyPolicy::Zone)
                .map_err(|e| format!("unknown time zone '{name}': {e}")),
        }
    }
}

impl fmt::Display for DayKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayKeyPolicy::Utc => write!(f, "UTC"),
            DayKeyPolicy::Zone(tz) => write!(f, "{}", tz.name()),
        }
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, ts: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = ts;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Retention bounds for [`History`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    pub max_samples: usize,
    pub max_days: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_samples: 2000,
            max_days: 14,
        }
    }
}

/// Today's open record plus the closed days before it, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub today: DayRecord,
    #[serde(default)]
    pub days: VecDeque<DayRecord>,
    #[serde(skip)]
    limits: HistoryLimits,
}

impl History {
    pub fn new(today_key: impl Into<String>, limits: HistoryLimits) -> Self {
        Self {
            today: DayRecord::new(today_key),
            days: VecDeque::new(),
            limits,
        }
    }

    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }

    /// Install bounds on a freshly deserialized history, trimming anything
    /// that was persisted under larger limits.
    pub fn with_limits(mut self, limits: HistoryLimits) -> Self {
        // ---
        self.limits = limits;
        for name in SERIES_NAMES {
            trim_front(self.today.series.get_mut(name), limits.max_samples);
        }
        for day in self.days.iter_mut() {
            for name in SERIES_NAMES {
                trim_front(day.series.get_mut(name), limits.max_samples);
            }
        }
        trim_front(&mut self.days, limits.max_days);
        self
    }

    /// Append a sample to one of today's series. Non-finite values are dropped.
    pub fn append_sample(&mut self, name: SeriesName, ts: DateTime<Utc>, value: f64) {
        // ---
        if !value.is_finite() {
            return;
        }
        let series = self.today.series.get_mut(name);
        series.push_back(Sample {
            t: ts.timestamp_millis(),
            v: value,
        });
        trim_front(series, self.limits.max_samples);
    }

    /// Close today if `now` falls on a later day. Returns a summary of the
    /// closed record when a rollover happened; the caller must then reset
    /// the integrator baseline.
    ///
    /// Keys are `YYYY-MM-DD`, so string order is calendar order. A key earlier
    /// than today's never reopens a closed day.
    pub fn rollover(&mut self, policy: &DayKeyPolicy, now: DateTime<Utc>) -> Option<ClosedDay> {
        // ---
        let key = policy.day_key(now);
        if key <= self.today.key {
            return None;
        }
        let closed = std::mem::replace(&mut self.today, DayRecord::new(key));
        let summary = ClosedDay {
            key: closed.key.clone(),
            totals: closed.totals,
        };
        self.days.push_back(closed);
        trim_front(&mut self.days, self.limits.max_days);
        Some(summary)
    }

    /// Whether anything has ever been recorded.
    pub fn is_populated(&self) -> bool {
        !self.days.is_empty() || !self.today.series.is_empty()
    }

    pub fn counts(&self) -> Vec<(SeriesName, usize)> {
        SERIES_NAMES
            .iter()
            .map(|name| (*name, self.today.series.get(*name).len()))
            .collect()
    }
}

fn trim_front<T>(buf: &mut VecDeque<T>, max: usize) {
    while buf.len() > max {
        buf.pop_front();
    }
}
