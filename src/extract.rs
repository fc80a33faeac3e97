//! Field extraction from inbound payloads.
//!
//! Firmware revisions have placed the same reading under different keys and
//! nesting levels. Each logical field has an ordered list of JSON pointers;
//! the first one holding a finite number wins.

use serde_json::Value;

/// Numeric fields read from a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericField {
    Temperature,
    ProbeTemperature,
    Humidity,
    Lux,
    Duty,
    Risk,
}

/// One logical field and where to look for it, in priority order.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: NumericField,
    pub pointers: &'static [&'static str],
}

pub const NUMERIC_RULES: &[FieldRule] = &[
    FieldRule {
        field: NumericField::Temperature,
        pointers: &[
            "/temperature",
            "/temp",
            "/env/temperature",
            "/environment/temperature",
            "/sensors/temperature",
            "/sensors/sht40/temperature",
            "/dht/temperature",
        ],
    },
    FieldRule {
        field: NumericField::ProbeTemperature,
        pointers: &[
            "/probe_temperature",
            "/temperature2",
            "/env/probe_temperature",
            "/sensors/ds18b20/temperature",
        ],
    },
    FieldRule {
        field: NumericField::Humidity,
        pointers: &[
            "/humidity",
            "/hum",
            "/env/humidity",
            "/environment/humidity",
            "/sensors/humidity",
            "/sensors/sht40/humidity",
            "/dht/humidity",
        ],
    },
    FieldRule {
        field: NumericField::Lux,
        pointers: &[
            "/illuminance",
            "/lux",
            "/light",
            "/env/lux",
            "/env/illuminance",
            "/environment/illuminance",
            "/sensors/lux",
            "/sensors/bh1750/lux",
        ],
    },
    FieldRule {
        field: NumericField::Duty,
        pointers: &["/duty", "/fan_duty", "/fan/duty", "/actuators/fan/duty", "/pwm"],
    },
    FieldRule {
        field: NumericField::Risk,
        pointers: &["/risk", "/risk_score", "/ai/risk"],
    },
];

pub const NIGHT_POINTERS: &[&str] = &[
    "/is_night",
    "/night",
    "/env/is_night",
    "/environment/is_night",
];

/// Readings found in one payload. `None` means absent or unusable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    pub temperature: Option<f64>,
    pub probe_temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub lux: Option<f64>,
    pub duty: Option<f64>,
    pub risk: Option<f64>,
    pub is_night: Option<bool>,
}

impl Readings {
    pub fn extract(payload: &Value) -> Self {
        // ---
        let mut readings = Readings {
            is_night: first_match(payload, NIGHT_POINTERS, parse_flag),
            ..Readings::default()
        };
        for rule in NUMERIC_RULES {
            let value = first_match(payload, rule.pointers, parse_finite);
            match rule.field {
                NumericField::Temperature => readings.temperature = value,
                NumericField::ProbeTemperature => readings.probe_temperature = value,
                NumericField::Humidity => readings.humidity = value,
                NumericField::Lux => readings.lux = value,
                NumericField::Duty => readings.duty = value,
                NumericField::Risk => readings.risk = value,
            }
        }
        readings
    }

    pub fn is_empty(&self) -> bool {
        *self == Readings::default()
    }
}

/// Return the first pointer whose value the parser accepts.
pub fn first_match<T>(
    payload: &Value,
    pointers: &[&str],
    parse: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    pointers
        .iter()
        .filter_map(|ptr| payload.pointer(ptr))
        .find_map(parse)
}

/// Finite number from a JSON number or numeric string.
pub fn parse_finite(value: &Value) -> Option<f64> {
    // ---
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Day/night flag: booleans, non-zero numbers, and a few spellings.
pub fn parse_flag(value: &Value) -> Option<bool> {
    // ---
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(_) => parse_finite(value).map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "night" | "yes" => Some(true),
            "false" | "0" | "day" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
