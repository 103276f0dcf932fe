//! Range validation for decoded readings.
//!
//! Checks are field-local: each measurement is compared against its own
//! inclusive range and nothing else. There are no cross-field or
//! cross-reading rules.

use crate::model::Reading;

/// Inclusive physical limits per measured field.
pub mod limits {
    /// Temperature in °C.
    pub const TEMPERATURE: (f64, f64) = (-50.0, 60.0);
    /// Relative humidity in %.
    pub const HUMIDITY: (f64, f64) = (0.0, 100.0);
    /// Barometric pressure in hPa.
    pub const PRESSURE: (f64, f64) = (300.0, 1100.0);
}

/// Separator used when violations are stored as a single message.
pub const VIOLATION_SEPARATOR: &str = "; ";

/// A measured field with its valid range.
#[derive(Debug, Clone, Copy)]
pub struct FieldRange {
    pub field: &'static str,
    pub low: f64,
    pub high: f64,
    read: fn(&Reading) -> Option<f64>,
}

impl FieldRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }

    fn check(&self, reading: &Reading) -> Option<String> {
        match (self.read)(reading) {
            None => Some(format!("{} missing", self.field)),
            Some(value) if !self.contains(value) => Some(format!(
                "{} out of range: {} not in [{}, {}]",
                self.field, value, self.low, self.high
            )),
            Some(_) => None,
        }
    }
}

/// The fixed range table, in reporting order.
pub const RANGES: [FieldRange; 3] = [
    FieldRange {
        field: "temperature",
        low: limits::TEMPERATURE.0,
        high: limits::TEMPERATURE.1,
        read: |r| r.temperature,
    },
    FieldRange {
        field: "humidity",
        low: limits::HUMIDITY.0,
        high: limits::HUMIDITY.1,
        read: |r| r.humidity,
    },
    FieldRange {
        field: "pressure",
        low: limits::PRESSURE.0,
        high: limits::PRESSURE.1,
        read: |r| r.pressure,
    },
];

/// Ordered violations found in a reading. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    violations: Vec<String>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// All violations as one message, suitable for `error_message`.
    pub fn joined(&self) -> String {
        self.violations.join(VIOLATION_SEPARATOR)
    }
}

/// Run every range check against a reading.
///
/// A missing measurement counts as a violation since each check requires
/// its field.
pub fn validate(reading: &Reading) -> ValidationOutcome {
    ValidationOutcome {
        violations: RANGES.iter().filter_map(|r| r.check(reading)).collect(),
    }
}

#[cfg(test)]
mod tests;
