use super::*;
use chrono::{TimeZone, Utc};

fn reading(temperature: f64, humidity: f64, pressure: f64) -> Reading {
    Reading {
        station_id: "ST-1".to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        temperature: Some(temperature),
        humidity: Some(humidity),
        pressure: Some(pressure),
    }
}

#[test]
fn test_in_range_reading_is_valid() {
    let samples = [
        (22.5, 40.0, 1013.0),
        (-50.0, 0.0, 300.0),
        (60.0, 100.0, 1100.0),
        (0.0, 50.0, 700.0),
    ];
    for (t, h, p) in samples {
        let outcome = validate(&reading(t, h, p));
        assert!(outcome.is_valid(), "{:?} flagged: {:?}", (t, h, p), outcome);
        assert_eq!(outcome.joined(), "");
    }
}

#[test]
fn test_each_field_out_of_range_is_reported() {
    let cases = [
        (reading(150.0, 40.0, 1013.0), "temperature out of range"),
        (reading(-50.1, 40.0, 1013.0), "temperature out of range"),
        (reading(20.0, 100.5, 1013.0), "humidity out of range"),
        (reading(20.0, -1.0, 1013.0), "humidity out of range"),
        (reading(20.0, 40.0, 299.9), "pressure out of range"),
        (reading(20.0, 40.0, 1200.0), "pressure out of range"),
    ];
    for (r, expected) in cases {
        let outcome = validate(&r);
        assert_eq!(outcome.violations().len(), 1, "{:?}", outcome);
        assert!(
            outcome.violations()[0].starts_with(expected),
            "expected '{}', got '{}'",
            expected,
            outcome.violations()[0]
        );
    }
}

#[test]
fn test_violation_message_includes_value_and_range() {
    let outcome = validate(&reading(150.0, 40.0, 1013.0));
    assert_eq!(
        outcome.violations()[0],
        "temperature out of range: 150 not in [-50, 60]"
    );
}

#[test]
fn test_violations_keep_table_order() {
    let outcome = validate(&reading(99.0, 120.0, 10.0));
    let fields: Vec<&str> = outcome
        .violations()
        .iter()
        .map(|v| v.split_whitespace().next().unwrap())
        .collect();
    assert_eq!(fields, vec!["temperature", "humidity", "pressure"]);
    assert_eq!(outcome.joined().matches(VIOLATION_SEPARATOR).count(), 2);
}

#[test]
fn test_missing_measurement_is_a_violation() {
    let mut r = reading(20.0, 40.0, 1013.0);
    r.humidity = None;
    let outcome = validate(&r);
    assert_eq!(outcome.violations(), ["humidity missing".to_string()]);
}

#[test]
fn test_range_table_matches_limits() {
    assert!(RANGES[0].contains(limits::TEMPERATURE.0));
    assert!(RANGES[0].contains(limits::TEMPERATURE.1));
    assert!(!RANGES[1].contains(100.01));
    assert!(!RANGES[2].contains(1100.01));
}
