use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::alert::{Alert, AlertKind};

/// One successful sensor sample. Replaced wholesale by the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub temperature_c: f64,
    /// calibrated: `c * 9/5 + 32 + offset`
    pub temperature_f: f64,
    pub humidity: f64,
    pub timestamp: OffsetDateTime,
}

impl Reading {
    pub fn from_celsius(temperature_c: f64, humidity: f64, offset_f: f64, timestamp: OffsetDateTime) -> Self {
        Self {
            temperature_c,
            temperature_f: temperature_c * 9.0 / 5.0 + 32.0 + offset_f,
            humidity,
            timestamp,
        }
    }
}

/// Everything the server knows. Owned by `SharedState`, handed out as clones.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemState {
    /// last good reading, kept across failed polls
    pub reading: Option<Reading>,
    pub last_error: Option<String>,
    pub last_read_ok: bool,
    pub current_alert: Option<Alert>,
    /// keys fixed at construction
    pub device_flags: BTreeMap<String, bool>,
}

impl SystemState {
    pub fn new<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reading: None,
            last_error: None,
            last_read_ok: false,
            current_alert: None,
            device_flags: devices.into_iter().map(|name| (name.into(), false)).collect(),
        }
    }

    pub fn to_snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            temperature_c: self.reading.as_ref().map(|r| round2(r.temperature_c)),
            temperature_f: self.reading.as_ref().map(|r| round2(r.temperature_f)),
            humidity: self.reading.as_ref().map(|r| round2(r.humidity)),
            timestamp: self.reading.as_ref().map(|r| r.timestamp),
            error: self.last_error.clone(),
            last_read_ok: self.last_read_ok,
            alert: self.current_alert.as_ref().map(|a| a.message.clone()),
            alert_kind: self.current_alert.as_ref().map(|a| a.kind),
            devices: self
                .device_flags
                .iter()
                .map(|(name, on)| (device_key(name), *on))
                .collect(),
        }
    }
}

/// JSON body of `GET /sensor`, shared by the server and the notifier client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub temperature_c: Option<f64>,
    pub temperature_f: Option<f64>,
    pub humidity: Option<f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub error: Option<String>,
    pub last_read_ok: bool,
    pub alert: Option<String>,
    #[serde(default)]
    pub alert_kind: Option<AlertKind>,
    /// `"{device}_on": bool` for every configured device
    #[serde(flatten)]
    pub devices: BTreeMap<String, bool>,
}

impl SensorSnapshot {
    pub fn device_on(&self, name: &str) -> Option<bool> {
        self.devices.get(&device_key(name)).copied()
    }

    /// (device name, on) pairs
    pub fn device_flags(&self) -> impl Iterator<Item = (&str, bool)> {
        self.devices
            .iter()
            .filter_map(|(key, on)| key.strip_suffix("_on").map(|name| (name, *on)))
    }
}

pub fn device_key(name: &str) -> String {
    format!("{}_on", name)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{evaluate, Thresholds};

    #[test]
    fn test_fahrenheit_conversion_applies_offset() {
        let reading = Reading::from_celsius(25.0, 50.0, -2.0, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(reading.temperature_f, 75.0);

        let reading = Reading::from_celsius(0.0, 50.0, 0.0, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(reading.temperature_f, 32.0);
    }

    #[test]
    fn test_initial_state() {
        let state = SystemState::new(["heat", "fan"]);
        assert!(state.reading.is_none());
        assert!(!state.last_read_ok);
        assert_eq!(state.device_flags.len(), 2);
        assert!(state.device_flags.values().all(|on| !on));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let mut state = SystemState::new(["heat", "light"]);
        let reading = Reading::from_celsius(33.333, 50.0, -2.0, OffsetDateTime::UNIX_EPOCH);
        let thresholds =
            Thresholds { temp_high_f: 85.0, temp_low_f: 70.0, humidity_high: 99.97, humidity_low: 65.0 };
        state.current_alert = evaluate(Some(reading.temperature_f), Some(reading.humidity), &thresholds);
        state.reading = Some(reading);
        state.last_read_ok = true;
        state.device_flags.insert("heat".to_string(), true);

        let json = serde_json::to_value(state.to_snapshot()).unwrap();
        assert_eq!(json["temperature_c"], 33.33);
        assert_eq!(json["temperature_f"], 90.0);
        assert_eq!(json["humidity"], 50.0);
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00Z");
        assert_eq!(json["error"], serde_json::Value::Null);
        assert_eq!(json["last_read_ok"], true);
        assert_eq!(json["alert"], "Temperature 90.0F exceeds 85.0F");
        assert_eq!(json["alert_kind"], "high_temp");
        assert_eq!(json["heat_on"], true);
        assert_eq!(json["light_on"], false);
    }

    #[test]
    fn test_snapshot_parses_server_json() {
        let body = r#"{
            "temperature_c": null, "temperature_f": null, "humidity": null,
            "timestamp": null, "error": "Sensor init failed: no bus",
            "last_read_ok": false, "alert": null, "alert_kind": null,
            "heat_on": true, "fan_on": false
        }"#;
        let snapshot: SensorSnapshot = serde_json::from_str(body).unwrap();

        assert_eq!(snapshot.error.as_deref(), Some("Sensor init failed: no bus"));
        assert_eq!(snapshot.device_on("heat"), Some(true));
        assert_eq!(snapshot.device_on("fan"), Some(false));
        assert_eq!(snapshot.device_on("light"), None);

        let flags: Vec<_> = snapshot.device_flags().collect();
        assert_eq!(flags, vec![("fan", false), ("heat", true)]);
    }

    #[test]
    fn test_device_keys_stay_apart_from_fields() {
        let mut state = SystemState::new(["last_read", "alert"]);
        state.last_read_ok = true;
        state.device_flags.insert("last_read".to_string(), false);
        state.device_flags.insert("alert".to_string(), true);

        let json = serde_json::to_value(state.to_snapshot()).unwrap();
        assert_eq!(json["last_read_ok"], true);
        assert_eq!(json["last_read_on"], false);
        assert_eq!(json["alert"], serde_json::Value::Null);
        assert_eq!(json["alert_on"], true);

        let snapshot: SensorSnapshot = serde_json::from_value(json).unwrap();
        assert!(snapshot.last_read_ok);
        assert_eq!(snapshot.device_on("last_read"), Some(false));
        assert_eq!(snapshot.device_on("alert"), Some(true));
        assert_eq!(snapshot.devices.len(), 2);
    }
}
