//! ==============================================================================
//! alert.rs - threshold classification
//! ==============================================================================
//!
//! purpose:
//!     turns a (temperature, humidity) pair into at most one alert.
//!     used by the sensor reader (server side) and again by the notifier,
//!     which re-evaluates with its own locally configured thresholds.
//!
//! priority:
//!     temperature before humidity, high before low. the first matching
//!     condition wins; there is never more than one active alert.
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};

/// Alert limits. Temperatures in fahrenheit, humidity in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub temp_high_f: f64,
    pub temp_low_f: f64,
    pub humidity_high: f64,
    pub humidity_low: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighTemp,
    LowTemp,
    HighHumidity,
    LowHumidity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    /// full sentence for logs and the api
    pub message: String,
    /// fits one 16 character lcd line
    pub display: &'static str,
}

impl AlertKind {
    pub fn display_message(self) -> &'static str {
        match self {
            AlertKind::HighTemp => "Alert: High temp",
            AlertKind::LowTemp => "Alert: Low temp",
            AlertKind::HighHumidity => "Alert: High hum",
            AlertKind::LowHumidity => "Alert: Low humid",
        }
    }
}

impl Alert {
    fn new(kind: AlertKind, message: String) -> Self {
        Self { kind, message, display: kind.display_message() }
    }
}

/// Classify a reading against `thresholds`. Thresholds print with their
/// shortest exact form, keeping a trailing `.0` (`85.0`, `99.97`).
///
/// A missing temperature suppresses alerting entirely, even when humidity is
/// out of range.
pub fn evaluate(temp_f: Option<f64>, humidity: Option<f64>, thresholds: &Thresholds) -> Option<Alert> {
    let temp_f = temp_f?;

    if temp_f > thresholds.temp_high_f {
        return Some(Alert::new(
            AlertKind::HighTemp,
            format!("Temperature {:.1}F exceeds {:?}F", temp_f, thresholds.temp_high_f),
        ));
    }
    if temp_f < thresholds.temp_low_f {
        return Some(Alert::new(
            AlertKind::LowTemp,
            format!("Temperature {:.1}F below {:?}F", temp_f, thresholds.temp_low_f),
        ));
    }

    let humidity = humidity?;
    if humidity > thresholds.humidity_high {
        return Some(Alert::new(
            AlertKind::HighHumidity,
            format!("Humidity {:.1}% exceeds {:?}%", humidity, thresholds.humidity_high),
        ));
    }
    if humidity < thresholds.humidity_low {
        return Some(Alert::new(
            AlertKind::LowHumidity,
            format!("Humidity {:.1}% below {:?}%", humidity, thresholds.humidity_low),
        ));
    }

    None
}
