//! ==============================================================================
//! sensor.rs - background sensor reader
//! ==============================================================================
//!
//! purpose:
//!     polls the temperature/humidity sensor every `polling.interval_seconds`,
//!     evaluates the alert and pushes both into SharedState.
//!
//! per cycle:
//!
//! ```text
//! idle ──> read (attempt 1..=max_attempts) ──┬──> success: replace reading + alert
//!             ▲            │ i/o error         │
//!             └── sleep ◄──┘                   └──> failure: record error, keep reading
//! ```
//!
//! a failed cycle is never fatal; the next interval simply tries again.
//!
//! relationships:
//!     - uses: hal.rs (SensorDriver), alert.rs (evaluate), state.rs (SharedState)
//!     - spawned by: main.rs (server and watch roles)
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::alert::{self, Thresholds};
use crate::config::HostConfig;
use crate::domain::Reading;
use crate::error::SensorError;
use crate::hal::SensorDriver;
use crate::state::SharedState;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

pub struct SensorReader {
    sensor: Arc<dyn SensorDriver>,
    state: SharedState,
    thresholds: Thresholds,
    offset_f: f64,
    retry: RetryPolicy,
    interval: Duration,
    show_data: bool,
}

impl SensorReader {
    pub fn new(sensor: Arc<dyn SensorDriver>, state: SharedState, config: &HostConfig) -> Self {
        Self {
            sensor,
            state,
            thresholds: config.thresholds(),
            offset_f: config.calibration.temp_offset_f,
            retry: RetryPolicy {
                max_attempts: config.polling.max_attempts.max(1),
                delay: Duration::from_millis(config.polling.retry_delay_ms),
            },
            interval: config.poll_interval(),
            show_data: config.logging.show_sensor_data,
        }
    }

    /// One raw (celsius, humidity) measurement. Driver calls block, so they
    /// run on the blocking pool.
    async fn read_raw(&self) -> Result<(f64, f64), SensorError> {
        let sensor = self.sensor.clone();
        tokio::task::spawn_blocking(move || sensor.read().map_err(SensorError::from))
            .await
            .map_err(|e| SensorError::Read(format!("task join error: {}", e)))?
    }

    /// Read with bounded retries: up to `max_attempts` tries, `delay` apart.
    pub async fn read_with_retry(&self) -> Result<Reading, SensorError> {
        let mut attempt = 1;
        loop {
            match self.read_raw().await {
                Ok((temperature_c, humidity)) => {
                    return Ok(Reading::from_celsius(
                        temperature_c,
                        humidity,
                        self.offset_f,
                        OffsetDateTime::now_utc(),
                    ));
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    tracing::warn!(attempt, error = %e, "sensor read failed, retrying");
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(SensorError::Read(format!("failed after {} attempts: {}", attempt, e)));
                }
            }
        }
    }

    /// Run one poll cycle and record its outcome in the shared state.
    pub async fn poll_once(&self) -> Result<(), SensorError> {
        match self.read_with_retry().await {
            Ok(reading) => {
                let alert = alert::evaluate(Some(reading.temperature_f), Some(reading.humidity), &self.thresholds);
                if self.show_data {
                    tracing::info!(
                        "Temp: {:.1}F | Humidity: {:.1}%",
                        reading.temperature_f,
                        reading.humidity
                    );
                }
                if let Some(alert) = &alert {
                    tracing::warn!(kind = ?alert.kind, "{}", alert.message);
                }
                self.state.record_reading(reading, alert).await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "sensor poll failed");
                self.state.record_error(format!("read_error: {}", e)).await;
                Err(e)
            }
        }
    }

    /// Poll until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_s = self.interval.as_secs(), "sensor reader started");
        loop {
            // errors are already recorded in the shared state
            let _ = self.poll_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::info!("sensor reader stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// Spawn a reader on the sensor `opened` by the hal. Init failure is not
/// fatal: it becomes the state's error and no reader runs, so `/health`
/// stays degraded until a restart.
pub async fn start_reader(
    opened: Result<Arc<dyn SensorDriver>, SensorError>,
    state: &SharedState,
    config: &HostConfig,
    shutdown: &watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    match opened {
        Ok(sensor) => Some(SensorReader::new(sensor, state.clone(), config).spawn(shutdown.clone())),
        Err(e) => {
            tracing::warn!(error = %e, "sensor unavailable, api will report errors until restart");
            state.record_error(e.to_string()).await;
            None
        }
    }
}
