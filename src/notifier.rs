//! ==============================================================================
//! notifier.rs - buzzer / lcd / led actuation loop
//! ==============================================================================
//!
//! purpose:
//!     polls a SensorSnapshot (over http from a server, or straight from the
//!     in-process SharedState in the watch role), re-evaluates the alert with
//!     the local thresholds and decides what to do with the buzzer, the lcd
//!     and the device leds.
//!
//! cycle:
//!
//! ```text
//! fetch ──fail──> show error on lcd (own cooldown), skip
//!   │
//!   ├─ alert, cooldown elapsed ──> lcd alert + buzz + dwell, restart cooldown
//!   ├─ alert, inside cooldown  ──> log remaining time only
//!   └─ no alert                ──> steady temp/humidity read-out
//! ```
//!
//! device flags are mirrored to their leds on every successful fetch.
//! a status line is logged at most once per cooldown interval.
//!
//! the loop is strictly sequential: the buzz and the alert dwell delay the
//! next poll, and a started actuation always runs to completion.
//!
//! ==============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::alert::{self, Alert, AlertKind, Thresholds};
use crate::config::{DevicePins, HostConfig};
use crate::domain::SensorSnapshot;
use crate::error::FetchError;
use crate::hal::{GpioDriver, LcdDriver, PinMode};
use crate::state::SharedState;

/// Minimum spacing between two firings of one notification channel.
#[derive(Debug, Clone)]
pub struct CooldownTimer {
    interval: Duration,
    last_fired_at: Option<Instant>,
}

impl CooldownTimer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_fired_at: None }
    }

    /// Time left before the timer may fire again; `None` when it may fire now.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_fired_at?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= self.interval {
            None
        } else {
            Some(self.interval - elapsed)
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.remaining(now).is_none()
    }

    pub fn fire(&mut self, now: Instant) {
        self.last_fired_at = Some(now);
    }

    /// Fire if ready. Returns whether it fired.
    pub fn try_fire(&mut self, now: Instant) -> bool {
        let ready = self.is_ready(now);
        if ready {
            self.fire(now);
        }
        ready
    }
}

/// Where snapshots come from.
pub enum SnapshotSource {
    /// `GET {server_url}/sensor`
    Http { client: reqwest::Client, url: String },
    /// same process as the sensor reader
    Local(SharedState),
}

impl SnapshotSource {
    pub fn http(server_url: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(SnapshotSource::Http {
            client,
            url: format!("{}/sensor", server_url.trim_end_matches('/')),
        })
    }

    pub async fn fetch(&self) -> Result<SensorSnapshot, FetchError> {
        match self {
            SnapshotSource::Http { client, url } => {
                let response = client.get(url).send().await?;
                if !response.status().is_success() {
                    return Err(FetchError::Status(response.status()));
                }
                Ok(response.json().await?)
            }
            SnapshotSource::Local(state) => Ok(state.snapshot().await.to_snapshot()),
        }
    }

    fn describe(&self) -> &str {
        match self {
            SnapshotSource::Http { url, .. } => url,
            SnapshotSource::Local(_) => "local sensor",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// no snapshot this cycle
    Skipped,
    /// no alert; steady read-out shown
    Normal,
    Actuated(AlertKind),
    Suppressed { kind: AlertKind, remaining: Duration },
}

pub struct Notifier {
    source: SnapshotSource,
    gpio: Arc<dyn GpioDriver>,
    lcd: Arc<dyn LcdDriver>,
    thresholds: Thresholds,
    devices: BTreeMap<String, DevicePins>,
    buzzer_pin: u8,
    buzzer_active_low: bool,
    line_length: usize,
    buzz_duration: Duration,
    alert_dwell: Duration,
    poll_interval: Duration,
    buzz_cooldown: CooldownTimer,
    error_cooldown: CooldownTimer,
    status_cooldown: CooldownTimer,
    iteration: u64,
}

impl Notifier {
    pub fn new(
        source: SnapshotSource,
        gpio: Arc<dyn GpioDriver>,
        lcd: Arc<dyn LcdDriver>,
        config: &HostConfig,
    ) -> Self {
        let cooldown = Duration::from_secs(config.notify.cooldown_seconds);
        Self {
            source,
            gpio,
            lcd,
            thresholds: config.thresholds(),
            devices: config.devices.clone(),
            buzzer_pin: config.buzzer.gpio_pin,
            buzzer_active_low: config.buzzer.active_low,
            line_length: config.lcd.line_length,
            buzz_duration: Duration::from_millis(config.notify.buzz_duration_ms),
            alert_dwell: Duration::from_secs(config.notify.alert_dwell_seconds),
            poll_interval: config.poll_interval(),
            buzz_cooldown: CooldownTimer::new(cooldown),
            error_cooldown: CooldownTimer::new(Duration::from_secs(config.notify.error_display_seconds)),
            status_cooldown: CooldownTimer::new(cooldown),
            iteration: 0,
        }
    }

    /// Claim the buzzer and led pins, all switched off.
    pub fn init_outputs(&self) {
        let mut pins = vec![self.buzzer_pin];
        pins.extend(self.devices.values().map(|p| p.led_pin));
        for pin in pins {
            if let Err(e) = self.gpio.set_pin_mode(pin, PinMode::Output) {
                tracing::error!(pin, error = %e, "gpio init failed");
            }
        }
        self.set_buzzer(false);
        for pins in self.devices.values() {
            self.write_pin(pins.led_pin, false);
        }
    }

    pub async fn run_cycle(&mut self, now: Instant) -> CycleOutcome {
        self.iteration += 1;
        tracing::debug!(iteration = self.iteration, source = self.source.describe(), "poll");

        let snapshot = match self.source.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "failed to get sensor data, will retry next interval");
                self.show_error(now, &e.to_string());
                return CycleOutcome::Skipped;
            }
        };

        if let Some(error) = &snapshot.error {
            tracing::warn!("API Error: {}", error);
        }
        if let Some(alert) = &snapshot.alert {
            tracing::debug!("API Alert: {}", alert);
        }

        self.mirror_leds(&snapshot);

        // the server's alert field was computed with the server's thresholds
        let alert = alert::evaluate(snapshot.temperature_f, snapshot.humidity, &self.thresholds);
        self.log_status(now, &snapshot, alert.as_ref());

        match alert {
            Some(alert) => {
                tracing::warn!("ALERT: {}", alert.message);
                match self.buzz_cooldown.remaining(now) {
                    None => {
                        self.actuate(&alert, &snapshot).await;
                        self.buzz_cooldown.fire(now);
                        CycleOutcome::Actuated(alert.kind)
                    }
                    Some(remaining) => {
                        tracing::info!(
                            "Alert condition present but buzzer on cooldown ({}s remaining)",
                            remaining.as_secs()
                        );
                        CycleOutcome::Suppressed { kind: alert.kind, remaining }
                    }
                }
            }
            None => {
                match &snapshot.error {
                    Some(error) if !snapshot.last_read_ok => self.show_error(now, error),
                    _ => self.show_reading(&snapshot),
                }
                CycleOutcome::Normal
            }
        }
    }

    /// Poll until `shutdown` flips to true, then release the outputs.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            source = self.source.describe(),
            interval_s = self.poll_interval.as_secs(),
            cooldown_s = self.buzz_cooldown.interval.as_secs(),
            "notifier started"
        );
        loop {
            let outcome = self.run_cycle(Instant::now()).await;
            tracing::debug!(?outcome, "cycle finished");

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }
        self.shutdown();
    }

    /// Buzzer off, display cleared, pins released.
    pub fn shutdown(&self) {
        self.set_buzzer(false);
        if let Err(e) = self.lcd.clear() {
            tracing::warn!(error = %e, "lcd clear failed");
        }
        self.gpio.cleanup();
        tracing::info!("notifier stopped, outputs released");
    }

    async fn actuate(&self, alert: &Alert, snapshot: &SensorSnapshot) {
        tracing::warn!("{} Buzzing...", alert.message);
        self.show_lines(alert.display, &format_metrics(snapshot));

        self.set_buzzer(true);
        tokio::time::sleep(self.buzz_duration).await;
        self.set_buzzer(false);

        // keep the alert readable before the next poll overwrites it
        tokio::time::sleep(self.alert_dwell).await;
    }

    fn show_reading(&self, snapshot: &SensorSnapshot) {
        self.show_lines(
            &format!("Temp: {}", format_value(snapshot.temperature_f, "F")),
            &format!("Humidity: {}", format_value(snapshot.humidity, "%")),
        );
    }

    /// Error text across both lines, at most once per error display interval.
    fn show_error(&mut self, now: Instant, error: &str) {
        if let Some(remaining) = self.error_cooldown.remaining(now) {
            tracing::debug!("Error display on cooldown ({}s remaining)", remaining.as_secs());
            return;
        }
        self.error_cooldown.fire(now);

        let first: String = error.chars().take(self.line_length).collect();
        let second: String = error.chars().skip(self.line_length).take(self.line_length).collect();
        self.show_lines(&first, &second);
    }

    fn show_lines(&self, first: &str, second: &str) {
        let result = self
            .lcd
            .clear()
            .and_then(|_| self.lcd.write_line(0, first, self.line_length))
            .and_then(|_| self.lcd.write_line(1, second, self.line_length));
        if let Err(e) = result {
            tracing::warn!(error = %e, "lcd update failed");
        }
    }

    fn mirror_leds(&self, snapshot: &SensorSnapshot) {
        for (name, pins) in &self.devices {
            if let Some(on) = snapshot.device_on(name) {
                self.write_pin(pins.led_pin, on);
            }
        }
    }

    fn log_status(&mut self, now: Instant, snapshot: &SensorSnapshot, alert: Option<&Alert>) {
        if !self.status_cooldown.try_fire(now) {
            return;
        }
        let devices: Vec<String> = snapshot
            .device_flags()
            .map(|(name, on)| format!("{}={}", name, if on { "on" } else { "off" }))
            .collect();
        tracing::info!(
            iteration = self.iteration,
            temperature_f = ?snapshot.temperature_f,
            humidity = ?snapshot.humidity,
            last_read_ok = snapshot.last_read_ok,
            alert = ?alert.map(|a| a.kind),
            devices = %devices.join(","),
            "status"
        );
    }

    fn set_buzzer(&self, on: bool) {
        self.write_pin(self.buzzer_pin, on != self.buzzer_active_low);
    }

    fn write_pin(&self, pin: u8, level: bool) {
        if let Err(e) = self.gpio.write_pin(pin, level) {
            tracing::warn!(pin, error = %e, "gpio write failed");
        }
    }
}

fn format_value(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.1}{}", v, unit),
        None => "--".to_string(),
    }
}

fn format_metrics(snapshot: &SensorSnapshot) -> String {
    format!(
        "{} {}",
        format_value(snapshot.temperature_f, "F"),
        format_value(snapshot.humidity, "%")
    )
}
