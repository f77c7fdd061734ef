//! ==============================================================================
//! state.rs - shared system state
//! ==============================================================================
//!
//! the single record shared between:
//! - the sensor reader task (writes readings / errors)
//! - the control gateway (writes device flags)
//! - the http handlers and the in-process notifier (read snapshots)
//!
//! every access goes through one arc<rwlock<>>, so a reader never sees a
//! reading from one poll next to an alert from another.
//!
//! ==============================================================================

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::alert::Alert;
use crate::domain::{Reading, SystemState};

#[derive(Clone)]
pub struct SharedState {
    inner: Arc<RwLock<SystemState>>,
}

impl SharedState {
    pub fn new<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { inner: Arc::new(RwLock::new(SystemState::new(devices))) }
    }

    /// Consistent copy of the whole record.
    pub async fn snapshot(&self) -> SystemState {
        self.inner.read().await.clone()
    }

    /// Set one device flag. Returns false, changing nothing, for a device that
    /// was not configured at startup.
    pub async fn set_device_flag(&self, device: &str, on: bool) -> bool {
        let mut state = self.inner.write().await;
        match state.device_flags.get_mut(device) {
            Some(flag) => {
                *flag = on;
                true
            }
            None => false,
        }
    }

    pub async fn device_flag(&self, device: &str) -> Option<bool> {
        self.inner.read().await.device_flags.get(device).copied()
    }

    /// Store a successful poll.
    pub async fn record_reading(&self, reading: Reading, alert: Option<Alert>) {
        let mut state = self.inner.write().await;
        state.reading = Some(reading);
        state.current_alert = alert;
        state.last_read_ok = true;
        state.last_error = None;
    }

    /// Store a failed poll. The previous reading and alert stay visible.
    pub async fn record_error(&self, message: impl Into<String>) {
        let mut state = self.inner.write().await;
        state.last_error = Some(message.into());
        state.last_read_ok = false;
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::alert::{evaluate, Thresholds};

    fn thresholds() -> Thresholds {
        Thresholds { temp_high_f: 85.0, temp_low_f: 70.0, humidity_high: 99.97, humidity_low: 65.0 }
    }

    #[tokio::test]
    async fn test_device_keys_are_fixed() {
        let state = SharedState::new(["heat", "fan"]);

        assert!(state.set_device_flag("heat", true).await);
        assert!(!state.set_device_flag("toaster", true).await);

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.device_flags.len(), 2);
        assert_eq!(snapshot.device_flags.get("heat"), Some(&true));
        assert!(!snapshot.device_flags.contains_key("toaster"));
        assert_eq!(state.device_flag("fan").await, Some(false));
    }

    #[tokio::test]
    async fn test_error_keeps_stale_reading() {
        let state = SharedState::new(["heat"]);
        let reading = Reading::from_celsius(32.0, 50.0, 0.0, OffsetDateTime::UNIX_EPOCH);
        let alert = evaluate(Some(reading.temperature_f), Some(reading.humidity), &thresholds());
        state.record_reading(reading.clone(), alert.clone()).await;

        state.record_error("read_error: Remote I/O error").await;

        let snapshot = state.snapshot().await;
        assert!(!snapshot.last_read_ok);
        assert_eq!(snapshot.last_error.as_deref(), Some("read_error: Remote I/O error"));
        assert_eq!(snapshot.reading, Some(reading));
        assert_eq!(snapshot.current_alert, alert);
    }

    #[tokio::test]
    async fn test_success_clears_error() {
        let state = SharedState::new(["heat"]);
        state.record_error("read_error: boom").await;

        let reading = Reading::from_celsius(22.0, 70.0, 0.0, OffsetDateTime::UNIX_EPOCH);
        state.record_reading(reading, None).await;

        let snapshot = state.snapshot().await;
        assert!(snapshot.last_read_ok);
        assert!(snapshot.last_error.is_none());
        assert!(snapshot.current_alert.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers_never_tear() {
        let state = SharedState::new(["heat", "fan"]);
        let mut tasks = Vec::new();

        for i in 0..50 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                let c = f64::from(i);
                let reading = Reading::from_celsius(c, c, 0.0, OffsetDateTime::UNIX_EPOCH);
                state.record_reading(reading, None).await;
                state.set_device_flag("heat", i % 2 == 0).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let snapshot = state.snapshot().await;
        let reading = snapshot.reading.unwrap();
        // temperature and humidity were written together
        assert_eq!(reading.temperature_c, reading.humidity);
        assert_eq!(snapshot.device_flags.len(), 2);
    }
}
