//! ==============================================================================
//! control.rs - relay control gateway
//! ==============================================================================
//!
//! validates `(device, "on"|"off")` requests, drives the device's relay pin
//! and records the new flag in SharedState. leds are not touched here; the
//! notifier mirrors flags to leds on its own cadence.
//!
//! the relay write and the flag update happen under one lock, so two
//! concurrent requests for a device can never leave the flag disagreeing
//! with the relay.
//!
//! ==============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::DevicePins;
use crate::error::ControlError;
use crate::hal::{GpioDriver, PinMode};
use crate::state::SharedState;

pub struct DeviceControlGateway {
    gpio: Arc<dyn GpioDriver>,
    devices: BTreeMap<String, DevicePins>,
    state: SharedState,
    switching: Mutex<()>,
}

impl DeviceControlGateway {
    pub fn new(gpio: Arc<dyn GpioDriver>, devices: BTreeMap<String, DevicePins>, state: SharedState) -> Self {
        Self { gpio, devices, state, switching: Mutex::new(()) }
    }

    /// Put every relay pin in output mode, switched off. Failures are logged
    /// and leave that device uncontrollable until a later write succeeds.
    pub fn init_relays(&self) {
        for (name, pins) in &self.devices {
            let result = self
                .gpio
                .set_pin_mode(pins.relay_pin, PinMode::Output)
                .and_then(|_| self.gpio.write_pin(pins.relay_pin, false));
            match result {
                Ok(()) => tracing::info!(device = %name, pin = pins.relay_pin, "relay initialized"),
                Err(e) => tracing::error!(device = %name, error = %e, "relay init failed"),
            }
        }
    }

    pub fn device_names(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    /// Switch `device` on or off. `requested` is the raw `state` field of the
    /// request, matched case-insensitively.
    pub async fn set_device(&self, device: &str, requested: Option<&str>) -> Result<bool, ControlError> {
        let pins = self.devices.get(device).ok_or_else(|| ControlError::UnknownDevice {
            device: device.to_string(),
            valid: self.device_names(),
        })?;

        let requested = requested.ok_or(ControlError::MissingField)?;
        let on = match requested.to_ascii_lowercase().as_str() {
            "on" => true,
            "off" => false,
            _ => return Err(ControlError::InvalidState(requested.to_string())),
        };

        let _switching = self.switching.lock().await;
        self.gpio
            .write_pin(pins.relay_pin, on)
            .map_err(|source| ControlError::HardwareWrite { device: device.to_string(), source })?;
        self.state.set_device_flag(device, on).await;

        tracing::info!(device, on, "device switched");
        Ok(on)
    }

    pub fn shutdown(&self) {
        self.gpio.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::HostConfig;
    use crate::error::HalError;
    use crate::hal::MockGpio;

    fn gateway() -> (DeviceControlGateway, Arc<MockGpio>, SharedState) {
        let config = HostConfig::default();
        let gpio = Arc::new(MockGpio::new());
        let state = SharedState::new(config.devices.keys().cloned());
        let gateway = DeviceControlGateway::new(gpio.clone(), config.devices.clone(), state.clone());
        (gateway, gpio, state)
    }

    #[tokio::test]
    async fn test_init_relays_drives_low() {
        let (gateway, gpio, _) = gateway();
        gateway.init_relays();
        for pin in [17, 27, 22] {
            assert!(gpio.is_output(pin));
            assert_eq!(gpio.level(pin), Some(false));
        }
    }

    #[tokio::test]
    async fn test_switch_on_is_idempotent() {
        let (gateway, gpio, state) = gateway();

        assert_eq!(gateway.set_device("heat", Some("ON")).await, Ok(true));
        assert_eq!(gateway.set_device("heat", Some("on")).await, Ok(true));
        assert_eq!(gpio.level(17), Some(true));
        assert_eq!(state.device_flag("heat").await, Some(true));

        assert_eq!(gateway.set_device("heat", Some("Off")).await, Ok(false));
        assert_eq!(gpio.level(17), Some(false));
        assert_eq!(state.device_flag("heat").await, Some(false));
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (gateway, gpio, state) = gateway();

        let err = gateway.set_device("unknownthing", Some("on")).await.unwrap_err();
        assert!(matches!(err, ControlError::UnknownDevice { .. }));
        assert!(err.to_string().contains("heat"));

        assert_eq!(gateway.set_device("heat", None).await, Err(ControlError::MissingField));
        assert_eq!(
            gateway.set_device("heat", Some("sideways")).await,
            Err(ControlError::InvalidState("sideways".to_string()))
        );

        assert_eq!(gpio.level(17), None);
        assert_eq!(state.device_flag("heat").await, Some(false));
    }

    #[tokio::test]
    async fn test_hardware_failure_keeps_flag() {
        let (gateway, gpio, state) = gateway();
        gpio.fail_pin(17);

        let err = gateway.set_device("heat", Some("on")).await.unwrap_err();
        assert!(matches!(err, ControlError::HardwareWrite { .. }));
        assert_eq!(state.device_flag("heat").await, Some(false));
    }

    /// Relay whose "on" writes take a while to settle.
    struct SlowGpio {
        inner: MockGpio,
    }

    impl GpioDriver for SlowGpio {
        fn set_pin_mode(&self, pin: u8, mode: PinMode) -> Result<(), HalError> {
            self.inner.set_pin_mode(pin, mode)
        }

        fn write_pin(&self, pin: u8, level: bool) -> Result<(), HalError> {
            self.inner.write_pin(pin, level)?;
            if level {
                std::thread::sleep(Duration::from_millis(200));
            }
            Ok(())
        }

        fn cleanup(&self) {
            self.inner.cleanup();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_switches_keep_flag_in_step_with_relay() {
        let config = HostConfig::default();
        let gpio = Arc::new(SlowGpio { inner: MockGpio::new() });
        let state = SharedState::new(config.devices.keys().cloned());
        let gateway = Arc::new(DeviceControlGateway::new(gpio.clone(), config.devices.clone(), state.clone()));

        let on = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.set_device("heat", Some("on")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let off = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.set_device("heat", Some("off")).await })
        };

        assert_eq!(on.await.unwrap(), Ok(true));
        assert_eq!(off.await.unwrap(), Ok(false));
        assert_eq!(gpio.inner.level(17), Some(false));
        assert_eq!(state.device_flag("heat").await, Some(false));
    }
}
