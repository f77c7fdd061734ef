//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides the three hardware seams the monitor needs: the temperature/
//!     humidity sensor, gpio outputs (relays, leds, buzzer) and the 16x2
//!     character lcd. abstracts away the difference between running on a real
//!     Raspberry Pi (using `rppal`) and a development machine (using mocks).
//!
//! design philosophy:
//!     - "Compile Anywhere": without the `hardware` feature every driver is
//!       an in-memory mock, so the whole system runs on a laptop.
//!     - the mocks are always compiled; tests script failures through them.
//!
//! relationships:
//!     - used by: sensor.rs (SensorDriver), control.rs (GpioDriver),
//!       notifier.rs (GpioDriver + LcdDriver), main.rs (open_* helpers)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::HostConfig;
use crate::error::{HalError, SensorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

pub trait SensorDriver: Send + Sync {
    /// degrees celsius
    fn temperature(&self) -> Result<f64, HalError>;
    /// percent
    fn relative_humidity(&self) -> Result<f64, HalError>;

    /// (celsius, percent) taken from one measurement
    fn read(&self) -> Result<(f64, f64), HalError> {
        Ok((self.temperature()?, self.relative_humidity()?))
    }
}

pub trait GpioDriver: Send + Sync {
    fn set_pin_mode(&self, pin: u8, mode: PinMode) -> Result<(), HalError>;
    fn write_pin(&self, pin: u8, level: bool) -> Result<(), HalError>;
    /// release every pin claimed so far
    fn cleanup(&self);
}

pub trait LcdDriver: Send + Sync {
    fn clear(&self) -> Result<(), HalError>;
    /// `text` is cut to `max_len` characters
    fn write_line(&self, row: u8, text: &str, max_len: usize) -> Result<(), HalError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ==============================================================================================
// CONSTRUCTORS
// ==============================================================================================

#[cfg(not(feature = "hardware"))]
pub fn open_sensor(_config: &HostConfig) -> Result<Arc<dyn SensorDriver>, SensorError> {
    tracing::info!("Using MOCK sensor (No hardware access)");
    Ok(Arc::new(MockSensor::new(24.0, 70.0)))
}

#[cfg(not(feature = "hardware"))]
pub fn open_gpio() -> anyhow::Result<Arc<dyn GpioDriver>> {
    tracing::info!("Using MOCK GPIO (No hardware access)");
    Ok(Arc::new(MockGpio::new()))
}

#[cfg(not(feature = "hardware"))]
pub fn open_lcd(_config: &HostConfig) -> anyhow::Result<Arc<dyn LcdDriver>> {
    tracing::info!("Using MOCK LCD (No hardware access)");
    Ok(Arc::new(MockLcd::new()))
}

#[cfg(feature = "hardware")]
pub fn open_sensor(config: &HostConfig) -> Result<Arc<dyn SensorDriver>, SensorError> {
    tracing::info!("Using REAL SHT31 sensor at 0x{:02X}", config.sensor.i2c_address);
    let sensor = rpi::Sht31::new(config.sensor.i2c_address).map_err(|e| SensorError::Init(e.to_string()))?;
    Ok(Arc::new(sensor))
}

#[cfg(feature = "hardware")]
pub fn open_gpio() -> anyhow::Result<Arc<dyn GpioDriver>> {
    tracing::info!("Using REAL HARDWARE GPIO (rppal)");
    Ok(Arc::new(rpi::RppalGpio::new()?))
}

#[cfg(feature = "hardware")]
pub fn open_lcd(config: &HostConfig) -> anyhow::Result<Arc<dyn LcdDriver>> {
    tracing::info!("Using REAL PCF8574 LCD at 0x{:02X}", config.lcd.i2c_address);
    Ok(Arc::new(rpi::Pcf8574Lcd::new(config.lcd.i2c_address)?))
}

/// Stand-in when the gpio chip could not be opened: every write fails, so
/// control requests answer 500 instead of pretending to switch relays.
#[derive(Debug)]
pub struct DisabledGpio {
    reason: String,
}

impl DisabledGpio {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl GpioDriver for DisabledGpio {
    fn set_pin_mode(&self, pin: u8, _mode: PinMode) -> Result<(), HalError> {
        Err(HalError::Gpio { pin, message: self.reason.clone() })
    }

    fn write_pin(&self, pin: u8, _level: bool) -> Result<(), HalError> {
        Err(HalError::Gpio { pin, message: self.reason.clone() })
    }

    fn cleanup(&self) {}
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For WSL / Non-Hardware Build and tests)
// ==============================================================================================

#[derive(Debug, Default)]
struct MockSensorState {
    temperature_c: f64,
    humidity: f64,
    /// number of upcoming read attempts that fail
    failures: u32,
    attempts: u32,
}

/// Fixed-value sensor whose next N attempts can be made to fail.
#[derive(Debug, Default)]
pub struct MockSensor {
    state: Mutex<MockSensorState>,
}

impl MockSensor {
    pub fn new(temperature_c: f64, humidity: f64) -> Self {
        Self {
            state: Mutex::new(MockSensorState { temperature_c, humidity, ..Default::default() }),
        }
    }

    pub fn set_reading(&self, temperature_c: f64, humidity: f64) {
        let mut state = lock(&self.state);
        state.temperature_c = temperature_c;
        state.humidity = humidity;
    }

    /// Make the next `count` temperature reads fail.
    pub fn fail_next(&self, count: u32) {
        lock(&self.state).failures = count;
    }

    /// Number of temperature reads attempted so far.
    pub fn attempts(&self) -> u32 {
        lock(&self.state).attempts
    }
}

impl SensorDriver for MockSensor {
    fn temperature(&self) -> Result<f64, HalError> {
        let mut state = lock(&self.state);
        state.attempts += 1;
        if state.failures > 0 {
            state.failures -= 1;
            tracing::debug!("[MOCK SENSOR] Simulated read failure");
            return Err(HalError::I2c { address: 0x44, message: "Remote I/O error".to_string() });
        }
        Ok(state.temperature_c)
    }

    fn relative_humidity(&self) -> Result<f64, HalError> {
        Ok(lock(&self.state).humidity)
    }
}

#[derive(Debug, Default)]
struct MockGpioState {
    levels: std::collections::HashMap<u8, bool>,
    outputs: std::collections::HashSet<u8>,
    failing: Option<u8>,
    cleaned_up: bool,
}

/// Records pin levels in memory.
#[derive(Debug, Default)]
pub struct MockGpio {
    state: Mutex<MockGpioState>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `pin` fail.
    pub fn fail_pin(&self, pin: u8) {
        lock(&self.state).failing = Some(pin);
    }

    pub fn level(&self, pin: u8) -> Option<bool> {
        lock(&self.state).levels.get(&pin).copied()
    }

    pub fn is_output(&self, pin: u8) -> bool {
        lock(&self.state).outputs.contains(&pin)
    }

    pub fn cleaned_up(&self) -> bool {
        lock(&self.state).cleaned_up
    }
}

impl GpioDriver for MockGpio {
    fn set_pin_mode(&self, pin: u8, mode: PinMode) -> Result<(), HalError> {
        tracing::debug!("[MOCK GPIO] Pin {} set to {:?}", pin, mode);
        let mut state = lock(&self.state);
        match mode {
            PinMode::Output => state.outputs.insert(pin),
            PinMode::Input => state.outputs.remove(&pin),
        };
        Ok(())
    }

    fn write_pin(&self, pin: u8, level: bool) -> Result<(), HalError> {
        let mut state = lock(&self.state);
        if state.failing == Some(pin) {
            return Err(HalError::Gpio { pin, message: "simulated write failure".to_string() });
        }
        tracing::debug!("[MOCK GPIO] Pin {} write {}", pin, level);
        state.levels.insert(pin, level);
        Ok(())
    }

    fn cleanup(&self) {
        tracing::debug!("[MOCK GPIO] Cleanup");
        let mut state = lock(&self.state);
        state.outputs.clear();
        state.cleaned_up = true;
    }
}

/// Two line display buffer.
#[derive(Debug, Default)]
pub struct MockLcd {
    lines: Mutex<[String; 2]>,
}

impl MockLcd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> [String; 2] {
        lock(&self.lines).clone()
    }
}

impl LcdDriver for MockLcd {
    fn clear(&self) -> Result<(), HalError> {
        *lock(&self.lines) = Default::default();
        Ok(())
    }

    fn write_line(&self, row: u8, text: &str, max_len: usize) -> Result<(), HalError> {
        let text: String = text.chars().take(max_len).collect();
        tracing::debug!("[MOCK LCD] Row {}: {}", row, text);
        let mut lines = lock(&self.lines);
        if let Some(line) = lines.get_mut(row as usize) {
            *line = text;
        }
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
mod rpi {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::thread::sleep;
    use std::time::Duration;

    use rppal::gpio::{Gpio, OutputPin};
    use rppal::i2c::I2c;

    use super::{lock, GpioDriver, LcdDriver, PinMode, SensorDriver};
    use crate::error::HalError;

    fn i2c_err(address: u16) -> impl Fn(rppal::i2c::Error) -> HalError {
        move |e| HalError::I2c { address, message: e.to_string() }
    }

    fn open_i2c(address: u16) -> Result<I2c, HalError> {
        let mut i2c = I2c::new().map_err(i2c_err(address))?;
        i2c.set_slave_address(address).map_err(i2c_err(address))?;
        Ok(i2c)
    }

    // --------------------------------------------------------------------------
    // SHT31-D temperature/humidity sensor
    // --------------------------------------------------------------------------

    /// single shot, high repeatability, no clock stretching
    const SHT31_MEASURE: [u8; 2] = [0x24, 0x00];

    pub struct Sht31 {
        address: u16,
        i2c: Mutex<I2c>,
    }

    impl Sht31 {
        pub fn new(address: u16) -> Result<Self, HalError> {
            Ok(Self { address, i2c: Mutex::new(open_i2c(address)?) })
        }

        /// Raw (temperature, humidity) words of one measurement.
        fn measure(&self) -> Result<(u16, u16), HalError> {
            let mut i2c = lock(&self.i2c);
            i2c.write(&SHT31_MEASURE).map_err(i2c_err(self.address))?;
            sleep(Duration::from_millis(20));

            let mut buf = [0u8; 6];
            i2c.read(&mut buf).map_err(i2c_err(self.address))?;

            if crc8(&buf[0..2]) != buf[2] || crc8(&buf[3..5]) != buf[5] {
                return Err(HalError::Checksum);
            }
            Ok((u16::from_be_bytes([buf[0], buf[1]]), u16::from_be_bytes([buf[3], buf[4]])))
        }
    }

    /// Sensirion crc-8, polynomial 0x31, init 0xFF
    fn crc8(data: &[u8]) -> u8 {
        let mut crc = 0xFFu8;
        for byte in data {
            crc ^= byte;
            for _ in 0..8 {
                crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x31 } else { crc << 1 };
            }
        }
        crc
    }

    fn raw_to_celsius(raw: u16) -> f64 {
        -45.0 + 175.0 * f64::from(raw) / 65535.0
    }

    fn raw_to_humidity(raw: u16) -> f64 {
        100.0 * f64::from(raw) / 65535.0
    }

    impl SensorDriver for Sht31 {
        fn temperature(&self) -> Result<f64, HalError> {
            let (raw, _) = self.measure()?;
            Ok(raw_to_celsius(raw))
        }

        fn relative_humidity(&self) -> Result<f64, HalError> {
            let (_, raw) = self.measure()?;
            Ok(raw_to_humidity(raw))
        }

        // both words arrive in every frame
        fn read(&self) -> Result<(f64, f64), HalError> {
            let (raw_t, raw_h) = self.measure()?;
            Ok((raw_to_celsius(raw_t), raw_to_humidity(raw_h)))
        }
    }

    // --------------------------------------------------------------------------
    // GPIO outputs
    // --------------------------------------------------------------------------

    pub struct RppalGpio {
        gpio: Gpio,
        pins: Mutex<HashMap<u8, OutputPin>>,
    }

    impl RppalGpio {
        pub fn new() -> Result<Self, rppal::gpio::Error> {
            Ok(Self { gpio: Gpio::new()?, pins: Mutex::new(HashMap::new()) })
        }

        fn claim(&self, pins: &mut HashMap<u8, OutputPin>, pin: u8) -> Result<(), HalError> {
            if !pins.contains_key(&pin) {
                let output = self
                    .gpio
                    .get(pin)
                    .map_err(|e| HalError::Gpio { pin, message: e.to_string() })?
                    .into_output_low();
                pins.insert(pin, output);
            }
            Ok(())
        }
    }

    impl GpioDriver for RppalGpio {
        fn set_pin_mode(&self, pin: u8, mode: PinMode) -> Result<(), HalError> {
            let mut pins = lock(&self.pins);
            match mode {
                PinMode::Output => self.claim(&mut pins, pin),
                PinMode::Input => {
                    // dropping the OutputPin restores its previous mode
                    pins.remove(&pin);
                    Ok(())
                }
            }
        }

        fn write_pin(&self, pin: u8, level: bool) -> Result<(), HalError> {
            let mut pins = lock(&self.pins);
            self.claim(&mut pins, pin)?;
            if let Some(output) = pins.get_mut(&pin) {
                if level {
                    output.set_high();
                } else {
                    output.set_low();
                }
            }
            Ok(())
        }

        fn cleanup(&self) {
            lock(&self.pins).clear();
        }
    }

    // --------------------------------------------------------------------------
    // HD44780 character lcd behind a PCF8574 i2c backpack (4-bit mode)
    // --------------------------------------------------------------------------

    const LCD_BACKLIGHT: u8 = 0x08;
    const LCD_ENABLE: u8 = 0x04;
    const LCD_RS: u8 = 0x01;
    const LCD_ROW_OFFSETS: [u8; 2] = [0x00, 0x40];

    pub struct Pcf8574Lcd {
        address: u16,
        i2c: Mutex<I2c>,
    }

    impl Pcf8574Lcd {
        pub fn new(address: u16) -> Result<Self, HalError> {
            let lcd = Self { address, i2c: Mutex::new(open_i2c(address)?) };
            lcd.init()?;
            Ok(lcd)
        }

        fn init(&self) -> Result<(), HalError> {
            let mut i2c = lock(&self.i2c);
            sleep(Duration::from_millis(50));
            for delay_us in [4500, 4500, 150] {
                self.write4(&mut i2c, 0x30)?;
                sleep(Duration::from_micros(delay_us));
            }
            self.write4(&mut i2c, 0x20)?;
            // 2 lines 5x8, display on cursor off, clear, left to right
            for command in [0x28, 0x0C, 0x01, 0x06] {
                self.send(&mut i2c, command, 0)?;
            }
            sleep(Duration::from_millis(2));
            Ok(())
        }

        fn write4(&self, i2c: &mut I2c, data: u8) -> Result<(), HalError> {
            let map = i2c_err(self.address);
            i2c.write(&[data | LCD_BACKLIGHT]).map_err(&map)?;
            i2c.write(&[data | LCD_ENABLE | LCD_BACKLIGHT]).map_err(&map)?;
            sleep(Duration::from_micros(1));
            i2c.write(&[data | LCD_BACKLIGHT]).map_err(&map)?;
            sleep(Duration::from_micros(50));
            Ok(())
        }

        fn send(&self, i2c: &mut I2c, byte: u8, mode: u8) -> Result<(), HalError> {
            self.write4(i2c, (byte & 0xF0) | mode)?;
            self.write4(i2c, ((byte << 4) & 0xF0) | mode)
        }
    }

    impl LcdDriver for Pcf8574Lcd {
        fn clear(&self) -> Result<(), HalError> {
            let mut i2c = lock(&self.i2c);
            self.send(&mut i2c, 0x01, 0)?;
            sleep(Duration::from_millis(2));
            Ok(())
        }

        fn write_line(&self, row: u8, text: &str, max_len: usize) -> Result<(), HalError> {
            let offset = LCD_ROW_OFFSETS.get(row as usize).copied().unwrap_or(0);
            let mut i2c = lock(&self.i2c);
            self.send(&mut i2c, 0x80 | offset, 0)?;
            // pad so a shorter line overwrites the previous one
            for c in text.chars().chain(std::iter::repeat(' ')).take(max_len) {
                let byte = if c.is_ascii() { c as u8 } else { b'?' };
                self.send(&mut i2c, byte, LCD_RS)?;
            }
            Ok(())
        }
    }

}
