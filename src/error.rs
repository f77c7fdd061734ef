use axum::http::StatusCode;

/// Failure of a low level driver call (gpio, i2c, lcd).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HalError {
    #[error("gpio pin {pin}: {message}")]
    Gpio { pin: u8, message: String },

    #[error("i2c device 0x{address:02X}: {message}")]
    I2c { address: u16, message: String },

    #[error("checksum mismatch in sensor data")]
    Checksum,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorError {
    /// The sensor could not be opened at all. Only sensor-backed features
    /// are lost; the api keeps running.
    #[error("Sensor init failed: {0}")]
    Init(String),

    /// A read failed. Retried within a cycle, then recorded as the cycle's
    /// error.
    #[error("{0}")]
    Read(String),
}

impl From<HalError> for SensorError {
    fn from(err: HalError) -> Self {
        SensorError::Read(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error("Invalid device '{device}'. Valid devices: {valid:?}")]
    UnknownDevice { device: String, valid: Vec<String> },

    #[error("Missing 'state' field in request body")]
    MissingField,

    #[error("State must be 'on' or 'off', got '{0}'")]
    InvalidState(String),

    #[error("Failed to set {device} state: {source}")]
    HardwareWrite { device: String, source: HalError },
}

impl ControlError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ControlError::UnknownDevice { .. } => StatusCode::BAD_REQUEST,
            ControlError::MissingField => StatusCode::BAD_REQUEST,
            ControlError::InvalidState(_) => StatusCode::BAD_REQUEST,
            ControlError::HardwareWrite { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Client side failure to obtain a snapshot from the server.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(reqwest::StatusCode),
}
