use thiserror::Error;

/// Error kinds raised by the bench.
///
/// `Safety` is the only kind that stops a sensor thread; everything else is
/// annotated, logged and skipped by the reader loop.
#[derive(Error, Debug)]
pub enum GsacError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("device {device} failed to open after {attempts} attempt(s): {reason}")]
    DeviceOpen {
        device: String,
        attempts: u32,
        reason: String,
    },

    #[error("transient read error on {device}: {reason}")]
    TransientRead { device: String, reason: String },

    #[error("safety limit exceeded on {device}: motor current {current_ma:.0} mA exceeds {limit_ma:.0} mA")]
    Safety {
        device: String,
        current_ma: f64,
        limit_ma: f64,
    },

    #[error("reader for {device} was lost at shutdown: {reason}")]
    ReaderLost { device: String, reason: String },

    #[error("drain lag on {device}: {dropped} row(s) dropped so far")]
    DrainLag { device: String, dropped: u64 },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GsacResult<T> = Result<T, GsacError>;

impl GsacError {
    /// Kind name as printed on fatal exit.
    pub fn kind(&self) -> &'static str {
        match self {
            GsacError::Configuration(_) => "ConfigurationError",
            GsacError::DeviceOpen { .. } => "DeviceOpenError",
            GsacError::TransientRead { .. } => "TransientReadError",
            GsacError::Safety { .. } => "SafetyError",
            GsacError::ReaderLost { .. } => "ReaderLostError",
            GsacError::DrainLag { .. } => "DrainLag",
            GsacError::Parse(_) => "ParseError",
            GsacError::Io(_) => "IoError",
        }
    }

    /// Whether a sensor thread must stop on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GsacError::Safety { .. })
    }

    /// Device the error is attributed to, if any.
    pub fn device(&self) -> Option<&str> {
        match self {
            GsacError::DeviceOpen { device, .. }
            | GsacError::TransientRead { device, .. }
            | GsacError::Safety { device, .. }
            | GsacError::ReaderLost { device, .. }
            | GsacError::DrainLag { device, .. } => Some(device),
            _ => None,
        }
    }

    pub(crate) fn transient(device: &str, reason: impl Into<String>) -> Self {
        GsacError::TransientRead {
            device: device.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for GsacError {
    fn from(err: serde_json::Error) -> Self {
        GsacError::Parse(err.to_string())
    }
}
