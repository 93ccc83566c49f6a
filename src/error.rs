use thiserror::Error;

/// Errors surfaced by the vibrator service, always reducible to a negative
/// errno-style integer in the wire reply via [`VibratorError::wire_code`].
#[derive(Error, Debug)]
pub enum VibratorError {
    #[error("invalid parameter: {0}")]
    InvalidArgument(String),

    #[error("intensity is off, or device lacks the required capability")]
    NotSupported,

    #[error("force-feedback device error: {0}")]
    Device(#[from] std::io::Error),

    #[error("no usable force-feedback device at {0}")]
    NoDevice(String),
}

pub type VibratorResult<T> = Result<T, VibratorError>;

impl VibratorError {
    /// Maps this error onto the negative-errno convention used in the wire
    /// frame's `result` field.
    pub fn wire_code(&self) -> i32 {
        match self {
            VibratorError::InvalidArgument(_) => -libc::EINVAL,
            VibratorError::NotSupported => -libc::ENOTSUP,
            VibratorError::Device(e) => -e.raw_os_error().unwrap_or(libc::EIO),
            VibratorError::NoDevice(_) => -libc::ENODEV,
        }
    }
}
