use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RestError {
    #[error("request to {path} failed: {message}")]
    Request { path: String, message: String },
    #[error("{path} returned status {status}")]
    Status { path: String, status: u16 },
    #[error("invalid response from {path}: {message}")]
    Decode { path: String, message: String },
}

/// Errors surfaced by camera operations. Payloads are strings so a single
/// outcome can be cloned out to every waiter of a shared operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CameraError {
    #[error("no snapshot available and device {device} is offline")]
    DeviceOffline { device: String },
    #[error("snapshot failed to refresh after {attempts} attempts")]
    SnapshotRefreshTimeout { attempts: u32 },
    #[error("snapshot image fetch failed: {0}")]
    SnapshotFetchFailed(String),
    #[error("live session was not created after {attempts} attempts")]
    SessionAcquisitionFailed { attempts: u32 },
    #[error("no media packets received after session start")]
    NoMediaReceived,
    #[error("remux failed: {0}")]
    RemuxFailed(String),
    #[error("a non-empty output path is required to record")]
    InvalidOutputPath,
    #[error("ding feed closed")]
    DingFeedClosed,
    #[error("public address resolution failed: {0}")]
    AddressResolution(String),
    #[error("session transport error: {0}")]
    Transport(String),
    #[error("io error: {0}")]
    Io(String),
    #[error(transparent)]
    Rest(#[from] RestError),
}

impl From<std::io::Error> for CameraError {
    fn from(err: std::io::Error) -> Self {
        CameraError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;
