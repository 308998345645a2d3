use thiserror::Error;

/// Failures at the edges of the tracker (configuration, recordings, sensor
/// start-up). The per-frame pose path never fails.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid recording: {0}")]
    Recording(String),

    #[error("Sensor failed: {0}")]
    SensorFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type TrackerResult<T> = Result<T, TrackerError>;
