use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("airspace monitor loop has stopped")]
    MonitorClosed,
}

pub type Result<T> = std::result::Result<T, MonitorError>;
