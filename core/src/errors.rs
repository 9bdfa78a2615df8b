use thiserror::Error;
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Invalid tracking configuration: {0}")] InvalidConfig(String),
    #[error("Tracking backend unreachable: {0}")] BackendUnreachable(String),
    #[error("Invalid input: {0}")] InvalidInput(String),
    #[error("Local storage error: {0}")] Storage(String),
}
impl TrackingError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "CFG-1002",
            Self::BackendUnreachable(_) => "BKD-1001",
            Self::InvalidInput(_) => "INP-1001",
            Self::Storage(_) => "DB-1001",
        }
    }
    pub fn explain(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "The backend configuration is missing a required identifier.",
            Self::BackendUnreachable(_) => "The hosted analytics backend could not be reached.",
            Self::InvalidInput(_) => "User supplied input failed validation before submission.",
            Self::Storage(_) => "The local SQLite database could not be accessed.",
        }
    }
}

impl From<r2d2::Error> for TrackingError {
    fn from(err: r2d2::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<rusqlite::Error> for TrackingError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
