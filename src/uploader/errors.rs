use thiserror::Error;
use super::types::{FileId, FileStatus};

#[derive(Error, Debug)]
pub enum UploaderError {
    #[error("HTTP Request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    ServerError {
        status_code: u16,
        message: String,
    },

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Invalid url: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("File not found: {0}")]
    NotFound(FileId),

    #[error("Invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: FileStatus,
        to: FileStatus,
    },

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Manager shut down")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl UploaderError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status_code,
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    /// 取消错误需要静默处理
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Error alias
pub type Result<T, E = UploaderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinguished() {
        assert!(UploaderError::Cancelled.is_cancelled());
        assert!(!UploaderError::server_error(500, "boom").is_cancelled());
        assert!(!UploaderError::internal_error("oops").is_cancelled());
    }

    #[test]
    fn test_error_display() {
        let err = UploaderError::server_error(502, "Bad gateway");
        assert_eq!(err.to_string(), "Server error: status code 502, message: Bad gateway");
        assert_eq!(UploaderError::Cancelled.to_string(), "Upload was cancelled");
    }
}
