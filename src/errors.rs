use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChdkError {
    #[error("Lua runtime error: {0}")]
    Runtime(String),
    #[error("PTP error: {message}{}", ptp_suffix(.code))]
    Ptp {
        message: String,
        code: Option<i64>,
        traceback: Option<String>,
    },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Device not connected: {0}")]
    NotConnected(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image conversion error: {0}")]
    Image(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl ChdkError {
    pub fn ptp(message: impl Into<String>) -> Self {
        ChdkError::Ptp {
            message: message.into(),
            code: None,
            traceback: None,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ChdkError::InvalidArgument(message.into())
    }

    /// PTP response code, when the error came from the transport.
    pub fn ptp_code(&self) -> Option<i64> {
        match self {
            ChdkError::Ptp { code, .. } => *code,
            _ => None,
        }
    }
}

impl From<mlua::Error> for ChdkError {
    fn from(error: mlua::Error) -> Self {
        ChdkError::Runtime(error.to_string())
    }
}

impl From<image::ImageError> for ChdkError {
    fn from(error: image::ImageError) -> Self {
        ChdkError::Image(error.to_string())
    }
}

impl From<::config::ConfigError> for ChdkError {
    fn from(error: ::config::ConfigError) -> Self {
        ChdkError::Config(error.to_string())
    }
}

fn ptp_suffix(code: &Option<i64>) -> String {
    match code {
        Some(code) => format!(" (ptp_code: {code})"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, ChdkError>;
