use thiserror::Error;

use crate::codec::ParseError;

#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid username '{0}': must be non-empty alphanumeric/hyphen/underscore/dot")]
    InvalidUsername(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("record is {0} bytes, exceeding the {1} byte append limit")]
    RecordTooLong(usize, usize),

    #[error("malformed log line: {0}")]
    Parse(#[from] ParseError),

    #[error("exec request {0} not found or already decided")]
    UnknownRequest(u64),

    #[error("invalid exec transition: {0} -> {1}")]
    InvalidTransition(String, String),

    #[error("failed to launch `{0}`: {1}")]
    ExecLaunch(String, String),

    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    #[error("corrupt config file '{0}': {1}")]
    CorruptConfig(String, String),

    #[error("no username given (pass --user or set PARLEY_USER)")]
    MissingUsername,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ParleyError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileNotFound(_) => "file_not_found",
            Self::InvalidUsername(_) => "invalid_username",
            Self::InvalidMessage(_) => "invalid_message",
            Self::RecordTooLong(_, _) => "record_too_long",
            Self::Parse(_) => "parse_error",
            Self::UnknownRequest(_) => "unknown_request",
            Self::InvalidTransition(_, _) => "invalid_transition",
            Self::ExecLaunch(_, _) => "exec_launch_failed",
            Self::ConfigNotFound(_) => "config_not_found",
            Self::CorruptConfig(_, _) => "corrupt_config",
            Self::MissingUsername => "missing_username",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
