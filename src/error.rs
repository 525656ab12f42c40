use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Classification of application errors, used to pick the HTTP status
/// returned to proxy clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadParameter,
    Conflict,
    Impossible,
    Unauthorized,
    Forbidden,
    Internal,
}

/// Message fragments emitted by container runtimes, in match priority order.
const MESSAGE_KINDS: &[(&str, ErrorKind)] = &[
    ("No such", ErrorKind::NotFound),
    ("Bad parameter", ErrorKind::BadParameter),
    ("Conflict", ErrorKind::Conflict),
    ("Impossible", ErrorKind::Impossible),
    ("Wrong login/password", ErrorKind::Unauthorized),
    ("hasn't been activated", ErrorKind::Forbidden),
];

impl ErrorKind {
    /// Classify a free-form error message coming from a container runtime.
    pub fn classify(message: &str) -> Self {
        MESSAGE_KINDS
            .iter()
            .find(|(fragment, _)| message.contains(fragment))
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::Internal)
    }

    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BadParameter => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Impossible => StatusCode::NOT_ACCEPTABLE,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Frame payload of {0} bytes exceeds the 65535 byte limit")]
    FrameTooLarge(usize),

    #[error("Malformed envelope: no command separator found")]
    MalformedEnvelope,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid heartbeat: {0}")]
    InvalidHeartbeat(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Bad parameter: {0}")]
    BadParameter(String),

    #[error("{message}")]
    Runtime { kind: ErrorKind, message: String },

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("No route to a backend host")]
    MissingRoute,

    #[error("Bad gateway: {0}")]
    BadGateway(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ControllerError {
    /// Build a runtime error whose kind is derived from the message text.
    pub fn runtime(message: impl Into<String>) -> Self {
        let message = message.into();
        ControllerError::Runtime {
            kind: ErrorKind::classify(&message),
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::BadParameter(_)
            | ControllerError::InvalidHeartbeat(_)
            | ControllerError::InvalidAddress(_)
            | ControllerError::UnsupportedProtocol(_)
            | ControllerError::FrameTooLarge(_) => ErrorKind::BadParameter,
            ControllerError::MissingRoute => ErrorKind::NotFound,
            ControllerError::Runtime { kind, .. } => *kind,
            _ => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ControllerError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            other => other.kind().status_code(),
        }
    }

    pub fn to_error_code(&self) -> &'static str {
        match self {
            ControllerError::MissingRoute => "MISSING_ROUTE",
            ControllerError::UnsupportedProtocol(_) => "UNSUPPORTED_PROTOCOL",
            ControllerError::BadGateway(_) => "BAD_GATEWAY",
            ControllerError::FrameTooLarge(_) => "FRAME_TOO_LARGE",
            ControllerError::MalformedEnvelope => "MALFORMED_ENVELOPE",
            ControllerError::UnknownCommand(_) => "UNKNOWN_COMMAND",
            ControllerError::InvalidHeartbeat(_) => "INVALID_HEARTBEAT",
            ControllerError::InvalidAddress(_) => "INVALID_ADDRESS",
            ControllerError::ConfigError(_) => "CONFIG_ERROR",
            ControllerError::JsonError(_) => "JSON_ERROR",
            _ => match self.kind() {
                ErrorKind::NotFound => "NOT_FOUND",
                ErrorKind::BadParameter => "BAD_PARAMETER",
                ErrorKind::Conflict => "CONFLICT",
                ErrorKind::Impossible => "NOT_ACCEPTABLE",
                ErrorKind::Unauthorized => "UNAUTHORIZED",
                ErrorKind::Forbidden => "FORBIDDEN",
                ErrorKind::Internal => "INTERNAL_ERROR",
            },
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.to_error_code().to_string(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_error_response())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
