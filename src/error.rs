use crate::client::ClientState;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdError {
    /// Transport failure or non-2xx status from the server.
    #[error("Backend unavailable at {endpoint}: {message}{}", format_status(.status))]
    BackendUnavailable {
        endpoint: String,
        status: Option<u16>,
        message: String,
        /// Serialized body that was sent, kept for diagnosing 4xx rejections.
        request_body: Option<String>,
    },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Server answered successfully but returned no images")]
    EmptyResult,

    #[error("A request is already in progress (client state: {0})")]
    AlreadyInProgress(ClientState),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Image error: {0}")]
    ImageError(String),
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

impl SdError {
    pub(crate) fn unavailable(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        SdError::BackendUnavailable {
            endpoint: endpoint.into(),
            status: None,
            message: message.into(),
            request_body: None,
        }
    }

    /// True for failures where retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SdError::Timeout(_) | SdError::AlreadyInProgress(_) | SdError::EmptyResult => true,
            SdError::BackendUnavailable { status, .. } => {
                matches!(status, None | Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SdError {
    fn from(e: serde_json::Error) -> Self {
        SdError::SerializationError(e.to_string())
    }
}

impl From<image::ImageError> for SdError {
    fn from(e: image::ImageError) -> Self {
        SdError::ImageError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SdError>;
