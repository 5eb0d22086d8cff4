use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing credential: {0}")]
    MissingKey(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenError {
    #[error("text generation is not configured: missing {0}")]
    Config(&'static str),
    #[error("text service request failed: {0}")]
    Transport(String),
    #[error("text service error: HTTP {status}")]
    Status { status: u16 },
    #[error("text service response could not be parsed: {0}")]
    Parse(String),
    #[error("text service returned no content")]
    EmptyResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageGenError {
    #[error("image generation is not configured: missing {0}")]
    Config(&'static str),
    #[error("image service rejected the credential (HTTP {0})")]
    Authentication(u16),
    #[error("image service rate limit reached")]
    RateLimited,
    #[error("image service error: HTTP {status}")]
    Service { status: u16 },
    #[error("image request timed out")]
    Timeout,
    #[error("image request failed: {0}")]
    Transport(String),
    #[error("image service returned non-image content: {content_type}")]
    UnexpectedContent { content_type: String },
}
