#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("unsupported provider `{0}`")]
    UnsupportedProvider(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("event `{0}`")]
    Event(#[from] prova_core::EventError),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
