#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("invalid source event: {0}")]
    InvalidSourceEvent(String),

    #[error("event `{0}`")]
    Event(#[from] prova_core::EventError),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("io `{0}`")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CollectorError>;
