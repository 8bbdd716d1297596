#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("invalid subject `{0}`, expected app:environment:cluster")]
    InvalidSubject(String),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EventError>;
