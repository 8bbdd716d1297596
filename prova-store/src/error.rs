#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("not found")]
    NotFound,

    #[error("event id already ingested with a different integrity hash")]
    Conflict,

    #[error("append-only store, mutation not allowed")]
    AppendOnly,

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("event `{0}`")]
    Event(#[from] prova_core::EventError),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("io `{0}`")]
    Io(#[from] std::io::Error),

    #[cfg(any(feature = "pg", feature = "sqlite"))]
    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether the caller may retry the operation. Only storage I/O failures
    /// are retryable; validation errors and conflicts are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            #[cfg(any(feature = "pg", feature = "sqlite"))]
            Self::Sqlx(_) => true,
            _ => false,
        }
    }
}

impl From<prova_core::cursor::CursorError> for StoreError {
    fn from(_: prova_core::cursor::CursorError) -> Self {
        Self::InvalidCursor
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
