#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChangeError {
    #[error("change not found")]
    NotFound,

    #[error("invalid cursor")]
    InvalidCursor,
}

impl From<prova_core::cursor::CursorError> for ChangeError {
    fn from(_: prova_core::cursor::CursorError) -> Self {
        Self::InvalidCursor
    }
}

pub type Result<T> = std::result::Result<T, ChangeError>;
