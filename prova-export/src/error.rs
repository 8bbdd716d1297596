#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("io `{0}`")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExportError>;
