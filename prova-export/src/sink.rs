use std::path::PathBuf;

use async_trait::async_trait;
use dyn_clone::DynClone;

use crate::error::Result;

/// Narrow byte sink behind which artifact storage lives. Artifacts are keyed
/// by export-job id on write and addressed by the returned URI afterwards.
#[async_trait]
pub trait ArtifactSink: DynClone + Send + Sync {
    /// Writes the artifact and returns its URI.
    async fn write(&self, job_id: &str, bytes: &[u8]) -> Result<String>;

    /// Reads an artifact back by the URI `write` returned.
    async fn read(&self, uri: &str) -> Result<Vec<u8>>;
}

dyn_clone::clone_trait_object!(ArtifactSink);

/// Stores artifacts as `<base_dir>/<job_id>.json`, creating the directory on
/// first write.
#[derive(Debug, Clone)]
pub struct FilesystemSink {
    base_dir: PathBuf,
}

impl FilesystemSink {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl ArtifactSink for FilesystemSink {
    async fn write(&self, job_id: &str, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.base_dir.join(format!("{job_id}.json"));
        tokio::fs::write(&path, bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn read(&self, uri: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(uri).await?)
    }
}
