//! Forward-only SQL migrations.
//!
//! Migrations are plain `.sql` files kept in a per-dialect subdirectory
//! (`migrations/postgres`, `migrations/sqlite`) and applied in lexicographic
//! file-name order. There is no down path: schema changes only ever move
//! forward, matching the append-only nature of the store.

use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

pub struct Migrator {
    dir: PathBuf,
}

impl Migrator {
    /// `dir` is the directory containing the per-dialect subdirectories.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn scripts(&self, dialect: &str) -> Result<Vec<PathBuf>> {
        let base = self.dir.join(dialect);
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&base)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(StoreError::InvalidInput(format!(
                "no migrations found under {}",
                base.display()
            )));
        }
        Ok(files)
    }

    #[cfg(feature = "pg")]
    pub async fn apply_postgres(&self, pool: &sqlx::PgPool) -> Result<()> {
        for path in self.scripts("postgres")? {
            sqlx::raw_sql(&read(&path)?).execute(pool).await?;
        }
        Ok(())
    }

    #[cfg(feature = "sqlite")]
    pub async fn apply_sqlite(&self, pool: &sqlx::SqlitePool) -> Result<()> {
        for path in self.scripts("sqlite")? {
            sqlx::raw_sql(&read(&path)?).execute(pool).await?;
        }
        Ok(())
    }
}

fn read(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}
