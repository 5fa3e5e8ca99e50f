//! Flat file store for the persisted image bytes.

use std::path::{Path, PathBuf};

use tracing::info;

use aperture_core::{ApertureError, Result};

/// Writes image bytes under one directory, named `<image_id>.<encoding>`.
///
/// A repeated id overwrites the prior file; the row in the database is
/// replaced the same way, so file and row always describe the same bytes.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Ensure `dir` exists and return the store.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            ApertureError::Storage(format!("cannot create file store {}: {}", dir.display(), e))
        })?;
        info!("File store at {}", dir.display());
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write (or overwrite) the file for `image_id`, returning its path.
    pub fn write(&self, image_id: &str, encoding: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.{}", image_id, encoding));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}
