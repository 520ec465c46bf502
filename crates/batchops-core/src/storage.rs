//! File storage root
//!
//! Layout under one configurable root: `uploads/<upload-id>/` holds the
//! source file for each upload, `exports/` holds published artifacts.
//! Export file names embed the upload id so concurrent publishes can
//! never collide.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::Upload;
use crate::{Error, Result};

/// File storage rooted at a configurable path
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root layout if missing
    pub fn ensure_layout(&self) -> Result<()> {
        std::fs::create_dir_all(self.root.join("uploads"))
            .map_err(|e| Error::storage(format!("create uploads dir: {}", e)))?;
        std::fs::create_dir_all(self.exports_dir())
            .map_err(|e| Error::storage(format!("create exports dir: {}", e)))?;
        Ok(())
    }

    /// Per-upload source directory
    pub fn upload_dir(&self, upload_id: Uuid) -> PathBuf {
        self.root.join("uploads").join(upload_id.to_string())
    }

    /// Path of an upload's source file
    pub fn source_path(&self, upload: &Upload) -> PathBuf {
        self.upload_dir(upload.id).join(&upload.filename)
    }

    /// Shared directory for published artifacts
    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    /// Published CSV path for an upload
    pub fn export_csv_path(&self, upload: &Upload) -> PathBuf {
        self.exports_dir()
            .join(format!("{}_{}.csv", file_stem(&upload.filename), upload.id))
    }

    /// Published PDF path for an upload
    pub fn export_pdf_path(&self, upload: &Upload) -> PathBuf {
        self.exports_dir()
            .join(format!("{}_{}.pdf", file_stem(&upload.filename), upload.id))
    }

    /// Write an upload's source file, creating its directory
    pub fn write_source(&self, upload: &Upload, bytes: &[u8]) -> Result<PathBuf> {
        let dir = self.upload_dir(upload.id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::storage(format!("create {}: {}", dir.display(), e)))?;

        let path = self.source_path(upload);
        std::fs::write(&path, bytes)
            .map_err(|e| Error::storage(format!("write {}: {}", path.display(), e)))?;
        Ok(path)
    }

    /// Read an upload's source file
    pub fn read_source(&self, upload: &Upload) -> Result<Vec<u8>> {
        let path = self.source_path(upload);
        std::fs::read(&path)
            .map_err(|e| Error::storage(format!("read {}: {}", path.display(), e)))
    }

    /// Write a published artifact; overwrites any previous version
    pub fn write_export(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::storage(format!("create {}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, bytes)
            .map_err(|e| Error::storage(format!("write {}: {}", path.display(), e)))
    }
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}
