use std::fs;
use std::path::{Path, PathBuf};

use pill_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::IndexEntry;

pub(crate) const FORMAT_VERSION: u32 = 1;

/// On-disk image of one collection generation. Written whole, tmp -> rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedCollection {
    pub format_version: u32,
    pub collection: String,
    pub metric: String,
    pub dims: Option<u32>,
    pub generation: u64,
    pub updated_at: Option<String>,
    #[serde(default)]
    pub corpus_sha256: Option<String>,
    pub entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone)]
pub(crate) struct CollectionStore {
    dir: PathBuf,
}

impl CollectionStore {
    pub fn new(root: &Path, collection: &str) -> Self {
        Self {
            dir: root.join("collections").join(collection),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn collection_path(&self) -> PathBuf {
        self.dir.join("collection.json")
    }

    fn ensure_dirs(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            AppError::new("INDEX_STORE_FAILED", "Failed to create index directory")
                .with_details(format!("path={}; err={}", self.dir.display(), e))
        })
    }

    pub fn read(&self) -> Result<Option<PersistedCollection>, AppError> {
        let path = self.collection_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| {
            AppError::new("INDEX_STORE_FAILED", "Failed to read index collection")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        let persisted: PersistedCollection = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::new("INDEX_STORE_FAILED", "Failed to decode index collection")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        if persisted.format_version != FORMAT_VERSION {
            return Err(AppError::new(
                "INDEX_STORE_FAILED",
                "Unsupported index format version; rebuild the index",
            )
            .with_details(format!(
                "path={}; found={}; expected={}",
                path.display(),
                persisted.format_version,
                FORMAT_VERSION
            )));
        }
        Ok(Some(persisted))
    }

    pub fn write(&self, collection: &PersistedCollection) -> Result<(), AppError> {
        self.ensure_dirs()?;
        let path = self.collection_path();
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_vec(collection).map_err(|e| {
            AppError::new("INDEX_STORE_FAILED", "Failed to encode index collection")
                .with_details(e.to_string())
        })?;
        fs::write(&tmp, &json).map_err(|e| {
            AppError::new("INDEX_STORE_FAILED", "Failed to write index collection")
                .with_details(format!("path={}; err={}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &path).map_err(|e| {
            AppError::new("INDEX_STORE_FAILED", "Failed to finalize index collection write")
                .with_details(format!("tmp={}; dest={}; err={}", tmp.display(), path.display(), e))
        })?;
        Ok(())
    }
}
