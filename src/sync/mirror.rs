use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::images::{ImageUploader, UploadError};

use super::envelope::MirrorDocument;
use super::state::EntityKind;

/// Narrow client surface the coordinator talks through. Put and delete
/// collapse into `upsert` (deletes travel as tombstone documents, keyed
/// by entity id, so retries are idempotent); change subscription is
/// `fetch_since` over the conflict timestamp.
pub trait Mirror {
    fn upsert(&self, doc: &MirrorDocument) -> Result<(), MirrorError>;
    fn get(&self, kind: EntityKind, id: &str) -> Result<Option<MirrorDocument>, MirrorError>;
    fn fetch_since(&self, cursor: Option<&str>) -> Result<Vec<MirrorDocument>, MirrorError>;
}

/// Document store backed by a plain directory: one JSON file per entity
/// under `docs/`, uploaded binaries under `blobs/`. Stands in for the
/// real remote in tests and single-machine setups.
#[derive(Debug, Clone)]
pub struct FileMirror {
    root: PathBuf,
}

impl FileMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn docs_dir(&self) -> PathBuf {
        self.root.join("docs")
    }

    fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    // entity ids include user-chosen collection names, so file names are
    // derived from a digest instead of the raw id
    fn doc_path(&self, kind: EntityKind, id: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(id.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        self.docs_dir()
            .join(format!("{}-{}.json", kind.as_str(), &digest[..16]))
    }
}

impl Mirror for FileMirror {
    fn upsert(&self, doc: &MirrorDocument) -> Result<(), MirrorError> {
        fs::create_dir_all(self.docs_dir())?;
        let bytes = serde_json::to_vec_pretty(doc)?;
        fs::write(self.doc_path(doc.kind, &doc.id), bytes)?;
        Ok(())
    }

    fn get(&self, kind: EntityKind, id: &str) -> Result<Option<MirrorDocument>, MirrorError> {
        let path = self.doc_path(kind, id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_document(&path)?))
    }

    fn fetch_since(&self, cursor: Option<&str>) -> Result<Vec<MirrorDocument>, MirrorError> {
        let docs_dir = self.docs_dir();
        if !docs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut result = Vec::new();
        for entry in fs::read_dir(&docs_dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let doc = read_document(&path)?;
            if cursor.is_some_and(|cursor| doc.last_modified.as_str() <= cursor) {
                continue;
            }
            result.push(doc);
        }

        result.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(result)
    }
}

fn read_document(path: &Path) -> Result<MirrorDocument, MirrorError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|err| MirrorError::Document {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

impl ImageUploader for FileMirror {
    fn upload(
        &self,
        item_id: &str,
        bytes: &[u8],
        content_hash: &str,
    ) -> Result<Option<String>, UploadError> {
        let blobs = self.blobs_dir();
        fs::create_dir_all(&blobs).map_err(|err| UploadError::new(err.to_string()))?;
        let file_name = format!("{}-{}", &content_hash[..16.min(content_hash.len())], item_id);
        fs::write(blobs.join(&file_name), bytes).map_err(|err| UploadError::new(err.to_string()))?;
        Ok(Some(format!("mirror://blobs/{file_name}")))
    }
}

#[derive(Debug)]
pub enum MirrorError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
    Document { path: PathBuf, message: String },
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorError::Io(err) => write!(f, "mirror I/O error: {}", err),
            MirrorError::Serialize(err) => write!(f, "mirror serialization error: {}", err),
            MirrorError::Document { path, message } => {
                write!(f, "invalid mirror document '{}': {}", path.display(), message)
            }
        }
    }
}

impl Error for MirrorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MirrorError::Io(err) => Some(err),
            MirrorError::Serialize(err) => Some(err),
            MirrorError::Document { .. } => None,
        }
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(value: std::io::Error) -> Self {
        MirrorError::Io(value)
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(value: serde_json::Error) -> Self {
        MirrorError::Serialize(value)
    }
}
