use crate::{errors::CustodyError, fsutil};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Path-addressed object store seam.
///
/// `put` must not replace existing content. `get` returns [`CustodyError::NotFound`] for absent
/// paths and [`CustodyError::StorageUnavailable`] for I/O failures.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), CustodyError>;
    async fn get(&self, path: &str) -> Result<Vec<u8>, CustodyError>;
}

/// Blob store backed by a private directory tree.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: PathBuf) -> eyre::Result<Self> {
        fsutil::ensure_private_dir(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, CustodyError> {
        let rel = Path::new(path);
        let clean = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !clean {
            return Err(CustodyError::invalid("blob path"));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), CustodyError> {
        let full = self.resolve(path)?;
        let outcome = fsutil::create_new_restrictive(&full, bytes, fsutil::MODE_FILE_PRIVATE)
            .map_err(|e| CustodyError::unavailable(format!("{e:#}")))?;
        if outcome == fsutil::CreateOutcome::AlreadyExists {
            tracing::debug!(path, "blob already present; write skipped");
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, CustodyError> {
        let full = self.resolve(path)?;
        match std::fs::read(&full) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CustodyError::NotFound(path.to_owned()))
            }
            Err(e) => Err(CustodyError::unavailable(format!("read blob {path}: {e}"))),
        }
    }
}
