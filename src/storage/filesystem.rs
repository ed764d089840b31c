//! File system document store
//!
//! One document per file directly under a root directory.
//!
//! ## Security
//!
//! Names containing path separators or ".." are rejected, and every resolved
//! path is verified to remain within the root directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{DocumentStore, StorageError};

/// File system document store
#[derive(Debug, Clone)]
pub struct FileSystemDocumentStore {
    root: PathBuf,
}

impl FileSystemDocumentStore {
    /// Create a store rooted at `root`. The directory is created lazily by
    /// [`ensure_root`](DocumentStore::ensure_root) or the first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a document name to a path inside the root.
    fn resolve_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() {
            return Err(StorageError::InvalidName("empty name".to_string()));
        }
        if name.contains("..") {
            return Err(StorageError::PermissionDenied(
                "Path traversal (..) not allowed".to_string(),
            ));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(StorageError::InvalidName(format!(
                "{name}: nested paths are not supported"
            )));
        }

        let full = self.root.join(name);
        for component in full.components() {
            if matches!(component, Component::ParentDir) {
                return Err(StorageError::PermissionDenied(
                    "Path traversal not allowed".to_string(),
                ));
            }
        }

        if full.exists() {
            let canonical = full
                .canonicalize()
                .map_err(|e| StorageError::IoError(format!("Failed to resolve path: {e}")))?;
            let root_canonical = self
                .root
                .canonicalize()
                .unwrap_or_else(|_| self.root.clone());
            if !canonical.starts_with(&root_canonical) {
                return Err(StorageError::PermissionDenied(
                    "Path escapes root directory".to_string(),
                ));
            }
            return Ok(canonical);
        }

        Ok(full)
    }

    fn not_found_or_io(name: &str, action: &str, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::DocumentNotFound(name.to_string())
        } else {
            StorageError::IoError(format!("Failed to {action} {name}: {e}"))
        }
    }
}

#[async_trait]
impl DocumentStore for FileSystemDocumentStore {
    async fn read_document(&self, name: &str) -> Result<String, StorageError> {
        let path = self.resolve_path(name)?;
        fs::read_to_string(&path)
            .await
            .map_err(|e| Self::not_found_or_io(name, "read", e))
    }

    async fn write_document(&self, name: &str, content: &str) -> Result<(), StorageError> {
        let path = self.resolve_path(name)?;
        fs::create_dir_all(&self.root).await.map_err(|e| {
            StorageError::IoError(format!("Failed to create {}: {e}", self.root.display()))
        })?;

        // Write beside the target and rename so readers never see a partial
        // file; one staging file per writer
        let staging = self
            .root
            .join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));
        let staged = match fs::write(&staging, content).await {
            Ok(()) => fs::rename(&staging, &path)
                .await
                .map_err(|e| StorageError::IoError(format!("Failed to replace {name}: {e}"))),
            Err(e) => Err(StorageError::IoError(format!("Failed to write {name}: {e}"))),
        };
        if staged.is_err() {
            let _ = fs::remove_file(&staging).await;
        }
        staged?;

        debug!(document = name, bytes = content.len(), "Wrote document");
        Ok(())
    }

    async fn list_documents(&self, extension: &str) -> Result<Vec<String>, StorageError> {
        let mut read_dir = match fs::read_dir(&self.root).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::IoError(format!(
                    "Failed to read directory {}: {e}",
                    self.root.display()
                )));
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| StorageError::IoError(format!("Failed to read directory entry: {e}")))?
        {
            if let Ok(file_type) = entry.file_type().await
                && file_type.is_file()
                && let Some(file_name) = entry.file_name().to_str()
                && file_name.ends_with(extension)
                && !file_name.starts_with('.')
            {
                names.push(file_name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn document_exists(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.resolve_path(name)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::IoError(format!(
                "Failed to check document {name}: {e}"
            ))),
        }
    }

    async fn delete_document(&self, name: &str) -> Result<(), StorageError> {
        let path = self.resolve_path(name)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Self::not_found_or_io(name, "delete", e))
    }

    async fn ensure_root(&self) -> Result<bool, StorageError> {
        match fs::metadata(&self.root).await {
            Ok(metadata) if metadata.is_dir() => Ok(false),
            Ok(_) => Err(StorageError::IoError(format!(
                "{} exists and is not a directory",
                self.root.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.root).await.map_err(|e| {
                    StorageError::IoError(format!(
                        "Failed to create {}: {e}",
                        self.root.display()
                    ))
                })?;
                debug!(root = %self.root.display(), "Created document directory");
                Ok(true)
            }
            Err(e) => Err(StorageError::IoError(format!(
                "Failed to inspect {}: {e}",
                self.root.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_traversal_blocked() {
        let temp = TempDir::new().unwrap();
        let store = FileSystemDocumentStore::new(temp.path());

        let result = store.resolve_path("../passwd");
        assert!(matches!(result, Err(StorageError::PermissionDenied(_))));

        let result = store.resolve_path("sub/epic.json");
        assert!(matches!(result, Err(StorageError::InvalidName(_))));

        assert!(store.resolve_path("epic.json").is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_one_document() {
        let temp = TempDir::new().unwrap();
        let store = std::sync::Arc::new(FileSystemDocumentStore::new(temp.path()));
        let contents: Vec<String> = (0..8).map(|i| format!("{{\"writer\":{i}}}")).collect();

        let handles: Vec<_> = contents
            .iter()
            .cloned()
            .map(|content| {
                let store = store.clone();
                tokio::spawn(async move { store.write_document("catalog.json", &content).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.read_document("catalog.json").await.unwrap();
        assert!(contents.contains(&stored));
        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_write_read_list_delete() {
        let temp = TempDir::new().unwrap();
        let store = FileSystemDocumentStore::new(temp.path().join("vendors"));

        assert!(store.ensure_root().await.unwrap());
        assert!(!store.ensure_root().await.unwrap());

        store.write_document("b.json", "{}").await.unwrap();
        store.write_document("a.json", "[]").await.unwrap();
        store.write_document("notes.txt", "x").await.unwrap();

        assert_eq!(
            store.list_documents(".json").await.unwrap(),
            vec!["a.json", "b.json"]
        );
        assert_eq!(store.read_document("a.json").await.unwrap(), "[]");

        store.delete_document("a.json").await.unwrap();
        assert!(!store.document_exists("a.json").await.unwrap());
        assert!(matches!(
            store.read_document("a.json").await,
            Err(StorageError::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = FileSystemDocumentStore::new(temp.path().join("absent"));
        assert!(store.list_documents(".json").await.unwrap().is_empty());
    }
}
