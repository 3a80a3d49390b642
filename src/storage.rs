//! Whole-document persistence shared by the lifecycle state and the catalog cache

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Trait for storage backend operations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Save content to a file path atomically
    async fn save(&self, path: &Path, content: &str) -> Result<()>;

    /// Load content from a file path
    /// Returns None if file doesn't exist
    async fn load(&self, path: &Path) -> Result<Option<String>>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Production storage backend using tokio::fs
pub struct FileSystemStorage;

impl FileSystemStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileSystemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn save(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        // Atomic write: write to temp file, then rename
        let temp_file = temp_path(path);

        let mut file = fs::File::create(&temp_file)
            .await
            .with_context(|| format!("Failed to create temp file: {:?}", temp_file))?;
        file.write_all(content.as_bytes())
            .await
            .context("Failed to write document")?;
        file.sync_all().await.context("Failed to sync document")?;

        fs::rename(&temp_file, path)
            .await
            .with_context(|| format!("Failed to rename temp file onto {:?}", path))?;

        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read file: {:?}", path)),
        }
    }
}

/// Sibling temp file that keeps the full file name, so `models.json` and
/// `models.cache` never share one
fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{file_name}.tmp"))
}

// ============================================================================
// Path-keyed locking
// ============================================================================

static PATH_LOCKS: OnceLock<DashMap<PathBuf, Arc<Mutex<()>>>> = OnceLock::new();

/// Process-wide mutex for a persisted document
///
/// Every component that runs load -> mutate -> save on the same path gets the
/// same mutex, even when it was constructed independently.
pub fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    let locks = PATH_LOCKS.get_or_init(DashMap::new);
    locks
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_filesystem_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/state.json");
        let storage = FileSystemStorage::new();

        storage.save(&path, "{\"a\":1}").await.unwrap();
        let loaded = storage.load(&path).await.unwrap();
        assert_eq!(loaded.as_deref(), Some("{\"a\":1}"));

        // Temp file must not be left behind
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_temp_path_keeps_extension() {
        let state = temp_path(Path::new("/data/models.json"));
        let cache = temp_path(Path::new("/data/models.cache"));

        assert_eq!(state, PathBuf::from("/data/.models.json.tmp"));
        assert_eq!(cache, PathBuf::from("/data/.models.cache.tmp"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_saves_to_paths_sharing_a_stem() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("models.json");
        let cache = dir.path().join("models.cache");
        let storage = Arc::new(FileSystemStorage::new());

        for round in 0..50 {
            let state_doc = format!("STATE {round}");
            let cache_doc = format!("CACHE {round}");

            let (a, b) = tokio::join!(
                {
                    let storage = storage.clone();
                    let (path, doc) = (state.clone(), state_doc.clone());
                    tokio::spawn(async move { storage.save(&path, &doc).await })
                },
                {
                    let storage = storage.clone();
                    let (path, doc) = (cache.clone(), cache_doc.clone());
                    tokio::spawn(async move { storage.save(&path, &doc).await })
                },
            );
            a.unwrap().unwrap();
            b.unwrap().unwrap();

            assert_eq!(storage.load(&state).await.unwrap(), Some(state_doc));
            assert_eq!(storage.load(&cache).await.unwrap(), Some(cache_doc));
        }
    }

    #[tokio::test]
    async fn test_filesystem_load_missing() {
        let dir = TempDir::new().unwrap();
        let storage = FileSystemStorage::new();
        let loaded = storage.load(&dir.path().join("absent.json")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_filesystem_save_replaces_whole_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let storage = FileSystemStorage::new();

        storage.save(&path, "first version, much longer").await.unwrap();
        storage.save(&path, "second").await.unwrap();
        assert_eq!(storage.load(&path).await.unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_path_lock_is_shared_per_path() {
        let a = path_lock(Path::new("/tmp/model-manager-lock-test/a.json"));
        let a_again = path_lock(Path::new("/tmp/model-manager-lock-test/a.json"));
        let b = path_lock(Path::new("/tmp/model-manager-lock-test/b.json"));

        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_mock_error_injection() {
        let storage = mocks::MockStorage::new();
        let path = Path::new("/mock/doc.json");

        storage.set_save_error("disk full".to_string()).await;
        assert!(storage.save(path, "x").await.is_err());
        // Error is consumed after one use
        storage.save(path, "x").await.unwrap();
        assert_eq!(storage.save_count().await, 1);

        storage.set_load_error("io".to_string()).await;
        assert!(storage.load(path).await.is_err());
        assert_eq!(storage.load(path).await.unwrap().as_deref(), Some("x"));
    }
}
