//! Durable per-account storage: account context (`app_config.json`) and
//! persisted cookies (`cookies.json`).
//!
//! Both files are read and replaced whole. A read-modify-write cycle holds an
//! exclusive advisory lock on `.store.lock` in the same directory and lands
//! the new contents through a temp file + rename, so a crash mid-write never
//! leaves a truncated file behind.

pub mod config;
pub mod cookies;

use std::io;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use self::config::{AccountContext, ConfigFile, ConfigStore, JsonConfigStore};
pub use self::cookies::{CookieEntry, CookieSet, CookieStore, JsonCookieStore};

const LOCK_FILE_NAME: &str = ".store.lock";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt store file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One JSON document on disk, replaced atomically.
#[derive(Debug, Clone)]
pub(crate) struct JsonFile {
    path: PathBuf,
    lock_path: PathBuf,
    discard_corrupt: bool,
}

impl JsonFile {
    pub(crate) fn new(dir: &Path, file_name: &str) -> Self {
        Self {
            path: dir.join(file_name),
            lock_path: dir.join(LOCK_FILE_NAME),
            discard_corrupt: false,
        }
    }

    /// Treat an unparsable file as empty instead of failing.
    pub(crate) fn discard_corrupt(mut self) -> Self {
        self.discard_corrupt = true;
        self
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document, or `T::default()` when the file does not exist yet.
    fn read<T: DeserializeOwned + Default>(&self) -> Result<T, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        if contents.trim().is_empty() {
            return Ok(T::default());
        }
        match serde_json::from_str(&contents) {
            Ok(doc) => Ok(doc),
            Err(source) if self.discard_corrupt => {
                tracing::warn!(
                    "{} is corrupt, starting fresh: {}",
                    self.path.display(),
                    source
                );
                Ok(T::default())
            }
            Err(source) => Err(StoreError::Corrupt {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write<T: Serialize>(&self, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
        #[cfg(unix)]
        {
            // Account data and cookies carry auth material; owner-only
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| StoreError::io(&tmp, e))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))
    }

    fn lock(&self) -> Result<std::fs::File, StoreError> {
        if let Some(dir) = self.lock_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| StoreError::io(&self.lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| StoreError::io(&self.lock_path, e))?;
        Ok(file)
    }

    /// Read the whole document on a blocking thread.
    pub(crate) async fn load<T>(&self) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Default + Send + 'static,
    {
        let file = self.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = file.lock()?;
            file.read()
        })
        .await?
    }

    /// Locked read-modify-write. The closure sees the current document (or
    /// the default) and its return value is passed back to the caller.
    pub(crate) async fn update<T, R, F>(&self, f: F) -> Result<R, StoreError>
    where
        T: DeserializeOwned + Serialize + Default + Send + 'static,
        R: Send + 'static,
        F: FnOnce(&mut T) -> R + Send + 'static,
    {
        let file = self.clone();
        tokio::task::spawn_blocking(move || {
            // Lock released when the handle drops
            let _guard = file.lock()?;
            let mut doc: T = file.read()?;
            let out = f(&mut doc);
            file.write(&doc)?;
            Ok(out)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::new(dir.path(), "doc.json");
        let doc: BTreeMap<String, u32> = file.load().await.unwrap();
        assert!(doc.is_empty());
    }

    #[tokio::test]
    async fn test_update_persists_and_returns_value() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::new(dir.path(), "doc.json");
        let len = file
            .update(|doc: &mut BTreeMap<String, u32>| {
                doc.insert("a".into(), 1);
                doc.len()
            })
            .await
            .unwrap();
        assert_eq!(len, 1);

        let reread: BTreeMap<String, u32> = JsonFile::new(dir.path(), "doc.json")
            .load()
            .await
            .unwrap();
        assert_eq!(reread.get("a"), Some(&1));
        assert!(!dir.path().join("doc.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.json"), "{not json").unwrap();
        let file = JsonFile::new(dir.path(), "doc.json");
        let err = file.load::<BTreeMap<String, u32>>().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_discard_corrupt_reads_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.json"), "{not json").unwrap();
        let file = JsonFile::new(dir.path(), "doc.json").discard_corrupt();
        let doc: BTreeMap<String, u32> = file.load().await.unwrap();
        assert!(doc.is_empty());
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let file = JsonFile::new(&nested, "doc.json");
        file.update(|doc: &mut BTreeMap<String, u32>| {
            doc.insert("k".into(), 2);
        })
        .await
        .unwrap();
        assert!(nested.join("doc.json").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let file = JsonFile::new(dir.path(), "doc.json");
        file.update(|doc: &mut BTreeMap<String, u32>| {
            doc.insert("k".into(), 2);
        })
        .await
        .unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
