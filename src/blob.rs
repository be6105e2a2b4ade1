//! Where file bytes live. The rest of the crate only knows the `BlobStore`
//! trait; the backend is picked once from the configuration.

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::conf::StorageMethod;
use crate::errors::{DepotError, Result};
use crate::s3::S3Store;

pub trait BlobStore: Send + Sync {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()>;

    fn get(&self, name: &str) -> Result<Box<dyn Read + Send>>;

    /// Deleting a blob that isn't there is not an error.
    fn delete(&self, name: &str) -> Result<()>;
}

pub fn open_store(method: &StorageMethod) -> Result<Arc<dyn BlobStore>> {
    match method {
        StorageMethod::Local(root) => {
            log::info!("storing files under {}", root.to_string_lossy());
            Ok(Arc::new(LocalStore::new(root)?))
        }
        StorageMethod::S3(conf) => {
            log::info!("storing files in s3 bucket {} at {}", conf.bucket, conf.endpoint);
            Ok(Arc::new(S3Store::new(conf)?))
        }
    }
}

/// A blob that couldn't be deleted. Recorded and logged, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobFailure {
    pub name: String,
    pub reason: String,
}

impl fmt::Display for BlobFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "could not delete blob {}: {}", self.name, self.reason)
    }
}

pub fn delete_best_effort(
    store: &dyn BlobStore,
    name: &str,
) -> std::result::Result<(), BlobFailure> {
    store.delete(name).map_err(|err| {
        let failure = BlobFailure {
            name: name.to_string(),
            reason: err.to_string(),
        };
        log::error!("{failure}");
        failure
    })
}

/// Storage names are generated by us and never contain a path separator.
pub(crate) fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(DepotError::InvalidInput(format!("invalid storage name {name:?}")))
    }
}

/// Blobs as plain files in one directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            DepotError::StorageUnavailable(format!(
                "cannot create {}: {err}",
                root.to_string_lossy()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        check_name(name)?;
        Ok(self.root.join(name))
    }
}

fn unavailable(path: &Path, err: io::Error) -> DepotError {
    DepotError::StorageUnavailable(format!("{}: {err}", path.to_string_lossy()))
}

impl BlobStore for LocalStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_of(name)?;
        fs::write(&path, bytes).map_err(|err| unavailable(&path, err))
    }

    fn get(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.path_of(name)?;
        match fs::File::open(&path) {
            Ok(f) => Ok(Box::new(f)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(DepotError::NotFound(format!("blob {name}")))
            }
            Err(err) => Err(unavailable(&path, err)),
        }
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_of(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::warn!(
                    "Attempted to delete file at {} but didn't find anything.",
                    path.to_string_lossy()
                );
                Ok(())
            }
            Err(err) => Err(unavailable(&path, err)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;

    #[test]
    fn local_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("blobs")).unwrap();
        store.put("abc.txt", b"hello").unwrap();

        let mut content = String::new();
        store
            .get("abc.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "hello");

        store.delete("abc.txt").unwrap();
        assert!(!store.root().join("abc.txt").exists());
        assert!(matches!(store.get("abc.txt"), Err(err) if err.is_not_found()));
    }

    #[test]
    fn deleting_a_missing_local_blob_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        store.delete("never-written.bin").unwrap();
    }

    #[test]
    fn names_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        for name in ["../etc/passwd", "a/b", "", ".hidden", "a\\b"] {
            assert!(store.put(name, b"x").is_err(), "{name} was accepted");
        }
    }

    #[test]
    fn best_effort_delete_reports_the_failure() {
        let store = MemoryStore::default();
        store.put("ok.txt", b"1").unwrap();
        store.put("bad.txt", b"2").unwrap();
        store.fail_on("bad.txt");

        assert!(delete_best_effort(&store, "ok.txt").is_ok());
        let failure = delete_best_effort(&store, "bad.txt").unwrap_err();
        assert_eq!(failure.name, "bad.txt");
        assert!(failure.reason.contains("cursed"));
        assert_eq!(store.deleted(), vec!["ok.txt".to_string()]);
    }
}
