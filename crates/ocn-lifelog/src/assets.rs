//! On-disk image asset storage (spec §4.5 step 3), grounded on the
//! original project's `ImageAssetStore`: frames are written under an
//! `asset://<id>` URI scheme, and once more than `max_files` are on
//! disk the oldest is deleted and its DB row's URI gets a `deleted:`
//! prefix rather than being removed outright.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use ocn_domain::{Error, Result};
use parking_lot::Mutex;
use uuid::Uuid;

pub const ASSET_URI_PREFIX: &str = "asset://";
pub const DELETED_URI_PREFIX: &str = "deleted:";

pub struct ImageAssetStore {
    dir: PathBuf,
    max_files: usize,
    files: Mutex<VecDeque<(String, PathBuf)>>,
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        _ => "bin",
    }
}

impl ImageAssetStore {
    pub fn new(dir: impl AsRef<Path>, max_files: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        Ok(Self { dir, max_files: max_files.max(1), files: Mutex::new(VecDeque::new()) })
    }

    /// Writes `bytes` to disk and returns `(image_id, asset_uri)`.
    pub fn store(&self, bytes: &[u8], mime: &str) -> Result<(String, String)> {
        let image_id = Uuid::new_v4().to_string();
        let path = self.dir.join(format!("{image_id}.{}", extension_for_mime(mime)));
        std::fs::write(&path, bytes).map_err(Error::Io)?;
        self.files.lock().push_back((image_id.clone(), path));
        Ok((image_id.clone(), format!("{ASSET_URI_PREFIX}{image_id}")))
    }

    pub fn resolve_uri(&self, uri: &str) -> Option<PathBuf> {
        let id = uri.strip_prefix(ASSET_URI_PREFIX)?;
        self.files.lock().iter().find(|(fid, _)| fid == id).map(|(_, p)| p.clone())
    }

    /// If the store now holds more than `max_files`, deletes the oldest
    /// one and returns its original URI so the caller can mark the DB
    /// row `deleted:asset://...` instead of losing the row entirely.
    pub fn evict_oldest_if_over_capacity(&self) -> Option<String> {
        let mut files = self.files.lock();
        if files.len() <= self.max_files {
            return None;
        }
        let (id, path) = files.pop_front()?;
        let _ = std::fs::remove_file(&path);
        Some(format!("{ASSET_URI_PREFIX}{id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_bytes_round_trip_through_resolve_uri() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageAssetStore::new(dir.path(), 10).unwrap();
        let (_, uri) = store.store(b"hello", "image/png").unwrap();
        assert!(uri.starts_with(ASSET_URI_PREFIX));
        let path = store.resolve_uri(&uri).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"hello");
    }

    #[test]
    fn eviction_only_triggers_once_over_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageAssetStore::new(dir.path(), 1).unwrap();
        let (_, first_uri) = store.store(b"one", "image/png").unwrap();
        assert!(store.evict_oldest_if_over_capacity().is_none());
        store.store(b"two", "image/png").unwrap();
        let evicted = store.evict_oldest_if_over_capacity().unwrap();
        assert_eq!(evicted, first_uri);
        assert!(store.resolve_uri(&first_uri).is_none());
    }
}
