//! The Artifact Cache (C2): content-addressed storage for generated
//! thumbnails, timeline frames, and extracted metadata blobs.

use crate::error::{CatalogError, Result};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Derive the content hash for a source path at a given mtime.
///
/// The hash covers `source_path || "-" || mtime`, not file bytes: two
/// different source paths with identical content still get distinct
/// cache entries, and touching a file without changing it invalidates
/// any artifact keyed on the old mtime.
pub fn derive_hash(source_path: &str, mtime: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update(b"-");
    hasher.update(mtime.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<root>/H[0:2]/H[2:4]/H/<filename>`, two levels of hash-prefix sharding.
    pub fn path_for(&self, hash: &str, filename: &str) -> Result<PathBuf> {
        if hash.len() < 4 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CatalogError::invalid(format!("malformed cache hash '{hash}'")));
        }
        Ok(self.root.join(&hash[0..2]).join(&hash[2..4]).join(hash).join(filename))
    }

    pub fn exists(&self, hash: &str, filename: &str) -> Result<bool> {
        Ok(self.path_for(hash, filename)?.is_file())
    }

    /// Atomic write: write to a `.tmp` sibling, then rename into place.
    pub fn write(&self, hash: &str, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let dest = self.path_for(hash, filename)?;
        let dir = dest.parent().expect("path_for always nests under root");
        std::fs::create_dir_all(dir)?;

        let tmp_path = dir.join(format!("{filename}.tmp"));
        {
            let mut f = std::fs::File::create(&tmp_path)?;
            f.write_all(data)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, &dest)?;
        Ok(dest)
    }

    pub fn read(&self, hash: &str, filename: &str) -> Result<Vec<u8>> {
        let path = self.path_for(hash, filename)?;
        Ok(std::fs::read(path)?)
    }

    pub fn remove(&self, hash: &str, filename: &str) -> Result<()> {
        let path = self.path_for(hash, filename)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_path_dependent() {
        let a = derive_hash("/data/foo.jpg", 1000);
        let b = derive_hash("/data/foo.jpg", 1000);
        let c = derive_hash("/data/bar.jpg", 1000);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn path_layout_shards_by_prefix() {
        let cache = ArtifactCache::new("/cache");
        let hash = derive_hash("/data/foo.jpg", 1000);
        let path = cache.path_for(&hash, "thumb.jpg").unwrap();
        let expected = PathBuf::from("/cache").join(&hash[0..2]).join(&hash[2..4]).join(&hash).join("thumb.jpg");
        assert_eq!(path, expected);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());
        let hash = derive_hash("/data/foo.jpg", 1000);
        cache.write(&hash, "thumb.jpg", b"hello").unwrap();
        assert!(cache.exists(&hash, "thumb.jpg").unwrap());
        assert_eq!(cache.read(&hash, "thumb.jpg").unwrap(), b"hello");
    }

    #[test]
    fn rejects_malformed_hash() {
        let cache = ArtifactCache::new("/cache");
        assert!(cache.path_for("zz", "x").is_err());
    }
}
