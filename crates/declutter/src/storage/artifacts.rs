//! Filesystem-backed artifact store.
//!
//! Generated outputs (before/after images, narration audio) are blobs
//! addressed by relative, slash-separated keys such as
//! `3f2a.../after.png`. Keys are validated so they can never resolve
//! outside the store root, and writes go through a temporary file plus
//! rename so readers never observe a half-written artifact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::StoreError;

/// Maps a mime type to the file extension used when composing artifact keys.
///
/// Unknown types fall back to `bin` rather than failing; the mime type
/// itself is preserved alongside the key wherever it matters.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        _ => "bin",
    }
}

/// Store rooted at a single directory, with artifacts nested one
/// directory per job underneath it.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Default store root: `~/.declutter/artifacts`.
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".declutter").join("artifacts"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `content` under `key`, creating parent directories as
    /// needed. An existing artifact under the same key is replaced,
    /// which is what a re-run of the same job wants.
    pub fn put(&self, key: &str, content: &[u8]) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        fs::write(&staging, content).map_err(|e| StoreError::WriteArtifact {
            path: staging.clone(),
            source: e,
        })?;
        if let Err(e) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(StoreError::WriteArtifact { path, source: e });
        }

        log::debug!("Stored artifact {} ({} bytes)", key, content.len());
        Ok(key.to_string())
    }

    /// Reads the artifact stored under `key`.
    pub fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::Missing(key.to_string())
            } else {
                StoreError::ReadArtifact { path, source: e }
            }
        })
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Lists stored keys beginning with `prefix`, sorted. `""` lists
    /// everything; `"{job_id}/"` lists one job's artifacts.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| StoreError::ReadArtifact {
                path: self.root.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with('.') {
                // Staging files from in-flight writes.
                continue;
            }
            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let key = relative.to_string_lossy().replace('\\', "/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Resolves a key to its on-disk path, refusing anything that could
    /// escape the root.
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if !valid_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        Ok(path)
    }
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('/')
        && !key.contains('\\')
        && key.split('/').all(|segment| {
            !segment.is_empty() && segment != "." && segment != ".." && !segment.starts_with('.')
        })
}

fn ensure_directory(path: &Path) -> Result<(), StoreError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| StoreError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
