//! Uploaded file storage
//!
//! Files live under the public directory and are tracked in a JSON
//! manifest. Uploads start out temporary; the block form makes them
//! permanent on submission. Temporary files older than the configured age
//! are removed by [`FileStore::collect_garbage`].

use cadview_core::block::{AssetStorage, StorageError};
use cadview_core::form::{MODEL_EXTENSION, UPLOAD_LOCATION};
use cadview_core::FileId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PUBLIC_SCHEME: &str = "public://";
const GLB_MIME: &str = "model/gltf-binary";

#[derive(Error, Debug)]
pub enum FileStoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Only files with the following extensions are allowed: {0}")]
    Extension(&'static str),
    #[error("The file is {size} bytes which exceeds the maximum file size of {max} bytes")]
    TooLarge { size: usize, max: usize },
    #[error("Invalid file name: {0}")]
    InvalidName(String),
    #[error("File not found: {0}")]
    NotFound(FileId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Temporary,
    Permanent,
}

/// A stored file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub fid: FileId,
    pub uuid: Uuid,
    pub filename: String,
    /// Stream wrapper URI, e.g. `public://cad_render_files/model.glb`
    pub uri: String,
    pub filemime: String,
    pub filesize: u64,
    pub sha256: String,
    pub status: FileStatus,
    pub created: DateTime<Utc>,
    pub changed: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileManifest {
    next_fid: u64,
    files: BTreeMap<FileId, FileRecord>,
}

/// Disk-backed file storage
#[derive(Debug)]
pub struct FileStore {
    public_dir: PathBuf,
    base_url: String,
    manifest_path: PathBuf,
    manifest: FileManifest,
}

impl FileStore {
    /// Open the store, loading the manifest from `state_dir` if present
    pub fn open(public_dir: &Path, base_url: &str, state_dir: &Path) -> Result<Self, FileStoreError> {
        std::fs::create_dir_all(public_dir)?;
        std::fs::create_dir_all(state_dir)?;

        let manifest_path = state_dir.join("files.json");
        let manifest = if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            serde_json::from_str(&content)?
        } else {
            FileManifest::default()
        };

        info!(
            path = %manifest_path.display(),
            files = manifest.files.len(),
            "Opened file store"
        );

        Ok(Self {
            public_dir: public_dir.to_path_buf(),
            base_url: base_url.trim_end_matches('/').to_string(),
            manifest_path,
            manifest,
        })
    }

    fn save(&self) -> Result<(), FileStoreError> {
        let content = serde_json::to_string_pretty(&self.manifest)?;
        std::fs::write(&self.manifest_path, content)?;
        Ok(())
    }

    /// Store an upload as a temporary file in the upload location
    pub fn create_temporary(
        &mut self,
        original_name: &str,
        content: &[u8],
        max_size: usize,
        now: DateTime<Utc>,
    ) -> Result<FileRecord, FileStoreError> {
        if content.len() > max_size {
            return Err(FileStoreError::TooLarge {
                size: content.len(),
                max: max_size,
            });
        }

        let filename = sanitize_filename(original_name)?;
        let relative_dir = UPLOAD_LOCATION.trim_start_matches(PUBLIC_SCHEME);
        let directory = self.public_dir.join(relative_dir);
        std::fs::create_dir_all(&directory)?;

        let filename = self.unique_filename(&directory, &filename);
        std::fs::write(directory.join(&filename), content)?;

        self.manifest.next_fid += 1;
        let fid = FileId(self.manifest.next_fid);
        let record = FileRecord {
            fid,
            uuid: Uuid::new_v4(),
            uri: format!("{UPLOAD_LOCATION}{filename}"),
            filename,
            filemime: GLB_MIME.to_string(),
            filesize: content.len() as u64,
            sha256: sha256_hex(content),
            status: FileStatus::Temporary,
            created: now,
            changed: now,
        };

        self.manifest.files.insert(fid, record.clone());
        self.save()?;

        info!(file = %fid, uri = %record.uri, size = record.filesize, "Stored temporary upload");
        Ok(record)
    }

    /// Append `_0`, `_1`, ... to the basename until the name is free
    fn unique_filename(&self, directory: &Path, filename: &str) -> String {
        let taken = |name: &str| {
            directory.join(name).exists()
                || self
                    .manifest
                    .files
                    .values()
                    .any(|f| f.uri == format!("{UPLOAD_LOCATION}{name}"))
        };

        if !taken(filename) {
            return filename.to_string();
        }

        let (stem, extension) = filename.rsplit_once('.').unwrap_or((filename, ""));
        let mut counter = 0u32;
        loop {
            let candidate = format!("{stem}_{counter}.{extension}");
            if !taken(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    pub fn get(&self, fid: FileId) -> Option<&FileRecord> {
        self.manifest.files.get(&fid)
    }

    pub fn list(&self) -> impl Iterator<Item = &FileRecord> {
        self.manifest.files.values()
    }

    fn set_status(&mut self, fid: FileId, status: FileStatus) -> Result<(), FileStoreError> {
        let record = self
            .manifest
            .files
            .get_mut(&fid)
            .ok_or(FileStoreError::NotFound(fid))?;
        if record.status != status {
            record.status = status;
            record.changed = Utc::now();
            debug!(file = %fid, status = ?status, "File status changed");
            self.save()?;
        }
        Ok(())
    }

    pub fn set_permanent(&mut self, fid: FileId) -> Result<(), FileStoreError> {
        self.set_status(fid, FileStatus::Permanent)
    }

    /// Hand a file back to temporary-file cleanup
    pub fn set_temporary(&mut self, fid: FileId) -> Result<(), FileStoreError> {
        self.set_status(fid, FileStatus::Temporary)
    }

    /// Local path of a stored file
    pub fn local_path(&self, record: &FileRecord) -> PathBuf {
        self.public_dir
            .join(record.uri.trim_start_matches(PUBLIC_SCHEME))
    }

    /// Public URL of a stored file
    pub fn url_for(&self, record: &FileRecord) -> String {
        format!(
            "{}/{}",
            self.base_url,
            record.uri.trim_start_matches(PUBLIC_SCHEME)
        )
    }

    /// Delete temporary files whose last change is older than `max_age`
    pub fn collect_garbage(
        &mut self,
        now: DateTime<Utc>,
        max_age: chrono::Duration,
    ) -> Result<Vec<FileId>, FileStoreError> {
        let expired: Vec<FileId> = self
            .manifest
            .files
            .values()
            .filter(|f| f.status == FileStatus::Temporary && now - f.changed > max_age)
            .map(|f| f.fid)
            .collect();

        if expired.is_empty() {
            return Ok(expired);
        }

        for fid in &expired {
            if let Some(record) = self.manifest.files.remove(fid) {
                let path = self.local_path(&record);
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete expired file"),
                }
            }
        }
        self.save()?;

        info!(count = expired.len(), "Removed expired temporary files");
        Ok(expired)
    }
}

impl AssetStorage for FileStore {
    fn contains(&self, fid: FileId) -> bool {
        self.manifest.files.contains_key(&fid)
    }

    fn make_permanent(&mut self, fid: FileId) -> Result<(), StorageError> {
        self.set_permanent(fid).map_err(|e| match e {
            FileStoreError::NotFound(fid) => StorageError::NotFound(fid),
            other => StorageError::Backend(other.to_string()),
        })
    }

    fn public_url(&self, fid: FileId) -> Option<String> {
        self.get(fid).map(|record| self.url_for(record))
    }
}

/// Reduce an uploaded name to a safe basename with the model extension
fn sanitize_filename(original: &str) -> Result<String, FileStoreError> {
    let basename = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original)
        .trim();

    let (stem, extension) = basename
        .rsplit_once('.')
        .ok_or(FileStoreError::Extension(MODEL_EXTENSION))?;
    if !extension.eq_ignore_ascii_case(MODEL_EXTENSION) {
        return Err(FileStoreError::Extension(MODEL_EXTENSION));
    }

    let stem: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_matches('.');
    if stem.is_empty() {
        return Err(FileStoreError::InvalidName(original.to_string()));
    }

    Ok(format!("{stem}.{MODEL_EXTENSION}"))
}

/// Compute SHA256 hash of data and return as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MAX: usize = 1024;

    fn store(dir: &TempDir) -> FileStore {
        FileStore::open(&dir.path().join("public"), "/files/", &dir.path().join("state")).unwrap()
    }

    #[test]
    fn test_upload_is_temporary() {
        let dir = TempDir::new().unwrap();
        let mut files = store(&dir);

        let record = files.create_temporary("Bracket v2.GLB", b"glTF", MAX, Utc::now()).unwrap();
        assert_eq!(record.fid, FileId(1));
        assert_eq!(record.status, FileStatus::Temporary);
        assert_eq!(record.uri, "public://cad_render_files/Bracket_v2.glb");
        assert_eq!(record.filemime, "model/gltf-binary");
        assert!(files.local_path(&record).exists());
        assert_eq!(
            files.public_url(record.fid).as_deref(),
            Some("/files/cad_render_files/Bracket_v2.glb")
        );
    }

    #[test]
    fn test_duplicate_names_get_suffix() {
        let dir = TempDir::new().unwrap();
        let mut files = store(&dir);

        let first = files.create_temporary("part.glb", b"a", MAX, Utc::now()).unwrap();
        let second = files.create_temporary("part.glb", b"b", MAX, Utc::now()).unwrap();
        let third = files.create_temporary("../../part.glb", b"c", MAX, Utc::now()).unwrap();

        assert_eq!(first.filename, "part.glb");
        assert_eq!(second.filename, "part_0.glb");
        assert_eq!(third.filename, "part_1.glb");
    }

    #[test]
    fn test_rejects_bad_uploads() {
        let dir = TempDir::new().unwrap();
        let mut files = store(&dir);

        assert!(matches!(
            files.create_temporary("model.stl", b"solid", MAX, Utc::now()),
            Err(FileStoreError::Extension(_))
        ));
        assert!(matches!(
            files.create_temporary("model", b"solid", MAX, Utc::now()),
            Err(FileStoreError::Extension(_))
        ));
        assert!(matches!(
            files.create_temporary("model.glb", &[0u8; MAX + 1], MAX, Utc::now()),
            Err(FileStoreError::TooLarge { .. })
        ));
        assert!(matches!(
            files.create_temporary("....glb", b"x", MAX, Utc::now()),
            Err(FileStoreError::InvalidName(_))
        ));
    }

    #[test]
    fn test_garbage_collection_spares_permanent_files() {
        let dir = TempDir::new().unwrap();
        let mut files = store(&dir);
        let long_ago = Utc::now() - chrono::Duration::hours(7);

        let stale = files.create_temporary("stale.glb", b"a", MAX, long_ago).unwrap();
        let fresh = files.create_temporary("fresh.glb", b"b", MAX, Utc::now()).unwrap();
        let kept = files.create_temporary("kept.glb", b"c", MAX, long_ago).unwrap();
        files.make_permanent(kept.fid).unwrap();

        let removed = files
            .collect_garbage(Utc::now(), chrono::Duration::hours(6))
            .unwrap();

        assert_eq!(removed, vec![stale.fid]);
        assert!(!files.contains(stale.fid));
        assert!(!files.local_path(&stale).exists());
        assert!(files.contains(fresh.fid));
        assert!(files.contains(kept.fid));
    }

    #[test]
    fn test_manifest_persists() {
        let dir = TempDir::new().unwrap();
        let fid = {
            let mut files = store(&dir);
            let record = files.create_temporary("a.glb", b"hello world", MAX, Utc::now()).unwrap();
            files.set_permanent(record.fid).unwrap();
            record.fid
        };

        let files = store(&dir);
        let record = files.get(fid).unwrap();
        assert_eq!(record.status, FileStatus::Permanent);
        assert_eq!(
            record.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_make_permanent_unknown_file() {
        let dir = TempDir::new().unwrap();
        let mut files = store(&dir);
        assert!(matches!(files.make_permanent(FileId(9)), Err(StorageError::NotFound(_))));
    }
}
