//! Application state management

use anyhow::Result;
use cadview_core::{FileId, FormErrors, FormSubmission, PluginRegistry, StorageError};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::blocks::{BlockInstance, BlockStore, BlockStoreError};
use crate::config::Config;
use crate::files::FileStore;

/// Reasons a form submission is not stored
#[derive(thiserror::Error, Debug)]
pub enum SubmitError {
    #[error("Block not found: {0}")]
    NotFound(String),
    #[error("Invalid submission: {0}")]
    Invalid(FormErrors),
    #[error("Failed to store settings: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to save block: {0}")]
    Save(#[from] BlockStoreError),
}

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Available block plugins
    pub registry: PluginRegistry,
    /// Uploaded files
    pub files: RwLock<FileStore>,
    /// Placed blocks
    pub blocks: RwLock<BlockStore>,
    /// Source of per-render instance tokens
    render_counter: AtomicU64,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let files = FileStore::open(
            &config.storage.public_dir,
            &config.storage.public_base_url,
            &config.storage.state_dir,
        )?;
        let blocks = BlockStore::open(&config.storage.state_dir)?;

        Ok(Arc::new(Self {
            config,
            registry: PluginRegistry::new(),
            files: RwLock::new(files),
            blocks: RwLock::new(blocks),
            render_counter: AtomicU64::new(0),
        }))
    }

    /// Token that is unique among all instances rendered by this process
    pub fn next_token(&self) -> u64 {
        self.render_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Validate and store the admin form of a block.
    ///
    /// The block store stays locked from validation until the new settings
    /// are saved, and is taken before the file store like in
    /// [`AppState::release_files`], so a concurrent removal cannot demote a
    /// file this submission is about to reference.
    pub async fn submit_block(&self, id: &str, submission: &FormSubmission) -> Result<BlockInstance, SubmitError> {
        let mut blocks = self.blocks.write().await;
        let mut files = self.files.write().await;

        let mut plugin = blocks
            .get(id)
            .map(BlockInstance::plugin)
            .ok_or_else(|| SubmitError::NotFound(id.to_string()))?;
        let validated = plugin
            .block_form()
            .validate(submission, &*files)
            .map_err(SubmitError::Invalid)?;
        let replaced = plugin.block_submit(&validated, &mut *files)?;
        let block = blocks.update_settings(id, plugin.into_configuration())?;

        for fid in replaced {
            if blocks.is_referenced(fid) {
                continue;
            }
            debug!(file = %fid, block = %id, "Replaced file no longer referenced");
            if let Err(e) = files.set_temporary(fid) {
                warn!(file = %fid, error = %e, "Failed to release file");
            }
        }
        Ok(block)
    }

    /// Hand files of a removed block back to temporary-file cleanup when no
    /// other block still uses them
    pub async fn release_files(&self, removed: &BlockInstance) {
        let blocks = self.blocks.read().await;
        let mut files = self.files.write().await;

        for fid in &removed.settings.cad_render_file {
            if blocks.is_referenced(*fid) {
                debug!(file = %fid, "File still referenced, keeping it permanent");
                continue;
            }
            if let Err(e) = files.set_temporary(*fid) {
                warn!(file = %fid, error = %e, "Failed to release file");
            }
        }
    }

    /// Remove expired temporary files once
    pub async fn collect_garbage(&self) -> Vec<FileId> {
        let max_age = chrono::Duration::seconds(
            i64::try_from(self.config.storage.temporary_max_age_secs).unwrap_or(i64::MAX),
        );
        match self.files.write().await.collect_garbage(Utc::now(), max_age) {
            Ok(removed) => removed,
            Err(e) => {
                error!(error = %e, "Temporary file cleanup failed");
                Vec::new()
            }
        }
    }

    /// Spawn the periodic temporary-file cleanup
    pub fn spawn_garbage_collector(self: &Arc<Self>) {
        let interval_secs = self.config.storage.gc_interval_secs;
        if interval_secs == 0 {
            info!("Temporary file cleanup disabled");
            return;
        }

        let state = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                state.collect_garbage().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FileStatus;
    use cadview_core::BlockConfig;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.public_dir = dir.path().join("public");
        config.storage.state_dir = dir.path().join("state");
        config.web.dir = dir.path().join("web");
        config
    }

    #[test]
    fn test_tokens_are_unique() {
        let dir = TempDir::new().unwrap();
        let state = AppState::new(test_config(&dir)).unwrap();
        let first = state.next_token();
        let second = state.next_token();
        assert_ne!(first, second);
    }

    async fn permanent_file(state: &AppState, name: &str) -> FileId {
        let mut files = state.files.write().await;
        let record = files.create_temporary(name, b"glTF", 1024, Utc::now()).unwrap();
        files.set_permanent(record.fid).unwrap();
        record.fid
    }

    fn file_submission(fid: FileId) -> FormSubmission {
        serde_json::from_value(serde_json::json!({ "cad_render_file": [fid.0] })).unwrap()
    }

    #[tokio::test]
    async fn test_submit_releases_replaced_file() {
        let dir = TempDir::new().unwrap();
        let state = AppState::new(test_config(&dir)).unwrap();
        let old = permanent_file(&state, "old.glb").await;
        let new = state
            .files
            .write()
            .await
            .create_temporary("new.glb", b"glTF", 1024, Utc::now())
            .unwrap()
            .fid;

        let block = state
            .blocks
            .write()
            .await
            .create(
                "cad_render_block",
                None,
                0,
                BlockConfig {
                    cad_render_file: vec![old],
                    ..BlockConfig::default()
                },
            )
            .unwrap();

        let saved = state.submit_block(&block.id, &file_submission(new)).await.unwrap();
        assert_eq!(saved.settings.cad_render_file, vec![new]);

        let files = state.files.read().await;
        assert_eq!(files.get(old).unwrap().status, FileStatus::Temporary);
        assert_eq!(files.get(new).unwrap().status, FileStatus::Permanent);
    }

    #[tokio::test]
    async fn test_submit_keeps_replaced_file_used_elsewhere() {
        let dir = TempDir::new().unwrap();
        let state = AppState::new(test_config(&dir)).unwrap();
        let shared = permanent_file(&state, "shared.glb").await;
        let other = permanent_file(&state, "other.glb").await;
        let settings = BlockConfig {
            cad_render_file: vec![shared],
            ..BlockConfig::default()
        };

        let (first, _second) = {
            let mut blocks = state.blocks.write().await;
            (
                blocks.create("cad_render_block", None, 0, settings.clone()).unwrap(),
                blocks.create("cad_render_block", None, 1, settings).unwrap(),
            )
        };

        state.submit_block(&first.id, &file_submission(other)).await.unwrap();
        assert_eq!(state.files.read().await.get(shared).unwrap().status, FileStatus::Permanent);
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_block() {
        let dir = TempDir::new().unwrap();
        let state = AppState::new(test_config(&dir)).unwrap();
        let fid = permanent_file(&state, "model.glb").await;
        let result = state.submit_block("missing", &file_submission(fid)).await;
        assert!(matches!(result, Err(SubmitError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_delete_and_submit_keep_file() {
        for _ in 0..32 {
            let dir = TempDir::new().unwrap();
            let state = AppState::new(test_config(&dir)).unwrap();
            let fid = permanent_file(&state, "model.glb").await;

            let (removed, target) = {
                let mut blocks = state.blocks.write().await;
                let removed = blocks
                    .create(
                        "cad_render_block",
                        None,
                        0,
                        BlockConfig {
                            cad_render_file: vec![fid],
                            ..BlockConfig::default()
                        },
                    )
                    .unwrap();
                let target = blocks.create("cad_render_block", None, 1, BlockConfig::default()).unwrap();
                (removed, target)
            };

            let deleting = {
                let state = state.clone();
                tokio::spawn(async move {
                    let block = state.blocks.write().await.remove(&removed.id).unwrap();
                    tokio::task::yield_now().await;
                    state.release_files(&block).await;
                })
            };
            let submitting = {
                let state = state.clone();
                let id = target.id.clone();
                tokio::spawn(async move { state.submit_block(&id, &file_submission(fid)).await })
            };

            deleting.await.unwrap();
            let saved = submitting.await.unwrap().unwrap();
            assert_eq!(saved.settings.cad_render_file, vec![fid]);
            assert_eq!(state.files.read().await.get(fid).unwrap().status, FileStatus::Permanent);
        }
    }

    #[tokio::test]
    async fn test_release_keeps_shared_files() {
        let dir = TempDir::new().unwrap();
        let state = AppState::new(test_config(&dir)).unwrap();

        let fid = {
            let mut files = state.files.write().await;
            let record = files.create_temporary("shared.glb", b"glTF", 1024, Utc::now()).unwrap();
            files.set_permanent(record.fid).unwrap();
            record.fid
        };
        let settings = BlockConfig {
            cad_render_file: vec![fid],
            ..BlockConfig::default()
        };

        let (first, second) = {
            let mut blocks = state.blocks.write().await;
            (
                blocks.create("cad_render_block", None, 0, settings.clone()).unwrap(),
                blocks.create("cad_render_block", None, 1, settings).unwrap(),
            )
        };

        let removed = state.blocks.write().await.remove(&first.id).unwrap();
        state.release_files(&removed).await;
        assert_eq!(state.files.read().await.get(fid).unwrap().status, FileStatus::Permanent);

        let removed = state.blocks.write().await.remove(&second.id).unwrap();
        state.release_files(&removed).await;
        assert_eq!(state.files.read().await.get(fid).unwrap().status, FileStatus::Temporary);
    }
}
