//! Placed block instances
//!
//! Each placement stores the plugin id, where it goes on the page and the
//! plugin's configuration. Placements are kept in a JSON manifest that is
//! rewritten after every change.

use cadview_core::{BlockConfig, CadRenderBlock, FileId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_REGION: &str = "content";

#[derive(Error, Debug)]
pub enum BlockStoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Block not found: {0}")]
    NotFound(String),
}

/// A block placed in a page region
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInstance {
    pub id: String,
    pub plugin: String,
    pub region: String,
    #[serde(default)]
    pub weight: i32,
    pub settings: BlockConfig,
}

impl BlockInstance {
    pub fn plugin(&self) -> CadRenderBlock {
        CadRenderBlock::new(self.settings.clone())
    }

    pub fn references(&self, fid: FileId) -> bool {
        self.settings.cad_render_file.contains(&fid)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BlockManifest {
    blocks: BTreeMap<String, BlockInstance>,
}

/// Disk-backed block placements
#[derive(Debug)]
pub struct BlockStore {
    manifest_path: PathBuf,
    manifest: BlockManifest,
}

impl BlockStore {
    pub fn open(state_dir: &Path) -> Result<Self, BlockStoreError> {
        std::fs::create_dir_all(state_dir)?;

        let manifest_path = state_dir.join("blocks.json");
        let manifest = if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            serde_json::from_str(&content)?
        } else {
            BlockManifest::default()
        };

        info!(
            path = %manifest_path.display(),
            blocks = manifest.blocks.len(),
            "Opened block store"
        );

        Ok(Self {
            manifest_path,
            manifest,
        })
    }

    fn save(&self) -> Result<(), BlockStoreError> {
        let content = serde_json::to_string_pretty(&self.manifest)?;
        std::fs::write(&self.manifest_path, content)?;
        Ok(())
    }

    /// Place a new block and return it
    pub fn create(
        &mut self,
        plugin: &str,
        region: Option<String>,
        weight: i32,
        settings: BlockConfig,
    ) -> Result<BlockInstance, BlockStoreError> {
        let block = BlockInstance {
            id: Uuid::new_v4().to_string(),
            plugin: plugin.to_string(),
            region: region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
            weight,
            settings,
        };

        self.manifest.blocks.insert(block.id.clone(), block.clone());
        self.save()?;

        info!(id = %block.id, plugin = %block.plugin, region = %block.region, "Placed block");
        Ok(block)
    }

    pub fn get(&self, id: &str) -> Option<&BlockInstance> {
        self.manifest.blocks.get(id)
    }

    /// All blocks ordered by region, then weight
    pub fn list(&self) -> Vec<&BlockInstance> {
        let mut blocks: Vec<&BlockInstance> = self.manifest.blocks.values().collect();
        blocks.sort_by(|a, b| {
            a.region
                .cmp(&b.region)
                .then(a.weight.cmp(&b.weight))
                .then(a.id.cmp(&b.id))
        });
        blocks
    }

    /// Replace a block's configuration
    pub fn update_settings(&mut self, id: &str, settings: BlockConfig) -> Result<BlockInstance, BlockStoreError> {
        let block = self
            .manifest
            .blocks
            .get_mut(id)
            .ok_or_else(|| BlockStoreError::NotFound(id.to_string()))?;
        block.settings = settings;
        let updated = block.clone();
        self.save()?;

        debug!(id, "Updated block settings");
        Ok(updated)
    }

    pub fn remove(&mut self, id: &str) -> Result<BlockInstance, BlockStoreError> {
        let block = self
            .manifest
            .blocks
            .remove(id)
            .ok_or_else(|| BlockStoreError::NotFound(id.to_string()))?;
        self.save()?;

        info!(id, "Removed block");
        Ok(block)
    }

    /// Whether any placed block still references the file
    pub fn is_referenced(&self, fid: FileId) -> bool {
        self.manifest.blocks.values().any(|b| b.references(fid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_list_ordering() {
        let dir = TempDir::new().unwrap();
        let mut store = BlockStore::open(dir.path()).unwrap();

        let heavy = store
            .create("cad_render_block", None, 5, BlockConfig::default())
            .unwrap();
        let light = store
            .create("cad_render_block", None, -1, BlockConfig::default())
            .unwrap();
        let sidebar = store
            .create("cad_render_block", Some("sidebar".into()), 0, BlockConfig::default())
            .unwrap();

        let ids: Vec<&str> = store.list().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec![light.id.as_str(), heavy.id.as_str(), sidebar.id.as_str()]);
        assert_eq!(light.region, DEFAULT_REGION);
    }

    #[test]
    fn test_update_and_remove() {
        let dir = TempDir::new().unwrap();
        let mut store = BlockStore::open(dir.path()).unwrap();
        let block = store
            .create("cad_render_block", None, 0, BlockConfig::default())
            .unwrap();

        let settings = BlockConfig {
            cad_render_file: vec![FileId(4)],
            ..BlockConfig::default()
        };
        store.update_settings(&block.id, settings).unwrap();
        assert!(store.is_referenced(FileId(4)));

        store.remove(&block.id).unwrap();
        assert!(!store.is_referenced(FileId(4)));
        assert!(matches!(store.remove(&block.id), Err(BlockStoreError::NotFound(_))));
        assert!(matches!(
            store.update_settings("missing", BlockConfig::default()),
            Err(BlockStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_blocks_persist() {
        let dir = TempDir::new().unwrap();
        let id = {
            let mut store = BlockStore::open(dir.path()).unwrap();
            let mut settings = BlockConfig::default();
            settings.label = "Gearbox".into();
            store.create("cad_render_block", None, 0, settings).unwrap().id
        };

        let store = BlockStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&id).unwrap().settings.label, "Gearbox");
    }
}
