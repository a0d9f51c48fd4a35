//! The CAD render block plugin
//!
//! Owns one block's configuration and implements the three plugin
//! operations: building the admin form, applying a validated submission and
//! producing the render-time settings object.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{BlockConfig, FileId};
use crate::form::{Form, ValidatedSubmission};
use crate::settings::ViewerSettings;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(FileId),
    #[error("Storage failure: {0}")]
    Backend(String),
}

/// Storage collaborator for uploaded assets.
///
/// Given an upload id it makes the file durable and resolves it to a
/// public URL. Storage semantics stay with the implementor.
pub trait AssetStorage {
    fn contains(&self, fid: FileId) -> bool;

    /// Protect the file from temporary-file cleanup
    fn make_permanent(&mut self, fid: FileId) -> Result<(), StorageError>;

    /// Publicly resolvable URL of the file
    fn public_url(&self, fid: FileId) -> Option<String>;
}

/// Registration entry of a block plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockDefinition {
    pub id: &'static str,
    pub admin_label: &'static str,
    pub category: &'static str,
}

/// Lookup table of the block plugins this crate provides
pub struct PluginRegistry {
    definitions: Vec<BlockDefinition>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            definitions: vec![CadRenderBlock::DEFINITION],
        }
    }

    pub fn definitions(&self) -> &[BlockDefinition] {
        &self.definitions
    }

    pub fn get(&self, id: &str) -> Option<&BlockDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Output of a block render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedBlock {
    /// Key shared by the DOM element and its settings object
    pub unique_id: String,
    /// Title to show, `None` when hidden
    pub label: Option<String>,
    pub settings: ViewerSettings,
}

/// Key identifying one rendered instance of a plugin
pub fn instance_key(plugin_id: &str, token: u64) -> String {
    format!("{plugin_id}:{token}")
}

/// A placed CAD render block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CadRenderBlock {
    configuration: BlockConfig,
}

impl CadRenderBlock {
    pub const DEFINITION: BlockDefinition = BlockDefinition {
        id: "cad_render_block",
        admin_label: "CAD Render block",
        category: "CAD Render",
    };

    pub fn new(configuration: BlockConfig) -> Self {
        Self { configuration }
    }

    pub fn plugin_id(&self) -> &'static str {
        Self::DEFINITION.id
    }

    pub fn configuration(&self) -> &BlockConfig {
        &self.configuration
    }

    pub fn into_configuration(self) -> BlockConfig {
        self.configuration
    }

    pub fn default_configuration() -> BlockConfig {
        BlockConfig::default()
    }

    pub fn block_form(&self) -> Form {
        Form::for_config(&self.configuration)
    }

    /// Store a validated submission.
    ///
    /// Values are stored verbatim except the file reference: every
    /// referenced file is made permanent, unknown ids are dropped.
    ///
    /// Returns the files this block referenced before and no longer does.
    /// Whether they can be released depends on the other blocks, so that
    /// is left to the caller.
    pub fn block_submit<S>(
        &mut self,
        submission: &ValidatedSubmission,
        storage: &mut S,
    ) -> Result<Vec<FileId>, StorageError>
    where
        S: AssetStorage + ?Sized,
    {
        let mut kept = Vec::new();
        for fid in submission.file_ids() {
            match storage.make_permanent(fid) {
                Ok(()) => kept.push(fid),
                Err(StorageError::NotFound(fid)) => {
                    warn!(file = %fid, "Dropping reference to missing file");
                }
                Err(e) => return Err(e),
            }
        }

        let mut configuration = submission
            .apply_to(&self.configuration)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let replaced = self
            .configuration
            .cad_render_file
            .iter()
            .copied()
            .filter(|fid| !kept.contains(fid))
            .collect();
        configuration.cad_render_file = kept;
        self.configuration = configuration;
        Ok(replaced)
    }

    /// Produce the settings object of one rendered instance.
    ///
    /// `token` must be unique among the instances rendered by the caller.
    pub fn build<S>(&self, storage: &S, token: u64) -> RenderedBlock
    where
        S: AssetStorage + ?Sized,
    {
        let cad_render_file = self.configuration.file().and_then(|fid| {
            let url = storage.public_url(fid);
            if url.is_none() {
                warn!(file = %fid, "Configured model file cannot be resolved");
            }
            url
        });

        let unique_id = instance_key(self.plugin_id(), token);
        debug!(unique_id = %unique_id, has_model = cad_render_file.is_some(), "Built block settings");

        RenderedBlock {
            unique_id,
            label: self
                .configuration
                .label_display
                .then(|| self.configuration.label.clone()),
            settings: ViewerSettings {
                cad_render_file,
                options: self.configuration.options.clone(),
            },
        }
    }
}
