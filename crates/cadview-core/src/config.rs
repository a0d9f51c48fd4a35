//! Block configuration schema
//!
//! Defaults are defined once in the `Default` impls below. Stored and
//! submitted configuration is always merged over them, so consumers can rely
//! on every key being present.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration overrides must be a JSON object")]
    NotAnObject,
    #[error("Invalid configuration value: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Identifier of a stored file, assigned by the storage collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Animation mode of the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationMode {
    #[default]
    None,
    Rotate,
    RotateOnHover,
}

impl AnimationMode {
    pub const ALL: [AnimationMode; 3] = [Self::None, Self::Rotate, Self::RotateOnHover];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Rotate => "rotate",
            Self::RotateOnHover => "rotate_on_hover",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Rotate => "Rotate",
            Self::RotateOnHover => "Rotate on Hover",
        }
    }
}

/// Camera projection type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraType {
    #[default]
    Perspective,
    Orthographic,
}

impl CameraType {
    pub const ALL: [CameraType; 2] = [Self::Perspective, Self::Orthographic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Perspective => "perspective",
            Self::Orthographic => "orthographic",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Perspective => "Perspective",
            Self::Orthographic => "Orthographic",
        }
    }
}

/// Material applied to every mesh of the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialMode {
    /// Keep the base colour embedded in the asset
    #[default]
    Default,
    /// Override every mesh with `solid_color`
    SolidColor,
}

impl MaterialMode {
    pub const ALL: [MaterialMode; 2] = [Self::Default, Self::SolidColor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::SolidColor => "solid_color",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::SolidColor => "Solid Color",
        }
    }
}

/// Presentation options consumed by the viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerOptions {
    pub animation: AnimationMode,
    pub camera_type: CameraType,
    pub camera_zoom: f32,
    /// Explicit width, blank to use the container width
    pub width: String,
    /// Explicit height, blank to use the container height
    pub height: String,
    /// Clear colour like `0xffffff`, blank for a transparent background
    pub background_color: String,
    pub material: MaterialMode,
    pub solid_color: String,
    pub transparency: bool,
    pub opacity: f32,
    pub wireframe: bool,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            animation: AnimationMode::None,
            camera_type: CameraType::Perspective,
            camera_zoom: 1.0,
            width: String::new(),
            height: String::new(),
            background_color: String::new(),
            material: MaterialMode::Default,
            solid_color: "#ffffff".to_string(),
            transparency: false,
            opacity: 1.0,
            wireframe: false,
        }
    }
}

/// Persisted configuration of one placed block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    /// Administrative title of the placed block
    pub label: String,
    /// Whether the title is rendered above the viewer
    pub label_display: bool,
    /// Uploaded model reference
    pub cad_render_file: Vec<FileId>,
    #[serde(flatten)]
    pub options: ViewerOptions,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            label: "CAD Render block".to_string(),
            label_display: true,
            cad_render_file: Vec::new(),
            options: ViewerOptions::default(),
        }
    }
}

impl BlockConfig {
    /// Every key of the serialized configuration
    pub const KEYS: [&'static str; 14] = [
        "label",
        "label_display",
        "cad_render_file",
        "animation",
        "camera_type",
        "camera_zoom",
        "width",
        "height",
        "background_color",
        "material",
        "solid_color",
        "transparency",
        "opacity",
        "wireframe",
    ];

    /// Merge administrator overrides over the defaults.
    ///
    /// Missing and `null` keys take their default value, unknown keys are
    /// dropped.
    pub fn merged(overrides: serde_json::Value) -> Result<Self, ConfigError> {
        let serde_json::Value::Object(mut map) = overrides else {
            return Err(ConfigError::NotAnObject);
        };
        map.retain(|_, value| !value.is_null());
        Ok(serde_json::from_value(serde_json::Value::Object(map))?)
    }

    /// The first referenced file, if any
    pub fn file(&self) -> Option<FileId> {
        self.cad_render_file.first().copied()
    }
}
