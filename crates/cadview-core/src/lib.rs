//! CAD Render Core - Block configuration, admin form and viewer math
//!
//! This crate provides the foundational types shared by the server and the
//! WebAssembly viewer:
//! - Block configuration schema with defaults and override merging
//! - Admin form description and form-layer validation
//! - The block plugin itself (render-time settings, form submission)
//! - Camera, animation and geometry helpers used by the viewer

pub mod animation;
pub mod block;
pub mod camera;
pub mod color;
pub mod config;
pub mod form;
pub mod geometry;
pub mod settings;

pub use animation::{AnimationController, RotationLoop, ROTATION_STEP};
pub use block::{AssetStorage, BlockDefinition, CadRenderBlock, PluginRegistry, RenderedBlock, StorageError};
pub use camera::{CameraProjection, Dimensions, OrthographicFrustum};
pub use color::Rgb;
pub use config::{AnimationMode, BlockConfig, CameraType, ConfigError, FileId, MaterialMode, ViewerOptions};
pub use form::{Form, FormErrors, FormSubmission, ValidatedSubmission};
pub use geometry::{feature_edges, Bounds};
pub use settings::ViewerSettings;
