//! Per-instance settings handed to the viewer

use serde::{Deserialize, Serialize};

use crate::camera::{CameraProjection, Dimensions};
use crate::color::Rgb;
use crate::config::{MaterialMode, ViewerOptions};
use crate::geometry::EDGE_THRESHOLD_DEGREES;

pub const MATERIAL_METALLIC: f32 = 0.2;
pub const MATERIAL_ROUGHNESS: f32 = 0.8;
pub const OVERLAY_COLOR: Rgb = Rgb::new(0x55, 0x55, 0x55);
pub const OVERLAY_ALPHA: f32 = 0.3;

/// Settings object emitted next to every rendered block.
///
/// Same shape as the block configuration, with the file reference replaced
/// by a public URL (`null` when there is nothing to render).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    pub cad_render_file: Option<String>,
    #[serde(flatten)]
    pub options: ViewerOptions,
}

/// Material applied to one mesh of the loaded model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialSpec {
    /// sRGB colour with alpha
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    /// Alpha blended instead of opaque
    pub blend: bool,
}

/// Edge overlay drawn over a mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlaySpec {
    pub color: [f32; 4],
    pub threshold_degrees: f32,
}

/// Everything the viewer applies to a single mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshDecoration {
    pub material: MaterialSpec,
    pub overlay: Option<OverlaySpec>,
}

impl ViewerSettings {
    /// URL of the model, `None` when blank or missing
    pub fn asset_url(&self) -> Option<&str> {
        self.cad_render_file
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Clear colour, `None` for a transparent background
    pub fn background_color(&self) -> Option<Rgb> {
        let value = self.options.background_color.trim();
        if value.is_empty() {
            return None;
        }
        let color = Rgb::parse_hex(value);
        if color.is_none() {
            tracing::warn!(value, "Ignoring unparsable background colour");
        }
        color
    }

    pub fn dimensions(&self, container: (f32, f32)) -> Dimensions {
        Dimensions::resolve(&self.options.width, &self.options.height, container)
    }

    pub fn projection(&self, dims: Dimensions) -> CameraProjection {
        CameraProjection::new(self.options.camera_type, self.options.camera_zoom, dims)
    }

    /// Decoration for a mesh whose original base colour is `original`
    /// (sRGB, alpha ignored).
    pub fn decorate(&self, original: [f32; 3]) -> MeshDecoration {
        let [r, g, b] = match self.options.material {
            MaterialMode::Default => original,
            MaterialMode::SolidColor => Rgb::parse_hex(&self.options.solid_color)
                .unwrap_or(Rgb::WHITE)
                .to_srgb_f32(),
        };
        let alpha = if self.options.transparency {
            self.options.opacity.clamp(0.0, 1.0)
        } else {
            1.0
        };

        let overlay = self.options.wireframe.then(|| {
            let [r, g, b] = OVERLAY_COLOR.to_srgb_f32();
            OverlaySpec {
                color: [r, g, b, OVERLAY_ALPHA],
                threshold_degrees: EDGE_THRESHOLD_DEGREES,
            }
        });

        MeshDecoration {
            material: MaterialSpec {
                base_color: [r, g, b, alpha],
                metallic: MATERIAL_METALLIC,
                roughness: MATERIAL_ROUGHNESS,
                blend: self.options.transparency,
            },
            overlay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: serde_json::Value) -> ViewerSettings {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_partial_settings_are_completed() {
        let parsed = settings(json!({"cad_render_file": "/files/a.glb", "animation": "rotate"}));
        assert_eq!(parsed.asset_url(), Some("/files/a.glb"));
        assert_eq!(parsed.options.opacity, 1.0);
        assert_eq!(parsed.options.solid_color, "#ffffff");
    }

    #[test]
    fn test_missing_asset() {
        assert_eq!(settings(json!({})).asset_url(), None);
        assert_eq!(settings(json!({"cad_render_file": null})).asset_url(), None);
        assert_eq!(settings(json!({"cad_render_file": "  "})).asset_url(), None);
    }

    #[test]
    fn test_solid_color_overrides_every_mesh() {
        let parsed = settings(json!({"material": "solid_color", "solid_color": "#ff0000"}));
        for original in [[0.1, 0.2, 0.3], [1.0, 1.0, 1.0], [0.0, 0.0, 0.0]] {
            let decoration = parsed.decorate(original);
            assert_eq!(decoration.material.base_color, [1.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn test_default_material_keeps_color() {
        let decoration = settings(json!({})).decorate([0.1, 0.2, 0.3]);
        assert_eq!(decoration.material.base_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(decoration.material.metallic, MATERIAL_METALLIC);
        assert_eq!(decoration.material.roughness, MATERIAL_ROUGHNESS);
        assert!(!decoration.material.blend);
    }

    #[test]
    fn test_opacity_needs_transparency() {
        let opaque = settings(json!({"opacity": 0.4}));
        assert_eq!(opaque.decorate([1.0; 3]).material.base_color[3], 1.0);

        let transparent = settings(json!({"opacity": 0.4, "transparency": true}));
        let material = transparent.decorate([1.0; 3]).material;
        assert!(material.blend);
        assert!((material.base_color[3] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_overlay_follows_wireframe_flag() {
        let meshes = [[0.5; 3], [0.2; 3], [0.9; 3]];

        let with = settings(json!({"wireframe": true}));
        assert!(meshes.iter().all(|m| with.decorate(*m).overlay.is_some()));

        let without = settings(json!({"wireframe": false}));
        assert!(meshes.iter().all(|m| without.decorate(*m).overlay.is_none()));
    }

    #[test]
    fn test_background_color() {
        assert_eq!(settings(json!({})).background_color(), None);
        assert_eq!(
            settings(json!({"background_color": "0x336699"})).background_color(),
            Some(Rgb::new(0x33, 0x66, 0x99))
        );
        assert_eq!(settings(json!({"background_color": "blue"})).background_color(), None);
    }
}
