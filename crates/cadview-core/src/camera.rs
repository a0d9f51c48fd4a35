//! Render dimensions and camera projection parameters

use crate::config::CameraType;

/// Vertical field of view of the perspective camera, in degrees
pub const PERSPECTIVE_FOV_DEGREES: f32 = 45.0;
pub const NEAR_PLANE: f32 = 0.1;
pub const FAR_PLANE: f32 = 1000.0;
/// Pixels per world unit of the full orthographic frustum
pub const ORTHOGRAPHIC_PIXELS_PER_UNIT: f32 = 1000.0;
/// Camera position used until a model has been loaded
pub const INITIAL_CAMERA_POSITION: [f32; 3] = [2.0, 15.0, 2.0];

/// Pixel size of a viewer surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimensions {
    pub width: f32,
    pub height: f32,
}

impl Dimensions {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Resolve configured dimensions against the container box.
    ///
    /// Each axis uses the configured value when it is a positive number
    /// (an optional `px` suffix is accepted) and the container size
    /// otherwise. Both axes are kept at least one pixel wide.
    pub fn resolve(width: &str, height: &str, container: (f32, f32)) -> Self {
        let width = parse_length(width).unwrap_or(container.0);
        let height = parse_length(height).unwrap_or(container.1);
        Self {
            width: width.max(1.0),
            height: height.max(1.0),
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width / self.height
    }
}

fn parse_length(value: &str) -> Option<f32> {
    let value = value.trim();
    let value = value.strip_suffix("px").unwrap_or(value).trim_end();
    value
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Bounds of an orthographic view volume, in world units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthographicFrustum {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl OrthographicFrustum {
    /// Frustum of half the pixel dimensions, scaled to world units
    pub fn from_dimensions(dims: Dimensions) -> Self {
        let half_width = dims.width / (2.0 * ORTHOGRAPHIC_PIXELS_PER_UNIT);
        let half_height = dims.height / (2.0 * ORTHOGRAPHIC_PIXELS_PER_UNIT);
        Self {
            left: -half_width,
            right: half_width,
            top: half_height,
            bottom: -half_height,
        }
    }

    /// The frustum after applying a camera zoom factor
    pub fn zoomed(&self, zoom: f32) -> Self {
        let zoom = effective_zoom(zoom);
        Self {
            left: self.left / zoom,
            right: self.right / zoom,
            top: self.top / zoom,
            bottom: self.bottom / zoom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }
}

/// Zoom factors that are not positive and finite fall back to 1
pub fn effective_zoom(zoom: f32) -> f32 {
    if zoom.is_finite() && zoom > 0.0 {
        zoom
    } else {
        1.0
    }
}

/// Projection parameters of a viewer camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraProjection {
    Perspective {
        /// Vertical field of view in radians, zoom already applied
        fov_y: f32,
        aspect: f32,
        zoom: f32,
    },
    Orthographic {
        /// Frustum before zoom
        frustum: OrthographicFrustum,
        zoom: f32,
    },
}

impl CameraProjection {
    pub fn new(camera_type: CameraType, zoom: f32, dims: Dimensions) -> Self {
        let zoom = effective_zoom(zoom);
        match camera_type {
            CameraType::Perspective => Self::Perspective {
                fov_y: zoomed_fov(PERSPECTIVE_FOV_DEGREES.to_radians(), zoom),
                aspect: dims.aspect(),
                zoom,
            },
            CameraType::Orthographic => Self::Orthographic {
                frustum: OrthographicFrustum::from_dimensions(dims),
                zoom,
            },
        }
    }

    /// Recompute the dimension dependent parameters
    pub fn resize(&mut self, dims: Dimensions) {
        match self {
            Self::Perspective { aspect, .. } => *aspect = dims.aspect(),
            Self::Orthographic { frustum, .. } => *frustum = OrthographicFrustum::from_dimensions(dims),
        }
    }

    /// Orthographic frustum with zoom applied
    pub fn zoomed_frustum(&self) -> Option<OrthographicFrustum> {
        match self {
            Self::Orthographic { frustum, zoom } => Some(frustum.zoomed(*zoom)),
            Self::Perspective { .. } => None,
        }
    }
}

/// Narrow a vertical field of view by a zoom factor
pub fn zoomed_fov(fov_y: f32, zoom: f32) -> f32 {
    2.0 * ((fov_y * 0.5).tan() / effective_zoom(zoom)).atan()
}

/// Camera position that frames a model with the given bounding diagonal
pub fn fit_position(diagonal: f32) -> [f32; 3] {
    [diagonal * 0.7, diagonal * 0.5, diagonal * 0.7]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_orthographic_frustum_800x600() {
        let frustum = OrthographicFrustum::from_dimensions(Dimensions::new(800.0, 600.0));
        assert!(approx(frustum.left, -0.4));
        assert!(approx(frustum.right, 0.4));
        assert!(approx(frustum.top, 0.3));
        assert!(approx(frustum.bottom, -0.3));
    }

    #[test]
    fn test_orthographic_zoom() {
        let projection = CameraProjection::new(CameraType::Orthographic, 2.0, Dimensions::new(800.0, 600.0));
        let frustum = projection.zoomed_frustum().unwrap();
        assert!(approx(frustum.right, 0.2));
        assert!(approx(frustum.height(), 0.3));
    }

    #[test]
    fn test_perspective_zoom_narrows_fov() {
        let base = PERSPECTIVE_FOV_DEGREES.to_radians();
        assert!(approx(zoomed_fov(base, 1.0), base));
        assert!(zoomed_fov(base, 2.0) < base);
        // Invalid zoom values behave like no zoom
        assert!(approx(zoomed_fov(base, 0.0), base));
        assert!(approx(zoomed_fov(base, f32::NAN), base));
    }

    #[test]
    fn test_resolve_dimensions() {
        let container = (1024.0, 480.0);
        assert_eq!(Dimensions::resolve("", "", container), Dimensions::new(1024.0, 480.0));
        assert_eq!(Dimensions::resolve("800", " 600px", container), Dimensions::new(800.0, 600.0));
        assert_eq!(Dimensions::resolve("auto", "300", container), Dimensions::new(1024.0, 300.0));
        assert_eq!(Dimensions::resolve("-5", "0", (0.0, 0.0)), Dimensions::new(1.0, 1.0));
    }

    #[test]
    fn test_resize_updates_projection() {
        let mut projection = CameraProjection::new(CameraType::Perspective, 1.0, Dimensions::new(800.0, 600.0));
        projection.resize(Dimensions::new(600.0, 600.0));
        match projection {
            CameraProjection::Perspective { aspect, .. } => assert!(approx(aspect, 1.0)),
            _ => panic!("expected perspective"),
        }

        let mut projection = CameraProjection::new(CameraType::Orthographic, 1.0, Dimensions::new(800.0, 600.0));
        projection.resize(Dimensions::new(400.0, 200.0));
        let frustum = projection.zoomed_frustum().unwrap();
        assert!(approx(frustum.right, 0.2));
        assert!(approx(frustum.top, 0.1));
    }

    #[test]
    fn test_fit_position() {
        assert_eq!(fit_position(10.0), [7.0, 5.0, 7.0]);
    }
}
