//! Viewer instances: one window, camera, light and model pivot per block

use bevy::camera::visibility::RenderLayers;
use bevy::camera::{RenderTarget, ScalingMode};
use bevy::gltf::Gltf;
use bevy::prelude::*;
use bevy::window::{
    CompositeAlphaMode, CursorEntered, CursorLeft, RequestRedraw, WindowRef, WindowResolution,
};
use cadview_core::camera::{CameraProjection, FAR_PLANE, INITIAL_CAMERA_POSITION, NEAR_PLANE};
use cadview_core::{AnimationController, ViewerSettings};
use std::sync::atomic::Ordering;

use crate::app::ResizeSignal;
use crate::dom::{self, DiscoveredBlock};
use crate::fetch::{self, FinishedDownloads};

/// Directional light strength, in lux
const DIRECTIONAL_ILLUMINANCE: f32 = 4000.0;
const LIGHT_POSITION: Vec3 = Vec3::new(5.0, 5.0, 5.0);

pub struct InstancePlugin;

impl Plugin for InstancePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<InstanceCounter>()
            .add_message::<ContainerResized>()
            .add_systems(Update, (
                attach_new_blocks,
                track_hover,
                measure_containers,
                apply_resizes,
                animate,
            ).chain());
    }
}

/// Number of viewers created so far
#[derive(Resource, Default)]
pub struct InstanceCounter(pub usize);

/// Loading progress of an instance's model
pub enum ModelState {
    /// Download and decoding in progress
    Fetching,
    Loading(Handle<Gltf>),
    Ready,
    Failed,
}

/// One rendered block, stored on its window entity
#[derive(Component)]
pub struct ViewerInstance {
    pub unique_id: String,
    pub canvas_id: String,
    pub settings: ViewerSettings,
    pub projection: CameraProjection,
    pub controller: AnimationController,
    /// Pointer currently over the canvas
    pub pointer_inside: bool,
    pub camera: Entity,
    pub pivot: Entity,
    pub layer: RenderLayers,
    pub model: ModelState,
}

impl ViewerInstance {
    pub fn is_ready(&self) -> bool {
        matches!(self.model, ModelState::Ready)
    }
}

/// Marker for viewer cameras
#[derive(Component)]
pub struct ViewerCamera;

/// Rotating parent of a loaded model
#[derive(Component)]
pub struct ModelPivot;

/// Bevy projection for a viewer projection
pub fn bevy_projection(projection: &CameraProjection) -> Projection {
    match projection {
        CameraProjection::Perspective { fov_y, aspect, .. } => Projection::Perspective(PerspectiveProjection {
            fov: *fov_y,
            aspect_ratio: *aspect,
            near: NEAR_PLANE,
            far: FAR_PLANE,
            ..default()
        }),
        CameraProjection::Orthographic { frustum, zoom } => {
            let zoomed = frustum.zoomed(*zoom);
            Projection::Orthographic(OrthographicProjection {
                near: NEAR_PLANE,
                far: FAR_PLANE,
                scaling_mode: ScalingMode::Fixed {
                    width: zoomed.width(),
                    height: zoomed.height(),
                },
                ..OrthographicProjection::default_3d()
            })
        }
    }
}

/// Create viewers for wrappers that appeared since the last scan
fn attach_new_blocks(
    mut commands: Commands,
    mut counter: ResMut<InstanceCounter>,
    downloads: Res<FinishedDownloads>,
    mut redraw: MessageWriter<RequestRedraw>,
) {
    if !crate::take_rescan_request() {
        return;
    }

    let blocks = dom::discover_blocks(&mut counter.0);
    for block in blocks {
        spawn_instance(&mut commands, &downloads, block);
    }
    redraw.write(RequestRedraw);
}

fn spawn_instance(commands: &mut Commands, downloads: &FinishedDownloads, block: DiscoveredBlock) {
    let DiscoveredBlock {
        index,
        unique_id,
        canvas_id,
        container_size,
        settings,
    } = block;

    let Some(url) = settings.asset_url().map(dom::absolute_url) else {
        return;
    };

    let dims = settings.dimensions(container_size);
    let projection = settings.projection(dims);
    let background = settings.background_color();
    let transparent = background.is_none();

    // Layer 0 stays with unlayered entities
    let layer = RenderLayers::layer(index + 1);

    let window = commands
        .spawn(Window {
            title: unique_id.clone(),
            canvas: Some(format!("#{canvas_id}")),
            resolution: WindowResolution::new(dims.width.round() as u32, dims.height.round() as u32),
            fit_canvas_to_parent: false,
            prevent_default_event_handling: false,
            transparent,
            composite_alpha_mode: if transparent {
                CompositeAlphaMode::PreMultiplied
            } else {
                CompositeAlphaMode::Auto
            },
            ..default()
        })
        .id();

    let clear_color = match background {
        Some(rgb) => {
            let [r, g, b] = rgb.to_srgb_f32();
            ClearColorConfig::Custom(Color::srgb(r, g, b))
        }
        None => ClearColorConfig::Custom(Color::NONE),
    };

    let camera = commands
        .spawn((
            Camera3d::default(),
            Camera {
                target: RenderTarget::Window(WindowRef::Entity(window)),
                clear_color,
                ..default()
            },
            bevy_projection(&projection),
            Msaa::Sample4,
            Transform::from_translation(Vec3::from(INITIAL_CAMERA_POSITION)).looking_at(Vec3::ZERO, Vec3::Y),
            layer.clone(),
            ViewerCamera,
        ))
        .id();

    commands.spawn((
        DirectionalLight {
            illuminance: DIRECTIONAL_ILLUMINANCE,
            shadows_enabled: false,
            ..default()
        },
        Transform::from_translation(LIGHT_POSITION).looking_at(Vec3::ZERO, Vec3::Y),
        layer.clone(),
    ));

    let pivot = commands
        .spawn((
            Transform::default(),
            Visibility::default(),
            layer.clone(),
            ModelPivot,
        ))
        .id();

    tracing::info!("Loading model {} for block {}", url, unique_id);
    fetch::request_model(window, url, downloads);

    commands.entity(window).insert(ViewerInstance {
        unique_id,
        canvas_id,
        controller: AnimationController::new(settings.options.animation),
        settings,
        projection,
        pointer_inside: false,
        camera,
        pivot,
        layer,
        model: ModelState::Fetching,
    });
}

/// Start and stop hover rotation as the pointer crosses a canvas
fn track_hover(
    mut entered: MessageReader<CursorEntered>,
    mut left: MessageReader<CursorLeft>,
    mut instances: Query<&mut ViewerInstance>,
    mut redraw: MessageWriter<RequestRedraw>,
) {
    for event in entered.read() {
        if let Ok(mut instance) = instances.get_mut(event.window) {
            instance.pointer_inside = true;
            if instance.is_ready() && instance.controller.pointer_entered() {
                redraw.write(RequestRedraw);
            }
        }
    }

    for event in left.read() {
        if let Ok(mut instance) = instances.get_mut(event.window) {
            instance.pointer_inside = false;
            if instance.is_ready() {
                instance.controller.pointer_left();
            }
        }
    }
}

/// New container size of a viewer's canvas
#[derive(Message, Debug, Clone, Copy)]
pub struct ContainerResized {
    pub window: Entity,
    pub size: (f32, f32),
}

/// Re-measure every container after the browser window changed size
fn measure_containers(
    signal: Res<ResizeSignal>,
    instances: Query<(Entity, &ViewerInstance)>,
    mut resized: MessageWriter<ContainerResized>,
) {
    if !signal.0.swap(false, Ordering::AcqRel) {
        return;
    }

    for (window, instance) in &instances {
        if let Some(size) = dom::container_size(&instance.canvas_id) {
            resized.write(ContainerResized { window, size });
        }
    }
}

/// Fit window and camera to the new container sizes. The model keeps its
/// transform.
fn apply_resizes(
    mut resized: MessageReader<ContainerResized>,
    mut instances: Query<(&mut ViewerInstance, &mut Window)>,
    mut projections: Query<&mut Projection, With<ViewerCamera>>,
    mut redraw: MessageWriter<RequestRedraw>,
) {
    let mut changed = false;
    for event in resized.read() {
        let Ok((mut instance, mut window)) = instances.get_mut(event.window) else {
            continue;
        };
        let dims = instance.settings.dimensions(event.size);
        window.resolution.set(dims.width, dims.height);

        instance.projection.resize(dims);
        if let Ok(mut projection) = projections.get_mut(instance.camera) {
            *projection = bevy_projection(&instance.projection);
        }
        changed = true;
    }

    if changed {
        redraw.write(RequestRedraw);
    }
}

/// Advance running rotation loops by one step
fn animate(
    mut instances: Query<&mut ViewerInstance>,
    mut pivots: Query<&mut Transform, With<ModelPivot>>,
    mut redraw: MessageWriter<RequestRedraw>,
) {
    let mut animating = false;
    for mut instance in &mut instances {
        let Some(angle) = instance.controller.tick() else {
            continue;
        };
        if let Ok(mut transform) = pivots.get_mut(instance.pivot) {
            transform.rotation = Quat::from_rotation_y(angle);
        }
        animating = true;
    }

    if animating {
        redraw.write(RequestRedraw);
    }
}
