//! glTF model placement
//!
//! Once an instance's glTF asset has finished loading, its node tree is
//! spawned under a recentred model entity below the instance pivot. Every
//! mesh gets a fresh PBR material and, when wireframe is enabled, an edge
//! overlay drawn as a retained gizmo on top of the depth buffer.

use bevy::asset::{LoadState, RecursiveDependencyLoadState};
use bevy::camera::visibility::RenderLayers;
use bevy::gltf::{Gltf, GltfMesh, GltfNode};
use bevy::mesh::{PrimitiveTopology, VertexAttributeValues};
use bevy::prelude::*;
use bevy::render::render_resource::Face;
use bevy::window::RequestRedraw;
use cadview_core::camera::fit_position;
use cadview_core::settings::{MaterialSpec, OverlaySpec};
use cadview_core::{feature_edges, Bounds, ViewerSettings};
use std::collections::HashSet;

use crate::instance::{ModelState, ViewerCamera, ViewerInstance};

/// Draw edges over the surface they belong to
const OVERLAY_DEPTH_BIAS: f32 = -1.0;
const OVERLAY_LINE_WIDTH: f32 = 1.0;

pub struct ModelPlugin;

impl Plugin for ModelPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, place_loaded_models);
    }
}

/// Positions of a mesh, if it stores them as three floats
fn mesh_positions(mesh: &Mesh) -> Option<&[[f32; 3]]> {
    match mesh.attribute(Mesh::ATTRIBUTE_POSITION)? {
        VertexAttributeValues::Float32x3(positions) => Some(positions),
        _ => None,
    }
}

fn mesh_indices(mesh: &Mesh) -> Option<Vec<u32>> {
    mesh.indices()
        .map(|indices| indices.iter().map(|i| i as u32).collect())
}

/// Feature edges of a triangle mesh, in mesh space
pub fn mesh_edges(mesh: &Mesh, threshold_degrees: f32) -> Vec<[[f32; 3]; 2]> {
    if mesh.primitive_topology() != PrimitiveTopology::TriangleList {
        return Vec::new();
    }
    let Some(positions) = mesh_positions(mesh) else {
        return Vec::new();
    };
    let indices = mesh_indices(mesh);
    feature_edges(positions, indices.as_deref(), threshold_degrees)
}

/// Material replacing a mesh's original one
pub fn pbr_material(spec: &MaterialSpec) -> StandardMaterial {
    let [r, g, b, a] = spec.base_color;
    StandardMaterial {
        base_color: Color::srgba(r, g, b, a),
        metallic: spec.metallic,
        perceptual_roughness: spec.roughness,
        alpha_mode: if spec.blend {
            AlphaMode::Blend
        } else {
            AlphaMode::Opaque
        },
        cull_mode: Some(Face::Back),
        double_sided: false,
        ..default()
    }
}

fn overlay_asset(edges: &[[[f32; 3]; 2]], overlay: &OverlaySpec) -> GizmoAsset {
    let [r, g, b, a] = overlay.color;
    let color = Color::srgba(r, g, b, a);
    let mut asset = GizmoAsset::new();
    for [start, end] in edges {
        asset.line(Vec3::from(*start), Vec3::from(*end), color);
    }
    asset
}

/// Nodes that are nobody's child
fn root_nodes<'a>(gltf: &'a Gltf, nodes: &Assets<GltfNode>) -> Vec<&'a Handle<GltfNode>> {
    let children: HashSet<AssetId<GltfNode>> = gltf
        .nodes
        .iter()
        .filter_map(|handle| nodes.get(handle))
        .flat_map(|node| node.children.iter().map(Handle::id))
        .collect();

    gltf.nodes
        .iter()
        .filter(|handle| !children.contains(&handle.id()))
        .collect()
}

/// Borrowed glTF asset stores
#[derive(Clone, Copy)]
struct GltfAssets<'a> {
    nodes: &'a Assets<GltfNode>,
    meshes: &'a Assets<GltfMesh>,
}

/// Grow `bounds` by the positions of `mesh` placed with `transform`
fn extend_mesh_bounds(mesh: &Mesh, transform: &Transform, bounds: &mut Option<Bounds>) {
    let Some(positions) = mesh_positions(mesh) else {
        return;
    };
    for position in positions {
        let point = transform.transform_point(Vec3::from(*position)).to_array();
        match bounds {
            Some(bounds) => bounds.extend(point),
            None => *bounds = Bounds::from_points(std::iter::once(point)),
        }
    }
}

/// Model-space bounds of a node subtree
fn extend_bounds(
    node: &GltfNode,
    parent: Transform,
    gltf: &GltfAssets,
    meshes: &Assets<Mesh>,
    bounds: &mut Option<Bounds>,
) {
    let transform = parent.mul_transform(node.transform);

    let primitives = node
        .mesh
        .as_ref()
        .and_then(|handle| gltf.meshes.get(handle))
        .map(|mesh| mesh.primitives.as_slice())
        .unwrap_or_default();
    for primitive in primitives {
        if let Some(mesh) = meshes.get(&primitive.mesh) {
            extend_mesh_bounds(mesh, &transform, bounds);
        }
    }

    for child in &node.children {
        if let Some(child) = gltf.nodes.get(child) {
            extend_bounds(child, transform, gltf, meshes, bounds);
        }
    }
}

/// Spawns one model's entity tree
struct ModelBuilder<'a, 'w, 's> {
    commands: &'a mut Commands<'w, 's>,
    gltf: GltfAssets<'a>,
    meshes: &'a Assets<Mesh>,
    materials: &'a mut Assets<StandardMaterial>,
    gizmos: &'a mut Assets<GizmoAsset>,
    settings: &'a ViewerSettings,
    layer: RenderLayers,
    mesh_count: usize,
}

impl ModelBuilder<'_, '_, '_> {
    fn spawn_node(&mut self, node: &GltfNode, parent: Entity) {
        let entity = self
            .commands
            .spawn((
                node.transform,
                Visibility::default(),
                self.layer.clone(),
                Name::new(node.name.clone()),
                ChildOf(parent),
            ))
            .id();

        let GltfAssets { nodes, meshes } = self.gltf;
        let primitives = node
            .mesh
            .as_ref()
            .and_then(|handle| meshes.get(handle))
            .map(|mesh| mesh.primitives.as_slice())
            .unwrap_or_default();
        for primitive in primitives {
            self.spawn_primitive(&primitive.mesh, primitive.material.as_ref(), entity);
        }

        for child in &node.children {
            if let Some(child) = nodes.get(child) {
                self.spawn_node(child, entity);
            }
        }
    }

    fn spawn_primitive(
        &mut self,
        mesh: &Handle<Mesh>,
        original: Option<&Handle<StandardMaterial>>,
        parent: Entity,
    ) {
        let original_color = original
            .and_then(|handle| self.materials.get(handle))
            .map(|material| {
                let color = material.base_color.to_srgba();
                [color.red, color.green, color.blue]
            })
            .unwrap_or([1.0, 1.0, 1.0]);
        let decoration = self.settings.decorate(original_color);

        let material = self.materials.add(pbr_material(&decoration.material));
        let entity = self
            .commands
            .spawn((
                Mesh3d(mesh.clone()),
                MeshMaterial3d(material),
                Transform::IDENTITY,
                self.layer.clone(),
                ChildOf(parent),
            ))
            .id();
        self.mesh_count += 1;

        let (Some(overlay), Some(mesh)) = (decoration.overlay, self.meshes.get(mesh)) else {
            return;
        };
        let edges = mesh_edges(mesh, overlay.threshold_degrees);
        let handle = self.gizmos.add(overlay_asset(&edges, &overlay));
        self.commands.spawn((
            Gizmo {
                handle,
                line_config: GizmoLineConfig {
                    width: OVERLAY_LINE_WIDTH,
                    ..default()
                },
                depth_bias: OVERLAY_DEPTH_BIAS,
            },
            Transform::IDENTITY,
            self.layer.clone(),
            ChildOf(entity),
        ));
    }
}

/// Recompute smooth normals once per shared mesh
fn recompute_normals(
    gltf: &Gltf,
    gltf_meshes: &Assets<GltfMesh>,
    meshes: &mut Assets<Mesh>,
    done: &mut HashSet<AssetId<Mesh>>,
) {
    for handle in &gltf.meshes {
        let Some(gltf_mesh) = gltf_meshes.get(handle) else {
            continue;
        };
        for primitive in &gltf_mesh.primitives {
            if !done.insert(primitive.mesh.id()) {
                continue;
            }
            if let Some(mesh) = meshes.get_mut(&primitive.mesh) {
                let triangles = mesh.primitive_topology() == PrimitiveTopology::TriangleList;
                if triangles && mesh_positions(mesh).is_some() {
                    mesh.compute_normals();
                }
            }
        }
    }
}

/// Place models whose assets finished loading
#[allow(clippy::too_many_arguments)]
fn place_loaded_models(
    mut commands: Commands,
    asset_server: Res<AssetServer>,
    gltfs: Res<Assets<Gltf>>,
    gltf_nodes: Res<Assets<GltfNode>>,
    gltf_meshes: Res<Assets<GltfMesh>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    mut gizmos: ResMut<Assets<GizmoAsset>>,
    mut instances: Query<(&mut ViewerInstance, &Window)>,
    mut cameras: Query<&mut Transform, With<ViewerCamera>>,
    mut normalized: Local<HashSet<AssetId<Mesh>>>,
    mut redraw: MessageWriter<RequestRedraw>,
) {
    for (mut instance, window) in &mut instances {
        let ModelState::Loading(handle) = &instance.model else {
            continue;
        };
        let id = handle.id();

        let failed = matches!(asset_server.get_load_state(id), Some(LoadState::Failed(_)))
            || matches!(
                asset_server.get_recursive_dependency_load_state(id),
                Some(RecursiveDependencyLoadState::Failed(_))
            );
        if failed {
            tracing::error!("Failed to load model for block {}", instance.unique_id);
            instance.model = ModelState::Failed;
            continue;
        }
        if !asset_server.is_loaded_with_dependencies(id) {
            continue;
        }
        let Some(gltf) = gltfs.get(id) else {
            continue;
        };

        recompute_normals(gltf, &gltf_meshes, &mut meshes, &mut normalized);

        let assets = GltfAssets {
            nodes: &gltf_nodes,
            meshes: &gltf_meshes,
        };
        let roots: Vec<&GltfNode> = root_nodes(gltf, &gltf_nodes)
            .into_iter()
            .filter_map(|handle| gltf_nodes.get(handle))
            .collect();

        let mut bounds = None;
        for root in &roots {
            extend_bounds(root, Transform::IDENTITY, &assets, &meshes, &mut bounds);
        }
        let center = bounds.map_or(Vec3::ZERO, |b| Vec3::from(b.center()));

        // Recentre under the pivot so rotation happens around the model centre
        let model = commands
            .spawn((
                Transform::from_translation(-center),
                Visibility::default(),
                instance.layer.clone(),
                ChildOf(instance.pivot),
            ))
            .id();

        let mut builder = ModelBuilder {
            commands: &mut commands,
            gltf: assets,
            meshes: &meshes,
            materials: &mut materials,
            gizmos: &mut gizmos,
            settings: &instance.settings,
            layer: instance.layer.clone(),
            mesh_count: 0,
        };
        for root in &roots {
            builder.spawn_node(root, model);
        }
        let mesh_count = builder.mesh_count;

        match bounds.map(|b| b.diagonal()).filter(|d| *d > 0.0) {
            Some(diagonal) => {
                if let Ok(mut camera) = cameras.get_mut(instance.camera) {
                    *camera = Transform::from_translation(Vec3::from(fit_position(diagonal)))
                        .looking_at(Vec3::ZERO, Vec3::Y);
                }
            }
            None => tracing::warn!("Model for block {} has no geometry", instance.unique_id),
        }

        tracing::info!("Placed model for block {} ({} meshes)", instance.unique_id, mesh_count);

        let pointer_inside = instance.pointer_inside || window.cursor_position().is_some();
        instance.controller.attach(pointer_inside);
        instance.model = ModelState::Ready;
        redraw.write(RequestRedraw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::asset::RenderAssetUsages;
    use bevy::ecs::world::CommandQueue;
    use cadview_core::geometry::EDGE_THRESHOLD_DEGREES;
    use cadview_core::MaterialMode;

    /// Two cube primitives under one parent, the first with a red material
    fn build_primitives(settings: &ViewerSettings) -> (World, Assets<StandardMaterial>, Entity) {
        let mut world = World::new();
        let parent = world.spawn_empty().id();

        let nodes = Assets::<GltfNode>::default();
        let gltf_meshes = Assets::<GltfMesh>::default();
        let mut meshes = Assets::<Mesh>::default();
        let mut materials = Assets::<StandardMaterial>::default();
        let mut gizmos = Assets::<GizmoAsset>::default();
        let cube = meshes.add(Cuboid::new(1.0, 1.0, 1.0));
        let red = materials.add(StandardMaterial::from(Color::srgb(1.0, 0.0, 0.0)));

        let mut queue = CommandQueue::default();
        {
            let mut commands = Commands::new(&mut queue, &world);
            let mut builder = ModelBuilder {
                commands: &mut commands,
                gltf: GltfAssets {
                    nodes: &nodes,
                    meshes: &gltf_meshes,
                },
                meshes: &meshes,
                materials: &mut materials,
                gizmos: &mut gizmos,
                settings,
                layer: RenderLayers::layer(1),
                mesh_count: 0,
            };
            builder.spawn_primitive(&cube, Some(&red), parent);
            builder.spawn_primitive(&cube, None, parent);
            assert_eq!(builder.mesh_count, 2);
        }
        queue.apply(&mut world);
        (world, materials, parent)
    }

    fn mesh_entities(world: &mut World) -> Vec<Entity> {
        let mut query = world.query_filtered::<Entity, With<Mesh3d>>();
        query.iter(world).collect()
    }

    /// Overlay children of every mesh entity
    fn overlays_per_mesh(world: &mut World) -> Vec<usize> {
        let meshes = mesh_entities(world);
        let mut query = world.query_filtered::<&ChildOf, With<Gizmo>>();
        let parents: Vec<Entity> = query.iter(world).map(ChildOf::parent).collect();
        meshes
            .iter()
            .map(|mesh| parents.iter().filter(|parent| *parent == mesh).count())
            .collect()
    }

    fn base_colors(world: &mut World, materials: &Assets<StandardMaterial>) -> Vec<Srgba> {
        let mut query = world.query::<&MeshMaterial3d<StandardMaterial>>();
        query
            .iter(world)
            .filter_map(|material| materials.get(&material.0))
            .map(|material| material.base_color.to_srgba())
            .collect()
    }

    #[test]
    fn test_wireframe_adds_one_overlay_per_mesh() {
        let mut settings = ViewerSettings::default();
        settings.options.wireframe = true;
        let (mut world, _, parent) = build_primitives(&settings);

        assert_eq!(overlays_per_mesh(&mut world), vec![1, 1]);
        for mesh in mesh_entities(&mut world) {
            assert_eq!(world.get::<ChildOf>(mesh).map(ChildOf::parent), Some(parent));
        }
    }

    #[test]
    fn test_no_overlays_without_wireframe() {
        let (mut world, _, _) = build_primitives(&ViewerSettings::default());
        assert_eq!(overlays_per_mesh(&mut world), vec![0, 0]);
        let mut query = world.query::<&Gizmo>();
        assert_eq!(query.iter(&world).count(), 0);
    }

    #[test]
    fn test_solid_color_replaces_materials() {
        let mut settings = ViewerSettings::default();
        settings.options.material = MaterialMode::SolidColor;
        settings.options.solid_color = "#00ff00".to_string();
        let (mut world, materials, _) = build_primitives(&settings);

        let colors = base_colors(&mut world, &materials);
        assert_eq!(colors.len(), 2);
        for color in colors {
            assert!(color.red.abs() < 1e-6);
            assert!((color.green - 1.0).abs() < 1e-6);
            assert!(color.blue.abs() < 1e-6);
        }
    }

    #[test]
    fn test_default_material_keeps_original_color() {
        let (mut world, materials, _) = build_primitives(&ViewerSettings::default());
        let mut colors = base_colors(&mut world, &materials);
        colors.sort_by(|a, b| a.green.total_cmp(&b.green));
        // Red original first, white fallback second
        assert!((colors[0].red - 1.0).abs() < 1e-6 && colors[0].green.abs() < 1e-6);
        assert!((colors[1].green - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cuboid_has_twelve_feature_edges() {
        let mesh = Mesh::from(Cuboid::new(1.0, 2.0, 3.0));
        assert_eq!(mesh_edges(&mesh, EDGE_THRESHOLD_DEGREES).len(), 12);
    }

    #[test]
    fn test_line_meshes_have_no_edges() {
        let mesh = Mesh::new(PrimitiveTopology::LineList, RenderAssetUsages::default())
            .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, vec![[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        assert!(mesh_edges(&mesh, EDGE_THRESHOLD_DEGREES).is_empty());
    }

    #[test]
    fn test_material_blending() {
        let opaque = pbr_material(&MaterialSpec {
            base_color: [1.0, 0.0, 0.0, 1.0],
            metallic: 0.2,
            roughness: 0.8,
            blend: false,
        });
        assert!(matches!(opaque.alpha_mode, AlphaMode::Opaque));
        assert_eq!(opaque.cull_mode, Some(Face::Back));
        assert_eq!(opaque.metallic, 0.2);
        assert_eq!(opaque.perceptual_roughness, 0.8);

        let blended = pbr_material(&MaterialSpec {
            base_color: [1.0, 1.0, 1.0, 0.5],
            metallic: 0.2,
            roughness: 0.8,
            blend: true,
        });
        assert!(matches!(blended.alpha_mode, AlphaMode::Blend));
        assert!((blended.base_color.alpha() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_bounds_follow_transform() {
        let mesh = Mesh::from(Cuboid::new(2.0, 2.0, 2.0));
        let mut bounds = None;
        extend_mesh_bounds(&mesh, &Transform::from_xyz(10.0, 0.0, 0.0), &mut bounds);
        extend_mesh_bounds(&mesh, &Transform::from_xyz(-10.0, 0.0, 0.0), &mut bounds);

        let bounds = bounds.unwrap();
        assert_eq!(bounds.center(), [0.0, 0.0, 0.0]);
        assert_eq!(bounds.size(), [22.0, 2.0, 2.0]);
    }
}
