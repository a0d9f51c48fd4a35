//! Model bounds and feature edge extraction for the wireframe overlay

use std::collections::BTreeMap;

/// Default crease angle for feature edges, in degrees
pub const EDGE_THRESHOLD_DEGREES: f32 = 30.0;

/// Positions closer than 1/PRECISION are treated as the same vertex
const VERTEX_PRECISION: f32 = 1e4;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    /// Bounds of a point cloud, `None` when it is empty
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = [f32; 3]>,
    {
        let mut points = points.into_iter();
        let first = points.next()?;
        let mut bounds = Self { min: first, max: first };
        for point in points {
            bounds.extend(point);
        }
        Some(bounds)
    }

    pub fn extend(&mut self, point: [f32; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(point[axis]);
            self.max[axis] = self.max[axis].max(point[axis]);
        }
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        let mut merged = *self;
        merged.extend(other.min);
        merged.extend(other.max);
        merged
    }

    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    pub fn size(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Length of the box diagonal
    pub fn diagonal(&self) -> f32 {
        let [x, y, z] = self.size();
        (x * x + y * y + z * z).sqrt()
    }
}

type VertexKey = [i64; 3];

struct HalfEdge {
    start: [f32; 3],
    end: [f32; 3],
    normal: [f32; 3],
}

/// Extract the edges worth drawing on top of a triangle mesh.
///
/// An edge is kept when it borders a single triangle or when the normals
/// of its two triangles differ by more than `threshold_degrees`. Vertices
/// are welded by position first, so split normals or UV seams do not
/// produce spurious edges. Degenerate triangles are skipped. Without
/// `indices` the positions are read as a plain triangle list.
pub fn feature_edges(
    positions: &[[f32; 3]],
    indices: Option<&[u32]>,
    threshold_degrees: f32,
) -> Vec<[[f32; 3]; 2]> {
    let threshold_dot = threshold_degrees.to_radians().cos();
    let sequential: Vec<u32>;
    let indices = match indices {
        Some(indices) => indices,
        None => {
            sequential = (0..positions.len() as u32).collect();
            &sequential
        }
    };

    let mut open: BTreeMap<(VertexKey, VertexKey), HalfEdge> = BTreeMap::new();
    let mut edges = Vec::new();

    for triangle in indices.chunks_exact(3) {
        let Some(corners) = triangle_corners(positions, triangle) else {
            continue;
        };
        let keys = corners.map(vertex_key);
        if keys[0] == keys[1] || keys[1] == keys[2] || keys[2] == keys[0] {
            continue;
        }
        let normal = triangle_normal(&corners);

        for j in 0..3 {
            let next = (j + 1) % 3;
            let key = (keys[j], keys[next]);
            let reverse = (keys[next], keys[j]);

            if let Some(other) = open.remove(&reverse) {
                if dot(normal, other.normal) <= threshold_dot {
                    edges.push([other.start, other.end]);
                }
            } else if !open.contains_key(&key) {
                open.insert(
                    key,
                    HalfEdge {
                        start: corners[j],
                        end: corners[next],
                        normal,
                    },
                );
            }
        }
    }

    edges.extend(open.into_values().map(|edge| [edge.start, edge.end]));
    edges
}

fn triangle_corners(positions: &[[f32; 3]], triangle: &[u32]) -> Option<[[f32; 3]; 3]> {
    Some([
        *positions.get(triangle[0] as usize)?,
        *positions.get(triangle[1] as usize)?,
        *positions.get(triangle[2] as usize)?,
    ])
}

fn vertex_key(p: [f32; 3]) -> VertexKey {
    p.map(|v| (v * VERTEX_PRECISION).round() as i64)
}

fn triangle_normal([a, b, c]: &[[f32; 3]; 3]) -> [f32; 3] {
    let cb = sub(*c, *b);
    let ab = sub(*a, *b);
    let n = [
        cb[1] * ab[2] - cb[2] * ab[1],
        cb[2] * ab[0] - cb[0] * ab[2],
        cb[0] * ab[1] - cb[1] * ab[0],
    ];
    let len = dot(n, n).sqrt();
    if len > 0.0 {
        n.map(|v| v / len)
    } else {
        n
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}
