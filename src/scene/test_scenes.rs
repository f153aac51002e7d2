//! Small scenes shared by the unit tests.

use crate::geometry::{Triangle, WorldPoint, WorldVector};

use super::{
    building::{SceneBuilder, SceneMesh},
    dump::SceneDump,
    faces::{FaceFlags, FaceIndex},
};

const TERRAIN_HALF_SIZE: i32 = 8;

fn terrain_height(x: i32, z: i32) -> f32 {
    0.5 + 0.5 * (x as f32 * 0.7).sin() * (z as f32 * 0.4).cos()
}

/// Heightfield over [-8, 8] x [-8, 8] with unit spacing, heights within [0, 1].
/// Every quad is split along its x = z diagonal, all faces have their front side up.
pub fn terrain_mesh() -> SceneMesh {
    let mut mesh = SceneMesh::default();
    let row = (2 * TERRAIN_HALF_SIZE + 1) as usize;
    let range = -TERRAIN_HALF_SIZE..=TERRAIN_HALF_SIZE;

    let vertices: Vec<_> = range
        .clone()
        .flat_map(|z| range.clone().map(move |x| (x, z)))
        .map(|(x, z)| mesh.push_vertex(WorldPoint::new(x as f32, terrain_height(x, z), z as f32)))
        .collect();

    for j in 0..row - 1 {
        for i in 0..row - 1 {
            let v00 = vertices[j * row + i];
            let v10 = vertices[j * row + i + 1];
            let v01 = vertices[(j + 1) * row + i];
            let v11 = vertices[(j + 1) * row + i + 1];
            mesh.push_face(Triangle::new(v00, v11, v10), FaceFlags::CULL_BOTH);
            mesh.push_face(Triangle::new(v00, v01, v11), FaceFlags::CULL_BOTH);
        }
    }

    mesh
}

/// Terrain in a grid of 4 unit cells with a two level hierarchy.
pub fn terrain<FI: FaceIndex>() -> SceneDump<FI> {
    SceneBuilder::builder()
        .leaf_size(WorldVector::repeat(4.0))
        .top_level(1)
        .max_leaf_faces(4)
        .build()
        .build(&terrain_mesh())
}

/// True if the horizontal position is close to an edge of some terrain face.
pub fn near_terrain_edge(x: f32, z: f32) -> bool {
    const EPSILON: f32 = 1e-3;
    let near_line = |v: f32| {
        let fraction = v - v.floor();
        fraction < EPSILON || fraction > 1.0 - EPSILON
    };
    near_line(x) || near_line(z) || ((x - x.floor()) - (z - z.floor())).abs() < EPSILON
}

/// Square [0, 4] x [0, 4] at z = 0 made of two faces, front side towards +z.
/// Face 0 is the lower right half (y < x).
pub fn single_quad_with_flags<FI: FaceIndex>(flags: FaceFlags) -> SceneDump<FI> {
    let mut mesh = SceneMesh::default();
    let v0 = mesh.push_vertex(WorldPoint::new(0.0, 0.0, 0.0));
    let v1 = mesh.push_vertex(WorldPoint::new(4.0, 0.0, 0.0));
    let v2 = mesh.push_vertex(WorldPoint::new(4.0, 4.0, 0.0));
    let v3 = mesh.push_vertex(WorldPoint::new(0.0, 4.0, 0.0));
    mesh.push_face(Triangle::new(v0, v1, v2), flags);
    mesh.push_face(Triangle::new(v0, v2, v3), flags);

    SceneBuilder::builder()
        .leaf_size(WorldVector::repeat(8.0))
        .build()
        .build(&mesh)
}

pub fn single_quad<FI: FaceIndex>() -> SceneDump<FI> {
    single_quad_with_flags(FaceFlags::CULL_BOTH)
}

/// Two horizontal triangles over [0, 4] x [0, 4] facing up, face 0 at y = 1
/// (two sided) and face 1 at y = 3 with the given flags. Both share one cell.
pub fn stacked_triangles_with_flags<FI: FaceIndex>(upper_flags: FaceFlags) -> SceneDump<FI> {
    let mut mesh = SceneMesh::default();
    for (height, flags) in [(1.0, FaceFlags::CULL_BOTH), (3.0, upper_flags)] {
        let a = mesh.push_vertex(WorldPoint::new(0.0, height, 0.0));
        let b = mesh.push_vertex(WorldPoint::new(0.0, height, 4.0));
        let c = mesh.push_vertex(WorldPoint::new(4.0, height, 0.0));
        mesh.push_face(Triangle::new(a, b, c), flags);
    }

    SceneBuilder::builder()
        .leaf_size(WorldVector::repeat(8.0))
        .build()
        .build(&mesh)
}

pub fn stacked_triangles<FI: FaceIndex>() -> SceneDump<FI> {
    stacked_triangles_with_flags(FaceFlags::CULL_BOTH)
}
