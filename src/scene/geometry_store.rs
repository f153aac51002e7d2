use std::ops::Range;

use index_vec::IndexVec;

use crate::geometry::{Triangle, WorldBox, WorldPoint, WorldVector};

use super::faces::{FaceIdx, FaceIndex, VertexIdx};

/// Triangle as three indices into the vertex table.
pub type Face = Triangle<VertexIdx>;

/// Cached per-face data used by the box and capsule queries.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceBound {
    /// Unit normal of the front side, zero for degenerate faces.
    pub normal: WorldVector,
    pub bounds: WorldBox,
}

impl FaceBound {
    pub fn new(triangle: &Triangle<WorldPoint>) -> FaceBound {
        FaceBound {
            normal: triangle.normal().try_normalize(0.0).unwrap_or_else(WorldVector::zeros),
            bounds: triangle.bounding_box(),
        }
    }
}

/// Vertices, faces and the face index slots referenced by BVH leaves.
#[derive(Clone, Debug)]
pub struct GeometryStore<FI: FaceIndex> {
    vertices: IndexVec<VertexIdx, WorldPoint>,
    faces: IndexVec<FaceIdx, Face>,
    face_bounds: IndexVec<FaceIdx, FaceBound>,
    face_indices: Vec<FI>,
}

impl<FI: FaceIndex> GeometryStore<FI> {
    /// Creates the store and computes the per-face bounds.
    /// All indices must be in range, this is checked by the callers.
    pub(crate) fn new(
        vertices: IndexVec<VertexIdx, WorldPoint>,
        faces: IndexVec<FaceIdx, Face>,
        face_indices: Vec<FI>,
    ) -> Self {
        debug_assert!(faces.iter().flat_map(|f| f.iter()).all(|v| v.index() < vertices.len()));
        debug_assert!(face_indices.iter().all(|fi| fi.face().index() < faces.len()));

        let face_bounds = faces
            .iter()
            .map(|face| FaceBound::new(&face.map(|v| vertices[*v])))
            .collect();

        GeometryStore {
            vertices,
            faces,
            face_bounds,
            face_indices,
        }
    }

    pub fn vertices(&self) -> &IndexVec<VertexIdx, WorldPoint> {
        &self.vertices
    }

    pub fn faces(&self) -> &IndexVec<FaceIdx, Face> {
        &self.faces
    }

    pub fn face_indices(&self) -> &[FI] {
        &self.face_indices
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn vertex(&self, index: VertexIdx) -> &WorldPoint {
        &self.vertices[index]
    }

    pub fn face(&self, index: FaceIdx) -> &Face {
        &self.faces[index]
    }

    pub fn face_bound(&self, index: FaceIdx) -> &FaceBound {
        &self.face_bounds[index]
    }

    /// Vertex positions of a face.
    pub fn face_triangle(&self, index: FaceIdx) -> Triangle<WorldPoint> {
        self.faces[index].map(|v| self.vertices[*v])
    }

    /// Face index slots of a leaf.
    pub fn slots(&self, range: Range<u32>) -> &[FI] {
        &self.face_indices[range.start as usize..range.end as usize]
    }
}
