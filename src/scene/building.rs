use std::{fs, path::Path};

use assert2::assert;
use bon::bon;
use index_vec::IndexVec;
use indexmap::IndexMap;
use itertools::Itertools as _;
use morton_encoding::morton_encode;
use thiserror::Error;

use crate::geometry::{BoundingSphere, CellBox, CellPoint, Triangle, WorldBox, WorldPoint, WorldVector};

use super::{
    bvh::{Bvh, MAX_TREE_DEPTH, Node, NodeIdx, NodeKind},
    dump::SceneDump,
    faces::{FaceFlags, FaceIdx, FaceIndex, VertexIdx},
    geometry_store::{Face, FaceBound, GeometryStore},
    grid::SparseGrid,
};

/// Triangle soup with per-face flags, input of the scene builder.
#[derive(Clone, Debug, Default)]
pub struct SceneMesh {
    pub vertices: IndexVec<VertexIdx, WorldPoint>,
    pub faces: IndexVec<FaceIdx, Face>,
    pub flags: IndexVec<FaceIdx, FaceFlags>,
}

impl SceneMesh {
    pub fn push_vertex(&mut self, vertex: WorldPoint) -> VertexIdx {
        self.vertices.push(vertex)
    }

    pub fn push_face(&mut self, face: Face, flags: FaceFlags) -> FaceIdx {
        self.flags.push(flags);
        self.faces.push(face)
    }

    /// Loads all triangles of an OBJ file, every face gets the same flags.
    pub fn with_obj(p: impl AsRef<Path>, flags: FaceFlags) -> Result<SceneMesh, ObjOpenError> {
        let content = fs::read_to_string(p)?;
        let parsed = wavefront_obj::obj::parse(content)?;

        Ok(Self::load_obj(parsed, flags))
    }

    fn load_obj(obj: wavefront_obj::obj::ObjSet, flags: FaceFlags) -> SceneMesh {
        let mut mesh = SceneMesh::default();
        let mut vertices = IndexMap::new();

        for (object_index, o) in obj.objects.iter().enumerate() {
            for geometry in &o.geometry {
                for shape in &geometry.shapes {
                    let wavefront_obj::obj::Primitive::Triangle(a, b, c) = &shape.primitive else {
                        tracing::warn!(object = %o.name, "skipping non-triangle primitive");
                        continue;
                    };

                    let mut handle_vertex = |vtindex: (usize, Option<usize>, Option<usize>)| {
                        let entry = vertices.entry((object_index, vtindex.0));
                        let index = VertexIdx::from_usize(entry.index());
                        entry.or_insert_with(|| {
                            let vertex = &o.vertices[vtindex.0];
                            WorldPoint::new(vertex.x as f32, vertex.y as f32, vertex.z as f32)
                        });
                        index
                    };

                    let a = handle_vertex(*a);
                    let b = handle_vertex(*b);
                    let c = handle_vertex(*c);

                    mesh.push_face(Triangle::new(a, b, c), flags);
                }
            }
        }

        mesh.vertices = vertices.into_values().collect();
        mesh
    }
}

#[derive(Debug, Error)]
pub enum ObjOpenError {
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse file: {0}")]
    ParseError(#[from] wavefront_obj::ParseError),
}

/// Offline builder of scene dumps.
///
/// Faces are binned into every grid cell their bounding box touches, each
/// populated cell gets its own bounding sphere tree.
#[derive(Clone, Debug)]
pub struct SceneBuilder {
    leaf_size: WorldVector,
    top_level: u32,
    max_leaf_faces: usize,
    skip_flags: FaceFlags,
    use_flags: FaceFlags,
}

#[bon]
impl SceneBuilder {
    #[builder]
    pub fn new(
        leaf_size: WorldVector,
        #[builder(default = 2)] top_level: u32,
        #[builder(default = 8)] max_leaf_faces: usize,
        #[builder(default = FaceFlags::USER_INVISIBLE)] skip_flags: FaceFlags,
        #[builder(default = FaceFlags::CULL_BOTH)] use_flags: FaceFlags,
    ) -> Self {
        assert!(leaf_size.iter().all(|x| x.is_finite() && *x > 0.0));
        assert!(top_level <= SparseGrid::MAX_TOP_LEVEL);
        assert!(max_leaf_faces > 0);

        SceneBuilder {
            leaf_size,
            top_level,
            max_leaf_faces,
            skip_flags,
            use_flags,
        }
    }
}

impl SceneBuilder {
    pub fn build<FI: FaceIndex>(&self, mesh: &SceneMesh) -> SceneDump<FI> {
        assert!(mesh.faces.len() == mesh.flags.len());
        assert!(mesh.faces.len() <= FI::MAX_FACE + 1);
        assert!(
            mesh.faces
                .iter()
                .flat_map(|f| f.iter())
                .all(|v| v.index() < mesh.vertices.len())
        );

        let triangles: IndexVec<FaceIdx, Triangle<WorldPoint>> =
            mesh.faces.iter().map(|f| f.map(|v| mesh.vertices[*v])).collect();
        let bounds: IndexVec<FaceIdx, FaceBound> = triangles.iter().map(FaceBound::new).collect();

        let bounding_box = WorldBox::from_points(triangles.iter().flat_map(|t| t.iter()));
        let leaf_limits = match &bounding_box {
            Some(b) => self.cell_range(b),
            None => CellBox::new(CellPoint::origin(), CellPoint::new(-1, -1, -1)),
        };

        let mut cells: IndexMap<CellPoint, Vec<FaceIdx>> = IndexMap::new();
        for (face, bound) in bounds.iter_enumerated() {
            for cell in self.cell_range(&bound.bounds).iter_cells() {
                let cell_faces = cells.entry(cell).or_default();
                // Degenerate faces still claim their cells, but never reach a leaf
                if bound.normal != WorldVector::zeros() {
                    cell_faces.push(face);
                }
            }
        }

        let mut tree = TreeBuilder {
            bounds: &bounds,
            flags: &mesh.flags,
            max_leaf_faces: self.max_leaf_faces,
            nodes: IndexVec::new(),
            face_indices: Vec::new(),
        };
        let roots = cells
            .into_iter()
            .map(|(cell, mut faces)| {
                if faces.is_empty() {
                    (cell, None)
                } else {
                    morton_sort(&mut faces, &bounds);
                    (cell, Some(tree.build_recursive(&mut faces, 1)))
                }
            })
            .collect_vec();

        let TreeBuilder {
            nodes, face_indices, ..
        } = tree;

        tracing::debug!(
            faces = mesh.faces.len(),
            cells = roots.len(),
            nodes = nodes.len(),
            slots = face_indices.len(),
            "built scene"
        );

        let grid = SparseGrid::from_cells(self.leaf_size, leaf_limits, self.top_level, roots);
        let geometry = GeometryStore::new(mesh.vertices.clone(), mesh.faces.clone(), face_indices);

        SceneDump::new(
            bounding_box.unwrap_or_else(WorldBox::empty),
            self.skip_flags,
            self.use_flags,
            geometry,
            Bvh::from_nodes(nodes),
            grid,
        )
    }

    fn cell_range(&self, b: &WorldBox) -> CellBox {
        let cell_of = |p: &WorldPoint| {
            CellPoint::from(p.coords.component_div(&self.leaf_size).map(|x| x.floor() as i32))
        };
        CellBox::new(cell_of(&b.min), cell_of(&b.max))
    }
}

/// Accumulates the nodes and face index slots of all cell trees.
struct TreeBuilder<'a, FI: FaceIndex> {
    bounds: &'a IndexVec<FaceIdx, FaceBound>,
    flags: &'a IndexVec<FaceIdx, FaceFlags>,
    max_leaf_faces: usize,
    nodes: IndexVec<NodeIdx, Node>,
    face_indices: Vec<FI>,
}

impl<FI: FaceIndex> TreeBuilder<'_, FI> {
    /// Builds the subtree over `faces` (already in Morton order), nodes are
    /// stored in pre-order so children always follow their parent.
    fn build_recursive(&mut self, faces: &mut [FaceIdx], depth: usize) -> NodeIdx {
        let sphere = self.enclosing_sphere(faces);

        if faces.len() <= self.max_leaf_faces || depth >= MAX_TREE_DEPTH {
            let start = self.face_indices.len() as u32;
            self.face_indices
                .extend(faces.iter().map(|face| FI::new(*face, self.flags[*face])));
            let end = self.face_indices.len() as u32;
            return self.nodes.push(Node {
                sphere,
                kind: NodeKind::Leaf { faces: start..end },
            });
        }

        // Placeholder node, children are filled in once they exist
        let node_index = self.nodes.push(Node {
            sphere,
            kind: NodeKind::Leaf { faces: 0..0 },
        });

        let (left_faces, right_faces) = faces.split_at_mut(faces.len() / 2);
        let left = self.build_recursive(left_faces, depth + 1);
        let right = self.build_recursive(right_faces, depth + 1);

        self.nodes[node_index].kind = NodeKind::Branch { left, right };
        node_index
    }

    /// Sphere containing the bounding boxes of all faces.
    /// Enclosing the boxes, not just the vertices, keeps box queries against
    /// the spheres consistent with the per-face box tests.
    fn enclosing_sphere(&self, faces: &[FaceIdx]) -> BoundingSphere {
        let corners = faces.iter().flat_map(|face| box_corners(&self.bounds[*face].bounds));
        BoundingSphere::from_points(corners).unwrap_or(BoundingSphere::new(WorldPoint::origin(), 0.0))
    }
}

fn box_corners(b: &WorldBox) -> impl Iterator<Item = WorldPoint> + Clone + use<> {
    let (min, max) = (b.min, b.max);
    (0..8).map(move |i| {
        WorldPoint::new(
            if i & 1 == 0 { min.x } else { max.x },
            if i & 2 == 0 { min.y } else { max.y },
            if i & 4 == 0 { min.z } else { max.z },
        )
    })
}

fn morton_sort(faces: &mut [FaceIdx], bounds: &IndexVec<FaceIdx, FaceBound>) {
    const GRID_BITS: usize = 10;

    let Some(centroid_bounds) = WorldBox::from_points(faces.iter().map(|f| bounds[*f].bounds.center())) else {
        return;
    };
    let min = centroid_bounds.min;
    let scale = centroid_bounds
        .size()
        .map(|s| if s > 0.0 { ((1 << GRID_BITS) - 1) as f32 / s } else { 0.0 });

    faces.sort_by_cached_key(|face| {
        let grid_coordinates: [u32; 3] = (bounds[*face].bounds.center() - min)
            .component_mul(&scale)
            .map(|x| x.round() as u32)
            .into();

        (morton_encode(grid_coordinates), *face)
    });
}
