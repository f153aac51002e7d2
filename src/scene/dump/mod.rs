//! Relocatable binary image of a scene.
//!
//! A dump is loaded in two steps: the byte image is checked and its self-relative offsets
//! are resolved to typed indices of a `SceneDump`. Legacy images are first rearranged into
//! the current layout.

mod format;
mod legacy;

use std::mem::size_of;

use index_vec::IndexVec;
use nalgebra::Vector3;
use thiserror::Error;

use crate::geometry::{CellBox, CellPoint, Triangle, WorldBox, WorldPoint, WorldVector};

use super::bvh::{Bvh, MAX_TREE_DEPTH, Node, NodeIdx, NodeKind};
use super::faces::{FaceFlags, FaceIdx, FaceIndex, VertexIdx};
use super::geometry_store::GeometryStore;
use super::grid::{CellLink, CompressedCellLink, GridBranchIdx, SparseGrid, SparseGridParts};

use format::{
    CURRENT_VERSION, DumpWriter, MAGIC, REGION_ALIGN, RawFace, RawGridBranch, RawHeader, RawNode,
    RawVertex,
};

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("dump is truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("not a scene dump (magic {0:?})")]
    BadMagic([u8; 4]),
    #[error("unsupported dump version {0}")]
    UnsupportedVersion(u32),
    #[error("face index width mismatch: dump has {found} bytes, expected {expected}")]
    FaceIndexWidth { found: usize, expected: usize },
    #[error("region {region} ({count} items at {offset}) is out of bounds")]
    RegionOutOfBounds {
        region: &'static str,
        offset: u32,
        count: u32,
    },
    #[error("region {region} at offset {offset} is not aligned to {align} bytes")]
    Misaligned {
        region: &'static str,
        offset: u32,
        align: usize,
    },
    #[error("BVH is deeper than {max} levels")]
    TreeTooDeep { max: usize },
    #[error("corrupt dump: {0}")]
    Corrupt(&'static str),
}

/// Loaded scene, ready for queries.
#[derive(Clone, Debug)]
pub struct SceneDump<FI: FaceIndex> {
    bounding_box: WorldBox,
    default_skip_flags: FaceFlags,
    default_use_flags: FaceFlags,
    geometry: GeometryStore<FI>,
    bvh: Bvh,
    grid: SparseGrid,
}

impl<FI: FaceIndex> SceneDump<FI> {
    pub(crate) fn new(
        bounding_box: WorldBox,
        default_skip_flags: FaceFlags,
        default_use_flags: FaceFlags,
        geometry: GeometryStore<FI>,
        bvh: Bvh,
        grid: SparseGrid,
    ) -> Self {
        SceneDump {
            bounding_box,
            default_skip_flags,
            default_use_flags,
            geometry,
            bvh,
            grid,
        }
    }

    pub fn bounding_box(&self) -> &WorldBox {
        &self.bounding_box
    }

    pub fn default_skip_flags(&self) -> FaceFlags {
        self.default_skip_flags
    }

    pub fn default_use_flags(&self) -> FaceFlags {
        self.default_use_flags
    }

    pub fn geometry(&self) -> &GeometryStore<FI> {
        &self.geometry
    }

    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    pub fn grid(&self) -> &SparseGrid {
        &self.grid
    }

    /// Loads a dump in either the current or the legacy layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DumpError> {
        let header = format::read_header(bytes, size_of::<FI>())?;
        if header.version == CURRENT_VERSION {
            Self::patch(bytes, &header)
        } else {
            let rearranged = legacy::rearrange::<FI>(bytes, &header)?;
            tracing::debug!(
                legacy_size = bytes.len(),
                size = rearranged.len(),
                "Rearranged legacy dump"
            );
            let header = format::read_header(&rearranged, size_of::<FI>())?;
            Self::patch(&rearranged, &header)
        }
    }

    /// Serializes the scene in the current layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = DumpWriter::new(REGION_ALIGN);
        let vertices = writer.region(&self.raw_vertices());
        let faces = writer.region(&self.raw_faces());
        let face_indices = writer.region(self.geometry.face_indices());
        let raw_nodes: Vec<RawNode> = self
            .bvh
            .nodes()
            .iter()
            .map(|node| RawNode::from_node(node, RawNode::child_offset))
            .collect();
        let nodes = writer.region(&raw_nodes);
        let top: Vec<u32> = self.grid.top().iter().map(|link| link.raw()).collect();
        let grid_top = writer.region(&top);
        let branches: Vec<RawGridBranch> = self
            .grid
            .branches()
            .iter()
            .map(|branch| branch.map(|link| link.raw()))
            .collect();
        let grid_branches = writer.region(&branches);

        let header = RawHeader {
            vertices,
            faces,
            face_indices,
            nodes,
            grid_top,
            grid_branches,
            ..self.raw_header(CURRENT_VERSION)
        };
        writer.finish(&header)
    }

    /// Serializes the scene in the legacy layout.
    pub fn to_legacy_bytes(&self) -> Vec<u8> {
        legacy::write(self)
    }

    fn raw_vertices(&self) -> Vec<RawVertex> {
        self.geometry
            .vertices()
            .iter()
            .map(|v| [v.x, v.y, v.z, 0.0])
            .collect()
    }

    fn raw_faces(&self) -> Vec<RawFace> {
        self.geometry
            .faces()
            .iter()
            .map(|face| [face[0].raw(), face[1].raw(), face[2].raw()])
            .collect()
    }

    /// Header with everything except the regions filled in.
    fn raw_header(&self, version: u32) -> RawHeader {
        let grid = self.grid.to_parts();
        let v4 = |v: &WorldVector| [v.x, v.y, v.z, 0.0];
        let c4 = |c: &Vector3<i32>| [c.x, c.y, c.z, 0];
        RawHeader {
            magic: MAGIC,
            version,
            face_index_size: size_of::<FI>() as u32,
            top_level: grid.top_level,
            leaf_size: v4(&grid.leaf_size),
            bounding_box_min: v4(&self.bounding_box.min.coords),
            bounding_box_max: v4(&self.bounding_box.max.coords),
            leaf_limits_min: c4(&grid.leaf_limits.min.coords),
            leaf_limits_max: c4(&grid.leaf_limits.max.coords),
            top_origin: c4(&grid.top_origin.coords),
            top_dims: [grid.top_dims.x, grid.top_dims.y, grid.top_dims.z, 0],
            default_skip_flags: self.default_skip_flags.bits() as u32,
            default_use_flags: self.default_use_flags.bits() as u32,
            ..bytemuck::Zeroable::zeroed()
        }
    }

    /// Resolves a current layout image.
    fn patch(bytes: &[u8], header: &RawHeader) -> Result<Self, DumpError> {
        format::check_aligned(header.vertices, "vertices")?;
        format::check_aligned(header.nodes, "nodes")?;

        let vertices: IndexVec<VertexIdx, WorldPoint> =
            format::read_region::<RawVertex>(bytes, header.vertices, "vertices")?
                .into_iter()
                .map(|[x, y, z, _]| WorldPoint::new(x, y, z))
                .collect();

        let faces: IndexVec<FaceIdx, _> = format::read_region::<RawFace>(bytes, header.faces, "faces")?
            .into_iter()
            .map(|face| {
                if face.iter().all(|v| (*v as usize) < vertices.len()) {
                    let [a, b, c] = face.map(VertexIdx::from_raw);
                    Ok(Triangle::new(a, b, c))
                } else {
                    Err(DumpError::Corrupt("face references a missing vertex"))
                }
            })
            .collect::<Result<_, _>>()?;
        if faces.len() > FI::MAX_FACE + 1 {
            return Err(DumpError::Corrupt("too many faces for the face index width"));
        }

        let face_indices = format::read_region::<FI>(bytes, header.face_indices, "face indices")?;
        if face_indices.iter().any(|fi| fi.face().index() >= faces.len()) {
            return Err(DumpError::Corrupt("face index slot references a missing face"));
        }

        let raw_nodes = format::read_region::<RawNode>(bytes, header.nodes, "nodes")?;
        let nodes = resolve_nodes(&raw_nodes, face_indices.len())?;

        let leaf_size = WorldVector::new(header.leaf_size[0], header.leaf_size[1], header.leaf_size[2]);
        if !leaf_size.iter().all(|s| s.is_finite() && *s > 0.0) {
            return Err(DumpError::Corrupt("leaf size must be positive"));
        }
        if header.top_level > SparseGrid::MAX_TOP_LEVEL {
            return Err(DumpError::Corrupt("grid top level out of range"));
        }
        let top_dims = Vector3::new(header.top_dims[0], header.top_dims[1], header.top_dims[2]);
        let top: Vec<CompressedCellLink> = format::read_region::<u32>(bytes, header.grid_top, "grid top")?
            .into_iter()
            .map(CompressedCellLink::from_raw)
            .collect();
        if Some(top.len()) != top_dims.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d as usize)) {
            return Err(DumpError::Corrupt("grid top size doesn't match its dimensions"));
        }
        let branches: IndexVec<GridBranchIdx, _> =
            format::read_region::<RawGridBranch>(bytes, header.grid_branches, "grid branches")?
                .into_iter()
                .map(|branch| branch.map(CompressedCellLink::from_raw))
                .collect();

        check_grid(&top, &branches, header.top_level, &nodes)?;
        let bvh = Bvh::from_nodes(nodes);
        check_tree_depth(&bvh)?;

        let point = |v: &[f32; 4]| WorldPoint::new(v[0], v[1], v[2]);
        let cell = |c: &[i32; 4]| CellPoint::new(c[0], c[1], c[2]);
        let grid = SparseGrid::from_parts(SparseGridParts {
            leaf_size,
            leaf_limits: CellBox::new(cell(&header.leaf_limits_min), cell(&header.leaf_limits_max)),
            top_level: header.top_level,
            top_origin: cell(&header.top_origin),
            top_dims,
            top,
            branches,
        });

        tracing::debug!(
            vertices = vertices.len(),
            faces = faces.len(),
            nodes = bvh.len(),
            grid_branches = grid.branches().len(),
            "Loaded scene dump"
        );

        Ok(SceneDump {
            bounding_box: WorldBox::new(point(&header.bounding_box_min), point(&header.bounding_box_max)),
            default_skip_flags: FaceFlags::from_bits_retain(header.default_skip_flags as u8),
            default_use_flags: FaceFlags::from_bits_retain(header.default_use_flags as u8),
            geometry: GeometryStore::new(vertices, faces, face_indices),
            bvh,
            grid,
        })
    }
}

/// Converts node region offsets to indices.
/// Children must be stored after their parents.
fn resolve_nodes(raw_nodes: &[RawNode], slot_count: usize) -> Result<IndexVec<NodeIdx, Node>, DumpError> {
    let node_size = size_of::<RawNode>() as u32;
    let child = |parent: usize, offset: u32| {
        let index = (offset / node_size) as usize;
        if offset % node_size != 0 || index >= raw_nodes.len() || index <= parent {
            Err(DumpError::Corrupt("invalid BVH child offset"))
        } else {
            Ok(NodeIdx::from_usize(index))
        }
    };

    raw_nodes
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let kind = match raw.kind {
                RawNode::BRANCH => NodeKind::Branch {
                    left: child(i, raw.sub0)?,
                    right: child(i, raw.sub1)?,
                },
                RawNode::LEAF if raw.sub0 < raw.sub1 && raw.sub1 as usize <= slot_count => {
                    NodeKind::Leaf { faces: raw.sub0..raw.sub1 }
                }
                RawNode::LEAF => return Err(DumpError::Corrupt("invalid BVH leaf face range")),
                _ => return Err(DumpError::Corrupt("unknown BVH node kind")),
            };
            Ok(Node {
                sphere: raw.sphere(),
                kind,
            })
        })
        .collect()
}

/// Checks that grid links are in range, that every branch and BVH root is linked at most once
/// and that leaves only appear at level 0.
fn check_grid(
    top: &[CompressedCellLink],
    branches: &IndexVec<GridBranchIdx, [CompressedCellLink; 8]>,
    top_level: u32,
    nodes: &IndexVec<NodeIdx, Node>,
) -> Result<(), DumpError> {
    let mut branch_seen = vec![false; branches.len()];
    let mut root_seen = vec![false; nodes.len()];
    let mut stack: Vec<(CompressedCellLink, u32)> = top.iter().map(|link| (*link, top_level)).collect();

    while let Some((link, level)) = stack.pop() {
        match link.decode() {
            CellLink::Empty | CellLink::Leaf { root: None } => {}
            CellLink::Leaf { root: Some(root) } => {
                if level != 0 {
                    return Err(DumpError::Corrupt("grid leaf above level 0"));
                }
                let seen = root_seen
                    .get_mut(root.index())
                    .ok_or(DumpError::Corrupt("grid leaf references a missing node"))?;
                if std::mem::replace(seen, true) {
                    return Err(DumpError::Corrupt("BVH root shared between cells"));
                }
            }
            CellLink::Branch { index } => {
                if level == 0 {
                    return Err(DumpError::Corrupt("grid branch below level 0"));
                }
                let seen = branch_seen
                    .get_mut(index.index())
                    .ok_or(DumpError::Corrupt("grid link references a missing branch"))?;
                if std::mem::replace(seen, true) {
                    return Err(DumpError::Corrupt("grid branch linked twice"));
                }
                stack.extend(branches[index].iter().map(|child| (*child, level - 1)));
            }
        }
    }

    Ok(())
}

/// Checks that no BVH node is shared and that all trees fit the traversal stack.
fn check_tree_depth(bvh: &Bvh) -> Result<(), DumpError> {
    let mut depth = vec![1usize; bvh.len()];
    let mut referenced = vec![false; bvh.len()];
    for (i, node) in bvh.nodes().iter_enumerated() {
        if depth[i.index()] > MAX_TREE_DEPTH {
            return Err(DumpError::TreeTooDeep { max: MAX_TREE_DEPTH });
        }
        if let Some((left, right)) = node.children() {
            for child in [left, right] {
                if std::mem::replace(&mut referenced[child.index()], true) {
                    return Err(DumpError::Corrupt("BVH node has two parents"));
                }
                // Parents precede children, so the parent's depth is final here
                depth[child.index()] = depth[i.index()] + 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    use assert2::{assert, let_assert};

    use crate::scene::faces::WideFaceIndex;
    use crate::scene::test_scenes;

    #[test]
    fn round_trip_preserves_structure() {
        let scene = test_scenes::terrain::<WideFaceIndex>();
        let bytes = scene.to_bytes();
        let_assert!(Ok(loaded) = SceneDump::<WideFaceIndex>::from_bytes(&bytes));

        assert!(loaded.bounding_box() == scene.bounding_box());
        assert!(loaded.geometry().vertices() == scene.geometry().vertices());
        assert!(loaded.geometry().faces() == scene.geometry().faces());
        assert!(loaded.geometry().face_indices() == scene.geometry().face_indices());
        assert!(loaded.bvh().nodes() == scene.bvh().nodes());
        assert!(loaded.grid().top() == scene.grid().top());
        assert!(loaded.grid().branches() == scene.grid().branches());
        assert!(loaded.default_skip_flags() == scene.default_skip_flags());
        assert!(loaded.default_use_flags() == scene.default_use_flags());

        assert!(loaded.to_bytes() == bytes);
    }

    #[test]
    fn bad_magic() {
        let mut bytes = test_scenes::terrain::<WideFaceIndex>().to_bytes();
        bytes[0] = b'X';
        let_assert!(Err(DumpError::BadMagic(_)) = SceneDump::<WideFaceIndex>::from_bytes(&bytes));
    }

    #[test]
    fn truncated() {
        let bytes = test_scenes::terrain::<WideFaceIndex>().to_bytes();
        let_assert!(Err(DumpError::Truncated { .. }) = SceneDump::<WideFaceIndex>::from_bytes(&bytes[..100]));
        let_assert!(
            Err(DumpError::RegionOutOfBounds { .. }) =
                SceneDump::<WideFaceIndex>::from_bytes(&bytes[..bytes.len() - 4])
        );
    }

    #[test]
    fn unsupported_version() {
        let mut bytes = test_scenes::terrain::<WideFaceIndex>().to_bytes();
        bytes[4..8].copy_from_slice(&7u32.to_ne_bytes());
        let_assert!(Err(DumpError::UnsupportedVersion(7)) = SceneDump::<WideFaceIndex>::from_bytes(&bytes));
    }

    #[test]
    fn face_index_width_mismatch() {
        let bytes = test_scenes::terrain::<WideFaceIndex>().to_bytes();
        let_assert!(
            Err(DumpError::FaceIndexWidth { found: 4, expected: 2 }) = SceneDump::<u16>::from_bytes(&bytes)
        );
    }

    fn single_chain(depth: usize) -> Bvh {
        let sphere = crate::geometry::BoundingSphere::new(WorldPoint::origin(), 1.0);
        let mut nodes = IndexVec::<NodeIdx, Node>::new();
        for i in 0..depth - 1 {
            nodes.push(Node {
                sphere,
                kind: NodeKind::Branch {
                    left: NodeIdx::from_usize(2 * i + 1),
                    right: NodeIdx::from_usize(2 * i + 2),
                },
            });
            nodes.push(Node {
                sphere,
                kind: NodeKind::Leaf { faces: 0..0 },
            });
        }
        nodes.push(Node {
            sphere,
            kind: NodeKind::Leaf { faces: 0..0 },
        });
        Bvh::from_nodes(nodes)
    }

    #[test]
    fn tree_depth_limit() {
        let tree = single_chain(MAX_TREE_DEPTH);
        assert!(tree.depth(NodeIdx::from_raw(0)) == MAX_TREE_DEPTH);
        assert!(check_tree_depth(&tree).is_ok());

        let tree = single_chain(MAX_TREE_DEPTH + 1);
        let_assert!(Err(DumpError::TreeTooDeep { .. }) = check_tree_depth(&tree));
    }

    #[test]
    fn shared_node_rejected() {
        let sphere = crate::geometry::BoundingSphere::new(WorldPoint::origin(), 1.0);
        let raw = [
            RawNode {
                center: [0.0; 3],
                radius_squared: 1.0,
                kind: RawNode::BRANCH,
                sub0: 32,
                sub1: 32,
                reserved: 0,
            },
            RawNode::from_node(
                &Node {
                    sphere,
                    kind: NodeKind::Leaf { faces: 0..1 },
                },
                RawNode::child_offset,
            ),
        ];
        let_assert!(Ok(nodes) = resolve_nodes(&raw, 1));
        let_assert!(Err(DumpError::Corrupt(_)) = check_tree_depth(&Bvh::from_nodes(nodes)));
    }

    #[test]
    fn backward_child_rejected() {
        let raw = [RawNode {
            center: [0.0; 3],
            radius_squared: 1.0,
            kind: RawNode::BRANCH,
            sub0: 0,
            sub1: 0,
            reserved: 0,
        }];
        let_assert!(Err(DumpError::Corrupt(_)) = resolve_nodes(&raw, 0));
    }

    #[test]
    fn empty_leaf_rejected() {
        let leaf = |faces| RawNode {
            center: [0.0; 3],
            radius_squared: 1.0,
            kind: RawNode::LEAF,
            sub0: faces,
            sub1: faces,
            reserved: 0,
        };
        let_assert!(Err(DumpError::Corrupt(_)) = resolve_nodes(&[leaf(0)], 4));
        let_assert!(Err(DumpError::Corrupt(_)) = resolve_nodes(&[leaf(2)], 4));

        let single = RawNode { sub1: 3, ..leaf(2) };
        let_assert!(Ok(nodes) = resolve_nodes(&[single], 4));
        assert!(nodes[NodeIdx::from_raw(0)].face_range() == Some(2..3));
    }
}
