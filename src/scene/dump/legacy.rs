//! Legacy dump layout.
//!
//! Legacy dumps store regions without padding, BVH children and leaf face ranges as byte
//! offsets from the start of the dump (right child first), and grid links as tagged byte
//! offsets. They are rearranged into a fresh current layout image before loading.

use std::mem::size_of;

use index_vec::IndexVec;

use crate::scene::bvh::{MAX_TREE_DEPTH, NodeIdx, NodeKind};
use crate::scene::faces::FaceIndex;
use crate::scene::grid::{CellLink, CompressedCellLink, GridBranchIdx};

use super::format::{
    self, CURRENT_VERSION, DumpWriter, LEGACY_VERSION, REGION_ALIGN, RawFace, RawGridBranch, RawHeader,
    RawLegacyNode, RawNode, RawVertex, RelSlice, sphere_center,
};
use super::{DumpError, SceneDump};

const TAG_BITS: u32 = 1;
const LEAF_TAG: u32 = 1;

/// Grid link holding a byte offset from the start of the dump.
fn encode_link(offset: usize, tag: u32) -> u32 {
    let offset = u32::try_from(offset).expect("Legacy dump must fit into 2GB");
    let raw = offset << TAG_BITS | tag;
    assert!(offset >> (u32::BITS - TAG_BITS) == 0 && raw < CompressedCellLink::NULL_LEAF.raw());
    raw
}

/// Writes the scene in the legacy layout.
pub fn write<FI: FaceIndex>(scene: &SceneDump<FI>) -> Vec<u8> {
    let bvh = scene.bvh();
    let grid = scene.grid();

    let mut writer = DumpWriter::new(1);
    let vertices = writer.region(&scene.raw_vertices());
    let faces = writer.region(&scene.raw_faces());
    let face_indices = writer.region(scene.geometry().face_indices());

    // Pre-order, right subtree before left
    let mut order = Vec::with_capacity(bvh.len());
    let mut position = vec![u32::MAX; bvh.len()];
    let mut stack: Vec<NodeIdx> = grid.iter_leaves().filter_map(|(_, root)| root).collect();
    stack.reverse();
    while let Some(index) = stack.pop() {
        position[index.index()] = order.len() as u32;
        order.push(index);
        if let Some((left, right)) = bvh.node(index).children() {
            stack.push(left);
            stack.push(right);
        }
    }

    let node_size = size_of::<RawLegacyNode>();
    let nodes_offset = writer.next_offset();
    let node_offset = |index: NodeIdx| nodes_offset + position[index.index()] as usize * node_size;
    let slot_offset = |slot: u32| (face_indices.offset as usize + slot as usize * size_of::<FI>()) as u32;

    let raw_nodes: Vec<RawLegacyNode> = order
        .iter()
        .map(|index| {
            let node = bvh.node(*index);
            let (sub0, sub1, face_end) = match &node.kind {
                NodeKind::Branch { left, right } => (node_offset(*left) as u32, node_offset(*right) as u32, 0),
                NodeKind::Leaf { faces } => (0, slot_offset(faces.start), slot_offset(faces.end)),
            };
            RawLegacyNode {
                center: sphere_center(&node.sphere),
                radius_squared: node.sphere.radius_squared,
                sub0,
                sub1,
                face_end,
            }
        })
        .collect();
    let nodes = writer.region(&raw_nodes);

    let top_offset = writer.next_offset();
    let branches_offset = top_offset + grid.top().len() * size_of::<u32>();
    let convert_link = |link: &CompressedCellLink| match link.decode() {
        CellLink::Empty | CellLink::Leaf { root: None } => link.raw(),
        CellLink::Leaf { root: Some(root) } => encode_link(node_offset(root), LEAF_TAG),
        CellLink::Branch { index } => {
            encode_link(branches_offset + index.index() * size_of::<RawGridBranch>(), 0)
        }
    };

    let top: Vec<u32> = grid.top().iter().map(&convert_link).collect();
    let grid_top = writer.region(&top);
    let branches: Vec<RawGridBranch> = grid
        .branches()
        .iter()
        .map(|branch| branch.each_ref().map(&convert_link))
        .collect();
    let grid_branches = writer.region(&branches);
    debug_assert!(grid_top.offset as usize == top_offset && grid_branches.offset as usize == branches_offset);

    let header = RawHeader {
        vertices,
        faces,
        face_indices,
        nodes,
        grid_top,
        grid_branches,
        ..scene.raw_header(LEGACY_VERSION)
    };
    writer.finish(&header)
}

/// Converts dump relative offsets pointing into a region to record indices.
struct RegionResolver {
    offset: usize,
    record_size: usize,
    count: usize,
}

impl RegionResolver {
    fn new<T>(slice: RelSlice) -> RegionResolver {
        RegionResolver {
            offset: slice.offset as usize,
            record_size: size_of::<T>(),
            count: slice.count as usize,
        }
    }

    /// Index of the record at the offset, `allow_end` accepts the offset one past the last record.
    fn resolve(&self, offset: u32, allow_end: bool, what: &'static str) -> Result<usize, DumpError> {
        let relative = (offset as usize)
            .checked_sub(self.offset)
            .ok_or(DumpError::Corrupt(what))?;
        let index = relative / self.record_size;
        let limit = if allow_end { self.count } else { self.count.saturating_sub(1) };
        if relative % self.record_size != 0 || index > limit || (!allow_end && self.count == 0) {
            return Err(DumpError::Corrupt(what));
        }
        Ok(index)
    }
}

/// Rewrites a legacy image into a newly allocated current layout image.
pub fn rearrange<FI: FaceIndex>(bytes: &[u8], header: &RawHeader) -> Result<Vec<u8>, DumpError> {
    debug_assert!(header.version == LEGACY_VERSION);

    let legacy_nodes = format::read_region::<RawLegacyNode>(bytes, header.nodes, "nodes")?;
    let node_resolver = RegionResolver::new::<RawLegacyNode>(header.nodes);
    let slot_resolver = RegionResolver::new::<FI>(header.face_indices);
    let branch_resolver = RegionResolver::new::<RawGridBranch>(header.grid_branches);

    let legacy_top = format::read_region::<u32>(bytes, header.grid_top, "grid top")?;
    let legacy_branches = format::read_region::<RawGridBranch>(bytes, header.grid_branches, "grid branches")?;

    // New node indices are assigned in pre-order, left subtree first.
    let mut new_nodes: IndexVec<NodeIdx, RawNode> = IndexVec::new();
    let mut visited = vec![false; legacy_nodes.len()];
    let mut convert_tree = |root_offset: u32| -> Result<NodeIdx, DumpError> {
        let root = new_nodes.next_idx();
        // (legacy node index, parent's new index, depth)
        let mut stack = vec![(node_resolver.resolve(root_offset, false, "invalid grid leaf link")?, None, 1)];
        while let Some((legacy_index, parent, depth)) = stack.pop() {
            if depth > MAX_TREE_DEPTH {
                return Err(DumpError::TreeTooDeep { max: MAX_TREE_DEPTH });
            }
            if std::mem::replace(&mut visited[legacy_index], true) {
                return Err(DumpError::Corrupt("legacy BVH node has two parents"));
            }

            let legacy = &legacy_nodes[legacy_index];
            let new_index = new_nodes.next_idx();
            if let Some((parent, is_left)) = parent {
                let parent: &mut RawNode = &mut new_nodes[parent];
                let offset = RawNode::child_offset(new_index.index());
                if is_left {
                    parent.sub0 = offset;
                } else {
                    parent.sub1 = offset;
                }
            }

            let node = if legacy.sub0 == 0 {
                let start = slot_resolver.resolve(legacy.sub1, true, "invalid legacy leaf face range")?;
                let end = slot_resolver.resolve(legacy.face_end, true, "invalid legacy leaf face range")?;
                if start >= end {
                    return Err(DumpError::Corrupt("invalid legacy leaf face range"));
                }
                RawNode {
                    center: legacy.center,
                    radius_squared: legacy.radius_squared,
                    kind: RawNode::LEAF,
                    sub0: start as u32,
                    sub1: end as u32,
                    reserved: 0,
                }
            } else {
                if legacy.sub1 >= legacy.sub0 {
                    return Err(DumpError::Corrupt("legacy branch children out of order"));
                }
                let left = node_resolver.resolve(legacy.sub0, false, "invalid legacy child offset")?;
                let right = node_resolver.resolve(legacy.sub1, false, "invalid legacy child offset")?;
                stack.push((right, Some((new_index, false)), depth + 1));
                stack.push((left, Some((new_index, true)), depth + 1));
                RawNode {
                    center: legacy.center,
                    radius_squared: legacy.radius_squared,
                    kind: RawNode::BRANCH,
                    sub0: 0,
                    sub1: 0,
                    reserved: 0,
                }
            };
            new_nodes.push(node);
        }
        Ok(root)
    };

    let mut convert_link = |raw: u32| -> Result<u32, DumpError> {
        let link = CompressedCellLink::from_raw(raw);
        if matches!(link.decode(), CellLink::Empty | CellLink::Leaf { root: None }) {
            return Ok(raw);
        }
        let offset = raw >> TAG_BITS;
        let converted = if raw & LEAF_TAG == LEAF_TAG {
            CompressedCellLink::new_leaf(Some(convert_tree(offset)?))
        } else {
            let index = branch_resolver.resolve(offset, false, "invalid legacy grid branch link")?;
            CompressedCellLink::new_branch(GridBranchIdx::from_usize(index))
        };
        Ok(converted.raw())
    };

    let top = legacy_top
        .iter()
        .map(|raw| convert_link(*raw))
        .collect::<Result<Vec<_>, _>>()?;
    let branches = legacy_branches
        .iter()
        .map(|branch| {
            let mut converted = [0u32; 8];
            for (dst, src) in converted.iter_mut().zip(branch) {
                *dst = convert_link(*src)?;
            }
            Ok(converted)
        })
        .collect::<Result<Vec<_>, DumpError>>()?;

    let mut writer = DumpWriter::new(REGION_ALIGN);
    let header = RawHeader {
        version: CURRENT_VERSION,
        vertices: writer.region(&format::read_region::<RawVertex>(bytes, header.vertices, "vertices")?),
        faces: writer.region(&format::read_region::<RawFace>(bytes, header.faces, "faces")?),
        face_indices: writer.region(&format::read_region::<FI>(bytes, header.face_indices, "face indices")?),
        nodes: writer.region(new_nodes.as_raw_slice()),
        grid_top: writer.region(&top),
        grid_branches: writer.region(&branches),
        ..*header
    };
    Ok(writer.finish(&header))
}

#[cfg(test)]
mod test {
    use super::*;

    use assert2::{assert, let_assert};

    use crate::scene::faces::WideFaceIndex;
    use crate::scene::test_scenes;

    #[test]
    fn legacy_layout_is_packed() {
        let scene = test_scenes::terrain::<u16>();
        let bytes = scene.to_legacy_bytes();
        let header: RawHeader = bytemuck::pod_read_unaligned(&bytes[..size_of::<RawHeader>()]);
        assert!(header.version == LEGACY_VERSION);

        let region_end = |slice: RelSlice, size: usize| slice.offset as usize + slice.count as usize * size;
        assert!(header.faces.offset as usize == region_end(header.vertices, size_of::<RawVertex>()));
        assert!(header.face_indices.offset as usize == region_end(header.faces, size_of::<RawFace>()));
        assert!(header.nodes.offset as usize == region_end(header.face_indices, size_of::<u16>()));
        assert!(header.grid_top.offset as usize == region_end(header.nodes, size_of::<RawLegacyNode>()));
    }

    #[test]
    fn legacy_branches_store_right_first() {
        let scene = test_scenes::terrain::<WideFaceIndex>();
        let bytes = scene.to_legacy_bytes();
        let header: RawHeader = bytemuck::pod_read_unaligned(&bytes[..size_of::<RawHeader>()]);
        let_assert!(Ok(nodes) = format::read_region::<RawLegacyNode>(&bytes, header.nodes, "nodes"));
        let mut branch_count = 0;
        for node in nodes.iter().filter(|node| node.sub0 != 0) {
            assert!(node.sub1 < node.sub0);
            branch_count += 1;
        }
        assert!(branch_count > 0);
    }

    #[test]
    fn rearranged_has_same_trees() {
        let scene = test_scenes::terrain::<WideFaceIndex>();
        let_assert!(Ok(loaded) = SceneDump::<WideFaceIndex>::from_bytes(&scene.to_legacy_bytes()));

        assert!(loaded.geometry().face_indices() == scene.geometry().face_indices());
        assert!(loaded.bvh().len() == scene.bvh().len());

        let original: Vec<_> = scene.grid().iter_leaves().collect();
        let rearranged: Vec<_> = loaded.grid().iter_leaves().collect();
        assert!(original.len() == rearranged.len());
        for ((cell_a, root_a), (cell_b, root_b)) in original.into_iter().zip(rearranged) {
            assert!(cell_a == cell_b);
            assert!(root_a.is_some() == root_b.is_some());
            if let (Some(a), Some(b)) = (root_a, root_b) {
                let leaves_a: Vec<_> = scene.bvh().leaves(a).map(|(n, d)| (n.clone(), d)).collect();
                let leaves_b: Vec<_> = loaded.bvh().leaves(b).map(|(n, d)| (n.clone(), d)).collect();
                assert!(leaves_a == leaves_b);
            }
        }
    }

    #[test]
    fn rearranged_is_stable() {
        let scene = test_scenes::terrain::<u16>();
        let_assert!(Ok(loaded) = SceneDump::<u16>::from_bytes(&scene.to_legacy_bytes()));
        let_assert!(Ok(reloaded) = SceneDump::<u16>::from_bytes(&loaded.to_legacy_bytes()));
        assert!(reloaded.to_bytes() == loaded.to_bytes());
    }

    #[test]
    fn corrupt_child_offset() {
        let scene = test_scenes::terrain::<WideFaceIndex>();
        let mut bytes = scene.to_legacy_bytes();
        let header: RawHeader = bytemuck::pod_read_unaligned(&bytes[..size_of::<RawHeader>()]);
        let_assert!(Ok(nodes) = format::read_region::<RawLegacyNode>(&bytes, header.nodes, "nodes"));
        let_assert!(Some(branch) = nodes.iter().position(|node| node.sub0 != 0));

        // Point the left child in the middle of a node
        let sub0_at = header.nodes.offset as usize + branch * size_of::<RawLegacyNode>() + 16;
        let value = nodes[branch].sub0 + 3;
        bytes[sub0_at..sub0_at + 4].copy_from_slice(&value.to_ne_bytes());
        let_assert!(Err(DumpError::Corrupt(_)) = SceneDump::<WideFaceIndex>::from_bytes(&bytes));
    }

    #[test]
    fn empty_leaf_range() {
        let scene = test_scenes::terrain::<WideFaceIndex>();
        let mut bytes = scene.to_legacy_bytes();
        let header: RawHeader = bytemuck::pod_read_unaligned(&bytes[..size_of::<RawHeader>()]);
        let_assert!(Ok(nodes) = format::read_region::<RawLegacyNode>(&bytes, header.nodes, "nodes"));
        let_assert!(Some(leaf) = nodes.iter().position(|node| node.sub0 == 0));

        // End the face range where it starts
        let face_end_at = header.nodes.offset as usize + leaf * size_of::<RawLegacyNode>() + 24;
        let start = nodes[leaf].sub1;
        bytes[face_end_at..face_end_at + 4].copy_from_slice(&start.to_ne_bytes());
        let_assert!(Err(DumpError::Corrupt(_)) = SceneDump::<WideFaceIndex>::from_bytes(&bytes));
    }
}
