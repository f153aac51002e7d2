use std::collections::BTreeMap;

use assert2::assert;
use index_vec::IndexVec;
use nalgebra::Vector3;

use crate::geometry::{CellBox, CellPoint, FloatType, WorldBox, WorldPoint, WorldVector};

use super::bvh::NodeIdx;

pub const BRANCH_CHILDREN: usize = 8;

index_vec::define_index_type! {
    pub struct GridBranchIdx = u32;
    MAX_INDEX = CompressedCellLink::MAX_INDEX as usize;
    IMPL_RAW_CONVERSIONS = true;
}

/// Link to a grid branch, a cell's BVH root or nothing, packed into 32 bits.
///
/// Lowest bit is the tag (0 = branch, 1 = leaf), the rest is the index.
/// Two values at the top of the range are reserved for empty blocks and cells without faces.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CompressedCellLink(u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellLink {
    Empty,
    Branch { index: GridBranchIdx },
    Leaf { root: Option<NodeIdx> },
}

impl CompressedCellLink {
    const TAG_BITS: u32 = 1;
    const LEAF_TAG: u32 = 1;
    const EMPTY_VALUE: u32 = u32::MAX;
    const NULL_LEAF_VALUE: u32 = u32::MAX - 1;

    pub const MAX_INDEX: u32 = (u32::MAX >> Self::TAG_BITS) - 2;

    pub const EMPTY: Self = Self(Self::EMPTY_VALUE);
    pub const NULL_LEAF: Self = Self(Self::NULL_LEAF_VALUE);

    /// Panics if the index is out of range.
    pub fn new_branch(index: GridBranchIdx) -> Self {
        assert!(index.raw() <= Self::MAX_INDEX);
        Self(index.raw() << Self::TAG_BITS)
    }

    /// Panics if the index is out of range.
    pub fn new_leaf(root: Option<NodeIdx>) -> Self {
        match root {
            None => Self::NULL_LEAF,
            Some(root) => {
                assert!(root.raw() <= Self::MAX_INDEX);
                Self(root.raw() << Self::TAG_BITS | Self::LEAF_TAG)
            }
        }
    }

    /// Wraps a raw value, the encoded indices are not checked.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn decode(&self) -> CellLink {
        match self.0 {
            Self::EMPTY_VALUE => CellLink::Empty,
            Self::NULL_LEAF_VALUE => CellLink::Leaf { root: None },
            value => {
                let index = value >> Self::TAG_BITS;
                if value & Self::LEAF_TAG == 0 {
                    CellLink::Branch {
                        index: GridBranchIdx::from_raw_unchecked(index),
                    }
                } else {
                    CellLink::Leaf {
                        root: Some(NodeIdx::from_raw(index)),
                    }
                }
            }
        }
    }
}

impl Default for CompressedCellLink {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl std::fmt::Debug for CompressedCellLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellLink")
            .field("0", &self.0)
            .field("<decoded>", &self.decode())
            .finish()
    }
}

/// Result of a grid lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellLookup {
    /// Populated level 0 cell, possibly without any faces
    Leaf(Option<NodeIdx>),
    /// The cell lies in an empty block of 2^level cells per side, aligned to its size
    Empty { level: u32 },
}

/// Sparse hierarchical grid of leaf cells.
///
/// The world is split into blocks of 2^top_level cells per side, aligned to multiples of that size.
/// Each block is an octree of `GridBranch`es, whose level 0 children link to the cells' BVH roots.
#[derive(Clone, Debug)]
pub struct SparseGrid {
    leaf_size: WorldVector,
    leaf_limits: CellBox,
    top_level: u32,
    /// Coordinates of the first top block, in units of top blocks
    top_origin: CellPoint,
    top_dims: Vector3<u32>,
    top: Vec<CompressedCellLink>,
    branches: IndexVec<GridBranchIdx, [CompressedCellLink; BRANCH_CHILDREN]>,
}

/// Raw arrays of the grid, as stored in a dump.
#[derive(Clone, Debug)]
pub struct SparseGridParts {
    pub leaf_size: WorldVector,
    pub leaf_limits: CellBox,
    pub top_level: u32,
    pub top_origin: CellPoint,
    pub top_dims: Vector3<u32>,
    pub top: Vec<CompressedCellLink>,
    pub branches: IndexVec<GridBranchIdx, [CompressedCellLink; BRANCH_CHILDREN]>,
}

impl SparseGrid {
    /// Deepest supported top level.
    pub const MAX_TOP_LEVEL: u32 = 16;

    /// Builds the grid from populated cells.
    /// Cells outside of `leaf_limits` are ignored.
    pub fn from_cells(
        leaf_size: WorldVector,
        leaf_limits: CellBox,
        top_level: u32,
        cells: impl IntoIterator<Item = (CellPoint, Option<NodeIdx>)>,
    ) -> SparseGrid {
        assert!(top_level <= Self::MAX_TOP_LEVEL);

        let top_origin = leaf_limits.min.map(|c| c >> top_level);
        let top_end = leaf_limits.max.map(|c| c >> top_level);
        let top_dims = (top_end - top_origin).map(|d| (d + 1).max(0) as u32);

        let mut blocks: BTreeMap<usize, Vec<(CellPoint, Option<NodeIdx>)>> = BTreeMap::new();
        let mut grid = SparseGrid {
            leaf_size,
            leaf_limits,
            top_level,
            top_origin,
            top_dims,
            top: Vec::new(),
            branches: IndexVec::new(),
        };

        for (cell, root) in cells {
            if let Some(top_index) = grid.top_index(&cell) {
                blocks.entry(top_index).or_default().push((cell, root));
            }
        }

        grid.top = vec![CompressedCellLink::EMPTY; top_dims.iter().map(|d| *d as usize).product()];
        for (top_index, entries) in blocks {
            let link = grid.build_block(top_level, entries);
            grid.top[top_index] = link;
        }

        grid
    }

    /// Creates the grid from raw arrays.
    /// Array sizes must be consistent with each other, links are not checked.
    pub(crate) fn from_parts(parts: SparseGridParts) -> SparseGrid {
        debug_assert!(parts.top.len() == parts.top_dims.iter().map(|d| *d as usize).product::<usize>());
        SparseGrid {
            leaf_size: parts.leaf_size,
            leaf_limits: parts.leaf_limits,
            top_level: parts.top_level,
            top_origin: parts.top_origin,
            top_dims: parts.top_dims,
            top: parts.top,
            branches: parts.branches,
        }
    }

    pub fn to_parts(&self) -> SparseGridParts {
        SparseGridParts {
            leaf_size: self.leaf_size,
            leaf_limits: self.leaf_limits.clone(),
            top_level: self.top_level,
            top_origin: self.top_origin,
            top_dims: self.top_dims,
            top: self.top.clone(),
            branches: self.branches.clone(),
        }
    }

    fn build_block(&mut self, level: u32, entries: Vec<(CellPoint, Option<NodeIdx>)>) -> CompressedCellLink {
        if entries.is_empty() {
            return CompressedCellLink::EMPTY;
        }
        if level == 0 {
            debug_assert!(entries.iter().all(|(cell, _)| *cell == entries[0].0));
            // Cells with faces win over the ones without
            let root = entries.iter().find_map(|(_, root)| *root);
            return CompressedCellLink::new_leaf(root);
        }

        let child_level = level - 1;
        let mut children: [Vec<_>; BRANCH_CHILDREN] = Default::default();
        for entry in entries {
            children[Self::child_index(&entry.0, child_level)].push(entry);
        }

        // Reserve the slot first, so that parents precede their children
        let index = self.branches.push([CompressedCellLink::EMPTY; BRANCH_CHILDREN]);
        for (i, child_entries) in children.into_iter().enumerate() {
            let link = self.build_block(child_level, child_entries);
            self.branches[index][i] = link;
        }
        CompressedCellLink::new_branch(index)
    }

    fn child_index(cell: &CellPoint, level: u32) -> usize {
        (((cell.x >> level) & 1) | ((cell.y >> level) & 1) << 1 | ((cell.z >> level) & 1) << 2) as usize
    }

    fn top_index(&self, cell: &CellPoint) -> Option<usize> {
        let block = cell.map(|c| c >> self.top_level) - self.top_origin;
        if (0..3).any(|i| block[i] < 0 || block[i] as u32 >= self.top_dims[i]) {
            return None;
        }
        let [x, y, z] = [0, 1, 2].map(|i| block[i] as usize);
        let [dx, dy] = [0, 1].map(|i| self.top_dims[i] as usize);
        Some((z * dy + y) * dx + x)
    }

    pub fn leaf_size(&self) -> &WorldVector {
        &self.leaf_size
    }

    pub fn leaf_limits(&self) -> &CellBox {
        &self.leaf_limits
    }

    pub fn top_level(&self) -> u32 {
        self.top_level
    }

    pub fn top(&self) -> &[CompressedCellLink] {
        &self.top
    }

    pub fn branches(&self) -> &IndexVec<GridBranchIdx, [CompressedCellLink; BRANCH_CHILDREN]> {
        &self.branches
    }

    /// Cell containing the point.
    pub fn cell_of(&self, p: &WorldPoint) -> CellPoint {
        CellPoint::from(
            p.coords
                .component_div(&self.leaf_size)
                .map(|x| x.floor() as i32),
        )
    }

    /// World space box of a cell.
    pub fn cell_box(&self, cell: &CellPoint) -> WorldBox {
        let min = cell.map(|c| c as FloatType).coords.component_mul(&self.leaf_size);
        WorldBox::new(min.into(), (min + self.leaf_size).into())
    }

    /// Cells overlapped by the box, clipped to the leaf limits.
    pub fn cell_range(&self, b: &WorldBox) -> Option<CellBox> {
        CellBox::new(self.cell_of(&b.min), self.cell_of(&b.max)).clip(&self.leaf_limits)
    }

    /// Looks up a cell.
    pub fn get_leaf(&self, cell: &CellPoint) -> CellLookup {
        let Some(top_index) = self.top_index(cell) else {
            return CellLookup::Empty { level: 0 };
        };

        let mut link = self.top[top_index];
        let mut level = self.top_level;
        loop {
            match link.decode() {
                CellLink::Empty => return CellLookup::Empty { level },
                CellLink::Leaf { root } => return CellLookup::Leaf(root),
                CellLink::Branch { index } => {
                    level -= 1;
                    link = self.branches[index][Self::child_index(cell, level)];
                }
            }
        }
    }

    /// All populated cells, with their BVH roots.
    pub fn iter_leaves(&self) -> impl Iterator<Item = (CellPoint, Option<NodeIdx>)> + '_ {
        let dims = self.top_dims.map(|d| d as i32);
        let origin = self.top_origin;
        let top_level = self.top_level;
        let mut stack: Vec<(CompressedCellLink, CellPoint, u32)> = Vec::new();
        for (i, link) in self.top.iter().enumerate().rev() {
            let i = i as i32;
            let block = CellPoint::new(i % dims.x, (i / dims.x) % dims.y, i / (dims.x * dims.y));
            let first_cell = (block + origin.coords).map(|c| c << top_level);
            stack.push((*link, first_cell, top_level));
        }

        std::iter::from_fn(move || {
            while let Some((link, first_cell, level)) = stack.pop() {
                match link.decode() {
                    CellLink::Empty => {}
                    CellLink::Leaf { root } => return Some((first_cell, root)),
                    CellLink::Branch { index } => {
                        let child_level = level - 1;
                        for (i, child) in self.branches[index].iter().enumerate().rev() {
                            let offset = CellPoint::new(i as i32 & 1, (i as i32 >> 1) & 1, (i as i32 >> 2) & 1);
                            let child_cell = first_cell + offset.coords.map(|c| c << child_level);
                            stack.push((*child, child_cell, child_level));
                        }
                    }
                }
            }
            None
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use assert2::{assert, let_assert};
    use test_case::test_case;
    use test_strategy::proptest;

    #[proptest]
    fn cell_link_branch(#[strategy(0u32..=CompressedCellLink::MAX_INDEX)] index: u32) {
        let link = CompressedCellLink::new_branch(index.into());
        let_assert!(CellLink::Branch { index: decoded } = link.decode());
        assert!(decoded.raw() == index);
    }

    #[proptest]
    fn cell_link_leaf(#[strategy(0u32..=CompressedCellLink::MAX_INDEX)] index: u32) {
        let link = CompressedCellLink::new_leaf(Some(index.into()));
        let_assert!(CellLink::Leaf { root: Some(decoded) } = link.decode());
        assert!(decoded.raw() == index);
    }

    #[test]
    fn cell_link_reserved() {
        assert!(CompressedCellLink::EMPTY.decode() == CellLink::Empty);
        assert!(CompressedCellLink::NULL_LEAF.decode() == CellLink::Leaf { root: None });
        assert!(CompressedCellLink::default() == CompressedCellLink::EMPTY);
    }

    #[test]
    #[should_panic]
    fn cell_link_leaf_out_of_range() {
        CompressedCellLink::new_leaf(Some(NodeIdx::from_raw(CompressedCellLink::MAX_INDEX + 1)));
    }

    fn limits(min: [i32; 3], max: [i32; 3]) -> CellBox {
        CellBox::new(min.into(), max.into())
    }

    fn sample_grid() -> SparseGrid {
        SparseGrid::from_cells(
            WorldVector::new(2.0, 2.0, 2.0),
            limits([-5, -2, -5], [10, 3, 10]),
            2,
            [
                (CellPoint::new(-5, 0, -5), Some(NodeIdx::from_raw(0))),
                (CellPoint::new(1, 1, 1), Some(NodeIdx::from_raw(1))),
                (CellPoint::new(2, 1, 1), None),
                (CellPoint::new(10, 3, 10), Some(NodeIdx::from_raw(2))),
            ],
        )
    }

    #[test_case([-5, 0, -5], Some(0) ; "negative coordinates")]
    #[test_case([1, 1, 1], Some(1) ; "inner cell")]
    #[test_case([10, 3, 10], Some(2) ; "last cell")]
    fn lookup_populated(cell: [i32; 3], expected: Option<u32>) {
        let grid = sample_grid();
        assert!(grid.get_leaf(&cell.into()) == CellLookup::Leaf(expected.map(NodeIdx::from_raw)));
    }

    #[test]
    fn lookup_null_leaf() {
        assert!(sample_grid().get_leaf(&CellPoint::new(2, 1, 1)) == CellLookup::Leaf(None));
    }

    #[test_case([0, 0, 0], 0 ; "next to populated cell")]
    #[test_case([1, 3, 1], 1 ; "sibling block")]
    #[test_case([5, 0, 5], 2 ; "empty top block")]
    #[test_case([100, 0, 0], 0 ; "outside")]
    #[test_case([-9, 0, 0], 0 ; "outside negative")]
    fn lookup_empty(cell: [i32; 3], expected_level: u32) {
        let grid = sample_grid();
        assert!(grid.get_leaf(&cell.into()) == CellLookup::Empty { level: expected_level });
    }

    /// Empty blocks reported by the lookup really contain no populated cells.
    #[proptest]
    fn empty_blocks_are_empty(#[strategy(-6i32..12)] x: i32, #[strategy(-3i32..5)] y: i32, #[strategy(-6i32..12)] z: i32) {
        let grid = sample_grid();
        let cell = CellPoint::new(x, y, z);
        if let CellLookup::Empty { level } = grid.get_leaf(&cell) {
            let mask = !((1 << level) - 1);
            let block_min = cell.map(|c| c & mask);
            let block_max = block_min.map(|c| c + (1 << level) - 1);
            for (populated, _) in grid.iter_leaves() {
                let inside = (0..3).all(|i| populated[i] >= block_min[i] && populated[i] <= block_max[i]);
                assert!(!inside);
            }
        }
    }

    #[test]
    fn iter_leaves_finds_everything() {
        let mut leaves: Vec<_> = sample_grid().iter_leaves().collect();
        leaves.sort_by_key(|(cell, _)| (cell.z, cell.y, cell.x));
        assert!(
            leaves
                == vec![
                    (CellPoint::new(-5, 0, -5), Some(NodeIdx::from_raw(0))),
                    (CellPoint::new(1, 1, 1), Some(NodeIdx::from_raw(1))),
                    (CellPoint::new(2, 1, 1), None),
                    (CellPoint::new(10, 3, 10), Some(NodeIdx::from_raw(2))),
                ]
        );
    }

    #[test]
    fn cell_of_floors() {
        let grid = sample_grid();
        assert!(grid.cell_of(&WorldPoint::new(-0.5, 1.9, 2.0)) == CellPoint::new(-1, 0, 1));
    }

    #[test]
    fn cell_range_clipped() {
        let grid = sample_grid();
        let b = WorldBox::new(WorldPoint::new(-100.0, 0.5, 1.0), WorldPoint::new(3.0, 0.5, 100.0));
        let_assert!(Some(range) = grid.cell_range(&b));
        assert!(range.min == CellPoint::new(-5, 0, 0));
        assert!(range.max == CellPoint::new(1, 0, 10));
    }
}
