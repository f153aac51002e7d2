use std::ops::{ControlFlow, Range};

use arrayvec::ArrayVec;
use index_vec::IndexVec;

use crate::geometry::BoundingSphere;

/// Deepest BVH accepted by the traversal.
/// Builders stop splitting at this depth and loading a deeper tree fails.
pub const MAX_TREE_DEPTH: usize = 64;

index_vec::define_index_type! {
    pub struct NodeIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub sphere: BoundingSphere,
    pub kind: NodeKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Branch { left: NodeIdx, right: NodeIdx },
    /// Range of face index slots owned by the leaf
    Leaf { faces: Range<u32> },
}

impl Node {
    pub fn is_branch(&self) -> bool {
        matches!(self.kind, NodeKind::Branch { .. })
    }

    pub fn children(&self) -> Option<(NodeIdx, NodeIdx)> {
        match self.kind {
            NodeKind::Branch { left, right } => Some((left, right)),
            NodeKind::Leaf { .. } => None,
        }
    }

    pub fn face_range(&self) -> Option<Range<u32>> {
        match &self.kind {
            NodeKind::Branch { .. } => None,
            NodeKind::Leaf { faces } => Some(faces.clone()),
        }
    }
}

/// Query specific part of a BVH traversal.
pub trait BvhVisitor {
    type Break;

    /// Returns true if the subtree bounded by the sphere should be visited.
    fn enter(&mut self, sphere: &BoundingSphere) -> bool;

    /// Processes the face index slots of a leaf whose sphere passed `enter`.
    fn leaf(&mut self, faces: Range<u32>) -> ControlFlow<Self::Break>;
}

/// Node arena shared by the BVHs of all grid cells.
/// Children are always stored after their parent.
#[derive(Clone, Debug, Default)]
pub struct Bvh {
    nodes: IndexVec<NodeIdx, Node>,
}

impl Bvh {
    pub(crate) fn from_nodes(nodes: IndexVec<NodeIdx, Node>) -> Bvh {
        Bvh { nodes }
    }

    pub fn nodes(&self) -> &IndexVec<NodeIdx, Node> {
        &self.nodes
    }

    pub fn node(&self, index: NodeIdx) -> &Node {
        &self.nodes[index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first traversal of the tree rooted at `root`, left child first.
    pub fn traverse<V: BvhVisitor>(&self, root: NodeIdx, visitor: &mut V) -> ControlFlow<V::Break> {
        let mut stack = ArrayVec::<NodeIdx, { MAX_TREE_DEPTH + 1 }>::new();
        stack.push(root);

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !visitor.enter(&node.sphere) {
                continue;
            }
            match &node.kind {
                NodeKind::Branch { left, right } => {
                    stack.push(*right);
                    stack.push(*left);
                }
                NodeKind::Leaf { faces } => visitor.leaf(faces.clone())?,
            }
        }

        ControlFlow::Continue(())
    }

    /// Number of levels of the tree rooted at `root`, a single leaf has depth 1.
    pub fn depth(&self, root: NodeIdx) -> usize {
        let mut stack = vec![(root, 1)];
        let mut max_depth = 0;
        while let Some((index, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            if let Some((left, right)) = self.nodes[index].children() {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
        }
        max_depth
    }

    /// Leaves of the tree rooted at `root`, with their depth.
    pub fn leaves(&self, root: NodeIdx) -> impl Iterator<Item = (&Node, usize)> + '_ {
        let mut stack = vec![(root, 1)];
        std::iter::from_fn(move || {
            while let Some((index, depth)) = stack.pop() {
                let node = &self.nodes[index];
                match node.children() {
                    Some((left, right)) => {
                        stack.push((right, depth + 1));
                        stack.push((left, depth + 1));
                    }
                    None => return Some((node, depth)),
                }
            }
            None
        })
    }
}
