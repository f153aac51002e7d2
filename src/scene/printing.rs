use std::fmt::{self, Display, Write as _};

use crate::util::Stats;

use super::{
    bvh::{NodeIdx, NodeKind},
    dump::SceneDump,
    faces::FaceIndex,
};

/// Summary of the index structure of a scene.
#[derive(Clone, Debug)]
pub struct SceneStatistics {
    pub faces: usize,
    pub slots: usize,
    pub nodes: usize,
    pub populated_cells: usize,
    pub null_cells: usize,
    pub grid_branches: usize,
    pub tree_depth: Stats,
    pub cell_faces: Stats,
    pub leaf_faces: Stats,
}

impl<FI: FaceIndex> SceneDump<FI> {
    pub fn statistics(&self) -> SceneStatistics {
        let bvh = self.bvh();
        let roots: Vec<_> = self.grid().iter_leaves().map(|(_, root)| root).collect();

        let mut tree_depth = Stats::default();
        let mut cell_faces = Stats::default();
        for root in roots.iter().flatten() {
            tree_depth.add_sample(bvh.depth(*root));
            cell_faces.add_sample(
                bvh.leaves(*root)
                    .filter_map(|(node, _)| node.face_range())
                    .map(|range| range.len())
                    .sum(),
            );
        }

        SceneStatistics {
            faces: self.geometry().face_count(),
            slots: self.geometry().face_indices().len(),
            nodes: bvh.len(),
            populated_cells: roots.iter().filter(|root| root.is_some()).count(),
            null_cells: roots.iter().filter(|root| root.is_none()).count(),
            grid_branches: self.grid().branches().len(),
            tree_depth,
            cell_faces,
            leaf_faces: bvh
                .nodes()
                .iter()
                .filter_map(|node| node.face_range())
                .map(|range| range.len())
                .collect(),
        }
    }

    /// Indented listing of the tree under `root`, one node per line.
    pub fn format_tree(&self, root: NodeIdx) -> String {
        let bvh = self.bvh();
        let mut output = String::new();
        let mut stack = vec![(root, 0)];

        while let Some((index, indent)) = stack.pop() {
            let node = bvh.node(index);
            let _ = write!(
                output,
                "{}- {}{}: {:?} r2={}",
                "  ".repeat(indent),
                if node.is_branch() { "B" } else { "L" },
                index.index(),
                node.sphere.center,
                node.sphere.radius_squared,
            );
            match &node.kind {
                NodeKind::Branch { left, right } => {
                    stack.push((*right, indent + 1));
                    stack.push((*left, indent + 1));
                }
                NodeKind::Leaf { faces } => {
                    let faces: Vec<_> = self
                        .geometry()
                        .slots(faces.clone())
                        .iter()
                        .map(|slot| slot.face().index())
                        .collect();
                    let _ = write!(output, " faces {faces:?}");
                }
            }
            output.push('\n');
        }

        output
    }
}

impl Display for SceneStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Faces: {} ({} slots)", self.faces, self.slots)?;
        writeln!(
            f,
            "Cells: {} populated, {} null; {} grid branches",
            self.populated_cells, self.null_cells, self.grid_branches
        )?;
        writeln!(f, "Nodes: {}", self.nodes)?;
        writeln!(f, "Tree depth: {}", self.tree_depth)?;
        writeln!(f, "Faces per cell: {}", self.cell_faces)?;
        write!(f, "Faces per leaf: {}", self.leaf_faces)
    }
}

#[cfg(test)]
mod test {
    use assert2::{assert, let_assert};

    use crate::geometry::CellPoint;
    use crate::scene::{faces::WideFaceIndex, grid::CellLookup, test_scenes};

    #[test]
    fn terrain_statistics() {
        let scene = test_scenes::terrain::<WideFaceIndex>();
        let stats = scene.statistics();

        assert!(stats.faces == 512);
        assert!(stats.nodes == scene.bvh().len());
        assert!(stats.populated_cells == stats.tree_depth.count);
        assert!(stats.null_cells == 0);
        assert!(stats.grid_branches > 0);
        assert!(stats.leaf_faces.total == stats.slots);
        assert!(stats.cell_faces.total == stats.slots);
        assert!(stats.leaf_faces.max <= 4);
        assert!(stats.tree_depth.max > 1);
    }

    #[test]
    fn statistics_display() {
        let output = test_scenes::stacked_triangles::<WideFaceIndex>().statistics().to_string();
        assert!(output.contains("Faces: 2 (2 slots)"));
        assert!(output.contains("Cells: 1 populated, 0 null"));
    }

    #[test]
    fn tree_listing() {
        let scene = test_scenes::stacked_triangles::<WideFaceIndex>();
        let_assert!(CellLookup::Leaf(Some(root)) = scene.grid().get_leaf(&CellPoint::new(0, 0, 0)));
        let listing = scene.format_tree(root);
        assert!(listing.lines().count() == 1);
        assert!(listing.starts_with("- L0"));
        assert!(listing.contains("faces [0, 1]") || listing.contains("faces [1, 0]"));
    }
}
