use rstar::{RTree, RTreeObject, AABB};

use crate::geometry::BBox;

/// An entry in the R-tree, referencing a graph node by its index.
#[derive(Debug, Clone)]
pub struct SpatialEntry {
    /// Index into the node list.
    pub node: usize,
    /// Bounding box of every shape of the node.
    pub bbox: BBox,
}

impl RTreeObject for SpatialEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bbox.min.x, self.bbox.min.y],
            [self.bbox.max.x, self.bbox.max.y],
        )
    }
}

/// Bounding-box index over the nodes of one net graph.
pub struct SpatialIndex {
    tree: RTree<SpatialEntry>,
}

impl SpatialIndex {
    pub fn build(entries: Vec<SpatialEntry>) -> Self {
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Nodes whose boxes touch `bbox`, in ascending node order.
    pub fn candidates(&self, bbox: &BBox) -> Vec<usize> {
        let envelope = AABB::from_corners([bbox.min.x, bbox.min.y], [bbox.max.x, bbox.max.y]);
        let mut nodes: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|e| e.node)
            .collect();
        nodes.sort_unstable();
        nodes
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
