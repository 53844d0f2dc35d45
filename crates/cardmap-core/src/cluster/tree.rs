//! Array-backed cluster tree arena.
//!
//! Nodes live in a flat `Vec` and reference each other by index, which
//! keeps the whole tree serializable, deterministic to iterate, and free
//! of ownership ambiguity. Members are row indices into the embedding
//! matrix; they are resolved to card ids only at serialization time.

use crate::types::ClusterRecord;

/// One node of the cluster tree.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    /// Index of this node in the arena
    pub id: usize,

    /// Parent index; `None` for the root
    pub parent: Option<usize>,

    /// Distance from the root
    pub depth: usize,

    /// Unit-norm centroid of the member vectors
    pub centroid: Vec<f32>,

    /// Embedding-matrix row indices assigned to this node. For internal
    /// nodes this is the union of all descendant leaves.
    pub members: Vec<usize>,

    /// Child node indices; empty for leaves
    pub children: Vec<usize>,
}

impl ClusterNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Arena holding the whole tree. Node 0 is always the root.
#[derive(Debug, Clone)]
pub struct ClusterTree {
    nodes: Vec<ClusterNode>,
}

impl ClusterTree {
    /// Create a tree with a root covering the given members.
    pub fn new(members: Vec<usize>, centroid: Vec<f32>) -> Self {
        Self {
            nodes: vec![ClusterNode {
                id: 0,
                parent: None,
                depth: 0,
                centroid,
                members,
                children: Vec::new(),
            }],
        }
    }

    /// Append a child under `parent`, returning the new node's id.
    pub fn add_child(&mut self, parent: usize, members: Vec<usize>, centroid: Vec<f32>) -> usize {
        let id = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        self.nodes.push(ClusterNode {
            id,
            parent: Some(parent),
            depth,
            centroid,
            members,
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn node(&self, id: usize) -> &ClusterNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Leaf ids in ascending order.
    pub fn leaves(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    /// Check the partition invariant: every row in `0..n` appears in
    /// exactly one leaf, and each node's children partition its members.
    pub fn verify_partition(&self, n: usize) -> Result<(), String> {
        let mut seen = vec![0usize; n];
        for leaf_id in self.leaves() {
            for &row in &self.nodes[leaf_id].members {
                if row >= n {
                    return Err(format!("leaf {leaf_id} references out-of-range row {row}"));
                }
                seen[row] += 1;
            }
        }
        for (row, count) in seen.iter().enumerate() {
            if *count != 1 {
                return Err(format!("row {row} appears in {count} leaves, expected 1"));
            }
        }

        for node in &self.nodes {
            if node.is_leaf() {
                continue;
            }
            let child_total: usize = node
                .children
                .iter()
                .map(|&c| self.nodes[c].members.len())
                .sum();
            if child_total != node.members.len() {
                return Err(format!(
                    "node {} members ({}) != union of children ({})",
                    node.id,
                    node.members.len(),
                    child_total
                ));
            }
        }
        Ok(())
    }

    /// Serialize the tree to flat artifact records, resolving member rows
    /// to card ids.
    pub fn to_records(&self, card_ids: &[String]) -> Vec<ClusterRecord> {
        self.nodes
            .iter()
            .map(|node| ClusterRecord {
                cluster_id: node.id,
                parent_id: node.parent,
                depth: node.depth,
                centroid: node.centroid.clone(),
                member_card_ids: node
                    .members
                    .iter()
                    .map(|&row| card_ids[row].clone())
                    .collect(),
            })
            .collect()
    }
}
