//! Agglomerative clustering of document nodes
//!
//! ## Tree distance
//!
//! [`distance`] compares where two nodes sit in the tree. Both ancestor paths
//! are walked down from their lowest common ancestor in lock-step, and each
//! level costs:
//!
//! - `same_tag_cost` or `different_tag_cost` depending on whether the two
//!   nodes at that level share a tag,
//! - `different_depth_cost` once one path has run out,
//! - `stride_cost` per non-whitespace sibling lying between the two paths.
//!
//! A node containing the other is infinitely far away.
//!
//! ## Clustering
//!
//! [`clusters`] starts with one cluster per item and repeatedly merges the
//! closest pair (single linkage) until the closest pair is at least the
//! splitting distance apart.

use crate::fnode::Fnode;
use crate::types::DistanceFn;
use plumb_types::{Document, NodeId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Per-level costs for [`distance`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceCosts {
    pub different_depth_cost: f64,
    pub different_tag_cost: f64,
    pub same_tag_cost: f64,
    pub stride_cost: f64,
}

impl Default for DistanceCosts {
    fn default() -> Self {
        Self {
            different_depth_cost: 2.0,
            different_tag_cost: 2.0,
            same_tag_cost: 1.0,
            stride_cost: 1.0,
        }
    }
}

/// Settings for `best_cluster()`
#[derive(Clone)]
pub struct ClusterOptions {
    pub costs: DistanceCosts,
    /// Clusters at least this far apart are never merged
    pub splitting_distance: f64,
    additional_cost: Option<DistanceFn>,
    distance: Option<DistanceFn>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            costs: DistanceCosts::default(),
            splitting_distance: 3.0,
            additional_cost: None,
            distance: None,
        }
    }
}

impl ClusterOptions {
    pub fn with_costs(mut self, costs: DistanceCosts) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_splitting_distance(mut self, splitting_distance: f64) -> Self {
        self.splitting_distance = splitting_distance;
        self
    }

    /// Add a caller-computed cost on top of the tree distance
    pub fn with_additional_cost(mut self, cost: impl Fn(&Fnode, &Fnode) -> f64 + 'static) -> Self {
        self.additional_cost = Some(Rc::new(cost));
        self
    }

    /// Replace the tree distance entirely
    pub fn with_distance(mut self, distance: impl Fn(&Fnode, &Fnode) -> f64 + 'static) -> Self {
        self.distance = Some(Rc::new(distance));
        self
    }

    pub(crate) fn distance(&self) -> Option<&DistanceFn> {
        self.distance.as_ref()
    }

    pub(crate) fn additional_cost(&self, a: &Fnode, b: &Fnode) -> f64 {
        self.additional_cost.as_ref().map_or(0.0, |cost| cost(a, b))
    }
}

impl fmt::Debug for ClusterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterOptions")
            .field("costs", &self.costs)
            .field("splitting_distance", &self.splitting_distance)
            .field("additional_cost", &self.additional_cost.is_some())
            .field("distance", &self.distance.is_some())
            .finish()
    }
}

/// Non-whitespace siblings between two nodes on the same level of their paths
///
/// When the nodes are not siblings of each other, everything after `left`
/// and everything before `right` counts.
fn num_strides(doc: &dyn Document, left: Option<NodeId>, right: Option<NodeId>) -> usize {
    let mut strides = 0;
    let mut sibling = left;
    loop {
        match sibling {
            Some(node) if Some(node) != right => {
                sibling = doc.next_sibling(node);
                if let Some(next) = sibling {
                    if Some(next) != right && !doc.is_whitespace(next) {
                        strides += 1;
                    }
                }
            }
            _ => break,
        }
    }
    if sibling != right {
        let mut cursor = right;
        while let Some(node) = cursor {
            cursor = doc.previous_sibling(node);
            if let Some(previous) = cursor {
                if !doc.is_whitespace(previous) {
                    strides += 1;
                }
            }
        }
    }
    strides
}

/// Topological distance between two nodes
///
/// Returns 0 for the same node and `f64::MAX` when one contains the other.
pub fn distance(doc: &dyn Document, a: NodeId, b: NodeId, costs: &DistanceCosts) -> f64 {
    if a == b {
        return 0.0;
    }
    if doc.contains(a, b) || doc.contains(b, a) {
        return f64::MAX;
    }

    let mut a_path = vec![a];
    let mut ancestor = a;
    while !doc.contains(ancestor, b) {
        match doc.parent(ancestor) {
            Some(parent) => {
                ancestor = parent;
                a_path.push(parent);
            }
            None => return f64::MAX,
        }
    }
    let mut b_path = vec![b];
    let mut cursor = b;
    while cursor != ancestor {
        match doc.parent(cursor) {
            Some(parent) => {
                cursor = parent;
                b_path.push(parent);
            }
            None => return f64::MAX,
        }
    }

    let (mut left, mut right) = match doc.document_order(a, b) {
        Ordering::Greater => (b_path, a_path),
        _ => (a_path, b_path),
    };

    let mut cost = 0.0;
    while !left.is_empty() || !right.is_empty() {
        let l = left.pop();
        let r = right.pop();
        cost += match (l, r) {
            (Some(l), Some(r)) if doc.tag_name(l) == doc.tag_name(r) => costs.same_tag_cost,
            (Some(_), Some(_)) => costs.different_tag_cost,
            _ => costs.different_depth_cost,
        };
        if costs.stride_cost != 0.0 {
            cost += num_strides(doc, l, r) as f64 * costs.stride_cost;
        }
    }
    cost
}

/// Distance between the centers of two nodes' bounding boxes
///
/// Nodes without a box are infinitely far from everything.
pub fn euclidean(doc: &dyn Document, a: NodeId, b: NodeId) -> f64 {
    match (doc.bounding_box(a), doc.bounding_box(b)) {
        (Some(a_box), Some(b_box)) => {
            let (ax, ay) = a_box.center();
            let (bx, by) = b_box.center();
            ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
        }
        _ => f64::MAX,
    }
}

/// Lower-triangular matrix of inter-cluster distances
///
/// Clusters are numbered in creation order; each row holds distances to the
/// clusters created before it, and a merged cluster is always numbered last.
struct DistanceMatrix {
    rows: BTreeMap<usize, BTreeMap<usize, f64>>,
    members: BTreeMap<usize, Vec<usize>>,
    next_id: usize,
}

impl DistanceMatrix {
    fn new<T>(items: &[T], distance: impl Fn(&T, &T) -> f64) -> Self {
        let mut rows = BTreeMap::new();
        let mut members = BTreeMap::new();
        for (outer, item) in items.iter().enumerate() {
            let row = (0..outer).map(|inner| (inner, distance(item, &items[inner]))).collect();
            rows.insert(outer, row);
            members.insert(outer, vec![outer]);
        }
        Self { rows, members, next_id: items.len() }
    }

    fn num_clusters(&self) -> usize {
        self.rows.len()
    }

    /// The closest pair; the first one found wins ties
    fn closest(&self) -> Option<(usize, usize, f64)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for (&outer, row) in &self.rows {
            for (&inner, &distance) in row {
                if best.is_none_or(|(_, _, best_distance)| distance < best_distance) {
                    best = Some((outer, inner, distance));
                }
            }
        }
        best
    }

    fn cached_distance(&self, a: usize, b: usize) -> f64 {
        self.rows
            .get(&a)
            .and_then(|row| row.get(&b))
            .or_else(|| self.rows.get(&b).and_then(|row| row.get(&a)))
            .copied()
            .unwrap_or(f64::MAX)
    }

    /// Replace two clusters with their union, keeping the smaller distance to
    /// every other cluster
    fn merge(&mut self, a: usize, b: usize) {
        let new_row: BTreeMap<usize, f64> = self
            .rows
            .keys()
            .filter(|&&other| other != a && other != b)
            .map(|&other| {
                let nearer = self.cached_distance(a, other).min(self.cached_distance(b, other));
                (other, nearer)
            })
            .collect();

        self.rows.remove(&a);
        self.rows.remove(&b);
        for row in self.rows.values_mut() {
            row.remove(&a);
            row.remove(&b);
        }

        let mut merged = self.members.remove(&a).unwrap_or_default();
        merged.extend(self.members.remove(&b).unwrap_or_default());

        let id = self.next_id;
        self.next_id += 1;
        self.rows.insert(id, new_row);
        self.members.insert(id, merged);
    }

    fn into_clusters(self) -> Vec<Vec<usize>> {
        self.members.into_values().collect()
    }
}

/// Partition `items` by single-linkage agglomerative clustering
///
/// Merging stops once the closest two clusters are at least
/// `splitting_distance` apart. Empty input yields no clusters.
pub fn clusters<T: Clone>(
    items: &[T],
    splitting_distance: f64,
    distance: impl Fn(&T, &T) -> f64,
) -> Vec<Vec<T>> {
    let mut matrix = DistanceMatrix::new(items, distance);
    while matrix.num_clusters() > 1 {
        match matrix.closest() {
            Some((a, b, closest)) if closest < splitting_distance => matrix.merge(a, b),
            _ => break,
        }
    }
    matrix
        .into_clusters()
        .into_iter()
        .map(|cluster| cluster.into_iter().map(|index| items[index].clone()).collect())
        .collect()
}
