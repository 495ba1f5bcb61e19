// Copyright 2016 The Cartographer Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::grid::Grid;
use crate::math::{Aabb, NodeName};
use fnv::FnvHashSet;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// A leaf splits once it holds at least this many points, unless it has
/// already hit the spacing floor below.
const SPLIT_POINT_COUNT: usize = 20_000;

/// Below this fraction of the root scale, spacing has converged enough
/// that further subdivision would not change the retained point set; the
/// node becomes a permanent leaf.
const SPLIT_SPACING_FACTOR: f64 = 1e-3;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum NodeState {
    Leaf {
        xyz: Vec<Point3<f64>>,
        rgb: Vec<[u8; 3]>,
    },
    Branch {
        grid: Grid,
        children: FnvHashSet<u8>,
        pending: Vec<(u8, Point3<f64>, [u8; 3])>,
    },
}

/// One node of the octree under construction. Owns either an unsplit
/// accumulation buffer (leaf) or a distance-filtering grid plus a routing
/// buffer for points rejected down to children (branch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: NodeName,
    pub aabb: Aabb,
    pub spacing: f64,
    state: NodeState,
    pub dirty: bool,
}

impl Node {
    pub fn new_leaf(name: NodeName, aabb: Aabb, spacing: f64) -> Self {
        Node {
            name,
            aabb,
            spacing,
            state: NodeState::Leaf {
                xyz: Vec::new(),
                rgb: Vec::new(),
            },
            dirty: false,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.state, NodeState::Leaf { .. })
    }

    pub fn children(&self) -> Option<&FnvHashSet<u8>> {
        match &self.state {
            NodeState::Branch { children, .. } => Some(children),
            NodeState::Leaf { .. } => None,
        }
    }

    pub fn point_count(&self) -> usize {
        match &self.state {
            NodeState::Leaf { xyz, .. } => xyz.len(),
            NodeState::Branch { grid, pending, .. } => grid.point_count() + pending.len(),
        }
    }

    /// All points currently retained directly in this node (its leaf
    /// buffer, or its grid's cells if it is a branch). Does not include
    /// `pending`, which belongs conceptually to the children.
    pub fn get_points(&self) -> (Vec<Point3<f64>>, Vec<[u8; 3]>) {
        match &self.state {
            NodeState::Leaf { xyz, rgb } => (xyz.clone(), rgb.clone()),
            NodeState::Branch { grid, .. } => grid.get_all_points(),
        }
    }

    /// Inserts a batch of points into this node. `make_empty` is the fast
    /// path used when the caller already knows every point must be routed
    /// to a child without being tested here (e.g. forcing descent through
    /// an intermediate node the reader knows is non-terminal); it enqueues
    /// directly into `pending` and marks the node as a (possibly still
    /// empty) branch.
    pub fn insert(&mut self, scale: f64, xyz: &[Point3<f64>], rgb: &[[u8; 3]], make_empty: bool) {
        debug_assert_eq!(xyz.len(), rgb.len());
        if xyz.is_empty() {
            return;
        }
        self.dirty = true;

        if make_empty {
            self.ensure_branch();
            if let NodeState::Branch {
                children, pending, ..
            } = &mut self.state
            {
                for (p, c) in xyz.iter().zip(rgb.iter()) {
                    let index = self.aabb.child_index_for(p);
                    children.insert(index);
                    pending.push((index, *p, *c));
                }
            }
            return;
        }

        match &mut self.state {
            NodeState::Leaf {
                xyz: leaf_xyz,
                rgb: leaf_rgb,
            } => {
                leaf_xyz.extend_from_slice(xyz);
                leaf_rgb.extend_from_slice(rgb);
                if leaf_xyz.len() >= SPLIT_POINT_COUNT && self.spacing > SPLIT_SPACING_FACTOR * scale
                {
                    self.split();
                }
            }
            NodeState::Branch {
                grid,
                children: _,
                pending,
            } => {
                for (p, c) in xyz.iter().zip(rgb.iter()) {
                    if !grid.insert(*p, *c) {
                        let index = self.aabb.child_index_for(p);
                        pending.push((index, *p, *c));
                    }
                }
                if grid.needs_balance() {
                    grid.rebalance();
                }
            }
        }
    }

    fn ensure_branch(&mut self) {
        if let NodeState::Leaf { .. } = &self.state {
            self.state = NodeState::Branch {
                grid: Grid::new(self.aabb, self.spacing),
                children: FnvHashSet::default(),
                pending: Vec::new(),
            };
        }
    }

    /// Converts a leaf into a branch and replays every previously buffered
    /// point through the (fresh, 3x3x3) grid, in original accumulation
    /// order. Points the grid rejects become `pending` for their child.
    fn split(&mut self) {
        let (old_xyz, old_rgb) = match &mut self.state {
            NodeState::Leaf { xyz, rgb } => (std::mem::take(xyz), std::mem::take(rgb)),
            NodeState::Branch { .. } => return,
        };
        self.state = NodeState::Branch {
            grid: Grid::new(self.aabb, self.spacing),
            children: FnvHashSet::default(),
            pending: Vec::new(),
        };
        if let NodeState::Branch { grid, pending, .. } = &mut self.state {
            for (p, c) in old_xyz.into_iter().zip(old_rgb.into_iter()) {
                if !grid.insert(p, c) {
                    let index = self.aabb.child_index_for(&p);
                    pending.push((index, p, c));
                }
            }
        }
    }

    /// Drains `pending`, grouped by child index, for the caller (the
    /// coordinator, bounded by `halt_at_depth`) to recursively insert into
    /// the named children. Returns `(child_index, xyz, rgb)` triples; the
    /// node's `children` set already reflects every index returned here
    /// plus any index that received points previously.
    pub fn take_pending(&mut self) -> Vec<(u8, Vec<Point3<f64>>, Vec<[u8; 3]>)> {
        let pending = match &mut self.state {
            NodeState::Branch { pending, .. } => std::mem::take(pending),
            NodeState::Leaf { .. } => return Vec::new(),
        };
        if let NodeState::Branch { children, .. } = &mut self.state {
            for (index, _, _) in &pending {
                children.insert(*index);
            }
        }
        let mut grouped: std::collections::BTreeMap<u8, (Vec<Point3<f64>>, Vec<[u8; 3]>)> =
            std::collections::BTreeMap::new();
        for (index, p, c) in pending {
            let entry = grouped.entry(index).or_default();
            entry.0.push(p);
            entry.1.push(c);
        }
        grouped
            .into_iter()
            .map(|(index, (xyz, rgb))| (index, xyz, rgb))
            .collect()
    }

    /// Number of points still buffered in `pending`, not yet routed to a
    /// child. Used by the coordinator to decide whether a halted node's
    /// leftover pending set is worth serializing and re-queueing.
    pub fn pending_len(&self) -> usize {
        match &self.state {
            NodeState::Branch { pending, .. } => pending.len(),
            NodeState::Leaf { .. } => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(aabb: Aabb, spacing: f64) -> Node {
        Node::new_leaf(NodeName::root(), aabb, spacing)
    }

    #[test]
    fn test_leaf_accumulates_until_split_threshold() {
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let mut node = root(aabb, 100.0);
        let xyz = vec![Point3::new(0.5, 0.5, 0.5); 10];
        let rgb = vec![[1, 2, 3]; 10];
        node.insert(1.0, &xyz, &rgb, false);
        assert!(node.is_leaf());
        assert_eq!(node.point_count(), 10);
    }

    #[test]
    fn test_leaf_splits_on_count_and_spacing() {
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let mut node = root(aabb, 1.0);
        let xyz: Vec<Point3<f64>> = (0..20_000)
            .map(|i| Point3::new((i % 100) as f64 / 100.0, (i / 100 % 100) as f64 / 100.0, 0.5))
            .collect();
        let rgb = vec![[0, 0, 0]; xyz.len()];
        node.insert(1.0, &xyz, &rgb, false);
        assert!(!node.is_leaf());
    }

    #[test]
    fn test_leaf_does_not_split_below_spacing_floor() {
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        // spacing <= 1e-3 * scale(=1.0) is the hard stop.
        let mut node = root(aabb, 1e-4);
        let xyz: Vec<Point3<f64>> = (0..20_000)
            .map(|i| Point3::new((i % 100) as f64 / 100.0, (i / 100 % 100) as f64 / 100.0, 0.5))
            .collect();
        let rgb = vec![[0, 0, 0]; xyz.len()];
        node.insert(1.0, &xyz, &rgb, false);
        assert!(node.is_leaf());
    }

    #[test]
    fn test_make_empty_routes_to_pending_without_filtering() {
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 2.0, 2.0));
        let mut node = root(aabb, 1.0);
        let xyz = vec![Point3::new(0.1, 0.1, 0.1), Point3::new(1.9, 1.9, 1.9)];
        let rgb = vec![[0, 0, 0]; 2];
        node.insert(1.0, &xyz, &rgb, true);
        assert!(!node.is_leaf());
        let grouped = node.take_pending();
        let total: usize = grouped.iter().map(|(_, x, _)| x.len()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_split_rejects_go_to_pending_for_correct_child() {
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 2.0, 2.0));
        let mut node = root(aabb, 0.5);
        // two points in the same cell, too close together: second is rejected.
        let xyz: Vec<Point3<f64>> = (0..SPLIT_POINT_COUNT)
            .map(|i| {
                if i == 0 {
                    Point3::new(0.1, 0.1, 0.1)
                } else if i == 1 {
                    Point3::new(0.11, 0.1, 0.1)
                } else {
                    Point3::new(1.9, 1.9, 1.9)
                }
            })
            .collect();
        let rgb = vec![[0, 0, 0]; xyz.len()];
        node.insert(1.0, &xyz, &rgb, false);
        assert!(!node.is_leaf());
        let grouped = node.take_pending();
        assert!(grouped.iter().any(|(index, _, _)| *index == 0));
    }
}
