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

use crate::math::{Aabb, SubdivisionType};
use fnv::FnvHashMap;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// A cell stops accepting new neighbors without a rebalance once it holds
/// this many points; a single run-away cell this large also means the grid
/// as a whole needs more resolution.
const BALANCE_THRESHOLD: usize = 200_000;

const MAX_CELL_COUNT: u8 = 8;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Cell {
    xyz: Vec<Point3<f64>>,
    rgb: Vec<[u8; 3]>,
}

impl Cell {
    fn accepts(&self, p: &Point3<f64>, spacing_sq: f64) -> bool {
        self.xyz
            .iter()
            .rev()
            .all(|q| nalgebra::distance_squared(q, p) >= spacing_sq)
    }

    fn push(&mut self, p: Point3<f64>, rgb: [u8; 3]) {
        self.xyz.push(p);
        self.rgb.push(rgb);
    }
}

/// A sparse, per-node uniform grid used to greedily thin points to a
/// minimum spacing. Starts at 3x3x3 (or 3x3x1 under a quadtree node) and
/// grows one cell per axis at a time when a cell gets overloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    aabb: Aabb,
    spacing: f64,
    subdivision: SubdivisionType,
    cell_count: [u8; 3],
    cells: FnvHashMap<u32, Cell>,
}

impl Grid {
    pub fn new(aabb: Aabb, spacing: f64) -> Self {
        let subdivision = aabb.subdivision_type();
        let cell_count = match subdivision {
            SubdivisionType::Octree => [3, 3, 3],
            SubdivisionType::Quadtree => [3, 3, 1],
        };
        Grid {
            aabb,
            spacing,
            subdivision,
            cell_count,
            cells: FnvHashMap::default(),
        }
    }

    fn shift(&self) -> u32 {
        index_bits(*self.cell_count.iter().max().unwrap())
    }

    fn key_for(&self, p: &Point3<f64>) -> u32 {
        let size = self.aabb.size();
        let min = self.aabb.min();
        let cx = cell_index(p.x, min.x, size.x, self.cell_count[0]);
        let cy = cell_index(p.y, min.y, size.y, self.cell_count[1]);
        let cz = cell_index(p.z, min.z, size.z, self.cell_count[2]);
        let shift = self.shift();
        (cx as u32) | ((cy as u32) << shift) | ((cz as u32) << (2 * shift))
    }

    /// Attempts to insert `p`/`rgb`. Returns true if accepted (retained),
    /// false if it was rejected by the spacing test and should be routed to
    /// `pending` for the geometric child instead.
    pub fn insert(&mut self, p: Point3<f64>, rgb: [u8; 3]) -> bool {
        let key = self.key_for(&p);
        let spacing_sq = self.spacing * self.spacing;
        let cell = self.cells.entry(key).or_default();
        if cell.accepts(&p, spacing_sq) {
            cell.push(p, rgb);
            true
        } else {
            false
        }
    }

    /// True once any cell has grown past the balance threshold while there
    /// is still room to add another cell per axis.
    pub fn needs_balance(&self) -> bool {
        self.cell_count[0] < MAX_CELL_COUNT
            && self.cells.values().any(|c| c.xyz.len() > BALANCE_THRESHOLD)
    }

    /// Grows the grid by one cell per axis (z stays fixed under a quadtree
    /// node) and force-reinserts every currently retained point. Points
    /// already satisfy the spacing invariant pairwise, so reinsertion here
    /// never re-runs the distance test.
    pub fn rebalance(&mut self) {
        self.cell_count[0] += 1;
        self.cell_count[1] += 1;
        if self.subdivision == SubdivisionType::Octree {
            self.cell_count[2] += 1;
        }
        let old_cells = std::mem::take(&mut self.cells);
        for (_, cell) in old_cells.into_iter() {
            for (p, rgb) in cell.xyz.into_iter().zip(cell.rgb.into_iter()) {
                let key = self.key_for(&p);
                self.cells.entry(key).or_default().push(p, rgb);
            }
        }
    }

    /// All retained points, concatenated in ascending cell-key order. The
    /// order within and across cells beyond that is unspecified.
    pub fn get_all_points(&self) -> (Vec<Point3<f64>>, Vec<[u8; 3]>) {
        let mut keys: Vec<&u32> = self.cells.keys().collect();
        keys.sort_unstable();
        let mut xyz = Vec::new();
        let mut rgb = Vec::new();
        for key in keys {
            let cell = &self.cells[key];
            xyz.extend_from_slice(&cell.xyz);
            rgb.extend_from_slice(&cell.rgb);
        }
        (xyz, rgb)
    }

    pub fn point_count(&self) -> usize {
        self.cells.values().map(|c| c.xyz.len()).sum()
    }
}

fn index_bits(n: u8) -> u32 {
    let mut bits = 0;
    while (1u32 << bits) < n as u32 {
        bits += 1;
    }
    bits
}

fn cell_index(v: f64, min: f64, size: f64, count: u8) -> u8 {
    if size <= 0.0 {
        return 0;
    }
    let raw = ((v - min) * count as f64 / size).floor();
    raw.max(0.0).min((count - 1) as f64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_aabb() -> Aabb {
        Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_empty_cell_accepts_first_point_unconditionally() {
        let mut grid = Grid::new(unit_aabb(), 0.5);
        assert!(grid.insert(Point3::new(0.1, 0.1, 0.1), [0, 0, 0]));
    }

    #[test]
    fn test_rejects_point_too_close_in_same_cell() {
        let mut grid = Grid::new(unit_aabb(), 0.5);
        assert!(grid.insert(Point3::new(0.1, 0.1, 0.1), [0, 0, 0]));
        assert!(!grid.insert(Point3::new(0.11, 0.1, 0.1), [0, 0, 0]));
    }

    #[test]
    fn test_accepts_point_far_enough_in_same_cell() {
        let mut grid = Grid::new(Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(3.0, 3.0, 3.0)), 0.5);
        assert!(grid.insert(Point3::new(0.1, 0.1, 0.1), [0, 0, 0]));
        assert!(grid.insert(Point3::new(0.9, 0.1, 0.1), [0, 0, 0]));
    }

    #[test]
    fn test_rebalance_preserves_all_points() {
        let mut grid = Grid::new(unit_aabb(), 1e-6);
        for i in 0..50 {
            let v = i as f64 / 50.0;
            grid.insert(Point3::new(v, v, v), [0, 0, 0]);
        }
        let before = grid.point_count();
        grid.rebalance();
        assert_eq!(grid.point_count(), before);
    }

    #[test]
    fn test_quadtree_grid_never_grows_z() {
        let thin = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 0.1));
        let mut grid = Grid::new(thin, 1e-6);
        assert_eq!(grid.cell_count[2], 1);
        grid.rebalance();
        assert_eq!(grid.cell_count[2], 1);
        assert_eq!(grid.cell_count[0], 4);
    }
}
