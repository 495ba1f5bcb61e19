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

use super::SubdivisionType;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box in builder-local coordinates.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Aabb {
    mins: Point3<f64>,
    maxs: Point3<f64>,
}

impl Aabb {
    pub fn new(mins: Point3<f64>, maxs: Point3<f64>) -> Self {
        Aabb { mins, maxs }
    }

    pub fn min(&self) -> &Point3<f64> {
        &self.mins
    }

    pub fn max(&self) -> &Point3<f64> {
        &self.maxs
    }

    pub fn size(&self) -> Vector3<f64> {
        self.maxs - self.mins
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.mins, &self.maxs)
    }

    pub fn grow(&mut self, p: Point3<f64>) {
        self.mins = nalgebra::inf(&self.mins, &p);
        self.maxs = nalgebra::sup(&self.maxs, &p);
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        nalgebra::partial_le(&self.mins, p) && nalgebra::partial_le(p, &self.maxs)
    }

    pub fn corners(&self) -> [Point3<f64>; 8] {
        [
            self.mins,
            Point3::new(self.maxs.x, self.mins.y, self.mins.z),
            Point3::new(self.mins.x, self.maxs.y, self.mins.z),
            Point3::new(self.maxs.x, self.maxs.y, self.mins.z),
            Point3::new(self.mins.x, self.mins.y, self.maxs.z),
            Point3::new(self.maxs.x, self.mins.y, self.maxs.z),
            Point3::new(self.mins.x, self.maxs.y, self.maxs.z),
            self.maxs,
        ]
    }

    /// Classifies how this node subdivides, recomputed at every level: a
    /// node whose Z extent is small relative to its footprint subdivides
    /// only in X/Y.
    pub fn subdivision_type(&self) -> SubdivisionType {
        let size = self.size();
        let footprint = size.x.min(size.y);
        if footprint > 0.0 && size.z / footprint < 0.5 {
            SubdivisionType::Quadtree
        } else {
            SubdivisionType::Octree
        }
    }

    /// Returns the child AABB for `child_index` (0..8), halving this AABB
    /// along the axes selected by the index's bits: bit 2 is +x, bit 1 is
    /// +y, bit 0 is +z. When this node is a quadtree, bit 0 is ignored and
    /// the child inherits the full Z range.
    pub fn split(&self, child_index: u8) -> Aabb {
        assert!(child_index < 8, "child index out of range: {}", child_index);
        let center = self.center();
        let is_quadtree = self.subdivision_type() == SubdivisionType::Quadtree;

        let (x_min, x_max) = if child_index & 0b100 != 0 {
            (center.x, self.maxs.x)
        } else {
            (self.mins.x, center.x)
        };
        let (y_min, y_max) = if child_index & 0b010 != 0 {
            (center.y, self.maxs.y)
        } else {
            (self.mins.y, center.y)
        };
        let (z_min, z_max) = if is_quadtree {
            (self.mins.z, self.maxs.z)
        } else if child_index & 0b001 != 0 {
            (center.z, self.maxs.z)
        } else {
            (self.mins.z, center.z)
        };

        Aabb::new(
            Point3::new(x_min, y_min, z_min),
            Point3::new(x_max, y_max, z_max),
        )
    }

    /// The child index a point falls into, given this node's center. Bit 2
    /// is set when the point is at or past the center in X, bit 1 for Y,
    /// bit 0 for Z (masked away for quadtree nodes).
    pub fn child_index_for(&self, p: &Point3<f64>) -> u8 {
        let center = self.center();
        let is_quadtree = self.subdivision_type() == SubdivisionType::Quadtree;
        let mut index = 0u8;
        if p.x >= center.x {
            index |= 0b100;
        }
        if p.y >= center.y {
            index |= 0b010;
        }
        if !is_quadtree && p.z >= center.z {
            index |= 0b001;
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_octree_covers_parent() {
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 2.0, 2.0));
        assert_eq!(aabb.subdivision_type(), SubdivisionType::Octree);
        for index in 0u8..8 {
            let child = aabb.split(index);
            assert!(aabb.contains(child.min()));
            assert!(aabb.contains(child.max()));
        }
        // opposite corners differ in every axis
        let c0 = aabb.split(0);
        let c7 = aabb.split(7);
        assert_eq!(*c0.min(), Point3::new(0.0, 0.0, 0.0));
        assert_eq!(*c7.max(), Point3::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn test_quadtree_children_share_full_z_range() {
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(100.0, 100.0, 1.0));
        assert_eq!(aabb.subdivision_type(), SubdivisionType::Quadtree);
        for index in 0u8..8 {
            let child = aabb.split(index);
            assert_eq!(child.min().z, aabb.min().z);
            assert_eq!(child.max().z, aabb.max().z);
        }
    }

    #[test]
    fn test_child_index_for_roundtrips_split() {
        let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 2.0, 2.0));
        for index in 0u8..8 {
            let child = aabb.split(index);
            let p = child.center();
            assert_eq!(aabb.child_index_for(&p), index);
        }
    }
}
