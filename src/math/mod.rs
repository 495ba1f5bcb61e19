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

use serde::{Deserialize, Serialize};

pub mod aabb;
pub mod node_name;

pub use aabb::Aabb;
pub use node_name::NodeName;

/// How a node's children are laid out: a normal octree node splits all
/// three axes; a node whose footprint dwarfs its thickness (e.g. a road
/// corridor scan) splits only X/Y and its children share its full Z range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubdivisionType {
    Octree,
    Quadtree,
}

/// Spacing halves once per level, starting from a root spacing that is
/// `norm(aabb.size()) / 125`, a constant chosen so that a root-sized cloud
/// with typical point density starts well above its points' natural
/// separation and converges after a handful of levels.
pub fn compute_root_spacing(aabb: &Aabb) -> f64 {
    aabb.size().norm() / 125.0
}
