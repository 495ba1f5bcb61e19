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

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Floor for the in-memory compressed node cache, regardless of what a
/// caller configures. Below this the coordinator would thrash disk spills
/// on any nontrivial build.
pub const MIN_CACHE_BUDGET_MB: u64 = 200;

/// Threshold used by the post-pass to fold a small child's tile into its
/// parent (see `manifest::coalesce`).
pub const DEFAULT_SMALL_NODE_THRESHOLD: usize = 100;

/// Everything the coordinator and node engine need to know to run a build.
/// Intentionally plain data: no trait objects, no global state. A caller
/// assembles one of these (by hand, or by deserializing it) and hands it to
/// `crate::build`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Number of worker tasks. Defaults to the number of logical CPUs.
    pub workers: usize,

    /// Ceiling, in megabytes, for the compressed in-memory node cache.
    /// Floored to `MIN_CACHE_BUDGET_MB` by `normalized_cache_budget_mb`.
    pub cache_budget_mb: u64,

    /// Whether RGB colors are read from the source and written to tiles.
    pub include_rgb: bool,

    /// Uniform scale applied to input points, after subtracting
    /// `root_offset` and before `root_rotation`.
    pub root_scale: f64,

    /// Translation subtracted from every input point before scaling.
    pub root_offset: Vector3<f64>,

    /// Optional alignment rotation, applied after scaling. `None` is the
    /// identity.
    pub root_rotation: Option<[[f64; 3]; 3]>,

    /// Minimum point count for a node's tile to stand on its own; smaller
    /// tiles are folded into their parent during the manifest post-pass.
    pub small_node_threshold: usize,

    /// Progress/diagnostic verbosity. 0 is silent.
    pub verbosity: u8,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            workers: num_cpus::get(),
            cache_budget_mb: MIN_CACHE_BUDGET_MB,
            include_rgb: true,
            root_scale: 1.0,
            root_offset: Vector3::new(0.0, 0.0, 0.0),
            root_rotation: None,
            small_node_threshold: DEFAULT_SMALL_NODE_THRESHOLD,
            verbosity: 1,
        }
    }
}

impl BuildConfig {
    pub fn normalized_cache_budget_mb(&self) -> u64 {
        self.cache_budget_mb.max(MIN_CACHE_BUDGET_MB)
    }

    pub fn normalized_workers(&self) -> usize {
        self.workers.max(1)
    }

    /// Applies offset, scale and optional rotation to a raw input point,
    /// producing the builder-local coordinate the octree is built in.
    pub fn to_local(&self, p: Point3<f64>) -> Point3<f64> {
        let shifted = (p - self.root_offset) * self.root_scale;
        match &self.root_rotation {
            None => shifted,
            Some(r) => Point3::new(
                r[0][0] * shifted.x + r[0][1] * shifted.y + r[0][2] * shifted.z,
                r[1][0] * shifted.x + r[1][1] * shifted.y + r[1][2] * shifted.z,
                r[2][0] * shifted.x + r[2][1] * shifted.y + r[2][2] * shifted.z,
            ),
        }
    }
}

/// Picks the uniform scale applied to a cloud given its coarsest
/// (root-level) point spacing, matching the thresholds an upstream
/// reprojection/offset step is expected to feed into `BuildConfig`.
pub fn root_scale_from_spacing(spacing: f64) -> f64 {
    if spacing > 10.0 {
        0.01
    } else if spacing > 1.0 {
        0.1
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_scale_from_spacing() {
        assert_eq!(root_scale_from_spacing(50.0), 0.01);
        assert_eq!(root_scale_from_spacing(5.0), 0.1);
        assert_eq!(root_scale_from_spacing(0.5), 1.0);
    }

    #[test]
    fn test_cache_budget_is_floored() {
        let mut config = BuildConfig::default();
        config.cache_budget_mb = 10;
        assert_eq!(config.normalized_cache_budget_mb(), MIN_CACHE_BUDGET_MB);
    }

    #[test]
    fn test_to_local_applies_offset_and_scale() {
        let mut config = BuildConfig::default();
        config.root_offset = Vector3::new(1.0, 2.0, 3.0);
        config.root_scale = 2.0;
        let local = config.to_local(Point3::new(2.0, 2.0, 4.0));
        assert_eq!(local, Point3::new(2.0, 0.0, 2.0));
    }
}
