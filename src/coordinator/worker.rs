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

use super::cache::NodeCache;
use crate::catalog::Catalog;
use crate::errors::*;
use crate::math::NodeName;
use crate::tile_format::{self, Tile};
use nalgebra::Point3;
use std::path::Path;

/// How many levels a single worker is allowed to flush into its subtree
/// before it must stop and hand the remainder back (as re-queued work, in
/// the fully streaming design; here, since a worker owns its whole subtree
/// until input is exhausted, this bounds one `flush` call's recursion so a
/// pathologically deep subtree still yields control periodically).
pub fn halt_at_depth(depth: usize) -> usize {
    match depth {
        0 => 1,
        1..=2 => 1,
        3..=4 => 2,
        5..=6 => 3,
        _ => 5,
    }
}

/// Drains `name`'s own pending buffer into its children, unconditionally
/// (the first `take_pending` below always empties it), then continues
/// flushing into descendants up to `halt_at_depth(name.depth())` levels
/// before stopping. Any pending created deeper than that bound (e.g. by a
/// child splitting under the load it was just handed) is left in place for
/// the caller to reach by recursing further down itself.
pub fn flush_node(catalog: &mut Catalog, name: &NodeName, scale: f64) -> Result<()> {
    flush_node_bounded(catalog, name, scale, halt_at_depth(name.depth()))
}

fn flush_node_bounded(catalog: &mut Catalog, name: &NodeName, scale: f64, budget: usize) -> Result<()> {
    let grouped = catalog.get_node(name).take_pending();
    for (index, xyz, rgb) in grouped {
        let child_name = name.child(index);
        catalog.get_node(&child_name).insert(scale, &xyz, &rgb, false);
        if budget > 0 {
            flush_node_bounded(catalog, &child_name, scale, budget - 1)?;
        }
    }
    Ok(())
}

/// Fully drains the subtree rooted at `name`: flushes `name`'s own cone,
/// then recurses into every child it now has so any pending left behind
/// past the cone's bound — or created by a deeper split — still gets
/// walked all the way down, rather than only ever re-flushing `name`
/// itself (whose own pending is already empty after the first call).
/// Points only ever propagate downward, so once this call returns, nothing
/// under `name` will receive another point; `evict_node` relies on that to
/// safely spill settled nodes out of memory as the recursion unwinds.
pub fn drain_subtree(catalog: &mut Catalog, name: &NodeName, scale: f64, cache: &mut NodeCache) -> Result<()> {
    flush_node(catalog, name, scale)?;
    let children = catalog.get_node(name).children().cloned();
    if let Some(children) = children {
        for index in children {
            let child_name = name.child(index);
            drain_subtree(catalog, &child_name, scale, cache)?;
        }
    }
    evict_node(catalog, name, cache)
}

/// Dumps `name` alone (not its descendants, which — if present — already
/// evicted themselves on the way back up the recursion in `drain_subtree`)
/// to a compressed blob in `cache` and drops it from the catalog, bounding
/// how much of a fully-drained subtree stays resident in memory at once.
/// Spills the whole cache to disk if the accounted size crosses its budget.
fn evict_node(catalog: &mut Catalog, name: &NodeName, cache: &mut NodeCache) -> Result<()> {
    if !catalog.contains(name) {
        return Ok(());
    }
    let blob = catalog.dump(name, 0)?;
    catalog.remove(name);
    cache.insert(name.clone(), blob);
    if cache.needs_flush() {
        cache.flush_all()?;
    }
    Ok(())
}

/// Brings `name` back into the catalog if `evict_node` spilled it out,
/// reading it from the in-memory cache or, failing that, the spill
/// directory it was flushed to. A no-op if the node was never evicted (or
/// never existed).
fn ensure_loaded(catalog: &mut Catalog, name: &NodeName, cache: &mut NodeCache) -> Result<()> {
    if catalog.contains(name) {
        return Ok(());
    }
    if let Some(blob) = cache.reload(name)? {
        catalog.load(&blob)?;
    }
    Ok(())
}

/// Writes every node in the subtree rooted at `name` to its own `.pnts`
/// file under `output_dir`, recursing through its children set. Nodes that
/// `drain_subtree` evicted to `cache` are reloaded on touch, one at a time,
/// so emission never needs more than the current path resident at once.
/// A node with zero retained points still in the tree is skipped (it only
/// exists transiently as a routing hop).
pub fn emit_subtree(
    catalog: &mut Catalog,
    name: &NodeName,
    cache: &mut NodeCache,
    output_dir: &Path,
    include_rgb: bool,
) -> Result<usize> {
    ensure_loaded(catalog, name, cache)?;
    let mut total = 0;
    if let Some(node) = catalog.peek_node(name) {
        let (xyz, rgb) = node.get_points();
        let children = node.children().cloned();
        if !xyz.is_empty() {
            let tile = Tile {
                xyz: xyz.iter().map(|p| Point3::new(p.x as f32, p.y as f32, p.z as f32)).collect(),
                rgb: if include_rgb { Some(rgb) } else { None },
                rtc_center: None,
            };
            let path = output_dir.join(name.to_file_path()).with_extension("pnts");
            let mut writer = tile_format::TileWriter::create(path)?;
            writer.write_tile(&tile)?;
            total += tile.xyz.len();
        }
        if let Some(children) = children {
            for &index in &children {
                total += emit_subtree(catalog, &name.child(index), cache, output_dir, include_rgb)?;
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Aabb;
    use nalgebra::Point3;
    use tempdir::TempDir;

    #[test]
    fn test_halt_at_depth_matches_policy_table() {
        assert_eq!(halt_at_depth(0), 1);
        assert_eq!(halt_at_depth(1), 1);
        assert_eq!(halt_at_depth(2), 1);
        assert_eq!(halt_at_depth(3), 2);
        assert_eq!(halt_at_depth(4), 2);
        assert_eq!(halt_at_depth(5), 3);
        assert_eq!(halt_at_depth(6), 3);
        assert_eq!(halt_at_depth(7), 5);
        assert_eq!(halt_at_depth(100), 5);
    }

    #[test]
    fn test_evict_then_reload_round_trip_preserves_points() {
        let dir = TempDir::new("worker_evict").unwrap();
        let root_aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 2.0, 2.0));
        let mut catalog = Catalog::new(root_aabb, 1.0);
        let name = NodeName::root();
        catalog
            .get_node(&name)
            .insert(1.0, &[Point3::new(0.5, 0.5, 0.5)], &[[1, 2, 3]], false);

        let mut cache = NodeCache::new(200, dir.path());
        evict_node(&mut catalog, &name, &mut cache).unwrap();
        assert!(!catalog.contains(&name));

        ensure_loaded(&mut catalog, &name, &mut cache).unwrap();
        assert_eq!(catalog.peek_node(&name).unwrap().point_count(), 1);
    }

    /// Reproduces the scenario the finalization bug hid in: every point
    /// sits at the exact same spot, so each split's grid replay accepts
    /// exactly one point and rejects the rest into the same child index,
    /// cascading several levels deeper than any single `halt_at_depth`
    /// cone reaches in one call. A `drain_subtree` that only ever
    /// re-flushed the unchanged root would spin forever (or, short of
    /// that, silently strand the deeper levels' pending points). This
    /// must terminate and conserve every point.
    #[test]
    fn test_drain_subtree_resolves_cascades_beyond_a_single_cone() {
        let root_aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 2.0, 2.0));
        let root_spacing = 10.0;
        let mut catalog = Catalog::new(root_aabb, root_spacing);
        let root_name = NodeName::root();

        let count = 20_005;
        let xyz = vec![Point3::new(0.1, 0.1, 0.1); count];
        let rgb = vec![[0u8, 0, 0]; count];
        catalog.get_node(&root_name).insert(1.0, &xyz, &rgb, false);

        let dir = TempDir::new("worker_drain_cascade").unwrap();
        let mut cache = NodeCache::new(200, dir.path());
        drain_subtree(&mut catalog, &root_name, 1.0, &mut cache).unwrap();

        let mut retained = 0;
        let mut name = root_name;
        loop {
            ensure_loaded(&mut catalog, &name, &mut cache).unwrap();
            let node = catalog.peek_node(&name).expect("evicted node must reload");
            assert_eq!(node.pending_len(), 0, "node {} still has pending after drain", name);
            retained += node.point_count();
            match node.children().and_then(|c| c.iter().next().copied()) {
                Some(index) => name = name.child(index),
                None => break,
            }
        }
        assert_eq!(retained, count, "mass must be conserved across the whole cascade");
    }
}
