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

use crate::errors::*;
use crate::math::NodeName;
use crate::tile_format::{self, Tile};
use fnv::FnvHashMap;
use nalgebra::Point3;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Size, in bytes of serialized JSON, past which a subtree is written out
/// as its own `tileset.<name>.json` and referenced by URI instead of being
/// inlined in its parent.
const EXTERNAL_MANIFEST_THRESHOLD: usize = 100_000;

#[derive(Debug, Clone, Serialize)]
struct BoundingVolume {
    #[serde(rename = "box")]
    box_: [f64; 12],
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    uri: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TilesetNode {
    #[serde(skip)]
    name: NodeName,
    #[serde(rename = "boundingVolume")]
    bounding_volume: BoundingVolume,
    #[serde(rename = "geometricError")]
    geometric_error: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refine: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<TilesetNode>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "transform")]
    transform: Option<[f64; 16]>,
}

#[derive(Debug, Clone, Serialize)]
struct Asset {
    version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tileset {
    asset: Asset,
    #[serde(rename = "geometricError")]
    geometric_error: f64,
    root: TilesetNode,
}

fn to_f64(p: &Point3<f32>) -> Point3<f64> {
    Point3::new(p.x as f64, p.y as f64, p.z as f64)
}

fn bounding_box_array(xyz: &[Point3<f32>]) -> [f64; 12] {
    let (mut min, mut max) = if xyz.is_empty() {
        (Point3::origin(), Point3::origin())
    } else {
        (to_f64(&xyz[0]), to_f64(&xyz[0]))
    };
    for p in xyz {
        let p = to_f64(p);
        min = nalgebra::inf(&min, &p);
        max = nalgebra::sup(&max, &p);
    }
    let center = nalgebra::center(&min, &max);
    let half = (max - min) / 2.0;
    [
        center.x, center.y, center.z,
        half.x, 0.0, 0.0,
        0.0, half.y, 0.0,
        0.0, 0.0, half.z,
    ]
}

fn tile_path(output_dir: &Path, name: &NodeName) -> std::path::PathBuf {
    output_dir.join(name.to_file_path()).with_extension("pnts")
}

/// Scans `output_dir` for every `r*.pnts` tile the build emitted and
/// derives the parent -> {child indices} map purely from the set of names
/// present, so the post-pass needs no other bookkeeping from the build
/// itself.
fn discover_children(output_dir: &Path) -> Result<FnvHashMap<NodeName, Vec<u8>>> {
    let mut children: FnvHashMap<NodeName, Vec<u8>> = FnvHashMap::default();
    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pnts") {
            continue;
        }
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s,
            None => continue,
        };
        let name = match NodeName::from_str(stem) {
            Ok(n) => n,
            Err(_) => continue,
        };
        if let Some(parent) = name.parent() {
            let last = *name.path().last().unwrap();
            children.entry(parent).or_default().push(last);
        }
        children.entry(name).or_default();
    }
    for indices in children.values_mut() {
        indices.sort_unstable();
        indices.dedup();
    }
    Ok(children)
}

/// Reads the tile file for `name` (if any), merging points from any child
/// whose own tile has fewer than `small_node_threshold` points into it and
/// deleting that child's file, then recurses into the surviving children.
/// Returns the manifest node plus the (possibly merged) point count of the
/// node's own tile, used by the parent to decide whether *it* should
/// absorb a merged child.
fn build_node(
    output_dir: &Path,
    name: &NodeName,
    children_map: &FnvHashMap<NodeName, Vec<u8>>,
    scale: f64,
    spacing: f64,
    small_node_threshold: usize,
) -> Result<Option<(TilesetNode, usize)>> {
    let path = tile_path(output_dir, name);
    let mut tile = if path.exists() {
        Some(tile_format::read_tile_file(&path)?)
    } else {
        None
    };

    let mut child_nodes = Vec::new();
    if let Some(indices) = children_map.get(name) {
        for &index in indices {
            let child_name = name.child(index);
            if let Some((child_node, child_count)) = build_node(
                output_dir,
                &child_name,
                children_map,
                scale,
                spacing / 2.0,
                small_node_threshold,
            )? {
                if child_count > 0 && child_count < small_node_threshold {
                    let child_path = tile_path(output_dir, &child_name);
                    if let Ok(child_tile) = tile_format::read_tile_file(&child_path) {
                        let merged = tile.get_or_insert_with(|| Tile {
                            xyz: Vec::new(),
                            rgb: None,
                            rtc_center: None,
                        });
                        merged.xyz.extend(child_tile.xyz);
                        if let Some(child_rgb) = child_tile.rgb {
                            merged.rgb.get_or_insert_with(Vec::new).extend(child_rgb);
                        }
                        let _ = fs::remove_file(&child_path);
                    }
                    // A folded child's own descendants (if any) still need
                    // a home; re-parent them onto this node directly.
                    child_nodes.extend(child_node.children);
                } else {
                    child_nodes.push(child_node);
                }
            }
        }
    }

    let own_count = tile.as_ref().map_or(0, |t| t.xyz.len());
    if own_count == 0 && child_nodes.is_empty() {
        return Ok(None);
    }

    let bounding_volume = BoundingVolume {
        box_: bounding_box_array(tile.as_ref().map_or(&[][..], |t| &t.xyz)),
    };
    let content = if own_count > 0 {
        Some(Content {
            uri: format!("{}.pnts", name),
        })
    } else {
        None
    };

    let node = TilesetNode {
        name: name.clone(),
        bounding_volume,
        geometric_error: 20.0 * spacing / scale,
        content,
        refine: if name.is_root() { None } else { Some("ADD") },
        children: child_nodes,
        transform: None,
    };

    Ok(Some((node, own_count)))
}

/// Builds the full tileset manifest for a completed build: recomputes
/// empirical (tight) AABBs from the actual tile contents, folds tiles
/// smaller than `small_node_threshold` points into their parent and
/// deletes them, and writes `tileset.json` (splitting any subtree whose
/// JSON exceeds ~100 KB into its own `tileset.<name>.json`).
pub fn build_and_write(
    output_dir: &Path,
    scale: f64,
    root_spacing: f64,
    small_node_threshold: usize,
) -> Result<()> {
    let children_map = discover_children(output_dir)?;
    let root_name = NodeName::root();
    let (mut root_node, _) = build_node(
        output_dir,
        &root_name,
        &children_map,
        scale,
        root_spacing,
        small_node_threshold,
    )?
    .ok_or_else(|| {
        ErrorKind::InternalInvariant(root_name.to_string(), "empty build produced no tiles".into())
    })?;

    root_node.refine = Some("REPLACE");
    externalize_large_subtrees(output_dir, &mut root_node)?;

    let tileset = Tileset {
        asset: Asset { version: "1.0" },
        geometric_error: root_node.geometric_error,
        root: root_node,
    };
    let json = serde_json::to_vec_pretty(&tileset)?;
    fs::write(output_dir.join("tileset.json"), json)?;
    Ok(())
}

/// Walks the manifest tree in parallel across sibling subtrees (independent
/// work per branch) and, bottom-up, replaces any child whose JSON
/// serialization exceeds the external-manifest threshold with a
/// `content.uri` pointing at its own `tileset.<name>.json` file.
fn externalize_large_subtrees(output_dir: &Path, node: &mut TilesetNode) -> Result<()> {
    let children = std::mem::take(&mut node.children);
    let processed: Result<Vec<TilesetNode>> = children
        .into_par_iter()
        .map(|mut child| -> Result<TilesetNode> {
            externalize_large_subtrees(output_dir, &mut child)?;
            let serialized = serde_json::to_vec(&child)?;
            if serialized.len() > EXTERNAL_MANIFEST_THRESHOLD {
                let sub_tileset = Tileset {
                    asset: Asset { version: "1.0" },
                    geometric_error: child.geometric_error,
                    root: child.clone(),
                };
                let uri = format!("tileset.{}.json", child.name);
                fs::write(output_dir.join(&uri), serde_json::to_vec_pretty(&sub_tileset)?)?;
                Ok(TilesetNode {
                    name: child.name.clone(),
                    bounding_volume: child.bounding_volume.clone(),
                    geometric_error: child.geometric_error,
                    content: Some(Content { uri }),
                    refine: child.refine,
                    children: Vec::new(),
                    transform: None,
                })
            } else {
                Ok(child)
            }
        })
        .collect();
    node.children = processed?;
    Ok(())
}
