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
use crate::math::{Aabb, NodeName};
use crate::node::Node;
use fnv::FnvHashMap;

/// Derives a node's AABB and spacing purely from its name and the root's,
/// by walking the name's child indices down from the root. Deterministic
/// regardless of which worker materializes the node.
pub fn derive_node_geometry(root_aabb: &Aabb, root_spacing: f64, name: &NodeName) -> (Aabb, f64) {
    let mut aabb = *root_aabb;
    let mut spacing = root_spacing;
    for &index in name.path() {
        aabb = aabb.split(index);
        spacing /= 2.0;
    }
    (aabb, spacing)
}

/// Owns the mapping from `NodeName` to in-memory `Node`, lazily
/// materializing nodes that are not yet present. This is purely the
/// identity/geometry layer; the coordinator is responsible for deciding
/// when a node should be evicted or finalized.
pub struct Catalog {
    root_aabb: Aabb,
    root_spacing: f64,
    nodes: FnvHashMap<NodeName, Node>,
}

impl Catalog {
    pub fn new(root_aabb: Aabb, root_spacing: f64) -> Self {
        Catalog {
            root_aabb,
            root_spacing,
            nodes: FnvHashMap::default(),
        }
    }

    pub fn root_aabb(&self) -> &Aabb {
        &self.root_aabb
    }

    pub fn root_spacing(&self) -> f64 {
        self.root_spacing
    }

    /// Returns the node for `name`, materializing an empty one from its
    /// derived geometry if it was not already present (in memory or in a
    /// loaded blob).
    pub fn get_node(&mut self, name: &NodeName) -> &mut Node {
        if !self.nodes.contains_key(name) {
            let (aabb, spacing) = derive_node_geometry(&self.root_aabb, self.root_spacing, name);
            self.nodes
                .insert(name.clone(), Node::new_leaf(name.clone(), aabb, spacing));
        }
        self.nodes.get_mut(name).unwrap()
    }

    pub fn peek_node(&self, name: &NodeName) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &NodeName) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn remove(&mut self, name: &NodeName) -> Option<Node> {
        self.nodes.remove(name)
    }

    pub fn insert_loaded(&mut self, node: Node) {
        self.nodes.insert(node.name.clone(), node);
    }

    /// Serializes every dirty node rooted at (and including) `name`, up to
    /// `max_depth` levels below it, into a compact blob. Clean nodes are
    /// skipped: the caller already has their last-dumped bytes cached.
    pub fn dump(&self, name: &NodeName, max_depth: usize) -> Result<Vec<u8>> {
        let mut dirty_nodes = Vec::new();
        self.collect_dirty(name, max_depth, &mut dirty_nodes);
        let bytes = bincode_like_encode(&dirty_nodes)?;
        Ok(bytes)
    }

    fn collect_dirty<'a>(&'a self, name: &NodeName, max_depth: usize, out: &mut Vec<&'a Node>) {
        if let Some(node) = self.nodes.get(name) {
            if node.dirty {
                out.push(node);
            }
            if max_depth == 0 {
                return;
            }
            if let Some(children) = node.children() {
                for &index in children {
                    self.collect_dirty(&name.child(index), max_depth - 1, out);
                }
            }
        }
    }

    /// Loads a blob produced by `dump`, inserting (or overwriting) every
    /// node it contains.
    pub fn load(&mut self, blob: &[u8]) -> Result<()> {
        let nodes: Vec<Node> = bincode_like_decode(blob)?;
        for node in nodes {
            self.nodes.insert(node.name.clone(), node);
        }
        Ok(())
    }

    pub fn clear_dirty(&mut self, name: &NodeName) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.dirty = false;
        }
    }
}

/// The catalog's blob format: a `serde_json`-described list of nodes,
/// compressed with a fast block compressor. This mirrors the tile codec's
/// own "structured header + raw binary body" layering (see
/// `tile_format.rs`), just applied to whole `Node` values instead of bare
/// point arrays.
fn bincode_like_encode(nodes: &[&Node]) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(nodes)?;
    Ok(lz4_flex::compress_prepend_size(&json))
}

fn bincode_like_decode(blob: &[u8]) -> Result<Vec<Node>> {
    let json = lz4_flex::decompress_size_prepended(blob)
        .map_err(|e| ErrorKind::Capacity(format!("corrupt node blob: {}", e)))?;
    let nodes = serde_json::from_slice(&json)?;
    Ok(nodes)
}
