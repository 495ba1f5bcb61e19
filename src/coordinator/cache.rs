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
use fnv::FnvHashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Tracks the total compressed size of the node blobs currently held in
/// memory and flushes everything to a spill directory, atomically, once
/// that total exceeds `budget_bytes`. This mirrors the original node
/// store's "flush-all" eviction (as opposed to evicting entries one at a
/// time): the whole point is to bound peak memory with a single cheap
/// check rather than tracking per-entry recency.
pub struct NodeCache {
    budget_bytes: u64,
    blobs: FnvHashMap<NodeName, Vec<u8>>,
    total_bytes: u64,
    spill_dir: PathBuf,
    spilled: FnvHashMap<NodeName, PathBuf>,
}

impl NodeCache {
    pub fn new(budget_mb: u64, spill_dir: impl Into<PathBuf>) -> Self {
        NodeCache {
            budget_bytes: budget_mb * 1024 * 1024,
            blobs: FnvHashMap::default(),
            total_bytes: 0,
            spill_dir: spill_dir.into(),
            spilled: FnvHashMap::default(),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn insert(&mut self, name: NodeName, blob: Vec<u8>) {
        self.total_bytes += blob.len() as u64;
        if let Some(old) = self.blobs.insert(name, blob) {
            self.total_bytes -= old.len() as u64;
        }
    }

    pub fn get(&self, name: &NodeName) -> Option<&Vec<u8>> {
        self.blobs.get(name)
    }

    pub fn remove(&mut self, name: &NodeName) -> Option<Vec<u8>> {
        if let Some(blob) = self.blobs.remove(name) {
            self.total_bytes -= blob.len() as u64;
            Some(blob)
        } else {
            None
        }
    }

    pub fn needs_flush(&self) -> bool {
        self.total_bytes > self.budget_bytes
    }

    /// Writes every currently-cached blob to the spill directory and
    /// drops them from memory, recording where each landed so `reload`
    /// can bring a specific node back later.
    pub fn flush_all(&mut self) -> Result<()> {
        fs::create_dir_all(&self.spill_dir)?;
        for (name, blob) in self.blobs.drain() {
            let path = self.spill_dir.join(format!("{}.blob", name));
            let tmp_path = self.spill_dir.join(format!("{}.blob.tmp", name));
            {
                let mut f = fs::File::create(&tmp_path)?;
                f.write_all(&blob)?;
                f.flush()?;
            }
            fs::rename(&tmp_path, &path)?;
            self.spilled.insert(name, path);
        }
        self.total_bytes = 0;
        Ok(())
    }

    pub fn reload(&mut self, name: &NodeName) -> Result<Option<Vec<u8>>> {
        if let Some(blob) = self.blobs.get(name) {
            return Ok(Some(blob.clone()));
        }
        if let Some(path) = self.spilled.get(name) {
            let blob = fs::read(path)?;
            return Ok(Some(blob));
        }
        Ok(None)
    }

    pub fn spill_dir(&self) -> &Path {
        &self.spill_dir
    }
}
