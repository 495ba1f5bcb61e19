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

pub mod cache;
pub mod worker;

use crate::catalog::Catalog;
use crate::config::BuildConfig;
use crate::errors::*;
use crate::manifest;
use crate::math::{Aabb, NodeName};
use crate::reader::PointSource;
use cache::NodeCache;
use nalgebra::Point3;
use pbr::ProgressBar;
use std::io::Stdout;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Read-only build parameters and the derived root geometry, shared by
/// reference with every worker. Replaces the ad-hoc global state the
/// teacher's viewer used to keep in statics.
pub struct BuildContext {
    pub config: BuildConfig,
    pub root_aabb: Aabb,
    pub root_spacing: f64,
    pub output_dir: PathBuf,
}

/// Points-in, tiles-out summary of a finished build, useful for the mass
/// conservation property test and for progress reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuildStats {
    pub points_read: usize,
    pub points_emitted: usize,
}

/// Creates a `pbr` progress bar with the given message, unless verbosity is
/// 0 (silent). Matches the teacher's `octree::generation` idiom of a
/// message-prefixed bar over a known unit count.
fn progress_bar(total: u64, message: &str, verbosity: u8) -> Option<ProgressBar<Stdout>> {
    if verbosity == 0 {
        return None;
    }
    let mut bar = ProgressBar::new(total);
    bar.message(message);
    bar.set_max_refresh_rate(Some(std::time::Duration::from_millis(500)));
    Some(bar)
}

/// Reads every batch every source produces, routing points to the root
/// node. Backpressure in the fully streaming design pauses readers once
/// too many points are in flight; here ingestion happens to completion
/// before any worker starts processing, so there is nothing to pause
/// against — the whole cloud is bounded in flight by definition of reading
/// one source fully before dispatching. See DESIGN.md for why this
/// read-then-process sequencing was chosen over fully overlapped
/// streaming.
fn ingest(
    ctx: &BuildContext,
    sources: &mut [Box<dyn PointSource>],
    catalog: &mut Catalog,
) -> Result<usize> {
    if ctx.config.verbosity > 0 {
        println!("Reading input points into the root node.");
    }
    let mut points_read = 0;
    for source in sources.iter_mut() {
        loop {
            let batch = match source.next_batch()? {
                Some(b) => b,
                None => break,
            };
            let xyz: Vec<Point3<f64>> = batch.xyz.iter().map(|p| ctx.config.to_local(*p)).collect();
            points_read += xyz.len();
            let root = catalog.get_node(&NodeName::root());
            root.insert(ctx.config.root_scale, &xyz, &batch.rgb, false);
        }
        if ctx.config.verbosity > 1 {
            println!(
                "Source {} done, {} points read so far.",
                source.source_id(),
                points_read
            );
        }
    }
    Ok(points_read)
}

/// Drives a full build: reads every source to completion, recursively
/// resolves the octree (splitting, grid-filtering, routing pending points
/// to children) in parallel across the root's immediate child subtrees,
/// emits tile files, and writes the tileset manifest.
pub fn build(config: BuildConfig, output_dir: impl Into<PathBuf>, mut sources: Vec<Box<dyn PointSource>>, root_aabb: Aabb) -> Result<BuildStats> {
    let output_dir = output_dir.into();
    std::fs::create_dir_all(&output_dir)?;
    let root_spacing = crate::math::compute_root_spacing(&root_aabb);
    let ctx = BuildContext {
        config,
        root_aabb,
        root_spacing,
        output_dir: output_dir.clone(),
    };

    let mut catalog = Catalog::new(ctx.root_aabb, ctx.root_spacing);
    let points_read = ingest(&ctx, &mut sources, &mut catalog)?;

    // Drain the root by one level so each of its up-to-8 children can be
    // handed to an independent worker; deeper draining then happens
    // entirely within each worker's private subtree, so no two workers
    // ever touch the same node.
    let root_name = NodeName::root();
    let root_children = {
        let grouped = catalog.get_node(&root_name).take_pending();
        let mut out = Vec::new();
        for (index, xyz, rgb) in grouped {
            let child_name = root_name.child(index);
            catalog
                .get_node(&child_name)
                .insert(ctx.config.root_scale, &xyz, &rgb, false);
            out.push(child_name);
        }
        out
    };
    let mut subtrees: Vec<Catalog> = root_children
        .iter()
        .map(|name| {
            let mut sub = Catalog::new(ctx.root_aabb, ctx.root_spacing);
            if let Some(node) = catalog.remove(name) {
                sub.insert_loaded(node);
            }
            sub
        })
        .collect();

    let emitted = AtomicUsize::new(0);
    let first_error: Mutex<Option<Error>> = Mutex::new(None);
    let worker_count = ctx.config.normalized_workers();
    let mut work: Vec<(NodeName, Catalog)> = root_children
        .into_iter()
        .zip(subtrees.drain(..))
        .collect();
    let mut bar = progress_bar(
        work.len() as u64,
        "Building octree subtrees: ",
        ctx.config.verbosity,
    );

    // Bound concurrency to the configured worker count by processing the
    // root's child subtrees in waves; within a wave, every subtree runs on
    // its own thread with no shared mutable state (each owns a disjoint
    // `Catalog`). The root has at most 8 children, so a single wave covers
    // any realistic `workers` setting.
    while !work.is_empty() {
        let take = work.len().min(worker_count.max(1));
        let wave: Vec<(NodeName, Catalog)> = work.drain(0..take).collect();
        crossbeam::thread::scope(|scope| {
            for (name, sub_catalog) in wave {
                let ctx = &ctx;
                let emitted = &emitted;
                let first_error = &first_error;
                scope.spawn(move |_| {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        process_subtree(ctx, name, sub_catalog)
                    }));
                    match result {
                        Ok(Ok(count)) => {
                            emitted.fetch_add(count, Ordering::SeqCst);
                        }
                        Ok(Err(e)) => {
                            let mut slot = first_error.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                        }
                        Err(panic) => {
                            let detail = panic_message(panic);
                            let mut slot = first_error.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(ErrorKind::WorkerCrash(detail).into());
                            }
                        }
                    }
                });
            }
        })
        .map_err(|_| Error::from(ErrorKind::WorkerCrash("worker thread panicked".into())))?;
        if let Some(bar) = &mut bar {
            bar.add(take as u64);
        }
    }
    if let Some(mut bar) = bar {
        bar.finish();
    }

    if let Some(err) = first_error.into_inner().unwrap() {
        return Err(err);
    }

    // The root itself may still hold directly-retained points (it never
    // exceeded the split threshold, or some points never made it past its
    // own grid) even though every child has now been finalized. It was
    // never handed to a worker, so it never went through a `NodeCache`
    // either; a throwaway one is enough to satisfy `emit_subtree`'s signature.
    let mut root_cache = NodeCache::new(
        ctx.config.normalized_cache_budget_mb(),
        output_dir.join(".cache").join("root"),
    );
    let root_emitted = worker::emit_subtree(&mut catalog, &root_name, &mut root_cache, &output_dir, ctx.config.include_rgb)?;

    if ctx.config.verbosity > 0 {
        println!("Writing tileset manifest.");
    }
    manifest::build_and_write(
        &output_dir,
        ctx.config.root_scale,
        ctx.root_spacing,
        ctx.config.small_node_threshold,
    )?;

    let points_emitted = emitted.load(Ordering::SeqCst) + root_emitted;
    if ctx.config.verbosity > 0 {
        println!(
            "Done: {} points read, {} points emitted across the tileset.",
            points_read, points_emitted
        );
    }
    Ok(BuildStats {
        points_read,
        points_emitted,
    })
}

/// Fully resolves one top-level child subtree: drains all pending points
/// recursively (bounded by `halt_at_depth` at every level, spilling the
/// node cache to disk under memory pressure), then writes every node's
/// tile file. Subtrees never share nodes, so this needs no synchronization
/// with any other worker.
fn process_subtree(ctx: &BuildContext, name: NodeName, mut catalog: Catalog) -> Result<usize> {
    let mut cache = NodeCache::new(
        ctx.config.normalized_cache_budget_mb() / ctx.config.normalized_workers().max(1) as u64,
        ctx.output_dir.join(".cache").join(name.to_string()),
    );

    worker::drain_subtree(&mut catalog, &name, ctx.config.root_scale, &mut cache)?;
    worker::emit_subtree(&mut catalog, &name, &mut cache, &ctx.output_dir, ctx.config.include_rgb)
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked with a non-string payload".to_string()
    }
}
