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
use nalgebra::Point3;

/// One batch of points emitted by a `PointSource`, already reprojected and
/// offset/scaled into builder-local coordinates. Format-specific decoding
/// (LAS, XYZ, PLY, ...) happens entirely on the other side of this
/// boundary; the core never parses a file format directly.
#[derive(Debug, Clone)]
pub struct PointBatch {
    pub source_id: u64,
    pub xyz: Vec<Point3<f64>>,
    pub rgb: Vec<[u8; 3]>,
}

impl PointBatch {
    pub fn validate(&self) -> Result<()> {
        if self.xyz.len() != self.rgb.len() {
            return Err(ErrorKind::InputFormat(format!(
                "xyz length {} does not match rgb length {}",
                self.xyz.len(),
                self.rgb.len()
            ))
            .into());
        }
        if self.xyz.iter().any(|p| !p.x.is_finite() || !p.y.is_finite() || !p.z.is_finite()) {
            return Err(ErrorKind::InputFormat(format!(
                "batch from source {} contains a non-finite coordinate",
                self.source_id
            ))
            .into());
        }
        Ok(())
    }
}

/// Sentinel emitted once a source has no more batches.
#[derive(Debug, Clone, Copy)]
pub struct ReaderDone {
    pub source_id: u64,
    pub total: usize,
}

/// A finite, single-pass stream of point batches. Implementations own
/// whatever file handles or decoders they need; the coordinator only ever
/// calls `next_batch` until it returns `None`.
pub trait PointSource {
    fn source_id(&self) -> u64;
    fn next_batch(&mut self) -> Result<Option<PointBatch>>;
}

/// A trivial in-memory source, useful for driving the pipeline from
/// already-loaded data and for tests. Splits its points into batches of
/// `batch_size`.
pub struct InMemoryPointSource {
    source_id: u64,
    xyz: std::vec::IntoIter<Point3<f64>>,
    rgb: std::vec::IntoIter<[u8; 3]>,
    batch_size: usize,
}

impl InMemoryPointSource {
    pub fn new(source_id: u64, xyz: Vec<Point3<f64>>, rgb: Vec<[u8; 3]>, batch_size: usize) -> Self {
        assert_eq!(xyz.len(), rgb.len());
        InMemoryPointSource {
            source_id,
            xyz: xyz.into_iter(),
            rgb: rgb.into_iter(),
            batch_size: batch_size.max(1),
        }
    }
}

impl PointSource for InMemoryPointSource {
    fn source_id(&self) -> u64 {
        self.source_id
    }

    fn next_batch(&mut self) -> Result<Option<PointBatch>> {
        let mut xyz = Vec::with_capacity(self.batch_size);
        let mut rgb = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            match (self.xyz.next(), self.rgb.next()) {
                (Some(p), Some(c)) => {
                    xyz.push(p);
                    rgb.push(c);
                }
                _ => break,
            }
        }
        if xyz.is_empty() {
            return Ok(None);
        }
        let batch = PointBatch {
            source_id: self.source_id,
            xyz,
            rgb,
        };
        batch.validate()?;
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_source_batches_and_terminates() {
        let xyz = vec![Point3::new(0.0, 0.0, 0.0); 5];
        let rgb = vec![[0u8, 0, 0]; 5];
        let mut source = InMemoryPointSource::new(1, xyz, rgb, 2);
        let mut total = 0;
        while let Some(batch) = source.next_batch().unwrap() {
            total += batch.xyz.len();
        }
        assert_eq!(total, 5);
    }

    #[test]
    fn test_validate_rejects_non_finite_coordinates() {
        let batch = PointBatch {
            source_id: 0,
            xyz: vec![Point3::new(f64::NAN, 0.0, 0.0)],
            rgb: vec![[0, 0, 0]],
        };
        assert!(batch.validate().is_err());
    }
}
