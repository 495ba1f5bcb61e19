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
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::Point3;
use std::fs::{remove_file, File};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::PathBuf;

const MAGIC: &[u8; 4] = b"pnts";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 28;

/// One tile's worth of decoded points, plus the `RTC_CENTER` the feature
/// table declared (if any) for re-centering on read.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub xyz: Vec<Point3<f32>>,
    pub rgb: Option<Vec<[u8; 3]>>,
    pub rtc_center: Option<[f64; 3]>,
}

/// Encodes a tile into the binary `.pnts`-equivalent format: a 28-byte
/// header, a space-padded JSON feature table, and interleaved little-endian
/// position/color arrays.
pub fn encode(tile: &Tile) -> Vec<u8> {
    let count = tile.xyz.len();

    let mut feature_table = serde_json::Map::new();
    feature_table.insert("POINTS_LENGTH".to_string(), serde_json::json!(count));
    feature_table.insert(
        "POSITION".to_string(),
        serde_json::json!({ "byteOffset": 0 }),
    );
    if tile.rgb.is_some() {
        feature_table.insert(
            "RGB".to_string(),
            serde_json::json!({ "byteOffset": count * 12 }),
        );
    }
    if let Some(center) = tile.rtc_center {
        feature_table.insert("RTC_CENTER".to_string(), serde_json::json!(center));
    }

    let mut ft_json = serde_json::to_vec(&serde_json::Value::Object(feature_table)).unwrap();
    while ft_json.len() % 4 != 0 {
        ft_json.push(b' ');
    }

    let mut ft_bin = Vec::with_capacity(count * 12 + tile.rgb.as_ref().map_or(0, |_| count * 3));
    for p in &tile.xyz {
        ft_bin.write_f32::<LittleEndian>(p.x).unwrap();
        ft_bin.write_f32::<LittleEndian>(p.y).unwrap();
        ft_bin.write_f32::<LittleEndian>(p.z).unwrap();
    }
    if let Some(rgb) = &tile.rgb {
        for c in rgb {
            ft_bin.extend_from_slice(c);
        }
    }

    let total_len = HEADER_LEN + ft_json.len() + ft_bin.len();

    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(MAGIC);
    out.write_u32::<LittleEndian>(VERSION).unwrap();
    out.write_u32::<LittleEndian>(total_len as u32).unwrap();
    out.write_u32::<LittleEndian>(ft_json.len() as u32).unwrap();
    out.write_u32::<LittleEndian>(ft_bin.len() as u32).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap(); // bt_json_len: no batch table
    out.write_u32::<LittleEndian>(0).unwrap(); // bt_bin_len
    out.extend_from_slice(&ft_json);
    out.extend_from_slice(&ft_bin);
    out
}

/// Decodes a buffer produced by `encode`. Used by the manifest post-pass
/// (to recompute empirical AABBs and to coalesce small children) and by
/// round-trip tests.
pub fn decode(bytes: &[u8]) -> Result<Tile> {
    if bytes.len() < HEADER_LEN {
        return Err(ErrorKind::InputFormat("tile shorter than its header".into()).into());
    }
    let mut header = Cursor::new(&bytes[0..HEADER_LEN]);
    let mut magic = [0u8; 4];
    header.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(ErrorKind::InputFormat("bad tile magic".into()).into());
    }
    let version = header.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(ErrorKind::InputFormat(format!("unsupported tile version {}", version)).into());
    }
    let total_len = header.read_u32::<LittleEndian>()? as usize;
    let ft_json_len = header.read_u32::<LittleEndian>()? as usize;
    let ft_bin_len = header.read_u32::<LittleEndian>()? as usize;
    let _bt_json_len = header.read_u32::<LittleEndian>()? as usize;
    let _bt_bin_len = header.read_u32::<LittleEndian>()? as usize;

    if bytes.len() != total_len {
        return Err(ErrorKind::InputFormat(format!(
            "tile declares total_len {} but has {} bytes",
            total_len,
            bytes.len()
        ))
        .into());
    }

    let ft_json_start = HEADER_LEN;
    let ft_json_end = ft_json_start + ft_json_len;
    let ft_bin_start = ft_json_end;
    let ft_bin_end = ft_bin_start + ft_bin_len;

    let feature_table: serde_json::Value = serde_json::from_slice(&bytes[ft_json_start..ft_json_end])?;
    let count = feature_table["POINTS_LENGTH"]
        .as_u64()
        .ok_or_else(|| ErrorKind::InputFormat("missing POINTS_LENGTH".into()))? as usize;

    let mut cursor = Cursor::new(&bytes[ft_bin_start..ft_bin_end]);
    let mut xyz = Vec::with_capacity(count);
    for _ in 0..count {
        let x = cursor.read_f32::<LittleEndian>()?;
        let y = cursor.read_f32::<LittleEndian>()?;
        let z = cursor.read_f32::<LittleEndian>()?;
        xyz.push(Point3::new(x, y, z));
    }

    let rgb = if feature_table.get("RGB").is_some() {
        let mut colors = Vec::with_capacity(count);
        for _ in 0..count {
            let mut c = [0u8; 3];
            cursor.read_exact(&mut c)?;
            colors.push(c);
        }
        Some(colors)
    } else {
        None
    };

    let rtc_center = feature_table.get("RTC_CENTER").and_then(|v| {
        let arr = v.as_array()?;
        if arr.len() != 3 {
            return None;
        }
        Some([arr[0].as_f64()?, arr[1].as_f64()?, arr[2].as_f64()?])
    });

    Ok(Tile {
        xyz,
        rgb,
        rtc_center,
    })
}

/// Writes a tile to `path`. Mirrors the teacher's node-writer idiom: if
/// nothing was ever written to it, the file is removed on drop rather than
/// left behind empty.
pub struct TileWriter {
    path: PathBuf,
    inner: Option<BufWriter<File>>,
    bytes_written: usize,
}

impl TileWriter {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(TileWriter {
            path,
            inner: Some(BufWriter::new(file)),
            bytes_written: 0,
        })
    }

    pub fn write_tile(&mut self, tile: &Tile) -> Result<()> {
        let bytes = encode(tile);
        if let Some(writer) = &mut self.inner {
            writer.write_all(&bytes)?;
            writer.flush()?;
        }
        self.bytes_written += bytes.len();
        Ok(())
    }
}

impl Drop for TileWriter {
    fn drop(&mut self) {
        self.inner.take();
        if self.bytes_written == 0 {
            let _ = remove_file(&self.path);
        }
    }
}

pub fn read_tile_file(path: &std::path::Path) -> Result<Tile> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip_with_rgb() {
        let tile = Tile {
            xyz: vec![Point3::new(1.0, 2.0, 3.0), Point3::new(-1.0, 0.5, 9.0)],
            rgb: Some(vec![[255, 0, 0], [0, 255, 0]]),
            rtc_center: Some([10.0, 20.0, 30.0]),
        };
        let bytes = encode(&tile);
        assert_eq!(bytes[0..4], *MAGIC);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, tile);
    }

    #[test]
    fn test_encode_decode_round_trip_without_rgb() {
        let tile = Tile {
            xyz: vec![Point3::new(0.0, 0.0, 0.0)],
            rgb: None,
            rtc_center: None,
        };
        let bytes = encode(&tile);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, tile);
    }

    #[test]
    fn test_header_length_is_28_bytes() {
        let tile = Tile {
            xyz: vec![],
            rgb: None,
            rtc_center: None,
        };
        let bytes = encode(&tile);
        assert!(bytes.len() >= HEADER_LEN);
    }

    #[test]
    fn test_decode_rejects_truncated_buffer() {
        assert!(decode(&[0u8; 4]).is_err());
    }
}
