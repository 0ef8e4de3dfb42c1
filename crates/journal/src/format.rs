//! On-disk tile entry codec.
//!
//! Both journal files share one layout: a sequence of tile entries, each
//!
//! ```text
//! layer id : 8 bytes (u64, little-endian)
//! tile x   : 1 byte
//! tile y   : 1 byte
//! width    : 4 bytes (u32, nominal tile width)
//! height   : 4 bytes (u32, nominal tile height)
//! len      : 4 bytes (u32, byte length of the pixel payload)
//! pixels   : len bytes (RGBA8, rows of the tile rect clamped to the
//!            layer bounds)
//! ```
//!
//! Entries carry no record framing; record boundaries live in the
//! journal's in-memory index.

use common::error::{PaintError, PaintResult};
use common::geometry::Rect;
use common::id::LayerId;

/// One journaled tile: the pixel content of a tile-aligned rectangle of a
/// single layer at a point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileEntry {
    pub layer: LayerId,
    pub tile_x: u8,
    pub tile_y: u8,
    /// Nominal tile width; the payload may cover less when the tile
    /// overhangs the layer's right edge.
    pub width: u32,
    /// Nominal tile height, same clamping caveat as `width`.
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TileEntry {
    /// The nominal rectangle this tile occupies in layer space. Intersect
    /// with the layer bounds before applying the payload.
    pub fn target_rect(&self) -> Rect {
        Rect::new(
            self.tile_x as u32 * self.width,
            self.tile_y as u32 * self.height,
            self.width,
            self.height,
        )
    }

    /// Serialized size of this entry in bytes.
    pub fn encoded_len(&self) -> usize {
        8 + 1 + 1 + 4 + 4 + 4 + self.pixels.len()
    }

    /// Append the wire form of this entry to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        out.extend_from_slice(&self.layer.as_raw().to_le_bytes());
        out.push(self.tile_x);
        out.push(self.tile_y);
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&(self.pixels.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.pixels);
    }

    /// Decode one entry starting at `offset`. Returns the entry and the
    /// offset just past it.
    pub fn decode(data: &[u8], offset: usize) -> PaintResult<(TileEntry, usize)> {
        let mut cursor = Cursor { data, offset };
        let layer = LayerId::from_raw(cursor.read_u64()?);
        let tile_x = cursor.read_u8()?;
        let tile_y = cursor.read_u8()?;
        let width = cursor.read_u32()?;
        let height = cursor.read_u32()?;
        let len = cursor.read_u32()? as usize;
        let pixels = cursor.read_bytes(len)?.to_vec();
        Ok((
            TileEntry {
                layer,
                tile_x,
                tile_y,
                width,
                height,
                pixels,
            },
            cursor.offset,
        ))
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn read_bytes(&mut self, len: usize) -> PaintResult<&'a [u8]> {
        let end = self.offset.checked_add(len).filter(|&end| end <= self.data.len());
        let Some(end) = end else {
            return Err(PaintError::corrupt(format!(
                "tile entry truncated at byte {}",
                self.offset
            )));
        };
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> PaintResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> PaintResult<u32> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> PaintResult<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let entry = TileEntry {
            layer: LayerId::from_raw(7),
            tile_x: 3,
            tile_y: 250,
            width: 64,
            height: 64,
            pixels: vec![0xab; 64 * 64 * 4],
        };

        let mut bytes = Vec::new();
        entry.encode_into(&mut bytes);
        assert_eq!(bytes.len(), entry.encoded_len());

        let (decoded, next) = TileEntry::decode(&bytes, 0).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(next, bytes.len());
    }

    #[test]
    fn test_decode_truncated() {
        let entry = TileEntry {
            layer: LayerId::from_raw(1),
            tile_x: 0,
            tile_y: 0,
            width: 8,
            height: 8,
            pixels: vec![0; 8 * 8 * 4],
        };
        let mut bytes = Vec::new();
        entry.encode_into(&mut bytes);

        let err = TileEntry::decode(&bytes[..bytes.len() - 1], 0);
        assert!(matches!(err, Err(PaintError::Corrupt(_))));

        let err = TileEntry::decode(&bytes[..10], 0);
        assert!(matches!(err, Err(PaintError::Corrupt(_))));
    }

    #[test]
    fn test_target_rect() {
        let entry = TileEntry {
            layer: LayerId::from_raw(1),
            tile_x: 2,
            tile_y: 1,
            width: 32,
            height: 16,
            pixels: Vec::new(),
        };
        assert_eq!(entry.target_rect(), Rect::new(64, 16, 32, 16));
    }
}
