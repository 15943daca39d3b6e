use glam::Vec3;
use log::warn;

use crate::common::CHUNK_SPLATS;
use crate::error::SplatError;
use crate::structures::Chunk;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }
}

/// Flat arena of chunk records, one per 256 splats.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkTable {
    chunks: Vec<Chunk>,
    color_bounds: bool,
}

#[inline]
pub const fn chunk_count(num_splats: usize) -> usize {
    num_splats.div_ceil(CHUNK_SPLATS)
}

impl ChunkTable {
    pub fn new(chunks: Vec<Chunk>, color_bounds: bool) -> Self {
        Self {
            chunks,
            color_bounds,
        }
    }

    /// Builds the table from its serialized float records.
    pub fn from_floats(
        floats: &[f32],
        num_splats: usize,
        color_bounds: bool,
    ) -> Result<Self, SplatError> {
        let stride = Chunk::stride(color_bounds);
        let expected = chunk_count(num_splats) * stride;
        if floats.len() != expected {
            return Err(SplatError::DeserializeAsset(format!(
                "chunk table holds {} floats, {} splats need {}",
                floats.len(),
                num_splats,
                expected
            )));
        }
        let chunks = floats.chunks_exact(stride).map(Chunk::from_floats).collect();
        Ok(Self::new(chunks, color_bounds))
    }

    pub fn to_floats(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.chunks.len() * Chunk::stride(self.color_bounds));
        for chunk in &self.chunks {
            chunk.write_floats(&mut out, self.color_bounds);
        }
        out
    }

    /// Rejects non-finite bounds. Inverted bounds still decode to finite
    /// values, so they are only reported.
    pub fn validate(&self) -> Result<(), SplatError> {
        let mut inverted = 0usize;
        for (i, c) in self.chunks.iter().enumerate() {
            let fields = [
                (c.pos_min, c.pos_max),
                (c.scale_min, c.scale_max),
                (c.color_min, c.color_max),
            ];
            for (lo, hi) in fields {
                if !lo.is_finite() || !hi.is_finite() {
                    return Err(SplatError::InvalidChunk {
                        chunk: i,
                        reason: "bounds are not finite".to_string(),
                    });
                }
                if lo.cmpgt(hi).any() {
                    inverted += 1;
                }
            }
        }
        if inverted > 0 {
            warn!("{} chunk bound pairs have min > max", inverted);
        }
        Ok(())
    }

    #[inline]
    pub fn chunk_for(&self, splat_index: usize) -> &Chunk {
        &self.chunks[splat_index / CHUNK_SPLATS]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[inline]
    pub fn has_color_bounds(&self) -> bool {
        self.color_bounds
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Pessimistic scene bounds: every chunk's position range grown by the
    /// largest splat scale the chunk can hold.
    pub fn aabb(&self) -> Option<Aabb> {
        self.chunks
            .iter()
            .map(|c| {
                let s = c.scale_max.max_element().exp();
                Aabb {
                    min: c.pos_min - Vec3::splat(s),
                    max: c.pos_max + Vec3::splat(s),
                }
            })
            .reduce(|a, b| Aabb {
                min: a.min.min(b.min),
                max: a.max.max(b.max),
            })
    }

    pub fn chunk_bounds(&self) -> Vec<Aabb> {
        self.chunks
            .iter()
            .map(|c| Aabb {
                min: c.pos_min,
                max: c.pos_max,
            })
            .collect()
    }

    /// Mean of the chunk centers.
    pub fn focal_point(&self) -> Vec3 {
        if self.chunks.is_empty() {
            return Vec3::ZERO;
        }
        let sum: Vec3 = self.chunks.iter().map(|c| c.pos_min + c.pos_max).sum();
        sum * (0.5 / self.chunks.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(pos_min: f32, pos_max: f32, log_scale: f32) -> Chunk {
        Chunk {
            pos_min: Vec3::splat(pos_min),
            pos_max: Vec3::splat(pos_max),
            scale_min: Vec3::splat(log_scale),
            scale_max: Vec3::splat(log_scale),
            ..Chunk::default()
        }
    }

    #[test]
    fn test_chunk_for_uses_index_arithmetic() {
        let table = ChunkTable::new(vec![chunk(0.0, 1.0, 0.0), chunk(5.0, 6.0, 0.0)], true);
        assert_eq!(table.chunk_for(0).pos_min.x, 0.0);
        assert_eq!(table.chunk_for(255).pos_min.x, 0.0);
        assert_eq!(table.chunk_for(256).pos_min.x, 5.0);
        assert_eq!(table.chunk_for(511).pos_min.x, 5.0);
    }

    #[test]
    fn test_from_floats_checks_length() {
        assert!(ChunkTable::from_floats(&[0.0; 18], 256, true).is_ok());
        assert!(ChunkTable::from_floats(&[0.0; 18], 257, true).is_err());
        assert!(ChunkTable::from_floats(&[0.0; 24], 257, false).is_ok());
    }

    #[test]
    fn test_validate_rejects_nan() {
        let mut bad = chunk(0.0, 1.0, 0.0);
        bad.scale_max.y = f32::NAN;
        let table = ChunkTable::new(vec![chunk(0.0, 1.0, 0.0), bad], true);
        match table.validate() {
            Err(SplatError::InvalidChunk { chunk, .. }) => assert_eq!(chunk, 1),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validate_tolerates_inverted_bounds() {
        let table = ChunkTable::new(vec![chunk(3.0, 1.0, 0.0)], true);
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_aabb_and_focal_point() {
        let table = ChunkTable::new(vec![chunk(0.0, 2.0, 0.0), chunk(4.0, 6.0, 0.0)], true);
        let aabb = table.aabb().unwrap();
        assert_eq!(aabb.min, Vec3::splat(-1.0));
        assert_eq!(aabb.max, Vec3::splat(7.0));
        assert_eq!(aabb.center(), Vec3::splat(3.0));
        assert_eq!(table.focal_point(), Vec3::splat(3.0));
        assert_eq!(table.chunk_bounds()[1].min, Vec3::splat(4.0));
        assert!(ChunkTable::new(Vec::new(), true).aabb().is_none());
    }
}
