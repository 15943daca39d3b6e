use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3, Vec4};
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::common::{CHUNK_FLOATS, CHUNK_FLOATS_NO_COLOR};
use crate::sh::ShCoeffs;

pub const MAGIC: u32 = 0x4B41_5053; // 'SPAK'
pub const VERSION: u32 = 1;
pub const FLAG_COLOR_BOUNDS: u8 = 0x1;

/// Dequantization bounds shared by 256 consecutive splats.
///
/// Scale bounds are stored in log space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chunk {
    pub pos_min: Vec3,
    pub pos_max: Vec3,
    pub scale_min: Vec3,
    pub scale_max: Vec3,
    pub color_min: Vec3,
    pub color_max: Vec3,
}

impl Default for Chunk {
    fn default() -> Self {
        Self {
            pos_min: Vec3::ZERO,
            pos_max: Vec3::ZERO,
            scale_min: Vec3::ZERO,
            scale_max: Vec3::ZERO,
            color_min: Vec3::ZERO,
            color_max: Vec3::ONE,
        }
    }
}

impl Chunk {
    /// Reads one record of 18 floats, or 12 when the table carries no color
    /// bounds (color then decodes as the raw 8-bit fractions).
    pub fn from_floats(f: &[f32]) -> Self {
        let v = |o: usize| Vec3::new(f[o], f[o + 1], f[o + 2]);
        let (color_min, color_max) = if f.len() >= CHUNK_FLOATS {
            (v(12), v(15))
        } else {
            (Vec3::ZERO, Vec3::ONE)
        };
        Self {
            pos_min: v(0),
            pos_max: v(3),
            scale_min: v(6),
            scale_max: v(9),
            color_min,
            color_max,
        }
    }

    pub fn write_floats(&self, out: &mut Vec<f32>, with_color: bool) {
        let fields: &[Vec3] = if with_color {
            &[
                self.pos_min,
                self.pos_max,
                self.scale_min,
                self.scale_max,
                self.color_min,
                self.color_max,
            ]
        } else {
            &[self.pos_min, self.pos_max, self.scale_min, self.scale_max]
        };
        for v in fields {
            out.extend_from_slice(&v.to_array());
        }
    }

    pub const fn stride(with_color: bool) -> usize {
        if with_color {
            CHUNK_FLOATS
        } else {
            CHUNK_FLOATS_NO_COLOR
        }
    }
}

/// Four packed fields per splat, laid out as one RGBA32U texel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PackedSplat {
    pub pos_bits: u32,
    pub rot_bits: u32,
    pub scale_bits: u32,
    pub color_bits: u32,
}

/// Output of the packed attribute decoder for one splat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedAttributes {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub color: Vec4,
}

/// Everything the rasterizer needs for one visible splat in the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedSplat {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub color: Vec4,
    pub sh: ShCoeffs,
    pub cov_a: Vec3,
    pub cov_b: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ShBands {
    #[default]
    Zero,
    One,
    Two,
    Three,
}

impl ShBands {
    #[inline]
    pub const fn coeff_count(self) -> usize {
        match self {
            ShBands::Zero => 0,
            ShBands::One => 3,
            ShBands::Two => 8,
            ShBands::Three => 15,
        }
    }

    /// Largest band count whose coefficients fit in `dim` triples.
    #[inline]
    pub const fn from_coeff_count(dim: usize) -> Self {
        if dim < 3 {
            ShBands::Zero
        } else if dim < 8 {
            ShBands::One
        } else if dim < 15 {
            ShBands::Two
        } else {
            ShBands::Three
        }
    }

    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ShBands::Zero),
            1 => Some(ShBands::One),
            2 => Some(ShBands::Two),
            3 => Some(ShBands::Three),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShMode {
    None,
    Palette,
    Direct,
}

impl ShMode {
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(ShMode::None),
            1 => Some(ShMode::Palette),
            2 => Some(ShMode::Direct),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            ShMode::None => 0,
            ShMode::Palette => 1,
            ShMode::Direct => 2,
        }
    }
}

/// Uncompressed splats in 3DGS PLY conventions: log scales, logit opacity,
/// DC color as `f_dc`, quaternions as (x, y, z, w), SH interleaved per coefficient.
#[derive(Debug, Default, Clone)]
pub struct GaussianCloud {
    pub num_points: usize,
    pub sh_bands: ShBands,
    pub positions: Vec<f32>,
    pub scales: Vec<f32>,
    pub rotations: Vec<f32>,
    pub alphas: Vec<f32>,
    pub colors: Vec<f32>,
    pub sh: Vec<f32>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct AssetHeader {
    pub magic: U32,
    pub version: U32,
    pub num_splats: U32,
    pub sh_bands: u8,
    pub sh_mode: u8,
    pub flags: u8,
    pub reserved: u8,
}
