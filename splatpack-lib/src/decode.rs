//! Packed attribute decoder.
//!
//! Every splat stores four u32 fields. Position and scale are three
//! chunk-relative fractions packed 11/10/11, color is four 8-bit channels and
//! rotation keeps three 10-bit quaternion components plus a 2-bit index of the
//! component that was dropped.

use glam::{Quat, Vec3, Vec4};

use crate::common::{
    finite_or_zero, lerp3, unpack_111011, unpack_8888, unpack_unorm, LOG_SCALE_LIMIT,
    ROTATION_NORM,
};
use crate::structures::{Chunk, DecodedAttributes, PackedSplat};

/// Which quaternion component, in (w, x, y, z) slot order, was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuatMode {
    W = 0,
    X = 1,
    Y = 2,
    Z = 3,
}

impl QuatMode {
    pub const ALL: [QuatMode; 4] = [QuatMode::W, QuatMode::X, QuatMode::Y, QuatMode::Z];

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => QuatMode::W,
            1 => QuatMode::X,
            2 => QuatMode::Y,
            _ => QuatMode::Z,
        }
    }

    #[inline]
    pub const fn slot(self) -> usize {
        self as usize
    }
}

/// Puts the reconstructed component `m` into the slot named by `mode` and the
/// stored components, in order, into the remaining three.
#[inline]
pub(crate) fn assemble_quat(mode: QuatMode, stored: [f32; 3], m: f32) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    let mut next = 0;
    for (slot, o) in out.iter_mut().enumerate() {
        if slot == mode.slot() {
            *o = m;
        } else {
            *o = stored[next];
            next += 1;
        }
    }
    out
}

#[inline]
pub fn unpack_rotation(bits: u32) -> Quat {
    let a = (unpack_unorm(bits >> 20, 10) - 0.5) * ROTATION_NORM;
    let b = (unpack_unorm(bits >> 10, 10) - 0.5) * ROTATION_NORM;
    let c = (unpack_unorm(bits, 10) - 0.5) * ROTATION_NORM;
    // rounding can push the radicand just below zero
    let m = (1.0 - (a * a + b * b + c * c)).max(0.0).sqrt();
    let [w, x, y, z] = assemble_quat(QuatMode::from_bits(bits >> 30), [a, b, c], m);
    Quat::from_xyzw(x, y, z, w)
}

#[inline]
pub fn unpack_position(chunk: &Chunk, bits: u32) -> Vec3 {
    finite_or_zero(lerp3(chunk.pos_min, chunk.pos_max, unpack_111011(bits)))
}

/// Scale before exponentiation, as stored in PLY files.
#[inline]
pub fn unpack_log_scale(chunk: &Chunk, bits: u32) -> Vec3 {
    lerp3(chunk.scale_min, chunk.scale_max, unpack_111011(bits))
        .clamp(Vec3::splat(-LOG_SCALE_LIMIT), Vec3::splat(LOG_SCALE_LIMIT))
}

#[inline]
pub fn unpack_scale(chunk: &Chunk, bits: u32) -> Vec3 {
    unpack_log_scale(chunk, bits).exp()
}

#[inline]
pub fn unpack_color(chunk: &Chunk, bits: u32) -> Vec4 {
    let c = unpack_8888(bits);
    let rgb = finite_or_zero(lerp3(chunk.color_min, chunk.color_max, c.truncate()));
    rgb.extend(c.w)
}

/// Reconstructs one splat from its packed fields and its chunk's bounds.
#[inline]
pub fn decode(chunk: &Chunk, packed: &PackedSplat) -> DecodedAttributes {
    DecodedAttributes {
        position: unpack_position(chunk, packed.pos_bits),
        rotation: unpack_rotation(packed.rot_bits),
        scale: unpack_scale(chunk, packed.scale_bits),
        color: unpack_color(chunk, packed.color_bits),
    }
}
