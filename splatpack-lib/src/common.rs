use glam::{Vec3, Vec4};

pub const ZSTD_MAX_COMPRESSION_LVL: u32 = 22;

/// Number of consecutive splats sharing one set of dequantization bounds.
pub const CHUNK_SPLATS: usize = 256;

/// Floats per chunk record when color bounds are present.
pub const CHUNK_FLOATS: usize = 18;
/// Floats per chunk record in tables without color bounds.
pub const CHUNK_FLOATS_NO_COLOR: usize = 12;

/// Palette entries per row of the centroid texture.
pub const PALETTE_ROW_ENTRIES: usize = 64;
/// Coefficient texels stored per palette entry.
pub const PALETTE_ENTRY_COEFFS: usize = 15;

/// Maximum number of SH coefficient triples per splat (3 bands).
pub const MAX_SH_COEFFS: usize = 15;

/// Log-space scale limit used by the encoder and the decoder.
pub const LOG_SCALE_LIMIT: f32 = 20.0;

/// Range normalizer for the three stored quaternion components.
pub const ROTATION_NORM: f32 = 1.0 / (std::f32::consts::SQRT_2 * 0.5);

pub const SH_C0: f32 = 0.282_094_8;

#[inline]
pub(crate) const fn unorm_mask(bits: u32) -> u32 {
    (1 << bits) - 1
}

#[inline]
pub(crate) fn unpack_unorm(value: u32, bits: u32) -> f32 {
    let t = unorm_mask(bits);
    (value & t) as f32 / t as f32
}

/// Quantizes a fraction in `[0, 1]` to `bits` bits, rounding to nearest.
#[inline]
pub(crate) fn pack_unorm(value: f32, bits: u32) -> u32 {
    let t = unorm_mask(bits);
    let v = if value.is_finite() { value } else { 0.0 };
    ((v * t as f32 + 0.5).floor().clamp(0.0, t as f32)) as u32
}

#[inline]
pub(crate) fn unpack_111011(value: u32) -> Vec3 {
    Vec3::new(
        unpack_unorm(value >> 21, 11),
        unpack_unorm(value >> 11, 10),
        unpack_unorm(value, 11),
    )
}

#[inline]
pub(crate) fn pack_111011(v: Vec3) -> u32 {
    (pack_unorm(v.x, 11) << 21) | (pack_unorm(v.y, 10) << 11) | pack_unorm(v.z, 11)
}

#[inline]
pub(crate) fn unpack_8888(value: u32) -> Vec4 {
    Vec4::new(
        unpack_unorm(value >> 24, 8),
        unpack_unorm(value >> 16, 8),
        unpack_unorm(value >> 8, 8),
        unpack_unorm(value, 8),
    )
}

#[inline]
pub(crate) fn pack_8888(v: Vec4) -> u32 {
    (pack_unorm(v.x, 8) << 24)
        | (pack_unorm(v.y, 8) << 16)
        | (pack_unorm(v.z, 8) << 8)
        | pack_unorm(v.w, 8)
}

/// `a * (1 - t) + b * t`, exact at both ends.
#[inline]
pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

#[inline]
pub(crate) fn lerp3(min: Vec3, max: Vec3, t: Vec3) -> Vec3 {
    Vec3::new(
        lerp(min.x, max.x, t.x),
        lerp(min.y, max.y, t.y),
        lerp(min.z, max.z, t.z),
    )
}

/// Inverse of [`lerp3`]; axes with an empty range map to zero.
#[inline]
pub(crate) fn inv_lerp3(min: Vec3, max: Vec3, v: Vec3) -> Vec3 {
    let axis = |lo: f32, hi: f32, x: f32| {
        let range = hi - lo;
        if range > 0.0 {
            ((x - lo) / range).clamp(0.0, 1.0)
        } else {
            0.0
        }
    };
    Vec3::new(
        axis(min.x, max.x, v.x),
        axis(min.y, max.y, v.y),
        axis(min.z, max.z, v.z),
    )
}

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    if x > 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let t = x.exp();
        t / (1.0 + t)
    }
}

/// Logit that saturates to +-40 at the ends of the unit interval.
#[inline]
pub(crate) fn inv_sigmoid(x: f32) -> f32 {
    if x <= 0.0 {
        -40.0
    } else if x >= 1.0 {
        40.0
    } else {
        -(1.0 / x - 1.0).ln()
    }
}

#[inline]
pub(crate) fn finite_or_zero(v: Vec3) -> Vec3 {
    let f = |x: f32| if x.is_finite() { x } else { 0.0 };
    Vec3::new(f(v.x), f(v.y), f(v.z))
}

/// Width and height of the smallest near-square texture holding `count` texels.
#[inline]
pub fn texture_size_for(count: usize) -> (usize, usize) {
    if count == 0 {
        return (1, 1);
    }
    let mut width = (count as f64).sqrt().ceil() as usize;
    // guard against float rounding just below the true root
    while width * width < count {
        width += 1;
    }
    let height = count.div_ceil(width);
    (width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unorm_extremes_are_exact() {
        for bits in [8, 10, 11] {
            assert_eq!(unpack_unorm(0, bits), 0.0);
            assert_eq!(unpack_unorm(unorm_mask(bits), bits), 1.0);
            assert_eq!(pack_unorm(0.0, bits), 0);
            assert_eq!(pack_unorm(1.0, bits), unorm_mask(bits));
        }
    }

    #[test]
    fn test_pack_unorm_saturates() {
        assert_eq!(pack_unorm(-3.0, 11), 0);
        assert_eq!(pack_unorm(7.5, 10), unorm_mask(10));
        assert_eq!(pack_unorm(f32::NAN, 8), 0);
    }

    #[test]
    fn test_111011_field_order() {
        let bits = pack_111011(Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(bits, 0xFFE0_07FF);
        assert_eq!(unpack_111011(bits), Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn test_8888_red_is_high_byte() {
        let v = unpack_8888(0xFF00_0080);
        assert_eq!(v.x, 1.0);
        assert_eq!(v.y, 0.0);
        assert_eq!(v.z, 0.0);
        assert!((v.w - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_lerp_ends() {
        assert_eq!(lerp(-3.25, 17.5, 0.0), -3.25);
        assert_eq!(lerp(-3.25, 17.5, 1.0), 17.5);
    }

    #[test]
    fn test_inv_sigmoid_saturates() {
        assert_eq!(inv_sigmoid(0.0), -40.0);
        assert_eq!(inv_sigmoid(1.0), 40.0);
        assert!((inv_sigmoid(sigmoid(1.5)) - 1.5).abs() < 1e-4);
    }

    #[test]
    fn test_texture_size_for() {
        assert_eq!(texture_size_for(0), (1, 1));
        assert_eq!(texture_size_for(1), (1, 1));
        assert_eq!(texture_size_for(10), (4, 3));
        assert_eq!(texture_size_for(256), (16, 16));
        let (w, h) = texture_size_for(1_000_003);
        assert!(w * h >= 1_000_003);
    }
}
