use glam::{Mat3, Quat, Vec3};
use half::f16;

/// Unit quaternion, or identity when `q` has no usable length.
#[inline]
pub(crate) fn normalize_quat(q: Quat) -> Quat {
    let len = q.length();
    if len > 0.0 && len.is_finite() {
        Quat::from_xyzw(q.x / len, q.y / len, q.z / len, q.w / len)
    } else {
        Quat::IDENTITY
    }
}

/// Upper triangle of the splat covariance `R * diag(scale)^2 * R^T`, split
/// into `cov_a = (xx, xy, xz)` and `cov_b = (yy, yz, zz)`.
#[inline]
pub fn build_covariance(rotation: Quat, scale: Vec3) -> (Vec3, Vec3) {
    let r = Mat3::from_quat(normalize_quat(rotation));
    let m = [r.x_axis * scale.x, r.y_axis * scale.y, r.z_axis * scale.z];

    let mut cov_a = Vec3::ZERO;
    let mut cov_b = Vec3::ZERO;
    for row in &m {
        cov_a += Vec3::new(row.x * row.x, row.x * row.y, row.x * row.z);
        cov_b += Vec3::new(row.y * row.y, row.y * row.z, row.z * row.z);
    }
    (cov_a, cov_b)
}

/// GPU layout of one splat's transform: an RGBA32U texel holding the center
/// and two half-float covariance terms, and an RGBA16F texel holding the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformTexels {
    pub a: [u32; 4],
    pub b: [u16; 4],
}

pub fn pack_transform(position: Vec3, cov_a: Vec3, cov_b: Vec3) -> TransformTexels {
    let h = |v: f32| f16::from_f32(v).to_bits();
    TransformTexels {
        a: [
            position.x.to_bits(),
            position.y.to_bits(),
            position.z.to_bits(),
            h(cov_b.x) as u32 | ((h(cov_b.y) as u32) << 16),
        ],
        b: [h(cov_a.x), h(cov_a.y), h(cov_a.z), h(cov_b.z)],
    }
}

pub fn unpack_transform(t: &TransformTexels) -> (Vec3, Vec3, Vec3) {
    let f = |bits: u16| f16::from_bits(bits).to_f32();
    let position = Vec3::new(
        f32::from_bits(t.a[0]),
        f32::from_bits(t.a[1]),
        f32::from_bits(t.a[2]),
    );
    let cov_a = Vec3::new(f(t.b[0]), f(t.b[1]), f(t.b[2]));
    let cov_b = Vec3::new(
        f((t.a[3] & 0xFFFF) as u16),
        f((t.a[3] >> 16) as u16),
        f(t.b[3]),
    );
    (position, cov_a, cov_b)
}
