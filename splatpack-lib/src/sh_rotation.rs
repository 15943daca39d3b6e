//! Rotation of SH coefficients up to band 3.
//!
//! The per-band rotation matrices are built once from a 3x3 rotation and can
//! then be applied to any number of splats.

use glam::{Mat3, Quat};

use crate::covariance::{build_covariance, normalize_quat};
use crate::sh::ShCoeffs;
use crate::structures::ReconstructedSplat;

const K03_02: f32 = 1.2247449;
const K01_03: f32 = 0.57735026;
const K02_03: f32 = 0.8164966;
const K04_03: f32 = 1.1547005;
const K01_04: f32 = 0.5;
const K03_04: f32 = 0.8660254;
const K01_05: f32 = 0.4472136;
const K03_05: f32 = 0.7745967;
const K06_05: f32 = 1.0954452;
const K08_05: f32 = 1.264911;
const K09_05: f32 = 1.3416408;
const K01_06: f32 = 0.4082483;
const K05_06: f32 = 0.91287094;
const K03_08: f32 = 0.61237246;
const K05_08: f32 = 0.7905694;
const K09_08: f32 = 1.0606601;
const K05_09: f32 = 0.74535596;
const K08_09: f32 = 0.94280905;
const K01_10: f32 = 0.31622776;
const K03_10: f32 = 0.5477226;
const K01_12: f32 = 0.28867513;
const K04_15: f32 = 0.5163978;
const K01_16: f32 = 0.25;
const K15_16: f32 = 0.96824586;
const K01_18: f32 = 0.23570226;
const K01_60: f32 = 0.12909944;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShRotation {
    sh1: [[f32; 3]; 3],
    sh2: [[f32; 5]; 5],
    sh3: [[f32; 7]; 7],
}

impl ShRotation {
    pub fn new(mat: Mat3) -> Self {
        let rot = mat.to_cols_array();

        #[rustfmt::skip]
        let s1 = [
            [ rot[4], -rot[7],  rot[1]],
            [-rot[5],  rot[8], -rot[2]],
            [ rot[3], -rot[6],  rot[0]],
        ];

        #[rustfmt::skip]
        let s2 = [[
            K01_04 * ((s1[2][2] * s1[0][0] + s1[2][0] * s1[0][2]) + (s1[0][2] * s1[2][0] + s1[0][0] * s1[2][2])),
                          (s1[2][1] * s1[0][0] + s1[0][1] * s1[2][0]),
            K03_04 *  (s1[2][1] * s1[0][1] + s1[0][1] * s1[2][1]),
                          (s1[2][1] * s1[0][2] + s1[0][1] * s1[2][2]),
            K01_04 * ((s1[2][2] * s1[0][2] - s1[2][0] * s1[0][0]) + (s1[0][2] * s1[2][2] - s1[0][0] * s1[2][0]))
        ], [
            K01_04 * ((s1[1][2] * s1[0][0] + s1[1][0] * s1[0][2]) + (s1[0][2] * s1[1][0] + s1[0][0] * s1[1][2])),
                           s1[1][1] * s1[0][0] + s1[0][1] * s1[1][0],
            K03_04 *  (s1[1][1] * s1[0][1] + s1[0][1] * s1[1][1]),
                           s1[1][1] * s1[0][2] + s1[0][1] * s1[1][2],
            K01_04 * ((s1[1][2] * s1[0][2] - s1[1][0] * s1[0][0]) + (s1[0][2] * s1[1][2] - s1[0][0] * s1[1][0])),
        ], [
            K01_03 * (s1[1][2] * s1[1][0] + s1[1][0] * s1[1][2]) - K01_12 * ((s1[2][2] * s1[2][0] + s1[2][0] * s1[2][2]) + (s1[0][2] * s1[0][0] + s1[0][0] * s1[0][2])),
            K04_03 *  s1[1][1] * s1[1][0] - K01_03 * (s1[2][1] * s1[2][0] + s1[0][1] * s1[0][0]),
                          s1[1][1] * s1[1][1] - K01_04 * (s1[2][1] * s1[2][1] + s1[0][1] * s1[0][1]),
            K04_03 *  s1[1][1] * s1[1][2] - K01_03 * (s1[2][1] * s1[2][2] + s1[0][1] * s1[0][2]),
            K01_03 * (s1[1][2] * s1[1][2] - s1[1][0] * s1[1][0]) - K01_12 * ((s1[2][2] * s1[2][2] - s1[2][0] * s1[2][0]) + (s1[0][2] * s1[0][2] - s1[0][0] * s1[0][0])),
        ], [
            K01_04 * ((s1[1][2] * s1[2][0] + s1[1][0] * s1[2][2]) + (s1[2][2] * s1[1][0] + s1[2][0] * s1[1][2])),
                           s1[1][1] * s1[2][0] + s1[2][1] * s1[1][0],
            K03_04 *  (s1[1][1] * s1[2][1] + s1[2][1] * s1[1][1]),
                           s1[1][1] * s1[2][2] + s1[2][1] * s1[1][2],
            K01_04 * ((s1[1][2] * s1[2][2] - s1[1][0] * s1[2][0]) + (s1[2][2] * s1[1][2] - s1[2][0] * s1[1][0])),
        ], [
            K01_04 * ((s1[2][2] * s1[2][0] + s1[2][0] * s1[2][2]) - (s1[0][2] * s1[0][0] + s1[0][0] * s1[0][2])),
                          (s1[2][1] * s1[2][0] - s1[0][1] * s1[0][0]),
            K03_04 *  (s1[2][1] * s1[2][1] - s1[0][1] * s1[0][1]),
                          (s1[2][1] * s1[2][2] - s1[0][1] * s1[0][2]),
            K01_04 * ((s1[2][2] * s1[2][2] - s1[2][0] * s1[2][0]) - (s1[0][2] * s1[0][2] - s1[0][0] * s1[0][0])),
        ]];

        #[rustfmt::skip]
        let s3 = [[
            K01_04 * ((s1[2][2] * s2[0][0] + s1[2][0] * s2[0][4]) + (s1[0][2] * s2[4][0] + s1[0][0] * s2[4][4])),
            K03_02 *  (s1[2][1] * s2[0][0] + s1[0][1] * s2[4][0]),
            K15_16 *  (s1[2][1] * s2[0][1] + s1[0][1] * s2[4][1]),
            K05_06 *  (s1[2][1] * s2[0][2] + s1[0][1] * s2[4][2]),
            K15_16 *  (s1[2][1] * s2[0][3] + s1[0][1] * s2[4][3]),
            K03_02 *  (s1[2][1] * s2[0][4] + s1[0][1] * s2[4][4]),
            K01_04 * ((s1[2][2] * s2[0][4] - s1[2][0] * s2[0][0]) + (s1[0][2] * s2[4][4] - s1[0][0] * s2[4][0])),
        ], [
            K01_06 * (s1[1][2] * s2[0][0] + s1[1][0] * s2[0][4]) + K01_06 * ((s1[2][2] * s2[1][0] + s1[2][0] * s2[1][4]) + (s1[0][2] * s2[3][0] + s1[0][0] * s2[3][4])),
                          s1[1][1] * s2[0][0]                          +               (s1[2][1] * s2[1][0] + s1[0][1] * s2[3][0]),
            K05_08 *  s1[1][1] * s2[0][1]                          + K05_08 *  (s1[2][1] * s2[1][1] + s1[0][1] * s2[3][1]),
            K05_09 *  s1[1][1] * s2[0][2]                          + K05_09 *  (s1[2][1] * s2[1][2] + s1[0][1] * s2[3][2]),
            K05_08 *  s1[1][1] * s2[0][3]                          + K05_08 *  (s1[2][1] * s2[1][3] + s1[0][1] * s2[3][3]),
                          s1[1][1] * s2[0][4]                          +               (s1[2][1] * s2[1][4] + s1[0][1] * s2[3][4]),
            K01_06 * (s1[1][2] * s2[0][4] - s1[1][0] * s2[0][0]) + K01_06 * ((s1[2][2] * s2[1][4] - s1[2][0] * s2[1][0]) + (s1[0][2] * s2[3][4] - s1[0][0] * s2[3][0])),
        ], [
            K04_15 * (s1[1][2] * s2[1][0] + s1[1][0] * s2[1][4]) + K01_05 * (s1[0][2] * s2[2][0] + s1[0][0] * s2[2][4]) - K01_60 * ((s1[2][2] * s2[0][0] + s1[2][0] * s2[0][4]) - (s1[0][2] * s2[4][0] + s1[0][0] * s2[4][4])),
            K08_05 *  s1[1][1] * s2[1][0]                          + K06_05 *  s1[0][1] * s2[2][0] - K01_10 * (s1[2][1] * s2[0][0] - s1[0][1] * s2[4][0]),
                          s1[1][1] * s2[1][1]                          + K03_04 *  s1[0][1] * s2[2][1] - K01_16 * (s1[2][1] * s2[0][1] - s1[0][1] * s2[4][1]),
            K08_09 *  s1[1][1] * s2[1][2]                          + K02_03 *  s1[0][1] * s2[2][2] - K01_18 * (s1[2][1] * s2[0][2] - s1[0][1] * s2[4][2]),
                          s1[1][1] * s2[1][3]                          + K03_04 *  s1[0][1] * s2[2][3] - K01_16 * (s1[2][1] * s2[0][3] - s1[0][1] * s2[4][3]),
            K08_05 *  s1[1][1] * s2[1][4]                          + K06_05 *  s1[0][1] * s2[2][4] - K01_10 * (s1[2][1] * s2[0][4] - s1[0][1] * s2[4][4]),
            K04_15 * (s1[1][2] * s2[1][4] - s1[1][0] * s2[1][0]) + K01_05 * (s1[0][2] * s2[2][4] - s1[0][0] * s2[2][0]) - K01_60 * ((s1[2][2] * s2[0][4] - s1[2][0] * s2[0][0]) - (s1[0][2] * s2[4][4] - s1[0][0] * s2[4][0])),
        ], [
            K03_10 * (s1[1][2] * s2[2][0] + s1[1][0] * s2[2][4]) - K01_10 * ((s1[2][2] * s2[3][0] + s1[2][0] * s2[3][4]) + (s1[0][2] * s2[1][0] + s1[0][0] * s2[1][4])),
            K09_05 *  s1[1][1] * s2[2][0]                          - K03_05 *  (s1[2][1] * s2[3][0] + s1[0][1] * s2[1][0]),
            K09_08 *  s1[1][1] * s2[2][1]                          - K03_08 *  (s1[2][1] * s2[3][1] + s1[0][1] * s2[1][1]),
                          s1[1][1] * s2[2][2]                          - K01_03 *  (s1[2][1] * s2[3][2] + s1[0][1] * s2[1][2]),
            K09_08 *  s1[1][1] * s2[2][3]                          - K03_08 *  (s1[2][1] * s2[3][3] + s1[0][1] * s2[1][3]),
            K09_05 *  s1[1][1] * s2[2][4]                          - K03_05 *  (s1[2][1] * s2[3][4] + s1[0][1] * s2[1][4]),
            K03_10 * (s1[1][2] * s2[2][4] - s1[1][0] * s2[2][0]) - K01_10 * ((s1[2][2] * s2[3][4] - s1[2][0] * s2[3][0]) + (s1[0][2] * s2[1][4] - s1[0][0] * s2[1][0])),
        ], [
            K04_15 * (s1[1][2] * s2[3][0] + s1[1][0] * s2[3][4]) + K01_05 * (s1[2][2] * s2[2][0] + s1[2][0] * s2[2][4]) - K01_60 * ((s1[2][2] * s2[4][0] + s1[2][0] * s2[4][4]) + (s1[0][2] * s2[0][0] + s1[0][0] * s2[0][4])),
            K08_05 *  s1[1][1] * s2[3][0]                          + K06_05 *  s1[2][1] * s2[2][0] - K01_10 * (s1[2][1] * s2[4][0] + s1[0][1] * s2[0][0]),
                          s1[1][1] * s2[3][1]                          + K03_04 *  s1[2][1] * s2[2][1] - K01_16 * (s1[2][1] * s2[4][1] + s1[0][1] * s2[0][1]),
            K08_09 *  s1[1][1] * s2[3][2]                          + K02_03 *  s1[2][1] * s2[2][2] - K01_18 * (s1[2][1] * s2[4][2] + s1[0][1] * s2[0][2]),
                          s1[1][1] * s2[3][3]                          + K03_04 *  s1[2][1] * s2[2][3] - K01_16 * (s1[2][1] * s2[4][3] + s1[0][1] * s2[0][3]),
            K08_05 *  s1[1][1] * s2[3][4]                          + K06_05 *  s1[2][1] * s2[2][4] - K01_10 * (s1[2][1] * s2[4][4] + s1[0][1] * s2[0][4]),
            K04_15 * (s1[1][2] * s2[3][4] - s1[1][0] * s2[3][0]) + K01_05 * (s1[2][2] * s2[2][4] - s1[2][0] * s2[2][0]) - K01_60 * ((s1[2][2] * s2[4][4] - s1[2][0] * s2[4][0]) + (s1[0][2] * s2[0][4] - s1[0][0] * s2[0][0])),
        ], [
            K01_06 * (s1[1][2] * s2[4][0] + s1[1][0] * s2[4][4]) + K01_06 * ((s1[2][2] * s2[3][0] + s1[2][0] * s2[3][4]) - (s1[0][2] * s2[1][0] + s1[0][0] * s2[1][4])),
                          s1[1][1] * s2[4][0]                          +               (s1[2][1] * s2[3][0] - s1[0][1] * s2[1][0]),
            K05_08 *  s1[1][1] * s2[4][1]                          + K05_08 *  (s1[2][1] * s2[3][1] - s1[0][1] * s2[1][1]),
            K05_09 *  s1[1][1] * s2[4][2]                          + K05_09 *  (s1[2][1] * s2[3][2] - s1[0][1] * s2[1][2]),
            K05_08 *  s1[1][1] * s2[4][3]                          + K05_08 *  (s1[2][1] * s2[3][3] - s1[0][1] * s2[1][3]),
                          s1[1][1] * s2[4][4]                          +               (s1[2][1] * s2[3][4] - s1[0][1] * s2[1][4]),
            K01_06 * (s1[1][2] * s2[4][4] - s1[1][0] * s2[4][0]) + K01_06 * ((s1[2][2] * s2[3][4] - s1[2][0] * s2[3][0]) - (s1[0][2] * s2[1][4] - s1[0][0] * s2[1][0])),
        ], [
            K01_04 * ((s1[2][2] * s2[4][0] + s1[2][0] * s2[4][4]) - (s1[0][2] * s2[0][0] + s1[0][0] * s2[0][4])),
            K03_02 *  (s1[2][1] * s2[4][0] - s1[0][1] * s2[0][0]),
            K15_16 *  (s1[2][1] * s2[4][1] - s1[0][1] * s2[0][1]),
            K05_06 *  (s1[2][1] * s2[4][2] - s1[0][1] * s2[0][2]),
            K15_16 *  (s1[2][1] * s2[4][3] - s1[0][1] * s2[0][3]),
            K03_02 *  (s1[2][1] * s2[4][4] - s1[0][1] * s2[0][4]),
            K01_04 * ((s1[2][2] * s2[4][4] - s1[2][0] * s2[4][0]) - (s1[0][2] * s2[0][4] - s1[0][0] * s2[0][0])),
        ]];

        Self {
            sh1: s1,
            sh2: s2,
            sh3: s3,
        }
    }

    pub fn from_quat(q: Quat) -> Self {
        Self::new(Mat3::from_quat(normalize_quat(q)))
    }

    /// Rotates the coefficients in place. Bands beyond `coeffs.len()` are
    /// not touched; the DC term is rotation invariant and is not stored here.
    pub fn apply(&self, coeffs: &mut ShCoeffs) {
        let src = *coeffs;
        let src = src.as_slice();
        let dst = coeffs.as_mut_slice();

        if dst.len() >= 3 {
            rotate_band(&self.sh1, &src[0..3], &mut dst[0..3]);
        }
        if dst.len() >= 8 {
            rotate_band(&self.sh2, &src[3..8], &mut dst[3..8]);
        }
        if dst.len() >= 15 {
            rotate_band(&self.sh3, &src[8..15], &mut dst[8..15]);
        }
    }
}

#[inline]
fn rotate_band<const N: usize>(m: &[[f32; N]; N], src: &[glam::Vec3], dst: &mut [glam::Vec3]) {
    for (row, out) in m.iter().zip(dst.iter_mut()) {
        *out = row.iter().zip(src).map(|(&w, &c)| c * w).sum();
    }
}

impl ReconstructedSplat {
    /// Rotates the splat about the origin, including its view-dependent color.
    pub fn rotate(&mut self, q: Quat) {
        let q = normalize_quat(q);
        self.position = q * self.position;
        self.rotation = (q * self.rotation).normalize();
        let (cov_a, cov_b) = build_covariance(self.rotation, self.scale);
        self.cov_a = cov_a;
        self.cov_b = cov_b;
        ShRotation::from_quat(q).apply(&mut self.sh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{EulerRot, Vec3, Vec4};

    fn coeffs() -> ShCoeffs {
        let v: Vec<Vec3> = (0..15)
            .map(|i| {
                let t = i as f32;
                Vec3::new((t * 0.7).sin(), (t * 1.3).cos() * 0.5, t * 0.05 - 0.3)
            })
            .collect();
        ShCoeffs::from_slice(&v)
    }

    fn band_energy(c: &ShCoeffs, range: std::ops::Range<usize>) -> Vec3 {
        c.as_slice()[range].iter().map(|v| *v * *v).sum()
    }

    #[test]
    fn test_identity_keeps_coefficients() {
        let mut c = coeffs();
        ShRotation::new(Mat3::IDENTITY).apply(&mut c);
        for (a, b) in c.as_slice().iter().zip(coeffs().as_slice()) {
            assert!((*a - *b).abs().max_element() < 1e-6);
        }
    }

    #[test]
    fn test_rotation_preserves_band_energy() {
        let q = Quat::from_euler(EulerRot::XYZ, 0.4, -1.2, 2.0);
        let mut c = coeffs();
        ShRotation::from_quat(q).apply(&mut c);
        let before = coeffs();
        for range in [0..3, 3..8, 8..15] {
            let e0 = band_energy(&before, range.clone());
            let e1 = band_energy(&c, range);
            assert!((e0 - e1).abs().max_element() < 1e-4, "{:?} vs {:?}", e0, e1);
        }
    }

    #[test]
    fn test_inverse_rotation_restores_coefficients() {
        let q = Quat::from_euler(EulerRot::ZYX, 1.1, 0.3, -0.8);
        let mut c = coeffs();
        ShRotation::from_quat(q).apply(&mut c);
        ShRotation::from_quat(q.inverse()).apply(&mut c);
        for (a, b) in c.as_slice().iter().zip(coeffs().as_slice()) {
            assert!((*a - *b).abs().max_element() < 1e-4, "{:?} vs {:?}", a, b);
        }
    }

    #[test]
    fn test_partial_bands_are_respected() {
        let mut c = ShCoeffs::from_slice(&coeffs().as_slice()[..3]);
        ShRotation::from_quat(Quat::from_rotation_x(0.5)).apply(&mut c);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_splat_rotation_moves_position_and_covariance() {
        let (cov_a, cov_b) = build_covariance(Quat::IDENTITY, Vec3::new(1.0, 2.0, 3.0));
        let mut splat = ReconstructedSplat {
            position: Vec3::X,
            rotation: Quat::IDENTITY,
            scale: Vec3::new(1.0, 2.0, 3.0),
            color: Vec4::ONE,
            sh: ShCoeffs::default(),
            cov_a,
            cov_b,
        };
        splat.rotate(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        assert!((splat.position - Vec3::Y).abs().max_element() < 1e-6);
        assert!((splat.cov_a - Vec3::new(4.0, 0.0, 0.0)).abs().max_element() < 1e-5);
        assert!((splat.cov_b - Vec3::new(1.0, 0.0, 9.0)).abs().max_element() < 1e-5);
    }
}
