use glam::{Quat, Vec3};
use log::debug;

use crate::asset::SplatAsset;
use crate::chunk::ChunkTable;
use crate::common::{
    finite_or_zero, inv_lerp3, pack_111011, pack_8888, pack_unorm, sigmoid, texture_size_for,
    CHUNK_SPLATS, LOG_SCALE_LIMIT, ROTATION_NORM, SH_C0,
};
use crate::covariance::normalize_quat;
use crate::error::SplatError;
use crate::sh::{pack_direct_coeffs, DirectTextures, ShDirect, ShStore};
use crate::structures::{Chunk, GaussianCloud, PackedSplat, ShBands};
use crate::texture::Texture2D;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Caps the SH bands written; `None` keeps every band the cloud has.
    pub sh_bands: Option<ShBands>,
    /// Write per-chunk color bounds (18-float records instead of 12).
    pub color_bounds: bool,
    /// Sort splats along a Morton curve before cutting chunks.
    pub morton_order: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            sh_bands: None,
            color_bounds: true,
            morton_order: true,
        }
    }
}

/// Packs a rotation as 2-bit dropped-component index plus three 10-bit
/// components. The largest-magnitude component is dropped, after flipping the
/// quaternion so that component is positive.
pub fn pack_rotation(q: Quat) -> u32 {
    let q = normalize_quat(q);
    let mut wxyz = [q.w, q.x, q.y, q.z];
    let largest = (1..4).fold(0, |best, i| {
        if wxyz[i].abs() > wxyz[best].abs() {
            i
        } else {
            best
        }
    });
    if wxyz[largest] < 0.0 {
        wxyz.iter_mut().for_each(|c| *c = -*c);
    }

    let mut bits = (largest as u32) << 30;
    let mut shift = 20;
    for (slot, &c) in wxyz.iter().enumerate() {
        if slot == largest {
            continue;
        }
        bits |= pack_unorm(c / ROTATION_NORM + 0.5, 10) << shift;
        shift -= 10;
    }
    bits
}

#[inline]
fn part1by2(v: u32) -> u32 {
    let mut x = v & 0x0000_03ff;
    x = (x ^ (x << 16)) & 0xff00_00ff;
    x = (x ^ (x << 8)) & 0x0300_f00f;
    x = (x ^ (x << 4)) & 0x030c_30c3;
    (x ^ (x << 2)) & 0x0924_9249
}

/// Interleaves three 10-bit cell coordinates into a 30-bit Morton code.
#[inline]
pub fn encode_morton3(x: u32, y: u32, z: u32) -> u32 {
    (part1by2(z) << 2) | (part1by2(y) << 1) | part1by2(x)
}

/// Order that visits the splats along a Morton curve over the cloud's
/// bounding box, 1024 cells per axis. Splats in the same cell keep their
/// input order.
pub fn morton_order(cloud: &GaussianCloud) -> Vec<u32> {
    let n = cloud.num_points.min(cloud.positions.len() / 3);
    let position =
        |i: usize| finite_or_zero(Vec3::from_slice(&cloud.positions[i * 3..i * 3 + 3]));
    let (lo, hi) = bounds((0..n).map(position));
    let cells = |min: f32, max: f32| if max > min { 1024.0 / (max - min) } else { 0.0 };
    let size = Vec3::new(cells(lo.x, hi.x), cells(lo.y, hi.y), cells(lo.z, hi.z));

    let codes: Vec<u32> = (0..n)
        .map(|i| {
            let cell = ((position(i) - lo) * size)
                .floor()
                .clamp(Vec3::ZERO, Vec3::splat(1023.0));
            encode_morton3(cell.x as u32, cell.y as u32, cell.z as u32)
        })
        .collect();

    let mut order: Vec<u32> = (0..n as u32).collect();
    order.sort_by_key(|&i| codes[i as usize]);
    order
}

struct CloudView<'a> {
    cloud: &'a GaussianCloud,
    sh_dim: usize,
}

impl CloudView<'_> {
    fn position(&self, i: usize) -> Vec3 {
        finite_or_zero(Vec3::from_slice(&self.cloud.positions[i * 3..i * 3 + 3]))
    }

    fn log_scale(&self, i: usize) -> Vec3 {
        let s = finite_or_zero(Vec3::from_slice(&self.cloud.scales[i * 3..i * 3 + 3]));
        s.clamp(Vec3::splat(-LOG_SCALE_LIMIT), Vec3::splat(LOG_SCALE_LIMIT))
    }

    fn color(&self, i: usize) -> Vec3 {
        let dc = finite_or_zero(Vec3::from_slice(&self.cloud.colors[i * 3..i * 3 + 3]));
        Vec3::splat(0.5) + dc * SH_C0
    }

    fn rotation(&self, i: usize) -> Quat {
        let r = &self.cloud.rotations[i * 4..i * 4 + 4];
        Quat::from_xyzw(r[0], r[1], r[2], r[3])
    }

    fn sh(&self, i: usize, count: usize) -> Vec<Vec3> {
        (0..count)
            .map(|j| {
                let o = (i * self.sh_dim + j) * 3;
                finite_or_zero(Vec3::from_slice(&self.cloud.sh[o..o + 3]))
            })
            .collect()
    }
}

fn check_lengths(cloud: &GaussianCloud) -> Result<(), SplatError> {
    let n = cloud.num_points;
    let dim = cloud.sh_bands.coeff_count();
    let fields = [
        ("positions", cloud.positions.len(), n * 3),
        ("scales", cloud.scales.len(), n * 3),
        ("rotations", cloud.rotations.len(), n * 4),
        ("alphas", cloud.alphas.len(), n),
        ("colors", cloud.colors.len(), n * 3),
        ("sh", cloud.sh.len(), n * dim * 3),
    ];
    for (name, got, want) in fields {
        if got != want {
            return Err(SplatError::SerializeAsset(format!(
                "cloud field {} holds {} values, {} points need {}",
                name, got, n, want
            )));
        }
    }
    Ok(())
}

fn bounds(values: impl Iterator<Item = Vec3>) -> (Vec3, Vec3) {
    values.fold(
        (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
        |(lo, hi), v| (lo.min(v), hi.max(v)),
    )
}

/// Quantizes a cloud into a chunked asset with direct SH storage. With
/// `morton_order` set, splat identities in the asset follow the Morton order
/// rather than the input order.
pub fn encode_cloud(
    cloud: &GaussianCloud,
    options: &EncodeOptions,
) -> Result<SplatAsset, SplatError> {
    let n = cloud.num_points;
    if n == 0 {
        return Err(SplatError::EmptyGaussianCloud);
    }
    check_lengths(cloud)?;

    let order: Vec<usize> = if options.morton_order {
        morton_order(cloud).into_iter().map(|i| i as usize).collect()
    } else {
        (0..n).collect()
    };
    let view = CloudView {
        cloud,
        sh_dim: cloud.sh_bands.coeff_count(),
    };
    let bands = options
        .sh_bands
        .map_or(cloud.sh_bands, |b| b.min(cloud.sh_bands));
    let coeff_count = bands.coeff_count();

    let mut chunks = Vec::with_capacity(n.div_ceil(CHUNK_SPLATS));
    let mut packed = Vec::with_capacity(n);
    let mut sh_planes: [Vec<u32>; 4] = Default::default();

    for group in order.chunks(CHUNK_SPLATS) {
        let range = group.iter().copied();

        let (pos_min, pos_max) = bounds(range.clone().map(|i| view.position(i)));
        let (scale_min, scale_max) = bounds(range.clone().map(|i| view.log_scale(i)));
        let (color_min, color_max) = if options.color_bounds {
            bounds(range.clone().map(|i| view.color(i)))
        } else {
            (Vec3::ZERO, Vec3::ONE)
        };
        let chunk = Chunk {
            pos_min,
            pos_max,
            scale_min,
            scale_max,
            color_min,
            color_max,
        };

        for i in range {
            let color = inv_lerp3(chunk.color_min, chunk.color_max, view.color(i));
            let alpha = sigmoid(cloud.alphas[i]);
            packed.push(PackedSplat {
                pos_bits: pack_111011(inv_lerp3(pos_min, pos_max, view.position(i))),
                rot_bits: pack_rotation(view.rotation(i)),
                scale_bits: pack_111011(inv_lerp3(scale_min, scale_max, view.log_scale(i))),
                color_bits: pack_8888(color.extend(if alpha.is_finite() { alpha } else { 0.0 })),
            });

            if coeff_count > 0 {
                let (scale, bits) = pack_direct_coeffs(&view.sh(i, coeff_count));
                push_direct_texels(&mut sh_planes, bands, scale, &bits);
            }
        }
        chunks.push(chunk);
    }

    let (row_width, _) = texture_size_for(n);
    let packed = Texture2D::from_rows(row_width, packed)?;
    let sh = if coeff_count > 0 {
        ShStore::Direct(ShDirect::new(direct_textures(bands, row_width, sh_planes)?)?)
    } else {
        ShStore::None
    };

    debug!(
        "encoded {} splats into {} chunks, {} SH bands, row width {}",
        n,
        chunks.len(),
        bands.as_u8(),
        row_width
    );
    SplatAsset::new(n, ChunkTable::new(chunks, options.color_bounds), packed, sh)
}

/// Appends one splat's coefficients to the per-band planes, four u32 per
/// texel (the single-channel band 2 texel is one u32).
fn push_direct_texels(planes: &mut [Vec<u32>; 4], bands: ShBands, scale: f32, bits: &[u32]) {
    planes[0].extend_from_slice(&[scale.to_bits(), bits[0], bits[1], bits[2]]);
    match bands {
        ShBands::Zero | ShBands::One => {}
        ShBands::Two => {
            planes[1].extend_from_slice(&bits[3..7]);
            planes[2].push(bits[7]);
        }
        ShBands::Three => {
            planes[1].extend_from_slice(&bits[3..7]);
            planes[2].extend_from_slice(&bits[7..11]);
            planes[3].extend_from_slice(&bits[11..15]);
        }
    }
}

fn texels4(words: Vec<u32>) -> Vec<[u32; 4]> {
    words
        .chunks_exact(4)
        .map(|w| [w[0], w[1], w[2], w[3]])
        .collect()
}

pub(crate) fn direct_textures(
    bands: ShBands,
    row_width: usize,
    planes: [Vec<u32>; 4],
) -> Result<DirectTextures, SplatError> {
    let [p0, p1, p2, p3] = planes;
    let quad = |p: Vec<u32>| Texture2D::from_rows(row_width, texels4(p));
    Ok(match bands {
        ShBands::Zero => {
            return Err(SplatError::ShLayout(
                "direct storage needs at least one band".to_string(),
            ))
        }
        ShBands::One => DirectTextures::One { sh1to3: quad(p0)? },
        ShBands::Two => DirectTextures::Two {
            sh1to3: quad(p0)?,
            sh4to7: quad(p1)?,
            sh8: Texture2D::from_rows(row_width, p2)?,
        },
        ShBands::Three => DirectTextures::Three {
            sh1to3: quad(p0)?,
            sh4to7: quad(p1)?,
            sh8to11: quad(p2)?,
            sh12to15: quad(p3)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{unpack_color, unpack_log_scale, unpack_position, unpack_rotation};

    fn input_order() -> EncodeOptions {
        EncodeOptions {
            morton_order: false,
            ..Default::default()
        }
    }

    fn permute(c: &GaussianCloud, perm: &[usize]) -> GaussianCloud {
        let dim = c.sh_bands.coeff_count() * 3;
        let gather = |v: &[f32], w: usize| -> Vec<f32> {
            perm.iter().flat_map(|&i| v[i * w..i * w + w].to_vec()).collect()
        };
        GaussianCloud {
            num_points: c.num_points,
            sh_bands: c.sh_bands,
            positions: gather(&c.positions, 3),
            scales: gather(&c.scales, 3),
            rotations: gather(&c.rotations, 4),
            alphas: gather(&c.alphas, 1),
            colors: gather(&c.colors, 3),
            sh: gather(&c.sh, dim),
        }
    }

    /// Largest distance between a decoded center and its source position.
    fn max_position_error(c: &GaussianCloud, options: &EncodeOptions) -> f32 {
        let asset = encode_cloud(c, options).unwrap();
        let order: Vec<usize> = if options.morton_order {
            morton_order(c).into_iter().map(|i| i as usize).collect()
        } else {
            (0..c.num_points).collect()
        };
        order
            .iter()
            .enumerate()
            .map(|(id, &src)| {
                let p = asset.decode_attributes(id as u32).unwrap().position;
                (p - Vec3::from_slice(&c.positions[src * 3..src * 3 + 3])).abs().max_element()
            })
            .fold(0.0, f32::max)
    }

    fn cloud(n: usize, bands: ShBands) -> GaussianCloud {
        let dim = bands.coeff_count();
        let mut c = GaussianCloud {
            num_points: n,
            sh_bands: bands,
            ..Default::default()
        };
        for i in 0..n {
            let t = i as f32;
            c.positions
                .extend_from_slice(&[t * 0.37 - 20.0, (t * 1.3).sin() * 5.0, t * 0.01]);
            c.scales
                .extend_from_slice(&[-3.0 + (t * 0.1).cos(), -2.0, -4.5 + t * 0.001]);
            let q = Quat::from_euler(glam::EulerRot::XYZ, t * 0.1, t * 0.2, t * 0.3);
            c.rotations.extend_from_slice(&q.to_array());
            c.alphas.push((t * 0.05).sin() * 3.0);
            c.colors.extend_from_slice(&[0.1, -0.4 + t * 0.001, 0.9]);
            for j in 0..dim {
                c.sh.extend_from_slice(&[0.01 * j as f32, -0.02 * j as f32, 0.3]);
            }
        }
        c
    }

    #[test]
    fn test_pack_rotation_drops_largest_component() {
        let q = Quat::from_xyzw(0.1, -0.9, 0.3, 0.2).normalize();
        let bits = pack_rotation(q);
        assert_eq!(bits >> 30, 2);
        let r = unpack_rotation(bits);
        // the stored quaternion was negated so the dropped y is positive
        assert!(r.dot(q) < -0.999);
    }

    #[test]
    fn test_round_trip_within_quantization_error() {
        let c = cloud(700, ShBands::Zero);
        let asset = encode_cloud(&c, &EncodeOptions::default()).unwrap();
        assert_eq!(asset.chunks().len(), 3);

        let order = morton_order(&c);
        for (id, &src) in order.iter().enumerate() {
            let i = src as usize;
            let chunk = asset.chunks().chunk_for(id);
            let packed = asset.packed_splat(id as u32).unwrap();

            let p = unpack_position(chunk, packed.pos_bits);
            let range = chunk.pos_max - chunk.pos_min;
            let tol = range / Vec3::new(2048.0, 1024.0, 2048.0) + Vec3::splat(1e-5);
            let want = Vec3::from_slice(&c.positions[i * 3..i * 3 + 3]);
            assert!((p - want).abs().cmple(tol).all(), "splat {}: {:?} vs {:?}", i, p, want);

            let s = unpack_log_scale(chunk, packed.scale_bits);
            let range = chunk.scale_max - chunk.scale_min;
            let tol = range / Vec3::new(2048.0, 1024.0, 2048.0) + Vec3::splat(1e-5);
            let want = Vec3::from_slice(&c.scales[i * 3..i * 3 + 3]);
            assert!((s - want).abs().cmple(tol).all(), "splat {}: {:?} vs {:?}", i, s, want);
        }
    }

    #[test]
    fn test_chunk_bounds_cover_their_splats() {
        let c = cloud(300, ShBands::Zero);
        let asset = encode_cloud(&c, &input_order()).unwrap();
        let first = asset.chunks().chunk_for(0);
        assert_eq!(first.pos_min.x, -20.0);
        assert_eq!(first.pos_max.x, 255.0 * 0.37 - 20.0);
        let second = asset.chunks().chunk_for(256);
        assert_eq!(second.pos_min.x, 256.0 * 0.37 - 20.0);
    }

    #[test]
    fn test_sh_band_cap() {
        let c = cloud(10, ShBands::Three);
        let asset = encode_cloud(
            &c,
            &EncodeOptions {
                sh_bands: Some(ShBands::One),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(asset.sh().bands(), ShBands::One);

        let full = encode_cloud(&c, &EncodeOptions::default()).unwrap();
        assert_eq!(full.sh().bands(), ShBands::Three);
    }

    #[test]
    fn test_rejects_inconsistent_cloud() {
        let mut c = cloud(4, ShBands::One);
        c.sh.pop();
        assert!(matches!(
            encode_cloud(&c, &EncodeOptions::default()),
            Err(SplatError::SerializeAsset(_))
        ));
        assert!(matches!(
            encode_cloud(&GaussianCloud::default(), &EncodeOptions::default()),
            Err(SplatError::EmptyGaussianCloud)
        ));
    }

    #[test]
    fn test_single_valued_chunk_encodes_zero_fractions() {
        let mut c = cloud(1, ShBands::Zero);
        c.positions = vec![3.0, 3.0, 3.0];
        let asset = encode_cloud(&c, &EncodeOptions::default()).unwrap();
        let packed = asset.packed_splat(0).unwrap();
        assert_eq!(packed.pos_bits, 0);
        assert_eq!(unpack_position(asset.chunks().chunk_for(0), packed.pos_bits), Vec3::splat(3.0));
    }

    #[test]
    fn test_morton_order_is_stable_and_spatial() {
        let mut c = cloud(4, ShBands::Zero);
        c.positions = vec![
            1.0, 1.0, 1.0, //
            0.0, 0.0, 0.0, //
            1.0, 1.0, 1.0, //
            0.0, 1.0, 0.0,
        ];
        // equal codes keep their input order
        assert_eq!(morton_order(&c), vec![1, 3, 0, 2]);
        assert_eq!(encode_morton3(1, 0, 0), 1);
        assert_eq!(encode_morton3(0, 1, 0), 2);
        assert_eq!(encode_morton3(0, 0, 1), 4);
        assert_eq!(encode_morton3(1023, 1023, 1023), (1 << 30) - 1);
    }

    #[test]
    fn test_shuffled_input_keeps_chunk_precision() {
        let n = 1024;
        let mut line = GaussianCloud {
            num_points: n,
            sh_bands: ShBands::Zero,
            ..Default::default()
        };
        for i in 0..n {
            let t = i as f32;
            line.positions.extend_from_slice(&[t * 100.0, t * 0.01, 0.5]);
            line.scales.extend_from_slice(&[-2.0, -3.0 + t * 0.001, -1.0]);
            line.rotations.extend_from_slice(&[0.0, 0.0, 0.0, 1.0]);
            line.alphas.push((t * 0.1).sin());
            line.colors.extend_from_slice(&[t * 0.001, 0.2, -0.3]);
        }
        let perm: Vec<usize> = (0..n).map(|i| (i * 389) % n).collect();
        let shuffled = permute(&line, &perm);

        // every splat lands in its own Morton cell, so input order is irrelevant
        assert_eq!(
            encode_cloud(&shuffled, &EncodeOptions::default()).unwrap(),
            encode_cloud(&line, &EncodeOptions::default()).unwrap()
        );

        let sorted = max_position_error(&line, &EncodeOptions::default());
        let reordered = max_position_error(&shuffled, &EncodeOptions::default());
        let unordered = max_position_error(&shuffled, &input_order());
        assert_eq!(sorted, reordered);
        assert!(sorted <= 25_500.0 / 2047.0 + 1e-2, "{}", sorted);
        assert!(unordered > 2.5 * sorted, "{} vs {}", unordered, sorted);
    }

    #[test]
    fn test_color_and_alpha_within_quantization_error() {
        let n = 256;
        let mut c = GaussianCloud {
            num_points: n,
            sh_bands: ShBands::Zero,
            ..Default::default()
        };
        for i in 0..n {
            let t = i as f32;
            c.positions.extend_from_slice(&[t, 0.0, 0.0]);
            c.scales.extend_from_slice(&[-2.0, -2.0, -2.0]);
            c.rotations.extend_from_slice(&[0.0, 0.0, 0.0, 1.0]);
            c.alphas.push((t * 0.37).sin() * 6.0);
            let dc = [(t * 0.11).sin() * 1.5, (t * 0.07).cos() - 0.5, t * 0.01 - 1.2];
            c.colors.extend_from_slice(&dc);
        }
        let asset = encode_cloud(&c, &input_order()).unwrap();
        let chunk = asset.chunks().chunk_for(0);
        let tol = (chunk.color_max - chunk.color_min) / 255.0;
        assert!(tol.min_element() > 1e-3, "degenerate color range {:?}", tol);

        for i in 0..n {
            let decoded = unpack_color(chunk, asset.packed_splat(i as u32).unwrap().color_bits);
            let want = Vec3::splat(0.5) + Vec3::from_slice(&c.colors[i * 3..i * 3 + 3]) * SH_C0;
            let error = (decoded.truncate() - want).abs();
            assert!(error.cmple(tol + Vec3::splat(1e-5)).all(), "splat {}: {:?}", i, error);
            assert!((decoded.w - sigmoid(c.alphas[i])).abs() <= 1.0 / 255.0 + 1e-6);
        }
    }
}
