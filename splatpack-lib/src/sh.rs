//! Spherical-harmonics reconstruction.
//!
//! An asset carries its view-dependent color in one of two forms: a palette
//! of shared coefficient sets indexed per splat, or per-splat coefficients
//! packed 11/10/11 with their own scale. Both produce [`ShCoeffs`] in the same
//! units so the frame loop does not care which one it reads.

use glam::Vec3;

use crate::common::{
    lerp, pack_111011, unpack_111011, MAX_SH_COEFFS, PALETTE_ENTRY_COEFFS, PALETTE_ROW_ENTRIES,
};
use crate::error::SplatError;
use crate::order::StorageLocation;
use crate::structures::{ShBands, ShMode};
use crate::texture::Texture2D;

/// Up to 15 RGB coefficient vectors; `len` follows the band count read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShCoeffs {
    coeffs: [Vec3; MAX_SH_COEFFS],
    len: usize,
}

impl Default for ShCoeffs {
    fn default() -> Self {
        Self {
            coeffs: [Vec3::ZERO; MAX_SH_COEFFS],
            len: 0,
        }
    }
}

impl ShCoeffs {
    pub fn from_slice(coeffs: &[Vec3]) -> Self {
        let mut out = Self::default();
        let len = coeffs.len().min(MAX_SH_COEFFS);
        out.coeffs[..len].copy_from_slice(&coeffs[..len]);
        out.len = len;
        out
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn bands(&self) -> ShBands {
        ShBands::from_coeff_count(self.len)
    }

    #[inline]
    pub fn as_slice(&self) -> &[Vec3] {
        &self.coeffs[..self.len]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Vec3] {
        &mut self.coeffs[..self.len]
    }

    #[inline]
    fn clear(&mut self) {
        self.len = 0;
    }

    #[inline]
    fn push(&mut self, v: Vec3) {
        self.coeffs[self.len] = v;
        self.len += 1;
    }
}

/// One SH storage strategy. Frame decode is generic over this trait so the
/// strategy is fixed once per frame instead of being matched per splat.
pub trait ShSource: Sync {
    fn bands(&self) -> ShBands;

    /// Reads at most `bands` bands for the splat stored at `loc`.
    fn read_sh(&self, loc: StorageLocation, bands: ShBands, out: &mut ShCoeffs);
}

/// Strategy for assets without view-dependent color.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSh;

impl ShSource for NoSh {
    fn bands(&self) -> ShBands {
        ShBands::Zero
    }

    #[inline]
    fn read_sh(&self, _loc: StorageLocation, _bands: ShBands, out: &mut ShCoeffs) {
        out.clear();
    }
}

/// Palette (centroid) strategy. Many splats share one entry of 15 RGB texels.
/// Centroid texels are held as 8-bit RGB; a byte `b` stands for the
/// normalized value `b / 255`, remapped into `[sh_min, sh_max]` on read.
#[derive(Debug, Clone, PartialEq)]
pub struct ShPalette {
    bands: ShBands,
    labels: Texture2D<[u8; 2]>,
    centroids: Texture2D<[u8; 3]>,
    sh_min: f32,
    sh_max: f32,
    palette_count: usize,
}

impl ShPalette {
    pub fn new(
        bands: ShBands,
        labels: Texture2D<[u8; 2]>,
        centroids: Texture2D<[u8; 3]>,
        sh_min: f32,
        sh_max: f32,
        palette_count: usize,
    ) -> Result<Self, SplatError> {
        if bands == ShBands::Zero {
            return Err(SplatError::ShLayout(
                "palette storage needs at least one band".to_string(),
            ));
        }
        if !sh_min.is_finite() || !sh_max.is_finite() {
            return Err(SplatError::ShLayout(
                "palette bounds are not finite".to_string(),
            ));
        }
        if palette_count == 0 {
            return Err(SplatError::ShLayout("palette is empty".to_string()));
        }
        let width = PALETTE_ROW_ENTRIES * PALETTE_ENTRY_COEFFS;
        if centroids.width() != width
            || centroids.height() < palette_count.div_ceil(PALETTE_ROW_ENTRIES)
        {
            return Err(SplatError::ShLayout(format!(
                "centroid texture is {}x{}, {} entries need {}x{}",
                centroids.width(),
                centroids.height(),
                palette_count,
                width,
                palette_count.div_ceil(PALETTE_ROW_ENTRIES)
            )));
        }
        if let Some(label) = labels
            .texels()
            .iter()
            .map(|&l| label_index(l))
            .find(|&i| i >= palette_count)
        {
            return Err(SplatError::ShLayout(format!(
                "label {} exceeds palette of {} entries",
                label, palette_count
            )));
        }
        Ok(Self {
            bands,
            labels,
            centroids,
            sh_min,
            sh_max,
            palette_count,
        })
    }

    pub fn labels(&self) -> &Texture2D<[u8; 2]> {
        &self.labels
    }

    pub fn centroids(&self) -> &Texture2D<[u8; 3]> {
        &self.centroids
    }

    pub fn range(&self) -> (f32, f32) {
        (self.sh_min, self.sh_max)
    }

    pub fn palette_count(&self) -> usize {
        self.palette_count
    }

    #[inline]
    pub fn palette_index(&self, loc: StorageLocation) -> usize {
        label_index(self.labels.fetch(loc.col as usize, loc.row as usize))
    }

    /// All 15 coefficient slots of one palette entry.
    #[inline]
    pub fn read_entry(&self, index: usize) -> [Vec3; PALETTE_ENTRY_COEFFS] {
        let base_u = (index % PALETTE_ROW_ENTRIES) * PALETTE_ENTRY_COEFFS;
        let v = index / PALETTE_ROW_ENTRIES;
        let remap = |c: u8| lerp(self.sh_min, self.sh_max, c as f32 / 255.0);
        std::array::from_fn(|k| {
            let [r, g, b] = self.centroids.fetch(base_u + k, v);
            Vec3::new(remap(r), remap(g), remap(b))
        })
    }
}

#[inline]
fn label_index(texel: [u8; 2]) -> usize {
    texel[0] as usize + texel[1] as usize * 256
}

impl ShSource for ShPalette {
    fn bands(&self) -> ShBands {
        self.bands
    }

    #[inline]
    fn read_sh(&self, loc: StorageLocation, bands: ShBands, out: &mut ShCoeffs) {
        let entry = self.read_entry(self.palette_index(loc));
        *out = ShCoeffs::from_slice(&entry[..bands.min(self.bands).coeff_count()]);
    }
}

/// Per-band texture sets of the direct strategy. Each u32 holds one
/// coefficient triple packed 11/10/11; the first band texel leads with the
/// splat's scale as f32 bits.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectTextures {
    One {
        sh1to3: Texture2D<[u32; 4]>,
    },
    Two {
        sh1to3: Texture2D<[u32; 4]>,
        sh4to7: Texture2D<[u32; 4]>,
        sh8: Texture2D<u32>,
    },
    Three {
        sh1to3: Texture2D<[u32; 4]>,
        sh4to7: Texture2D<[u32; 4]>,
        sh8to11: Texture2D<[u32; 4]>,
        sh12to15: Texture2D<[u32; 4]>,
    },
}

impl DirectTextures {
    pub fn bands(&self) -> ShBands {
        match self {
            DirectTextures::One { .. } => ShBands::One,
            DirectTextures::Two { .. } => ShBands::Two,
            DirectTextures::Three { .. } => ShBands::Three,
        }
    }

    fn sh1to3(&self) -> &Texture2D<[u32; 4]> {
        match self {
            DirectTextures::One { sh1to3 }
            | DirectTextures::Two { sh1to3, .. }
            | DirectTextures::Three { sh1to3, .. } => sh1to3,
        }
    }

    fn dims(&self) -> Vec<(usize, usize)> {
        let d4 = |t: &Texture2D<[u32; 4]>| (t.width(), t.height());
        match self {
            DirectTextures::One { sh1to3 } => vec![d4(sh1to3)],
            DirectTextures::Two {
                sh1to3,
                sh4to7,
                sh8,
            } => vec![d4(sh1to3), d4(sh4to7), (sh8.width(), sh8.height())],
            DirectTextures::Three {
                sh1to3,
                sh4to7,
                sh8to11,
                sh12to15,
            } => vec![d4(sh1to3), d4(sh4to7), d4(sh8to11), d4(sh12to15)],
        }
    }
}

/// Direct strategy: per-splat coefficients with a per-splat scale.
#[derive(Debug, Clone, PartialEq)]
pub struct ShDirect {
    textures: DirectTextures,
}

impl ShDirect {
    pub fn new(textures: DirectTextures) -> Result<Self, SplatError> {
        let dims = textures.dims();
        if dims.iter().any(|d| *d != dims[0]) {
            return Err(SplatError::ShLayout(format!(
                "direct coefficient textures differ in size: {:?}",
                dims
            )));
        }
        Ok(Self { textures })
    }

    pub fn textures(&self) -> &DirectTextures {
        &self.textures
    }

    /// Width and height shared by every band texture.
    pub fn size(&self) -> (usize, usize) {
        let t = self.textures.sh1to3();
        (t.width(), t.height())
    }
}

#[inline]
fn unpack_coeff(bits: u32, scale: f32) -> Vec3 {
    (unpack_111011(bits) * 2.0 - Vec3::ONE) * scale
}

impl ShSource for ShDirect {
    fn bands(&self) -> ShBands {
        self.textures.bands()
    }

    #[inline]
    fn read_sh(&self, loc: StorageLocation, bands: ShBands, out: &mut ShCoeffs) {
        let bands = bands.min(self.textures.bands());
        out.clear();
        if bands == ShBands::Zero {
            return;
        }
        let (u, v) = (loc.col as usize, loc.row as usize);

        let t0 = self.textures.sh1to3().fetch(u, v);
        let scale = f32::from_bits(t0[0]);
        let scale = if scale.is_finite() { scale } else { 0.0 };
        for &bits in &t0[1..] {
            out.push(unpack_coeff(bits, scale));
        }
        if bands == ShBands::One {
            return;
        }

        match &self.textures {
            DirectTextures::One { .. } => {}
            DirectTextures::Two { sh4to7, sh8, .. } => {
                for bits in sh4to7.fetch(u, v) {
                    out.push(unpack_coeff(bits, scale));
                }
                out.push(unpack_coeff(sh8.fetch(u, v), scale));
            }
            DirectTextures::Three {
                sh4to7,
                sh8to11,
                sh12to15,
                ..
            } => {
                for bits in sh4to7.fetch(u, v) {
                    out.push(unpack_coeff(bits, scale));
                }
                let t2 = sh8to11.fetch(u, v);
                if bands == ShBands::Two {
                    out.push(unpack_coeff(t2[0], scale));
                    return;
                }
                for bits in t2.into_iter().chain(sh12to15.fetch(u, v)) {
                    out.push(unpack_coeff(bits, scale));
                }
            }
        }
    }
}

/// Quantizes one splat's coefficients for the direct strategy. Returns the
/// shared scale (largest magnitude) and one packed u32 per coefficient.
pub(crate) fn pack_direct_coeffs(coeffs: &[Vec3]) -> (f32, Vec<u32>) {
    let max = coeffs
        .iter()
        .map(|c| c.abs().max_element())
        .fold(0.0f32, f32::max);
    if max == 0.0 || !max.is_finite() {
        return (0.0, vec![0; coeffs.len()]);
    }
    let packed = coeffs
        .iter()
        .map(|&c| pack_111011(c / max * 0.5 + Vec3::splat(0.5)))
        .collect();
    (max, packed)
}

/// The SH storage of one asset. Exactly one strategy is active per asset.
#[derive(Debug, Clone, PartialEq)]
pub enum ShStore {
    None,
    Palette(ShPalette),
    Direct(ShDirect),
}

impl ShStore {
    pub fn mode(&self) -> ShMode {
        match self {
            ShStore::None => ShMode::None,
            ShStore::Palette(_) => ShMode::Palette,
            ShStore::Direct(_) => ShMode::Direct,
        }
    }

    pub fn bands(&self) -> ShBands {
        match self {
            ShStore::None => ShBands::Zero,
            ShStore::Palette(p) => p.bands(),
            ShStore::Direct(d) => d.bands(),
        }
    }

    /// Fails when the asset's SH mode is not the one the caller was built for.
    pub fn expect_mode(&self, expected: ShMode) -> Result<(), SplatError> {
        let found = self.mode();
        if found != expected {
            return Err(SplatError::ShModeMismatch { expected, found });
        }
        Ok(())
    }

    pub fn palette(&self) -> Result<&ShPalette, SplatError> {
        match self {
            ShStore::Palette(p) => Ok(p),
            other => Err(SplatError::ShModeMismatch {
                expected: ShMode::Palette,
                found: other.mode(),
            }),
        }
    }

    pub fn direct(&self) -> Result<&ShDirect, SplatError> {
        match self {
            ShStore::Direct(d) => Ok(d),
            other => Err(SplatError::ShModeMismatch {
                expected: ShMode::Direct,
                found: other.mode(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(row: u32, col: u32) -> StorageLocation {
        StorageLocation { row, col }
    }

    fn test_palette() -> ShPalette {
        let count = 70;
        let width = PALETTE_ROW_ENTRIES * PALETTE_ENTRY_COEFFS;
        let height = 2;
        let mut texels = vec![[0u8; 3]; width * height];
        for (i, t) in texels.iter_mut().enumerate() {
            *t = [(i % 256) as u8, ((i / 3) % 256) as u8, 255];
        }
        let centroids = Texture2D::new(width, height, texels).unwrap();
        // 2x2 splat layout: labels 3, 69, 3, 0
        let labels =
            Texture2D::new(2, 2, vec![[3, 0], [69, 0], [3, 0], [0, 0]]).unwrap();
        ShPalette::new(ShBands::Three, labels, centroids, -2.0, 2.0, count).unwrap()
    }

    #[test]
    fn test_palette_texel_addressing() {
        let palette = test_palette();
        assert_eq!(palette.palette_index(loc(0, 1)), 69);

        // entry 69 lives in row 1, starting at column (69 % 64) * 15 = 75
        let entry = palette.read_entry(69);
        let expected_texel = 960 + 75 + 4;
        let r = expected_texel % 256;
        assert!((entry[4].x - lerp(-2.0, 2.0, r as f32 / 255.0)).abs() < 1e-6);
        assert_eq!(entry[4].z, 2.0);
    }

    #[test]
    fn test_palette_shared_label_is_bit_identical() {
        let palette = test_palette();
        let mut a = ShCoeffs::default();
        let mut b = ShCoeffs::default();
        palette.read_sh(loc(0, 0), ShBands::Three, &mut a);
        palette.read_sh(loc(1, 0), ShBands::Three, &mut b);
        assert_eq!(a.len(), 15);
        for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
            assert_eq!(x.to_array().map(f32::to_bits), y.to_array().map(f32::to_bits));
        }
    }

    #[test]
    fn test_palette_band_count_limits_length() {
        let palette = test_palette();
        let mut out = ShCoeffs::default();
        palette.read_sh(loc(0, 0), ShBands::One, &mut out);
        assert_eq!(out.len(), 3);
        palette.read_sh(loc(0, 0), ShBands::Two, &mut out);
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_palette_rejects_label_outside_palette() {
        let centroids = Texture2D::new(960, 1, vec![[0u8; 3]; 960]).unwrap();
        let labels = Texture2D::new(1, 1, vec![[10, 0]]).unwrap();
        let result = ShPalette::new(ShBands::Three, labels, centroids, -1.0, 1.0, 4);
        assert!(matches!(result, Err(SplatError::ShLayout(_))));
    }

    fn direct_texel(coeffs: &[Vec3]) -> (f32, Vec<u32>) {
        pack_direct_coeffs(coeffs)
    }

    #[test]
    fn test_direct_one_band() {
        let coeffs = [
            Vec3::new(0.5, -0.25, 1.0),
            Vec3::new(-1.0, 0.0, 0.125),
            Vec3::new(0.75, 0.75, -0.5),
        ];
        let (scale, bits) = direct_texel(&coeffs);
        let texel = [scale.to_bits(), bits[0], bits[1], bits[2]];
        let direct = ShDirect::new(DirectTextures::One {
            sh1to3: Texture2D::new(1, 1, vec![texel]).unwrap(),
        })
        .unwrap();

        let mut out = ShCoeffs::default();
        direct.read_sh(loc(0, 0), ShBands::Three, &mut out);
        assert_eq!(out.len(), 3);
        for (got, want) in out.as_slice().iter().zip(&coeffs) {
            assert!((*got - *want).abs().max_element() < 2.0 / 1023.0, "{:?}", got);
        }
    }

    #[test]
    fn test_direct_band_gating_skips_higher_band_storage() {
        // higher band textures are too small for this location, so any read
        // of them would go out of bounds
        let tiny = || Texture2D::new(1, 1, vec![[0u32; 4]]).unwrap();
        let direct = ShDirect {
            textures: DirectTextures::Three {
                sh1to3: Texture2D::new(4, 4, vec![[0u32; 4]; 16]).unwrap(),
                sh4to7: tiny(),
                sh8to11: tiny(),
                sh12to15: tiny(),
            },
        };
        let mut out = ShCoeffs::default();
        direct.read_sh(loc(3, 3), ShBands::One, &mut out);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_direct_three_bands() {
        let coeffs: Vec<Vec3> = (0..15)
            .map(|i| Vec3::new(i as f32 * 0.1 - 0.7, 0.3, -(i as f32) * 0.05))
            .collect();
        let (scale, bits) = direct_texel(&coeffs);
        let tex = |t: [u32; 4]| Texture2D::new(1, 1, vec![t]).unwrap();
        let direct = ShDirect::new(DirectTextures::Three {
            sh1to3: tex([scale.to_bits(), bits[0], bits[1], bits[2]]),
            sh4to7: tex([bits[3], bits[4], bits[5], bits[6]]),
            sh8to11: tex([bits[7], bits[8], bits[9], bits[10]]),
            sh12to15: tex([bits[11], bits[12], bits[13], bits[14]]),
        })
        .unwrap();

        let mut out = ShCoeffs::default();
        direct.read_sh(loc(0, 0), ShBands::Three, &mut out);
        assert_eq!(out.len(), 15);
        let tolerance = scale * 2.0 / 1023.0;
        for (got, want) in out.as_slice().iter().zip(&coeffs) {
            assert!((*got - *want).abs().max_element() <= tolerance);
        }

        direct.read_sh(loc(0, 0), ShBands::Two, &mut out);
        assert_eq!(out.len(), 8);
        assert!((out.as_slice()[7] - coeffs[7]).abs().max_element() <= tolerance);
    }

    #[test]
    fn test_direct_two_band_single_texel() {
        let coeffs: Vec<Vec3> = (0..8).map(|i| Vec3::splat(i as f32 * 0.25 - 1.0)).collect();
        let (scale, bits) = direct_texel(&coeffs);
        let direct = ShDirect::new(DirectTextures::Two {
            sh1to3: Texture2D::new(1, 1, vec![[scale.to_bits(), bits[0], bits[1], bits[2]]])
                .unwrap(),
            sh4to7: Texture2D::new(1, 1, vec![[bits[3], bits[4], bits[5], bits[6]]]).unwrap(),
            sh8: Texture2D::new(1, 1, vec![bits[7]]).unwrap(),
        })
        .unwrap();
        let mut out = ShCoeffs::default();
        direct.read_sh(loc(0, 0), ShBands::Three, &mut out);
        assert_eq!(out.len(), 8);
        assert!((out.as_slice()[7] - coeffs[7]).abs().max_element() <= 2.0 / 1023.0);
    }

    #[test]
    fn test_direct_rejects_mismatched_sizes() {
        let result = ShDirect::new(DirectTextures::Two {
            sh1to3: Texture2D::new(2, 1, vec![[0u32; 4]; 2]).unwrap(),
            sh4to7: Texture2D::new(2, 1, vec![[0u32; 4]; 2]).unwrap(),
            sh8: Texture2D::new(1, 1, vec![0u32]).unwrap(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_coefficients_decode_to_zero() {
        let (scale, bits) = pack_direct_coeffs(&[Vec3::ZERO; 3]);
        assert_eq!(scale, 0.0);
        assert_eq!(unpack_coeff(bits[0], scale), Vec3::ZERO);
    }

    #[test]
    fn test_store_mode_mismatch() {
        let store = ShStore::Palette(test_palette());
        assert!(store.expect_mode(ShMode::Palette).is_ok());
        match store.direct() {
            Err(SplatError::ShModeMismatch { expected, found }) => {
                assert_eq!(expected, ShMode::Direct);
                assert_eq!(found, ShMode::Palette);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(ShStore::None.palette().is_err());
    }
}
