use cfg_if::cfg_if;
use glam::Vec3;
use log::{debug, trace};

use crate::chunk::{chunk_count, Aabb, ChunkTable};
use crate::common::{inv_sigmoid, SH_C0};
use crate::covariance::build_covariance;
use crate::decode::{decode, unpack_color, unpack_log_scale, unpack_position, unpack_rotation};
use crate::error::SplatError;
use crate::order::{OrderBuffer, StorageLocation};
use crate::sh::{NoSh, ShCoeffs, ShSource, ShStore};
use crate::structures::{
    DecodedAttributes, GaussianCloud, PackedSplat, ReconstructedSplat, ShBands, ShMode,
};
use crate::texture::Texture2D;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Caps the SH bands reconstructed; `None` uses every stored band.
    pub sh_bands: Option<ShBands>,
}

/// A loaded compressed asset: chunk table, packed attribute texture and the
/// SH storage, all addressed by splat identity.
#[derive(Debug, Clone, PartialEq)]
pub struct SplatAsset {
    num_splats: usize,
    chunks: ChunkTable,
    packed: Texture2D<PackedSplat>,
    sh: ShStore,
}

impl SplatAsset {
    pub fn new(
        num_splats: usize,
        chunks: ChunkTable,
        packed: Texture2D<PackedSplat>,
        sh: ShStore,
    ) -> Result<Self, SplatError> {
        if chunks.len() != chunk_count(num_splats) {
            return Err(SplatError::DeserializeAsset(format!(
                "{} chunks for {} splats, expected {}",
                chunks.len(),
                num_splats,
                chunk_count(num_splats)
            )));
        }
        chunks.validate()?;

        if packed.width() * packed.height() < num_splats {
            return Err(SplatError::DeserializeAsset(format!(
                "packed texture {}x{} cannot hold {} splats",
                packed.width(),
                packed.height(),
                num_splats
            )));
        }

        let row_width = packed.width();
        let rows = num_splats.div_ceil(row_width);
        let sh_dims = match &sh {
            ShStore::None => None,
            ShStore::Palette(p) => Some((p.labels().width(), p.labels().height())),
            ShStore::Direct(d) => Some(d.size()),
        };
        if let Some((w, h)) = sh_dims {
            if w != row_width || h < rows {
                return Err(SplatError::ShLayout(format!(
                    "SH textures are {}x{}, splat layout needs width {} and {} rows",
                    w, h, row_width, rows
                )));
            }
        }

        debug!(
            "asset: {} splats, {} chunks, {:?} SH with {} bands, row width {}",
            num_splats,
            chunks.len(),
            sh.mode(),
            sh.bands().as_u8(),
            row_width
        );
        Ok(Self {
            num_splats,
            chunks,
            packed,
            sh,
        })
    }

    #[inline]
    pub fn num_splats(&self) -> usize {
        self.num_splats
    }

    #[inline]
    pub fn row_width(&self) -> usize {
        self.packed.width()
    }

    pub fn chunks(&self) -> &ChunkTable {
        &self.chunks
    }

    pub fn packed(&self) -> &Texture2D<PackedSplat> {
        &self.packed
    }

    pub fn sh(&self) -> &ShStore {
        &self.sh
    }

    pub fn sh_mode(&self) -> ShMode {
        self.sh.mode()
    }

    /// Fails unless the asset stores SH the way the caller expects.
    pub fn expect_sh_mode(&self, mode: ShMode) -> Result<(), SplatError> {
        self.sh.expect_mode(mode)
    }

    #[inline]
    pub fn location(&self, identity: u32) -> StorageLocation {
        StorageLocation::of(identity, self.row_width() as u32)
    }

    fn check_identity(&self, identity: u32) -> Result<(), SplatError> {
        if identity as usize >= self.num_splats {
            return Err(SplatError::IdentityOutOfRange {
                identity,
                num_splats: self.num_splats,
            });
        }
        Ok(())
    }

    #[inline]
    fn fetch(&self, identity: u32) -> PackedSplat {
        let loc = self.location(identity);
        self.packed.fetch(loc.col as usize, loc.row as usize)
    }

    pub fn packed_splat(&self, identity: u32) -> Result<PackedSplat, SplatError> {
        self.check_identity(identity)?;
        Ok(self.fetch(identity))
    }

    pub fn decode_attributes(&self, identity: u32) -> Result<DecodedAttributes, SplatError> {
        self.check_identity(identity)?;
        Ok(decode(
            self.chunks.chunk_for(identity as usize),
            &self.fetch(identity),
        ))
    }

    fn effective_bands(&self, options: &DecodeOptions) -> ShBands {
        let stored = self.sh.bands();
        options.sh_bands.map_or(stored, |b| b.min(stored))
    }

    /// Full reconstruction of one splat, independent of any frame order.
    pub fn decode_splat(
        &self,
        identity: u32,
        options: &DecodeOptions,
    ) -> Result<ReconstructedSplat, SplatError> {
        self.check_identity(identity)?;
        let bands = self.effective_bands(options);
        Ok(match &self.sh {
            ShStore::None => self.reconstruct(&NoSh, identity, bands),
            ShStore::Palette(p) => self.reconstruct(p, identity, bands),
            ShStore::Direct(d) => self.reconstruct(d, identity, bands),
        })
    }

    #[inline]
    fn reconstruct<S: ShSource>(
        &self,
        sh: &S,
        identity: u32,
        bands: ShBands,
    ) -> ReconstructedSplat {
        let loc = self.location(identity);
        let packed = self.packed.fetch(loc.col as usize, loc.row as usize);
        let attrs = decode(self.chunks.chunk_for(identity as usize), &packed);

        let mut coeffs = ShCoeffs::default();
        sh.read_sh(loc, bands, &mut coeffs);
        let (cov_a, cov_b) = build_covariance(attrs.rotation, attrs.scale);

        ReconstructedSplat {
            position: attrs.position,
            rotation: attrs.rotation,
            scale: attrs.scale,
            color: attrs.color,
            sh: coeffs,
            cov_a,
            cov_b,
        }
    }

    /// Decodes the active slots of `order`, in slot order.
    ///
    /// Every identity is checked before any splat is decoded, so a bad order
    /// buffer yields an error and no partial frame.
    pub fn decode_frame(
        &self,
        order: &OrderBuffer,
        options: &DecodeOptions,
    ) -> Result<Vec<ReconstructedSplat>, SplatError> {
        order.validate(self.num_splats)?;
        let bands = self.effective_bands(options);
        trace!(
            "decoding frame of {} slots with {} SH bands",
            order.active_count(),
            bands.as_u8()
        );
        Ok(match &self.sh {
            ShStore::None => self.decode_slots(&NoSh, order.active(), bands),
            ShStore::Palette(p) => self.decode_slots(p, order.active(), bands),
            ShStore::Direct(d) => self.decode_slots(d, order.active(), bands),
        })
    }

    fn decode_slots<S: ShSource>(
        &self,
        sh: &S,
        identities: &[u32],
        bands: ShBands,
    ) -> Vec<ReconstructedSplat> {
        cfg_if! {
            if #[cfg(feature = "rayon")] {
                use rayon::prelude::*;
                identities
                    .par_iter()
                    .map(|&id| self.reconstruct(sh, id, bands))
                    .collect()
            } else {
                identities
                    .iter()
                    .map(|&id| self.reconstruct(sh, id, bands))
                    .collect()
            }
        }
    }

    /// Decoded center of every splat, in identity order.
    pub fn centers(&self) -> Vec<Vec3> {
        (0..self.num_splats)
            .map(|i| unpack_position(self.chunks.chunk_for(i), self.fetch(i as u32).pos_bits))
            .collect()
    }

    pub fn aabb(&self) -> Option<Aabb> {
        self.chunks.aabb()
    }

    pub fn focal_point(&self) -> Vec3 {
        self.chunks.focal_point()
    }

    /// Expands the asset back into an uncompressed cloud in PLY conventions.
    pub fn to_gaussian_cloud(&self, options: &DecodeOptions) -> GaussianCloud {
        let bands = self.effective_bands(options);
        match &self.sh {
            ShStore::None => self.expand(&NoSh, bands),
            ShStore::Palette(p) => self.expand(p, bands),
            ShStore::Direct(d) => self.expand(d, bands),
        }
    }

    fn expand<S: ShSource>(&self, sh: &S, bands: ShBands) -> GaussianCloud {
        let n = self.num_splats;
        let dim = bands.coeff_count();
        let mut cloud = GaussianCloud {
            num_points: n,
            sh_bands: bands,
            positions: Vec::with_capacity(n * 3),
            scales: Vec::with_capacity(n * 3),
            rotations: Vec::with_capacity(n * 4),
            alphas: Vec::with_capacity(n),
            colors: Vec::with_capacity(n * 3),
            sh: Vec::with_capacity(n * dim * 3),
        };

        let mut coeffs = ShCoeffs::default();
        for i in 0..n {
            let identity = i as u32;
            let chunk = self.chunks.chunk_for(i);
            let packed = self.fetch(identity);

            let position = unpack_position(chunk, packed.pos_bits);
            let log_scale = unpack_log_scale(chunk, packed.scale_bits);
            let rotation = unpack_rotation(packed.rot_bits);
            let color = unpack_color(chunk, packed.color_bits);
            let f_dc = (color.truncate() - Vec3::splat(0.5)) / SH_C0;

            cloud.positions.extend_from_slice(&position.to_array());
            cloud.scales.extend_from_slice(&log_scale.to_array());
            cloud.rotations.extend_from_slice(&rotation.to_array());
            cloud.alphas.push(inv_sigmoid(color.w));
            cloud.colors.extend_from_slice(&f_dc.to_array());

            sh.read_sh(self.location(identity), bands, &mut coeffs);
            for j in 0..dim {
                let c = coeffs.as_slice().get(j).copied().unwrap_or(Vec3::ZERO);
                cloud.sh.extend_from_slice(&c.to_array());
            }
        }
        cloud
    }
}
