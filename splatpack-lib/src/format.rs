//! Binary container for [`SplatAsset`].
//!
//! A 16-byte header is followed by the chunk table, the packed splat store
//! and, depending on the SH mode, the palette or direct coefficient planes.
//! Every multi-byte value is little endian; the whole buffer is zstd
//! compressed on disk.

use std::io::{Cursor, Write};

use log::debug;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, IntoBytes};
use zstd::stream::{decode_all, Encoder};

use crate::asset::SplatAsset;
use crate::chunk::{chunk_count, ChunkTable};
use crate::common::{texture_size_for, PALETTE_ENTRY_COEFFS, PALETTE_ROW_ENTRIES};
use crate::encode::direct_textures;
use crate::error::SplatError;
use crate::sh::{DirectTextures, ShDirect, ShPalette, ShStore};
use crate::structures::{
    AssetHeader, Chunk, PackedSplat, ShBands, ShMode, FLAG_COLOR_BOUNDS, MAGIC, VERSION,
};
use crate::texture::Texture2D;

#[inline(never)]
pub(crate) fn compress_zstd(data: &[u8], level: u32, workers: u32) -> Result<Vec<u8>, SplatError> {
    let mut encoder = Encoder::new(Vec::new(), level as i32)
        .map_err(|e| SplatError::ZstdCompress(format!("Encoder creation failed: {}", e)))?;
    encoder
        .multithread(workers)
        .map_err(|e| SplatError::ZstdCompress(format!("Setting multithread failed: {}", e)))?;
    encoder
        .write_all(data)
        .map_err(|e| SplatError::ZstdCompress(format!("Writing data failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| SplatError::ZstdCompress(format!("Finalizing compression failed: {}", e)))
}

#[inline(never)]
pub(crate) fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>, SplatError> {
    decode_all(Cursor::new(data))
        .map_err(|e| SplatError::ZstdDecompress(format!("Decompression failed: {}", e)))
}

fn put_u32s(out: &mut Vec<u8>, values: impl IntoIterator<Item = u32>) {
    let words: Vec<U32> = values.into_iter().map(U32::new).collect();
    out.extend_from_slice(words.as_bytes());
}

fn put_f32s(out: &mut Vec<u8>, values: impl IntoIterator<Item = f32>) {
    put_u32s(out, values.into_iter().map(f32::to_bits));
}

fn put_quads<'a>(out: &mut Vec<u8>, texels: impl IntoIterator<Item = &'a [u32; 4]>) {
    put_u32s(out, texels.into_iter().flatten().copied());
}

/// Serializes an asset to the uncompressed container layout.
pub fn serialize_asset(asset: &SplatAsset) -> Result<Vec<u8>, SplatError> {
    let n = asset.num_splats();
    let num_splats = u32::try_from(n)
        .map_err(|_| SplatError::SerializeAsset(format!("{} splats do not fit the header", n)))?;
    let chunks = asset.chunks();
    let sh = asset.sh();

    let hdr = AssetHeader {
        magic: U32::new(MAGIC),
        version: U32::new(VERSION),
        num_splats: U32::new(num_splats),
        sh_bands: sh.bands().as_u8(),
        sh_mode: sh.mode().as_u8(),
        flags: if chunks.has_color_bounds() {
            FLAG_COLOR_BOUNDS
        } else {
            0
        },
        reserved: 0,
    };

    let mut out = Vec::with_capacity(size_of::<AssetHeader>() + n * 16 * 2);
    out.extend_from_slice(hdr.as_bytes());
    put_f32s(&mut out, chunks.to_floats());

    let packed = &asset.packed().texels()[..n];
    put_u32s(&mut out, bytemuck::cast_slice::<PackedSplat, u32>(packed).iter().copied());

    match sh {
        ShStore::None => {}
        ShStore::Palette(p) => {
            let (sh_min, sh_max) = p.range();
            let count = p.palette_count();
            put_f32s(&mut out, [sh_min, sh_max]);
            put_u32s(&mut out, [count as u32]);
            for label in &p.labels().texels()[..n] {
                out.extend_from_slice(label);
            }
            let centroid_texels =
                count.div_ceil(PALETTE_ROW_ENTRIES) * PALETTE_ROW_ENTRIES * PALETTE_ENTRY_COEFFS;
            for texel in &p.centroids().texels()[..centroid_texels] {
                out.extend_from_slice(texel);
            }
        }
        ShStore::Direct(d) => match d.textures() {
            DirectTextures::One { sh1to3 } => put_quads(&mut out, &sh1to3.texels()[..n]),
            DirectTextures::Two {
                sh1to3,
                sh4to7,
                sh8,
            } => {
                put_quads(&mut out, &sh1to3.texels()[..n]);
                put_quads(&mut out, &sh4to7.texels()[..n]);
                put_u32s(&mut out, sh8.texels()[..n].iter().copied());
            }
            DirectTextures::Three {
                sh1to3,
                sh4to7,
                sh8to11,
                sh12to15,
            } => {
                for plane in [sh1to3, sh4to7, sh8to11, sh12to15] {
                    put_quads(&mut out, &plane.texels()[..n]);
                }
            }
        },
    }
    Ok(out)
}

struct SectionReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> SectionReader<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], SplatError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                SplatError::DeserializeAsset(format!(
                    "{} needs {} bytes at offset {}, buffer holds {}",
                    what,
                    len,
                    self.offset,
                    self.data.len()
                ))
            })?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn u32s(&mut self, count: usize, what: &str) -> Result<Vec<u32>, SplatError> {
        let len = count
            .checked_mul(4)
            .ok_or_else(|| SplatError::DeserializeAsset(format!("{} is too large", what)))?;
        let words = <[U32]>::ref_from_bytes(self.take(len, what)?)
            .map_err(|_| SplatError::DeserializeAsset(format!("{} is misaligned", what)))?;
        Ok(words.iter().map(|w| w.get()).collect())
    }

    fn f32s(&mut self, count: usize, what: &str) -> Result<Vec<f32>, SplatError> {
        Ok(self
            .u32s(count, what)?
            .into_iter()
            .map(f32::from_bits)
            .collect())
    }

    fn finish(&self) -> Result<(), SplatError> {
        if self.offset != self.data.len() {
            return Err(SplatError::DeserializeAsset(format!(
                "{} trailing bytes after the last section",
                self.data.len() - self.offset
            )));
        }
        Ok(())
    }
}

/// Parses the uncompressed container layout.
pub fn deserialize_asset(data: &[u8]) -> Result<SplatAsset, SplatError> {
    let (hdr, _) = AssetHeader::read_from_prefix(data)
        .map_err(|_| SplatError::DeserializeAsset("Corrupt header".to_string()))?;
    if hdr.magic.get() != MAGIC {
        return Err(SplatError::DeserializeAsset(
            "Invalid magic number".to_string(),
        ));
    }
    if hdr.version.get() != VERSION {
        return Err(SplatError::DeserializeAsset(format!(
            "Unsupported version {}",
            hdr.version.get()
        )));
    }
    let n = hdr.num_splats.get() as usize;
    if n == 0 {
        return Err(SplatError::EmptyGaussianCloud);
    }
    let bands = ShBands::from_u8(hdr.sh_bands).ok_or_else(|| {
        SplatError::DeserializeAsset(format!("Invalid SH band count {}", hdr.sh_bands))
    })?;
    let mode = ShMode::from_u8(hdr.sh_mode)
        .ok_or_else(|| SplatError::DeserializeAsset(format!("Invalid SH mode {}", hdr.sh_mode)))?;
    if (mode == ShMode::None) != (bands == ShBands::Zero) {
        return Err(SplatError::ShLayout(format!(
            "SH mode {:?} with {} bands",
            mode,
            bands.as_u8()
        )));
    }
    let color_bounds = hdr.flags & FLAG_COLOR_BOUNDS != 0;

    let mut r = SectionReader {
        data,
        offset: size_of::<AssetHeader>(),
    };
    let chunk_floats = r.f32s(chunk_count(n) * Chunk::stride(color_bounds), "chunk table")?;
    let chunks = ChunkTable::from_floats(&chunk_floats, n, color_bounds)?;

    let (row_width, _) = texture_size_for(n);
    let packed_words = r.u32s(n * 4, "packed splats")?;
    let packed: Vec<PackedSplat> = bytemuck::cast_slice(&packed_words).to_vec();
    let packed = Texture2D::from_rows(row_width, packed)?;

    let sh = match mode {
        ShMode::None => ShStore::None,
        ShMode::Palette => {
            let range = r.f32s(2, "palette range")?;
            let count = r.u32s(1, "palette size")?[0] as usize;
            let labels: Vec<[u8; 2]> = r
                .take(n * 2, "palette labels")?
                .chunks_exact(2)
                .map(|b| [b[0], b[1]])
                .collect();
            let rows = count.div_ceil(PALETTE_ROW_ENTRIES);
            let width = PALETTE_ROW_ENTRIES * PALETTE_ENTRY_COEFFS;
            let centroids: Vec<[u8; 3]> = r
                .take(rows * width * 3, "palette centroids")?
                .chunks_exact(3)
                .map(|b| [b[0], b[1], b[2]])
                .collect();
            ShStore::Palette(ShPalette::new(
                bands,
                Texture2D::from_rows(row_width, labels)?,
                Texture2D::new(width, rows.max(1), centroids)?,
                range[0],
                range[1],
                count,
            )?)
        }
        ShMode::Direct => {
            let mut planes: [Vec<u32>; 4] = Default::default();
            planes[0] = r.u32s(n * 4, "SH band 1")?;
            match bands {
                ShBands::Zero | ShBands::One => {}
                ShBands::Two => {
                    planes[1] = r.u32s(n * 4, "SH band 2")?;
                    planes[2] = r.u32s(n, "SH band 2 tail")?;
                }
                ShBands::Three => {
                    planes[1] = r.u32s(n * 4, "SH band 2")?;
                    planes[2] = r.u32s(n * 4, "SH band 3")?;
                    planes[3] = r.u32s(n * 4, "SH band 3 tail")?;
                }
            }
            ShStore::Direct(ShDirect::new(direct_textures(bands, row_width, planes)?)?)
        }
    };
    r.finish()?;

    debug!(
        "read asset: {} splats, {:?} SH, {} bytes",
        n,
        mode,
        data.len()
    );
    SplatAsset::new(n, chunks, packed, sh)
}
