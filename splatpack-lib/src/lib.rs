pub mod asset;
pub mod chunk;
pub mod common;
pub mod covariance;
pub mod decode;
pub mod encode;
pub mod error;
pub mod format;
pub mod order;
pub mod ply;
pub mod sh;
pub mod sh_rotation;
pub mod structures;
pub mod texture;

pub use asset::{DecodeOptions, SplatAsset};
pub use encode::EncodeOptions;
pub use error::SplatError;
pub use order::{OrderBuffer, StorageLocation};
pub use structures::{GaussianCloud, ReconstructedSplat, ShBands, ShMode};

use encode::encode_cloud;
use format::{compress_zstd, decompress_zstd, deserialize_asset, serialize_asset};
use log::info;
use ply::{parse_ply, write_ply};

/// Parses a PLY buffer and quantizes it into the uncompressed container.
pub fn prepare_uncompressed(
    raw_data: &[u8],
    options: &EncodeOptions,
) -> Result<Vec<u8>, SplatError> {
    let cloud = parse_ply(raw_data)?;
    if cloud.num_points == 0 {
        return Err(SplatError::EmptyGaussianCloud);
    }
    let asset = encode_cloud(&cloud, options)?;
    serialize_asset(&asset)
}

/// Reads a compressed asset.
pub fn load_asset(data: &[u8]) -> Result<SplatAsset, SplatError> {
    let uncompressed = decompress_zstd(data)?;
    deserialize_asset(&uncompressed)
}

/// Writes `asset` in its compressed on-disk form.
pub fn save_asset(
    asset: &SplatAsset,
    compression_level: u32,
    workers: u32,
) -> Result<Vec<u8>, SplatError> {
    compress_zstd(&serialize_asset(asset)?, compression_level, workers)
}

pub fn compress(
    raw_data: &[u8],
    compression_level: u32,
    workers: u32,
    options: &EncodeOptions,
    output: &mut Vec<u8>,
) -> Result<(), SplatError> {
    let uncompressed = prepare_uncompressed(raw_data, options)?;
    let compressed = compress_zstd(&uncompressed, compression_level, workers)?;
    info!(
        "compressed {} PLY bytes to {} bytes",
        raw_data.len(),
        compressed.len()
    );
    output.clear();
    output.extend_from_slice(&compressed);
    Ok(())
}

pub fn decompress(
    data: &[u8],
    include_normals: bool,
    options: &DecodeOptions,
    output: &mut Vec<u8>,
) -> Result<(), SplatError> {
    let asset = load_asset(data)?;
    write_ply(output, &asset.to_gaussian_cloud(options), include_normals)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use async_compression::zstd::CParameter;
    use async_compression::Level;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use async_compression::tokio::bufread::ZstdDecoder;
    use async_compression::tokio::write::ZstdEncoder;
    use tokio::io::BufReader;

    #[inline(never)]
    async fn compress_zstd_async(
        data: &[u8],
        level: u32,
        workers: u32,
    ) -> Result<Vec<u8>, SplatError> {
        let mut compressed = Vec::new();
        let params = &[CParameter::nb_workers(workers)];
        let mut encoder = ZstdEncoder::with_quality_and_params(
            &mut compressed,
            Level::Precise(level as i32),
            params,
        );

        encoder.write_all(data)
            .await
            .map_err(|e| SplatError::ZstdCompress(e.to_string()))?;

        encoder.shutdown()
            .await
            .map_err(|e| SplatError::ZstdCompress(e.to_string()))?;

        Ok(compressed)
    }

    #[inline(never)]
    async fn decompress_zstd_async(data: &[u8]) -> Result<Vec<u8>, SplatError> {
        let reader = BufReader::new(std::io::Cursor::new(data));
        let mut decoder = ZstdDecoder::new(reader);
        let mut decompressed = Vec::new();

        decoder.read_to_end(&mut decompressed)
            .await
            .map_err(|e| SplatError::ZstdDecompress(e.to_string()))?;

        Ok(decompressed)
    }

    pub async fn load_asset_async(data: &[u8]) -> Result<SplatAsset, SplatError> {
        let uncompressed = decompress_zstd_async(data).await?;
        deserialize_asset(&uncompressed)
    }

    #[inline(never)]
    pub async fn compress_async(
        raw_data: &[u8],
        compression_level: u32,
        workers: u32,
        options: &EncodeOptions,
        output: &mut Vec<u8>,
    ) -> Result<(), SplatError> {
        let uncompressed = prepare_uncompressed(raw_data, options)?;
        let compressed = compress_zstd_async(&uncompressed, compression_level, workers).await?;
        output.clear();
        output.extend_from_slice(&compressed);
        Ok(())
    }

    #[inline(never)]
    pub async fn decompress_async(
        data: &[u8],
        include_normals: bool,
        options: &DecodeOptions,
        output: &mut Vec<u8>,
    ) -> Result<(), SplatError> {
        let asset = load_asset_async(data).await?;
        write_ply(output, &asset.to_gaussian_cloud(options), include_normals)
    }
}
}
