use std::{fmt, io};

use crate::structures::ShMode;

#[derive(Debug)]
pub enum SplatError {
    ParsePly(String),
    EmptyGaussianCloud,
    SerializeAsset(String),
    DeserializeAsset(String),
    ZstdCompress(String),
    ZstdDecompress(String),
    InvalidChunk { chunk: usize, reason: String },
    ShModeMismatch { expected: ShMode, found: ShMode },
    ShLayout(String),
    InvalidOrderBuffer(String),
    SlotOutOfRange { slot: usize, active_count: usize },
    IdentityOutOfRange { identity: u32, num_splats: usize },
    IoError(io::Error),
}

impl fmt::Display for SplatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplatError::ParsePly(e) => {
                write!(f, "Failed to parse splats from the PLY buffer: {}", e)
            }
            SplatError::EmptyGaussianCloud => {
                write!(f, "The Gaussian cloud is empty.")
            }
            SplatError::SerializeAsset(e) => {
                write!(f, "Failed to serialize splat asset: {}", e)
            }
            SplatError::DeserializeAsset(e) => {
                write!(f, "Failed to deserialize splat asset: {}", e)
            }
            SplatError::ZstdCompress(e) => {
                write!(f, "Zstandard compression failed: {}", e)
            }
            SplatError::ZstdDecompress(e) => {
                write!(f, "Zstandard decompression failed: {}", e)
            }
            SplatError::InvalidChunk { chunk, reason } => {
                write!(f, "Chunk {} is malformed: {}", chunk, reason)
            }
            SplatError::ShModeMismatch { expected, found } => {
                write!(
                    f,
                    "Spherical harmonics mode mismatch: expected {:?}, asset holds {:?}",
                    expected, found
                )
            }
            SplatError::ShLayout(e) => {
                write!(f, "Spherical harmonics storage is inconsistent: {}", e)
            }
            SplatError::InvalidOrderBuffer(e) => {
                write!(f, "Invalid order buffer: {}", e)
            }
            SplatError::SlotOutOfRange { slot, active_count } => {
                write!(
                    f,
                    "Render slot {} is outside the {} active slots",
                    slot, active_count
                )
            }
            SplatError::IdentityOutOfRange {
                identity,
                num_splats,
            } => {
                write!(
                    f,
                    "Splat identity {} does not exist (asset holds {} splats)",
                    identity, num_splats
                )
            }
            SplatError::IoError(e) => {
                write!(f, "An I/O error occurred: {}", e)
            }
        }
    }
}

impl std::error::Error for SplatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SplatError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SplatError {
    fn from(e: io::Error) -> Self {
        SplatError::IoError(e)
    }
}
