use crate::error::SplatError;

/// A row-major 2D texel store addressed like a nearest-filtered texture.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture2D<T> {
    width: usize,
    height: usize,
    texels: Vec<T>,
}

impl<T: Copy + Default> Texture2D<T> {
    pub fn new(width: usize, height: usize, texels: Vec<T>) -> Result<Self, SplatError> {
        if width == 0 || height == 0 {
            return Err(SplatError::DeserializeAsset(
                "texture dimensions must be non-zero".to_string(),
            ));
        }
        if texels.len() != width * height {
            return Err(SplatError::DeserializeAsset(format!(
                "texture {}x{} needs {} texels, got {}",
                width,
                height,
                width * height,
                texels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            texels,
        })
    }

    /// Lays `texels` out with the given row width, padding the last row with
    /// default texels.
    pub fn from_rows(width: usize, mut texels: Vec<T>) -> Result<Self, SplatError> {
        let width = width.max(1);
        let height = texels.len().div_ceil(width).max(1);
        texels.resize(width * height, T::default());
        Self::new(width, height, texels)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Texel at column `u`, row `v`. Callers validate coordinates at load time.
    #[inline]
    pub fn fetch(&self, u: usize, v: usize) -> T {
        debug_assert!(u < self.width && v < self.height);
        self.texels[v * self.width + u]
    }

    #[inline]
    pub fn texels(&self) -> &[T] {
        &self.texels
    }
}
