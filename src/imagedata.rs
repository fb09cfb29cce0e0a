use crate::error::{Result, TileError};
use crate::tile::Bounds;
use ndarray::{Array2, Array3};

/// Pixel values shaped `(bands, height, width)` with a per pixel validity mask.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub data: Array3<f64>,
    /// `true` marks a valid pixel.
    pub mask: Array2<bool>,
    pub bounds: Option<Bounds>,
    /// Assets that contributed at least one valid pixel, in fetch order.
    pub assets: Vec<String>,
}

impl ImageData {
    pub fn new(data: Array3<f64>, mask: Array2<bool>) -> Result<Self> {
        let (bands, height, width) = data.dim();
        if mask.dim() != (height, width) {
            let (mask_height, mask_width) = mask.dim();
            return Err(TileError::ShapeMismatch {
                expected: (bands, height, width),
                found: (bands, mask_height, mask_width),
            });
        }
        Ok(ImageData {
            data,
            mask,
            bounds: None,
            assets: Vec::new(),
        })
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_assets(mut self, assets: Vec<String>) -> Self {
        self.assets = assets;
        self
    }

    pub fn bands(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn has_valid(&self) -> bool {
        self.mask.iter().any(|valid| *valid)
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|valid| **valid).count()
    }

    /// Value of `band` at a pixel, `None` when the pixel is masked.
    pub fn value(&self, band: usize, row: usize, col: usize) -> Option<f64> {
        if *self.mask.get((row, col))? {
            self.data.get((band, row, col)).copied()
        } else {
            None
        }
    }
}
