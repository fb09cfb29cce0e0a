use crate::mosaic::{MosaicOptions, PixelSelectionMethod};
use crate::reader::ReadOptions;
use serde::{Deserialize, Serialize};

/// Prefix of the environment variables read on top of `Rocket.toml`.
pub const ENV_PREFIX: &str = "MOSAICTILE_";

/// Tile server settings, read from the server's figment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    /// Assets to mosaic, in priority order.
    pub assets: Vec<String>,
    pub pixel_selection: PixelSelectionMethod,
    pub threads: usize,
    pub tile_size: usize,
    /// Linear rescale range applied before PNG encoding.
    pub rescale: Option<(f64, f64)>,
    pub nodata: Option<f64>,
    pub indexes: Option<Vec<usize>>,
}

impl Default for TileConfig {
    fn default() -> Self {
        TileConfig {
            assets: Vec::new(),
            pixel_selection: PixelSelectionMethod::First,
            threads: 4,
            tile_size: 256,
            rescale: None,
            nodata: None,
            indexes: None,
        }
    }
}

impl TileConfig {
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            indexes: self.indexes.clone(),
            nodata: self.nodata,
            tile_size: self.tile_size,
            minimum_overlap: None,
        }
    }

    pub fn mosaic_options(&self) -> MosaicOptions {
        MosaicOptions::new(self.threads)
    }
}
