#[cfg(test)]
#[macro_use]
mod approx;
pub mod config;
pub mod error;
pub mod imagedata;
pub mod mosaic;
pub mod reader;
pub mod render;
pub mod stac;
pub mod tile;

pub use error::{Result, TileError};
pub use imagedata::ImageData;
