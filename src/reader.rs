//! Read georeferenced images.
//!
//! An asset is any raster the `image` crate decodes, local or over HTTP,
//! georeferenced by a world file next to it (`.pgw`, `.jgw`, `.tfw` or
//! `.wld`) expressed in web mercator meters. Reads resample with nearest
//! neighbour onto the requested grid and return an [`ImageData`] whose mask
//! combines the asset footprint with its alpha channel or nodata value.

use crate::error::{Result, TileError};
use crate::imagedata::ImageData;
use crate::tile::{self, Bounds, GeoPoint, Point, TileMatrixSet};
use image::DynamicImage;
use ndarray::{Array2, Array3};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

/// Six parameter affine georeference. `x` and `y` locate the centre of the
/// upper left pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldFile {
    pub pixel_width: f64,
    pub rotation_y: f64,
    pub rotation_x: f64,
    pub pixel_height: f64,
    pub x: f64,
    pub y: f64,
}

impl WorldFile {
    /// North up georeference covering `bounds` with a `width` x `height` grid.
    pub fn for_bounds(bounds: &Bounds, width: usize, height: usize) -> Self {
        let pixel_width = bounds.width() / width as f64;
        let pixel_height = -bounds.height() / height as f64;
        WorldFile {
            pixel_width,
            rotation_y: 0.0,
            rotation_x: 0.0,
            pixel_height,
            x: bounds.left + pixel_width / 2.0,
            y: bounds.top + pixel_height / 2.0,
        }
    }

    pub fn bounds(&self, width: usize, height: usize) -> Bounds {
        let left = self.x - self.pixel_width / 2.0;
        let top = self.y - self.pixel_height / 2.0;
        Bounds {
            left,
            bottom: top + self.pixel_height * height as f64,
            right: left + self.pixel_width * width as f64,
            top,
        }
    }

    /// Pixel holding a coordinate, possibly outside the grid.
    fn pixel(&self, point: &Point) -> (f64, f64) {
        let left = self.x - self.pixel_width / 2.0;
        let top = self.y - self.pixel_height / 2.0;
        (
            ((point.y - top) / self.pixel_height).floor(),
            ((point.x - left) / self.pixel_width).floor(),
        )
    }
}

impl FromStr for WorldFile {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split_whitespace()
            .map(|value| {
                value
                    .parse::<f64>()
                    .map_err(|_| TileError::InvalidWorldFile(format!("bad number {:?}", value)))
            })
            .collect::<Result<Vec<f64>>>()?;
        let &[pixel_width, rotation_y, rotation_x, pixel_height, x, y] = values.as_slice() else {
            return Err(TileError::InvalidWorldFile(format!(
                "expected 6 values, found {}",
                values.len()
            )));
        };
        if rotation_x != 0.0 || rotation_y != 0.0 {
            return Err(TileError::InvalidWorldFile(
                "rotated grids are not supported".into(),
            ));
        }
        if pixel_width <= 0.0 || pixel_height >= 0.0 {
            return Err(TileError::InvalidWorldFile(
                "expected a north up grid with positive pixel width".into(),
            ));
        }
        Ok(WorldFile {
            pixel_width,
            rotation_y,
            rotation_x,
            pixel_height,
            x,
            y,
        })
    }
}

impl fmt::Display for WorldFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.pixel_width)?;
        writeln!(f, "{}", self.rotation_y)?;
        writeln!(f, "{}", self.rotation_x)?;
        writeln!(f, "{}", self.pixel_height)?;
        writeln!(f, "{}", self.x)?;
        writeln!(f, "{}", self.y)
    }
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// 1 based band indexes, all bands when `None`.
    pub indexes: Option<Vec<usize>>,
    /// Overrides the asset nodata value.
    pub nodata: Option<f64>,
    pub tile_size: usize,
    /// Minimum fraction of the requested area the asset has to cover.
    pub minimum_overlap: Option<f64>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            indexes: None,
            nodata: None,
            tile_size: 256,
            minimum_overlap: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Info {
    pub name: String,
    pub bounds: Bounds,
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub nodata: Option<f64>,
    pub has_alpha: bool,
}

/// Band values at one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointData {
    pub values: Vec<f64>,
    pub valid: bool,
}

/// A decoded raster with its georeference.
#[derive(Debug, Clone)]
pub struct Asset {
    pub name: String,
    data: Array3<f64>,
    alpha: Option<Array2<bool>>,
    world: WorldFile,
    pub nodata: Option<f64>,
}

impl Asset {
    /// Load a local path or http(s) URL together with its world file.
    pub fn open(location: &str, timeout: Duration) -> Result<Self> {
        let bytes = load_bytes(location, timeout)?;
        let image = image::load_from_memory(&bytes)?;
        let world = find_world_file(location, timeout)?;
        Ok(Asset::from_image(location, &image, world))
    }

    pub fn from_image(name: &str, image: &DynamicImage, world: WorldFile) -> Self {
        let (data, alpha) = planar(image);
        Asset {
            name: name.to_string(),
            data,
            alpha,
            world,
            nodata: None,
        }
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn band_count(&self) -> usize {
        self.data.dim().0
    }

    pub fn bounds(&self) -> Bounds {
        self.world.bounds(self.width(), self.height())
    }

    pub fn info(&self) -> Info {
        Info {
            name: self.name.clone(),
            bounds: self.bounds(),
            width: self.width(),
            height: self.height(),
            bands: self.band_count(),
            nodata: self.nodata,
            has_alpha: self.alpha.is_some(),
        }
    }

    /// Read a web mercator tile.
    pub fn tile(&self, x: u32, y: u32, z: u8, options: &ReadOptions) -> Result<ImageData> {
        let tms = TileMatrixSet::WebMercatorQuad;
        if !tms.is_valid(z, x, y) {
            return Err(TileError::OutsideBounds(format!(
                "Tile {}/{}/{} does not exist in {}",
                z, x, y, tms
            )));
        }
        let bounds = tms.xy_bounds(z, x, y);
        if !self.bounds().intersects(&bounds) {
            return Err(TileError::OutsideBounds(format!(
                "Tile {}/{}/{} is outside {} bounds",
                z, x, y, self.name
            )));
        }
        self.part(&bounds, options.tile_size, options.tile_size, options)
    }

    /// Read an arbitrary web mercator extent onto a `width` x `height` grid.
    pub fn part(
        &self,
        bounds: &Bounds,
        width: usize,
        height: usize,
        options: &ReadOptions,
    ) -> Result<ImageData> {
        let asset_bounds = self.bounds();
        if !asset_bounds.intersects(bounds) {
            return Err(TileError::OutsideBounds(format!(
                "Requested area is outside {} bounds",
                self.name
            )));
        }
        if let Some(minimum) = options.minimum_overlap {
            let ratio = bounds.cover_ratio(&asset_bounds);
            if ratio < minimum {
                return Err(TileError::OutsideBounds(format!(
                    "Dataset covers less than {:.0}% of tile",
                    ratio * 100.0
                )));
            }
        }
        self.read(bounds, width, height, options)
    }

    /// Read an extent at the asset's own resolution, decimated so the longest
    /// side is at most `max_size`.
    pub fn part_max_size(
        &self,
        bounds: &Bounds,
        max_size: usize,
        options: &ReadOptions,
    ) -> Result<ImageData> {
        let native =
            |extent: f64, resolution: f64| (extent / resolution.abs()).round().max(1.0) as usize;
        let (width, height) = preview_size(
            native(bounds.width(), self.world.pixel_width),
            native(bounds.height(), self.world.pixel_height),
            max_size,
        );
        self.part(bounds, width, height, options)
    }

    /// Decimated read of the whole asset, longest side at most `max_size`.
    pub fn preview(&self, max_size: usize, options: &ReadOptions) -> Result<ImageData> {
        let (width, height) = preview_size(self.width(), self.height(), max_size);
        self.read(&self.bounds(), width, height, options)
    }

    /// Band values at a WGS84 longitude/latitude.
    pub fn point(&self, longitude: f64, latitude: f64, options: &ReadOptions) -> Result<PointData> {
        let point = tile::geodetic_to_meters(&GeoPoint {
            longitude,
            latitude,
        });
        if !self.bounds().contains(&point) {
            return Err(TileError::PointOutsideBounds);
        }
        let indexes = self.band_indexes(options)?;
        let nodata = options.nodata.or(self.nodata);
        let (row, col) = self.world.pixel(&point);
        let row = (row.max(0.0) as usize).min(self.height() - 1);
        let col = (col.max(0.0) as usize).min(self.width() - 1);
        let values: Vec<f64> = indexes
            .iter()
            .map(|band| self.data[[*band, row, col]])
            .collect();
        let valid = self.is_valid(&values, row, col, nodata);
        Ok(PointData { values, valid })
    }

    fn band_indexes(&self, options: &ReadOptions) -> Result<Vec<usize>> {
        match &options.indexes {
            None => Ok((0..self.band_count()).collect()),
            Some(indexes) => indexes
                .iter()
                .map(|index| {
                    if *index == 0 || *index > self.band_count() {
                        Err(TileError::InvalidBandIndex(*index))
                    } else {
                        Ok(index - 1)
                    }
                })
                .collect(),
        }
    }

    fn is_valid(&self, values: &[f64], row: usize, col: usize, nodata: Option<f64>) -> bool {
        match (&self.alpha, nodata) {
            (Some(alpha), _) => alpha[[row, col]],
            (None, Some(nodata)) => !values.iter().all(|value| *value == nodata),
            (None, None) => true,
        }
    }

    fn read(
        &self,
        bounds: &Bounds,
        width: usize,
        height: usize,
        options: &ReadOptions,
    ) -> Result<ImageData> {
        let indexes = self.band_indexes(options)?;
        let nodata = options.nodata.or(self.nodata);
        let fill = nodata.unwrap_or(0.0);
        let x_resolution = bounds.width() / width as f64;
        let y_resolution = bounds.height() / height as f64;

        let mut data = Array3::from_elem((indexes.len(), height, width), fill);
        let mut mask = Array2::from_elem((height, width), false);
        let mut values = vec![0.0; indexes.len()];
        for ((row, col), valid) in mask.indexed_iter_mut() {
            let centre = Point {
                x: bounds.left + (col as f64 + 0.5) * x_resolution,
                y: bounds.top - (row as f64 + 0.5) * y_resolution,
            };
            let (source_row, source_col) = self.world.pixel(&centre);
            if source_row < 0.0
                || source_col < 0.0
                || source_row >= self.height() as f64
                || source_col >= self.width() as f64
            {
                continue;
            }
            let (source_row, source_col) = (source_row as usize, source_col as usize);
            for (value, band) in values.iter_mut().zip(&indexes) {
                *value = self.data[[*band, source_row, source_col]];
            }
            for (band, value) in values.iter().enumerate() {
                data[[band, row, col]] = *value;
            }
            *valid = self.is_valid(&values, source_row, source_col, nodata);
        }
        Ok(ImageData::new(data, mask)?.with_bounds(*bounds))
    }
}

/// Opens assets by location for the mosaic driver.
pub trait AssetReader: Sync {
    fn open(&self, location: &str) -> Result<Asset>;

    fn options(&self) -> &ReadOptions;

    fn tile(&self, location: &str, x: u32, y: u32, z: u8) -> Result<ImageData> {
        self.open(location)?.tile(x, y, z, self.options())
    }
}

/// Reads assets from disk or over HTTP on every call.
#[derive(Debug, Clone)]
pub struct FileAssetReader {
    options: ReadOptions,
    timeout: Duration,
}

impl FileAssetReader {
    pub fn new(options: ReadOptions) -> Self {
        FileAssetReader {
            options,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl AssetReader for FileAssetReader {
    fn open(&self, location: &str) -> Result<Asset> {
        log::debug!("opening {}", location);
        Ok(Asset::open(location, self.timeout)?.with_nodata(self.options.nodata))
    }

    fn options(&self) -> &ReadOptions {
        &self.options
    }
}

fn preview_size(width: usize, height: usize, max_size: usize) -> (usize, usize) {
    if width.max(height) < max_size {
        return (width, height);
    }
    let ratio = height as f64 / width as f64;
    if ratio > 1.0 {
        ((max_size as f64 / ratio).ceil() as usize, max_size)
    } else {
        (max_size, (max_size as f64 * ratio).ceil() as usize)
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn load_bytes(location: &str, timeout: Duration) -> Result<Vec<u8>> {
    if !is_remote(location) {
        return Ok(fs::read(location)?);
    }
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()?;
    let response = client.get(location).send()?;
    log::debug!("response status {:?} for {}", response.status(), location);
    let response = response.error_for_status()?;
    Ok(response.bytes()?.to_vec())
}

/// Sidecar names to try, most specific first: `a.png` gives `a.pgw`, `a.wld`.
/// The query string of a URL is kept on every candidate.
fn world_file_candidates(location: &str) -> Vec<String> {
    let (location, query) = match location.find('?') {
        Some(mark) if is_remote(location) => location.split_at(mark),
        _ => (location, ""),
    };
    let name_start = location.rfind('/').map_or(0, |slash| slash + 1);
    let (stem, extension) = match location[name_start..].rfind('.') {
        Some(dot) => location.split_at(name_start + dot),
        None => (location, ""),
    };
    let mut candidates = Vec::new();
    let extension: Vec<char> = extension.chars().skip(1).collect();
    if let (Some(first), Some(last)) = (extension.first(), extension.last()) {
        if extension.len() >= 2 {
            candidates.push(format!("{}.{}{}w{}", stem, first, last, query));
        }
    }
    candidates.push(format!("{}.wld{}", stem, query));
    candidates
}

fn find_world_file(location: &str, timeout: Duration) -> Result<WorldFile> {
    for candidate in world_file_candidates(location) {
        match load_bytes(&candidate, timeout) {
            Ok(bytes) => return String::from_utf8_lossy(&bytes).parse(),
            Err(error) => log::debug!("no world file at {}: {}", candidate, error),
        }
    }
    Err(TileError::InvalidWorldFile(format!(
        "no world file found for {}",
        location
    )))
}

/// Split an image into `(bands, height, width)` samples and an optional
/// alpha mask. Grey images give one band, colour images three.
fn planar(image: &DynamicImage) -> (Array3<f64>, Option<Array2<bool>>) {
    let color = image.color();
    let (width, height) = (image.width() as usize, image.height() as usize);
    let grey = color.channel_count() <= 2;
    let bytes_per_sample = color.bytes_per_pixel() / color.channel_count();
    let (samples, stride): (Vec<f64>, usize) = match (grey, bytes_per_sample) {
        (true, 1) => (widen(image.to_luma_alpha8().into_raw()), 2),
        (true, 2) => (widen(image.to_luma_alpha16().into_raw()), 2),
        (true, _) => (widen(image.to_luma_alpha32f().into_raw()), 2),
        (false, 1) => (widen(image.to_rgba8().into_raw()), 4),
        (false, 2) => (widen(image.to_rgba16().into_raw()), 4),
        (false, _) => (widen(image.to_rgba32f().into_raw()), 4),
    };
    let bands = if grey { 1 } else { 3 };
    let data = Array3::from_shape_fn((bands, height, width), |(band, row, col)| {
        samples[(row * width + col) * stride + band]
    });
    let alpha = color.has_alpha().then(|| {
        Array2::from_shape_fn((height, width), |(row, col)| {
            samples[(row * width + col) * stride + stride - 1] != 0.0
        })
    });
    (data, alpha)
}

fn widen<T: Into<f64>>(samples: Vec<T>) -> Vec<f64> {
    samples.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx;
    use image::{GrayImage, Luma, Rgba, RgbaImage};
    use std::collections::HashMap;

    /// 4x4 RGBA asset covering web mercator tile 1/0/0; the right column is
    /// transparent and red grows with the row.
    fn rgba_asset() -> Asset {
        let image = RgbaImage::from_fn(4, 4, |col, row| {
            let alpha = if col == 3 { 0 } else { 255 };
            Rgba([row as u8 * 10, 100, 200, alpha])
        });
        let world = WorldFile::for_bounds(&tile::xy_bounds(1, 0, 0), 4, 4);
        Asset::from_image("rgba", &DynamicImage::ImageRgba8(image), world)
    }

    fn grey_asset() -> Asset {
        let image = GrayImage::from_fn(2, 2, |col, row| Luma([(row * 2 + col) as u8]));
        let world = WorldFile::for_bounds(&tile::xy_bounds(1, 1, 1), 2, 2);
        Asset::from_image("grey", &DynamicImage::ImageLuma8(image), world)
    }

    #[test]
    fn test_world_file_parse() {
        let world: WorldFile = "10.0\n0.0\n0.0\n-10.0\n1005.0\n1995.0\n".parse().unwrap();
        let bounds = world.bounds(100, 50);
        approx::assert_approx!(bounds.left, 1000.0);
        approx::assert_approx!(bounds.top, 2000.0);
        approx::assert_approx!(bounds.right, 2000.0);
        approx::assert_approx!(bounds.bottom, 1500.0);
        assert_eq!(world.to_string().parse::<WorldFile>().unwrap(), world);
    }

    #[test]
    fn test_world_file_rejects_bad_input() {
        assert!(matches!(
            "1 0.5 0 -1 0 0".parse::<WorldFile>(),
            Err(TileError::InvalidWorldFile(_))
        ));
        assert!(matches!(
            "1 0 0 -1 0".parse::<WorldFile>(),
            Err(TileError::InvalidWorldFile(_))
        ));
        assert!(matches!(
            "1 0 0 -1 0 north".parse::<WorldFile>(),
            Err(TileError::InvalidWorldFile(_))
        ));
        assert!(matches!(
            "1 0 0 1 0 0".parse::<WorldFile>(),
            Err(TileError::InvalidWorldFile(_))
        ));
    }

    #[test]
    fn test_world_file_candidates() {
        assert_eq!(
            world_file_candidates("/data/scene.png"),
            vec!["/data/scene.pgw", "/data/scene.wld"]
        );
        assert_eq!(
            world_file_candidates("https://host.example/v1.2/scene.jpeg"),
            vec![
                "https://host.example/v1.2/scene.jgw",
                "https://host.example/v1.2/scene.wld"
            ]
        );
        assert_eq!(world_file_candidates("scene"), vec!["scene.wld"]);
    }

    #[test]
    fn test_world_file_candidates_keep_signature() {
        assert_eq!(
            world_file_candidates("https://bucket.example/tiles/scene.tif?sig=a.b&se=2026"),
            vec![
                "https://bucket.example/tiles/scene.tfw?sig=a.b&se=2026",
                "https://bucket.example/tiles/scene.wld?sig=a.b&se=2026"
            ]
        );
        // only URLs carry a query string
        assert_eq!(
            world_file_candidates("/data/what?.png"),
            vec!["/data/what?.pgw", "/data/what?.wld"]
        );
    }

    #[test]
    fn test_alpha_band_becomes_mask() {
        let asset = rgba_asset();
        assert_eq!(asset.band_count(), 3);
        let image = asset.tile(0, 0, 1, &ReadOptions {
            tile_size: 4,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(image.bands(), 3);
        assert_eq!(image.value(0, 2, 0), Some(20.0));
        assert_eq!(image.value(2, 2, 0), Some(200.0));
        assert_eq!(image.value(0, 2, 3), None);
        assert_eq!(image.valid_count(), 12);
    }

    #[test]
    fn test_tile_upsamples_nearest() {
        let asset = rgba_asset();
        // 2/0/0 is the north west quarter of the asset
        let image = asset.tile(0, 0, 2, &ReadOptions {
            tile_size: 4,
            indexes: Some(vec![1]),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(image.bands(), 1);
        assert_eq!(image.value(0, 0, 0), Some(0.0));
        assert_eq!(image.value(0, 1, 3), Some(0.0));
        assert_eq!(image.value(0, 2, 0), Some(10.0));
        assert_eq!(image.valid_count(), 16);
    }

    #[test]
    fn test_tile_partially_covered() {
        let asset = grey_asset();
        // the asset only covers the south east quarter of the world
        let image = asset.tile(0, 0, 0, &ReadOptions {
            tile_size: 4,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(image.valid_count(), 4);
        assert_eq!(image.value(0, 0, 0), None);
        assert_eq!(image.value(0, 2, 2), Some(0.0));
        assert_eq!(image.value(0, 3, 3), Some(3.0));
    }

    #[test]
    fn test_tile_outside_bounds() {
        let asset = grey_asset();
        let result = asset.tile(0, 0, 1, &ReadOptions::default());
        assert!(matches!(result, Err(TileError::OutsideBounds(_))));
        let result = asset.tile(9, 0, 2, &ReadOptions::default());
        assert!(matches!(result, Err(TileError::OutsideBounds(_))));
    }

    #[test]
    fn test_minimum_overlap() {
        let asset = grey_asset();
        let options = ReadOptions {
            tile_size: 4,
            minimum_overlap: Some(0.5),
            ..Default::default()
        };
        match asset.tile(0, 0, 0, &options) {
            Err(TileError::OutsideBounds(message)) => {
                assert_eq!(message, "Dataset covers less than 25% of tile")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(asset.tile(1, 1, 1, &options).is_ok());
    }

    #[test]
    fn test_nodata_mask() {
        let asset = grey_asset().with_nodata(Some(0.0));
        let image = asset.tile(1, 1, 1, &ReadOptions {
            tile_size: 2,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(image.value(0, 0, 0), None);
        assert_eq!(image.value(0, 0, 1), Some(1.0));
        // the read option wins over the asset value
        let image = asset.tile(1, 1, 1, &ReadOptions {
            tile_size: 2,
            nodata: Some(3.0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(image.value(0, 0, 0), Some(0.0));
        assert_eq!(image.value(0, 1, 1), None);
    }

    #[test]
    fn test_invalid_band_index() {
        let options = ReadOptions {
            indexes: Some(vec![4]),
            ..Default::default()
        };
        assert!(matches!(
            rgba_asset().tile(0, 0, 1, &options),
            Err(TileError::InvalidBandIndex(4))
        ));
    }

    #[test]
    fn test_preview_size() {
        assert_eq!(preview_size(100, 50, 1024), (100, 50));
        assert_eq!(preview_size(2000, 1000, 1024), (1024, 512));
        assert_eq!(preview_size(1000, 3000, 1024), (342, 1024));
        let preview = rgba_asset().preview(2, &ReadOptions::default()).unwrap();
        assert_eq!((preview.width(), preview.height()), (2, 2));
        let bounds = preview.bounds.unwrap();
        approx::assert_approx!(bounds.left, -tile::EXTENT, 1.0e-6);
        approx::assert_approx!(bounds.top, tile::EXTENT, 1.0e-6);
        approx::assert_approx!(bounds.right, 0.0, 1.0e-6);
    }

    #[test]
    fn test_part_max_size() {
        let asset = rgba_asset();
        let options = ReadOptions::default();
        // the whole world is 8 x 8 asset pixels
        let image = asset
            .part_max_size(&tile::xy_bounds(0, 0, 0), 4, &options)
            .unwrap();
        assert_eq!((image.width(), image.height()), (4, 4));
        let image = asset
            .part_max_size(&tile::xy_bounds(1, 0, 0), 16, &options)
            .unwrap();
        assert_eq!((image.width(), image.height()), (4, 4));
        assert_eq!(image.value(0, 2, 0), Some(20.0));
        let upper_half = Bounds {
            left: -tile::EXTENT,
            bottom: tile::EXTENT / 2.0,
            right: 0.0,
            top: tile::EXTENT,
        };
        let image = asset.part_max_size(&upper_half, 2, &options).unwrap();
        assert_eq!((image.width(), image.height()), (2, 1));
        assert!(matches!(
            asset.part_max_size(&tile::xy_bounds(1, 1, 1), 4, &options),
            Err(TileError::OutsideBounds(_))
        ));
    }

    #[test]
    fn test_point() {
        let asset = rgba_asset();
        // north west quarter of the world, in the bottom pixel row
        let point = asset
            .point(-170.0, 1.0, &ReadOptions::default())
            .unwrap();
        assert_eq!(point.values, vec![30.0, 100.0, 200.0]);
        assert!(point.valid);
        let point = asset.point(-1.0, 80.0, &ReadOptions::default()).unwrap();
        assert!(!point.valid);
        assert!(matches!(
            asset.point(10.0, 10.0, &ReadOptions::default()),
            Err(TileError::PointOutsideBounds)
        ));
    }

    #[test]
    fn test_open_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.png");
        let image = GrayImage::from_fn(2, 2, |col, _| Luma([col as u8 * 50]));
        image.save(&path).unwrap();
        let world = WorldFile::for_bounds(&tile::xy_bounds(1, 1, 0), 2, 2);
        fs::write(dir.path().join("scene.pgw"), world.to_string()).unwrap();

        let reader = FileAssetReader::new(ReadOptions {
            tile_size: 2,
            ..Default::default()
        });
        let location = path.to_str().unwrap();
        let info = reader.open(location).unwrap().info();
        assert_eq!((info.width, info.height, info.bands), (2, 2, 1));
        assert!(!info.has_alpha);
        let image = reader.tile(location, 1, 0, 1).unwrap();
        assert_eq!(image.value(0, 0, 1), Some(50.0));
        assert!(matches!(
            reader.tile(location, 0, 0, 1),
            Err(TileError::OutsideBounds(_))
        ));
    }

    #[test]
    fn test_missing_world_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lonely.png");
        GrayImage::new(1, 1).save(&path).unwrap();
        let result = Asset::open(path.to_str().unwrap(), Duration::from_secs(1));
        assert!(matches!(result, Err(TileError::InvalidWorldFile(_))));
    }

    struct MemoryReader {
        assets: HashMap<String, Asset>,
        options: ReadOptions,
    }

    impl AssetReader for MemoryReader {
        fn open(&self, location: &str) -> Result<Asset> {
            self.assets
                .get(location)
                .cloned()
                .ok_or_else(|| TileError::OutsideBounds(format!("no asset {}", location)))
        }

        fn options(&self) -> &ReadOptions {
            &self.options
        }
    }

    #[test]
    fn test_reader_trait_feeds_mosaic() {
        let reader = MemoryReader {
            assets: HashMap::from([
                ("rgba".to_string(), rgba_asset()),
                ("grey".to_string(), grey_asset()),
            ]),
            options: ReadOptions {
                tile_size: 4,
                indexes: Some(vec![1]),
                ..Default::default()
            },
        };
        let image = crate::mosaic::mosaic_reader(
            &["grey", "rgba"],
            |asset: &str, x: u32, y: u32, z: u8| reader.tile(asset, x, y, z),
            0,
            0,
            1,
            crate::mosaic::PixelSelectionMethod::First,
            &crate::mosaic::MosaicOptions::new(2),
        )
        .unwrap();
        assert_eq!(image.assets, vec!["rgba"]);
        assert_eq!(image.valid_count(), 12);
    }
}
