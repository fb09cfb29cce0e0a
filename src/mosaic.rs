//! Compose one output tile from several overlapping assets.
//!
//! The driver fetches tiles asset by asset and hands every tile holding at
//! least one valid pixel to a [`PixelSelection`], which owns the per pixel
//! merge rule. Fetching may run on a thread pool, but tiles are always fed in
//! the order the assets were given, so order sensitive methods such as
//! [`First`] stay deterministic.

use crate::error::{Result, TileError};
use crate::imagedata::ImageData;
use crate::tile;
use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::str::FromStr;

/// Accumulation state of one mosaic build.
pub trait PixelSelection: Send {
    /// Merge a freshly fetched tile into the accumulated state. Returns
    /// whether the tile changed at least one output pixel.
    fn feed(&mut self, tile: &ImageData) -> bool;

    /// When true the driver stops fetching further assets.
    fn is_done(&self) -> bool {
        false
    }

    /// Final `(data, mask)`, `None` if nothing was fed.
    fn data(&self) -> Option<(Array3<f64>, Array2<bool>)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelSelectionMethod {
    #[default]
    First,
    Highest,
    Lowest,
    Mean,
    Median,
    Stdev,
    LastBandHigh,
    LastBandLow,
    Count,
}

impl PixelSelectionMethod {
    pub const ALL: [PixelSelectionMethod; 9] = [
        PixelSelectionMethod::First,
        PixelSelectionMethod::Highest,
        PixelSelectionMethod::Lowest,
        PixelSelectionMethod::Mean,
        PixelSelectionMethod::Median,
        PixelSelectionMethod::Stdev,
        PixelSelectionMethod::LastBandHigh,
        PixelSelectionMethod::LastBandLow,
        PixelSelectionMethod::Count,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PixelSelectionMethod::First => "first",
            PixelSelectionMethod::Highest => "highest",
            PixelSelectionMethod::Lowest => "lowest",
            PixelSelectionMethod::Mean => "mean",
            PixelSelectionMethod::Median => "median",
            PixelSelectionMethod::Stdev => "stdev",
            PixelSelectionMethod::LastBandHigh => "lastbandhigh",
            PixelSelectionMethod::LastBandLow => "lastbandlow",
            PixelSelectionMethod::Count => "count",
        }
    }

    /// A fresh, empty accumulator for this method.
    pub fn selection(&self) -> Box<dyn PixelSelection> {
        match self {
            PixelSelectionMethod::First => Box::new(First::default()),
            PixelSelectionMethod::Highest => Box::new(Extreme::highest()),
            PixelSelectionMethod::Lowest => Box::new(Extreme::lowest()),
            PixelSelectionMethod::Mean => Box::new(Mean::default()),
            PixelSelectionMethod::Median => Box::new(Median::default()),
            PixelSelectionMethod::Stdev => Box::new(Stdev::default()),
            PixelSelectionMethod::LastBandHigh => Box::new(LastBand::high()),
            PixelSelectionMethod::LastBandLow => Box::new(LastBand::low()),
            PixelSelectionMethod::Count => Box::new(Count::default()),
        }
    }
}

impl fmt::Display for PixelSelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelSelectionMethod {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.to_ascii_lowercase();
        PixelSelectionMethod::ALL
            .into_iter()
            .find(|method| method.name() == wanted)
            .ok_or_else(|| TileError::UnknownPixelSelection(s.to_string()))
    }
}

/// Keep the first valid value seen for every pixel.
#[derive(Debug, Default)]
pub struct First {
    state: Option<(Array3<f64>, Array2<bool>)>,
}

impl PixelSelection for First {
    fn feed(&mut self, tile: &ImageData) -> bool {
        let Some((data, mask)) = &mut self.state else {
            self.state = Some((tile.data.clone(), tile.mask.clone()));
            return tile.has_valid();
        };
        let mut changed = false;
        for ((row, col), valid) in mask.indexed_iter_mut() {
            if !*valid && tile.mask[[row, col]] {
                *valid = true;
                changed = true;
                for band in 0..data.dim().0 {
                    data[[band, row, col]] = tile.data[[band, row, col]];
                }
            }
        }
        changed
    }

    fn is_done(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|(_, mask)| mask.iter().all(|valid| *valid))
    }

    fn data(&self) -> Option<(Array3<f64>, Array2<bool>)> {
        self.state.clone()
    }
}

/// Per band maximum or minimum over valid contributions.
#[derive(Debug)]
pub struct Extreme {
    higher: bool,
    state: Option<(Array3<f64>, Array2<bool>)>,
}

impl Extreme {
    pub fn highest() -> Self {
        Extreme {
            higher: true,
            state: None,
        }
    }

    pub fn lowest() -> Self {
        Extreme {
            higher: false,
            state: None,
        }
    }
}

impl PixelSelection for Extreme {
    fn feed(&mut self, tile: &ImageData) -> bool {
        let Some((data, mask)) = &mut self.state else {
            self.state = Some((tile.data.clone(), tile.mask.clone()));
            return tile.has_valid();
        };
        let mut changed = false;
        for ((row, col), valid) in mask.indexed_iter_mut() {
            if !tile.mask[[row, col]] {
                continue;
            }
            for band in 0..data.dim().0 {
                let new = tile.data[[band, row, col]];
                let current = data[[band, row, col]];
                let better = if self.higher {
                    new > current
                } else {
                    new < current
                };
                if !*valid || better {
                    data[[band, row, col]] = new;
                    changed = true;
                }
            }
            *valid = true;
        }
        changed
    }

    fn data(&self) -> Option<(Array3<f64>, Array2<bool>)> {
        self.state.clone()
    }
}

/// Running per pixel sums shared by the statistical methods.
#[derive(Debug)]
struct Sums {
    sum: Array3<f64>,
    sum_squares: Array3<f64>,
    count: Array2<u32>,
}

impl Sums {
    fn empty(dim: (usize, usize, usize)) -> Self {
        let (_, height, width) = dim;
        Sums {
            sum: Array3::zeros(dim),
            sum_squares: Array3::zeros(dim),
            count: Array2::zeros((height, width)),
        }
    }

    fn add(&mut self, tile: &ImageData) -> bool {
        let mut changed = false;
        for ((row, col), count) in self.count.indexed_iter_mut() {
            if !tile.mask[[row, col]] {
                continue;
            }
            *count += 1;
            changed = true;
            for band in 0..self.sum.dim().0 {
                let value = tile.data[[band, row, col]];
                self.sum[[band, row, col]] += value;
                self.sum_squares[[band, row, col]] += value * value;
            }
        }
        changed
    }

    fn mask(&self) -> Array2<bool> {
        self.count.mapv(|count| count > 0)
    }

    fn mean(&self) -> Array3<f64> {
        Array3::from_shape_fn(self.sum.dim(), |(band, row, col)| {
            match self.count[[row, col]] {
                0 => 0.0,
                count => self.sum[[band, row, col]] / count as f64,
            }
        })
    }

    fn stdev(&self) -> Array3<f64> {
        Array3::from_shape_fn(self.sum.dim(), |(band, row, col)| {
            match self.count[[row, col]] {
                0 => 0.0,
                count => {
                    let n = count as f64;
                    let mean = self.sum[[band, row, col]] / n;
                    // rounding can push the variance slightly below zero
                    (self.sum_squares[[band, row, col]] / n - mean * mean)
                        .max(0.0)
                        .sqrt()
                }
            }
        })
    }
}

#[derive(Debug, Default)]
pub struct Mean {
    sums: Option<Sums>,
}

impl PixelSelection for Mean {
    fn feed(&mut self, tile: &ImageData) -> bool {
        self.sums
            .get_or_insert_with(|| Sums::empty(tile.data.dim()))
            .add(tile)
    }

    fn data(&self) -> Option<(Array3<f64>, Array2<bool>)> {
        let sums = self.sums.as_ref()?;
        Some((sums.mean(), sums.mask()))
    }
}

/// Population standard deviation of the valid contributions.
#[derive(Debug, Default)]
pub struct Stdev {
    sums: Option<Sums>,
}

impl PixelSelection for Stdev {
    fn feed(&mut self, tile: &ImageData) -> bool {
        self.sums
            .get_or_insert_with(|| Sums::empty(tile.data.dim()))
            .add(tile)
    }

    fn data(&self) -> Option<(Array3<f64>, Array2<bool>)> {
        let sums = self.sums.as_ref()?;
        Some((sums.stdev(), sums.mask()))
    }
}

/// Number of valid contributions per pixel, as a single band.
#[derive(Debug, Default)]
pub struct Count {
    count: Option<Array2<u32>>,
}

impl PixelSelection for Count {
    fn feed(&mut self, tile: &ImageData) -> bool {
        let count = self
            .count
            .get_or_insert_with(|| Array2::zeros(tile.mask.dim()));
        ndarray::Zip::from(count)
            .and(&tile.mask)
            .for_each(|count, valid| {
                if *valid {
                    *count += 1;
                }
            });
        tile.has_valid()
    }

    fn data(&self) -> Option<(Array3<f64>, Array2<bool>)> {
        let count = self.count.as_ref()?;
        let data = count.mapv(f64::from).insert_axis(Axis(0));
        Some((data, Array2::from_elem(count.dim(), true)))
    }
}

/// Keeps every fed tile and takes the per pixel median at the end.
#[derive(Debug, Default)]
pub struct Median {
    stack: Vec<(Array3<f64>, Array2<bool>)>,
}

impl PixelSelection for Median {
    fn feed(&mut self, tile: &ImageData) -> bool {
        if !tile.has_valid() {
            return false;
        }
        self.stack.push((tile.data.clone(), tile.mask.clone()));
        true
    }

    fn data(&self) -> Option<(Array3<f64>, Array2<bool>)> {
        let (first, first_mask) = self.stack.first()?;
        let mask = Array2::from_shape_fn(first_mask.dim(), |(row, col)| {
            self.stack.iter().any(|(_, mask)| mask[[row, col]])
        });
        let mut values = Vec::with_capacity(self.stack.len());
        let data = Array3::from_shape_fn(first.dim(), |(band, row, col)| {
            values.clear();
            values.extend(
                self.stack
                    .iter()
                    .filter(|(_, mask)| mask[[row, col]])
                    .map(|(data, _)| data[[band, row, col]]),
            );
            median(&mut values).unwrap_or(0.0)
        });
        Some((data, mask))
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let middle = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[middle - 1] + values[middle]) / 2.0)
    } else {
        Some(values[middle])
    }
}

/// Uses the last band as a ranking index, e.g. NDVI appended to RGB, and
/// keeps all bands of whichever asset ranks best at each pixel. The ranking
/// band is dropped from the output when there is more than one band.
#[derive(Debug)]
pub struct LastBand {
    higher: bool,
    state: Option<(Array3<f64>, Array2<bool>)>,
}

impl LastBand {
    pub fn high() -> Self {
        LastBand {
            higher: true,
            state: None,
        }
    }

    pub fn low() -> Self {
        LastBand {
            higher: false,
            state: None,
        }
    }
}

impl PixelSelection for LastBand {
    fn feed(&mut self, tile: &ImageData) -> bool {
        let Some((data, mask)) = &mut self.state else {
            self.state = Some((tile.data.clone(), tile.mask.clone()));
            return tile.has_valid();
        };
        let bands = data.dim().0;
        let Some(rank) = bands.checked_sub(1) else {
            return false;
        };
        let mut changed = false;
        for ((row, col), valid) in mask.indexed_iter_mut() {
            if !tile.mask[[row, col]] {
                continue;
            }
            let new = tile.data[[rank, row, col]];
            let current = data[[rank, row, col]];
            let better = if self.higher {
                new > current
            } else {
                new < current
            };
            if !*valid || better {
                for band in 0..bands {
                    data[[band, row, col]] = tile.data[[band, row, col]];
                }
                *valid = true;
                changed = true;
            }
        }
        changed
    }

    fn data(&self) -> Option<(Array3<f64>, Array2<bool>)> {
        let (data, mask) = self.state.as_ref()?;
        let bands = data.dim().0;
        if bands > 1 {
            let kept = data.slice(ndarray::s![..bands - 1, .., ..]).to_owned();
            Some((kept, mask.clone()))
        } else {
            Some((data.clone(), mask.clone()))
        }
    }
}

#[derive(Debug, Clone)]
pub struct MosaicOptions {
    /// Size of the fetch pool; 0 or 1 fetches sequentially.
    pub threads: usize,
    /// Pool shared between mosaic calls. When absent a pool is built for
    /// each call that needs one.
    pub pool: Option<Arc<rayon::ThreadPool>>,
}

impl MosaicOptions {
    pub fn new(threads: usize) -> Self {
        MosaicOptions {
            threads,
            pool: None,
        }
    }

    /// Build the fetch pool now so every later call reuses it.
    pub fn with_shared_pool(mut self) -> Result<Self> {
        if self.threads > 1 && self.pool.is_none() {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.threads)
                .build()?;
            self.pool = Some(Arc::new(pool));
        }
        Ok(self)
    }
}

impl Default for MosaicOptions {
    fn default() -> Self {
        MosaicOptions::new(4)
    }
}

/// Build the `z/x/y` web mercator tile from `assets` with a named method.
pub fn mosaic_reader<S, F>(
    assets: &[S],
    reader: F,
    x: u32,
    y: u32,
    z: u8,
    method: PixelSelectionMethod,
    options: &MosaicOptions,
) -> Result<ImageData>
where
    S: AsRef<str> + Sync,
    F: Fn(&str, u32, u32, u8) -> Result<ImageData> + Sync,
{
    let mut selection = method.selection();
    mosaic_with(assets, reader, x, y, z, selection.as_mut(), options)
}

/// Build a tile with a caller supplied accumulator.
pub fn mosaic_with<S, F>(
    assets: &[S],
    reader: F,
    x: u32,
    y: u32,
    z: u8,
    selection: &mut dyn PixelSelection,
    options: &MosaicOptions,
) -> Result<ImageData>
where
    S: AsRef<str> + Sync,
    F: Fn(&str, u32, u32, u8) -> Result<ImageData> + Sync,
{
    if !tile::TileMatrixSet::WebMercatorQuad.is_valid(z, x, y) {
        return Err(TileError::OutsideBounds(format!(
            "tile {}/{}/{} does not exist",
            z, x, y
        )));
    }
    let pool = match (&options.pool, options.threads > 1) {
        (_, false) => None,
        (Some(shared), true) => Some(Arc::clone(shared)),
        (None, true) => Some(Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(options.threads)
                .build()?,
        )),
    };
    let chunk_size = options.threads.max(1);

    let mut used = Vec::new();
    let mut shape = None;
    'chunks: for chunk in assets.chunks(chunk_size) {
        let fetch = |asset: &S| reader(asset.as_ref(), x, y, z);
        let fetched: Vec<Result<ImageData>> = match &pool {
            Some(pool) => pool.install(|| chunk.par_iter().map(fetch).collect()),
            None => chunk.iter().map(fetch).collect(),
        };

        for (asset, result) in chunk.iter().zip(fetched) {
            let asset = asset.as_ref();
            let tile = match result {
                Ok(tile) => tile,
                Err(error) if error.is_outside_bounds() => {
                    log::debug!("skipping {}: {}", asset, error);
                    continue;
                }
                Err(error) => {
                    log::warn!("failed to read {} {}/{}/{}: {}", asset, z, x, y, error);
                    continue;
                }
            };
            if !tile.has_valid() {
                log::debug!("skipping {}: no valid pixels", asset);
                continue;
            }
            let found = tile.data.dim();
            match shape {
                None => shape = Some(found),
                Some(expected) if expected != found => {
                    log::warn!(
                        "skipping {}: {}",
                        asset,
                        TileError::ShapeMismatch { expected, found }
                    );
                    continue;
                }
                Some(_) => {}
            }
            if selection.feed(&tile) {
                used.push(asset.to_string());
            } else {
                log::debug!("{} added nothing to the mosaic", asset);
            }
            if selection.is_done() {
                log::debug!("mosaic filled after {} assets", used.len());
                break 'chunks;
            }
        }
    }

    if used.is_empty() {
        return Err(TileError::EmptyMosaic);
    }
    let (data, mask) = selection.data().ok_or(TileError::EmptyMosaic)?;
    Ok(ImageData::new(data, mask)?
        .with_bounds(tile::xy_bounds(z, x, y))
        .with_assets(used))
}
