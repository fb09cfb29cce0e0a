use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mosaictile::mosaic::{self, MosaicOptions, PixelSelectionMethod};
use mosaictile::reader::{Asset, AssetReader, FileAssetReader, ReadOptions, WorldFile};
use mosaictile::tile::{self, TileMatrixSet};
use mosaictile::{render, stac};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Parser, Debug)]
#[command(version, about, long_about=None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tile containing a longitude/latitude
    ToTile(ToTileArgs),
    /// Geographic extent of a tile
    ToGeo(ToGeoArgs),
    /// Composite a tile from several assets into a PNG
    Mosaic(MosaicArgs),
    /// Band values of an asset at a longitude/latitude
    Point(PointArgs),
    /// Downsampled PNG of a whole asset
    Preview(PreviewArgs),
    /// Bounds, size and bands of an asset
    Info(InfoArgs),
    /// Search a STAC API and print asset hrefs
    Search(SearchArgs),
}

#[derive(Args, Debug)]
struct ToTileArgs {
    zoom: u8,
    longitude: f64,
    latitude: f64,
}

#[derive(Args, Debug)]
struct ToGeoArgs {
    zoom: u8,
    x: u32,
    y: u32,
}

#[derive(Args, Debug)]
struct MosaicArgs {
    zoom: u8,
    x: u32,
    y: u32,
    output: PathBuf,
    #[arg(required = true)]
    assets: Vec<String>,
    #[arg(long, default_value = "first")]
    method: String,
    #[arg(long, default_value_t = 4)]
    threads: usize,
    #[arg(long, default_value_t = 256)]
    tile_size: usize,
    /// Comma separated 1 based band indexes
    #[arg(long, value_delimiter = ',')]
    indexes: Option<Vec<usize>>,
    #[arg(long)]
    nodata: Option<f64>,
    /// Value range mapped to 0-255, as MIN,MAX
    #[arg(long, value_delimiter = ',', num_args = 2)]
    rescale: Option<Vec<f64>>,
}

#[derive(Args, Debug)]
struct PointArgs {
    asset: String,
    longitude: f64,
    latitude: f64,
    #[arg(long)]
    nodata: Option<f64>,
}

#[derive(Args, Debug)]
struct PreviewArgs {
    asset: String,
    output: PathBuf,
    #[arg(long, default_value_t = 1024)]
    max_size: usize,
    #[arg(long, value_delimiter = ',', num_args = 2)]
    rescale: Option<Vec<f64>>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    asset: String,
}

#[derive(Args, Debug)]
struct SearchArgs {
    #[arg(long, default_value = stac::EARTH_SEARCH_URL)]
    endpoint: String,
    #[arg(long, default_value = "sentinel-2-l2a")]
    collection: String,
    /// Search the last DAYS days
    #[arg(long, default_value_t = 30)]
    days: u32,
    #[arg(long, default_value_t = 20.0)]
    max_cloud: f64,
    /// WEST,SOUTH,EAST,NORTH in degrees
    #[arg(long, value_delimiter = ',', num_args = 4, allow_hyphen_values = true)]
    bbox: Vec<f64>,
    #[arg(long, default_value_t = 10)]
    limit: u32,
    #[arg(long, default_value = "visual")]
    asset_key: String,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::ToTile(args) => to_tile(&args)?,
        Commands::ToGeo(args) => to_geo(&args)?,
        Commands::Mosaic(args) => build_mosaic(&args)?,
        Commands::Point(args) => point(&args)?,
        Commands::Preview(args) => preview(&args)?,
        Commands::Info(args) => {
            let asset = FileAssetReader::new(ReadOptions::default()).open(&args.asset)?;
            println!("{}", serde_json::to_string_pretty(&asset.info())?);
        }
        Commands::Search(args) => search(&args)?,
    }
    Ok(())
}

fn to_tile(args: &ToTileArgs) -> Result<()> {
    if args.zoom > tile::MAX_ZOOM {
        anyhow::bail!("zoom must be at most {}", tile::MAX_ZOOM);
    }
    let point = tile::GeoPoint {
        longitude: args.longitude,
        latitude: args.latitude,
    };
    println!("input point:          {:?}", point);
    let square = tile::geodetic_to_square(&point);
    println!("point on unit square: {:?}", square);
    let tile_point = tile::square_to_tile(args.zoom, &square);
    println!("tile at zoom {}:      {:?}", args.zoom, tile_point);
    Ok(())
}

fn to_geo(args: &ToGeoArgs) -> Result<()> {
    if !TileMatrixSet::WebMercatorQuad.is_valid(args.zoom, args.x, args.y) {
        anyhow::bail!("no tile {}/{}/{}", args.zoom, args.x, args.y);
    }
    let square = tile::tile_to_square(args.zoom, args.x as f64 + 0.5, args.y as f64 + 0.5);
    println!("tile center on unit square: {:?}", square);
    let point = tile::square_to_geodetic(&square);
    println!("tile geodetic center:       {:?}", point);
    let corners = tile::tile_corners(args.zoom, args.x, args.y);
    println!("tile north west corner:     {:?}", corners.north_west);
    println!("tile north east corner:     {:?}", corners.north_east);
    println!("tile south west corner:     {:?}", corners.south_west);
    println!("tile south east corner:     {:?}", corners.south_east);
    println!(
        "tile web mercator bounds:   {:?}",
        tile::xy_bounds(args.zoom, args.x, args.y)
    );
    Ok(())
}

fn rescale_range(rescale: &Option<Vec<f64>>) -> Option<(f64, f64)> {
    match rescale.as_deref() {
        Some([min, max]) => Some((*min, *max)),
        _ => None,
    }
}

/// Write a PNG together with a `.pgw` world file so it can be read back.
fn write_georeferenced(output: &Path, image: &mosaictile::ImageData, png: &[u8]) -> Result<()> {
    fs::write(output, png).with_context(|| format!("writing {}", output.display()))?;
    if let Some(bounds) = &image.bounds {
        let world = WorldFile::for_bounds(bounds, image.width(), image.height());
        fs::write(output.with_extension("pgw"), world.to_string())?;
    }
    Ok(())
}

fn build_mosaic(args: &MosaicArgs) -> Result<()> {
    let method: PixelSelectionMethod = args.method.parse()?;
    let reader = FileAssetReader::new(ReadOptions {
        indexes: args.indexes.clone(),
        nodata: args.nodata,
        tile_size: args.tile_size,
        minimum_overlap: None,
    })
    .with_timeout(Duration::from_secs(60));
    let image = mosaic::mosaic_reader(
        &args.assets,
        |asset: &str, x: u32, y: u32, z: u8| reader.tile(asset, x, y, z),
        args.x,
        args.y,
        args.zoom,
        method,
        &MosaicOptions::new(args.threads),
    )?;
    println!("assets used: {:?}", image.assets);
    println!(
        "valid pixels: {} of {}",
        image.valid_count(),
        image.width() * image.height()
    );
    let png = render::to_png(&image, rescale_range(&args.rescale))?;
    write_georeferenced(&args.output, &image, &png)
}

fn point(args: &PointArgs) -> Result<()> {
    let asset = FileAssetReader::new(ReadOptions::default()).open(&args.asset)?;
    let options = ReadOptions {
        nodata: args.nodata,
        ..Default::default()
    };
    let values = asset.point(args.longitude, args.latitude, &options)?;
    println!("{}", serde_json::to_string(&values)?);
    Ok(())
}

fn preview(args: &PreviewArgs) -> Result<()> {
    let asset = Asset::open(&args.asset, Duration::from_secs(60))?;
    let image = asset.preview(args.max_size, &ReadOptions::default())?;
    let png = render::to_png(&image, rescale_range(&args.rescale))?;
    write_georeferenced(&args.output, &image, &png)
}

fn search(args: &SearchArgs) -> Result<()> {
    let &[west, south, east, north] = args.bbox.as_slice() else {
        anyhow::bail!("--bbox expects WEST,SOUTH,EAST,NORTH");
    };
    let end = OffsetDateTime::now_utc();
    let start = end - Duration::from_secs(3600 * 24 * args.days as u64);
    let request = stac::SearchRequest::new([args.collection.as_str()])
        .datetime(start, end)?
        .max_cloud_cover(args.max_cloud)
        .intersects(stac::bbox_polygon(west, south, east, north))
        .limit(args.limit)
        .fields(
            ["id", "properties.datetime", "properties.eo:cloud_cover", "assets"],
            ["links"],
        );
    let collection = stac::search(&args.endpoint, &request)?;
    for item in &collection.features {
        log::info!(
            "{} {} cloud cover {:?}",
            item.id,
            item.properties.datetime.as_deref().unwrap_or("-"),
            item.properties.cloud_cover
        );
    }
    for href in collection.hrefs(&args.asset_key) {
        println!("{}", href);
    }
    Ok(())
}
