#[macro_use]
extern crate rocket;
use mosaictile::config::{TileConfig, ENV_PREFIX};
use mosaictile::mosaic::{self, MosaicOptions};
use mosaictile::reader::{AssetReader, FileAssetReader};
use mosaictile::render;
use mosaictile::tile::TileMatrixSet;
use rocket::fairing::{AdHoc, Fairing, Info, Kind};
use rocket::figment::providers::Env;
use rocket::figment::Figment;
use rocket::http::{ContentType, Header, Status};
use rocket::serde::json::{json, Value};
use rocket::{Build, Request, Response, Rocket, State};

#[launch]
fn rocket() -> _ {
    let figment = rocket::Config::figment().merge(Env::prefixed(ENV_PREFIX).global());
    app(figment)
}

fn app(figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .attach(NoCacheAnyOrigin)
        .attach(AdHoc::config::<TileConfig>())
        .attach(AdHoc::try_on_ignite("Fetch pool", |rocket| async move {
            let Some(config) = rocket.state::<TileConfig>() else {
                return Err(rocket);
            };
            match config.mosaic_options().with_shared_pool() {
                Ok(options) => Ok(rocket.manage(options)),
                Err(error) => {
                    log::error!("failed to build fetch pool: {}", error);
                    Err(rocket)
                }
            }
        }))
        .mount("/", routes![index, tiles])
}

struct NoCacheAnyOrigin;

#[rocket::async_trait]
impl Fairing for NoCacheAnyOrigin {
    fn info(&self) -> Info {
        Info {
            name: "Allow all origins, disable caching",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.remove_header("X-Frame-Options");
        response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        response.set_header(Header::new("Access-Control-Allow-Methods", "GET"));
        response.set_header(Header::new(
            "Cache-Control",
            "no-cache, no-store, must-revalidate",
        ));
        response.set_header(Header::new("Pragma", "no-cache"));
        response.set_header(Header::new("Expires", "0"));
    }
}

#[get("/")]
fn index(config: &State<TileConfig>) -> Value {
    json!({
        "assets": config.assets.len(),
        "pixel_selection": config.pixel_selection.name(),
        "tiles": format!("/tiles/{}/{{z}}/{{x}}/{{y}}.png", TileMatrixSet::WebMercatorQuad),
    })
}

#[get("/tiles/<tms>/<zoom>/<x>/<y_with_extension>")]
async fn tiles(
    config: &State<TileConfig>,
    options: &State<MosaicOptions>,
    tms: &str,
    zoom: u8,
    x: u32,
    y_with_extension: &str,
) -> Result<(ContentType, Vec<u8>), Status> {
    let tms: TileMatrixSet = tms.parse().map_err(|_| Status::NotFound)?;
    let y = y_with_extension
        .strip_suffix(".png")
        .unwrap_or(y_with_extension)
        .parse::<u32>()
        .map_err(|_| Status::BadRequest)?;
    if !tms.is_valid(zoom, x, y) {
        return Err(Status::NotFound);
    }
    log::info!("generating mosaic tile {} {} {} {}", tms, zoom, x, y);
    let config = config.inner().clone();
    let options = options.inner().clone();
    let rendered =
        tokio::task::spawn_blocking(move || render_tile(&config, &options, zoom, x, y))
            .await
            .map_err(|error| {
                log::error!("tile worker failed: {}", error);
                Status::InternalServerError
            })?;
    match rendered {
        Ok(png) => Ok((ContentType::PNG, png)),
        Err(error) if error.is_outside_bounds() => {
            log::debug!("no data for {}/{}/{}: {}", zoom, x, y, error);
            Err(Status::NotFound)
        }
        Err(error) => {
            log::error!("failed to render {}/{}/{}: {}", zoom, x, y, error);
            Err(Status::InternalServerError)
        }
    }
}

fn render_tile(
    config: &TileConfig,
    options: &MosaicOptions,
    zoom: u8,
    x: u32,
    y: u32,
) -> mosaictile::Result<Vec<u8>> {
    let reader = FileAssetReader::new(config.read_options());
    let image = mosaic::mosaic_reader(
        &config.assets,
        |asset: &str, x: u32, y: u32, z: u8| reader.tile(asset, x, y, z),
        x,
        y,
        zoom,
        config.pixel_selection,
        options,
    )?;
    log::debug!("tile {}/{}/{} built from {:?}", zoom, x, y, image.assets);
    render::to_png(&image, config.rescale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use mosaictile::reader::WorldFile;
    use mosaictile::tile;
    use rocket::local::blocking::Client;
    use std::fs;
    use std::path::Path;

    /// A grey asset covering web mercator tile 1/0/0.
    fn write_asset(dir: &Path) -> String {
        let path = dir.join("north_west.png");
        GrayImage::from_fn(8, 8, |col, row| Luma([(row * 8 + col) as u8]))
            .save(&path)
            .unwrap();
        let world = WorldFile::for_bounds(&tile::xy_bounds(1, 0, 0), 8, 8);
        fs::write(dir.join("north_west.pgw"), world.to_string()).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn client(assets: Vec<String>) -> Client {
        client_with_threads(assets, 1)
    }

    fn client_with_threads(assets: Vec<String>, threads: usize) -> Client {
        let figment = rocket::Config::figment()
            .merge(("assets", assets))
            .merge(("threads", threads))
            .merge(("tile_size", 16));
        Client::tracked(app(figment)).unwrap()
    }

    #[test]
    fn test_tile_inside_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(vec![write_asset(dir.path())]);
        let response = client.get("/tiles/WebMercatorQuad/1/0/0.png").dispatch();
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.content_type(), Some(ContentType::PNG));
        let headers = response.headers();
        assert_eq!(headers.get_one("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(
            headers.get_one("Cache-Control"),
            Some("no-cache, no-store, must-revalidate")
        );
        let png = response.into_bytes().unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }

    #[test]
    fn test_tile_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(vec![write_asset(dir.path())]);
        let response = client.get("/tiles/WebMercatorQuad/2/1/1").dispatch();
        assert_eq!(response.status(), Status::Ok);
    }

    #[test]
    fn test_tile_outside_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(vec![write_asset(dir.path())]);
        let response = client.get("/tiles/WebMercatorQuad/1/1/1.png").dispatch();
        assert_eq!(response.status(), Status::NotFound);
        // headers are added to error responses too
        assert_eq!(
            response.headers().get_one("Access-Control-Allow-Origin"),
            Some("*")
        );
        let response = client.get("/tiles/WebMercatorQuad/1/5/0.png").dispatch();
        assert_eq!(response.status(), Status::NotFound);
    }

    #[test]
    fn test_unknown_tms_and_bad_y() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(vec![write_asset(dir.path())]);
        let response = client.get("/tiles/WorldCRS84Quad/1/0/0.png").dispatch();
        assert_eq!(response.status(), Status::NotFound);
        let response = client.get("/tiles/WebMercatorQuad/1/0/north.png").dispatch();
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[test]
    fn test_broken_asset_only_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.png").to_str().unwrap().to_string();
        let client = client(vec![missing]);
        let response = client.get("/tiles/WebMercatorQuad/1/0/0.png").dispatch();
        assert_eq!(response.status(), Status::NotFound);
    }

    #[test]
    fn test_fetch_pool_is_managed() {
        let dir = tempfile::tempdir().unwrap();
        let client = client_with_threads(vec![write_asset(dir.path())], 3);
        let options = client.rocket().state::<MosaicOptions>().unwrap();
        let pool = options.pool.clone().unwrap();
        assert_eq!(pool.current_num_threads(), 3);
        for path in ["/tiles/WebMercatorQuad/1/0/0.png", "/tiles/WebMercatorQuad/2/1/1.png"] {
            assert_eq!(client.get(path).dispatch().status(), Status::Ok);
        }
        let options = client.rocket().state::<MosaicOptions>().unwrap();
        assert!(std::sync::Arc::ptr_eq(&pool, options.pool.as_ref().unwrap()));
    }

    #[test]
    fn test_index() {
        let client = client(vec!["a.png".into(), "b.png".into()]);
        let response = client.get("/").dispatch();
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().unwrap();
        assert_eq!(body["assets"], 2);
        assert_eq!(body["pixel_selection"], "first");
    }
}
