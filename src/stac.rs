//! Minimal STAC API item search.
//!
//! Builds the JSON body of a `POST /search`, sends it and parses the
//! returned GeoJSON feature collection. Only what is needed to pick assets
//! for a mosaic is modelled, any other item property is kept as raw JSON.

use crate::error::Result;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const EARTH_SEARCH_URL: &str = "https://earth-search.aws.element84.com/v1/search";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Fields {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchRequest {
    pub collections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intersects: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Fields>,
}

impl SearchRequest {
    pub fn new<T: Into<String>>(collections: impl IntoIterator<Item = T>) -> Self {
        SearchRequest {
            collections: collections.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Closed `start/end` interval, both ends in UTC.
    pub fn datetime(mut self, start: OffsetDateTime, end: OffsetDateTime) -> Result<Self> {
        self.datetime = Some(format!(
            "{}/{}",
            start.format(&Rfc3339)?,
            end.format(&Rfc3339)?
        ));
        Ok(self)
    }

    /// Keep items with less than `percent` cloud cover.
    pub fn max_cloud_cover(mut self, percent: f64) -> Self {
        self.query = Some(json!({ "eo:cloud_cover": { "lt": percent } }));
        self
    }

    pub fn intersects(mut self, geometry: Value) -> Self {
        self.intersects = Some(geometry);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn fields<T: Into<String>>(
        mut self,
        include: impl IntoIterator<Item = T>,
        exclude: impl IntoIterator<Item = T>,
    ) -> Self {
        self.fields = Some(Fields {
            include: include.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
        });
        self
    }
}

/// GeoJSON polygon for a west/south/east/north box in degrees.
pub fn bbox_polygon(west: f64, south: f64, east: f64, north: f64) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[
            [west, south],
            [east, south],
            [east, north],
            [west, north],
            [west, south]
        ]]
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub features: Vec<Item>,
    #[serde(default)]
    pub links: Vec<Value>,
}

impl FeatureCollection {
    /// Hrefs of the `key` asset of every item, in feature order.
    pub fn hrefs(&self, key: &str) -> Vec<String> {
        self.features
            .iter()
            .filter_map(|item| item.assets.get(key))
            .map(|asset| asset.href.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub geometry: Option<Value>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub assets: BTreeMap<String, ItemAsset>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Properties {
    pub datetime: Option<String>,
    #[serde(rename = "eo:cloud_cover")]
    pub cloud_cover: Option<f64>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemAsset {
    pub href: String,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

pub fn search(endpoint: &str, request: &SearchRequest) -> Result<FeatureCollection> {
    log::debug!(
        "stac search {} with {}",
        endpoint,
        serde_json::to_string(request)?
    );
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;
    let response = client
        .post(endpoint)
        .header(ACCEPT, "application/geo+json")
        .json(request)
        .send()?;
    log::debug!("response status {:?}", response.status());
    log::debug!("response headers {:?}", response.headers());
    let collection = response.error_for_status()?.json::<FeatureCollection>()?;
    log::info!(
        "stac search returned {} items",
        collection.features.len()
    );
    Ok(collection)
}
