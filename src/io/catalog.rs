//! STAC catalog client for Sentinel-2 scene discovery.
//!
//! Thin blocking client for STAC Item Search (`POST /search`). The client
//! performs a single query per call and maps every transport failure to
//! [`WqError::CatalogUnavailable`]; escalation (narrowed windows, retries)
//! is the caller's responsibility.

use crate::types::{BoundingBox, DateInterval, SceneRecord, WqError, WqResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default Earth Search (Element 84) STAC endpoint.
pub const DEFAULT_STAC_ENDPOINT: &str = "https://earth-search.aws.element84.com/v1";

/// Default imagery collection.
pub const DEFAULT_COLLECTION: &str = "sentinel-2-l2a";

/// Explicit catalog configuration passed at construction.
///
/// There is deliberately no ambient or shared client; every component that
/// talks to a catalog owns its configuration.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// STAC API root URL (without trailing `/search`)
    pub endpoint: String,
    /// Collection identifier to search
    pub collection: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_STAC_ENDPOINT.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl CatalogConfig {
    pub fn search_url(&self) -> String {
        format!("{}/search", self.endpoint.trim_end_matches('/'))
    }
}

// ---------------------------------------------------------------------------
// STAC wire models (the subset this crate needs)
// ---------------------------------------------------------------------------

/// Body for `POST /search` (STAC API - Item Search).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacSearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// A STAC Item Collection (GeoJSON FeatureCollection).
#[derive(Debug, Clone, Deserialize)]
pub struct StacItemCollection {
    #[serde(default)]
    pub features: Vec<StacItem>,

    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl StacItemCollection {
    pub fn next_link(&self) -> Option<&StacLink> {
        self.links.iter().find(|l| l.rel == "next")
    }
}

/// A single STAC Item (GeoJSON Feature).
#[derive(Debug, Clone, Deserialize)]
pub struct StacItem {
    pub id: String,
    pub properties: StacItemProperties,
    #[serde(default)]
    pub assets: HashMap<String, StacAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StacItemProperties {
    /// Acquisition timestamp, RFC 3339
    pub datetime: Option<String>,
    /// Estimated cloud cover percentage
    #[serde(rename = "eo:cloud_cover")]
    pub cloud_cover: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StacAsset {
    pub href: String,
}

/// Pagination link on an item collection.
#[derive(Debug, Clone, Deserialize)]
pub struct StacLink {
    pub rel: String,
    pub href: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Scene search seam.
///
/// [`CatalogClient`] is the production implementation; loaders and the
/// pipeline depend on this trait so remote search can be mocked.
pub trait SceneSearch {
    fn search(
        &self,
        region: &BoundingBox,
        interval: &DateInterval,
        max_items: usize,
    ) -> WqResult<Vec<SceneRecord>>;
}

/// Blocking STAC search client.
pub struct CatalogClient {
    config: CatalogConfig,
    http: reqwest::blocking::Client,
}

impl CatalogClient {
    pub fn new(config: CatalogConfig) -> WqResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent("estuarine/0.2")
            .build()
            .map_err(|e| {
                WqError::CatalogUnavailable(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

}

impl SceneSearch for CatalogClient {
    /// Search the catalog for scenes intersecting `region` within `interval`,
    /// bounded by `max_items`.
    ///
    /// Results come back in the catalog's native order, which is not
    /// guaranteed chronological. A timed-out or failed search yields
    /// [`WqError::CatalogUnavailable`]; the caller decides whether that
    /// degrades to "zero scenes for this sub-window" or escalates.
    fn search(
        &self,
        region: &BoundingBox,
        interval: &DateInterval,
        max_items: usize,
    ) -> WqResult<Vec<SceneRecord>> {
        let params = StacSearchParams {
            bbox: Some(region.to_stac()),
            datetime: Some(interval.to_stac()),
            collections: Some(vec![self.config.collection.clone()]),
            limit: Some(max_items.min(1000) as u32),
        };

        log::info!(
            "STAC search: collection={} interval={} max_items={}",
            self.config.collection,
            interval,
            max_items
        );

        let page = self.post_search(&self.config.search_url(), &params)?;
        let records = collect_pages(page, max_items, |link| self.follow_next(link))?;
        log::info!("STAC search returned {} scene records", records.len());
        Ok(records)
    }
}

/// Walk `next` links from a first result page until the cap is reached,
/// the catalog stops linking, or a page comes back empty. Malformed items
/// are skipped with a warning, never fatal.
fn collect_pages<F>(
    mut page: StacItemCollection,
    max_items: usize,
    mut fetch_next: F,
) -> WqResult<Vec<SceneRecord>>
where
    F: FnMut(&StacLink) -> WqResult<StacItemCollection>,
{
    let mut records = Vec::new();

    loop {
        let next = page.next_link().cloned();
        for item in page.features.drain(..) {
            match scene_from_item(item) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("skipping malformed catalog item: {}", e),
            }
        }

        if records.len() >= max_items {
            break;
        }

        match next {
            Some(link) => {
                page = fetch_next(&link)?;
                if page.features.is_empty() {
                    break;
                }
            }
            None => break,
        }
    }

    records.truncate(max_items);
    Ok(records)
}

impl CatalogClient {
    fn post_search(&self, url: &str, params: &StacSearchParams) -> WqResult<StacItemCollection> {
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .json(params)
            .send()
            .map_err(|e| WqError::CatalogUnavailable(format!("search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(WqError::CatalogUnavailable(format!(
                "search returned HTTP {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        let body = response
            .text()
            .map_err(|e| WqError::CatalogUnavailable(format!("reading response body: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| WqError::InvalidFormat(format!("parsing STAC response: {}", e)))
    }

    /// Follow a pagination link. Earth Search advertises POST links carrying
    /// the next-page body; fall back to GET for catalogs that paginate by URL.
    fn follow_next(&self, link: &StacLink) -> WqResult<StacItemCollection> {
        let method = link.method.as_deref().unwrap_or("GET").to_uppercase();

        let response = if method == "POST" {
            let body = link.body.clone().unwrap_or(serde_json::Value::Null);
            self.http
                .post(&link.href)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
        } else {
            self.http.get(&link.href).send()
        }
        .map_err(|e| WqError::CatalogUnavailable(format!("pagination request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(WqError::CatalogUnavailable(format!(
                "pagination returned HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .map_err(|e| WqError::CatalogUnavailable(format!("reading response body: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| WqError::InvalidFormat(format!("parsing STAC page: {}", e)))
    }
}

/// Convert a raw STAC item into a [`SceneRecord`].
pub fn scene_from_item(item: StacItem) -> WqResult<SceneRecord> {
    let datetime = item
        .properties
        .datetime
        .as_deref()
        .ok_or_else(|| WqError::InvalidFormat(format!("item {} has no datetime", item.id)))?;

    let acquired = datetime
        .parse::<DateTime<Utc>>()
        .map_err(|e| WqError::InvalidFormat(format!("item {}: bad datetime: {}", item.id, e)))?;

    let mut assets = HashMap::new();
    let mut thumbnail = None;
    for (key, asset) in item.assets {
        if key == "thumbnail" {
            thumbnail = Some(asset.href);
        } else {
            assets.insert(key, crate::types::AssetRef { href: asset.href });
        }
    }

    Ok(SceneRecord {
        id: item.id,
        acquired,
        cloud_cover: item.properties.cloud_cover,
        assets,
        thumbnail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM_JSON: &str = r#"{
        "features": [
            {
                "id": "S2A_17RMM_20210305_0_L2A",
                "properties": {
                    "datetime": "2021-03-05T16:03:41Z",
                    "eo:cloud_cover": 7.2
                },
                "assets": {
                    "green": { "href": "https://example.com/B03.tif" },
                    "scl": { "href": "https://example.com/SCL.tif" },
                    "thumbnail": { "href": "https://example.com/thumb.jpg" }
                }
            }
        ],
        "links": [
            { "rel": "next", "href": "https://example.com/search", "method": "POST" }
        ]
    }"#;

    #[test]
    fn test_parse_item_collection() {
        let page: StacItemCollection = serde_json::from_str(ITEM_JSON).unwrap();
        assert_eq!(page.features.len(), 1);
        assert!(page.next_link().is_some());

        let record = scene_from_item(page.features[0].clone()).unwrap();
        assert_eq!(record.id, "S2A_17RMM_20210305_0_L2A");
        assert_eq!(record.cloud_cover, Some(7.2));
        assert_eq!(record.acquisition_date().to_string(), "2021-03-05");
        assert!(record.assets.contains_key("green"));
        assert_eq!(record.thumbnail.as_deref(), Some("https://example.com/thumb.jpg"));
    }

    #[test]
    fn test_item_without_datetime_is_rejected() {
        let item = StacItem {
            id: "broken".to_string(),
            properties: StacItemProperties {
                datetime: None,
                cloud_cover: None,
            },
            assets: HashMap::new(),
        };
        assert!(scene_from_item(item).is_err());
    }

    fn item(id: &str, day: u32) -> StacItem {
        StacItem {
            id: id.to_string(),
            properties: StacItemProperties {
                datetime: Some(format!("2021-03-{:02}T16:00:00Z", day)),
                cloud_cover: Some(5.0),
            },
            assets: HashMap::new(),
        }
    }

    fn next_link() -> StacLink {
        StacLink {
            rel: "next".to_string(),
            href: "https://example.com/search".to_string(),
            method: Some("POST".to_string()),
            body: None,
        }
    }

    fn page(items: Vec<StacItem>, has_next: bool) -> StacItemCollection {
        StacItemCollection {
            features: items,
            links: if has_next { vec![next_link()] } else { vec![] },
        }
    }

    #[test]
    fn test_pagination_follows_next_links() {
        let mut fetches = 0usize;
        let records = collect_pages(page(vec![item("a", 1), item("b", 2)], true), 10, |_| {
            fetches += 1;
            Ok(match fetches {
                1 => page(vec![item("c", 3)], true),
                _ => page(vec![], false),
            })
        })
        .unwrap();

        assert_eq!(fetches, 2);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].id, "c");
    }

    #[test]
    fn test_pagination_truncates_at_cap_without_overfetching() {
        let mut fetches = 0usize;
        let first = page(vec![item("a", 1), item("b", 2), item("c", 3)], true);
        let records = collect_pages(first, 2, |_| {
            fetches += 1;
            Ok(page(vec![item("d", 4)], false))
        })
        .unwrap();

        // cap met on the first page, so the next link is never followed
        assert_eq!(fetches, 0);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, "b");
    }

    #[test]
    fn test_pagination_stops_without_next_link() {
        let records = collect_pages(page(vec![item("a", 1)], false), 10, |_| {
            panic!("no next link to follow")
        })
        .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_pagination_skips_malformed_items() {
        let broken = StacItem {
            id: "broken".to_string(),
            properties: StacItemProperties {
                datetime: None,
                cloud_cover: None,
            },
            assets: HashMap::new(),
        };
        let records =
            collect_pages(page(vec![broken, item("ok", 5)], false), 10, |_| {
                unreachable!()
            })
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "ok");
    }

    #[test]
    fn test_pagination_propagates_transport_failure() {
        let result = collect_pages(page(vec![item("a", 1)], true), 10, |_| {
            Err(WqError::CatalogUnavailable("next page timed out".to_string()))
        });
        assert!(matches!(result, Err(WqError::CatalogUnavailable(_))));
    }

    #[test]
    fn test_search_params_serialization_skips_empty() {
        let params = StacSearchParams {
            bbox: Some(vec![-82.8, 27.5, -82.3, 28.0]),
            datetime: Some("2021-01-01/2021-12-31".to_string()),
            collections: None,
            limit: None,
        };
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("bbox"));
        assert!(!json.contains("collections"));
        assert!(!json.contains("limit"));
    }
}
