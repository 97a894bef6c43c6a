//! Feature-server HTTP client.

use hwy_core::Feature;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::collection::QueryPage;
use crate::SourceError;

pub const DEFAULT_PAGE_SIZE: usize = 2_000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client for one feature-server layer (`.../FeatureServer/<layer>`).
///
/// Queries are paged with `resultOffset`/`resultRecordCount` and requested as
/// GeoJSON in WGS84 so both file and server sources share one parser.
pub struct FeatureServerClient {
    client: Client,
    layer_url: String,
    page_size: usize,
}

impl FeatureServerClient {
    pub fn new(
        layer_url: impl Into<String>,
        timeout: Duration,
        page_size: usize,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SourceError::Client)?;
        Ok(Self {
            client,
            layer_url: layer_url.into().trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
        })
    }

    pub fn layer_url(&self) -> &str {
        &self.layer_url
    }

    /// Fetch every feature matching `where_clause`, following pages until the
    /// server reports no more.
    pub async fn fetch_features(&self, where_clause: &str) -> Result<Vec<Feature>, SourceError> {
        let url = format!("{}/query", self.layer_url);
        let url = url.as_str();
        let features = collect_pages(self.page_size, move |offset| {
            self.fetch_page(url, where_clause, offset)
        })
        .await?;

        info!(url = %self.layer_url, count = features.len(), "Fetched features");
        Ok(features)
    }

    async fn fetch_page(
        &self,
        url: &str,
        where_clause: &str,
        offset: usize,
    ) -> Result<QueryPage, SourceError> {
        let offset = offset.to_string();
        let page_size = self.page_size.to_string();
        let response = self
            .client
            .get(url)
            .query(&[
                ("where", where_clause),
                ("outFields", "*"),
                ("returnGeometry", "true"),
                ("outSR", "4326"),
                ("f", "geojson"),
                ("resultOffset", offset.as_str()),
                ("resultRecordCount", page_size.as_str()),
            ])
            .send()
            .await
            .map_err(|source| SourceError::Request {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| SourceError::Request {
                url: url.to_string(),
                source,
            })?;
        QueryPage::parse(&body)
    }
}

/// Request pages from offset 0 until one reports no more records, advancing
/// the offset by the records each page returned.
pub(crate) async fn collect_pages<F, Fut>(
    page_size: usize,
    mut fetch_page: F,
) -> Result<Vec<Feature>, SourceError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<QueryPage, SourceError>>,
{
    let mut features: Vec<Feature> = Vec::new();
    let mut offset = 0usize;

    loop {
        let page = fetch_page(offset).await?;
        let fetched = page.record_count;
        let more = page.has_more(page_size);
        features.extend(page.features);
        debug!(offset, fetched, "Fetched feature page");

        // An empty page ends the query even if the server claims more.
        if !more || fetched == 0 {
            break;
        }
        offset += fetched;
    }

    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::future::ready;

    /// A page of `count` features, optionally carrying the transfer flag.
    fn page(count: usize, exceeded: Option<bool>) -> QueryPage {
        let features: Vec<_> = (0..count)
            .map(|i| {
                let lat = 39.0 + i as f64 * 0.01;
                json!({
                    "type": "Feature",
                    "geometry": {"type": "LineString", "coordinates": [[-76.0, lat], [-76.0, lat + 0.005]]},
                    "properties": {"ROUTE_ID": format!("R{i}")}
                })
            })
            .collect();
        let mut body = json!({"type": "FeatureCollection", "features": features});
        if let Some(exceeded) = exceeded {
            body["exceededTransferLimit"] = json!(exceeded);
        }
        QueryPage::parse(&body.to_string()).unwrap()
    }

    /// Run the page loop over canned pages, returning the offsets requested
    /// and the number of features collected.
    async fn run(page_size: usize, pages: Vec<QueryPage>) -> (Vec<usize>, usize) {
        let mut pages = pages.into_iter();
        let mut offsets = Vec::new();
        let features = collect_pages(page_size, |offset| {
            offsets.push(offset);
            ready(Ok(pages.next().expect("requested a page past the last one")))
        })
        .await
        .unwrap();
        (offsets, features.len())
    }

    #[tokio::test]
    async fn short_page_ends_query_without_flag() {
        let (offsets, count) = run(2, vec![page(2, None), page(2, None), page(1, None)]).await;
        assert_eq!(offsets, [0, 2, 4]);
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn transfer_flag_decides_when_present() {
        // Short pages keep going while the server says it truncated them.
        let pages = vec![page(3, Some(true)), page(3, Some(true)), page(3, Some(false))];
        let (offsets, count) = run(10, pages).await;
        assert_eq!(offsets, [0, 3, 6]);
        assert_eq!(count, 9);

        // A full page stops when the flag says nothing is left.
        let (offsets, _) = run(2, vec![page(2, Some(false))]).await;
        assert_eq!(offsets, [0]);
    }

    #[tokio::test]
    async fn empty_page_ends_query() {
        let (offsets, count) = run(2, vec![page(2, Some(true)), page(0, Some(true))]).await;
        assert_eq!(offsets, [0, 2]);
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn offset_counts_unreadable_records() {
        let body = json!({"features": [
            {"type": "Feature", "geometry": null, "properties": {"ROUTE_ID": "kept"}},
            "garbage"
        ]});
        let first = QueryPage::parse(&body.to_string()).unwrap();
        assert_eq!(first.features.len(), 1);

        let (offsets, count) = run(2, vec![first, page(0, None)]).await;
        assert_eq!(offsets, [0, 2]);
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn page_errors_stop_the_query() {
        let mut calls = 0;
        let result = collect_pages(2, |_| {
            calls += 1;
            ready(Err(SourceError::Server {
                code: 500,
                message: "Unable to complete operation".to_string(),
            }))
        })
        .await;
        assert!(matches!(result, Err(SourceError::Server { code: 500, .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn layer_url_is_normalized() {
        let client = FeatureServerClient::new(
            "https://gis.example.org/arcgis/rest/services/HPMS/FeatureServer/0/",
            Duration::from_secs(5),
            0,
        )
        .unwrap();
        assert_eq!(
            client.layer_url(),
            "https://gis.example.org/arcgis/rest/services/HPMS/FeatureServer/0"
        );
        assert_eq!(client.page_size, 1);
    }

    /// Live query against a feature server.
    ///
    /// Run with: HWY_TEST_LAYER_URL=... cargo test -p hwy-source -- --ignored
    #[tokio::test]
    #[ignore]
    async fn fetches_features_from_live_layer() {
        let Ok(url) = std::env::var("HWY_TEST_LAYER_URL") else {
            return;
        };
        let client = FeatureServerClient::new(url, Duration::from_secs(30), 500).unwrap();
        let features = client.fetch_features("1=1").await.unwrap();
        assert!(!features.is_empty());
    }
}
