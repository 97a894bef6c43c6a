//! GeoJSON feature collections, from disk or from a feature-server page.
//!
//! Each feature is read on its own with the `geojson` crate so a single
//! malformed record is repaired or dropped instead of failing the whole
//! collection.

use geojson::{JsonObject, JsonValue};
use hwy_core::{Feature, FeatureAttributes, Geometry, Position};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::SourceError;

#[derive(Debug, Deserialize)]
struct ServerError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct CollectionProperties {
    #[serde(default, rename = "exceededTransferLimit")]
    exceeded_transfer_limit: Option<bool>,
}

/// Collection envelope. Feature servers add `exceededTransferLimit` (at the
/// top level or under `properties`) and report failures as `error`.
#[derive(Debug, Deserialize)]
struct RawCollection {
    #[serde(default)]
    features: Vec<JsonValue>,
    #[serde(default, rename = "exceededTransferLimit")]
    exceeded_transfer_limit: Option<bool>,
    #[serde(default)]
    properties: Option<CollectionProperties>,
    #[serde(default)]
    error: Option<ServerError>,
}

/// One page of a feature query.
#[derive(Debug)]
pub(crate) struct QueryPage {
    pub(crate) features: Vec<Feature>,
    /// Records the server returned, including any that were unreadable.
    pub(crate) record_count: usize,
    exceeded_transfer_limit: Option<bool>,
}

impl QueryPage {
    pub(crate) fn parse(body: &str) -> Result<Self, SourceError> {
        let raw: RawCollection = serde_json::from_str(body)?;
        if let Some(error) = raw.error {
            return Err(SourceError::Server {
                code: error.code,
                message: error.message,
            });
        }

        let exceeded_transfer_limit = raw
            .exceeded_transfer_limit
            .or_else(|| raw.properties.and_then(|p| p.exceeded_transfer_limit));
        let record_count = raw.features.len();
        let features: Vec<Feature> = raw
            .features
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| read_feature(index, value))
            .collect();
        if features.len() < record_count {
            warn!(
                skipped = record_count - features.len(),
                "Skipped unreadable features"
            );
        }

        Ok(Self {
            features,
            record_count,
            exceeded_transfer_limit,
        })
    }

    /// Whether another page should be requested. Without a transfer-limit
    /// flag a full page means there may be more.
    pub(crate) fn has_more(&self, page_size: usize) -> bool {
        match self.exceeded_transfer_limit {
            Some(exceeded) => exceeded,
            None => self.record_count >= page_size,
        }
    }
}

fn read_feature(index: usize, value: JsonValue) -> Option<Feature> {
    let JsonValue::Object(mut object) = value else {
        warn!(index, "Feature is not a JSON object, skipping");
        return None;
    };

    // Geometry is read separately so a bad one costs only the geometry.
    let raw_geometry = object.insert("geometry".to_string(), JsonValue::Null);
    object.entry("properties").or_insert(JsonValue::Null);
    let feature = match geojson::Feature::from_json_object(object) {
        Ok(feature) => feature,
        Err(e) => {
            warn!(index, "Unreadable feature, skipping: {}", e);
            return None;
        }
    };

    Some(Feature {
        geometry: raw_geometry.and_then(|value| read_geometry(index, value)),
        properties: FeatureAttributes::from_properties(
            feature.properties.unwrap_or_else(JsonObject::new),
        ),
    })
}

/// Polyline geometry of one feature. Anything that is not a readable
/// LineString or MultiLineString comes back as `None`.
fn read_geometry(index: usize, mut value: JsonValue) -> Option<Geometry> {
    if value.is_null() {
        return None;
    }
    if collapse_nested_line(&mut value) {
        warn!(index, "LineString nested one level too deep, keeping its first part");
    }

    let geometry = match geojson::Geometry::from_json_value(value) {
        Ok(geometry) => geometry,
        Err(e) => {
            warn!(index, "Unreadable geometry, treating as empty: {}", e);
            return None;
        }
    };

    match geometry.value {
        geojson::Value::LineString(line) => positions(index, line).map(Geometry::LineString),
        geojson::Value::MultiLineString(parts) => parts
            .into_iter()
            .map(|part| positions(index, part))
            .collect::<Option<Vec<_>>>()
            .map(Geometry::MultiLineString),
        _ => {
            debug!(index, "Geometry is not a polyline, treating as empty");
            None
        }
    }
}

/// `{"type": "LineString", "coordinates": [[[lon, lat], ...], ...]}` is
/// rewritten to its first part. Returns whether anything changed.
fn collapse_nested_line(value: &mut JsonValue) -> bool {
    if value.get("type").and_then(JsonValue::as_str) != Some("LineString") {
        return false;
    }
    let Some(coordinates) = value.get_mut("coordinates") else {
        return false;
    };
    let nested = coordinates
        .get(0)
        .and_then(|position| position.get(0))
        .is_some_and(JsonValue::is_array);
    if !nested {
        return false;
    }

    let first = coordinates
        .get_mut(0)
        .map(JsonValue::take)
        .unwrap_or(JsonValue::Null);
    *coordinates = first;
    true
}

fn positions(index: usize, line: Vec<Vec<f64>>) -> Option<Vec<Position>> {
    match line
        .into_iter()
        .map(Position::try_from)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(positions) => Some(positions),
        Err(e) => {
            warn!(index, "Bad position, treating geometry as empty: {}", e);
            None
        }
    }
}

/// Parse a GeoJSON FeatureCollection.
pub fn parse_feature_collection(raw: &str) -> Result<Vec<Feature>, SourceError> {
    Ok(QueryPage::parse(raw)?.features)
}

/// Load a GeoJSON FeatureCollection from disk.
pub async fn load_geojson_file(path: impl AsRef<Path>) -> Result<Vec<Feature>, SourceError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
    let features = parse_feature_collection(&raw)?;
    info!(path = %path.display(), count = features.len(), "Loaded features from file");
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "id": 1,
                "geometry": {"type": "LineString", "coordinates": [[-76.61, 39.28], [-76.60, 39.30]]},
                "properties": {"ROUTE_ID": "I95", "ROUTE_NUMBER": 95, "ROUTE_SIGNING": 2, "BEGIN_POINT": 0.0}
            },
            {
                "type": "Feature",
                "id": 2,
                "geometry": {"type": "MultiLineString", "coordinates": [[[-76.5, 39.3], [-76.4, 39.4]]]},
                "properties": {"ROUTE_ID": "US40", "ROUTE_NUMBER": "40", "ROUTE_SIGNING": 3}
            }
        ],
        "properties": {"exceededTransferLimit": true}
    }"#;

    #[test]
    fn parses_features_and_transfer_flag() {
        let page = QueryPage::parse(PAGE).unwrap();
        assert_eq!(page.features.len(), 2);
        assert_eq!(page.record_count, 2);
        assert!(page.has_more(1_000));
        assert_eq!(page.features[0].properties.route_id, "I95");
        assert_eq!(page.features[0].properties.begin_point, Some(0.0));
        assert!(matches!(
            page.features[1].geometry,
            Some(Geometry::MultiLineString(_))
        ));
    }

    #[test]
    fn missing_flag_falls_back_to_page_size() {
        let raw = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "geometry": null, "properties": {}}
        ]}"#;
        let page = QueryPage::parse(raw).unwrap();
        assert!(page.has_more(1));
        assert!(!page.has_more(2));

        let raw = r#"{"features": [], "exceededTransferLimit": false}"#;
        assert!(!QueryPage::parse(raw).unwrap().has_more(0));
    }

    #[test]
    fn malformed_features_do_not_sink_the_collection() {
        let raw = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature",
             "geometry": {"type": "LineString", "coordinates": [[-76.0, 39.0], [-76.0, 39.1]]},
             "properties": {"ROUTE_ID": "good"}},
            {"type": "Feature",
             "geometry": {"type": "LineString", "coordinates": [[[-76.0, 39.2], [-76.0, 39.3]], [[-75.0, 38.0], [-75.0, 38.1]]]},
             "properties": {"ROUTE_ID": "nested"}},
            {"type": "Feature",
             "geometry": {"type": "Point", "coordinates": [-76.0, 39.4]},
             "properties": {"ROUTE_ID": "point"}},
            {"type": "Feature",
             "geometry": {"type": "LineString", "coordinates": [[-76.0], [-76.0, 39.5]]},
             "properties": {"ROUTE_ID": "short-position"}},
            {"type": "Feature",
             "geometry": {"type": "LineString", "coordinates": "oops"},
             "properties": {"ROUTE_ID": "garbage"}},
            {"type": "Feature", "geometry": null},
            "not a feature",
            {"type": "Road", "geometry": null, "properties": {"ROUTE_ID": "not-a-feature"}}
        ]}"#;
        let page = QueryPage::parse(raw).unwrap();
        assert_eq!(page.record_count, 8);

        let ids: Vec<&str> = page
            .features
            .iter()
            .map(|f| f.properties.route_id.as_str())
            .collect();
        assert_eq!(ids, ["good", "nested", "point", "short-position", "garbage", ""]);

        assert_eq!(
            page.features[0].geometry,
            Some(Geometry::LineString(vec![
                Position::new(-76.0, 39.0),
                Position::new(-76.0, 39.1)
            ]))
        );
        // Only the first part of the over-nested line survives.
        assert_eq!(
            page.features[1].geometry,
            Some(Geometry::LineString(vec![
                Position::new(-76.0, 39.2),
                Position::new(-76.0, 39.3)
            ]))
        );
        for feature in &page.features[2..] {
            assert_eq!(feature.geometry, None);
            assert!(!feature.has_geometry());
        }
    }

    #[test]
    fn server_errors_surface() {
        let raw = r#"{"error": {"code": 400, "message": "Invalid query parameters"}}"#;
        match QueryPage::parse(raw) {
            Err(SourceError::Server { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "Invalid query parameters");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn non_json_bodies_are_parse_errors() {
        assert!(matches!(
            QueryPage::parse("<html>502 Bad Gateway</html>"),
            Err(SourceError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn loads_collection_from_disk() {
        let path = std::env::temp_dir().join(format!("hwy-source-{}.geojson", std::process::id()));
        tokio::fs::write(&path, PAGE).await.unwrap();
        let features = load_geojson_file(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(features.len(), 2);

        let missing = load_geojson_file(path.with_extension("missing")).await;
        assert!(matches!(missing, Err(SourceError::Io { .. })));
    }
}
