//! Highway feature sources.
//!
//! Fetches raw route features either from a paginated feature-server layer
//! or from a GeoJSON file on disk.

pub mod client;
pub mod collection;
pub mod error;

pub use client::{FeatureServerClient, DEFAULT_PAGE_SIZE, DEFAULT_TIMEOUT_SECS};
pub use error::SourceError;
pub use collection::{load_geojson_file, parse_feature_collection};

use hwy_core::{Feature, SourceSpec};
use std::path::PathBuf;
use std::time::Duration;

/// Where-clause used when a feature-server source doesn't name one.
pub const DEFAULT_WHERE_CLAUSE: &str = "1=1";

/// Settings shared by network sources.
#[derive(Debug, Clone, Copy)]
pub struct SourceOptions {
    pub timeout: Duration,
    pub page_size: usize,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// A configured origin of raw features for one state.
pub enum FeatureSource {
    FeatureServer {
        client: FeatureServerClient,
        where_clause: String,
    },
    GeoJsonFile(PathBuf),
}

impl FeatureSource {
    pub fn from_spec(spec: &SourceSpec, options: SourceOptions) -> Result<Self, SourceError> {
        match spec {
            SourceSpec::FeatureServer { url, where_clause } => Ok(FeatureSource::FeatureServer {
                client: FeatureServerClient::new(url.as_str(), options.timeout, options.page_size)?,
                where_clause: where_clause
                    .clone()
                    .unwrap_or_else(|| DEFAULT_WHERE_CLAUSE.to_string()),
            }),
            SourceSpec::GeojsonFile { path } => Ok(FeatureSource::GeoJsonFile(PathBuf::from(path))),
        }
    }

    /// Human-readable origin, for logs.
    pub fn describe(&self) -> String {
        match self {
            FeatureSource::FeatureServer { client, .. } => client.layer_url().to_string(),
            FeatureSource::GeoJsonFile(path) => path.display().to_string(),
        }
    }

    pub async fn fetch(&self) -> Result<Vec<Feature>, SourceError> {
        match self {
            FeatureSource::FeatureServer {
                client,
                where_clause,
            } => client.fetch_features(where_clause).await,
            FeatureSource::GeoJsonFile(path) => load_geojson_file(path).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_sources_from_catalog_specs() {
        let spec = SourceSpec::FeatureServer {
            url: "https://gis.example.org/FeatureServer/3".to_string(),
            where_clause: None,
        };
        match FeatureSource::from_spec(&spec, SourceOptions::default()).unwrap() {
            FeatureSource::FeatureServer {
                client,
                where_clause,
            } => {
                assert_eq!(client.layer_url(), "https://gis.example.org/FeatureServer/3");
                assert_eq!(where_clause, DEFAULT_WHERE_CLAUSE);
            }
            FeatureSource::GeoJsonFile(_) => panic!("expected feature server"),
        }

        let spec = SourceSpec::GeojsonFile {
            path: "data/md.geojson".to_string(),
        };
        let source = FeatureSource::from_spec(&spec, SourceOptions::default()).unwrap();
        assert_eq!(source.describe(), "data/md.geojson");
    }
}
