//! Hand-curated per-state tables: route type overrides, feature exceptions
//! and concurrency candidates.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::concurrency::Orientation;
use crate::models::{FeatureAttributes, RouteRef, RouteSignType};

const BUNDLED_CATALOG: &str = include_str!("../data/states.json");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read state catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid state catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("state '{0}' is defined more than once")]
    DuplicateState(String),
    #[error("state '{state}' lists route '{route}' as concurrent with itself")]
    SelfConcurrency { state: String, route: String },
}

/// Where a state's raw features come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Paginated feature-server layer (`.../FeatureServer/<layer>`).
    FeatureServer {
        url: String,
        #[serde(default)]
        where_clause: Option<String>,
    },
    /// A GeoJSON FeatureCollection on disk.
    GeojsonFile { path: String },
}

/// State-specific rule dropping features the generic classifier would keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureException {
    /// Drop features whose route identifier ends with `suffix`.
    RouteIdSuffix { suffix: String },
    /// Drop features whose route name ends in a non-digit (lettered spurs).
    RouteNameAlphaSuffix,
}

impl FeatureException {
    pub fn excludes(&self, attributes: &FeatureAttributes) -> bool {
        match self {
            FeatureException::RouteIdSuffix { suffix } => {
                !suffix.is_empty()
                    && attributes
                        .route_id
                        .to_ascii_uppercase()
                        .ends_with(&suffix.to_ascii_uppercase())
            }
            FeatureException::RouteNameAlphaSuffix => attributes
                .route_name
                .chars()
                .last()
                .is_some_and(|c| !c.is_ascii_digit()),
        }
    }
}

/// Static tables for one state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateProfile {
    /// Short code used by upstream sources, e.g. `MD`.
    pub identifier: String,
    pub title: String,
    pub initials: String,
    /// FIPS state code carried in feature attributes.
    pub state_code: i64,
    #[serde(default)]
    pub source: Option<SourceSpec>,
    /// Route label -> sign type, for sources without a signing attribute.
    #[serde(default)]
    pub route_types: BTreeMap<String, RouteSignType>,
    #[serde(default)]
    pub exceptions: Vec<FeatureException>,
    /// Primary route -> routes it runs concurrently with, same direction.
    #[serde(default)]
    pub concurrencies: BTreeMap<RouteRef, Vec<RouteRef>>,
    /// Primary route -> routes it shares roadway with in opposite directions.
    #[serde(default)]
    pub wrong_way_concurrencies: BTreeMap<RouteRef, Vec<RouteRef>>,
}

impl StateProfile {
    /// Minimal profile with empty tables.
    pub fn new(identifier: &str, title: &str, state_code: i64) -> Self {
        Self {
            identifier: identifier.to_string(),
            title: title.to_string(),
            initials: identifier.to_string(),
            state_code,
            source: None,
            route_types: BTreeMap::new(),
            exceptions: Vec::new(),
            concurrencies: BTreeMap::new(),
            wrong_way_concurrencies: BTreeMap::new(),
        }
    }

    /// Table lookup for a route label, defaulting to a state route.
    pub fn route_type(&self, route_label: &str) -> RouteSignType {
        self.route_types
            .get(route_label)
            .copied()
            .unwrap_or(RouteSignType::State)
    }

    /// True when an exception of this state drops the feature. Exceptions
    /// only apply to features from this state (or with no state code).
    pub fn excludes(&self, attributes: &FeatureAttributes) -> bool {
        if attributes
            .state_code
            .is_some_and(|code| code != self.state_code)
        {
            return false;
        }
        self.exceptions.iter().any(|rule| rule.excludes(attributes))
    }

    /// Every candidate pair, same-direction pairs first.
    pub fn concurrency_candidates(&self) -> Vec<(RouteRef, RouteRef, Orientation)> {
        let same = self.concurrencies.iter().map(|t| (t, Orientation::SameWay));
        let wrong = self
            .wrong_way_concurrencies
            .iter()
            .map(|t| (t, Orientation::WrongWay));
        same.chain(wrong)
            .flat_map(|((primary, secondaries), orientation)| {
                secondaries
                    .iter()
                    .map(move |secondary| (primary.clone(), secondary.clone(), orientation))
            })
            .collect()
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let tables = self
            .concurrencies
            .iter()
            .chain(self.wrong_way_concurrencies.iter());
        for (primary, secondaries) in tables {
            if secondaries.contains(primary) {
                return Err(CatalogError::SelfConcurrency {
                    state: self.identifier.clone(),
                    route: primary.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// All state profiles known to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCatalog {
    pub states: Vec<StateProfile>,
}

impl StateCatalog {
    /// The catalog compiled into the binary.
    pub fn bundled() -> Result<Self, CatalogError> {
        Self::from_json(BUNDLED_CATALOG)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let catalog: StateCatalog = serde_json::from_str(raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Case-insensitive lookup by identifier.
    pub fn get(&self, identifier: &str) -> Option<&StateProfile> {
        self.states
            .iter()
            .find(|state| state.identifier.eq_ignore_ascii_case(identifier))
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for state in &self.states {
            if !seen.insert(state.identifier.to_ascii_uppercase()) {
                return Err(CatalogError::DuplicateState(state.identifier.clone()));
            }
            state.validate()?;
        }
        Ok(())
    }
}
