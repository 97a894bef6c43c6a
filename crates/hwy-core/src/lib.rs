//! Highway route reconstruction core.
//!
//! Classifies raw GIS features into signed routes, assembles them into
//! ordered, direction-tagged segments and detects concurrencies between
//! stored routes. Pure logic; storage and fetching live in other crates.

pub mod assembler;
pub mod catalog;
pub mod classifier;
pub mod concurrency;
pub mod models;
pub mod progress;
pub mod spatial;

pub use assembler::{assemble_route, assemble_state, AssembleError};
pub use catalog::{CatalogError, FeatureException, SourceSpec, StateCatalog, StateProfile};
pub use classifier::{classify_feature, classify_features, ClassifyStats, Discard, RouteBuckets, RouteKey};
pub use concurrency::{ConcurrencyDetector, Orientation, DEFAULT_THRESHOLD_M};
pub use models::{
    Concurrency, Direction, Feature, FeatureAttributes, Geometry, LatLon, Position, RouteGeometry,
    RouteRef, RouteSignType, SegmentDraft, SegmentGeometry,
};
pub use progress::{ProgressEvent, ProgressSink};
pub use spatial::{find_nearest_point_index, haversine_distance, point_distance, segment_length};
