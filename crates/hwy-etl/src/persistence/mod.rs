//! Persistence layer for the highway ETL.
//!
//! SQLite-backed storage for seeded states, route segments, their points and
//! detected concurrencies.

pub mod concurrencies;
pub mod db;
pub mod segments;
pub mod states;

pub use concurrencies::{load_concurrencies, replace_concurrencies};
pub use db::{init_database, Database};
pub use segments::{
    list_segments, load_points, load_route_geometry, write_state_segments, SegmentRecord,
    SegmentWriter, WriteSummary,
};
pub use states::{list_states, load_state, StateRecord};
