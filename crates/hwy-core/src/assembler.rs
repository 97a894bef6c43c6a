//! Route assembly: turns unordered feature fragments of one route into
//! ordered, direction-tagged segments.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::StateProfile;
use crate::classifier::{RouteBuckets, RouteKey};
use crate::models::{
    Direction, Feature, Geometry, Position, SegmentDraft, FACILITY_TYPE_NON_INVENTORY,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssembleError {
    #[error("no features matched for state {state}, aborting")]
    NoFeatures { state: String },
}

/// Axis a route mostly travels along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    NorthSouth,
    EastWest,
}

impl Axis {
    fn value(self, position: Position) -> f64 {
        match self {
            Axis::NorthSouth => position.lat,
            Axis::EastWest => position.lon,
        }
    }
}

/// Fragments sharing one source route identifier, in linear-reference order.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub route_id: String,
    /// Set when the run is the non-inventory side of a divided road.
    pub non_inventory: bool,
    pub coordinates: Vec<Position>,
}

impl Run {
    fn first(&self) -> Option<Position> {
        self.coordinates.first().copied()
    }

    fn last(&self) -> Option<Position> {
        self.coordinates.last().copied()
    }
}

/// Assemble every bucket of a state, in bucket order.
pub fn assemble_state(
    profile: &StateProfile,
    buckets: RouteBuckets,
) -> Result<Vec<SegmentDraft>, AssembleError> {
    if buckets.is_empty() {
        return Err(AssembleError::NoFeatures {
            state: profile.identifier.clone(),
        });
    }

    let mut drafts = Vec::new();
    for (key, features) in buckets.into_inner() {
        let segments = assemble_route(&key, features);
        debug!(
            state = %profile.identifier,
            route = %key.route(),
            segments = segments.len(),
            "Assembled route"
        );
        drafts.extend(segments);
    }
    Ok(drafts)
}

/// Assemble one route bucket into segments, one per run.
pub fn assemble_route(key: &RouteKey, features: Vec<Feature>) -> Vec<SegmentDraft> {
    let runs = order_runs(build_runs(features));
    let Some(mainline) = infer_mainline_direction(&runs) else {
        return Vec::new();
    };

    // Indices count up per direction
    let mut next_index: HashMap<Direction, u32> = HashMap::new();
    runs.into_iter()
        .map(|run| {
            // Non-inventory runs travel against the mainline
            let direction = if run.non_inventory {
                mainline.opposite()
            } else {
                mainline
            };
            let index = next_index.entry(direction).or_insert(0);
            let segment_index = *index;
            *index += 1;
            SegmentDraft {
                route_number: key.label.clone(),
                sign_type: key.sign_type,
                segment_index,
                direction,
                coordinates: run.coordinates,
                length_m: 0.0,
            }
        })
        .collect()
}

/// Sort fragments by (route id, begin point) and group them into runs.
/// The sort is stable, so fragments without a begin point keep input order.
pub fn build_runs(mut features: Vec<Feature>) -> Vec<Run> {
    features.sort_by(|a, b| {
        let (a, b) = (&a.properties, &b.properties);
        a.route_id.cmp(&b.route_id).then_with(|| {
            a.begin_point
                .unwrap_or(0.0)
                .total_cmp(&b.begin_point.unwrap_or(0.0))
        })
    });

    // Consecutive fragments with one route id extend the same run
    let mut runs: Vec<Run> = Vec::new();
    for feature in features {
        let coordinates = flatten_geometry(&feature);
        match runs.last_mut() {
            Some(run) if run.route_id == feature.properties.route_id => {
                run.coordinates.extend(coordinates);
            }
            _ => runs.push(Run {
                route_id: feature.properties.route_id.clone(),
                non_inventory: feature.properties.facility_type
                    == Some(FACILITY_TYPE_NON_INVENTORY),
                coordinates,
            }),
        }
    }
    runs.retain(|run| !run.coordinates.is_empty());
    runs
}

/// Order runs along the route's dominant axis. A run goes before a placed
/// run when its first coordinate lies before that run's last coordinate.
///
/// The pairwise test is not a total order, so runs are placed by insertion
/// rather than handed to a sort.
pub fn order_runs(runs: Vec<Run>) -> Vec<Run> {
    let axis = dominant_axis(&runs);
    let mut ordered: Vec<Run> = Vec::with_capacity(runs.len());
    for run in runs {
        let position = ordered
            .iter()
            .position(|placed| precedes(&run, placed, axis))
            .unwrap_or(ordered.len());
        ordered.insert(position, run);
    }
    ordered
}

fn precedes(run: &Run, placed: &Run, axis: Axis) -> bool {
    match (run.first(), placed.last()) {
        (Some(first), Some(last)) => axis.value(first) - axis.value(last) < 0.0,
        _ => false,
    }
}

/// Axis with the larger coordinate extent over all runs.
fn dominant_axis(runs: &[Run]) -> Axis {
    let mut lat = (f64::INFINITY, f64::NEG_INFINITY);
    let mut lon = (f64::INFINITY, f64::NEG_INFINITY);
    for position in runs.iter().flat_map(|run| run.coordinates.iter()) {
        lat = (lat.0.min(position.lat), lat.1.max(position.lat));
        lon = (lon.0.min(position.lon), lon.1.max(position.lon));
    }
    if lat.1 - lat.0 > lon.1 - lon.0 {
        Axis::NorthSouth
    } else {
        Axis::EastWest
    }
}

/// Mainline direction from the first to the last run's endpoints. Only
/// inventory runs are considered when the route has any.
///
/// Approximate: loops and strongly curved routes can come out wrong.
pub fn infer_mainline_direction(runs: &[Run]) -> Option<Direction> {
    let inventory: Vec<&Run> = runs.iter().filter(|run| !run.non_inventory).collect();
    let representative: Vec<&Run> = if inventory.is_empty() {
        runs.iter().collect()
    } else {
        inventory
    };

    let start = representative.first()?.first()?;
    let end = representative.last()?.last()?;
    let dlat = end.lat - start.lat;
    let dlon = end.lon - start.lon;

    let direction = if dlat.abs() > dlon.abs() {
        if dlat >= 0.0 {
            Direction::N
        } else {
            Direction::S
        }
    } else if dlon >= 0.0 {
        Direction::E
    } else {
        Direction::W
    };
    Some(direction)
}

/// Positions of a feature. Sources occasionally encode a single route as a
/// multi-part geometry; those collapse to their first non-empty part.
fn flatten_geometry(feature: &Feature) -> Vec<Position> {
    match &feature.geometry {
        Some(Geometry::LineString(line)) => line.clone(),
        Some(Geometry::MultiLineString(parts)) => {
            if parts.len() > 1 {
                warn!(
                    route_id = %feature.properties.route_id,
                    parts = parts.len(),
                    "Collapsing multi-part geometry to its first part"
                );
            }
            parts
                .iter()
                .find(|part| !part.is_empty())
                .cloned()
                .unwrap_or_default()
        }
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_features;
    use crate::models::{FeatureAttributes, RouteSignType};
    use crate::progress::ProgressEvent;

    fn fragment(route_id: &str, begin: f64, coords: &[(f64, f64)]) -> Feature {
        Feature::new(
            Geometry::LineString(coords.iter().map(|(lon, lat)| Position::new(*lon, *lat)).collect()),
            FeatureAttributes {
                route_id: route_id.to_string(),
                route_number: Some(5),
                route_name: "SR5".to_string(),
                sign_type: Some(4),
                facility_system: Some(3),
                facility_type: Some(2),
                state_code: Some(24),
                begin_point: Some(begin),
            },
        )
    }

    fn non_inventory(mut feature: Feature) -> Feature {
        feature.properties.facility_type = Some(FACILITY_TYPE_NON_INVENTORY);
        feature
    }

    fn key() -> RouteKey {
        RouteKey {
            sign_type: RouteSignType::State,
            number: 5,
            label: "5".to_string(),
        }
    }

    #[test]
    fn fragments_sort_by_begin_point_within_a_run() {
        let runs = build_runs(vec![
            fragment("R5", 5.0, &[(-76.0, 39.05), (-76.0, 39.06)]),
            fragment("R5", 2.0, &[(-76.0, 39.02), (-76.0, 39.03)]),
        ]);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].coordinates[0], Position::new(-76.0, 39.02));
        assert_eq!(runs[0].coordinates.len(), 4);
    }

    #[test]
    fn runs_group_by_route_id_after_sorting() {
        let runs = build_runs(vec![
            fragment("B", 1.0, &[(-76.0, 39.5)]),
            fragment("A", 1.0, &[(-76.0, 39.1)]),
            fragment("B", 0.0, &[(-76.0, 39.4)]),
        ]);
        let ids: Vec<&str> = runs.iter().map(|run| run.route_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(runs[1].coordinates[0].lat, 39.4);
    }

    #[test]
    fn runs_order_along_the_dominant_axis() {
        // Route ids sort against physical order.
        let runs = order_runs(build_runs(vec![
            fragment("A", 0.0, &[(-76.0, 39.3), (-76.0, 39.4)]),
            fragment("B", 0.0, &[(-76.0, 39.0), (-76.0, 39.1)]),
            fragment("C", 0.0, &[(-76.0, 39.15), (-76.0, 39.25)]),
        ]));
        let ids: Vec<&str> = runs.iter().map(|run| run.route_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C", "A"]);
    }

    #[test]
    fn direction_is_north_for_increasing_latitude() {
        let segments = assemble_route(
            &key(),
            vec![
                fragment("A", 0.0, &[(-76.00, 39.0), (-76.01, 39.2)]),
                fragment("B", 0.0, &[(-76.01, 39.3), (-76.02, 39.5)]),
            ],
        );
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.direction == Direction::N));
        assert_eq!(segments[0].segment_index, 0);
        assert_eq!(segments[1].segment_index, 1);
    }

    #[test]
    fn direction_is_west_for_decreasing_longitude() {
        let mut runs = build_runs(vec![fragment("A", 0.0, &[(-75.0, 39.0), (-76.0, 39.1)])]);
        assert_eq!(infer_mainline_direction(&runs), Some(Direction::W));
        runs[0].coordinates.reverse();
        assert_eq!(infer_mainline_direction(&runs), Some(Direction::E));
        assert_eq!(infer_mainline_direction(&[]), None);
    }

    #[test]
    fn non_inventory_runs_take_the_opposite_direction() {
        let segments = assemble_route(
            &key(),
            vec![
                fragment("A", 0.0, &[(-76.0, 39.0), (-76.0, 39.2)]),
                non_inventory(fragment("A-NI", 0.0, &[(-76.001, 39.0), (-76.001, 39.2)])),
                fragment("B", 0.0, &[(-76.0, 39.3), (-76.0, 39.5)]),
            ],
        );
        let directions: Vec<(Direction, u32)> = segments
            .iter()
            .map(|s| (s.direction, s.segment_index))
            .collect();
        assert_eq!(
            directions,
            vec![(Direction::S, 0), (Direction::N, 0), (Direction::N, 1)]
        );
    }

    #[test]
    fn multi_part_geometry_collapses_to_first_part() {
        let mut feature = fragment("A", 0.0, &[]);
        feature.geometry = Some(Geometry::MultiLineString(vec![
            vec![Position::new(-76.0, 39.0), Position::new(-76.0, 39.1)],
            vec![Position::new(-77.0, 40.0)],
        ]));
        let runs = build_runs(vec![feature]);
        assert_eq!(runs[0].coordinates.len(), 2);
    }

    #[test]
    fn empty_state_aborts() {
        let profile = StateProfile::new("MD", "Maryland", 24);
        let err = assemble_state(&profile, RouteBuckets::default()).unwrap_err();
        assert_eq!(err, AssembleError::NoFeatures { state: "MD".to_string() });
        assert_eq!(err.to_string(), "no features matched for state MD, aborting");
    }

    #[test]
    fn assemble_state_emits_routes_in_bucket_order() {
        let profile = StateProfile::new("MD", "Maryland", 24);
        let mut us = fragment("US40", 0.0, &[(-77.0, 39.5), (-76.0, 39.6)]);
        us.properties.route_number = Some(40);
        us.properties.route_name = "US40".to_string();
        us.properties.sign_type = Some(3);
        let state = fragment("SR5", 0.0, &[(-76.0, 39.0), (-76.0, 39.1)]);

        let (buckets, _) = classify_features(&profile, vec![state, us], &mut |_: ProgressEvent| {});
        let drafts = assemble_state(&profile, buckets).unwrap();
        let routes: Vec<String> = drafts.iter().map(|d| d.route().to_string()).collect();
        assert_eq!(routes, vec!["US-40", "SR-5"]);
        assert_eq!(drafts[0].direction, Direction::E);
        assert_eq!(drafts[1].direction, Direction::N);
    }
}
