//! Second pass over a seeded state: validate the catalog's concurrency
//! candidates against stored geometry and persist the matches.

use anyhow::Result;
use hwy_core::{Concurrency, ConcurrencyDetector, RouteGeometry, RouteRef, StateProfile};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::persistence::{load_route_geometry, replace_concurrencies};

/// Run every candidate pair of `profile` through `detector`.
pub async fn detect_state_concurrencies(
    pool: &SqlitePool,
    profile: &StateProfile,
    detector: &ConcurrencyDetector,
) -> Result<Vec<Concurrency>> {
    let mut geometries: HashMap<RouteRef, RouteGeometry> = HashMap::new();
    let mut found = Vec::new();

    for (primary, secondary, orientation) in profile.concurrency_candidates() {
        // Load each route's geometry once per pass
        for route in [&primary, &secondary] {
            if !geometries.contains_key(route) {
                let geometry = load_route_geometry(pool, &profile.identifier, route).await?;
                geometries.insert(route.clone(), geometry);
            }
        }
        let (Some(primary_geometry), Some(secondary_geometry)) =
            (geometries.get(&primary), geometries.get(&secondary))
        else {
            continue;
        };

        if primary_geometry.segments.is_empty() || secondary_geometry.segments.is_empty() {
            debug!(
                state = %profile.identifier,
                %primary,
                %secondary,
                "Concurrency candidate has no stored segments, skipping"
            );
            continue;
        }

        let matches = detector.detect(primary_geometry, secondary_geometry, orientation);
        debug!(
            state = %profile.identifier,
            %primary,
            %secondary,
            ?orientation,
            matches = matches.len(),
            "Checked concurrency candidate"
        );
        found.extend(matches);
    }

    Ok(found)
}

/// Detect and replace a state's concurrencies. Returns how many were stored.
pub async fn run_concurrency_pass(
    pool: &SqlitePool,
    profile: &StateProfile,
    detector: &ConcurrencyDetector,
) -> Result<usize> {
    let found = detect_state_concurrencies(pool, profile, detector).await?;
    replace_concurrencies(pool, &profile.identifier, &found).await?;
    info!(
        state = %profile.identifier,
        concurrencies = found.len(),
        "Concurrency pass complete"
    );
    Ok(found.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{init_database, load_concurrencies, write_state_segments};
    use hwy_core::{Direction, Position, RouteSignType, SegmentDraft};

    fn column(
        route: &str,
        sign_type: RouteSignType,
        index: u32,
        direction: Direction,
        lon: f64,
        from_lat: f64,
        count: usize,
    ) -> SegmentDraft {
        SegmentDraft {
            route_number: route.to_string(),
            sign_type,
            segment_index: index,
            direction,
            coordinates: (0..count)
                .map(|i| Position::new(lon, from_lat + i as f64 * 0.01))
                .collect(),
            length_m: 0.0,
        }
    }

    #[tokio::test]
    async fn stores_same_way_and_wrong_way_matches() {
        let db = init_database(":memory:", 1).await.unwrap();
        let mut profile = StateProfile::new("MD", "Maryland", 24);
        profile
            .concurrencies
            .insert("US-50".parse().unwrap(), vec!["US-301".parse().unwrap()]);
        profile
            .wrong_way_concurrencies
            .insert("I-95".parse().unwrap(), vec!["I-495".parse().unwrap()]);
        // Candidate with nothing stored.
        profile
            .concurrencies
            .insert("US-1".parse().unwrap(), vec!["US-29".parse().unwrap()]);

        let us = RouteSignType::UsHighway;
        let interstate = RouteSignType::Interstate;
        let drafts = vec![
            column("50", us, 0, Direction::N, -76.0, 39.00, 11),
            column("50", us, 1, Direction::N, -76.0, 39.20, 11),
            column("301", us, 0, Direction::N, -75.999, 39.05, 21),
            column("95", interstate, 0, Direction::N, -77.0, 39.00, 11),
            column("95", interstate, 1, Direction::N, -77.0, 39.20, 11),
            column("495", interstate, 0, Direction::S, -76.999, 39.05, 21),
        ];
        write_state_segments(db.pool(), &profile, &drafts).await.unwrap();

        let stored = run_concurrency_pass(db.pool(), &profile, &ConcurrencyDetector::default())
            .await
            .unwrap();
        assert_eq!(stored, 2);

        let rows = load_concurrencies(db.pool(), "MD").await.unwrap();
        assert_eq!(rows[0].route1.to_string(), "US-50");
        assert_eq!(rows[0].route2.to_string(), "US-301");
        assert_eq!((rows[0].start_point_index, rows[0].end_point_index), (5, 15));
        assert!(rows[0].first_segment_id < rows[0].last_segment_id);

        assert_eq!(rows[1].route1.to_string(), "I-95");
        assert_eq!((rows[1].start_point_index, rows[1].end_point_index), (15, 5));
        assert!(rows[1].first_segment_id > rows[1].last_segment_id);
    }
}
