//! Concurrency detection.
//!
//! A concurrency shows up as a gap in the primary route: where two routes
//! share a roadway the source data usually carries the geometry only once,
//! under the secondary route. The end of one primary segment and the start of
//! the next are matched against each secondary segment; when both fall close
//! to the secondary geometry the gap is a validated concurrency.

use serde::{Deserialize, Serialize};

use crate::models::{Concurrency, RouteGeometry, SegmentGeometry};
use crate::spatial::find_nearest_point_index;

/// Maximum distance between a primary gap endpoint and the secondary route.
pub const DEFAULT_THRESHOLD_M: f64 = 500.0;

/// Whether the two routes travel the same way over the shared roadway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    SameWay,
    /// The routes' mainline directions oppose each other, e.g. one route's
    /// northbound lanes carry the other's southbound traffic.
    WrongWay,
}

/// Tests primary/secondary route pairs against a distance threshold.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyDetector {
    pub threshold_m: f64,
}

impl Default for ConcurrencyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_M)
    }
}

impl ConcurrencyDetector {
    pub fn new(threshold_m: f64) -> Self {
        Self { threshold_m }
    }

    /// Every validated concurrency of `primary` over `secondary`.
    ///
    /// Segments of both routes must be ordered by ascending segment id.
    pub fn detect(
        &self,
        primary: &RouteGeometry,
        secondary: &RouteGeometry,
        orientation: Orientation,
    ) -> Vec<Concurrency> {
        let mut found = Vec::new();
        for pair in primary.segments.windows(2) {
            let (before, after) = (&pair[0], &pair[1]);
            // The pair straddles a direction change, not a shared stretch.
            if before.direction.is_mainline() != after.direction.is_mainline() {
                continue;
            }
            for candidate in &secondary.segments {
                if direction_mismatch(before, candidate, orientation) {
                    continue;
                }
                if let Some(concurrency) =
                    self.match_gap(primary, secondary, before, after, candidate, orientation)
                {
                    found.push(concurrency);
                }
            }
        }
        found
    }

    fn match_gap(
        &self,
        primary: &RouteGeometry,
        secondary: &RouteGeometry,
        before: &SegmentGeometry,
        after: &SegmentGeometry,
        candidate: &SegmentGeometry,
        orientation: Orientation,
    ) -> Option<Concurrency> {
        let gap_start = *before.points.last()?;
        let gap_end = *after.points.first()?;

        let (start_index, start_distance) = find_nearest_point_index(&candidate.points, gap_start)?;
        let (end_index, end_distance) = find_nearest_point_index(&candidate.points, gap_end)?;
        if start_distance >= self.threshold_m || end_distance >= self.threshold_m {
            return None;
        }

        let concurrency = match orientation {
            Orientation::SameWay => Concurrency {
                route1: primary.route.clone(),
                route2: secondary.route.clone(),
                first_segment_id: before.id,
                last_segment_id: after.id,
                route2_segment_id: candidate.id,
                start_point_index: start_index,
                end_point_index: end_index,
            },
            Orientation::WrongWay => Concurrency {
                route1: primary.route.clone(),
                route2: secondary.route.clone(),
                first_segment_id: after.id,
                last_segment_id: before.id,
                route2_segment_id: candidate.id,
                start_point_index: end_index,
                end_point_index: start_index,
            },
        };
        Some(concurrency)
    }
}

/// Same-way pairs need matching mainline-ness, wrong-way pairs need opposing.
fn direction_mismatch(
    primary: &SegmentGeometry,
    secondary: &SegmentGeometry,
    orientation: Orientation,
) -> bool {
    let differ = primary.direction.is_mainline() ^ secondary.direction.is_mainline();
    match orientation {
        Orientation::SameWay => differ,
        Orientation::WrongWay => !differ,
    }
}
