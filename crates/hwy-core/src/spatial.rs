//! Spatial math for segment lengths and nearest-point matching.

use crate::models::LatLon;
use std::cmp::Ordering;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Bisection steps taken before the linear scan in [`find_nearest_point_index`].
pub const NEAREST_POINT_BISECTION_STEPS: usize = 2;

/// Degrees to radians, no normalization.
pub fn to_radians(angle_deg: f64) -> f64 {
    angle_deg * std::f64::consts::PI / 180.0
}

/// Calculate distance between two points in meters using Haversine formula.
///
/// # Arguments
/// * `lat1`, `lon1` - First point coordinates in decimal degrees
/// * `lat2`, `lon2` - Second point coordinates in decimal degrees
///
/// # Returns
/// Distance in meters
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = to_radians(lat1);
    let phi2 = to_radians(lat2);
    let dphi = to_radians(lat2 - lat1);
    let dlambda = to_radians(lon2 - lon1);
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// [`haversine_distance`] between two positions.
pub fn point_distance(a: LatLon, b: LatLon) -> f64 {
    haversine_distance(a.lat, a.lon, b.lat, b.lon)
}

/// Physical length of a polyline: the sum of haversine hops between
/// consecutive points. Zero for empty or single-point input.
pub fn segment_length(points: &[LatLon]) -> f64 {
    points
        .windows(2)
        .map(|pair| point_distance(pair[0], pair[1]))
        .sum()
}

/// Find the point closest to `target`, returning `(index, distance_m)`.
///
/// This is an approximation tuned for route geometry that progresses
/// monotonically in one direction. It halves the index range a fixed
/// [`NEAREST_POINT_BISECTION_STEPS`] times, keeping whichever half the target
/// appears to fall in, then scans the surviving range exhaustively. The range
/// is never re-expanded, so loops and other non-monotonic routes can return a
/// point that is not the true nearest one. Concurrency thresholds are tuned
/// against this behavior; do not swap in an exact search.
///
/// The mid distance only ends the search early on an exact hit. Both halves
/// share `mid`, so on monotonic input comparing the low and high distances
/// keeps the same half a low/mid/high comparison would; the low-to-mid and
/// high-to-mid spans settle ties.
///
/// Returns `None` for an empty point list.
pub fn find_nearest_point_index(points: &[LatLon], target: LatLon) -> Option<(usize, f64)> {
    if points.is_empty() {
        return None;
    }

    let mut low = 0usize;
    let mut high = points.len() - 1;

    for _ in 0..NEAREST_POINT_BISECTION_STEPS {
        if high - low <= 1 {
            break;
        }
        let mid = low + (high - low) / 2;

        let to_low = point_distance(points[low], target);
        let to_mid = point_distance(points[mid], target);
        let to_high = point_distance(points[high], target);
        if to_mid == 0.0 {
            return Some((mid, 0.0));
        }

        let keep_lower = match to_low.total_cmp(&to_high) {
            Ordering::Less => true,
            Ordering::Greater => false,
            // Equidistant ends: keep the half with the longer span, the target
            // sits past the midpoint of the shorter one.
            Ordering::Equal => {
                let low_to_mid = point_distance(points[low], points[mid]);
                let high_to_mid = point_distance(points[high], points[mid]);
                low_to_mid >= high_to_mid
            }
        };

        if keep_lower {
            high = mid;
        } else {
            low = mid;
        }
    }

    points[low..=high]
        .iter()
        .enumerate()
        .map(|(offset, point)| (low + offset, point_distance(*point, target)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}
