//! Feature filtering and route bucketing.
//!
//! Decides per feature whether it belongs to a signed route, and if so which
//! (sign type, route number) bucket it lands in.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, warn};

use crate::catalog::StateProfile;
use crate::models::{
    Feature, FeatureAttributes, RouteRef, RouteSignType, FACILITY_SYSTEM_INTERSTATE,
    FACILITY_TYPE_NON_INVENTORY, FACILITY_TYPE_RAMP,
};
use crate::progress::{ProgressEvent, ProgressSink};

/// Route labels longer than this are source anomalies and get skipped.
pub const MAX_ROUTE_LABEL_LEN: usize = 4;

const PROGRESS_INTERVAL: usize = 1_000;

/// Why a feature was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Discard {
    EmptyGeometry,
    UnsignedRoute,
    ZeroRouteNumber,
    Ramp,
    StateException,
    OversizedRouteNumber,
}

/// Bucket key. Orders by sign type, then numerically by route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub sign_type: RouteSignType,
    pub number: u32,
    /// Route number as stored, including any alphabetic suffix.
    pub label: String,
}

impl RouteKey {
    pub fn route(&self) -> RouteRef {
        RouteRef::new(self.sign_type, self.label.clone())
    }
}

/// Retained features grouped by route, each bucket in input order.
#[derive(Debug, Clone, Default)]
pub struct RouteBuckets {
    buckets: BTreeMap<RouteKey, Vec<Feature>>,
}

impl RouteBuckets {
    pub fn insert(&mut self, key: RouteKey, feature: Feature) {
        self.buckets.entry(key).or_default().push(feature);
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RouteKey, &[Feature])> {
        self.buckets.iter().map(|(key, features)| (key, features.as_slice()))
    }

    pub fn into_inner(self) -> BTreeMap<RouteKey, Vec<Feature>> {
        self.buckets
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyStats {
    pub processed: usize,
    pub retained: usize,
    pub discarded: HashMap<Discard, usize>,
}

impl ClassifyStats {
    pub fn discarded_for(&self, reason: Discard) -> usize {
        self.discarded.get(&reason).copied().unwrap_or(0)
    }

    pub fn filtered(&self) -> usize {
        self.processed - self.retained
    }
}

/// Classify one feature against a state's tables.
pub fn classify_feature(profile: &StateProfile, feature: &Feature) -> Result<RouteKey, Discard> {
    if !feature.has_geometry() {
        return Err(Discard::EmptyGeometry);
    }
    let attributes = &feature.properties;

    let non_mainline = is_non_mainline_interstate(attributes);
    let signed = attributes.sign_type.and_then(signed_type);
    if attributes.sign_type.is_some() && signed.is_none() && !non_mainline {
        return Err(Discard::UnsignedRoute);
    }

    let Some((number, label)) = resolve_route_number(attributes) else {
        return Err(Discard::ZeroRouteNumber);
    };

    if attributes.facility_type == Some(FACILITY_TYPE_RAMP) {
        return Err(Discard::Ramp);
    }

    if profile.excludes(attributes) {
        return Err(Discard::StateException);
    }

    if label.len() > MAX_ROUTE_LABEL_LEN {
        return Err(Discard::OversizedRouteNumber);
    }

    let sign_type = match signed {
        Some(sign_type) => sign_type,
        None => resolve_from_table(profile, attributes, &label),
    };

    Ok(RouteKey {
        sign_type,
        number,
        label,
    })
}

/// Classify a state's whole feature set into route buckets.
pub fn classify_features(
    profile: &StateProfile,
    features: Vec<Feature>,
    progress: &mut impl ProgressSink,
) -> (RouteBuckets, ClassifyStats) {
    let mut buckets = RouteBuckets::default();
    let mut stats = ClassifyStats::default();
    let mut oversized_warned: HashSet<String> = HashSet::new();

    progress.report(ProgressEvent::Started {
        total: features.len(),
    });

    for feature in features {
        stats.processed += 1;
        match classify_feature(profile, &feature) {
            Ok(key) => {
                stats.retained += 1;
                buckets.insert(key, feature);
            }
            Err(reason) => {
                if reason == Discard::OversizedRouteNumber {
                    let label = resolve_route_number(&feature.properties)
                        .map(|(_, label)| label)
                        .unwrap_or_default();
                    if oversized_warned.insert(label.clone()) {
                        warn!(
                            state = %profile.identifier,
                            route = %label,
                            "Skipping anomalous route number"
                        );
                    }
                }
                *stats.discarded.entry(reason).or_default() += 1;
            }
        }

        if stats.processed % PROGRESS_INTERVAL == 0 {
            progress.report(ProgressEvent::Advanced {
                processed: stats.processed,
                retained: stats.retained,
            });
        }
    }

    progress.report(ProgressEvent::Finished {
        processed: stats.processed,
        retained: stats.retained,
    });
    debug!(
        state = %profile.identifier,
        processed = stats.processed,
        retained = stats.retained,
        routes = buckets.len(),
        "Classified features"
    );

    (buckets, stats)
}

/// Interstate ramps, collectors and the non-inventory side of divided
/// interstates often carry no usable signing code but still belong to the
/// route.
fn is_non_mainline_interstate(attributes: &FeatureAttributes) -> bool {
    attributes.facility_system == Some(FACILITY_SYSTEM_INTERSTATE)
        && attributes.facility_type == Some(FACILITY_TYPE_NON_INVENTORY)
        && (!attributes.route_name.is_empty() || attributes.route_number.unwrap_or(0) > 0)
}

fn signed_type(code: i64) -> Option<RouteSignType> {
    match RouteSignType::from_code(code)? {
        RouteSignType::NotSigned => None,
        sign_type => Some(sign_type),
    }
}

fn resolve_from_table(
    profile: &StateProfile,
    attributes: &FeatureAttributes,
    label: &str,
) -> RouteSignType {
    match profile.route_type(label) {
        RouteSignType::Interstate
            if attributes.facility_system != Some(FACILITY_SYSTEM_INTERSTATE) =>
        {
            RouteSignType::State
        }
        RouteSignType::UsHighway
            if !attributes
                .route_name
                .trim()
                .to_ascii_uppercase()
                .starts_with("US") =>
        {
            RouteSignType::State
        }
        sign_type => sign_type,
    }
}

/// Route number and label. Prefers the numeric attribute; falls back to the
/// route name.
fn resolve_route_number(attributes: &FeatureAttributes) -> Option<(u32, String)> {
    match attributes.route_number.and_then(|n| u32::try_from(n).ok()) {
        Some(number) if number > 0 => Some((number, number.to_string())),
        _ => route_number_from_name(&attributes.route_name),
    }
}

/// Parse names like `IS95`, `US 40` or `MD355A`: a two-letter prefix, then a
/// number with an optional alphabetic suffix. Zero and unparsable numbers
/// yield `None`.
pub fn route_number_from_name(name: &str) -> Option<(u32, String)> {
    let name = name.trim();
    let prefix = name.get(..2)?;
    if !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let label: String = name[2..]
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_ascii_uppercase();
    let digits_end = label
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(label.len());
    let number: u32 = label[..digits_end].parse().ok()?;
    if number == 0 {
        return None;
    }
    Some((number, label))
}
