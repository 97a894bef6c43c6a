//! Core data models for highway segment reconstruction.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// A position in decimal degrees, latitude first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A source position. GIS sources encode these longitude first (`[lon, lat]`),
/// optionally followed by Z/M ordinates which are dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lon: f64,
    pub lat: f64,
}

impl Position {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl TryFrom<Vec<f64>> for Position {
    type Error = String;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        match values.as_slice() {
            [lon, lat, ..] => Ok(Self::new(*lon, *lat)),
            _ => Err(format!(
                "position needs at least 2 ordinates, got {}",
                values.len()
            )),
        }
    }
}

impl From<Position> for LatLon {
    fn from(position: Position) -> Self {
        LatLon::new(position.lat, position.lon)
    }
}

/// Polyline geometry of a feature. Other geometry kinds never reach the
/// pipeline; sources map them to an absent geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
}

impl Geometry {
    /// True when the geometry carries no positions at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Geometry::LineString(line) => line.is_empty(),
            Geometry::MultiLineString(parts) => parts.iter().all(Vec::is_empty),
        }
    }
}

/// Feature attributes, normalized across shapefile-style and feature-server
/// field names. Missing or unparsable values are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureAttributes {
    #[serde(
        default,
        alias = "Route_ID",
        alias = "ROUTE_ID",
        alias = "RouteID",
        deserialize_with = "lenient_string"
    )]
    pub route_id: String,
    #[serde(
        default,
        alias = "Route_Number",
        alias = "ROUTE_NUMBER",
        alias = "RouteNumber",
        deserialize_with = "lenient_int"
    )]
    pub route_number: Option<i64>,
    #[serde(
        default,
        alias = "Route_Name",
        alias = "ROUTE_NAME",
        alias = "RouteName",
        deserialize_with = "lenient_string"
    )]
    pub route_name: String,
    /// Route signing code (HPMS `ROUTE_SIGNING`).
    #[serde(
        default,
        alias = "Route_Signing",
        alias = "ROUTE_SIGNING",
        alias = "route_signing",
        deserialize_with = "lenient_int"
    )]
    pub sign_type: Option<i64>,
    /// Functional system code (HPMS `F_SYSTEM`); 1 is Interstate.
    #[serde(
        default,
        alias = "F_System",
        alias = "F_SYSTEM",
        alias = "f_system",
        deserialize_with = "lenient_int"
    )]
    pub facility_system: Option<i64>,
    #[serde(
        default,
        alias = "Facility_Type",
        alias = "FACILITY_TYPE",
        deserialize_with = "lenient_int"
    )]
    pub facility_type: Option<i64>,
    #[serde(
        default,
        alias = "State_Code",
        alias = "STATE_CODE",
        deserialize_with = "lenient_int"
    )]
    pub state_code: Option<i64>,
    /// Linear-reference milepoint where the fragment starts.
    #[serde(
        default,
        alias = "Begin_Point",
        alias = "BEGIN_POINT",
        deserialize_with = "lenient_float"
    )]
    pub begin_point: Option<f64>,
}

impl FeatureAttributes {
    /// Normalize a feature's `properties` object. An object that still
    /// can't be read (a field present under two spellings) yields empty
    /// attributes, which the classifier discards.
    pub fn from_properties(properties: Map<String, Value>) -> Self {
        match serde_json::from_value(Value::Object(properties)) {
            Ok(attributes) => attributes,
            Err(e) => {
                warn!("Unreadable feature properties: {}", e);
                Self::default()
            }
        }
    }
}

/// One raw input record from a GIS source.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Option<Geometry>,
    pub properties: FeatureAttributes,
}

impl Feature {
    pub fn new(geometry: Geometry, properties: FeatureAttributes) -> Self {
        Self {
            geometry: Some(geometry),
            properties,
        }
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry.as_ref().is_some_and(|g| !g.is_empty())
    }
}

/// HPMS facility type for ramps.
pub const FACILITY_TYPE_RAMP: i64 = 4;
/// HPMS facility type for the non-inventory direction of a divided road.
pub const FACILITY_TYPE_NON_INVENTORY: i64 = 6;
/// HPMS functional system code for Interstates.
pub const FACILITY_SYSTEM_INTERSTATE: i64 = 1;

/// Route signing classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSignType {
    NotSigned = 1,
    Interstate = 2,
    UsHighway = 3,
    State = 4,
}

impl RouteSignType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::NotSigned),
            2 => Some(Self::Interstate),
            3 => Some(Self::UsHighway),
            4 => Some(Self::State),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    /// Label prefix used in route references (`I-95`, `US-40`, `SR-2`).
    pub fn prefix(self) -> &'static str {
        match self {
            Self::NotSigned => "NS",
            Self::Interstate => "I",
            Self::UsHighway => "US",
            Self::State => "SR",
        }
    }
}

/// Travel direction of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    N,
    E,
    S,
    W,
}

impl Direction {
    /// N and E are the mainline (increasing) directions.
    pub fn is_mainline(self) -> bool {
        matches!(self, Direction::N | Direction::E)
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::N => Direction::S,
            Direction::S => Direction::N,
            Direction::E => Direction::W,
            Direction::W => Direction::E,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Direction::N => 'N',
            Direction::E => 'E',
            Direction::S => 'S',
            Direction::W => 'W',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'N' => Some(Direction::N),
            'E' => Some(Direction::E),
            'S' => Some(Direction::S),
            'W' => Some(Direction::W),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A signed route: sign type plus route number label (which may carry an
/// alphabetic suffix, e.g. `US-1A`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RouteRef {
    pub sign_type: RouteSignType,
    pub number: String,
}

impl RouteRef {
    pub fn new(sign_type: RouteSignType, number: impl Into<String>) -> Self {
        Self {
            sign_type,
            number: number.into(),
        }
    }
}

impl fmt::Display for RouteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.sign_type.prefix(), self.number)
    }
}

impl FromStr for RouteRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        // Longer prefixes first so "US" is not read as something else.
        let prefixes = [
            ("US", RouteSignType::UsHighway),
            ("SR", RouteSignType::State),
            ("ST", RouteSignType::State),
            ("NS", RouteSignType::NotSigned),
            ("I", RouteSignType::Interstate),
        ];
        for (prefix, sign_type) in prefixes {
            if let Some(rest) = upper.strip_prefix(prefix) {
                let number = rest.trim_start_matches(['-', ' ']).trim();
                if number.is_empty() || !number.starts_with(|c: char| c.is_ascii_digit()) {
                    return Err(format!("route reference '{trimmed}' has no route number"));
                }
                return Ok(RouteRef::new(sign_type, number));
            }
        }
        Err(format!("route reference '{trimmed}' has an unknown prefix"))
    }
}

impl TryFrom<String> for RouteRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RouteRef> for String {
    fn from(route: RouteRef) -> Self {
        route.to_string()
    }
}

/// A segment produced by the assembler, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDraft {
    pub route_number: String,
    pub sign_type: RouteSignType,
    /// Zero-based index within (route, direction, sign type).
    pub segment_index: u32,
    pub direction: Direction,
    /// Source-order positions, longitude first.
    pub coordinates: Vec<Position>,
    /// Filled in by the writer.
    pub length_m: f64,
}

impl SegmentDraft {
    pub fn route(&self) -> RouteRef {
        RouteRef::new(self.sign_type, self.route_number.clone())
    }

    pub fn point_count(&self) -> usize {
        self.coordinates.len()
    }

    /// Coordinates reordered latitude first.
    pub fn points(&self) -> Vec<LatLon> {
        self.coordinates.iter().copied().map(LatLon::from).collect()
    }
}

/// A stored segment's geometry, as consumed by concurrency detection.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentGeometry {
    pub id: i64,
    pub direction: Direction,
    pub points: Vec<LatLon>,
}

/// All stored segments of one route, ordered by ascending segment id.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteGeometry {
    pub route: RouteRef,
    pub segments: Vec<SegmentGeometry>,
}

/// A validated stretch where `route1` runs on the roadway of `route2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concurrency {
    pub route1: RouteRef,
    pub route2: RouteRef,
    pub first_segment_id: i64,
    pub last_segment_id: i64,
    pub route2_segment_id: i64,
    pub start_point_index: usize,
    pub end_point_index: usize,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_float<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
