//! GeoJSON shapes and the spatial filter.

use serde::Deserialize;

const EPSILON: f64 = 1e-12;

/// A GeoJSON position. Extra ordinates such as altitude are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "Vec<f64>")]
pub struct Position {
    pub lon: f64,
    pub lat: f64,
}

impl From<Vec<f64>> for Position {
    fn from(coords: Vec<f64>) -> Self {
        Self {
            lon: coords.first().copied().unwrap_or(f64::NAN),
            lat: coords.get(1).copied().unwrap_or(f64::NAN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Polygon {
        coordinates: Vec<Vec<Position>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Position>>>,
    },
    #[serde(other)]
    Unsupported,
}

impl Geometry {
    /// Boundary points count as inside; points strictly inside a hole do not.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let point = Position { lon, lat };
        match self {
            Geometry::Polygon { coordinates } => polygon_contains(coordinates, point),
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().any(|polygon| polygon_contains(polygon, point))
            }
            Geometry::Unsupported => false,
        }
    }
}

fn polygon_contains(rings: &[Vec<Position>], point: Position) -> bool {
    let Some((exterior, holes)) = rings.split_first() else {
        return false;
    };
    ring_contains(exterior, point, true)
        && !holes.iter().any(|hole| ring_contains(hole, point, false))
}

/// Even-odd ray cast with an explicit boundary check.
fn ring_contains(ring: &[Position], point: Position, include_boundary: bool) -> bool {
    if ring.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[j];
        if on_segment(point, a, b) {
            return include_boundary;
        }
        if (a.lat > point.lat) != (b.lat > point.lat)
            && point.lon < (b.lon - a.lon) * (point.lat - a.lat) / (b.lat - a.lat) + a.lon
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn on_segment(p: Position, a: Position, b: Position) -> bool {
    let cross = (p.lat - a.lat) * (b.lon - a.lon) - (p.lon - a.lon) * (b.lat - a.lat);
    if cross.abs() > EPSILON {
        return false;
    }
    p.lon >= a.lon.min(b.lon) - EPSILON
        && p.lon <= a.lon.max(b.lon) + EPSILON
        && p.lat >= a.lat.min(b.lat) - EPSILON
        && p.lat <= a.lat.max(b.lat) + EPSILON
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum FeatureId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for FeatureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureId::Number(n) => write!(f, "{}", n),
            FeatureId::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub id: Option<FeatureId>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

impl Feature {
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureCollection {
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn find(&self, id: &FeatureId) -> Option<&Feature> {
        self.features.iter().find(|f| f.id.as_ref() == Some(id))
    }
}

/// Identity of a selectable shape: the overlay it came from and its feature id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeId {
    pub overlay: String,
    pub feature: Option<FeatureId>,
}

#[derive(Debug, Clone)]
pub struct Shape {
    pub id: ShapeId,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, Default)]
pub struct SpatialFilter {
    active: Option<Shape>,
}

impl SpatialFilter {
    /// Selecting the active shape again clears the filter; any other shape
    /// replaces it. Shapes are compared by identity, not geometry.
    pub fn toggle(&mut self, shape: Option<Shape>) {
        let same = match (&self.active, &shape) {
            (Some(active), Some(shape)) => active.id == shape.id,
            _ => false,
        };
        self.active = if same { None } else { shape };
    }

    pub fn clear(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<&Shape> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Without an active shape every point is admitted. With one, points
    /// without coordinates are not.
    pub fn admits(&self, position: Option<(f64, f64)>) -> bool {
        match (&self.active, position) {
            (None, _) => true,
            (Some(shape), Some((lon, lat))) => shape.geometry.contains(lon, lat),
            (Some(_), None) => false,
        }
    }
}
