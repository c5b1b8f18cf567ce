//! Map overlay descriptors handed to the map renderer.

use crate::spatial::{Feature, FeatureId, Shape, ShapeId};

/// d3 `schemeTableau10`
const TABLEAU10: [&str; 10] = [
    "#4e79a7", "#f28e2c", "#e15759", "#76b7b2", "#59a14f", "#edc949", "#af7aa1", "#ff9da7",
    "#9c755f", "#bab0ab",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Overlay {
    Basin,
    Huc12Basins,
    WaterbodyRegions,
}

/// Presentation properties for one feature. `None` leaves the renderer default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathStyle {
    pub fill_opacity: Option<f64>,
    pub weight: Option<f64>,
    pub color: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub enum FeatureBinding {
    /// Drawn only; clicks pass through.
    Inert,
    /// Clicking the feature toggles it as the spatial filter.
    Selectable { shape: Shape, tooltip: String },
}

impl Overlay {
    pub const ALL: [Overlay; 3] = [Overlay::Basin, Overlay::Huc12Basins, Overlay::WaterbodyRegions];

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.id() == id)
    }

    pub fn id(&self) -> &'static str {
        match self {
            Overlay::Basin => "basin",
            Overlay::Huc12Basins => "huc12",
            Overlay::WaterbodyRegions => "regions",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Overlay::Basin => "Basin",
            Overlay::Huc12Basins => "HUC12 Basins",
            Overlay::WaterbodyRegions => "Waterbody Regions",
        }
    }

    pub fn url(&self) -> &'static str {
        match self {
            Overlay::Basin => "gis/basin.geojson",
            Overlay::Huc12Basins => "gis/huc12.geojson",
            Overlay::WaterbodyRegions => "gis/regions.geojson",
        }
    }

    pub fn interactive(&self) -> bool {
        !matches!(self, Overlay::Basin)
    }

    pub fn visible_by_default(&self) -> bool {
        false
    }

    pub fn style(&self, feature: &Feature) -> PathStyle {
        match self {
            Overlay::Basin => PathStyle {
                fill_opacity: Some(0.0),
                ..PathStyle::default()
            },
            Overlay::Huc12Basins => PathStyle {
                fill_opacity: Some(0.0),
                weight: Some(2.0),
                color: None,
            },
            Overlay::WaterbodyRegions => PathStyle {
                fill_opacity: None,
                weight: Some(2.0),
                color: Some(region_color(feature.id.as_ref())),
            },
        }
    }

    pub fn bind_feature(&self, feature: &Feature) -> FeatureBinding {
        if !self.interactive() {
            return FeatureBinding::Inert;
        }
        let Some(geometry) = feature.geometry.clone() else {
            return FeatureBinding::Inert;
        };

        let tooltip = ["name", "NAME", "huc12", "HUC12"]
            .iter()
            .find_map(|key| feature.property_str(key))
            .map(str::to_string)
            .unwrap_or_else(|| match &feature.id {
                Some(id) => format!("{} {}", self.title(), id),
                None => self.title().to_string(),
            });

        FeatureBinding::Selectable {
            shape: Shape {
                id: ShapeId {
                    overlay: self.id().to_string(),
                    feature: feature.id.clone(),
                },
                geometry,
            },
            tooltip,
        }
    }
}

pub fn default_overlays() -> Vec<Overlay> {
    Overlay::ALL
        .into_iter()
        .filter(|o| o.visible_by_default())
        .collect()
}

fn region_color(id: Option<&FeatureId>) -> &'static str {
    match id {
        Some(FeatureId::Number(n)) => TABLEAU10[n.rem_euclid(TABLEAU10.len() as i64) as usize],
        _ => TABLEAU10[0],
    }
}
