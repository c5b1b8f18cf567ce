//! Final visible-station set.
//!
//! Combines the core flag, the spatial filter and the quantile window over
//! per-station value counts. The counts come from the filter pipeline, whose
//! station stage reads the user's chosen stations rather than this output,
//! so there is no cycle between the two.

use crate::models::{Station, StationId};
use crate::spatial::SpatialFilter;
use crate::stats::{CountStats, QuantileRange, ValueCounts};
use std::collections::BTreeMap;

pub struct VisibilityResolver<'a> {
    core_only: bool,
    spatial: &'a SpatialFilter,
    counts: &'a ValueCounts,
    window: Option<(u64, u64)>,
}

impl<'a> VisibilityResolver<'a> {
    /// Undefined statistics (no station has data) disable the quantile
    /// predicate instead of hiding every station.
    pub fn new(
        core_only: bool,
        spatial: &'a SpatialFilter,
        counts: &'a ValueCounts,
        quantiles: &QuantileRange,
    ) -> Self {
        let window = CountStats::from_counts(counts).map(|stats| stats.window(quantiles));
        Self {
            core_only,
            spatial,
            counts,
            window,
        }
    }

    pub fn window(&self) -> Option<(u64, u64)> {
        self.window
    }

    pub fn admits_core(&self, station: &Station) -> bool {
        !self.core_only || station.core
    }

    pub fn admits_spatial(&self, station: &Station) -> bool {
        self.spatial.admits(station.position())
    }

    /// Stations missing from the counts are excluded whenever a window applies.
    pub fn admits_quantile(&self, station: &Station) -> bool {
        let Some((lower, upper)) = self.window else {
            return true;
        };
        self.counts
            .get(&station.id)
            .is_some_and(|count| (lower..=upper).contains(count))
    }

    pub fn admits(&self, station: &Station) -> bool {
        self.admits_core(station) && self.admits_spatial(station) && self.admits_quantile(station)
    }

    pub fn resolve(&self, stations: &[Station]) -> Visibility {
        Visibility {
            by_station: stations.iter().map(|s| (s.id, self.admits(s))).collect(),
        }
    }
}

/// Visibility flag per catalogue station.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Visibility {
    by_station: BTreeMap<StationId, bool>,
}

impl Visibility {
    pub fn is_visible(&self, id: StationId) -> bool {
        self.by_station.get(&id).copied().unwrap_or(false)
    }

    pub fn visible_ids(&self) -> Vec<StationId> {
        self.by_station
            .iter()
            .filter(|(_, visible)| **visible)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn visible_count(&self) -> usize {
        self.by_station.values().filter(|v| **v).count()
    }
}
