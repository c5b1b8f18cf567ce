//! Filter pipeline over result summaries.
//!
//! Each stage is a stable filter that returns its input untouched when its
//! parameter is neutral. [`apply`] runs the stages in a fixed order:
//! core network, time range, station membership, variable membership.

use crate::catalogue::Catalogue;
use crate::models::{ResultSummary, StationId, TimeRange, VariableId};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct FilterParams {
    pub core_only: bool,
    pub time_range: TimeRange,
    /// The user's chosen stations. Never the visible-station set.
    pub station_ids: BTreeSet<StationId>,
    pub variable_ids: BTreeSet<VariableId>,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            core_only: true,
            time_range: TimeRange::default(),
            station_ids: BTreeSet::new(),
            variable_ids: BTreeSet::new(),
        }
    }
}

pub fn by_core_network(results: Vec<&ResultSummary>, core_only: bool) -> Vec<&ResultSummary> {
    if !core_only {
        return results;
    }
    results.into_iter().filter(|r| r.core).collect()
}

/// Keeps results whose `[start, end]` overlaps the range.
pub fn by_time_range<'a>(
    results: Vec<&'a ResultSummary>,
    range: &TimeRange,
) -> Vec<&'a ResultSummary> {
    if range.is_unbounded() {
        return results;
    }
    results.into_iter().filter(|r| r.overlaps(range)).collect()
}

pub fn by_stations<'a>(
    results: Vec<&'a ResultSummary>,
    chosen: &BTreeSet<StationId>,
) -> Vec<&'a ResultSummary> {
    if chosen.is_empty() {
        return results;
    }
    results
        .into_iter()
        .filter(|r| chosen.contains(&r.station_id))
        .collect()
}

/// An empty selection admits the core variables. When no core variables are
/// known either (variables not loaded yet) the stage does nothing.
pub fn by_variables<'a>(
    results: Vec<&'a ResultSummary>,
    chosen: &BTreeSet<VariableId>,
    core_variables: &BTreeSet<VariableId>,
) -> Vec<&'a ResultSummary> {
    let admitted = if chosen.is_empty() { core_variables } else { chosen };
    if admitted.is_empty() {
        return results;
    }
    results
        .into_iter()
        .filter(|r| admitted.contains(&r.variable_id))
        .collect()
}

pub fn apply<'a>(catalogue: &'a Catalogue, params: &FilterParams) -> Vec<&'a ResultSummary> {
    let total = catalogue.results().len();
    let results: Vec<&ResultSummary> = catalogue.results().iter().collect();

    let results = by_core_network(results, params.core_only);
    let after_core = results.len();

    let results = by_time_range(results, &params.time_range);
    let after_time = results.len();

    let results = by_stations(results, &params.station_ids);
    let after_stations = results.len();

    let results = by_variables(results, &params.variable_ids, &catalogue.core_variable_ids());

    debug!(
        "Result filter: {} total, {} core, {} in range, {} chosen stations, {} variables",
        total,
        after_core,
        after_time,
        after_stations,
        results.len()
    );

    results
}
