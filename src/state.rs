//! Application state: the catalogue, the user's filter parameters and the
//! named actions that mutate them.
//!
//! Derived views (filtered results, value counts, statistics, visibility)
//! are never stored. Every accessor recomputes from the current state, so a
//! changed input can not leave a stale view behind.

use crate::catalogue::Catalogue;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::filters::{self, FilterParams};
use crate::models::{
    ResultId, ResultSummary, Station, StationId, TimeRange, Value, Variable, VariableId,
};
use crate::spatial::{Shape, SpatialFilter};
use crate::stats::{value_count_by_station, CountStats, QuantileRange, ValueCounts};
use crate::visibility::{Visibility, VisibilityResolver};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct AppState {
    catalogue: Catalogue,
    params: FilterParams,
    spatial: SpatialFilter,
    quantiles: QuantileRange,
    selected_station: Option<StationId>,
    selected_variable: Option<VariableId>,
    compare: Vec<ResultId>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: FilterParams, quantiles: QuantileRange) -> Self {
        Self {
            params,
            quantiles,
            ..Self::default()
        }
    }

    /// Runs the three catalogue fetches concurrently. Each collection that
    /// arrives is applied; the first failure is returned afterwards.
    pub async fn load_catalogue(&mut self, fetcher: &Fetcher, core_codes: &[String]) -> Result<()> {
        let (stations, variables, results) = tokio::join!(
            fetcher.fetch_stations(core_codes),
            fetcher.fetch_variables(),
            fetcher.fetch_results()
        );

        let mut first_error = None;

        match stations {
            Ok(stations) => self.replace_stations(stations),
            Err(e) => {
                warn!("Failed to load stations: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match variables {
            Ok(variables) => self.replace_variables(variables),
            Err(e) => {
                warn!("Failed to load variables: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match results {
            Ok(results) => self.replace_results(results),
            Err(e) => {
                warn!("Failed to load results: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    "Catalogue loaded: {} stations, {} variables, {} results",
                    self.catalogue.stations().len(),
                    self.catalogue.variables().len(),
                    self.catalogue.results().len()
                );
                Ok(())
            }
        }
    }

    pub fn replace_stations(&mut self, stations: Vec<Station>) {
        self.catalogue.set_stations(stations);
    }

    pub fn replace_variables(&mut self, variables: Vec<Variable>) {
        self.catalogue.set_variables(variables);
    }

    pub fn replace_results(&mut self, results: Vec<ResultSummary>) {
        self.catalogue.set_results(results);
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    pub fn spatial_filter(&self) -> &SpatialFilter {
        &self.spatial
    }

    pub fn quantile_range(&self) -> QuantileRange {
        self.quantiles
    }

    // Actions

    pub fn set_core_only(&mut self, core_only: bool) {
        self.params.core_only = core_only;
    }

    pub fn set_time_range(&mut self, range: TimeRange) {
        self.params.time_range = range;
    }

    pub fn set_station_selection(
        &mut self,
        ids: impl IntoIterator<Item = StationId>,
    ) -> Result<()> {
        let ids: BTreeSet<StationId> = ids.into_iter().collect();
        for &id in &ids {
            self.catalogue.station(id)?;
        }
        debug!("Station selection set to {:?}", ids);
        self.params.station_ids = ids;
        Ok(())
    }

    pub fn set_variable_selection(
        &mut self,
        ids: impl IntoIterator<Item = VariableId>,
    ) -> Result<()> {
        let ids: BTreeSet<VariableId> = ids.into_iter().collect();
        for &id in &ids {
            self.catalogue.variable(id)?;
        }
        debug!("Variable selection set to {:?}", ids);
        self.params.variable_ids = ids;
        Ok(())
    }

    pub fn clear_variable_selection(&mut self) {
        self.params.variable_ids.clear();
        self.selected_variable = None;
    }

    /// Focuses a station. Selecting the focused station again, or `None`,
    /// clears the focus.
    pub fn select_station(&mut self, id: Option<StationId>) -> Result<()> {
        let Some(id) = id else {
            self.selected_station = None;
            return Ok(());
        };
        self.catalogue.station(id)?;
        self.selected_station = if self.selected_station == Some(id) {
            None
        } else {
            Some(id)
        };
        Ok(())
    }

    /// Focuses a variable and narrows the variable filter to it. Selecting the
    /// focused variable again clears both.
    pub fn select_variable(&mut self, id: Option<VariableId>) -> Result<()> {
        let Some(id) = id else {
            self.clear_variable_selection();
            return Ok(());
        };
        self.catalogue.variable(id)?;
        if self.selected_variable == Some(id) {
            self.clear_variable_selection();
        } else {
            self.selected_variable = Some(id);
            self.params.variable_ids = BTreeSet::from([id]);
        }
        Ok(())
    }

    pub fn toggle_spatial_filter(&mut self, shape: Option<Shape>) {
        self.spatial.toggle(shape);
    }

    pub fn set_quantile_range(&mut self, lower: f64, upper: f64) -> Result<()> {
        self.quantiles = QuantileRange::new(lower, upper)?;
        Ok(())
    }

    pub fn add_to_compare(&mut self, result_id: ResultId) -> Result<()> {
        self.catalogue.result(result_id)?;
        if !self.compare.contains(&result_id) {
            self.compare.push(result_id);
        }
        Ok(())
    }

    pub fn remove_from_compare(&mut self, result_id: ResultId) {
        self.compare.retain(|id| *id != result_id);
    }

    pub fn reset_compare(&mut self) {
        self.compare.clear();
    }

    /// Compared results still present in the catalogue, in insertion order.
    pub fn compared(&self) -> Vec<&ResultSummary> {
        self.compare
            .iter()
            .filter_map(|id| self.catalogue.find_result(*id))
            .collect()
    }

    // Derivations

    pub fn filtered_results(&self) -> Vec<&ResultSummary> {
        filters::apply(&self.catalogue, &self.params)
    }

    pub fn value_counts(&self) -> ValueCounts {
        value_count_by_station(&self.filtered_results())
    }

    pub fn count_stats(&self) -> Option<CountStats> {
        CountStats::from_counts(&self.value_counts())
    }

    pub fn visibility(&self) -> Visibility {
        let counts = self.value_counts();
        VisibilityResolver::new(self.params.core_only, &self.spatial, &counts, &self.quantiles)
            .resolve(self.catalogue.stations())
    }

    pub fn visible_stations(&self) -> Vec<&Station> {
        let visibility = self.visibility();
        self.catalogue
            .stations()
            .iter()
            .filter(|s| visibility.is_visible(s.id))
            .collect()
    }

    /// Variables the variable stage admits: the chosen set, or the core
    /// variables when nothing is chosen.
    pub fn effective_variables(&self) -> Vec<&Variable> {
        let ids = if self.params.variable_ids.is_empty() {
            self.catalogue.core_variable_ids()
        } else {
            self.params.variable_ids.clone()
        };
        ids.iter()
            .filter_map(|id| self.catalogue.find_variable(*id))
            .collect()
    }

    pub fn selected_station(&self) -> Option<&Station> {
        self.selected_station
            .and_then(|id| self.catalogue.find_station(id))
    }

    pub fn selected_variable(&self) -> Option<&Variable> {
        self.selected_variable
            .and_then(|id| self.catalogue.find_variable(id))
    }

    /// Measurements for one station/variable pair over the current time range.
    pub async fn fetch_values(
        &self,
        fetcher: &Fetcher,
        station_id: StationId,
        variable_id: VariableId,
    ) -> Result<Vec<Value>> {
        let station = self.catalogue.station(station_id)?;
        let variable = self.catalogue.variable(variable_id)?;
        fetcher
            .fetch_values(station, variable, &self.params.time_range)
            .await
    }
}
