//! Catalogue store: the fetched station, variable and result collections.
//!
//! Collections are replaced wholesale on refetch and never patched. Lookups
//! go through id-keyed indexes so derived views can hold ids instead of
//! back-references.

use crate::error::{AppError, Result};
use crate::models::{ResultId, ResultSummary, Station, StationId, Variable, VariableId};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    stations: Vec<Station>,
    variables: Vec<Variable>,
    results: Vec<ResultSummary>,
    station_index: HashMap<StationId, usize>,
    variable_index: HashMap<VariableId, usize>,
    result_index: HashMap<ResultId, usize>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stations(&mut self, stations: Vec<Station>) {
        self.station_index = build_index(&stations, |s| s.id, "station");
        self.stations = stations;
        self.denormalize_core();
    }

    pub fn set_variables(&mut self, variables: Vec<Variable>) {
        self.variable_index = build_index(&variables, |v| v.id, "variable");
        self.variables = variables;
    }

    pub fn set_results(&mut self, results: Vec<ResultSummary>) {
        self.result_index = build_index(&results, |r| r.id, "result");
        self.results = results;
        self.denormalize_core();
    }

    /// A result inherits the core flag of its station. Results whose station
    /// is not loaded keep the flag from their own payload.
    fn denormalize_core(&mut self) {
        let stations = &self.stations;
        let index = &self.station_index;
        let mut updated = 0;
        for result in &mut self.results {
            if let Some(&i) = index.get(&result.station_id) {
                if result.core != stations[i].core {
                    result.core = stations[i].core;
                    updated += 1;
                }
            }
        }
        if updated > 0 {
            debug!("Updated core flag on {} results from their stations", updated);
        }
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn results(&self) -> &[ResultSummary] {
        &self.results
    }

    pub fn is_loaded(&self) -> bool {
        !self.stations.is_empty() && !self.variables.is_empty() && !self.results.is_empty()
    }

    pub fn find_station(&self, id: StationId) -> Option<&Station> {
        self.station_index.get(&id).map(|&i| &self.stations[i])
    }

    pub fn station(&self, id: StationId) -> Result<&Station> {
        self.find_station(id).ok_or(AppError::NotFound {
            entity: "Station",
            id,
        })
    }

    pub fn station_code(&self, id: StationId) -> Option<&str> {
        self.find_station(id).map(|s| s.code.as_str())
    }

    pub fn find_variable(&self, id: VariableId) -> Option<&Variable> {
        self.variable_index.get(&id).map(|&i| &self.variables[i])
    }

    pub fn variable(&self, id: VariableId) -> Result<&Variable> {
        self.find_variable(id).ok_or(AppError::NotFound {
            entity: "Variable",
            id,
        })
    }

    pub fn find_result(&self, id: ResultId) -> Option<&ResultSummary> {
        self.result_index.get(&id).map(|&i| &self.results[i])
    }

    pub fn result(&self, id: ResultId) -> Result<&ResultSummary> {
        self.find_result(id).ok_or(AppError::NotFound {
            entity: "Result",
            id,
        })
    }

    pub fn core_variable_ids(&self) -> BTreeSet<VariableId> {
        self.variables
            .iter()
            .filter(|v| v.core)
            .map(|v| v.id)
            .collect()
    }
}

fn build_index<T>(items: &[T], key: impl Fn(&T) -> i64, entity: &str) -> HashMap<i64, usize> {
    let mut index = HashMap::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if index.insert(key(item), i).is_some() {
            warn!("Duplicate {} id {} in catalogue, keeping the last", entity, key(item));
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn station(id: StationId, code: &str, core: bool) -> Station {
        Station {
            id,
            code: code.to_string(),
            name: None,
            description: None,
            latitude: Some(43.0),
            longitude: Some(-70.8),
            core,
        }
    }

    fn result(id: ResultId, station_id: StationId) -> ResultSummary {
        ResultSummary {
            id,
            station_id,
            variable_id: 1,
            start: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            n_values: 10,
            core: false,
        }
    }

    #[test]
    fn test_results_inherit_station_core_flag() {
        let mut catalogue = Catalogue::new();
        catalogue.set_results(vec![result(1, 10), result(2, 20), result(3, 99)]);
        catalogue.set_stations(vec![station(10, "GRBAP", true), station(20, "OTHER", false)]);

        assert!(catalogue.result(1).unwrap().core);
        assert!(!catalogue.result(2).unwrap().core);
        assert!(!catalogue.result(3).unwrap().core);

        // Order of arrival does not matter
        let mut reversed = Catalogue::new();
        reversed.set_stations(vec![station(10, "GRBAP", true)]);
        reversed.set_results(vec![result(1, 10)]);
        assert!(reversed.result(1).unwrap().core);
    }

    #[test]
    fn test_lookup_unknown_ids_is_not_found() {
        let mut catalogue = Catalogue::new();
        catalogue.set_stations(vec![station(10, "GRBAP", true)]);

        assert_eq!(catalogue.station_code(10), Some("GRBAP"));
        let err = catalogue.station(11).unwrap_err();
        assert!(err.is_not_found());
        assert!(catalogue.variable(1).unwrap_err().is_not_found());
    }
}
