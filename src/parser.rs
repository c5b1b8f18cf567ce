use crate::error::{AppError, Result};
use crate::models::{ResultSummary, ResultValues, Station, Value, Variable};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

/// Default failure threshold - fail if more than 10% of records fail to parse
const DEFAULT_FAILURE_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone)]
pub struct ParseStats {
    pub total_records: usize,
    pub parsed_successfully: usize,
    pub parse_failures: usize,
    pub failure_rate: f64,
    /// Measurements skipped inside otherwise valid records.
    pub value_failures: usize,
}

impl ParseStats {
    pub fn new() -> Self {
        Self {
            total_records: 0,
            parsed_successfully: 0,
            parse_failures: 0,
            failure_rate: 0.0,
            value_failures: 0,
        }
    }

    pub fn finalize(&mut self) {
        self.failure_rate = if self.total_records > 0 {
            self.parse_failures as f64 / self.total_records as f64
        } else {
            0.0
        };
    }

    pub fn exceeds_threshold(&self, threshold: f64) -> bool {
        self.failure_rate > threshold
    }
}

impl Default for ParseStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Record-level checks that serde cannot express.
pub trait Record {
    fn check(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

impl Record for Station {}

impl Record for Variable {}

impl Record for ResultSummary {
    fn check(&self) -> std::result::Result<(), String> {
        if self.start > self.end {
            return Err(format!(
                "result {} starts ({}) after it ends ({})",
                self.id, self.start, self.end
            ));
        }
        Ok(())
    }
}

impl Record for Value {
    fn check(&self) -> std::result::Result<(), String> {
        if !self.value.is_finite() {
            return Err(format!("value {} is not finite", self.id));
        }
        Ok(())
    }
}

pub struct Parser;

impl Parser {
    /// Parse a JSON array record by record and return the records with parse statistics
    pub fn parse_records<T>(body: &str) -> Result<(Vec<T>, ParseStats)>
    where
        T: DeserializeOwned + Record,
    {
        Self::parse_records_with_threshold(body, DEFAULT_FAILURE_THRESHOLD)
    }

    /// Parse a JSON array with a custom failure threshold
    pub fn parse_records_with_threshold<T>(
        body: &str,
        failure_threshold: f64,
    ) -> Result<(Vec<T>, ParseStats)>
    where
        T: DeserializeOwned + Record,
    {
        let items: Vec<serde_json::Value> = serde_json::from_str(body)
            .map_err(|e| AppError::Parse(format!("Expected a JSON array: {}", e)))?;

        let mut records = Vec::with_capacity(items.len());
        let mut stats = ParseStats::new();

        for (index, item) in items.into_iter().enumerate() {
            stats.total_records += 1;

            let parsed = serde_json::from_value::<T>(item)
                .map_err(|e| e.to_string())
                .and_then(|record| record.check().map(|_| record));

            match parsed {
                Ok(record) => {
                    records.push(record);
                    stats.parsed_successfully += 1;
                }
                Err(e) => {
                    stats.parse_failures += 1;
                    warn!(
                        "Failed to parse record {} (failure {}/{}): {}",
                        index, stats.parse_failures, stats.total_records, e
                    );
                }
            }
        }

        stats.finalize();

        // Validate parse success rate
        if stats.exceeds_threshold(failure_threshold) {
            return Err(AppError::Parse(format!(
                "Parse failure rate {:.1}% exceeds threshold {:.1}%: {} failures out of {} records",
                stats.failure_rate * 100.0,
                failure_threshold * 100.0,
                stats.parse_failures,
                stats.total_records
            )));
        }

        if records.is_empty() && stats.total_records > 0 {
            return Err(AppError::Parse(
                "No records successfully parsed from non-empty array".to_string(),
            ));
        }

        Ok((records, stats))
    }

    /// Stations are flagged core when the payload says so or their code is
    /// in `core_codes`, then sorted by code.
    pub fn parse_stations(body: &str, core_codes: &[String]) -> Result<(Vec<Station>, ParseStats)> {
        let (mut stations, stats) = Self::parse_records::<Station>(body)?;
        for station in &mut stations {
            station.core = station.core || core_codes.iter().any(|c| c == &station.code);
        }
        stations.sort_by(|a, b| a.code.cmp(&b.code));
        Ok((stations, stats))
    }

    pub fn parse_variables(body: &str) -> Result<(Vec<Variable>, ParseStats)> {
        Self::parse_records::<Variable>(body)
    }

    pub fn parse_results(body: &str) -> Result<(Vec<ResultSummary>, ParseStats)> {
        Self::parse_records::<ResultSummary>(body)
    }

    /// Flatten the values of every returned result into one series ordered by time.
    pub fn parse_values(body: &str) -> Result<(Vec<Value>, ParseStats)> {
        let (results, mut stats) = Self::parse_records::<RawResultSeries>(body)?;
        let mut values = Vec::new();
        for series in results.into_iter().filter_map(|r| r.timeseriesresults) {
            values.extend(parse_series_values(series.timeseriesresultvalues, &mut stats));
        }
        report_value_failures(&stats);
        values.sort_by_key(|v| v.timestamp);
        Ok((values, stats))
    }

    /// Flatten nested result payloads into export bundles. Bundles without
    /// values are dropped; values are ordered by time and bundles by result id.
    pub fn parse_result_values(body: &str) -> Result<(Vec<ResultValues>, ParseStats)> {
        let (raw, mut stats) = Self::parse_records::<RawResultValues>(body)?;
        let mut bundles: Vec<ResultValues> = raw
            .into_iter()
            .filter_map(|r| r.into_bundle(&mut stats))
            .collect();
        report_value_failures(&stats);
        for bundle in &mut bundles {
            bundle.sort_values();
        }
        bundles.sort_by_key(|b| b.result_id);
        Ok((bundles, stats))
    }
}

pub(crate) fn deserialize_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_timestamp(&s).map_err(serde::de::Error::custom)
}

/// Accepts RFC 3339, naive datetimes (assumed UTC) and bare dates.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // PostgREST emits short offsets such as "+00"
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%#z") {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(AppError::Parse(format!("Unrecognised timestamp '{}'", s)))
}

/// Measurements stay untyped until [`parse_series_values`] so one bad value
/// does not fail its whole result.
#[derive(Debug, Deserialize)]
struct RawTimeSeries {
    #[serde(default)]
    timeseriesresultvalues: Vec<serde_json::Value>,
}

/// Parse measurements one by one, skipping and counting the bad ones.
fn parse_series_values(items: Vec<serde_json::Value>, stats: &mut ParseStats) -> Vec<Value> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        let parsed = serde_json::from_value::<Value>(item)
            .map_err(|e| e.to_string())
            .and_then(|value| value.check().map(|_| value));

        match parsed {
            Ok(value) => values.push(value),
            Err(e) => {
                stats.value_failures += 1;
                debug!("Skipping measurement: {}", e);
            }
        }
    }
    values
}

fn report_value_failures(stats: &ParseStats) {
    if stats.value_failures > 0 {
        warn!(
            "Skipped {} malformed or non-finite measurements",
            stats.value_failures
        );
    }
}

#[derive(Debug, Deserialize)]
struct RawResultSeries {
    #[serde(default)]
    timeseriesresults: Option<RawTimeSeries>,
}

impl Record for RawResultSeries {}

#[derive(Debug, Deserialize)]
struct RawVariable {
    variableid: i64,
    #[serde(default)]
    variablecode: String,
    #[serde(default)]
    variabledefinition: Option<String>,
    variablenamecv: String,
    #[serde(default)]
    variabletypecv: String,
}

#[derive(Debug, Deserialize)]
struct RawUnits {
    #[serde(default)]
    unitsabbreviation: String,
}

#[derive(Debug, Deserialize)]
struct RawSamplingFeature {
    samplingfeatureid: i64,
    samplingfeaturecode: String,
}

#[derive(Debug, Deserialize)]
struct RawMethod {
    methodid: i64,
    #[serde(default)]
    methodcode: String,
    #[serde(default)]
    methodname: String,
    #[serde(default)]
    methoddescription: Option<String>,
    #[serde(default)]
    methodtypecv: String,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    actionid: i64,
    #[serde(default)]
    actiondescription: Option<String>,
    #[serde(default)]
    actiontypecv: String,
    method: RawMethod,
}

#[derive(Debug, Deserialize)]
struct RawFeatureAction {
    samplingfeature: RawSamplingFeature,
    action: RawAction,
}

#[derive(Debug, Deserialize)]
struct RawResultValues {
    resultid: i64,
    featureactionid: i64,
    unitsid: i64,
    variable: RawVariable,
    units: RawUnits,
    featureaction: RawFeatureAction,
    #[serde(default)]
    timeseriesresults: Option<RawTimeSeries>,
}

impl Record for RawResultValues {}

impl RawResultValues {
    fn into_bundle(self, stats: &mut ParseStats) -> Option<ResultValues> {
        let values = parse_series_values(self.timeseriesresults?.timeseriesresultvalues, stats);
        if values.is_empty() {
            return None;
        }

        let feature = self.featureaction.samplingfeature;
        let action = self.featureaction.action;
        let method = action.method;

        Some(ResultValues {
            result_id: self.resultid,
            feature_action_id: self.featureactionid,
            station_id: feature.samplingfeatureid,
            station_code: feature.samplingfeaturecode,
            action_id: action.actionid,
            action_description: action.actiondescription,
            action_type: action.actiontypecv,
            variable_id: self.variable.variableid,
            variable_code: self.variable.variablecode,
            variable_definition: self.variable.variabledefinition,
            variable_name: self.variable.variablenamecv,
            variable_type: self.variable.variabletypecv,
            units_id: self.unitsid,
            units_abbreviation: self.units.unitsabbreviation,
            method_id: method.methodid,
            method_code: method.methodcode,
            method_name: method.methodname,
            method_description: method.methoddescription,
            method_type: method.methodtypecv,
            values,
        })
    }
}
