use crate::error::{AppError, Result};
use crate::parser::deserialize_timestamp;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;

pub type StationId = i64;
pub type VariableId = i64;
pub type ResultId = i64;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Station {
    #[serde(rename = "samplingfeatureid")]
    pub id: StationId,
    #[serde(rename = "samplingfeaturecode")]
    pub code: String,
    #[serde(rename = "samplingfeaturename", default)]
    pub name: Option<String>,
    #[serde(rename = "samplingfeaturedescription", default)]
    pub description: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(rename = "samplingfeaturecore", default)]
    pub core: bool,
}

impl Station {
    /// `(longitude, latitude)`, or `None` when either coordinate is missing.
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.longitude, self.latitude) {
            (Some(lon), Some(lat)) => Some((lon, lat)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Variable {
    #[serde(rename = "variableid", alias = "variable_id_pwde")]
    pub id: VariableId,
    #[serde(rename = "variablenamecv")]
    pub name: String,
    #[serde(rename = "unitsabbreviation", default)]
    pub units: Option<String>,
    #[serde(rename = "unitsid", default)]
    pub units_id: Option<i64>,
    #[serde(rename = "variablecore", alias = "core", default)]
    pub core: bool,
}

impl Variable {
    pub fn label(&self) -> String {
        match self.units.as_deref() {
            Some(units) if !units.is_empty() => format!("{} ({})", self.name, units),
            _ => self.name.clone(),
        }
    }
}

/// Summary of one station/variable time series. Holds foreign keys only.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultSummary {
    #[serde(rename = "prep_resultid", alias = "resultid")]
    pub id: ResultId,
    #[serde(rename = "samplingfeatureid")]
    pub station_id: StationId,
    #[serde(rename = "prep_variableid", alias = "variableid")]
    pub variable_id: VariableId,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub start: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub end: DateTime<Utc>,
    pub n_values: u64,
    #[serde(default)]
    pub core: bool,
}

impl ResultSummary {
    pub fn overlaps(&self, range: &TimeRange) -> bool {
        let starts_before_end = range.end.map_or(true, |end| self.start <= end);
        let ends_after_start = range.start.map_or(true, |start| self.end >= start);
        starts_before_end && ends_after_start
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Value {
    #[serde(rename = "valueid")]
    pub id: i64,
    #[serde(rename = "valuedatetime", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "valuedatetimeutcoffset", default)]
    pub utc_offset: Option<i32>,
    #[serde(rename = "datavalue")]
    pub value: f64,
    #[serde(rename = "censorcodecv", default)]
    pub censor_code: Option<String>,
}

/// A result's denormalized metadata together with its measurements.
/// Only used for export.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultValues {
    pub result_id: ResultId,
    pub feature_action_id: i64,
    pub station_id: StationId,
    pub station_code: String,
    pub action_id: i64,
    pub action_description: Option<String>,
    pub action_type: String,
    pub variable_id: VariableId,
    pub variable_code: String,
    pub variable_definition: Option<String>,
    pub variable_name: String,
    pub variable_type: String,
    pub units_id: i64,
    pub units_abbreviation: String,
    pub method_id: i64,
    pub method_code: String,
    pub method_name: String,
    pub method_description: Option<String>,
    pub method_type: String,
    pub values: Vec<Value>,
}

impl ResultValues {
    /// Source order is not guaranteed; ties keep their relative order.
    pub fn sort_values(&mut self) {
        self.values.sort_by_key(|v| v.timestamp);
    }
}

/// Inclusive instant range. A missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Calendar dates to instants: start of the first day through the last
    /// millisecond of the final day, in UTC.
    pub fn from_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            start: start
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Utc.from_utc_datetime(&dt)),
            end: end
                .and_then(|d| d.and_hms_milli_opt(23, 59, 59, 999))
                .map(|dt| Utc.from_utc_datetime(&dt)),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| AppError::Parse(format!("Invalid date '{}' (expected YYYY-MM-DD): {}", s, e)))
}
