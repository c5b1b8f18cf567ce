use crate::config::SourceConfig;
use crate::error::{AppError, Result};
use crate::models::{ResultSummary, ResultValues, Station, TimeRange, Value, Variable};
use crate::overlay::Overlay;
use crate::parser::Parser;
use crate::spatial::FeatureCollection;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

const STATIONS_PATH: &str = "prep_stations";
const VARIABLES_PATH: &str = "prep_variables";
const RESULTS_PATH: &str = "prep_results";
const RESULT_VALUES_PATH: &str = "results";

const VALUE_DATETIME_FIELD: &str = "timeseriesresults.timeseriesresultvalues.valuedatetime";

const VALUES_SELECT: &str = "*,variable:variables!inner(*),featureaction:featureactions!inner(*),\
timeseriesresults(*,timeseriesresultvalues(*))";

const RESULT_VALUES_SELECT: &str = "*,variable:variables!inner(*),units:units!inner(*),\
featureaction:featureactions!inner(*,samplingfeature:samplingfeatures(*),action:actions(*,method:methods(*))),\
timeseriesresults(*,timeseriesresultvalues(valueid,resultid,datavalue,valuedatetime,valuedatetimeutcoffset,censorcodecv))";

/// Read-only client for the monitoring data API.
///
/// Every request is attempted once. A non-2xx status becomes
/// [`AppError::FetchStatus`] and a transport failure [`AppError::Http`].
pub struct Fetcher {
    client: Client,
    base_url: String,
    gis_base_url: String,
}

impl Fetcher {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(60))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent("prep-explorer/0.1.0")
            .timeout(timeout)
            .build()?;

        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            client,
            gis_base_url: base_url.clone(),
            base_url,
        })
    }

    pub fn from_config(source: &SourceConfig) -> Result<Self> {
        Ok(Self::with_timeout(&source.base_url, Duration::from_secs(source.timeout_seconds))?
            .with_gis_base_url(source.gis_base_url()))
    }

    pub fn with_gis_base_url(mut self, gis_base_url: &str) -> Self {
        self.gis_base_url = gis_base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(&self, base: &str, path: &str, query: &[(String, String)]) -> Result<String> {
        let url = format!("{}/{}", base, path);
        debug!("Fetching {} ({} query parameters)", url, query.len());

        let response = self.client.get(&url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::FetchStatus {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }

    pub async fn fetch_stations(&self, core_codes: &[String]) -> Result<Vec<Station>> {
        let body = self.get_text(&self.base_url, STATIONS_PATH, &[]).await?;
        let (stations, stats) = Parser::parse_stations(&body, core_codes)?;
        info!(
            "Fetched {} stations ({} core, {} skipped)",
            stations.len(),
            stations.iter().filter(|s| s.core).count(),
            stats.parse_failures
        );
        Ok(stations)
    }

    pub async fn fetch_variables(&self) -> Result<Vec<Variable>> {
        let body = self.get_text(&self.base_url, VARIABLES_PATH, &[]).await?;
        let (variables, stats) = Parser::parse_variables(&body)?;
        info!(
            "Fetched {} variables ({} skipped)",
            variables.len(),
            stats.parse_failures
        );
        Ok(variables)
    }

    pub async fn fetch_results(&self) -> Result<Vec<ResultSummary>> {
        let body = self.get_text(&self.base_url, RESULTS_PATH, &[]).await?;
        let (results, stats) = Parser::parse_results(&body)?;
        info!(
            "Fetched {} results ({} skipped)",
            results.len(),
            stats.parse_failures
        );
        Ok(results)
    }

    /// Measurements of one station/variable pair, ordered by time.
    pub async fn fetch_values(
        &self,
        station: &Station,
        variable: &Variable,
        range: &TimeRange,
    ) -> Result<Vec<Value>> {
        let mut query = vec![
            pair("featureaction.samplingfeatureid", format!("eq.{}", station.id)),
            pair("variable.variablenamecv", format!("eq.{}", variable.name)),
        ];
        if let Some(units_id) = variable.units_id {
            query.push(pair("unitsid", format!("eq.{}", units_id)));
        }
        query.push(pair("select", VALUES_SELECT.to_string()));
        push_time_bounds(&mut query, range);

        let body = self.get_text(&self.base_url, RESULT_VALUES_PATH, &query).await?;
        let (values, _) = Parser::parse_values(&body)?;
        debug!(
            "Fetched {} values for station {} / {}",
            values.len(),
            station.code,
            variable.label()
        );
        Ok(values)
    }

    /// Export bundles for one variable across several stations. Bad-quality
    /// and NaN values are excluded by the query.
    pub async fn fetch_result_values(
        &self,
        stations: &[&Station],
        variable: &Variable,
        range: &TimeRange,
    ) -> Result<Vec<ResultValues>> {
        if stations.is_empty() {
            return Ok(Vec::new());
        }

        let station_ids = stations
            .iter()
            .map(|s| s.id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut query = vec![
            pair("featureaction.samplingfeatureid", format!("in.({})", station_ids)),
            pair("variable.variablenamecv", format!("eq.{}", variable.name)),
            pair("variable.variabletypecv", "in.(Hydrology,Water quality)".to_string()),
        ];
        if let Some(units_id) = variable.units_id {
            query.push(pair("unitsid", format!("eq.{}", units_id)));
        }
        query.push(pair(
            "timeseriesresults.timeseriesresultvalues.qualitycodecv",
            "neq.Bad".to_string(),
        ));
        query.push(pair(
            "timeseriesresults.timeseriesresultvalues.datavalue",
            "neq.NaN".to_string(),
        ));
        push_time_bounds(&mut query, range);
        query.push(pair("select", RESULT_VALUES_SELECT.to_string()));

        let body = self.get_text(&self.base_url, RESULT_VALUES_PATH, &query).await?;
        let (bundles, stats) = Parser::parse_result_values(&body)?;
        info!(
            "Fetched {} result bundles ({} values) for {} across {} stations ({} skipped)",
            bundles.len(),
            bundles.iter().map(|b| b.values.len()).sum::<usize>(),
            variable.label(),
            stations.len(),
            stats.parse_failures
        );
        Ok(bundles)
    }

    pub async fn fetch_overlay(&self, overlay: Overlay) -> Result<FeatureCollection> {
        let body = self.get_text(&self.gis_base_url, overlay.url(), &[]).await?;
        let collection: FeatureCollection = serde_json::from_str(&body).map_err(|e| {
            AppError::Parse(format!("Invalid GeoJSON for overlay {}: {}", overlay.id(), e))
        })?;
        debug!(
            "Fetched {} features for overlay {}",
            collection.features.len(),
            overlay.id()
        );
        Ok(collection)
    }
}

fn pair(key: &str, value: String) -> (String, String) {
    (key.to_string(), value)
}

fn push_time_bounds(query: &mut Vec<(String, String)>, range: &TimeRange) {
    if let Some(start) = range.start {
        query.push(pair(VALUE_DATETIME_FIELD, format!("gte.{}", iso(start))));
    }
    if let Some(end) = range.end {
        query.push(pair(VALUE_DATETIME_FIELD, format!("lte.{}", iso(end))));
    }
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
