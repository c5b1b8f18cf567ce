//! Multi-table CSV export.
//!
//! The artifact is a `#`-prefixed header block followed by three delimited
//! tables (stations, metadata, values). Row order is fully determined by
//! station id, result id and value timestamp. Rows are written in batches
//! with a yield to the runtime after each batch so large selections do not
//! monopolise the executor.

use crate::catalogue::Catalogue;
use crate::config::ExportConfig;
use crate::error::{AppError, Result};
use crate::models::{ResultValues, StationId, Value};
use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use csv::{QuoteStyle, Writer, WriterBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CSV_MIME_TYPE: &str = "text/csv;charset=utf-8";

const RULE: &str = "# ------------------------------------------------------------------------------";

const STATION_COLUMNS: [&str; 5] = [
    "station_id",
    "station_code",
    "station_name",
    "latitude",
    "longitude",
];

const METADATA_COLUMNS: [&str; 19] = [
    "result_id",
    "feature_action_id",
    "station_id",
    "station_code",
    "action_id",
    "action_description",
    "action_type",
    "variable_id",
    "variable_code",
    "variable_definition",
    "variable_name",
    "variable_type",
    "units_id",
    "units",
    "method_id",
    "method_code",
    "method_name",
    "method_description",
    "method_type",
];

const VALUE_COLUMNS: [&str; 10] = [
    "result_id",
    "station_id",
    "station_code",
    "variable",
    "units",
    "value_id",
    "datetime",
    "utc_offset",
    "value",
    "censor_code",
];

#[derive(Debug, Serialize)]
struct StationRow<'a> {
    station_id: StationId,
    station_code: &'a str,
    station_name: Option<&'a str>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Serialize)]
struct MetadataRow<'a> {
    result_id: i64,
    feature_action_id: i64,
    station_id: StationId,
    station_code: &'a str,
    action_id: i64,
    action_description: Option<&'a str>,
    action_type: &'a str,
    variable_id: i64,
    variable_code: &'a str,
    variable_definition: Option<&'a str>,
    variable_name: &'a str,
    variable_type: &'a str,
    units_id: i64,
    units: &'a str,
    method_id: i64,
    method_code: &'a str,
    method_name: &'a str,
    method_description: Option<&'a str>,
    method_type: &'a str,
}

impl<'a> From<&'a ResultValues> for MetadataRow<'a> {
    fn from(b: &'a ResultValues) -> Self {
        Self {
            result_id: b.result_id,
            feature_action_id: b.feature_action_id,
            station_id: b.station_id,
            station_code: &b.station_code,
            action_id: b.action_id,
            action_description: b.action_description.as_deref(),
            action_type: &b.action_type,
            variable_id: b.variable_id,
            variable_code: &b.variable_code,
            variable_definition: b.variable_definition.as_deref(),
            variable_name: &b.variable_name,
            variable_type: &b.variable_type,
            units_id: b.units_id,
            units: &b.units_abbreviation,
            method_id: b.method_id,
            method_code: &b.method_code,
            method_name: &b.method_name,
            method_description: b.method_description.as_deref(),
            method_type: &b.method_type,
        }
    }
}

#[derive(Debug, Serialize)]
struct ValueRow<'a> {
    result_id: i64,
    station_id: StationId,
    station_code: &'a str,
    variable: &'a str,
    units: &'a str,
    value_id: i64,
    datetime: String,
    utc_offset: Option<i32>,
    value: f64,
    censor_code: Option<&'a str>,
}

impl<'a> ValueRow<'a> {
    fn new(bundle: &'a ResultValues, value: &'a Value) -> Self {
        Self {
            result_id: bundle.result_id,
            station_id: bundle.station_id,
            station_code: &bundle.station_code,
            variable: &bundle.variable_name,
            units: &bundle.units_abbreviation,
            value_id: value.id,
            datetime: value.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            utc_offset: value.utc_offset,
            value: value.value,
            censor_code: value.censor_code.as_deref(),
        }
    }
}

/// A rendered export, ready to be saved under its file name.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub mime_type: &'static str,
    pub body: String,
}

impl ExportArtifact {
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, self.body.as_bytes())?;
        info!("Wrote export {} ({} bytes)", path.display(), self.body.len());
        Ok(path)
    }
}

pub struct CsvExporter {
    file_prefix: String,
    title: String,
    source_url: String,
    note: String,
    timezone: Tz,
    batch_size: usize,
}

impl CsvExporter {
    pub fn new(config: &ExportConfig) -> Result<Self> {
        Ok(Self {
            file_prefix: config.file_prefix.clone(),
            title: config.title.clone(),
            source_url: config.source_url.clone(),
            note: config.note.clone(),
            timezone: config.timezone()?,
            batch_size: config.batch_size.max(1),
        })
    }

    /// `<prefix>_YYYYMMDD_HHMM.csv` in the export timezone.
    pub fn file_name(&self, generated_at: DateTime<Utc>) -> String {
        let local = generated_at.with_timezone(&self.timezone);
        format!("{}_{}.csv", self.file_prefix, local.format("%Y%m%d_%H%M"))
    }

    pub fn header(&self, generated_at: DateTime<Utc>) -> String {
        let local = generated_at.with_timezone(&self.timezone);
        format!(
            "# {}\n# {}\n#\n# Downloaded at: {}\n#\n# {}\n",
            self.title,
            self.source_url,
            local.format("%-m/%-d/%Y %-I:%M:%S %p"),
            self.note
        )
    }

    pub async fn render(
        &self,
        bundles: &[ResultValues],
        catalogue: &Catalogue,
        generated_at: DateTime<Utc>,
    ) -> Result<ExportArtifact> {
        let mut ordered: Vec<&ResultValues> = bundles.iter().collect();
        ordered.sort_by_key(|b| b.result_id);

        let mut body = self.header(generated_at);

        let stations = self.stations_table(&ordered, catalogue).await?;
        push_section(&mut body, "stations", &stations);

        let metadata = self.metadata_table(&ordered).await?;
        push_section(&mut body, "metadata", &metadata);

        let values = self.values_table(&ordered).await?;
        push_section(&mut body, "values", &values);

        info!(
            "Rendered export of {} results ({} values)",
            ordered.len(),
            ordered.iter().map(|b| b.values.len()).sum::<usize>()
        );

        Ok(ExportArtifact {
            file_name: self.file_name(generated_at),
            mime_type: CSV_MIME_TYPE,
            body,
        })
    }

    async fn stations_table(
        &self,
        ordered: &[&ResultValues],
        catalogue: &Catalogue,
    ) -> Result<String> {
        let mut codes: BTreeMap<StationId, &str> = BTreeMap::new();
        for bundle in ordered {
            codes.entry(bundle.station_id).or_insert(&bundle.station_code);
        }

        let rows = codes.into_iter().map(|(id, code)| {
            let station = catalogue.find_station(id);
            StationRow {
                station_id: id,
                station_code: code,
                station_name: station.and_then(|s| s.name.as_deref()),
                latitude: station.and_then(|s| s.latitude),
                longitude: station.and_then(|s| s.longitude),
            }
        });
        self.write_table(&STATION_COLUMNS, rows).await
    }

    async fn metadata_table(&self, ordered: &[&ResultValues]) -> Result<String> {
        let rows = ordered.iter().map(|b| MetadataRow::from(*b));
        self.write_table(&METADATA_COLUMNS, rows).await
    }

    async fn values_table(&self, ordered: &[&ResultValues]) -> Result<String> {
        let rows = ordered.iter().flat_map(|bundle| {
            let mut values: Vec<&Value> = bundle.values.iter().collect();
            values.sort_by_key(|v| v.timestamp);
            values.into_iter().map(move |value| ValueRow::new(bundle, value))
        });
        self.write_table(&VALUE_COLUMNS, rows).await
    }

    async fn write_table<R, I>(&self, columns: &[&str], rows: I) -> Result<String>
    where
        R: Serialize,
        I: Iterator<Item = R>,
    {
        let mut writer = table_writer();
        writer.write_record(columns)?;

        let mut written = 0usize;
        for row in rows {
            writer.serialize(row)?;
            written += 1;
            if written % self.batch_size == 0 {
                debug!("Wrote {} rows, yielding", written);
                tokio::task::yield_now().await;
            }
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| AppError::Io(e.into_error()))?;
        String::from_utf8(bytes)
            .map_err(|e| AppError::InvalidData(format!("Export is not UTF-8: {}", e)))
    }
}

fn table_writer() -> Writer<Vec<u8>> {
    WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Necessary)
        .from_writer(Vec::new())
}

fn push_section(body: &mut String, name: &str, table: &str) {
    body.push_str(RULE);
    body.push('\n');
    body.push_str("# TABLE: ");
    body.push_str(name);
    body.push('\n');
    body.push_str(RULE);
    body.push('\n');
    body.push_str(table);
    body.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Station;
    use chrono::TimeZone;

    fn exporter() -> CsvExporter {
        CsvExporter::new(&ExportConfig::default()).unwrap()
    }

    fn value(id: i64, day: u32, v: f64) -> Value {
        Value {
            id,
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            utc_offset: Some(-5),
            value: v,
            censor_code: None,
        }
    }

    fn bundle(result_id: i64, station_id: i64, values: Vec<Value>) -> ResultValues {
        ResultValues {
            result_id,
            feature_action_id: result_id * 10,
            station_id,
            station_code: format!("ST{}", station_id),
            action_id: 7,
            action_description: Some("Deployment, with sonde".to_string()),
            action_type: "Instrument deployment".to_string(),
            variable_id: 3,
            variable_code: "Temp".to_string(),
            variable_definition: None,
            variable_name: "Temperature".to_string(),
            variable_type: "Water quality".to_string(),
            units_id: 96,
            units_abbreviation: "degC".to_string(),
            method_id: 1,
            method_code: "YSI".to_string(),
            method_name: "Sonde".to_string(),
            method_description: Some("Line one\nline two".to_string()),
            method_type: "Instrument deployment".to_string(),
            values,
        }
    }

    fn section<'a>(body: &'a str, name: &str) -> Vec<&'a str> {
        let marker = format!("# TABLE: {}", name);
        body.lines()
            .skip_while(|l| *l != marker)
            .skip(2)
            .take_while(|l| !l.starts_with("# ---"))
            .filter(|l| !l.is_empty())
            .collect()
    }

    #[test]
    fn test_file_name_uses_export_timezone() {
        let at = Utc.with_ymd_and_hms(2024, 7, 4, 2, 5, 0).unwrap();
        // 22:05 EDT on the previous day
        assert_eq!(exporter().file_name(at), "PREP_20240703_2205.csv");
    }

    #[test]
    fn test_header_is_fixed_text_plus_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 5).unwrap();
        let header = exporter().header(at);
        let lines: Vec<&str> = header.lines().collect();
        assert_eq!(lines[0], "# PREP | Piscataqua Watershed Data Explorer");
        assert_eq!(lines[1], "# https://prepestuaries.org/");
        assert_eq!(lines[3], "# Downloaded at: 1/15/2024 9:30:05 AM");
        assert!(lines.iter().all(|l| l.starts_with('#')));
    }

    #[test]
    fn test_values_ordered_by_result_then_time() {
        let t = |day| {
            Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0)
                .unwrap()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        };
        let bundles = vec![
            bundle(2, 20, vec![value(30, 3, 9.0)]),
            bundle(1, 10, vec![value(20, 2, 5.0), value(10, 1, 3.0)]),
        ];
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let artifact =
            tokio_test::block_on(exporter().render(&bundles, &Catalogue::new(), at)).unwrap();

        let rows = section(&artifact.body, "values");
        assert_eq!(rows[0], VALUE_COLUMNS.join(","));
        let keys: Vec<(String, String, String)> = rows[1..]
            .iter()
            .map(|r| {
                let fields: Vec<&str> = r.split(',').collect();
                (fields[0].to_string(), fields[6].to_string(), fields[8].to_string())
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                ("1".to_string(), t(1), "3.0".to_string()),
                ("1".to_string(), t(2), "5.0".to_string()),
                ("2".to_string(), t(3), "9.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_stations_deduplicated_and_enriched() {
        let mut catalogue = Catalogue::new();
        catalogue.set_stations(vec![Station {
            id: 10,
            code: "ST10".to_string(),
            name: Some("Great Bay".to_string()),
            description: None,
            latitude: Some(43.07),
            longitude: Some(-70.86),
            core: true,
        }]);
        let bundles = vec![
            bundle(3, 20, vec![value(1, 1, 1.0)]),
            bundle(1, 10, vec![value(2, 1, 1.0)]),
            bundle(2, 10, vec![value(3, 1, 1.0)]),
        ];
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let artifact = tokio_test::block_on(exporter().render(&bundles, &catalogue, at)).unwrap();

        let rows = section(&artifact.body, "stations");
        assert_eq!(
            rows,
            vec![
                "station_id,station_code,station_name,latitude,longitude",
                "10,ST10,Great Bay,43.07,-70.86",
                "20,ST20,,,",
            ]
        );
    }

    #[test]
    fn test_metadata_sorted_and_quoted() {
        let bundles = vec![bundle(9, 10, vec![]), bundle(4, 10, vec![value(1, 1, 1.0)])];
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let artifact =
            tokio_test::block_on(exporter().render(&bundles, &Catalogue::new(), at)).unwrap();

        assert!(artifact
            .body
            .contains("\"Deployment, with sonde\""));
        assert!(artifact.body.contains("\"Line one\nline two\""));

        let first_4 = artifact.body.find("\n4,40,").unwrap();
        let first_9 = artifact.body.find("\n9,90,").unwrap();
        assert!(first_4 < first_9);

        // The result without values contributes metadata but no value rows
        let values = section(&artifact.body, "values");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_quote_characters_are_doubled() {
        let mut quoted = bundle(1, 10, vec![value(1, 1, 1.0)]);
        quoted.variable_definition = Some(r#"Water temperature "in situ""#.to_string());
        quoted.values[0].censor_code = Some(r#"<"LOD""#.to_string());
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let artifact =
            tokio_test::block_on(exporter().render(&[quoted], &Catalogue::new(), at)).unwrap();

        assert!(artifact
            .body
            .contains(r#","Water temperature ""in situ""","#));
        let values = section(&artifact.body, "values");
        assert!(values[1].ends_with(r#","<""LOD""""#));
    }

    #[test]
    fn test_empty_export_is_well_formed() {
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let artifact = tokio_test::block_on(exporter().render(&[], &Catalogue::new(), at)).unwrap();

        assert_eq!(artifact.mime_type, CSV_MIME_TYPE);
        assert!(artifact.file_name.starts_with("PREP_"));
        assert!(artifact.file_name.ends_with(".csv"));
        assert_eq!(section(&artifact.body, "stations"), vec![STATION_COLUMNS.join(",")]);
        assert_eq!(section(&artifact.body, "metadata"), vec![METADATA_COLUMNS.join(",")]);
        assert_eq!(section(&artifact.body, "values"), vec![VALUE_COLUMNS.join(",")]);
    }

    #[test]
    fn test_batched_render_matches_single_batch() {
        let bundles: Vec<ResultValues> = (1..=5)
            .map(|r| {
                let values = (1..=7).map(|d| value(r * 100 + d as i64, d, d as f64)).collect();
                bundle(r, r % 2, values)
            })
            .collect();
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let small = CsvExporter::new(&ExportConfig {
            batch_size: 2,
            ..ExportConfig::default()
        })
        .unwrap();

        let catalogue = Catalogue::new();
        let batched = tokio_test::block_on(small.render(&bundles, &catalogue, at)).unwrap();
        let single = tokio_test::block_on(exporter().render(&bundles, &catalogue, at)).unwrap();
        assert_eq!(batched, single);
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = ExportArtifact {
            file_name: "PREP_20240101_0000.csv".to_string(),
            mime_type: CSV_MIME_TYPE,
            body: "# header\n".to_string(),
        };
        let path = artifact.write_to_dir(&dir.path().join("nested")).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# header\n");
    }
}
