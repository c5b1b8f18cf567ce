use prep_explorer::config::{Config, ExportConfig};
use prep_explorer::export::CsvExporter;
use prep_explorer::fetcher::Fetcher;
use prep_explorer::session::Session;
use prep_explorer::state::AppState;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STATIONS: &str = r#"[
    {"samplingfeatureid": 1, "samplingfeaturecode": "GRBAP", "samplingfeaturename": "Adams Point",
     "latitude": 0.5, "longitude": 0.5},
    {"samplingfeatureid": 2, "samplingfeaturecode": "GRBGB", "samplingfeaturename": "Great Bay",
     "latitude": 5.0, "longitude": 5.0},
    {"samplingfeatureid": 3, "samplingfeaturecode": "VOLUNTEER", "latitude": 0.5, "longitude": 0.5}
]"#;

const VARIABLES: &str = r#"[
    {"variableid": 10, "variablenamecv": "Temperature", "unitsabbreviation": "degC",
     "unitsid": 96, "variablecore": true},
    {"variableid": 11, "variablenamecv": "Turbidity", "unitsabbreviation": "NTU", "unitsid": 12}
]"#;

const RESULTS: &str = r#"[
    {"prep_resultid": 100, "samplingfeatureid": 1, "prep_variableid": 10,
     "start": "2020-01-01T00:00:00Z", "end": "2020-12-31T00:00:00Z", "n_values": 50},
    {"prep_resultid": 101, "samplingfeatureid": 2, "prep_variableid": 10,
     "start": "2020-01-01T00:00:00Z", "end": "2020-12-31T00:00:00Z", "n_values": 70},
    {"prep_resultid": 102, "samplingfeatureid": 3, "prep_variableid": 10,
     "start": "2020-01-01T00:00:00Z", "end": "2020-12-31T00:00:00Z", "n_values": 9},
    {"prep_resultid": 103, "samplingfeatureid": 1, "prep_variableid": 11,
     "start": "2020-01-01T00:00:00Z", "end": "2020-12-31T00:00:00Z", "n_values": 4}
]"#;

const REGIONS: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {"type": "Feature", "id": 3, "properties": {"name": "Great Bay Estuary"},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}}
    ]
}"#;

const RESULT_VALUES: &str = r#"[{
    "resultid": 100, "featureactionid": 1000, "unitsid": 96,
    "variable": {"variableid": 10, "variablecode": "Temp", "variablenamecv": "Temperature",
                 "variabletypecv": "Water quality"},
    "units": {"unitsabbreviation": "degC"},
    "featureaction": {
        "samplingfeature": {"samplingfeatureid": 1, "samplingfeaturecode": "GRBAP"},
        "action": {"actionid": 5, "actiontypecv": "Instrument deployment",
                   "method": {"methodid": 1, "methodcode": "YSI", "methodname": "Sonde"}}
    },
    "timeseriesresults": {"timeseriesresultvalues": [
        {"valueid": 2, "valuedatetime": "2020-06-02T00:00:00Z", "datavalue": 5.0},
        {"valueid": 1, "valuedatetime": "2020-06-01T00:00:00Z", "datavalue": 3.0}
    ]}
}]"#;

async fn mount_catalogue(server: &MockServer) {
    for (route, body) in [
        ("/prep_stations", STATIONS),
        ("/prep_variables", VARIABLES),
        ("/prep_results", RESULTS),
    ] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }
}

/// Test loading the catalogue and deriving the default view
#[tokio::test]
async fn test_load_and_derive() {
    let mock_server = MockServer::start().await;
    mount_catalogue(&mock_server).await;

    let fetcher = Fetcher::new(&mock_server.uri()).expect("Failed to create fetcher");
    let mut state = AppState::new();
    state
        .load_catalogue(&fetcher, &["GRBAP".to_string(), "GRBGB".to_string()])
        .await
        .expect("Load failed");

    // Core stations, core variable
    let ids: Vec<i64> = state.filtered_results().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![100, 101]);

    let stats = state.count_stats().expect("Stats missing");
    assert_eq!(stats.min(), 50);
    assert_eq!(stats.max(), 70);

    let visible: Vec<i64> = state.visible_stations().iter().map(|s| s.id).collect();
    assert_eq!(visible, vec![1, 2]);

    state.set_core_only(false);
    assert_eq!(state.visible_stations().len(), 3);
}

/// A failed fetch is reported without discarding the collections that arrived
#[tokio::test]
async fn test_partial_load_keeps_successful_collections() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/prep_stations"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STATIONS))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prep_variables"))
        .respond_with(ResponseTemplate::new(200).set_body_string(VARIABLES))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/prep_results"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let fetcher = Fetcher::new(&mock_server.uri()).expect("Failed to create fetcher");
    let mut state = AppState::new();
    let err = state
        .load_catalogue(&fetcher, &[])
        .await
        .expect_err("Results fetch should fail");

    assert!(err.is_fetch_error());
    assert_eq!(state.catalogue().stations().len(), 3);
    assert_eq!(state.catalogue().variables().len(), 2);
    assert!(state.catalogue().results().is_empty());
    assert!(state.filtered_results().is_empty());
}

/// Test per-station value fetch through the state's lookups
#[tokio::test]
async fn test_fetch_values_for_unknown_station_fails_fast() {
    let mock_server = MockServer::start().await;
    mount_catalogue(&mock_server).await;

    let fetcher = Fetcher::new(&mock_server.uri()).expect("Failed to create fetcher");
    let mut state = AppState::new();
    state.load_catalogue(&fetcher, &[]).await.expect("Load failed");

    let err = state
        .fetch_values(&fetcher, 404, 10)
        .await
        .expect_err("Unknown station should fail");
    assert!(err.is_not_found());
}

/// Test the export of fetched bundles through the exporter
#[tokio::test]
async fn test_export_of_fetched_bundles() {
    let mock_server = MockServer::start().await;
    mount_catalogue(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/results"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESULT_VALUES))
        .mount(&mock_server)
        .await;

    let fetcher = Fetcher::new(&mock_server.uri()).expect("Failed to create fetcher");
    let mut state = AppState::new();
    state
        .load_catalogue(&fetcher, &["GRBAP".to_string()])
        .await
        .expect("Load failed");

    let stations = state.visible_stations();
    let variable = state.catalogue().variable(10).expect("Variable missing");
    let bundles = fetcher
        .fetch_result_values(&stations, variable, &state.params().time_range)
        .await
        .expect("Fetch failed");

    let exporter = CsvExporter::new(&ExportConfig::default()).expect("Exporter failed");
    let artifact = exporter
        .render(&bundles, state.catalogue(), chrono::Utc::now())
        .await
        .expect("Render failed");

    let body = &artifact.body;
    assert!(body.contains("# TABLE: stations"));
    assert!(body.contains("1,GRBAP,Adams Point,0.5,0.5"));
    let first = body.find("100,1,GRBAP,Temperature,degC,1,").expect("value 1 missing");
    let second = body.find("100,1,GRBAP,Temperature,degC,2,").expect("value 2 missing");
    assert!(first < second);
}

/// Test a complete configured session: spatial filter, statistics and export file
#[tokio::test]
async fn test_session_run_writes_export() {
    let mock_server = MockServer::start().await;
    mount_catalogue(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/gis/regions.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_string(REGIONS))
        .mount(&mock_server)
        .await;

    // Only the station inside the region is requested
    Mock::given(method("GET"))
        .and(path("/results"))
        .and(query_param("featureaction.samplingfeatureid", "in.(1)"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESULT_VALUES))
        .expect(1)
        .mount(&mock_server)
        .await;

    let output = tempfile::tempdir().expect("Failed to create temp dir");
    let yaml = format!(
        r#"
source:
  base_url: {}
explorer:
  start: "2020-01-01"
  end: "2020-12-31"
  spatial_filter:
    overlay: regions
    feature: 3
export:
  enabled: true
  output_dir: {}
"#,
        mock_server.uri(),
        output.path().display()
    );

    let config = Config::parse(&yaml).expect("Config failed");
    let mut session = Session::new(config).expect("Session failed");
    let report = session.run().await.expect("Run failed");

    assert_eq!(report.filtered_results, 2);
    assert_eq!(report.stations_with_data, 2);
    assert_eq!(report.visible_stations, 1);
    assert_eq!(report.count_window, Some((50, 70)));
    assert!(session.state().spatial_filter().is_active());

    let path = report.export_path.expect("Export path missing");
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("PREP_") && name.ends_with(".csv"));

    let body = std::fs::read_to_string(&path).expect("Export missing");
    assert!(body.starts_with("# PREP | Piscataqua Watershed Data Explorer"));
    assert!(body.contains("# TABLE: metadata"));
    assert!(body.contains("2020-06-01T00:00:00.000Z"));
}

/// Configured selections referring to unknown ids abort the session
#[tokio::test]
async fn test_session_rejects_unknown_selection() {
    let mock_server = MockServer::start().await;
    mount_catalogue(&mock_server).await;

    let yaml = format!(
        "source:\n  base_url: {}\nexplorer:\n  variables: [999]\n",
        mock_server.uri()
    );
    let config = Config::parse(&yaml).expect("Config failed");
    let mut session = Session::new(config).expect("Session failed");

    let err = session.run().await.expect_err("Unknown variable should fail");
    assert!(err.is_not_found());
}
