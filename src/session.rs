use crate::config::{Config, SpatialFilterConfig};
use crate::error::{AppError, Result};
use crate::export::CsvExporter;
use crate::fetcher::Fetcher;
use crate::models::{ResultValues, Station};
use crate::overlay::{FeatureBinding, Overlay};
use crate::state::AppState;
use chrono::Utc;
use std::path::PathBuf;
use tracing::{info, warn};

/// What one session run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
    pub filtered_results: usize,
    pub stations_with_data: usize,
    pub visible_stations: usize,
    pub count_window: Option<(u64, u64)>,
    pub export_path: Option<PathBuf>,
}

pub struct Session {
    config: Config,
    fetcher: Fetcher,
    state: AppState,
}

impl Session {
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = Fetcher::from_config(&config.source)?;
        let state = AppState::with_params(
            config.explorer.filter_params()?,
            config.explorer.quantile_range()?,
        );
        Ok(Self {
            config,
            fetcher,
            state,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(&mut self) -> Result<SessionReport> {
        info!("Loading catalogue from {}", self.fetcher.base_url());
        self.state
            .load_catalogue(&self.fetcher, &self.config.explorer.core_station_codes)
            .await?;

        if !self.state.catalogue().is_loaded() {
            warn!("Catalogue has an empty collection, derived views will be empty");
        }

        self.apply_selections()?;

        if let Some(spatial) = self.config.explorer.spatial_filter.clone() {
            self.apply_spatial_filter(&spatial).await?;
        }

        let mut report = self.report();

        if self.config.export.enabled {
            report.export_path = Some(self.export().await?);
        } else {
            info!("Export disabled, skipping");
        }

        Ok(report)
    }

    fn apply_selections(&mut self) -> Result<()> {
        let explorer = &self.config.explorer;
        if !explorer.stations.is_empty() {
            self.state
                .set_station_selection(explorer.stations.iter().copied())?;
            info!("Selected {} stations", explorer.stations.len());
        }
        if !explorer.variables.is_empty() {
            self.state
                .set_variable_selection(explorer.variables.iter().copied())?;
            info!("Selected {} variables", explorer.variables.len());
        }
        Ok(())
    }

    async fn apply_spatial_filter(&mut self, spatial: &SpatialFilterConfig) -> Result<()> {
        let overlay = Overlay::from_id(&spatial.overlay).ok_or_else(|| {
            AppError::Config(format!("Unknown spatial_filter overlay '{}'", spatial.overlay))
        })?;

        let collection = self.fetcher.fetch_overlay(overlay).await?;
        let feature = collection.find(&spatial.feature).ok_or_else(|| {
            AppError::InvalidData(format!(
                "Feature {} not found in overlay {}",
                spatial.feature,
                overlay.id()
            ))
        })?;

        match overlay.bind_feature(feature) {
            FeatureBinding::Selectable { shape, tooltip } => {
                info!("Spatial filter: {} ({})", tooltip, overlay.title());
                self.state.toggle_spatial_filter(Some(shape));
                Ok(())
            }
            FeatureBinding::Inert => Err(AppError::InvalidData(format!(
                "Feature {} of overlay {} can not be used as a spatial filter",
                spatial.feature,
                overlay.id()
            ))),
        }
    }

    fn report(&self) -> SessionReport {
        let filtered = self.state.filtered_results();
        let counts = self.state.value_counts();
        let stats = self.state.count_stats();
        let visible = self.state.visibility().visible_count();

        info!(
            "Filtered to {} results across {} stations",
            filtered.len(),
            counts.len()
        );

        let count_window = match &stats {
            Some(stats) => {
                let window = stats.window(&self.state.quantile_range());
                info!(
                    "Values per station: min {}, median {:.1}, max {} (window {}..={})",
                    stats.min(),
                    stats.median(),
                    stats.max(),
                    window.0,
                    window.1
                );
                Some(window)
            }
            None => {
                warn!("No station has matching results, quantile window not applied");
                None
            }
        };

        info!(
            "{} of {} stations visible",
            visible,
            self.state.catalogue().stations().len()
        );

        SessionReport {
            filtered_results: filtered.len(),
            stations_with_data: counts.len(),
            visible_stations: visible,
            count_window,
            export_path: None,
        }
    }

    /// Result values of every visible station for each admitted variable.
    pub async fn collect_export_bundles(&self) -> Result<Vec<ResultValues>> {
        let stations: Vec<&Station> = self.state.visible_stations();
        let range = self.state.params().time_range;
        let mut bundles = Vec::new();

        for variable in self.state.effective_variables() {
            let fetched = self
                .fetcher
                .fetch_result_values(&stations, variable, &range)
                .await?;
            bundles.extend(fetched);
        }

        Ok(bundles)
    }

    pub async fn export(&self) -> Result<PathBuf> {
        let exporter = CsvExporter::new(&self.config.export)?;
        let bundles = self.collect_export_bundles().await?;
        if bundles.is_empty() {
            warn!("No result values matched the current selection, exporting empty tables");
        }

        let artifact = exporter
            .render(&bundles, self.state.catalogue(), Utc::now())
            .await?;
        artifact.write_to_dir(&self.config.export.output_dir)
    }
}
