//! Load-once data service. Tables are read at startup into an immutable
//! snapshot; `refresh` is the only way they change.

use crate::config::AppConfig;
use crate::data;
use crate::error::LoadError;
use crate::resolver::AreaGeometryResolver;
use crate::tables::{AreaTable, MetricsTable};
use crate::types::normalize_name;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

pub struct Snapshot {
    pub resolver: AreaGeometryResolver,
    pub metrics: MetricsTable,
}

impl Snapshot {
    pub fn new(areas: AreaTable, metrics: MetricsTable, config: &AppConfig) -> Self {
        Self {
            resolver: AreaGeometryResolver::new(Arc::new(areas), config.matching.mode),
            metrics,
        }
    }

    pub fn areas(&self) -> &AreaTable {
        self.resolver.areas()
    }
}

pub struct DataStore {
    config: AppConfig,
    current: RwLock<Arc<Snapshot>>,
}

impl DataStore {
    pub fn load(config: AppConfig) -> Result<Self, LoadError> {
        let snapshot = Self::read(&config)?;
        Ok(Self { config, current: RwLock::new(Arc::new(snapshot)) })
    }

    fn read(config: &AppConfig) -> Result<Snapshot, LoadError> {
        let areas = data::load_areas(config)?;
        let metrics = data::load_metrics(config)?;

        let unmatched = metrics
            .years()
            .first()
            .map(|&year| {
                metrics
                    .areas_for_year(year)
                    .into_iter()
                    .filter(|name| {
                        let key = normalize_name(name);
                        !areas.records().iter().any(|r| r.key == key)
                    })
                    .count()
            })
            .unwrap_or(0);
        if unmatched > 0 {
            warn!("{} metric areas have no boundary with the same name", unmatched);
        }

        Ok(Snapshot::new(areas, metrics, config))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Reload both tables from disk. On failure the previous snapshot stays live.
    pub fn refresh(&self) -> Result<Arc<Snapshot>, LoadError> {
        let fresh = Arc::new(Self::read(&self.config)?);
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::clone(&fresh),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&fresh),
        }
        info!(
            "Reloaded {} areas and {} metric rows",
            fresh.areas().len(),
            fresh.metrics.len()
        );
        Ok(fresh)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    pub const AREAS: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","properties":{"AREA_NAME":"Masai Mara"},
         "geometry":{"type":"Polygon","coordinates":[[[34,-2],[35,-2],[35,-1],[34,-1],[34,-2]]]}},
        {"type":"Feature","properties":{"AREA_NAME":"Amboseli"},
         "geometry":{"type":"Polygon","coordinates":[[[37,-3],[37.5,-3],[37.5,-2.5],[37,-2.5],[37,-3]]]}}
    ]}"#;

    pub const METRICS: &str = "\
Area_Name,Year,mean_ndvi,mean_ndwi,mean_bsi,Mean_Rainfall_mm,Risk_Factor,Area_Trend,Area_Risk_Trend,Final_Label
Masai Mara,2020,0.61,0.12,-0.05,812.4,High,Loss,Increasing,At Risk
Masai Mara,2019,0.64,0.13,-0.06,840.0,Medium,Stable,Stable,Healthy
Amboseli,2020,0.31,0.02,0.11,402.1,Low,Gain,Stable,Healthy
";

    pub fn write_fixture(dir: &Path, metrics: &str) -> AppConfig {
        fs::write(dir.join("areas.geojson"), AREAS).unwrap();
        fs::write(dir.join("metrics.csv"), metrics).unwrap();
        AppConfig::from_toml(&format!(
            "[input]\ngeometry = {:?}\nmetrics_csv = {:?}\n",
            dir.join("areas.geojson"),
            dir.join("metrics.csv")
        ))
        .unwrap()
    }

    #[test]
    fn test_load_from_files() {
        let dir = TempDir::new().unwrap();
        let store = DataStore::load(write_fixture(dir.path(), METRICS)).unwrap();
        let snap = store.snapshot();
        assert_eq!(snap.areas().len(), 2);
        assert_eq!(snap.areas().name_column(), "AREA_NAME");
        assert_eq!(snap.metrics.years(), vec![2020, 2019]);
    }

    #[test]
    fn test_snapshot_is_stable_until_refresh() {
        let dir = TempDir::new().unwrap();
        let store = DataStore::load(write_fixture(dir.path(), METRICS)).unwrap();
        let before = store.snapshot();

        let extra = format!("{}Amboseli,2021,0.33,0.03,0.10,410.0,Low,Gain,Stable,Healthy\n", METRICS);
        fs::write(dir.path().join("metrics.csv"), extra).unwrap();
        assert_eq!(store.snapshot().metrics.len(), 3);

        store.refresh().unwrap();
        assert_eq!(store.snapshot().metrics.len(), 4);
        // readers holding the old Arc keep the old tables
        assert_eq!(before.metrics.len(), 3);
    }

    #[test]
    fn test_failed_refresh_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = DataStore::load(write_fixture(dir.path(), METRICS)).unwrap();

        fs::write(dir.path().join("metrics.csv"), "Park,Yr\nAmboseli,2020\n").unwrap();
        assert!(matches!(store.refresh(), Err(LoadError::MissingMetricColumn { .. })));
        assert_eq!(store.snapshot().metrics.len(), 3);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let mut config = write_fixture(dir.path(), METRICS);
        config.input.metrics_csv = dir.path().join("nope.csv");
        assert!(matches!(DataStore::load(config), Err(LoadError::Io { .. })));
    }
}
