use std::path::PathBuf;
use thiserror::Error;

/// Fatal problems found while loading the area or metrics tables.
/// Raised before anything is rendered.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("GeoJSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported geometry format: {0}")]
    UnsupportedFormat(String),
    #[error("Geometry table has no area name column (looked for {wanted}); available: {available:?}")]
    MissingNameColumn { wanted: String, available: Vec<String> },
    #[error("Metrics CSV is missing column '{column}' (mapped from field '{field}')")]
    MissingMetricColumn { field: &'static str, column: String },
    #[error("Row {row}: cannot parse year '{value}'")]
    InvalidYear { row: usize, value: String },
    #[error("Duplicate metrics row for area '{area}' in {year}")]
    DuplicateMetric { area: String, year: i32 },
    #[error("Unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),
    #[error("Invalid model artifact {path:?}: {reason}")]
    InvalidModel { path: PathBuf, reason: String },
}

#[derive(Error, Debug, PartialEq)]
pub enum ResolveError {
    #[error("Area query is empty")]
    EmptyQuery,
}

/// Raised by a forecaster or classifier for one input; never fatal to the service.
#[derive(Error, Debug, PartialEq)]
pub enum ModelError {
    #[error("Need at least {needed} points to forecast, have {have}")]
    InsufficientHistory { needed: usize, have: usize },
    #[error("Model rejected input: {0}")]
    InvalidInput(String),
    #[error("Feature '{0}' is missing from the input")]
    MissingFeature(String),
}
