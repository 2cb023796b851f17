use crate::types::LabelField;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub fields: FieldMapping,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub colors: ColorConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// Boundary file, `.shp` or `.geojson`/`.json`.
    pub geometry: PathBuf,
    pub metrics_csv: PathBuf,
    /// e.g. "EPSG:32737". Falls back to the `.prj` sidecar, then WGS84 for GeoJSON.
    pub source_crs: Option<String>,
    /// Attribute holding the area name. When unset, the first column whose
    /// name contains "area" is used.
    pub name_column: Option<String>,
    /// Pretrained classifier artifact (JSON). Predictions are off when unset.
    pub classifier: Option<PathBuf>,
}

/// Semantic field -> physical CSV column.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FieldMapping {
    pub area_name: String,
    pub year: String,
    pub trend: Option<String>,
    pub risk: Option<String>,
    pub risk_trend: Option<String>,
    pub final_label: Option<String>,
    pub indicators: Vec<String>,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            area_name: "Area_Name".into(),
            year: "Year".into(),
            trend: Some("Area_Trend".into()),
            risk: Some("Risk_Factor".into()),
            risk_trend: Some("Area_Risk_Trend".into()),
            final_label: Some("Final_Label".into()),
            indicators: vec![
                "mean_ndvi".into(),
                "mean_ndwi".into(),
                "mean_bsi".into(),
                "Mean_Rainfall_mm".into(),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Exact,
    #[default]
    Substring,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MatchingConfig {
    #[serde(default)]
    pub mode: MatchMode,
}

/// Label -> color, plus what to use when the label or the color is missing.
#[derive(Debug, Deserialize, Clone)]
pub struct ColorMap {
    pub colors: HashMap<String, String>,
    pub default_label: String,
    pub fallback_color: String,
}

impl ColorMap {
    pub fn new(pairs: &[(&str, &str)], default_label: &str, fallback_color: &str) -> Self {
        Self {
            colors: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            default_label: default_label.to_string(),
            fallback_color: fallback_color.to_string(),
        }
    }

    /// Case-insensitive lookup; `None` when the label is unmapped.
    pub fn color_for(&self, label: &str) -> Option<&str> {
        let wanted = label.trim();
        self.colors
            .iter()
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(wanted))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ColorConfig {
    pub trend: ColorMap,
    pub risk: ColorMap,
    pub risk_trend: ColorMap,
    #[serde(rename = "final")]
    pub final_label: ColorMap,
}

impl ColorConfig {
    pub fn for_field(&self, field: LabelField) -> &ColorMap {
        match field {
            LabelField::Trend => &self.trend,
            LabelField::Risk => &self.risk,
            LabelField::RiskTrend => &self.risk_trend,
            LabelField::Final => &self.final_label,
        }
    }
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            trend: ColorMap::new(
                &[("Gain", "green"), ("Stable", "yellow"), ("Loss", "red")],
                "Unknown",
                "gray",
            ),
            risk: ColorMap::new(
                &[("Low", "green"), ("Medium", "orange"), ("High", "red")],
                "Low",
                "blue",
            ),
            risk_trend: ColorMap::new(
                &[("Increasing", "red"), ("Stable", "yellow"), ("Decreasing", "green")],
                "Unknown",
                "gray",
            ),
            final_label: ColorMap::new(
                &[("Healthy", "green"), ("At Risk", "orange"), ("Degraded", "red")],
                "Unknown",
                "gray",
            ),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub center_lat: f64,
    pub center_lon: f64,
    pub zoom: u8,
    pub png_width: u32,
    pub png_height: u32,
    /// Fill for areas outside the selection in the PNG preview.
    pub base_color: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        // Nairobi
        Self {
            center_lat: -1.286389,
            center_lon: 36.817223,
            zoom: 6,
            png_width: 1024,
            png_height: 1024,
            base_color: "lightgray".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080, static_dir: None }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let cfg = AppConfig::from_toml(
            r#"
            [input]
            geometry = "shapefiles/kbd_with_names.shp"
            metrics_csv = "final_merged.csv"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.fields.area_name, "Area_Name");
        assert_eq!(cfg.fields.indicators.len(), 4);
        assert_eq!(cfg.matching.mode, MatchMode::Substring);
        assert_eq!(cfg.colors.risk.fallback_color, "blue");
        assert_eq!(cfg.colors.trend.default_label, "Unknown");
        assert_eq!(cfg.server.port, 8080);
        assert!(cfg.input.name_column.is_none());
        assert!(cfg.input.classifier.is_none());
    }

    #[test]
    fn test_overrides() {
        let cfg = AppConfig::from_toml(
            r##"
            [input]
            geometry = "areas.geojson"
            metrics_csv = "metrics.csv"
            name_column = "AREA_NAME"
            source_crs = "EPSG:32737"

            [fields]
            area_name = "Park"
            year = "Yr"
            indicators = ["ndvi"]

            [matching]
            mode = "exact"

            [colors.risk]
            colors = { High = "#ff0000" }
            default_label = "Low"
            fallback_color = "gray"
            "##,
        )
        .unwrap();
        assert_eq!(cfg.fields.area_name, "Park");
        assert_eq!(cfg.fields.trend.as_deref(), Some("Area_Trend"));
        assert_eq!(cfg.matching.mode, MatchMode::Exact);
        assert_eq!(cfg.colors.risk.color_for("high"), Some("#ff0000"));
        assert_eq!(cfg.colors.risk.fallback_color, "gray");
        // untouched sections keep defaults
        assert_eq!(cfg.colors.trend.color_for("Loss"), Some("red"));
    }

    #[test]
    fn test_color_lookup_unmapped() {
        let map = ColorMap::new(&[("High", "red")], "Low", "blue");
        assert_eq!(map.color_for(" HIGH "), Some("red"));
        assert_eq!(map.color_for("Extreme"), None);
    }

    #[test]
    fn test_invalid_toml_errors() {
        assert!(AppConfig::from_toml("[input]\ngeometry = 3").is_err());
    }
}
