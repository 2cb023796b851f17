use crate::config::{AppConfig, FieldMapping};
use crate::crs::Crs;
use crate::error::LoadError;
use crate::tables::{AreaTable, MetricsTable};
use crate::types::{AreaRecord, AttributeValue, RiskLabel, TrendLabel, YearlyMetric};
use csv::ReaderBuilder;
use geo::MultiPolygon;
use shapefile::dbase::FieldValue;
use shapefile::Reader;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

pub fn load_areas(config: &AppConfig) -> Result<AreaTable, LoadError> {
    let path = &config.input.geometry;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| LoadError::UnsupportedFormat(format!("{:?} has no extension", path)))?;

    let crs = Crs::detect(config.input.source_crs.as_deref(), path)?;
    info!("Loading area geometry from {:?} ({:?})", path, crs);

    let rows = match extension.as_str() {
        "shp" => read_shapefile(path)?,
        "json" | "geojson" => {
            let file = File::open(path)
                .map_err(|source| LoadError::Io { path: path.clone(), source })?;
            read_geojson(BufReader::new(file))?
        }
        _ => return Err(LoadError::UnsupportedFormat(extension)),
    };

    let table = build_area_table(rows, config.input.name_column.as_deref(), crs)?;
    info!("Loaded {} areas (name column '{}')", table.len(), table.name_column());
    Ok(table)
}

/// One raw geometry row before the name column is known.
pub(crate) struct RawArea {
    pub geometry: MultiPolygon<f64>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// Resolve the name column against the attribute names, reproject, and key every row.
pub(crate) fn build_area_table(
    rows: Vec<RawArea>,
    configured: Option<&str>,
    crs: Crs,
) -> Result<AreaTable, LoadError> {
    if rows.is_empty() {
        warn!("Geometry source holds no polygon features");
        return Ok(AreaTable::new(Vec::new(), configured.unwrap_or_default()));
    }

    // Properties may differ per feature; a column counts if any row carries it.
    let mut available: Vec<String> = Vec::new();
    for row in &rows {
        for column in row.attributes.keys() {
            if !available.contains(column) {
                available.push(column.clone());
            }
        }
    }
    let name_column = resolve_name_column(&available, configured)?;

    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in rows {
        let name = match row.attributes.get(&name_column) {
            Some(AttributeValue::Text(s)) if !s.trim().is_empty() => s.clone(),
            Some(AttributeValue::Number(n)) => n.to_string(),
            _ => {
                skipped += 1;
                continue;
            }
        };
        records.push(AreaRecord::new(name, crs.normalize(row.geometry), row.attributes));
    }
    if skipped > 0 {
        warn!("Skipped {} geometry rows with no value in '{}'", skipped, name_column);
    }

    Ok(AreaTable::new(records, name_column))
}

fn resolve_name_column(available: &[String], configured: Option<&str>) -> Result<String, LoadError> {
    let found = match configured {
        Some(wanted) => available.iter().find(|c| c.as_str() == wanted),
        None => available.iter().find(|c| c.to_lowercase().contains("area")),
    };
    found.cloned().ok_or_else(|| LoadError::MissingNameColumn {
        wanted: configured
            .map(|c| format!("'{}'", c))
            .unwrap_or_else(|| "a column containing 'area'".into()),
        available: available.to_vec(),
    })
}

fn read_shapefile(path: &Path) -> Result<Vec<RawArea>, LoadError> {
    let mut reader = Reader::from_path(path)?;
    let mut rows = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon.try_into().map_err(|e| {
                LoadError::UnsupportedFormat(format!("Failed to convert polygon: {:?}", e))
            })?,
            shapefile::Shape::PolygonM(polygon) => polygon.try_into().map_err(|e| {
                LoadError::UnsupportedFormat(format!("Failed to convert polygonM: {:?}", e))
            })?,
            shapefile::Shape::PolygonZ(polygon) => polygon.try_into().map_err(|e| {
                LoadError::UnsupportedFormat(format!("Failed to convert polygonZ: {:?}", e))
            })?,
            _ => continue, // Skip non-polygon shapes
        };

        let attributes = record
            .into_iter()
            .map(|(column, value)| (column, field_to_attribute(value)))
            .collect();

        rows.push(RawArea { geometry, attributes });
    }

    Ok(rows)
}

fn field_to_attribute(value: FieldValue) -> AttributeValue {
    match value {
        FieldValue::Character(Some(s)) => AttributeValue::Text(s.trim().to_string()),
        FieldValue::Numeric(Some(n)) => AttributeValue::Number(n),
        FieldValue::Float(Some(n)) => AttributeValue::Number(n as f64),
        FieldValue::Integer(n) => AttributeValue::Number(n as f64),
        FieldValue::Double(n) => AttributeValue::Number(n),
        FieldValue::Logical(Some(b)) => AttributeValue::Bool(b),
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None) => AttributeValue::Null,
        other => AttributeValue::Text(format!("{:?}", other)),
    }
}

pub(crate) fn read_geojson<R: Read>(reader: R) -> Result<Vec<RawArea>, LoadError> {
    use geojson::GeoJson;

    let geojson = GeoJson::from_reader(reader)?;
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => {
            return Err(LoadError::UnsupportedFormat(
                "GeoJSON must be a FeatureCollection".into(),
            ))
        }
    };

    let mut rows = Vec::new();
    for feature in collection.features {
        let geometry = match feature.geometry {
            Some(geom) => {
                let converted: geo::Geometry<f64> = geom.value.try_into()?;
                match converted {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => continue, // Skip points/lines
                }
            }
            None => continue,
        };

        let attributes = feature
            .properties
            .unwrap_or_default()
            .into_iter()
            .map(|(column, value)| (column, json_to_attribute(value)))
            .collect();

        rows.push(RawArea { geometry, attributes });
    }

    Ok(rows)
}

fn json_to_attribute(value: serde_json::Value) -> AttributeValue {
    match value {
        serde_json::Value::String(s) => AttributeValue::Text(s.trim().to_string()),
        serde_json::Value::Number(n) => n.as_f64().map(AttributeValue::Number).unwrap_or(AttributeValue::Null),
        serde_json::Value::Bool(b) => AttributeValue::Bool(b),
        serde_json::Value::Null => AttributeValue::Null,
        other => AttributeValue::Text(other.to_string()),
    }
}

pub fn load_metrics(config: &AppConfig) -> Result<MetricsTable, LoadError> {
    let path = &config.input.metrics_csv;
    info!("Loading metrics from {:?}", path);
    let file = File::open(path).map_err(|source| LoadError::Io { path: path.clone(), source })?;
    let table = read_metrics(file, &config.fields)?;
    info!("Loaded {} metric rows across {} years", table.len(), table.years().len());
    Ok(table)
}

/// Column positions for every mapped field, checked once against the header.
struct ColumnPlan {
    area: usize,
    year: usize,
    trend: Option<usize>,
    risk: Option<usize>,
    risk_trend: Option<usize>,
    final_label: Option<usize>,
    indicators: Vec<(String, usize)>,
}

impl ColumnPlan {
    fn from_headers(headers: &csv::StringRecord, fields: &FieldMapping) -> Result<Self, LoadError> {
        let col_indices: HashMap<&str, usize> =
            headers.iter().enumerate().map(|(i, h)| (h.trim(), i)).collect();

        let require = |field: &'static str, column: &str| {
            col_indices
                .get(column.trim())
                .copied()
                .ok_or_else(|| LoadError::MissingMetricColumn { field, column: column.to_string() })
        };
        // An empty mapping switches the optional field off.
        let optional = |field: &'static str, column: &Option<String>| match column {
            Some(c) if !c.trim().is_empty() => require(field, c).map(Some),
            _ => Ok(None),
        };

        Ok(Self {
            area: require("area_name", &fields.area_name)?,
            year: require("year", &fields.year)?,
            trend: optional("trend", &fields.trend)?,
            risk: optional("risk", &fields.risk)?,
            risk_trend: optional("risk_trend", &fields.risk_trend)?,
            final_label: optional("final_label", &fields.final_label)?,
            indicators: fields
                .indicators
                .iter()
                .map(|name| require("indicators", name).map(|idx| (name.clone(), idx)))
                .collect::<Result<_, _>>()?,
        })
    }
}

pub(crate) fn read_metrics<R: Read>(reader: R, fields: &FieldMapping) -> Result<MetricsTable, LoadError> {
    let mut rdr = ReaderBuilder::new().from_reader(reader);
    let headers = rdr.headers()?.clone();
    let plan = ColumnPlan::from_headers(&headers, fields)?;

    let mut table = MetricsTable::new();
    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        let area_name = record.get(plan.area).unwrap_or("").trim().to_string();

        if area_name.is_empty() {
            continue;
        }

        let raw_year = record.get(plan.year).unwrap_or("").trim();
        let year = parse_year(raw_year)
            .ok_or_else(|| LoadError::InvalidYear { row: row + 1, value: raw_year.to_string() })?;

        let text = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let indicators = plan
            .indicators
            .iter()
            .filter_map(|(name, idx)| {
                let value: f64 = record.get(*idx)?.trim().parse().ok()?;
                value.is_finite().then(|| (name.clone(), value))
            })
            .collect();

        table.insert(YearlyMetric {
            area_name,
            year,
            indicators,
            trend_label: text(plan.trend).map(|s| TrendLabel::parse(&s)).unwrap_or(TrendLabel::Unknown),
            risk_label: text(plan.risk).map(|s| RiskLabel::parse(&s)).unwrap_or(RiskLabel::Unknown),
            risk_trend: text(plan.risk_trend),
            final_label: text(plan.final_label),
        })?;
    }

    Ok(table)
}

// pandas round-trips integer columns with NaNs as "2020.0"
fn parse_year(raw: &str) -> Option<i32> {
    if let Ok(year) = raw.parse::<i32>() {
        return Some(year);
    }
    let value: f64 = raw.parse().ok()?;
    (value.fract() == 0.0 && value.abs() < 1e6).then(|| value as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AREAS_GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "OBJECTID": 1, "Area_Name": "Masai Mara", "IUCN": "II" },
                "geometry": { "type": "Polygon", "coordinates": [[[34,-2],[35,-2],[35,-1],[34,-1],[34,-2]]] }
            },
            {
                "type": "Feature",
                "properties": { "OBJECTID": 2, "Area_Name": "Amboseli", "IUCN": "II" },
                "geometry": { "type": "MultiPolygon", "coordinates": [[[[37,-3],[37.5,-3],[37.5,-2.5],[37,-2.5],[37,-3]]]] }
            },
            {
                "type": "Feature",
                "properties": { "OBJECTID": 3, "Area_Name": null },
                "geometry": { "type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]] }
            },
            {
                "type": "Feature",
                "properties": { "OBJECTID": 4, "Area_Name": "Gauge" },
                "geometry": { "type": "Point", "coordinates": [36.8, -1.3] }
            }
        ]
    }"#;

    const METRICS_CSV: &str = "\
Area_Name,Year,mean_ndvi,mean_ndwi,mean_bsi,Mean_Rainfall_mm,Risk_Factor,Area_Trend,Area_Risk_Trend,Final_Label
Masai Mara,2020,0.61,0.12,-0.05,812.4,High,Loss,Increasing,At Risk
Masai Mara,2021,0.58,,-0.03,790.0,High,Loss,Increasing,At Risk
Amboseli,2020.0,0.31,0.02,0.11,402.1,low,gain,Stable,Healthy
,2020,0.1,0.1,0.1,1,Low,Gain,,
";

    #[test]
    fn test_geojson_auto_detects_area_column() {
        let rows = read_geojson(AREAS_GEOJSON.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3); // point skipped
        let table = build_area_table(rows, None, Crs::Wgs84).unwrap();
        assert_eq!(table.name_column(), "Area_Name");
        assert_eq!(table.len(), 2); // null name skipped
        assert_eq!(table.records()[0].key, "masai mara");
        assert_eq!(
            table.records()[1].attributes.get("IUCN"),
            Some(&AttributeValue::Text("II".into()))
        );
    }

    #[test]
    fn test_configured_name_column_missing_is_fatal() {
        let rows = read_geojson(AREAS_GEOJSON.as_bytes()).unwrap();
        let err = build_area_table(rows, Some("PA_NAME"), Crs::Wgs84)
            .err()
            .expect("unknown name column must fail");
        match err {
            LoadError::MissingNameColumn { wanted, available } => {
                assert_eq!(wanted, "'PA_NAME'");
                assert!(available.contains(&"Area_Name".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_no_area_like_column_is_fatal() {
        let json = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"NAME":"Tsavo"},
             "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}}]}"#;
        let rows = read_geojson(json.as_bytes()).unwrap();
        assert!(matches!(
            build_area_table(rows, None, Crs::Wgs84),
            Err(LoadError::MissingNameColumn { .. })
        ));
    }

    #[test]
    fn test_name_column_found_on_later_feature() {
        let json = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"OBJECTID":1},
             "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}},
            {"type":"Feature","properties":{"OBJECTID":2,"Area_Name":"Tsavo East"},
             "geometry":{"type":"Polygon","coordinates":[[[2,0],[3,0],[3,1],[2,0]]]}}]}"#;

        let rows = read_geojson(json.as_bytes()).unwrap();
        let table = build_area_table(rows, None, Crs::Wgs84).unwrap();
        assert_eq!(table.name_column(), "Area_Name");
        assert_eq!(table.len(), 1);
        assert_eq!(table.records()[0].name, "Tsavo East");

        let rows = read_geojson(json.as_bytes()).unwrap();
        let table = build_area_table(rows, Some("Area_Name"), Crs::Wgs84).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_empty_collection_loads_empty_table() {
        let rows = read_geojson(r#"{"type":"FeatureCollection","features":[]}"#.as_bytes()).unwrap();
        let table = build_area_table(rows, Some("Area_Name"), Crs::Wgs84).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.name_column(), "Area_Name");
    }

    #[test]
    fn test_malformed_geojson_is_parse_error() {
        let err = read_geojson(r#"{"type":"FeatureCollection","features":["#.as_bytes())
            .err()
            .expect("truncated JSON must fail");
        assert!(matches!(err, LoadError::Json(_)), "got {err}");
    }

    #[test]
    fn test_non_collection_rejected() {
        let json = r#"{"type":"Feature","properties":{},"geometry":null}"#;
        assert!(matches!(read_geojson(json.as_bytes()), Err(LoadError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_read_metrics() {
        let table = read_metrics(METRICS_CSV.as_bytes(), &FieldMapping::default()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.years(), vec![2021, 2020]);

        let mara = table.get("masai mara", 2020).unwrap();
        assert_eq!(mara.risk_label, RiskLabel::High);
        assert_eq!(mara.trend_label, TrendLabel::Loss);
        assert_eq!(mara.final_label.as_deref(), Some("At Risk"));
        assert_eq!(mara.indicators.get("Mean_Rainfall_mm"), Some(&812.4));

        // empty cell dropped, not zeroed
        let mara21 = table.get("Masai Mara", 2021).unwrap();
        assert!(!mara21.indicators.contains_key("mean_ndwi"));

        let amboseli = table.get("Amboseli", 2020).unwrap();
        assert_eq!(amboseli.risk_label, RiskLabel::Low);
        assert_eq!(amboseli.trend_label, TrendLabel::Gain);
    }

    #[test]
    fn test_missing_metric_column_is_fatal() {
        let csv = "Area_Name,Year,mean_ndvi\nAmboseli,2020,0.3\n";
        let err = read_metrics(csv.as_bytes(), &FieldMapping::default()).unwrap_err();
        assert!(matches!(err, LoadError::MissingMetricColumn { field: "trend", .. }));
    }

    #[test]
    fn test_optional_fields_can_be_switched_off() {
        let fields = FieldMapping {
            trend: Some(String::new()),
            risk: None,
            risk_trend: None,
            final_label: None,
            indicators: vec!["mean_ndvi".into()],
            ..FieldMapping::default()
        };
        let csv = "Area_Name,Year,mean_ndvi\nAmboseli,2020,0.3\n";
        let table = read_metrics(csv.as_bytes(), &fields).unwrap();
        let row = table.get("amboseli", 2020).unwrap();
        assert_eq!(row.risk_label, RiskLabel::Unknown);
        assert_eq!(row.trend_label, TrendLabel::Unknown);
    }

    #[test]
    fn test_bad_year_and_duplicates() {
        let fields = FieldMapping {
            trend: None,
            risk: None,
            risk_trend: None,
            final_label: None,
            indicators: vec![],
            ..FieldMapping::default()
        };
        let bad = "Area_Name,Year\nAmboseli,twenty\n";
        assert!(matches!(
            read_metrics(bad.as_bytes(), &fields),
            Err(LoadError::InvalidYear { row: 1, .. })
        ));

        let dup = "Area_Name,Year\nAmboseli,2020\nAMBOSELI,2020\n";
        assert!(matches!(
            read_metrics(dup.as_bytes(), &fields),
            Err(LoadError::DuplicateMetric { year: 2020, .. })
        ));
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("2020"), Some(2020));
        assert_eq!(parse_year("2020.0"), Some(2020));
        assert_eq!(parse_year("2020.5"), None);
        assert_eq!(parse_year(""), None);
    }
}
