use crate::config::MapConfig;
use crate::selection::ResolvedSelection;
use crate::tables::AreaTable;
use anyhow::{anyhow, Context, Result};
use geo::algorithm::contains::Contains;
use geo::Point;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const UNKNOWN_COLOR: Rgba<u8> = Rgba([128, 128, 128, 255]);
const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 0]);

/// Selection -> GeoJSON FeatureCollection with `name`, `fill`, `tooltip` per feature.
pub fn to_geojson(selection: &ResolvedSelection) -> FeatureCollection {
    let features = selection
        .features
        .iter()
        .map(|f| {
            let mut properties = JsonObject::new();
            properties.insert("name".into(), JsonValue::from(f.name.clone()));
            properties.insert("fill".into(), JsonValue::from(f.fill_color.clone()));
            properties.insert("label".into(), JsonValue::from(f.label.clone()));
            properties.insert("tooltip".into(), JsonValue::from(f.tooltip.clone()));
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::from(&f.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let mut foreign = JsonObject::new();
    foreign.insert("query".into(), JsonValue::from(selection.query.clone()));
    foreign.insert("year".into(), JsonValue::from(selection.year));
    foreign.insert("field".into(), serde_json::to_value(selection.field).unwrap_or(JsonValue::Null));
    foreign.insert("outcome".into(), serde_json::to_value(selection.outcome).unwrap_or(JsonValue::Null));
    foreign.insert("candidates".into(), JsonValue::from(selection.candidates.clone()));
    foreign.insert("default_fill".into(), JsonValue::from(selection.default_fill.clone()));

    FeatureCollection { bbox: None, features, foreign_members: Some(foreign) }
}

/// Every boundary with its source attributes, for drawing the base layer.
pub fn boundaries_geojson(table: &AreaTable) -> FeatureCollection {
    let features = table
        .records()
        .iter()
        .map(|area| {
            let mut properties: JsonObject = area
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(JsonValue::Null)))
                .collect();
            properties.insert("name".into(), JsonValue::from(area.name.clone()));
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::from(&area.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let mut foreign = JsonObject::new();
    foreign.insert("count".into(), JsonValue::from(table.len()));
    foreign.insert("name_column".into(), JsonValue::from(table.name_column()));

    FeatureCollection { bbox: None, features, foreign_members: Some(foreign) }
}

/// `#rrggbb` or a handful of CSS color names.
pub fn parse_color(color: &str) -> Option<Rgba<u8>> {
    let color = color.trim().to_lowercase();
    if let Some(hex) = color.strip_prefix('#') {
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        return Some(Rgba([r, g, b, 255]));
    }
    let rgb = match color.as_str() {
        "red" => [220, 20, 60],
        "green" => [34, 139, 34],
        "darkgreen" => [0, 100, 0],
        "blue" => [30, 144, 255],
        "gray" | "grey" => [128, 128, 128],
        "lightgray" | "lightgrey" => [211, 211, 211],
        "orange" => [255, 140, 0],
        "yellow" => [255, 215, 0],
        "purple" => [128, 0, 128],
        "white" => [255, 255, 255],
        "black" => [0, 0, 0],
        _ => return None,
    };
    Some(Rgba([rgb[0], rgb[1], rgb[2], 255]))
}

/// Rasterize every area in `base_color`, with the selection drawn on top.
/// Equirectangular over the table's extent.
pub fn render_png(table: &AreaTable, selection: &ResolvedSelection, map: &MapConfig) -> Result<RgbaImage> {
    let extent = table.extent().ok_or_else(|| anyhow!("Area table is empty, nothing to render"))?;
    let (width, height) = (map.png_width.max(1), map.png_height.max(1));
    let base = parse_color(&map.base_color).unwrap_or(UNKNOWN_COLOR);

    let highlight: HashMap<&str, Rgba<u8>> = selection
        .features
        .iter()
        .map(|f| (f.name.as_str(), parse_color(&f.fill_color).unwrap_or(UNKNOWN_COLOR)))
        .collect();

    let span_x = (extent.max().x - extent.min().x).max(f64::EPSILON);
    let span_y = (extent.max().y - extent.min().y).max(f64::EPSILON);

    let rows: Vec<Vec<Rgba<u8>>> = (0..height)
        .into_par_iter()
        .map(|py| {
            let lat = extent.max().y - (py as f64 + 0.5) / height as f64 * span_y;
            (0..width)
                .map(|px| {
                    let lon = extent.min().x + (px as f64 + 0.5) / width as f64 * span_x;
                    pixel_color(table, &highlight, base, lon, lat)
                })
                .collect()
        })
        .collect();

    let mut img: RgbaImage = ImageBuffer::new(width, height);
    for (py, row) in rows.into_iter().enumerate() {
        for (px, color) in row.into_iter().enumerate() {
            img.put_pixel(px as u32, py as u32, color);
        }
    }
    Ok(img)
}

fn pixel_color(
    table: &AreaTable,
    highlight: &HashMap<&str, Rgba<u8>>,
    base: Rgba<u8>,
    lon: f64,
    lat: f64,
) -> Rgba<u8> {
    let point = Point::new(lon, lat);
    let mut color = BACKGROUND;
    for idx in table.candidates_at(lon, lat) {
        let area = &table.records()[idx];
        if !area.geometry.contains(&point) {
            continue;
        }
        match highlight.get(area.name.as_str()) {
            Some(fill) => return *fill,
            None => color = base,
        }
    }
    color
}

pub fn write_png(table: &AreaTable, selection: &ResolvedSelection, map: &MapConfig, path: &Path) -> Result<()> {
    let img = render_png(table, selection, map)?;
    img.save(path).with_context(|| format!("Failed to save map image {:?}", path))?;
    info!("Wrote {}x{} map to {:?}", img.width(), img.height(), path);
    Ok(())
}

pub fn write_geojson(selection: &ResolvedSelection, path: &Path) -> Result<()> {
    let body = serde_json::to_string(&to_geojson(selection))?;
    std::fs::write(path, body).with_context(|| format!("Failed to write GeoJSON {:?}", path))?;
    info!("Wrote {} features to {:?}", selection.features.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{HighlightFeature, Outcome};
    use crate::tables::tests::square;
    use crate::types::{AreaRecord, AttributeValue, LabelField};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn selection(features: Vec<HighlightFeature>, outcome: Outcome) -> ResolvedSelection {
        ResolvedSelection {
            query: "mara".into(),
            year: 2020,
            field: LabelField::Risk,
            outcome,
            candidates: features.iter().map(|f| f.name.clone()).collect(),
            exact: None,
            default_fill: "blue".into(),
            features,
        }
    }

    fn feature(name: &str, x0: f64, fill: &str) -> HighlightFeature {
        HighlightFeature {
            name: name.into(),
            geometry: square(x0, 0.0, 1.0),
            fill_color: fill.into(),
            tooltip: format!("{name} tip"),
            label: "High".into(),
        }
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#ff0000"), Some(Rgba([255, 0, 0, 255])));
        assert_eq!(parse_color(" Gray "), Some(Rgba([128, 128, 128, 255])));
        assert_eq!(parse_color("#ff00"), None);
        assert_eq!(parse_color("chartreuse-ish"), None);
    }

    #[test]
    fn test_geojson_output() {
        let sel = selection(vec![feature("Masai Mara", 0.0, "red")], Outcome::Found);
        let json: serde_json::Value = serde_json::to_value(to_geojson(&sel)).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["outcome"], "found");
        assert_eq!(json["field"], "risk");
        assert_eq!(json["features"][0]["properties"]["fill"], "red");
        assert_eq!(json["features"][0]["properties"]["tooltip"], "Masai Mara tip");
        assert_eq!(json["features"][0]["geometry"]["type"], "MultiPolygon");
    }

    #[test]
    fn test_geojson_not_found_is_empty_collection() {
        let sel = selection(vec![], Outcome::NotFound);
        let json: serde_json::Value = serde_json::to_value(to_geojson(&sel)).unwrap();
        assert_eq!(json["features"].as_array().unwrap().len(), 0);
        assert_eq!(json["outcome"], "not_found");
        assert_eq!(json["default_fill"], "blue");
    }

    #[test]
    fn test_boundaries_carry_attributes() {
        let attrs = BTreeMap::from([
            ("IUCN".to_string(), AttributeValue::Text("II".into())),
            ("REP_AREA".to_string(), AttributeValue::Number(1510.0)),
        ]);
        let table = AreaTable::new(
            vec![
                AreaRecord::new("Masai Mara", square(0.0, 0.0, 1.0), attrs),
                AreaRecord::new("Amboseli", square(1.0, 0.0, 1.0), BTreeMap::new()),
            ],
            "Area_Name",
        );
        let json = serde_json::to_value(boundaries_geojson(&table)).unwrap();
        assert_eq!(json["count"], 2);
        assert_eq!(json["name_column"], "Area_Name");
        assert_eq!(json["features"][0]["properties"]["name"], "Masai Mara");
        assert_eq!(json["features"][0]["properties"]["IUCN"], "II");
        assert_eq!(json["features"][0]["properties"]["REP_AREA"], 1510.0);
        assert_eq!(json["features"][1]["geometry"]["type"], "MultiPolygon");
    }

    #[test]
    fn test_render_png_highlights_selection() {
        let table = AreaTable::new(
            vec![
                AreaRecord::new("Masai Mara", square(0.0, 0.0, 1.0), BTreeMap::new()),
                AreaRecord::new("Amboseli", square(1.0, 0.0, 1.0), BTreeMap::new()),
            ],
            "Area_Name",
        );
        let sel = selection(vec![feature("Masai Mara", 0.0, "#ff0000")], Outcome::Found);
        let map = MapConfig { png_width: 20, png_height: 10, ..MapConfig::default() };

        let img = render_png(&table, &sel, &map).unwrap();
        assert_eq!(img.dimensions(), (20, 10));
        assert_eq!(*img.get_pixel(4, 5), Rgba([255, 0, 0, 255]));
        assert_eq!(*img.get_pixel(15, 5), Rgba([211, 211, 211, 255]));
    }

    #[test]
    fn test_render_empty_table_errors() {
        let table = AreaTable::new(vec![], "Area_Name");
        let sel = selection(vec![], Outcome::NotFound);
        assert!(render_png(&table, &sel, &MapConfig::default()).is_err());
    }

    #[test]
    fn test_write_outputs() {
        let dir = TempDir::new().unwrap();
        let table = AreaTable::new(
            vec![AreaRecord::new("Amboseli", square(0.0, 0.0, 1.0), BTreeMap::new())],
            "Area_Name",
        );
        let sel = selection(vec![feature("Amboseli", 0.0, "green")], Outcome::Found);
        let map = MapConfig { png_width: 8, png_height: 8, ..MapConfig::default() };

        write_png(&table, &sel, &map, &dir.path().join("map.png")).unwrap();
        write_geojson(&sel, &dir.path().join("map.geojson")).unwrap();
        assert!(dir.path().join("map.png").exists());
        assert!(std::fs::read_to_string(dir.path().join("map.geojson")).unwrap().contains("Amboseli"));
    }
}
