use crate::config::ColorConfig;
use crate::error::ResolveError;
use crate::store::Snapshot;
use crate::types::LabelField;
use geo::MultiPolygon;
use serde::Serialize;
use std::fmt::Write;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Found,
    NotFound,
    Ambiguous,
}

/// One area to draw: geometry, fill and hover text.
#[derive(Debug, Clone)]
pub struct HighlightFeature {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
    pub fill_color: String,
    pub tooltip: String,
    pub label: String,
}

/// A user's (area, year, field) choice joined against the tables.
#[derive(Debug, Clone)]
pub struct ResolvedSelection {
    pub query: String,
    pub year: i32,
    pub field: LabelField,
    pub outcome: Outcome,
    pub candidates: Vec<String>,
    /// Name of the single candidate equal to the query, if there is one.
    pub exact: Option<String>,
    /// The field's fallback color, for clients drawing a not-found result.
    pub default_fill: String,
    pub features: Vec<HighlightFeature>,
}

impl ResolvedSelection {
    /// Keep only the record whose name equals the query, when the match was
    /// ambiguous and exactly one such record exists.
    pub fn prefer_exact(mut self) -> Self {
        if self.outcome != Outcome::Ambiguous {
            return self;
        }
        if let Some(name) = &self.exact {
            self.features.retain(|f| &f.name == name);
            self.outcome = Outcome::Found;
        }
        self
    }
}

pub fn select(
    snapshot: &Snapshot,
    colors: &ColorConfig,
    query: &str,
    year: i32,
    field: LabelField,
) -> Result<ResolvedSelection, ResolveError> {
    let resolution = snapshot.resolver.resolve(query)?;
    let metrics = snapshot.metrics.for_year(year);
    let color_map = colors.for_field(field);

    let outcome = if !resolution.found() {
        warn!("No area matches '{}'; rendering the default map", query);
        Outcome::NotFound
    } else if resolution.ambiguous() {
        warn!(
            "'{}' matches {} areas: {}",
            query,
            resolution.records.len(),
            resolution.candidate_names().join(", ")
        );
        Outcome::Ambiguous
    } else {
        Outcome::Found
    };

    let features = resolution
        .records
        .iter()
        .map(|record| {
            let class = snapshot.resolver.classify(record, &metrics, field, color_map);
            let mut tooltip = format!("{} ({}): {} = {}", record.name, year, field.title(), class.label);
            if class.defaulted {
                tooltip.push_str(" (no data)");
            }
            if let Some(row) = metrics.get(&record.name) {
                for (name, value) in &row.indicators {
                    let _ = write!(tooltip, "\n{}: {:.3}", name, value);
                }
            }
            HighlightFeature {
                name: record.name.clone(),
                geometry: record.geometry.clone(),
                fill_color: class.color,
                tooltip,
                label: class.label,
            }
        })
        .collect();

    info!("Selection '{}' {} {:?}: {:?}", query, year, field, outcome);
    Ok(ResolvedSelection {
        query: query.to_string(),
        year,
        field,
        outcome,
        candidates: resolution.candidate_names(),
        exact: resolution.exact_match().map(|r| r.name.clone()),
        default_fill: color_map.fallback_color.clone(),
        features,
    })
}
