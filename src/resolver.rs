//! Area name -> boundary geometry, and area -> display color.
//!
//! Name matching never silently narrows a multi-row match: callers always
//! get every matching record plus an `ambiguous` flag, and decide whether
//! to draw them all or ask the user to pick one.

use crate::config::{ColorMap, MatchMode};
use crate::error::ResolveError;
use crate::tables::{AreaTable, YearSlice};
use crate::types::{normalize_name, AreaRecord, LabelField};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Result of matching a query against the area table.
#[derive(Debug, Clone)]
pub struct Resolution<'a> {
    pub query: String,
    pub records: Vec<&'a AreaRecord>,
}

impl<'a> Resolution<'a> {
    pub fn found(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn ambiguous(&self) -> bool {
        self.records.len() > 1
    }

    pub fn candidate_names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name.clone()).collect()
    }

    /// The one record whose normalized name equals the query, if exactly one does.
    /// Lets a caller narrow "Masai Mara" out of {"Masai Mara", "Masai Mara North"}.
    pub fn exact_match(&self) -> Option<&'a AreaRecord> {
        let key = normalize_name(&self.query);
        let mut exact = self.records.iter().filter(|r| r.key == key);
        match (exact.next(), exact.next()) {
            (Some(only), None) => Some(*only),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub label: String,
    pub color: String,
    /// True when the label came from the color map's default, not the data.
    pub defaulted: bool,
}

/// Looks areas up in a shared, immutable area table.
pub struct AreaGeometryResolver {
    areas: Arc<AreaTable>,
    mode: MatchMode,
    warned: Mutex<HashSet<(String, i32, LabelField)>>,
}

impl AreaGeometryResolver {
    pub fn new(areas: Arc<AreaTable>, mode: MatchMode) -> Self {
        Self { areas, mode, warned: Mutex::new(HashSet::new()) }
    }

    pub fn areas(&self) -> &AreaTable {
        &self.areas
    }

    pub fn resolve(&self, query: &str) -> Result<Resolution<'_>, ResolveError> {
        let key = normalize_name(query);
        if key.is_empty() {
            return Err(ResolveError::EmptyQuery);
        }

        let records: Vec<&AreaRecord> = self
            .areas
            .records()
            .iter()
            .filter(|r| match self.mode {
                MatchMode::Exact => r.key == key,
                MatchMode::Substring => r.key.contains(&key),
            })
            .collect();

        debug!("Resolved '{}' ({:?}) to {} area(s)", query, self.mode, records.len());
        Ok(Resolution { query: query.to_string(), records })
    }

    /// Color for one resolved area. Missing data falls back to the map's
    /// default label; unmapped labels fall back to its fallback color.
    pub fn classify(
        &self,
        record: &AreaRecord,
        metrics: &YearSlice<'_>,
        field: LabelField,
        colors: &ColorMap,
    ) -> Classification {
        let label = metrics
            .get(&record.name)
            .and_then(|m| m.label(field))
            .filter(|l| !l.trim().is_empty());

        let (label, defaulted) = match label {
            Some(l) => (l, false),
            None => {
                self.warn_once(&record.key, metrics.year, field, || {
                    warn!(
                        "No {} for '{}' in {}; using default label '{}'",
                        field.title(),
                        record.name,
                        metrics.year,
                        colors.default_label
                    )
                });
                (colors.default_label.clone(), true)
            }
        };

        let color = colors.color_for(&label).unwrap_or(&colors.fallback_color).to_string();
        Classification { label, color, defaulted }
    }

    fn warn_once(&self, key: &str, year: i32, field: LabelField, emit: impl FnOnce()) {
        let first = match self.warned.lock() {
            Ok(mut seen) => seen.insert((key.to_string(), year, field)),
            Err(_) => true,
        };
        if first {
            emit();
        }
    }
}
