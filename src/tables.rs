use crate::error::LoadError;
use crate::types::{normalize_name, AreaRecord, YearlyMetric};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{Point, Rect};
use rstar::{RTree, RTreeObject, AABB};
use std::collections::{BTreeSet, HashMap};

// Bounding box of one record, pointing back into `AreaTable::records`
pub struct AreaIndex {
    pub index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for AreaIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Boundary polygons keyed by area name, in file order.
pub struct AreaTable {
    records: Vec<AreaRecord>,
    name_column: String,
    tree: RTree<AreaIndex>,
}

impl AreaTable {
    pub fn new(records: Vec<AreaRecord>, name_column: impl Into<String>) -> Self {
        let tree_items: Vec<AreaIndex> = records
            .iter()
            .enumerate()
            .filter_map(|(i, area)| {
                let rect = area.geometry.bounding_rect()?;
                Some(AreaIndex {
                    index: i,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        Self {
            records,
            name_column: name_column.into(),
            tree: RTree::bulk_load(tree_items),
        }
    }

    pub fn records(&self) -> &[AreaRecord] {
        &self.records
    }

    pub fn name_column(&self) -> &str {
        &self.name_column
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bounding box of every area, `None` for an empty table.
    pub fn extent(&self) -> Option<Rect<f64>> {
        let mut rects = self.records.iter().filter_map(|r| r.geometry.bounding_rect());
        let first = rects.next()?;
        Some(rects.fold(first, |acc, r| {
            Rect::new(
                geo::Coord { x: acc.min().x.min(r.min().x), y: acc.min().y.min(r.min().y) },
                geo::Coord { x: acc.max().x.max(r.max().x), y: acc.max().y.max(r.max().y) },
            )
        }))
    }

    /// Indices of areas whose bounding box contains the point.
    pub fn candidates_at(&self, lon: f64, lat: f64) -> impl Iterator<Item = usize> + '_ {
        let envelope = AABB::from_point([lon, lat]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|candidate| candidate.index)
    }

    /// The first area whose polygon contains the point.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<&AreaRecord> {
        let point = Point::new(lon, lat);
        let mut hits: Vec<usize> = self.candidates_at(lon, lat).collect();
        hits.sort_unstable();
        hits.into_iter()
            .filter_map(|i| self.records.get(i))
            .find(|area| area.geometry.contains(&point))
    }
}

/// Yearly indicators keyed by (normalized area name, year).
#[derive(Debug, Default)]
pub struct MetricsTable {
    rows: HashMap<(String, i32), YearlyMetric>,
}

impl MetricsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row; a second row for the same area and year is rejected.
    pub fn insert(&mut self, metric: YearlyMetric) -> Result<(), LoadError> {
        let key = (normalize_name(&metric.area_name), metric.year);
        if self.rows.contains_key(&key) {
            return Err(LoadError::DuplicateMetric { area: metric.area_name, year: metric.year });
        }
        self.rows.insert(key, metric);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, area: &str, year: i32) -> Option<&YearlyMetric> {
        self.rows.get(&(normalize_name(area), year))
    }

    /// Distinct years, newest first.
    pub fn years(&self) -> Vec<i32> {
        let years: BTreeSet<i32> = self.rows.keys().map(|(_, y)| *y).collect();
        years.into_iter().rev().collect()
    }

    /// Area names reported for `year`, sorted descending.
    pub fn areas_for_year(&self, year: i32) -> Vec<String> {
        let mut names: Vec<String> = self
            .rows
            .values()
            .filter(|m| m.year == year)
            .map(|m| m.area_name.clone())
            .collect();
        names.sort_unstable_by(|a, b| b.cmp(a));
        names.dedup();
        names
    }

    pub fn for_year(&self, year: i32) -> YearSlice<'_> {
        let rows = self
            .rows
            .iter()
            .filter(|((_, y), _)| *y == year)
            .map(|((key, _), metric)| (key.clone(), metric))
            .collect();
        YearSlice { year, rows }
    }

    /// `(year, value)` for one indicator of one area, oldest first.
    pub fn series(&self, area: &str, indicator: &str) -> Vec<(i32, f64)> {
        let key = normalize_name(area);
        let mut points: Vec<(i32, f64)> = self
            .rows
            .iter()
            .filter(|((name, _), _)| *name == key)
            .filter_map(|((_, year), m)| m.indicators.get(indicator).map(|v| (*year, *v)))
            .collect();
        points.sort_by_key(|(year, _)| *year);
        points
    }
}

/// All metric rows of a single year.
pub struct YearSlice<'a> {
    pub year: i32,
    rows: HashMap<String, &'a YearlyMetric>,
}

impl<'a> YearSlice<'a> {
    pub fn get(&self, area: &str) -> Option<&'a YearlyMetric> {
        self.rows.get(&normalize_name(area)).copied()
    }
}
