use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Trim, lowercase and collapse inner whitespace. Area identity goes through this.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A scalar attribute copied from the geometry table (dbase record or GeoJSON properties).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone)]
pub struct AreaRecord {
    pub name: String,
    pub key: String,
    pub geometry: MultiPolygon<f64>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl AreaRecord {
    pub fn new(
        name: impl Into<String>,
        geometry: MultiPolygon<f64>,
        attributes: BTreeMap<String, AttributeValue>,
    ) -> Self {
        let name = name.into().trim().to_string();
        let key = normalize_name(&name);
        Self { name, key, geometry, attributes }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendLabel {
    Gain,
    Stable,
    Loss,
    Unknown,
}

impl TrendLabel {
    pub fn parse(raw: &str) -> Self {
        match normalize_name(raw).as_str() {
            "gain" | "increase" | "improving" => Self::Gain,
            "stable" | "no change" => Self::Stable,
            "loss" | "decrease" | "declining" => Self::Loss,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gain => write!(f, "Gain"),
            Self::Stable => write!(f, "Stable"),
            Self::Loss => write!(f, "Loss"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLabel {
    Low,
    Medium,
    High,
    Unknown,
}

impl RiskLabel {
    pub fn parse(raw: &str) -> Self {
        match normalize_name(raw).as_str() {
            "low" => Self::Low,
            "medium" | "moderate" => Self::Medium,
            "high" => Self::High,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Which categorical column drives the highlight color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelField {
    Trend,
    Risk,
    RiskTrend,
    Final,
}

impl LabelField {
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_name(raw).replace(['-', ' '], "_").as_str() {
            "trend" | "area_trend" => Some(Self::Trend),
            "risk" | "risk_factor" => Some(Self::Risk),
            "risk_trend" | "area_risk_trend" => Some(Self::RiskTrend),
            "final" | "final_label" => Some(Self::Final),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Trend => "Area trend",
            Self::Risk => "Risk factor",
            Self::RiskTrend => "Risk trend",
            Self::Final => "Final label",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct YearlyMetric {
    pub area_name: String,
    pub year: i32,
    // Sorted so tooltips are stable.
    pub indicators: BTreeMap<String, f64>,
    pub trend_label: TrendLabel,
    pub risk_label: RiskLabel,
    pub risk_trend: Option<String>,
    pub final_label: Option<String>,
}

impl YearlyMetric {
    /// The label for `field`; `None` when the row carries nothing usable for it.
    pub fn label(&self, field: LabelField) -> Option<String> {
        match field {
            LabelField::Trend => (self.trend_label != TrendLabel::Unknown).then(|| self.trend_label.to_string()),
            LabelField::Risk => (self.risk_label != RiskLabel::Unknown).then(|| self.risk_label.to_string()),
            LabelField::RiskTrend => self.risk_trend.clone(),
            LabelField::Final => self.final_label.clone(),
        }
    }
}
