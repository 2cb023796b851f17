//! Forecasting seam. A model is opaque: loaded once, handed a history,
//! asked for the next few years.

use crate::error::ModelError;
use serde::Serialize;

/// Projects a yearly series `horizon` years past its last point.
pub trait Forecaster: Send + Sync {
    fn forecast(&self, history: &[(i32, f64)], horizon: usize) -> Result<Vec<(i32, f64)>, ModelError>;
}

/// Ordinary least squares line through the history.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearTrendForecaster;

impl Forecaster for LinearTrendForecaster {
    fn forecast(&self, history: &[(i32, f64)], horizon: usize) -> Result<Vec<(i32, f64)>, ModelError> {
        if history.len() < 2 {
            return Err(ModelError::InsufficientHistory { needed: 2, have: history.len() });
        }

        let n = history.len() as f64;
        let mean_x = history.iter().map(|(x, _)| *x as f64).sum::<f64>() / n;
        let mean_y = history.iter().map(|(_, y)| *y).sum::<f64>() / n;
        let (mut sxy, mut sxx) = (0.0, 0.0);
        for (x, y) in history {
            let dx = *x as f64 - mean_x;
            sxy += dx * (y - mean_y);
            sxx += dx * dx;
        }
        if sxx == 0.0 {
            return Err(ModelError::InvalidInput("all points share one year".into()));
        }
        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;

        let last = history.iter().map(|(x, _)| *x).max().unwrap_or_default();
        let steps = i32::try_from(horizon)
            .ok()
            .filter(|steps| last.checked_add(*steps).is_some())
            .ok_or_else(|| ModelError::InvalidInput(format!("horizon {} is out of range", horizon)))?;
        Ok((1..=steps)
            .map(|step| {
                let year = last + step;
                (year, intercept + slope * year as f64)
            })
            .collect())
    }
}

/// History plus projection, as served to charts.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesForecast {
    pub area: String,
    pub indicator: String,
    pub history: Vec<(i32, f64)>,
    pub forecast: Vec<(i32, f64)>,
}

impl SeriesForecast {
    /// A short history still yields a chart, just without a projection.
    pub fn build(
        model: &dyn Forecaster,
        area: &str,
        indicator: &str,
        history: Vec<(i32, f64)>,
        horizon: usize,
    ) -> Self {
        let forecast = match model.forecast(&history, horizon) {
            Ok(points) => points,
            Err(e) => {
                tracing::warn!("No forecast for {} / {}: {}", area, indicator, e);
                Vec::new()
            }
        };
        Self { area: area.to_string(), indicator: indicator.to_string(), history, forecast }
    }
}
