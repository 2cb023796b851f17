use crate::classifier::{load_classifier, Classifier};
use crate::config::MapConfig;
use crate::error::LoadError;
use crate::forecast::{Forecaster, LinearTrendForecaster, SeriesForecast};
use crate::render;
use crate::selection;
use crate::store::DataStore;
use crate::types::{AttributeValue, LabelField};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

const DEFAULT_HORIZON: usize = 5;
const MAX_HORIZON: usize = 30;

pub struct AppState {
    pub store: DataStore,
    pub forecaster: Box<dyn Forecaster>,
    pub classifier: Option<Box<dyn Classifier>>,
}

impl AppState {
    /// Loads the configured classifier once; it is not reloaded by refresh.
    pub fn new(store: DataStore) -> Result<Self, LoadError> {
        let classifier = load_classifier(store.config().input.classifier.as_deref())?;
        Ok(Self { store, forecaster: Box::new(LinearTrendForecaster), classifier })
    }
}

type ApiError = (StatusCode, String);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, msg.into())
}

#[derive(Deserialize)]
pub struct AreasParams {
    year: Option<i32>,
}

#[derive(Deserialize)]
pub struct SelectionParams {
    area: String,
    year: Option<i32>,
    field: Option<String>,
    #[serde(default)]
    prefer_exact: bool,
}

#[derive(Deserialize)]
pub struct LocateParams {
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
pub struct LocateResponse {
    name: String,
    attributes: BTreeMap<String, AttributeValue>,
}

#[derive(Deserialize)]
pub struct SeriesParams {
    area: String,
    indicator: String,
    horizon: Option<usize>,
}

#[derive(Deserialize)]
pub struct PredictParams {
    area: String,
    year: Option<i32>,
}

#[derive(Serialize)]
pub struct PredictResponse {
    area: String,
    year: i32,
    indicators: BTreeMap<String, f64>,
    observed: Option<String>,
    predicted: Option<String>,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    areas: usize,
    metrics: usize,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let static_dir = state.store.config().server.static_dir.clone();

    let router = Router::new()
        .route("/api/map", get(map_handler))
        .route("/api/years", get(years_handler))
        .route("/api/areas", get(areas_handler))
        .route("/api/boundaries", get(boundaries_handler))
        .route("/api/selection", get(selection_handler))
        .route("/api/locate", get(locate_handler))
        .route("/api/series", get(series_handler))
        .route("/api/predict", get(predict_handler))
        .route("/api/refresh", post(refresh_handler));

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(CorsLayer::permissive()).with_state(state)
}

pub async fn start_server(store: DataStore) -> Result<()> {
    let port = store.config().server.port;
    let state = Arc::new(AppState::new(store)?);
    let app = build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn map_handler(State(state): State<Arc<AppState>>) -> Json<MapConfig> {
    Json(state.store.config().map.clone())
}

async fn years_handler(State(state): State<Arc<AppState>>) -> Json<Vec<i32>> {
    Json(state.store.snapshot().metrics.years())
}

async fn areas_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AreasParams>,
) -> Json<Vec<String>> {
    Json(list_areas(&state, params.year))
}

fn list_areas(state: &AppState, year: Option<i32>) -> Vec<String> {
    let snapshot = state.store.snapshot();
    match year {
        Some(year) => snapshot.metrics.areas_for_year(year),
        None => snapshot.areas().records().iter().map(|r| r.name.clone()).collect(),
    }
}

async fn boundaries_handler(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.store.snapshot();
    serde_json::to_value(render::boundaries_geojson(snapshot.areas()))
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn selection_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SelectionParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    selection_body(&state, &params).map(Json)
}

fn selection_body(state: &AppState, params: &SelectionParams) -> Result<serde_json::Value, ApiError> {
    let snapshot = state.store.snapshot();
    let field = match params.field.as_deref() {
        Some(raw) => LabelField::parse(raw).ok_or_else(|| bad_request(format!("Unknown label field '{}'", raw)))?,
        None => LabelField::Risk,
    };
    let year = params
        .year
        .or_else(|| snapshot.metrics.years().first().copied())
        .ok_or_else(|| bad_request("No year given and the metrics table is empty"))?;

    let mut selected = selection::select(&snapshot, &state.store.config().colors, &params.area, year, field)
        .map_err(|e| bad_request(e.to_string()))?;
    if params.prefer_exact {
        selected = selected.prefer_exact();
    }

    serde_json::to_value(render::to_geojson(&selected))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn locate_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LocateParams>,
) -> Json<Option<LocateResponse>> {
    Json(locate(&state, params.lon, params.lat))
}

fn locate(state: &AppState, lon: f64, lat: f64) -> Option<LocateResponse> {
    let snapshot = state.store.snapshot();
    snapshot.areas().locate(lon, lat).map(|area| LocateResponse {
        name: area.name.clone(),
        attributes: area.attributes.clone(),
    })
}

async fn series_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SeriesParams>,
) -> Json<SeriesForecast> {
    Json(series(&state, &params))
}

fn series(state: &AppState, params: &SeriesParams) -> SeriesForecast {
    let history = state.store.snapshot().metrics.series(&params.area, &params.indicator);
    let horizon = params.horizon.unwrap_or(DEFAULT_HORIZON).min(MAX_HORIZON);
    SeriesForecast::build(state.forecaster.as_ref(), &params.area, &params.indicator, history, horizon)
}

async fn predict_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PredictParams>,
) -> Result<Json<PredictResponse>, ApiError> {
    predict(&state, &params).map(Json)
}

fn predict(state: &AppState, params: &PredictParams) -> Result<PredictResponse, ApiError> {
    let snapshot = state.store.snapshot();
    let year = params
        .year
        .or_else(|| snapshot.metrics.years().first().copied())
        .ok_or_else(|| bad_request("No year given and the metrics table is empty"))?;
    let row = snapshot.metrics.get(&params.area, year).ok_or_else(|| {
        (StatusCode::NOT_FOUND, format!("No metrics for '{}' in {}", params.area, year))
    })?;

    let predicted = match &state.classifier {
        Some(model) => Some(
            model
                .predict(&row.indicators)
                .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?,
        ),
        None => None,
    };

    Ok(PredictResponse {
        area: row.area_name.clone(),
        year,
        indicators: row.indicators.clone(),
        observed: row.final_label.clone(),
        predicted,
    })
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> Result<Json<RefreshResponse>, ApiError> {
    // Reload reads files; keep it off the async workers.
    let result = tokio::task::spawn_blocking(move || state.store.refresh())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match result {
        Ok(snapshot) => Ok(Json(RefreshResponse {
            areas: snapshot.areas().len(),
            metrics: snapshot.metrics.len(),
        })),
        Err(e) => {
            error!("Refresh failed, keeping previous data: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
