use axum::{extract::State, http::StatusCode, response::Html, routing::get, Json, Router};
use serde::Serialize;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;
use crate::storage::{self, LastTour};
use crate::tiles::{self, TileIndex};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<ServerPaths>,
}

struct ServerPaths {
    data_file: PathBuf,
    output: PathBuf,
    zoom: u32,
}

impl AppState {
    pub fn new(data_file: PathBuf, output: PathBuf, zoom: u32) -> Self {
        Self {
            inner: Arc::new(ServerPaths {
                data_file,
                output,
                zoom,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TileInfo {
    pub x: u32,
    pub y: u32,
    /// `[[north, west], [south, east]]`
    pub bounds: [[f64; 2]; 2],
}

#[derive(Debug, Serialize)]
pub struct TilesResponse {
    pub zoom: u32,
    pub total_count: usize,
    pub tiles: Vec<TileInfo>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub tour_count: u32,
    pub trace_count: usize,
    pub tile_count: usize,
    pub largest_cluster: usize,
    pub last_tours: Vec<LastTour>,
}

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    error!(error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(serve_map_html))
        .route("/tiles", get(list_visited_tiles))
        .route("/stats", get(get_stats))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("map server running at http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn serve_map_html(
    State(state): State<AppState>,
) -> std::result::Result<Html<String>, ApiError> {
    match fs::read_to_string(&state.inner.output) {
        Ok(content) => Ok(Html(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err((
            StatusCode::NOT_FOUND,
            "map not rendered yet, run `squadra_map sync` or `squadra_map render` first"
                .to_string(),
        )),
        Err(e) => Err(internal(e)),
    }
}

async fn list_visited_tiles(
    State(state): State<AppState>,
) -> std::result::Result<Json<TilesResponse>, ApiError> {
    let paths = &state.inner;
    let saved = storage::load(&paths.data_file).map_err(internal)?;
    let (visited, _) =
        tiles::visited_tiles(&saved.traces, paths.zoom).map_err(internal)?;

    let mut indices: Vec<TileIndex> = visited.into_iter().collect();
    indices.sort_unstable();

    let tiles = indices
        .into_iter()
        .map(|t| {
            tiles::tile_to_bbox(t, paths.zoom).map(|bounds| TileInfo {
                x: t.x,
                y: t.y,
                bounds: bounds.as_leaflet(),
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(internal)?;

    Ok(Json(TilesResponse {
        zoom: paths.zoom,
        total_count: tiles.len(),
        tiles,
    }))
}

async fn get_stats(
    State(state): State<AppState>,
) -> std::result::Result<Json<StatsResponse>, ApiError> {
    let paths = &state.inner;
    let saved = storage::load(&paths.data_file).map_err(internal)?;
    let (visited, _) =
        tiles::visited_tiles(&saved.traces, paths.zoom).map_err(internal)?;

    Ok(Json(StatsResponse {
        tour_count: saved.stats.count,
        trace_count: saved.traces.len(),
        tile_count: visited.len(),
        largest_cluster: tiles::largest_cluster(&visited),
        last_tours: saved.last_tours,
    }))
}
