use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::komoot::{KomootClient, DEFAULT_MAX_RETRIES};
use crate::map::{self, MapPage};
use crate::stats::{self, MonthStats, LAST_TOURS_SHOWN};
use crate::storage::{self, State};
use crate::tiles;
use crate::trace;

/// Pause between two GPX downloads.
const DOWNLOAD_PAUSE: Duration = Duration::from_millis(100);

pub const DEFAULT_TOUR_LIMIT: u32 = 50;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub data_file: PathBuf,
    pub output: PathBuf,
    pub zoom: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapSummary {
    pub tiles: usize,
    pub largest_cluster: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub fetched: usize,
    pub new_tours: usize,
    pub total_tours: u32,
    pub traces: usize,
    pub month: MonthStats,
    /// `None` when there was nothing to draw.
    pub map: Option<MapSummary>,
}

/// Compute tiles and cluster for `state` and write the page to `output`.
pub fn render_state(
    state: &State,
    config: &Config,
    zoom: u32,
    month: MonthStats,
    output: &Path,
) -> Result<MapSummary> {
    let (visited, skipped) = tiles::visited_tiles(&state.traces, zoom)?;
    if skipped > 0 {
        warn!(skipped, "ignored points outside the Web Mercator range");
    }
    info!(tiles = visited.len(), "unique tiles visited");

    let cluster = tiles::max_cluster(&visited);
    info!(size = cluster.len(), "largest cluster");

    let page = MapPage {
        state,
        tiles: &visited,
        cluster: &cluster,
        zoom,
        month,
        style: &config.style,
        repository: config.repository.as_ref(),
        generated_at: Local::now(),
    };
    let html = map::render(&page)?;
    map::write(output, &html)?;

    Ok(MapSummary {
        tiles: visited.len(),
        largest_cluster: cluster.len(),
    })
}

/// Fetch new tours, fold their traces into the state file and re-render the map.
pub async fn run_sync(config: &Config, opts: &SyncOptions) -> Result<SyncReport> {
    let (user_id, cookie) = config.credentials()?;
    let client = KomootClient::new(user_id, cookie)?;
    sync_with_client(&client, config, opts).await
}

/// Same as [`run_sync`] against an already built client.
pub async fn sync_with_client(
    client: &KomootClient,
    config: &Config,
    opts: &SyncOptions,
) -> Result<SyncReport> {
    let mut state = storage::load(&opts.data_file)?;
    client.validate_session(DEFAULT_MAX_RETRIES).await?;

    info!("fetching tours from Komoot");
    let tours = client.recorded_tours(opts.limit).await?;
    if tours.is_empty() {
        warn!("no tours returned, nothing to do");
        return Ok(SyncReport {
            total_tours: state.stats.count,
            traces: state.traces.len(),
            ..SyncReport::default()
        });
    }
    info!(count = tours.len(), "tours fetched");

    let month = stats::month_stats(&tours, Local::now().date_naive());
    let (hours, minutes) = month.hours_minutes();
    info!(km = month.distance_km(), hours, minutes, "current month");

    state.last_tours = stats::last_tours(&tours, LAST_TOURS_SHOWN);

    let mut new_tours = 0;
    for tour in &tours {
        let tour_id = tour.id.to_string();
        if state.has_tour(&tour_id) {
            continue;
        }
        info!(
            tour = %tour_id,
            name = tour.name.as_deref().unwrap_or("untitled"),
            "syncing tour"
        );

        let traces = match client.tour_gpx(tour.id).await {
            Ok(gpx) => trace::extract_traces(&gpx, config.simplify_factor),
            Err(e) => Err(e),
        };
        match traces {
            Ok(traces) => {
                info!(tour = %tour_id, traces = traces.len(), "traces extracted");
                state.record_tour(tour_id, traces);
                new_tours += 1;
            }
            Err(e) => warn!(tour = %tour_id, error = %e, "skipping tour"),
        }

        tokio::time::sleep(DOWNLOAD_PAUSE).await;
    }

    if new_tours > 0 {
        info!(new_tours, "new tours synced");
    } else {
        info!("no new tours");
    }

    storage::save(&opts.data_file, &state)?;

    let map = if state.traces.is_empty() {
        warn!("no traces yet, map not generated");
        None
    } else {
        Some(render_state(&state, config, opts.zoom, month, &opts.output)?)
    };

    let report = SyncReport {
        fetched: tours.len(),
        new_tours,
        total_tours: state.stats.count,
        traces: state.traces.len(),
        month,
        map,
    };
    log_summary(&report);
    Ok(report)
}

fn log_summary(report: &SyncReport) {
    info!(
        tours = report.total_tours,
        traces = report.traces,
        tiles = report.map.as_ref().map_or(0, |m| m.tiles),
        largest_cluster = report.map.as_ref().map_or(0, |m| m.largest_cluster),
        month_km = report.month.distance_km(),
        "sync summary"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::tiles::Coordinate;
    use axum::extract::Path as UrlPath;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    const TOUR_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
<trk><trkseg>
<trkpt lat="45.1885" lon="5.7245"></trkpt>
<trkpt lat="45.1885" lon="5.7505"></trkpt>
</trkseg></trk>
</gpx>
"#;

    async fn spawn_komoot(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    /// Fake Komoot serving `tours`; only tour 1 has a downloadable GPX.
    fn komoot_router(tours: Value) -> Router {
        Router::new()
            .route(
                "/api/v007/users/:user/tours/",
                get(move || {
                    let tours = tours.clone();
                    async move { Json(json!({ "_embedded": { "tours": tours } })) }
                }),
            )
            .route(
                "/api/v1/tours/:file",
                get(|UrlPath(file): UrlPath<String>| async move {
                    if file == "1.gpx" {
                        Ok(TOUR_GPX)
                    } else {
                        Err(StatusCode::INTERNAL_SERVER_ERROR)
                    }
                }),
            )
    }

    fn sync_config() -> Config {
        Config::from_lookup(|key| match key {
            "KOMOOT_USER_ID" => Some("1234".to_string()),
            "KOMOOT_SESSION_COOKIE" => Some("abc".to_string()),
            "SIMPLIFY_FACTOR" => Some("1".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn sync_options(dir: &Path) -> SyncOptions {
        SyncOptions {
            data_file: dir.join("all_points.json"),
            output: dir.join("index.html"),
            zoom: 14,
            limit: DEFAULT_TOUR_LIMIT,
        }
    }

    fn tour(id: u64) -> Value {
        json!({
            "id": id,
            "name": format!("Tour {id}"),
            "date": "2024-05-01T08:00:00.000+02:00",
            "distance": 10000.0,
            "duration": 3600
        })
    }

    #[test]
    fn render_state_writes_page_and_counts_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("site").join("index.html");
        let config = Config::from_lookup(|_| None).unwrap();

        let mut state = State::default();
        // Two points in horizontally adjacent zoom-14 tiles around Grenoble.
        state.record_tour(
            "1".into(),
            vec![vec![Coordinate::new(45.1885, 5.7245), Coordinate::new(45.1885, 5.7505)]],
        );

        let summary = render_state(&state, &config, 14, MonthStats::default(), &output).unwrap();
        assert_eq!(
            summary,
            MapSummary {
                tiles: 2,
                largest_cluster: 2
            }
        );
        let html = std::fs::read_to_string(&output).unwrap();
        assert!(html.contains("L.map('map')"));
    }

    #[tokio::test]
    async fn sync_requires_credentials() {
        let config = Config::from_lookup(|_| None).unwrap();
        let opts = SyncOptions {
            data_file: PathBuf::from("unused.json"),
            output: PathBuf::from("unused.html"),
            zoom: 14,
            limit: DEFAULT_TOUR_LIMIT,
        };
        assert!(matches!(
            run_sync(&config, &opts).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn failed_download_skips_tour_and_keeps_the_good_one() {
        let base = spawn_komoot(komoot_router(json!([tour(1), tour(2)]))).await;
        let dir = tempfile::tempdir().unwrap();
        let opts = sync_options(dir.path());
        let client = KomootClient::with_base_url("1234", "abc", &base).unwrap();

        let report = sync_with_client(&client, &sync_config(), &opts)
            .await
            .unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.new_tours, 1);
        assert_eq!(
            report.map,
            Some(MapSummary {
                tiles: 2,
                largest_cluster: 2
            })
        );

        let saved = storage::load(&opts.data_file).unwrap();
        assert_eq!(saved.tour_ids, vec!["1".to_string()]);
        assert_eq!(saved.stats.count, 1);
        assert_eq!(saved.traces.len(), 1);
        assert_eq!(saved.last_tours.len(), 2);
        assert!(opts.output.exists());
    }

    #[tokio::test]
    async fn only_failing_tour_records_nothing() {
        let base = spawn_komoot(komoot_router(json!([tour(2)]))).await;
        let dir = tempfile::tempdir().unwrap();
        let opts = sync_options(dir.path());
        let client = KomootClient::with_base_url("1234", "abc", &base).unwrap();

        let report = sync_with_client(&client, &sync_config(), &opts)
            .await
            .unwrap();
        assert_eq!(report.new_tours, 0);
        assert_eq!(report.map, None);

        let saved = storage::load(&opts.data_file).unwrap();
        assert!(saved.tour_ids.is_empty());
        assert_eq!(saved.stats.count, 0);
        assert!(!opts.output.exists());
    }

    #[tokio::test]
    async fn known_tours_are_not_downloaded_again() {
        let base = spawn_komoot(komoot_router(json!([tour(1)]))).await;
        let dir = tempfile::tempdir().unwrap();
        let opts = sync_options(dir.path());
        let client = KomootClient::with_base_url("1234", "abc", &base).unwrap();

        sync_with_client(&client, &sync_config(), &opts)
            .await
            .unwrap();
        let report = sync_with_client(&client, &sync_config(), &opts)
            .await
            .unwrap();
        assert_eq!(report.new_tours, 0);
        assert_eq!(report.total_tours, 1);
        assert_eq!(storage::load(&opts.data_file).unwrap().traces.len(), 1);
    }

    #[tokio::test]
    async fn empty_tour_list_leaves_state_untouched() {
        let base = spawn_komoot(komoot_router(json!([]))).await;
        let dir = tempfile::tempdir().unwrap();
        let opts = sync_options(dir.path());

        let mut state = State::default();
        state.record_tour("7".into(), vec![vec![Coordinate::new(48.8566, 2.3522)]]);
        storage::save(&opts.data_file, &state).unwrap();
        let before = std::fs::read_to_string(&opts.data_file).unwrap();

        let client = KomootClient::with_base_url("1234", "abc", &base).unwrap();
        let report = sync_with_client(&client, &sync_config(), &opts)
            .await
            .unwrap();
        assert_eq!(report.fetched, 0);
        assert_eq!(report.total_tours, 1);
        assert_eq!(std::fs::read_to_string(&opts.data_file).unwrap(), before);
        assert!(!opts.output.exists());
    }

    #[tokio::test]
    async fn rejected_session_aborts_before_saving() {
        let router = Router::new().route(
            "/api/v007/users/:user/tours/",
            get(|| async { StatusCode::UNAUTHORIZED }),
        );
        let base = spawn_komoot(router).await;
        let dir = tempfile::tempdir().unwrap();
        let opts = sync_options(dir.path());
        let client = KomootClient::with_base_url("1234", "abc", &base).unwrap();

        assert!(matches!(
            sync_with_client(&client, &sync_config(), &opts).await,
            Err(Error::SessionRejected)
        ));
        assert!(!opts.data_file.exists());
    }
}
