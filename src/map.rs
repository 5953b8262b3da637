//! Static Leaflet page: visited tiles, the largest cluster, recorded traces
//! and a statistics sidebar.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::config::{MapStyle, Repository};
use crate::error::{Error, Result};
use crate::stats::MonthStats;
use crate::storage::State;
use crate::tiles::{self, Coordinate, TileIndex};
use crate::trace::Trace;

/// Shown when there is nothing to center on (France).
const DEFAULT_CENTER: Coordinate = Coordinate {
    lat: 46.5,
    lon: 2.2,
};
const DEFAULT_ZOOM_START: u8 = 6;
const TRACES_ZOOM_START: u8 = 7;

const TILE_LAYER_URL: &str = "https://{s}.tile.openstreetmap.de/tiles/osmde/{z}/{x}/{y}.png";

/// Everything the page shows.
pub struct MapPage<'a> {
    pub state: &'a State,
    pub tiles: &'a HashSet<TileIndex>,
    pub cluster: &'a [TileIndex],
    pub zoom: u32,
    pub month: MonthStats,
    pub style: &'a MapStyle,
    pub repository: Option<&'a Repository>,
    pub generated_at: DateTime<Local>,
}

/// Geometry handed to the page script as JSON.
#[derive(Debug, Serialize)]
pub struct MapData<'a> {
    pub center: Coordinate,
    pub zoom_start: u8,
    pub tiles: Vec<[[f64; 2]; 2]>,
    pub cluster: Vec<[[f64; 2]; 2]>,
    pub traces: Vec<&'a Trace>,
}

/// Mean of all trace points, or `None` when there are none.
pub fn traces_center(state: &State) -> Option<Coordinate> {
    let (count, lat, lon) = state
        .points()
        .fold((0usize, 0.0, 0.0), |(n, lat, lon), p| (n + 1, lat + p.lat, lon + p.lon));
    (count > 0).then(|| Coordinate::new(lat / count as f64, lon / count as f64))
}

fn bounds_of(indices: impl Iterator<Item = TileIndex>, zoom: u32) -> Result<Vec<[[f64; 2]; 2]>> {
    indices
        .map(|t| {
            tiles::tile_to_bbox(t, zoom)
                .map(|bounds| bounds.as_leaflet())
                .map_err(Error::from)
        })
        .collect()
}

pub fn map_data<'a>(page: &MapPage<'a>) -> Result<MapData<'a>> {
    let (center, zoom_start) = match traces_center(page.state) {
        Some(center) => (center, TRACES_ZOOM_START),
        None => (DEFAULT_CENTER, DEFAULT_ZOOM_START),
    };

    // Sorted so the page is stable between runs.
    let mut tiles: Vec<TileIndex> = page.tiles.iter().copied().collect();
    tiles.sort_unstable();

    Ok(MapData {
        center,
        zoom_start,
        tiles: bounds_of(tiles.into_iter(), page.zoom)?,
        cluster: bounds_of(page.cluster.iter().copied(), page.zoom)?,
        traces: page.state.traces.iter().filter(|t| t.len() > 1).collect(),
    })
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn last_tours_html(state: &State) -> String {
    state
        .last_tours
        .iter()
        .map(|tour| {
            format!(
                r#"<div class="tour"><b>{}</b><br><small>{} - {} km</small></div>"#,
                html_escape(&tour.name),
                html_escape(&tour.date),
                tour.dist
            )
        })
        .collect()
}

fn sidebar_html(page: &MapPage<'_>) -> String {
    let (hours, minutes) = page.month.hours_minutes();
    let color = html_escape(&page.style.tile_color);
    format!(
        r##"<div id="sidebar">
  <div class="title" style="color:{color}">SQUADRA MAP</div>
  <div class="month" style="border-color:{color}">
    <b class="label">{month_name}</b><br>
    <b class="big" style="color:{color}">{month_km} km</b><br>
    <small>{hours}h {minutes}min in the saddle</small>
  </div>
  <div class="counters">
    <div><b style="color:{color}">{tile_count}</b><br><small>TILES</small></div>
    <div><b style="color:#FF6B35">{cluster}</b><br><small>CLUSTER</small></div>
    <div><b style="color:#4A90E2">{tour_count}</b><br><small>TOURS</small></div>
  </div>
  <div class="recent">
    <b class="label">Latest tours</b>
    <div class="tours">{tours}</div>
  </div>
  <button id="refresh" style="background:{color}" onclick="triggerUpdate()">REFRESH</button>
  <div class="updated">Updated {updated}</div>
</div>"##,
        month_name = page.generated_at.format("%B %Y").to_string().to_uppercase(),
        month_km = page.month.distance_km(),
        tile_count = page.tiles.len(),
        cluster = page.cluster.len(),
        tour_count = page.state.stats.count,
        tours = last_tours_html(page.state),
        updated = page.generated_at.format("%d/%m/%Y %H:%M"),
    )
}

/// Render the full page.
pub fn render(page: &MapPage<'_>) -> Result<String> {
    let data = serde_json::to_string(&map_data(page)?)?;
    let style = serde_json::to_string(&serde_json::json!({
        "tileColor": page.style.tile_color,
        "tileOpacity": page.style.tile_opacity,
        "traceColor": page.style.trace_color,
        "traceOpacity": page.style.trace_opacity,
    }))?;
    let repository = serde_json::to_string(
        &page
            .repository
            .map(|r| serde_json::json!({ "owner": r.owner, "name": r.name })),
    )?;

    Ok(format!(
        r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Squadra Map</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<link rel="stylesheet" href="https://cdnjs.cloudflare.com/ajax/libs/leaflet.fullscreen/3.0.0/Control.FullScreen.min.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<script src="https://cdnjs.cloudflare.com/ajax/libs/leaflet.fullscreen/3.0.0/Control.FullScreen.min.js"></script>
<style>
  html, body, #map {{ height: 100%; margin: 0; }}
  #sidebar {{ position: fixed; top: 10px; right: 10px; width: 240px; z-index: 1000; background: white;
    color: #333; padding: 18px; border-radius: 12px; font-family: 'Segoe UI', sans-serif;
    border: 1px solid #ddd; box-shadow: 0 4px 15px rgba(0,0,0,0.15); font-size: 12px; }}
  #sidebar .title {{ text-align: center; margin-bottom: 12px; font-size: 18px; font-weight: bold; letter-spacing: 1px; }}
  #sidebar .month {{ background: #f0f7e7; padding: 12px; border-radius: 10px; margin-bottom: 12px; border: 1px solid; text-align: center; }}
  #sidebar .label {{ font-size: 10px; color: #999; text-transform: uppercase; }}
  #sidebar .big {{ font-size: 20px; }}
  #sidebar .counters {{ display: flex; justify-content: space-around; margin-bottom: 12px; text-align: center;
    background: #f9f9f9; padding: 10px; border-radius: 8px; }}
  #sidebar .counters b {{ font-size: 18px; }}
  #sidebar .recent {{ border-top: 1px solid #eee; padding-top: 10px; }}
  #sidebar .tours {{ max-height: 180px; overflow-y: auto; margin-top: 8px; }}
  #sidebar .tour {{ border-bottom: 1px solid #eee; padding: 5px 0; }}
  #sidebar button {{ width: 100%; margin-top: 12px; padding: 10px; color: white; border: none;
    border-radius: 8px; cursor: pointer; font-weight: bold; }}
  #sidebar .updated {{ margin-top: 10px; padding-top: 8px; border-top: 1px solid #eee; font-size: 9px;
    color: #999; text-align: center; }}
</style>
</head>
<body>
<div id="map"></div>
{sidebar}
<script>
const DATA = {data};
const STYLE = {style};
const REPOSITORY = {repository};

const map = L.map('map').setView(DATA.center, DATA.zoom_start);
L.tileLayer('{tile_layer}', {{
  maxZoom: 18,
  attribution: '&copy; OpenStreetMap contributors'
}}).addTo(map);
if (L.control.fullscreen) {{
  L.control.fullscreen({{ position: 'topleft' }}).addTo(map);
}}

for (const bounds of DATA.tiles) {{
  L.rectangle(bounds, {{
    color: STYLE.tileColor, weight: 0.5, opacity: 0.8,
    fill: true, fillColor: STYLE.tileColor, fillOpacity: STYLE.tileOpacity
  }}).addTo(map);
}}
for (const bounds of DATA.cluster) {{
  L.rectangle(bounds, {{ color: '#FF6B35', weight: 1, fill: false }}).addTo(map);
}}
for (const trace of DATA.traces) {{
  L.polyline(trace, {{ color: STYLE.traceColor, weight: 2, opacity: STYLE.traceOpacity }}).addTo(map);
}}

function triggerUpdate() {{
  if (!REPOSITORY) {{
    alert("REPO_OWNER and REPO_NAME are not configured.");
    return;
  }}
  const token = prompt("GitHub personal access token (scopes: repo, workflow):");
  if (!token) return;

  fetch(`https://api.github.com/repos/${{REPOSITORY.owner}}/${{REPOSITORY.name}}/actions/workflows/main.yml/dispatches`, {{
    method: 'POST',
    headers: {{
      'Authorization': 'Bearer ' + token,
      'Accept': 'application/vnd.github.v3+json',
      'Content-Type': 'application/json'
    }},
    body: JSON.stringify({{ ref: 'main' }})
  }})
  .then(res => {{
    if (res.ok) {{
      alert("Sync started. Come back in 2-3 minutes for the new data.");
      window.location.reload();
    }} else {{
      return res.json().then(body => alert("Error: " + (body.message || "invalid token or missing permissions")));
    }}
  }})
  .catch(err => alert("Network error: " + err.message));
}}
</script>
</body>
</html>
"##,
        sidebar = sidebar_html(page),
        tile_layer = TILE_LAYER_URL,
    ))
}

pub fn write(path: &Path, html: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, html)?;
    info!(path = %path.display(), "map written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LastTour;
    use chrono::TimeZone;

    fn page<'a>(
        state: &'a State,
        tiles: &'a HashSet<TileIndex>,
        cluster: &'a [TileIndex],
        style: &'a MapStyle,
    ) -> MapPage<'a> {
        MapPage {
            state,
            tiles,
            cluster,
            zoom: 14,
            month: MonthStats {
                distance_m: 12_300.0,
                duration_s: 3_900.0,
            },
            style,
            repository: None,
            generated_at: Local.with_ymd_and_hms(2024, 5, 31, 18, 0, 0).unwrap(),
        }
    }

    #[test]
    fn empty_state_uses_default_center() {
        let state = State::default();
        let tiles = HashSet::new();
        let style = MapStyle::default();
        let data = map_data(&page(&state, &tiles, &[], &style)).unwrap();
        assert_eq!(data.center, DEFAULT_CENTER);
        assert_eq!(data.zoom_start, DEFAULT_ZOOM_START);
        assert!(data.tiles.is_empty());
    }

    #[test]
    fn one_rectangle_per_tile_and_lines_for_real_traces() {
        let mut state = State::default();
        state.record_tour(
            "1".into(),
            vec![
                vec![Coordinate::new(45.0, 5.0), Coordinate::new(45.2, 5.2)],
                vec![Coordinate::new(45.1, 5.1)],
            ],
        );
        let tiles: HashSet<TileIndex> = [TileIndex::new(8419, 5870), TileIndex::new(8420, 5870)]
            .into_iter()
            .collect();
        let cluster = vec![TileIndex::new(8419, 5870), TileIndex::new(8420, 5870)];
        let style = MapStyle::default();

        let data = map_data(&page(&state, &tiles, &cluster, &style)).unwrap();
        assert_eq!(data.tiles.len(), 2);
        assert_eq!(data.cluster.len(), 2);
        assert_eq!(data.traces.len(), 1);
        assert_eq!(data.zoom_start, TRACES_ZOOM_START);
        assert!((data.center.lat - 45.1).abs() < 1e-9);
    }

    #[test]
    fn sidebar_escapes_tour_names() {
        let mut state = State::default();
        state.last_tours.push(LastTour {
            name: "<script>alert(1)</script> & co".into(),
            date: "2024-05-01".into(),
            dist: 42.0,
        });
        let tiles = HashSet::new();
        let style = MapStyle::default();
        let html = render(&page(&state, &tiles, &[], &style)).unwrap();

        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt; &amp; co"));
        assert!(!html.contains("<script>alert(1)"));
        assert!(html.contains("MAY 2024"));
        assert!(html.contains("12.3 km"));
        assert!(html.contains("1h 5min"));
        assert!(html.contains("const REPOSITORY = null;"));
    }

    #[test]
    fn repository_is_embedded_as_json() {
        let state = State::default();
        let tiles = HashSet::new();
        let style = MapStyle::default();
        let repository = Repository {
            owner: "me".into(),
            name: "maps".into(),
        };
        let mut page = page(&state, &tiles, &[], &style);
        page.repository = Some(&repository);
        let html = render(&page).unwrap();
        assert!(html.contains(r#"const REPOSITORY = {"name":"maps","owner":"me"};"#));
    }
}
