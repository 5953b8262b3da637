//! Persisted sync state.
//!
//! The state file is plain JSON carrying a `version` field. Files written by
//! older revisions of the tool have no version and come in a few shapes; they
//! are all converted by [`migrate`] when loaded and rewritten in the current
//! shape on the next save.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

use crate::error::Result;
use crate::tiles::Coordinate;
use crate::trace::Trace;

pub const SCHEMA_VERSION: u32 = 2;

/// Summary of a recent tour shown in the sidebar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastTour {
    pub name: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// Kilometres, one decimal.
    pub dist: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub dist: f64,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub version: u32,
    #[serde(default)]
    pub traces: Vec<Trace>,
    #[serde(default)]
    pub tour_ids: Vec<String>,
    #[serde(default)]
    pub last_tours: Vec<LastTour>,
    #[serde(default)]
    pub stats: Stats,
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            traces: Vec::new(),
            tour_ids: Vec::new(),
            last_tours: Vec::new(),
            stats: Stats::default(),
        }
    }
}

impl State {
    pub fn has_tour(&self, tour_id: &str) -> bool {
        self.tour_ids.iter().any(|id| id == tour_id)
    }

    /// Append the traces of a freshly synced tour and mark it as seen.
    pub fn record_tour(&mut self, tour_id: String, traces: Vec<Trace>) {
        self.traces.extend(traces);
        self.tour_ids.push(tour_id);
        self.stats.count += 1;
    }

    pub fn points(&self) -> impl Iterator<Item = &Coordinate> {
        self.traces.iter().flatten()
    }
}

/// Tour ids were stored as numbers by some revisions.
#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyTourId {
    Text(String),
    Number(u64),
}

impl From<LegacyTourId> for String {
    fn from(id: LegacyTourId) -> Self {
        match id {
            LegacyTourId::Text(s) => s,
            LegacyTourId::Number(n) => n.to_string(),
        }
    }
}

/// Union of the unversioned object layouts.
#[derive(Deserialize)]
struct LegacyState {
    #[serde(default)]
    traces: Vec<Trace>,
    /// Flat list of visited points, no line structure.
    #[serde(default)]
    points: Vec<Coordinate>,
    /// Points grouped per tour id.
    #[serde(default)]
    tours: BTreeMap<String, Vec<Coordinate>>,
    #[serde(default, alias = "tours_processed")]
    tour_ids: Vec<LegacyTourId>,
    #[serde(default)]
    last_tours: Vec<LastTour>,
    stats: Option<Stats>,
}

/// Convert any known on-disk layout into the current [`State`].
///
/// Loose points become single-point traces: they still count towards visited
/// tiles but are not drawn as lines.
pub fn migrate(value: Value) -> serde_json::Result<State> {
    let versioned = matches!(&value, Value::Object(map) if map.contains_key("version"));

    match value {
        Value::Array(_) => {
            let points: Vec<Coordinate> = serde_json::from_value(value)?;
            info!(points = points.len(), "migrating point-list state file");
            Ok(State {
                traces: points.into_iter().map(|p| vec![p]).collect(),
                ..State::default()
            })
        }
        Value::Object(_) if versioned => {
            let mut state: State = serde_json::from_value(value)?;
            if state.version > SCHEMA_VERSION {
                warn!(
                    version = state.version,
                    "state file is newer than this binary, unknown fields are dropped"
                );
            }
            state.version = SCHEMA_VERSION;
            Ok(state)
        }
        Value::Object(_) => {
            let legacy: LegacyState = serde_json::from_value(value)?;
            info!("migrating unversioned state file");

            let mut tour_ids: Vec<String> = legacy.tour_ids.into_iter().map(String::from).collect();
            let mut traces = legacy.traces;
            traces.extend(legacy.points.into_iter().map(|p| vec![p]));
            for (tour_id, points) in legacy.tours {
                if !tour_ids.contains(&tour_id) {
                    tour_ids.push(tour_id);
                }
                traces.push(points);
            }

            let stats = legacy.stats.unwrap_or_else(|| Stats {
                dist: 0.0,
                count: tour_ids.len() as u32,
            });

            Ok(State {
                version: SCHEMA_VERSION,
                traces,
                tour_ids,
                last_tours: legacy.last_tours,
                stats,
            })
        }
        other => Err(serde::de::Error::custom(format!(
            "unsupported state file layout: {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Load the state file.
///
/// A missing file yields an empty state. A file that is not valid JSON, or
/// has an unknown layout, is logged and replaced by an empty state. Other I/O
/// errors are returned.
pub fn load(path: &Path) -> Result<State> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no state file yet, starting fresh");
            return Ok(State::default());
        }
        Err(e) => return Err(e.into()),
    };

    let state = match serde_json::from_str::<Value>(&content).and_then(migrate) {
        Ok(state) => state,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable state file, resetting");
            return Ok(State::default());
        }
    };

    info!(
        traces = state.traces.len(),
        tours = state.tour_ids.len(),
        "state loaded"
    );
    Ok(state)
}

/// Write the state, replacing the previous file only once the new one is complete.
pub fn save(path: &Path, state: &State) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;

    info!(path = %path.display(), traces = state.traces.len(), "state saved");
    Ok(())
}
