use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::tiles::{MAX_ZOOM, TILE_ZOOM};

pub const DEFAULT_DATA_FILE: &str = "all_points.json";
pub const DEFAULT_OUTPUT: &str = "index.html";

/// Colours and opacities of the rendered map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapStyle {
    pub tile_color: String,
    pub trace_color: String,
    pub tile_opacity: f64,
    pub trace_opacity: f64,
}

impl Default for MapStyle {
    fn default() -> Self {
        Self {
            tile_color: "#7ED321".to_string(),
            trace_color: "#D0021B".to_string(),
            tile_opacity: 0.15,
            trace_opacity: 0.6,
        }
    }
}

/// GitHub repository whose `main.yml` workflow re-runs the sync.
#[derive(Debug, Clone, PartialEq)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub user_id: Option<String>,
    pub session_cookie: Option<String>,
    pub repository: Option<Repository>,
    pub data_file: PathBuf,
    /// Keep one GPX point out of this many.
    pub simplify_factor: usize,
    pub tile_zoom: u32,
    pub style: MapStyle,
}

impl Config {
    /// Read the configuration from the process environment (`.env` is loaded
    /// by the binary before this runs).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let repository = match (non_empty("REPO_OWNER"), non_empty("REPO_NAME")) {
            (Some(owner), Some(name)) => Some(Repository { owner, name }),
            _ => None,
        };

        let defaults = MapStyle::default();
        let style = MapStyle {
            tile_color: non_empty("TILE_COLOR").unwrap_or(defaults.tile_color),
            trace_color: non_empty("TRACE_COLOR").unwrap_or(defaults.trace_color),
            tile_opacity: parse_or(
                "TILE_OPACITY",
                non_empty("TILE_OPACITY"),
                defaults.tile_opacity,
            )?,
            trace_opacity: parse_or(
                "TRACE_OPACITY",
                non_empty("TRACE_OPACITY"),
                defaults.trace_opacity,
            )?,
        };

        let tile_zoom = parse_or("TILE_ZOOM", non_empty("TILE_ZOOM"), TILE_ZOOM)?;
        if tile_zoom > MAX_ZOOM {
            return Err(Error::Config(format!(
                "TILE_ZOOM={tile_zoom} exceeds the maximum zoom {MAX_ZOOM}"
            )));
        }

        Ok(Self {
            user_id: non_empty("KOMOOT_USER_ID"),
            session_cookie: non_empty("KOMOOT_SESSION_COOKIE"),
            repository,
            data_file: non_empty("DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FILE)),
            simplify_factor: parse_or("SIMPLIFY_FACTOR", non_empty("SIMPLIFY_FACTOR"), 3)?,
            tile_zoom,
            style,
        })
    }

    /// User id and session cookie, both required for syncing.
    pub fn credentials(&self) -> Result<(&str, &str)> {
        match (self.user_id.as_deref(), self.session_cookie.as_deref()) {
            (Some(user), Some(cookie)) => Ok((user, cookie)),
            _ => Err(Error::Config(
                "KOMOOT_USER_ID and KOMOOT_SESSION_COOKIE must be set (see .env)".to_string(),
            )),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| Error::Config(format!("{key}={value:?} is not a valid value"))),
    }
}
