use thiserror::Error;

/// Errors raised by the tile projection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TileError {
    #[error("zoom level {zoom} is above the supported maximum of {max}")]
    InvalidZoom { zoom: u32, max: u32 },

    /// Web Mercator is undefined beyond roughly ±85.05°.
    #[error("latitude {lat} is outside the Web Mercator range (±{max})")]
    OutOfProjectionRange { lat: f64, max: f64 },

    #[error("longitude {lon} is outside [-180, 180]")]
    InvalidLongitude { lon: f64 },

    #[error("tile ({x}, {y}) does not exist at zoom {zoom}")]
    TileOutOfGrid { x: u32, y: u32, zoom: u32 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Tile(#[from] TileError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context}: status={status} body={body}")]
    Status {
        context: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("session cookie rejected (401): fetch a fresh komoot_session cookie")]
    SessionRejected,

    #[error("could not establish a Komoot session after {attempts} attempts")]
    SessionUnavailable { attempts: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GPX parse error: {0}")]
    Gpx(#[from] gpx::errors::GpxError),
}

pub type Result<T> = std::result::Result<T, Error>;
