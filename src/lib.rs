//! Komoot tour sync and tile-exploration map.
//!
//! The core is [`tiles`]: Web Mercator tile projection and the largest
//! 4-connected cluster of visited tiles. Everything else fetches tours,
//! persists them and renders the map page.

pub mod config;
pub mod error;
pub mod komoot;
pub mod map;
pub mod map_server;
pub mod stats;
pub mod storage;
pub mod sync;
pub mod tiles;
pub mod trace;

pub use error::{Error, Result, TileError};
pub use tiles::{
    coordinate_to_tile, largest_cluster, tile_to_bbox, Coordinate, TileBounds, TileIndex,
};
