use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::f64::consts::PI;

use crate::error::TileError;

/// Zoom level used for tile exploration (1 tile ≈ 2.4 km at the equator).
pub const TILE_ZOOM: u32 = 14;

/// Highest zoom accepted; keeps 2^z and the tile indices inside `u32`.
pub const MAX_ZOOM: u32 = 30;

/// Latitude at which Web Mercator reaches the square map edge, `atan(sinh(π))`.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

/// A WGS84 position in degrees. Serialized as `[lat, lon]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl From<[f64; 2]> for Coordinate {
    fn from([lat, lon]: [f64; 2]) -> Self {
        Self { lat, lon }
    }
}

impl From<Coordinate> for [f64; 2] {
    fn from(c: Coordinate) -> Self {
        [c.lat, c.lon]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileIndex {
    pub x: u32,
    pub y: u32,
}

impl TileIndex {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// The four edge-sharing neighbours that exist in the non-negative grid.
    fn neighbors(self) -> Vec<TileIndex> {
        let TileIndex { x, y } = self;
        let mut neighbors = Vec::with_capacity(4);
        if x > 0 {
            neighbors.push(TileIndex::new(x - 1, y));
        }
        if let Some(right) = x.checked_add(1) {
            neighbors.push(TileIndex::new(right, y));
        }
        if y > 0 {
            neighbors.push(TileIndex::new(x, y - 1));
        }
        if let Some(down) = y.checked_add(1) {
            neighbors.push(TileIndex::new(x, down));
        }
        neighbors
    }
}

/// Geographic rectangle covered by one tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TileBounds {
    pub north_west: Coordinate,
    pub south_east: Coordinate,
}

impl TileBounds {
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.north_west.lat + self.south_east.lat) / 2.0,
            (self.north_west.lon + self.south_east.lon) / 2.0,
        )
    }

    /// `[[lat, lon], [lat, lon]]`, the shape Leaflet's `L.rectangle` takes.
    pub fn as_leaflet(&self) -> [[f64; 2]; 2] {
        [self.north_west.into(), self.south_east.into()]
    }
}

fn check_zoom(zoom: u32) -> Result<(), TileError> {
    if zoom > MAX_ZOOM {
        return Err(TileError::InvalidZoom {
            zoom,
            max: MAX_ZOOM,
        });
    }
    Ok(())
}

/// Number of tiles along each axis at `zoom`.
pub fn tiles_per_axis(zoom: u32) -> Result<u32, TileError> {
    check_zoom(zoom)?;
    Ok(1u32 << zoom)
}

/// Project a coordinate onto the slippy-map grid.
///
/// The east edge (`lon = 180`) and the south edge (`lat = -MAX_LATITUDE`) fall
/// on the boundary `2^z` and are mapped into the last column and row.
/// Latitudes beyond [`MAX_LATITUDE`] have no Mercator image and are rejected.
pub fn coordinate_to_tile(coord: Coordinate, zoom: u32) -> Result<TileIndex, TileError> {
    let n = tiles_per_axis(zoom)?;
    let Coordinate { lat, lon } = coord;

    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(TileError::InvalidLongitude { lon });
    }
    if !lat.is_finite() || lat.abs() > MAX_LATITUDE {
        return Err(TileError::OutOfProjectionRange {
            lat,
            max: MAX_LATITUDE,
        });
    }

    let scale = n as f64;
    let x = ((lon + 180.0) / 360.0 * scale).floor() as u32;
    let lat_rad = lat.to_radians();
    // Negative values right at the north edge saturate to 0 in the cast.
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * scale).floor() as u32;

    Ok(TileIndex::new(x.min(n - 1), y.min(n - 1)))
}

/// Inverse projection of a tile's corners.
pub fn tile_to_bbox(tile: TileIndex, zoom: u32) -> Result<TileBounds, TileError> {
    let n = tiles_per_axis(zoom)?;
    if tile.x >= n || tile.y >= n {
        return Err(TileError::TileOutOfGrid {
            x: tile.x,
            y: tile.y,
            zoom,
        });
    }

    let scale = n as f64;
    let corner = |x: u32, y: u32| {
        let lon = x as f64 / scale * 360.0 - 180.0;
        let lat = (PI * (1.0 - 2.0 * y as f64 / scale))
            .sinh()
            .atan()
            .to_degrees();
        Coordinate::new(lat, lon)
    };

    Ok(TileBounds {
        north_west: corner(tile.x, tile.y),
        south_east: corner(tile.x + 1, tile.y + 1),
    })
}

/// Collect the unique tiles touched by a set of traces.
///
/// Points outside the projection range are skipped and counted in the second
/// element; a bad zoom fails the whole call.
pub fn visited_tiles<T: AsRef<[Coordinate]>>(
    traces: &[T],
    zoom: u32,
) -> Result<(HashSet<TileIndex>, usize), TileError> {
    check_zoom(zoom)?;

    let mut tiles = HashSet::new();
    let mut skipped = 0usize;
    for trace in traces {
        for &point in trace.as_ref() {
            match coordinate_to_tile(point, zoom) {
                Ok(tile) => {
                    tiles.insert(tile);
                }
                Err(e @ TileError::InvalidZoom { .. }) => return Err(e),
                Err(_) => skipped += 1,
            }
        }
    }

    Ok((tiles, skipped))
}

/// Members of one largest 4-connected component, found by BFS.
///
/// Which component is returned on a tie is unspecified; the size is not.
pub fn max_cluster(tiles: &HashSet<TileIndex>) -> Vec<TileIndex> {
    let mut unvisited = tiles.clone();
    let mut max_cluster: Vec<TileIndex> = Vec::new();

    while let Some(&start) = unvisited.iter().next() {
        let mut queue = VecDeque::new();
        let mut cluster = Vec::new();

        queue.push_back(start);
        unvisited.remove(&start);

        while let Some(tile) = queue.pop_front() {
            cluster.push(tile);
            for neighbor in tile.neighbors() {
                if unvisited.remove(&neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }

        if cluster.len() > max_cluster.len() {
            max_cluster = cluster;
        }
    }

    max_cluster
}

/// Size of the largest 4-connected cluster; 0 for an empty set.
pub fn largest_cluster(tiles: &HashSet<TileIndex>) -> usize {
    max_cluster(tiles).len()
}
