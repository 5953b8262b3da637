use std::io::BufReader;

use crate::error::Result;
use crate::tiles::Coordinate;

/// An ordered run of points from one GPX track segment.
pub type Trace = Vec<Coordinate>;

/// Stored coordinates keep 5 decimals (about 1 m).
const COORDINATE_PRECISION: f64 = 1e5;

fn round_coordinate(c: Coordinate) -> Coordinate {
    Coordinate::new(
        (c.lat * COORDINATE_PRECISION).round() / COORDINATE_PRECISION,
        (c.lon * COORDINATE_PRECISION).round() / COORDINATE_PRECISION,
    )
}

/// Keep one point out of every `factor`, always starting with the first.
pub fn simplify(points: Vec<Coordinate>, factor: usize) -> Vec<Coordinate> {
    if factor <= 1 {
        return points;
    }
    points.into_iter().step_by(factor).collect()
}

/// Parse a GPX document into simplified, rounded traces.
///
/// Each track segment becomes one trace; segments left with fewer than two
/// points after simplification are dropped.
pub fn extract_traces(gpx_text: &str, simplify_factor: usize) -> Result<Vec<Trace>> {
    let gpx = gpx::read(BufReader::new(gpx_text.as_bytes()))?;

    let mut traces = Vec::new();
    for track in &gpx.tracks {
        for segment in &track.segments {
            let points: Vec<Coordinate> = segment
                .points
                .iter()
                .map(|p| round_coordinate(Coordinate::new(p.point().y(), p.point().x())))
                .collect();

            let simplified = simplify(points, simplify_factor);
            if simplified.len() > 1 {
                traces.push(simplified);
            }
        }
    }

    Ok(traces)
}
