//! Grid planning
//!
//! Converts a bounding box into an ordered list of tile centers. Rows advance by
//! `cell_height * (1 - overlap)` and columns by `cell_width * (1 - overlap)`, with the
//! longitude step recomputed for every row since the size of a longitude degree
//! shrinks with latitude.

use crate::geo::{BoundingBox, TilePoint};
use crate::{GridError, GridResult};

/// Mean length of one degree of latitude in kilometres
pub const KM_PER_DEGREE_LATITUDE: f64 = 110.574;

/// Length of one degree of longitude at the equator in kilometres
pub const KM_PER_DEGREE_LONGITUDE: f64 = 111.320;

/// Last-cell edges that fall short of the bbox by less than this are treated as touching it
const EDGE_SLACK_DEGREES: f64 = 1e-9;

/// Kilometres per degree of longitude at the given latitude
///
/// Fails with `UndefinedLongitudeScale` at or beyond the poles, where the cosine
/// vanishes or turns negative.
pub fn km_per_degree_longitude(latitude: f64) -> GridResult<f64> {
    let cos = latitude.to_radians().cos();
    if latitude.abs() >= 90.0 || !(cos.is_finite() && cos > 1e-12) {
        return Err(GridError::UndefinedLongitudeScale { latitude });
    }
    Ok(KM_PER_DEGREE_LONGITUDE * cos)
}

/// Generates tile centers covering `bbox`
///
/// # Arguments
///
/// * `bbox` - Area to cover
/// * `cell_width_km` - Width of one tile footprint
/// * `cell_height_km` - Height of one tile footprint
/// * `overlap_ratio` - Fraction of a cell shared with its neighbour, in `[0, 1)`
///
/// # Returns
///
/// Tiles in row-major order with zero-based rows and columns. The output depends
/// only on the inputs.
pub fn generate_grid(
    bbox: &BoundingBox,
    cell_width_km: f64,
    cell_height_km: f64,
    overlap_ratio: f64,
) -> GridResult<Vec<TilePoint>> {
    validate_inputs(bbox, cell_width_km, cell_height_km, overlap_ratio)?;

    let cell_h_deg = cell_height_km / KM_PER_DEGREE_LATITUDE;
    let step_h_deg = cell_h_deg * (1.0 - overlap_ratio);

    let mut tiles = Vec::new();
    let mut index = 0u32;

    for (row, lat) in axis_centers(bbox.min_lat, bbox.max_lat, cell_h_deg, step_h_deg)?
        .into_iter()
        .enumerate()
    {
        let km_per_deg_lng = km_per_degree_longitude(lat)?;
        let cell_w_deg = cell_width_km / km_per_deg_lng;
        let step_w_deg = cell_w_deg * (1.0 - overlap_ratio);

        for (col, lng) in axis_centers(bbox.min_lng, bbox.max_lng, cell_w_deg, step_w_deg)?
            .into_iter()
            .enumerate()
        {
            tiles.push(TilePoint {
                index,
                row: row as u32,
                col: col as u32,
                latitude: lat,
                longitude: lng,
            });
            index += 1;
        }
    }

    tracing::debug!(
        "Planned {} tiles ({:.3}x{:.3} km, overlap {:.2})",
        tiles.len(),
        cell_width_km,
        cell_height_km,
        overlap_ratio
    );

    Ok(tiles)
}

/// Centers along one axis, starting at `min + cell/2`
///
/// A further center is emitted while it stays within `max + step/10`, or while the
/// previous cell's far edge still leaves part of the axis uncovered.
fn axis_centers(min: f64, max: f64, cell_deg: f64, step_deg: f64) -> GridResult<Vec<f64>> {
    if !step_deg.is_finite() || step_deg <= 0.0 || !cell_deg.is_finite() {
        return Err(GridError::InvalidArgument(format!(
            "grid step must be finite and positive, got {} degrees",
            step_deg
        )));
    }

    let half = cell_deg / 2.0;
    let epsilon = step_deg / 10.0;

    let mut centers = Vec::new();
    let mut center = min + half;
    loop {
        centers.push(center);
        let next = center + step_deg;
        let uncovered = center + half < max - EDGE_SLACK_DEGREES;
        if next <= max + epsilon || uncovered {
            center = next;
        } else {
            break;
        }
    }
    Ok(centers)
}

fn validate_inputs(
    bbox: &BoundingBox,
    cell_width_km: f64,
    cell_height_km: f64,
    overlap_ratio: f64,
) -> GridResult<()> {
    if !(cell_width_km.is_finite() && cell_width_km > 0.0) {
        return Err(GridError::InvalidArgument(format!(
            "cell width must be > 0, got {}",
            cell_width_km
        )));
    }

    if !(cell_height_km.is_finite() && cell_height_km > 0.0) {
        return Err(GridError::InvalidArgument(format!(
            "cell height must be > 0, got {}",
            cell_height_km
        )));
    }

    if !(0.0..1.0).contains(&overlap_ratio) {
        return Err(GridError::InvalidArgument(format!(
            "overlap ratio must be in [0, 1), got {}",
            overlap_ratio
        )));
    }

    let coords = [bbox.min_lat, bbox.min_lng, bbox.max_lat, bbox.max_lng];
    if coords.iter().any(|c| !c.is_finite()) {
        return Err(GridError::InvalidArgument(format!(
            "bounding box has non-finite coordinates: {:?}",
            bbox
        )));
    }

    if bbox.min_lat > bbox.max_lat || bbox.min_lng > bbox.max_lng {
        return Err(GridError::InvalidArgument(format!(
            "bounding box min exceeds max: {:?}",
            bbox
        )));
    }

    if bbox.min_lat < -90.0 || bbox.max_lat > 90.0 {
        return Err(GridError::InvalidArgument(format!(
            "latitude out of range: {:?}",
            bbox
        )));
    }

    Ok(())
}
