//! Viewport coverage and cell sizing
//!
//! Grid cells are sized from how much ground one browser viewport shows at the
//! configured zoom. A driver may measure this directly; otherwise the Web-Mercator
//! meters-per-pixel formula is used.

/// Meters per pixel at zoom 0 on the equator (256px tiles)
const MERCATOR_METERS_PER_PIXEL: f64 = 156_543.033_92;

/// Cell size used when nothing better is known
const DEFAULT_CELL_WIDTH_KM: f64 = 3.0;
const DEFAULT_CELL_HEIGHT_KM: f64 = 1.8;

/// Ground coverage of one viewport, as reported by a driver probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coverage {
    pub meters_per_pixel: f64,
    pub viewport_width_px: u32,
    pub viewport_height_px: u32,
}

impl Coverage {
    pub fn viewport_width_m(&self) -> f64 {
        self.meters_per_pixel * self.viewport_width_px as f64
    }

    pub fn viewport_height_m(&self) -> f64 {
        self.meters_per_pixel * self.viewport_height_px as f64
    }
}

/// Chosen grid cell dimensions and where they came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSize {
    pub width_km: f64,
    pub height_km: f64,
    /// Meters per pixel used to derive the size, if any
    pub meters_per_pixel: Option<f64>,
    pub viewport_width_px: Option<u32>,
    pub viewport_height_px: Option<u32>,
}

impl CellSize {
    fn explicit(width_km: f64, height_km: f64) -> Self {
        Self {
            width_km,
            height_km,
            meters_per_pixel: None,
            viewport_width_px: None,
            viewport_height_px: None,
        }
    }
}

/// Web-Mercator meters per pixel at `latitude` and `zoom`
pub fn fallback_meters_per_pixel(latitude: f64, zoom: u8) -> f64 {
    MERCATOR_METERS_PER_PIXEL * latitude.to_radians().cos() / 2f64.powi(zoom as i32)
}

/// Derives a cell size from measured viewport coverage
///
/// The viewport footprint is shrunk by `safety_factor` so neighbouring tiles overlap
/// even when the measurement is slightly optimistic.
pub fn cell_size_from_coverage(coverage: &Coverage, safety_factor: f64) -> CellSize {
    CellSize {
        width_km: coverage.viewport_width_m() / 1000.0 * safety_factor,
        height_km: coverage.viewport_height_m() / 1000.0 * safety_factor,
        meters_per_pixel: Some(coverage.meters_per_pixel),
        viewport_width_px: Some(coverage.viewport_width_px),
        viewport_height_px: Some(coverage.viewport_height_px),
    }
}

/// Picks the cell size for a new grid
///
/// Precedence: explicit dimensions, then a measured coverage, then the Mercator
/// estimate for the window size, then fixed defaults.
pub fn plan_cell_size(
    explicit: Option<(f64, f64)>,
    measured: Option<Coverage>,
    center_lat: f64,
    zoom: u8,
    window: (u32, u32),
    safety_factor: f64,
) -> CellSize {
    if let Some((width_km, height_km)) = explicit {
        return CellSize::explicit(width_km, height_km);
    }

    if let Some(coverage) = measured.filter(|c| c.meters_per_pixel > 0.0) {
        return cell_size_from_coverage(&coverage, safety_factor);
    }

    let mpp = fallback_meters_per_pixel(center_lat, zoom);
    if mpp.is_finite() && mpp > 0.0 {
        let estimated = Coverage {
            meters_per_pixel: mpp,
            viewport_width_px: window.0,
            viewport_height_px: window.1,
        };
        let size = cell_size_from_coverage(&estimated, safety_factor);
        if size.width_km > 0.0 && size.height_km > 0.0 {
            return size;
        }
    }

    tracing::warn!(
        "Could not derive cell size, using {}x{} km",
        DEFAULT_CELL_WIDTH_KM,
        DEFAULT_CELL_HEIGHT_KM
    );
    CellSize::explicit(DEFAULT_CELL_WIDTH_KM, DEFAULT_CELL_HEIGHT_KM)
}
