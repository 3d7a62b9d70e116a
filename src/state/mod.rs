//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `TileStatus`: lifecycle of one grid tile (pending, in progress, completed, failed)
//! - `PlaceStatus`: outcome of the latest extraction for one place

mod place_state;
mod tile_state;

// Re-export main types
pub use place_state::PlaceStatus;
pub use tile_state::TileStatus;
