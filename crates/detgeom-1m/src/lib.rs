//! 1M quadrant detectors: AGIPD-1M, LPD-1M and DSSC-1M.
//!
//! Each detector has 16 modules in 4 quadrants. A [`Layout1M`] holds the
//! constant shape of one model; a [`Geometry`](detgeom_core::Geometry) is
//! built from it in one of three ways:
//!
//! - [`Layout1M::stacked`]: modules edge to edge, no gaps.
//! - [`Layout1M::from_quad_positions`]: four quadrant corners plus a
//!   [`QuadrantGeometryFile`] of module and tile offsets (LPD, DSSC).
//! - [`Layout1M::from_tile_fragments`]: corners and scan vectors already
//!   resolved per tile.
//!
//! ```
//! use detgeom_1m::Detector1M;
//!
//! let geom = Detector1M::Dssc.layout().stacked().unwrap();
//! assert_eq!(geom.assembled_shape(), [1024, 1024]);
//! ```

mod fragments;
mod layout;
mod quadrant;

pub use layout::{
    CornerConvention, Detector1M, Layout1M, TileArrangement, AGIPD_1M, DSSC_1M, LPD_1M, N_MODULES,
    N_MODULES_PER_QUAD, N_QUADS,
};
pub use quadrant::{ModuleRecord, QuadrantGeometryFile, TileRecord};
