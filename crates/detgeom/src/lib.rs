//! Facade crate for the `detgeom-*` workspace.
//!
//! Assembles per-module readout of segmented X-ray detectors into one
//! image and dismantles it back, for the 1M quadrant detectors (AGIPD,
//! LPD, DSSC) and the generalized grid detectors (JUNGFRAU, ePix100).
//!
//! ## Quickstart
//!
//! ```
//! use detgeom::core::EdgeMask;
//! use detgeom::onem::Detector1M;
//! use ndarray::Array4;
//!
//! let geom = Detector1M::Agipd.layout().stacked().unwrap();
//! let modules = Array4::<u16>::ones((4, 16, 512, 128));
//! let mut image = geom.output_array_for_position::<f32>(Some(4));
//! geom.assemble(modules.view(), image.view_mut(), EdgeMask::TILE).unwrap();
//! assert_eq!(image.shape(), &[4, 1024, 1024]);
//! ```
//!
//! ## API map
//! - `detgeom::core`: pixel map, assemble/dismantle, module stacks, logging.
//! - `detgeom::onem`: AGIPD-1M, LPD-1M and DSSC-1M layouts.
//! - `detgeom::generalized`: JUNGFRAU, ePix100 and custom grid layouts.
//! - [`GeometryConfig`] and [`build_geometry`]: JSON-driven construction.

pub use detgeom_1m as onem;
pub use detgeom_core as core;
pub use detgeom_generalized as generalized;

pub use detgeom_core::{
    AssemblyError, EdgeMask, Geometry, GeometryError, ModuleStack, StackError,
};

mod config;
mod io;

pub use config::{
    build_geometry, CustomGridConfig, GeometryConfig, GridConfig, GridSource, OneMConfig,
    OneMSource,
};
pub use io::{
    default_module_numbers, jungfrau_panel_name, load_quadrant_file, write_quadrant_file,
    LoadError, PanelFile,
};
