//! Core of the detector geometry engine.
//!
//! A [`GeometryDescriptor`] holds the physical layout of a segmented
//! detector: module shape, pixel pitch and one first-pixel corner and
//! orientation per tile. [`Geometry::new`] turns it into a [`PixelMap`]
//! once; after that, frames are moved between per-module buffers and one
//! assembled image with [`Geometry::assemble`] and [`Geometry::dismantle`],
//! for any [`Element`] type and any batch size.
//!
//! Module data can come from one contiguous array or from a
//! [`ModuleStack`], which borrows scattered per-module buffers and fills
//! absent modules on first read.
//!
//! This crate is family-agnostic; the 1M and generalized layouts live in
//! their own crates.

mod descriptor;
mod element;
mod error;
mod executor;
mod geometry;
mod logger;
mod mask;
mod module_stack;
mod orientation;
mod pixel_map;
mod train;

pub use descriptor::{
    EdgeKind, EdgeMask, EdgeRule, Family, GeometryDescriptor, TileFragment, TilePlacement,
    MAX_CORNER_PIXELS,
};
pub use element::{Element, FromElement};
pub use error::{AssemblyError, GeometryError};
pub use executor::{assemble, dismantle, ModuleSource, SourceFrames};
pub use geometry::Geometry;
pub use mask::apply_edge_mask;
pub use module_stack::{ModuleStack, StackError, StackSlice};
pub use orientation::{TileOrientation, TILE_ORIENTATIONS_D4};
pub use pixel_map::{module_edge_mask_for, EdgeFlags, PixelMap, Placement, UNMAPPED};
pub use train::{stack_detector_modules, ModuleSelection, MAX_MODULES};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level, LOG_ENV};
