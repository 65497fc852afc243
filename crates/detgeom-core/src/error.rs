//! Error types for geometry construction and per-call assembly.

use crate::descriptor::{EdgeKind, Family};
use crate::module_stack::StackError;

/// Configuration errors raised while building a geometry.
#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    #[error("malformed geometry file: {0}")]
    MalformedFile(String),
    #[error("invalid module count (expected {expected}, got {got})")]
    InvalidModuleCount { expected: usize, got: usize },
    #[error("module {module} has {got} tiles, expected {expected}")]
    InvalidTileCount {
        module: usize,
        expected: usize,
        got: usize,
    },
    #[error("tile {tile} of module {module} does not fit in the module data")]
    TileOutOfBounds { module: usize, tile: usize },
    #[error("tile {tile} of module {module} is not axis-aligned")]
    UnsupportedOrientation { module: usize, tile: usize },
    #[error("tile {tile} of module {module} has a non-finite or out-of-range corner position")]
    InvalidCorner { module: usize, tile: usize },
    #[error("pixel size must be finite and > 0")]
    InvalidPixelSize,
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
    #[error("{detector} geometry cannot be built {method}")]
    UnsupportedConstruction {
        detector: &'static str,
        method: &'static str,
    },
    #[error("geometry has no tiles")]
    EmptyGeometry,
    #[error("assembled image or module data too large to index ({pixels} pixels)")]
    TooLarge { pixels: usize },
}

/// Per-call usage errors of the assembly/dismantle executor.
///
/// All of them are detected before the first write, so a rejected call
/// leaves its output buffer untouched.
#[derive(thiserror::Error, Debug)]
pub enum AssemblyError {
    #[error("{family} geometry does not support masking {kind} edges")]
    UnsupportedEdgeMask { family: Family, kind: EdgeKind },
    #[error("{what} must have {expected} dimensions, got {got}")]
    InvalidNdim {
        what: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("module count mismatch (geometry has {expected}, data has {got})")]
    ModuleCountMismatch { expected: usize, got: usize },
    #[error("{what} shape mismatch (expected {expected:?}, got {got:?})")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("batch mismatch (input {input:?}, output {output:?})")]
    BatchMismatch {
        input: Option<usize>,
        output: Option<usize>,
    },
    #[error("stacking axis {axis} of a {ndim}-d module stack must sit right before (y, x)")]
    StackAxis { axis: usize, ndim: usize },
    #[error(transparent)]
    Stack(#[from] StackError),
}
