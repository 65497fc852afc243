//! Resolved physical layout of one detector.
//!
//! A [`GeometryDescriptor`] is what every construction path (stacked
//! defaults, quadrant files, per-tile fragments, module grids) boils down
//! to: layout constants plus one first-pixel corner and orientation per
//! tile, all in meters. Conversion to pixel units happens in
//! [`PixelMap::build`](crate::PixelMap::build).

use std::fmt;

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::{AssemblyError, GeometryError, TileOrientation};

/// Largest accepted corner coordinate, in pixels from the origin.
pub const MAX_CORNER_PIXELS: f64 = i32::MAX as f64;

/// Detector family. Selects the edge category that may be masked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Fixed 16-module quadrant detectors (AGIPD, LPD, DSSC).
    #[serde(rename = "1m")]
    OneM,
    /// Row/column grids of monolithic modules (JUNGFRAU, ePix100).
    Generalized,
}

impl Family {
    /// The only edge category this family can mask.
    pub fn edge_kind(self) -> EdgeKind {
        match self {
            Family::OneM => EdgeKind::Tile,
            Family::Generalized => EdgeKind::Asic,
        }
    }

    /// Reject masking requests for the other family's edge category.
    pub fn check_mask(self, mask: EdgeMask) -> Result<(), AssemblyError> {
        let unsupported = match self {
            Family::OneM if mask.ignore_asic_edge => Some(EdgeKind::Asic),
            Family::Generalized if mask.ignore_tile_edge => Some(EdgeKind::Tile),
            _ => None,
        };
        match unsupported {
            Some(kind) => Err(AssemblyError::UnsupportedEdgeMask { family: self, kind }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::OneM => f.write_str("1M"),
            Family::Generalized => f.write_str("generalized"),
        }
    }
}

/// Category of border pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Tile,
    Asic,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Tile => f.write_str("tile"),
            EdgeKind::Asic => f.write_str("ASIC"),
        }
    }
}

/// Per-call edge masking request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeMask {
    pub ignore_tile_edge: bool,
    pub ignore_asic_edge: bool,
}

impl EdgeMask {
    pub const NONE: EdgeMask = EdgeMask {
        ignore_tile_edge: false,
        ignore_asic_edge: false,
    };

    pub const TILE: EdgeMask = EdgeMask {
        ignore_tile_edge: true,
        ignore_asic_edge: false,
    };

    pub const ASIC: EdgeMask = EdgeMask {
        ignore_tile_edge: false,
        ignore_asic_edge: true,
    };
}

/// Which module-data pixels count as edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum EdgeRule {
    /// Outermost rows and columns of every tile.
    TileBorders,
    /// Outermost rows and columns of every ASIC of a regular ASIC grid.
    AsicBorders { asic_shape: [usize; 2] },
    /// First and last row of the module only.
    ModuleRows,
}

impl EdgeRule {
    pub fn kind(&self) -> EdgeKind {
        match self {
            EdgeRule::TileBorders => EdgeKind::Tile,
            EdgeRule::AsicBorders { .. } | EdgeRule::ModuleRows => EdgeKind::Asic,
        }
    }

    /// Module-level edge test for ASIC rules; tile borders need the tile
    /// layout and always report `false` here.
    #[inline]
    pub fn is_module_edge(&self, row: usize, col: usize, module_shape: [usize; 2]) -> bool {
        match *self {
            EdgeRule::TileBorders => false,
            EdgeRule::AsicBorders {
                asic_shape: [ah, aw],
            } => {
                let (r, c) = (row % ah, col % aw);
                r == 0 || r + 1 == ah || c == 0 || c + 1 == aw
            }
            EdgeRule::ModuleRows => row == 0 || row + 1 == module_shape[0],
        }
    }
}

/// One rigid tile: where it sits in module data and where its first pixel is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TilePlacement {
    pub module: usize,
    /// `(row, col)` of the tile's first pixel in module data.
    pub origin: [usize; 2],
    /// `(rows, cols)` of the tile in module data.
    pub shape: [usize; 2],
    /// Physical corner of the first pixel (m).
    pub corner: Vector3<f64>,
    pub orientation: TileOrientation,
}

/// One tile as described by a crystallography geometry file: the corner
/// of its first pixel and the physical step per slow-scan (row) and
/// fast-scan (column) pixel, all in meters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileFragment {
    pub corner_pos: Vector3<f64>,
    pub ss_vec: Vector3<f64>,
    pub fs_vec: Vector3<f64>,
}

impl TileFragment {
    /// Scan vectors snapped to the nearest axis-aligned orientation.
    pub fn orientation(&self) -> Option<TileOrientation> {
        TileOrientation::from_scan_vectors(&self.ss_vec, &self.fs_vec)
    }
}

/// Immutable physical layout of a detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometryDescriptor {
    pub family: Family,
    pub n_modules: usize,
    /// `(rows, cols)` of one module's data.
    pub module_shape: [usize; 2],
    /// Pixel pitch `(x, y)` in meters.
    pub pixel_size: Vector2<f64>,
    pub edge_rule: EdgeRule,
    pub tiles: Vec<TilePlacement>,
}

impl GeometryDescriptor {
    /// Check the structural invariants the pixel map relies on.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.tiles.is_empty() || self.n_modules == 0 {
            return Err(GeometryError::EmptyGeometry);
        }
        let [my, mx] = self.module_shape;
        if my == 0 || mx == 0 {
            return Err(GeometryError::InvalidLayout(format!(
                "module shape {:?} is empty",
                self.module_shape
            )));
        }
        let px = self.pixel_size;
        if !(px.x.is_finite() && px.y.is_finite() && px.x > 0.0 && px.y > 0.0) {
            return Err(GeometryError::InvalidPixelSize);
        }
        if let EdgeRule::AsicBorders { asic_shape } = self.edge_rule {
            if asic_shape[0] == 0
                || asic_shape[1] == 0
                || my % asic_shape[0] != 0
                || mx % asic_shape[1] != 0
            {
                return Err(GeometryError::InvalidLayout(format!(
                    "ASIC shape {asic_shape:?} does not tile module shape {:?}",
                    self.module_shape
                )));
            }
        }

        let in_range =
            |v: f64, pitch: f64| v.is_finite() && (v / pitch).abs() <= MAX_CORNER_PIXELS;
        let first_shape = self.tiles[0].shape;
        for (idx, tile) in self.tiles.iter().enumerate() {
            if tile.module >= self.n_modules {
                return Err(GeometryError::InvalidModuleCount {
                    expected: self.n_modules,
                    got: tile.module + 1,
                });
            }
            let [oy, ox] = tile.origin;
            let [ty, tx] = tile.shape;
            if tile.shape != first_shape || ty == 0 || tx == 0 || oy + ty > my || ox + tx > mx {
                return Err(GeometryError::TileOutOfBounds {
                    module: tile.module,
                    tile: idx,
                });
            }
            if !(in_range(tile.corner.x, px.x) && in_range(tile.corner.y, px.y)) {
                return Err(GeometryError::InvalidCorner {
                    module: tile.module,
                    tile: idx,
                });
            }
        }
        Ok(())
    }

    /// Number of tiles in each module.
    pub fn tiles_per_module(&self) -> usize {
        self.tiles.len() / self.n_modules.max(1)
    }
}
