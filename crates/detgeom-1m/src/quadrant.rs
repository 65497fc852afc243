//! Construction from quadrant positions and a per-module/per-tile offset file.

use std::collections::BTreeMap;

use detgeom_core::{Geometry, GeometryError, TilePlacement};
use log::debug;
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{CornerConvention, Layout1M, N_MODULES_PER_QUAD, N_QUADS};

/// Parsed content of a quadrant geometry file.
///
/// Module records are keyed `Q{q}/M{m}` (both 1-based), tile records
/// `T{tt}` (1-based, two digits). Positions are in millimeters; only the
/// first two components (x, y) are used.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuadrantGeometryFile {
    pub modules: BTreeMap<String, ModuleRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub position: Vec<f64>,
    #[serde(default)]
    pub tiles: BTreeMap<String, TileRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub position: Vec<f64>,
}

impl QuadrantGeometryFile {
    /// Record of module `module` in quadrant `quad` (both 0-based).
    pub fn module(&self, quad: usize, module: usize) -> Result<&ModuleRecord, GeometryError> {
        let key = format!("Q{}/M{}", quad + 1, module + 1);
        self.modules
            .get(&key)
            .ok_or_else(|| GeometryError::MalformedFile(format!("missing module {key}")))
    }
}

impl ModuleRecord {
    /// Record of tile `tile` (0-based).
    pub fn tile(&self, tile: usize) -> Result<&TileRecord, GeometryError> {
        let key = format!("T{:02}", tile + 1);
        self.tiles
            .get(&key)
            .ok_or_else(|| GeometryError::MalformedFile(format!("missing tile {key}")))
    }
}

fn xy_mm(position: &[f64], what: impl FnOnce() -> String) -> Result<Vector2<f64>, GeometryError> {
    match position {
        [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Vector2::new(*x, *y)),
        _ => Err(GeometryError::MalformedFile(format!(
            "{} needs a finite (x, y) position, got {:?}",
            what(),
            position
        ))),
    }
}

impl Layout1M {
    /// Resolve every tile's first-pixel corner from the four quadrant
    /// corners `(x, y)` (mm) and the module/tile offsets of `file`.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, file)))]
    pub fn from_quad_positions(
        &self,
        file: &QuadrantGeometryFile,
        positions: &[[f64; 2]; N_QUADS],
    ) -> Result<Geometry, GeometryError> {
        let convention = self
            .corner_convention
            .ok_or(GeometryError::UnsupportedConstruction {
                detector: self.name,
                method: "from quadrant positions",
            })?;

        let px = self.pixel_size();
        let [th, tw] = self.tile_shape;
        let mut tiles = Vec::with_capacity(crate::N_MODULES * self.tiles_per_module);

        for (quad, quad_pos) in positions.iter().enumerate() {
            let quad_pos = Vector2::new(quad_pos[0], quad_pos[1]);
            let orientation = self.quadrant_orientation(quad).ok_or(
                GeometryError::UnsupportedOrientation {
                    module: quad * N_MODULES_PER_QUAD,
                    tile: 0,
                },
            )?;
            // physical extent of a tile along x and y
            let extent = if orientation.is_transposed() {
                Vector2::new(th as f64 * px.x, tw as f64 * px.y)
            } else {
                Vector2::new(tw as f64 * px.x, th as f64 * px.y)
            };
            let scan_x = orientation.ss[0] + orientation.fs[0];
            let scan_y = orientation.ss[1] + orientation.fs[1];

            for m in 0..N_MODULES_PER_QUAD {
                let module = quad * N_MODULES_PER_QUAD + m;
                let record = file.module(quad, m)?;
                let module_pos = xy_mm(&record.position, || format!("Q{}/M{}", quad + 1, m + 1))?;

                for t in 0..self.tiles_per_module {
                    let tile_pos = xy_mm(&record.tile(t)?.position, || {
                        format!("Q{}/M{}/T{:02}", quad + 1, m + 1, t + 1)
                    })?;
                    let mut corner = (quad_pos + module_pos + tile_pos) * 1e-3;
                    match convention {
                        CornerConvention::MeasuredLowCorner => {
                            if scan_x < 0 {
                                corner.x += extent.x;
                            }
                            if scan_y < 0 {
                                corner.y += extent.y;
                            }
                        }
                        CornerConvention::LastPixel => corner -= extent,
                    }
                    tiles.push(TilePlacement {
                        module,
                        origin: self.tile_origin(t),
                        shape: self.tile_shape,
                        corner: Vector3::new(corner.x, corner.y, 0.0),
                        orientation,
                    });
                }
            }
        }

        debug!(
            "{}: resolved {} tiles from quadrant positions {:?}",
            self.name,
            tiles.len(),
            positions
        );
        Geometry::new(self.descriptor(tiles))
    }
}
