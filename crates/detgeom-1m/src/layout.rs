use std::fmt;

use detgeom_core::{
    EdgeRule, Family, Geometry, GeometryDescriptor, GeometryError, TileOrientation, TilePlacement,
};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub const N_QUADS: usize = 4;
pub const N_MODULES_PER_QUAD: usize = 4;
pub const N_MODULES: usize = N_QUADS * N_MODULES_PER_QUAD;

/// How tiles are laid out inside one module's data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileArrangement {
    /// Tile `t` starts at row `t * tile_rows`.
    Rows,
    /// Tile `t` starts at column `t * tile_cols`.
    Columns,
    /// Two columns of tiles: the first half numbered upward on the left,
    /// the second half numbered downward on the right.
    LpdHalves,
}

/// Which tile corner a quadrant geometry file records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CornerConvention {
    /// The low-x/low-y corner; the first pixel sits one tile extent away
    /// along every axis scanned in the negative direction.
    MeasuredLowCorner,
    /// The far corner of the last pixel; the first pixel sits one tile
    /// extent back along both axes.
    LastPixel,
}

/// Constant layout of one 1M detector model.
#[derive(Clone, Debug, PartialEq)]
pub struct Layout1M {
    pub name: &'static str,
    /// `(rows, cols)` of one module's data.
    pub module_shape: [usize; 2],
    /// `(rows, cols)` of one tile.
    pub tile_shape: [usize; 2],
    pub tiles_per_module: usize,
    pub tile_arrangement: TileArrangement,
    /// Pixel pitch `(x, y)` in meters.
    pub pixel_size: [f64; 2],
    /// `(x, y)` scan directions per quadrant: fast scan along
    /// `x_orient * x`, slow scan along `y_orient * y`.
    pub quad_orientations: [[i8; 2]; N_QUADS],
    /// `None` if the detector has no quadrant-file construction.
    pub corner_convention: Option<CornerConvention>,
    /// `(rows, cols)` of modules in the default stacked layout.
    pub stack_grid: [usize; 2],
}

pub const AGIPD_1M: Layout1M = Layout1M {
    name: "AGIPD-1M",
    module_shape: [512, 128],
    tile_shape: [64, 128],
    tiles_per_module: 8,
    tile_arrangement: TileArrangement::Rows,
    pixel_size: [200e-6, 200e-6],
    quad_orientations: [[-1, 1], [-1, 1], [1, -1], [1, -1]],
    corner_convention: None,
    stack_grid: [2, 8],
};

pub const LPD_1M: Layout1M = Layout1M {
    name: "LPD-1M",
    module_shape: [256, 256],
    tile_shape: [32, 128],
    tiles_per_module: 16,
    tile_arrangement: TileArrangement::LpdHalves,
    pixel_size: [500e-6, 500e-6],
    quad_orientations: [[1, 1]; N_QUADS],
    corner_convention: Some(CornerConvention::LastPixel),
    stack_grid: [4, 4],
};

pub const DSSC_1M: Layout1M = Layout1M {
    name: "DSSC-1M",
    module_shape: [128, 512],
    tile_shape: [128, 256],
    tiles_per_module: 2,
    tile_arrangement: TileArrangement::Columns,
    pixel_size: [236e-6, 204e-6],
    quad_orientations: [[-1, 1], [-1, 1], [1, -1], [1, -1]],
    corner_convention: Some(CornerConvention::MeasuredLowCorner),
    stack_grid: [8, 2],
};

/// Supported 1M detector models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Detector1M {
    #[serde(rename = "AGIPD-1M")]
    Agipd,
    #[serde(rename = "LPD-1M")]
    Lpd,
    #[serde(rename = "DSSC-1M")]
    Dssc,
}

impl Detector1M {
    pub fn layout(self) -> &'static Layout1M {
        match self {
            Detector1M::Agipd => &AGIPD_1M,
            Detector1M::Lpd => &LPD_1M,
            Detector1M::Dssc => &DSSC_1M,
        }
    }
}

impl fmt::Display for Detector1M {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.layout().name)
    }
}

impl Layout1M {
    pub fn pixel_size(&self) -> Vector2<f64> {
        Vector2::new(self.pixel_size[0], self.pixel_size[1])
    }

    /// `(row, col)` of tile `tile`'s first pixel in module data.
    pub fn tile_origin(&self, tile: usize) -> [usize; 2] {
        let [th, tw] = self.tile_shape;
        match self.tile_arrangement {
            TileArrangement::Rows => [tile * th, 0],
            TileArrangement::Columns => [0, tile * tw],
            TileArrangement::LpdHalves => {
                let half = self.tiles_per_module / 2;
                if tile < half {
                    [(half - 1 - tile) * th, 0]
                } else {
                    [(tile - half) * th, tw]
                }
            }
        }
    }

    /// Tile orientation shared by every module of quadrant `quad` (0-based).
    pub fn quadrant_orientation(&self, quad: usize) -> Option<TileOrientation> {
        let [x_orient, y_orient] = *self.quad_orientations.get(quad)?;
        TileOrientation::from_quadrant(x_orient, y_orient)
    }

    /// Wrap resolved tiles into a descriptor of this detector.
    pub fn descriptor(&self, tiles: Vec<TilePlacement>) -> GeometryDescriptor {
        GeometryDescriptor {
            family: Family::OneM,
            n_modules: N_MODULES,
            module_shape: self.module_shape,
            pixel_size: self.pixel_size(),
            edge_rule: EdgeRule::TileBorders,
            tiles,
        }
    }

    /// Modules edge to edge in a `stack_grid` of row-major module order,
    /// module data copied as is: a 1024 x 1024 image with no gaps.
    pub fn stacked(&self) -> Result<Geometry, GeometryError> {
        Geometry::new(self.stacked_descriptor())
    }

    pub fn stacked_descriptor(&self) -> GeometryDescriptor {
        let [my, mx] = self.module_shape;
        let cols = self.stack_grid[1];
        let px = self.pixel_size();
        let tiles = (0..N_MODULES)
            .flat_map(|module| {
                let (grid_row, grid_col) = (module / cols, module % cols);
                (0..self.tiles_per_module).map(move |tile| {
                    let [oy, ox] = self.tile_origin(tile);
                    let row = grid_row * my + oy;
                    let col = grid_col * mx + ox;
                    TilePlacement {
                        module,
                        origin: [oy, ox],
                        shape: self.tile_shape,
                        corner: Vector3::new(col as f64 * px.x, -(row as f64) * px.y, 0.0),
                        orientation: TileOrientation::IMAGE,
                    }
                })
            })
            .collect();
        self.descriptor(tiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiles_cover_module_exactly_once() {
        for layout in [&AGIPD_1M, &LPD_1M, &DSSC_1M] {
            let [my, mx] = layout.module_shape;
            let [th, tw] = layout.tile_shape;
            let mut covered = vec![0u8; my * mx];
            for t in 0..layout.tiles_per_module {
                let [oy, ox] = layout.tile_origin(t);
                for r in oy..oy + th {
                    for c in ox..ox + tw {
                        covered[r * mx + c] += 1;
                    }
                }
            }
            assert!(covered.iter().all(|&n| n == 1), "{}", layout.name);
        }
    }

    #[test]
    fn lpd_tiles_wrap_around_the_module() {
        assert_eq!(LPD_1M.tile_origin(0), [224, 0]);
        assert_eq!(LPD_1M.tile_origin(7), [0, 0]);
        assert_eq!(LPD_1M.tile_origin(8), [0, 128]);
        assert_eq!(LPD_1M.tile_origin(15), [224, 128]);
    }

    #[test]
    fn stacked_layouts_are_one_megapixel() {
        for detector in [Detector1M::Agipd, Detector1M::Lpd, Detector1M::Dssc] {
            let geom = detector.layout().stacked().unwrap();
            assert_eq!(geom.assembled_shape(), [1024, 1024], "{detector}");
            assert_eq!(geom.pixel_map().n_mapped(), 1024 * 1024);
        }
    }

    #[test]
    fn stacked_agipd_places_modules_row_major() {
        let geom = AGIPD_1M.stacked().unwrap();
        let p = geom.pixel_map().placement(9, 70, 5).unwrap();
        assert_eq!((p.row, p.col), (512 + 70, 128 + 5));
        assert!(!p.tile_edge);
        let p = geom.pixel_map().placement(0, 64, 5).unwrap();
        assert!(p.tile_edge);
    }

    #[test]
    fn dssc_quadrants_flip_scan_directions() {
        let q1 = DSSC_1M.quadrant_orientation(0).unwrap();
        assert_eq!((q1.fs, q1.ss), ([-1, 0], [0, 1]));
        let q4 = DSSC_1M.quadrant_orientation(3).unwrap();
        assert_eq!((q4.fs, q4.ss), ([1, 0], [0, -1]));
        assert!(DSSC_1M.quadrant_orientation(4).is_none());
    }

    #[test]
    fn detector_names_round_trip_through_json() {
        let json = serde_json::to_string(&Detector1M::Lpd).unwrap();
        assert_eq!(json, "\"LPD-1M\"");
        let back: Detector1M = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Detector1M::Lpd);
    }
}
