use detgeom_core::{Geometry, GeometryError, TileFragment, TilePlacement};
use log::debug;

use crate::{Layout1M, N_MODULES};

impl Layout1M {
    /// Build from pre-parsed per-tile fragments, `modules[m][t]`.
    ///
    /// Corners are taken as given; scan vectors are snapped to the nearest
    /// axis-aligned orientation.
    pub fn from_tile_fragments(
        &self,
        modules: &[Vec<TileFragment>],
    ) -> Result<Geometry, GeometryError> {
        if modules.len() != N_MODULES {
            return Err(GeometryError::InvalidModuleCount {
                expected: N_MODULES,
                got: modules.len(),
            });
        }

        let mut tiles = Vec::with_capacity(N_MODULES * self.tiles_per_module);
        for (module, fragments) in modules.iter().enumerate() {
            if fragments.len() != self.tiles_per_module {
                return Err(GeometryError::InvalidTileCount {
                    module,
                    expected: self.tiles_per_module,
                    got: fragments.len(),
                });
            }
            for (tile, fragment) in fragments.iter().enumerate() {
                let orientation = fragment
                    .orientation()
                    .ok_or(GeometryError::UnsupportedOrientation { module, tile })?;
                tiles.push(TilePlacement {
                    module,
                    origin: self.tile_origin(tile),
                    shape: self.tile_shape,
                    corner: fragment.corner_pos,
                    orientation,
                });
            }
        }

        debug!("{}: {} tiles from fragments", self.name, tiles.len());
        Geometry::new(self.descriptor(tiles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AGIPD_1M;
    use nalgebra::Vector3;

    const PX: f64 = 200e-6;

    /// AGIPD-like fragments: every module rotated so data rows run along -x.
    fn rotated_agipd() -> Vec<Vec<TileFragment>> {
        (0..N_MODULES)
            .map(|m| {
                (0..8)
                    .map(|t| TileFragment {
                        corner_pos: Vector3::new(
                            -((t * 64) as f64) * PX,
                            -((m * 128) as f64) * PX,
                            0.0,
                        ),
                        ss_vec: Vector3::new(-PX, 1e-7, 0.0),
                        fs_vec: Vector3::new(2e-7, -PX, 0.0),
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn snapped_fragments_transpose_modules() {
        let geom = AGIPD_1M.from_tile_fragments(&rotated_agipd()).unwrap();
        assert_eq!(geom.assembled_shape(), [16 * 128, 512]);
        let map = geom.pixel_map();
        // module 0, first pixel sits at the right edge of the top band
        let p = map.placement(0, 0, 0).unwrap();
        assert_eq!((p.row, p.col), (0, 511));
        let p = map.placement(0, 0, 5).unwrap();
        assert_eq!((p.row, p.col), (5, 511));
        let p = map.placement(1, 70, 0).unwrap();
        assert_eq!((p.row, p.col), (128, 511 - 70));
        assert_eq!(map.n_mapped(), 16 * 512 * 128);
    }

    #[test]
    fn counts_are_checked() {
        let mut frags = rotated_agipd();
        frags[3].pop();
        assert!(matches!(
            AGIPD_1M.from_tile_fragments(&frags),
            Err(GeometryError::InvalidTileCount {
                module: 3,
                expected: 8,
                got: 7
            })
        ));
        assert!(matches!(
            AGIPD_1M.from_tile_fragments(&rotated_agipd()[..15]),
            Err(GeometryError::InvalidModuleCount {
                expected: 16,
                got: 15
            })
        ));
    }

    #[test]
    fn diagonal_scan_vectors_are_rejected() {
        let mut frags = rotated_agipd();
        frags[2][5].fs_vec = Vector3::new(PX, PX, 0.0);
        assert!(matches!(
            AGIPD_1M.from_tile_fragments(&frags),
            Err(GeometryError::UnsupportedOrientation { module: 2, tile: 5 })
        ));
    }
}
