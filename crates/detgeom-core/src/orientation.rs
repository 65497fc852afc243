use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Axis-aligned orientation of a tile in the detector plane.
///
/// `ss` is the physical step (in pixel units, `(x, y)`) taken when the
/// module-data row index grows by one, `fs` the step for the column index.
/// Both are unit vectors along `±x` or `±y` and mutually orthogonal, so an
/// orientation is one of the 8 elements of the dihedral group `D4`
/// (see [`TILE_ORIENTATIONS_D4`]).
///
/// Physical `+y` points up while image rows grow downward, so the
/// orientation that copies module data into the image unchanged is
/// `ss = (0, -1)`, `fs = (1, 0)` ([`TileOrientation::IMAGE`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileOrientation {
    pub ss: [i8; 2],
    pub fs: [i8; 2],
}

impl TileOrientation {
    /// Module-data rows run down the image, columns to the right.
    pub const IMAGE: TileOrientation = TileOrientation {
        ss: [0, -1],
        fs: [1, 0],
    };

    /// Build an orientation, rejecting non-unit or parallel steps.
    pub fn new(ss: [i8; 2], fs: [i8; 2]) -> Option<Self> {
        let unit = |v: [i8; 2]| (v[0] as i16).abs() + (v[1] as i16).abs() == 1;
        if !unit(ss) || !unit(fs) {
            return None;
        }
        if ss[0] * fs[0] + ss[1] * fs[1] != 0 {
            return None;
        }
        Some(Self { ss, fs })
    }

    /// Orientation of a 1M quadrant: fast scan along `x_orient * x`,
    /// slow scan along `y_orient * y`.
    pub fn from_quadrant(x_orient: i8, y_orient: i8) -> Option<Self> {
        Self::new([0, y_orient.signum()], [x_orient.signum(), 0])
    }

    /// Snap physical slow-scan / fast-scan vectors to their dominant axis.
    ///
    /// Small rotations are dropped: placement is integer-pitch only.
    pub fn from_scan_vectors(ss: &Vector3<f64>, fs: &Vector3<f64>) -> Option<Self> {
        Self::new(snap_to_axis(ss)?, snap_to_axis(fs)?)
    }

    /// Physical offset (pixel units) of module-data pixel `(row, col)` relative
    /// to the tile's first-pixel corner.
    #[inline]
    pub fn offset(&self, row: i64, col: i64) -> [i64; 2] {
        [
            self.ss[0] as i64 * row + self.fs[0] as i64 * col,
            self.ss[1] as i64 * row + self.fs[1] as i64 * col,
        ]
    }

    /// Offset from a pixel's scan corner to the low-x/low-y corner of its footprint.
    #[inline]
    pub fn pixel_low_corner(&self) -> [i64; 2] {
        [
            (self.ss[0] + self.fs[0]).min(0) as i64,
            (self.ss[1] + self.fs[1]).min(0) as i64,
        ]
    }

    /// True if the orientation swaps module rows/columns relative to the image.
    pub fn is_transposed(&self) -> bool {
        self.ss[1] == 0
    }
}

fn snap_to_axis(v: &Vector3<f64>) -> Option<[i8; 2]> {
    let (x, y) = (v.x, v.y);
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    if x.abs() > y.abs() {
        Some([x.signum() as i8, 0])
    } else if y.abs() > x.abs() {
        Some([0, y.signum() as i8])
    } else {
        None
    }
}

/// The 8 axis-aligned tile orientations.
pub const TILE_ORIENTATIONS_D4: [TileOrientation; 8] = [
    // data rows along -y / +y
    TileOrientation {
        ss: [0, -1],
        fs: [1, 0],
    },
    TileOrientation {
        ss: [0, -1],
        fs: [-1, 0],
    },
    TileOrientation {
        ss: [0, 1],
        fs: [1, 0],
    },
    TileOrientation {
        ss: [0, 1],
        fs: [-1, 0],
    },
    // transposed: data rows along ±x
    TileOrientation {
        ss: [1, 0],
        fs: [0, 1],
    },
    TileOrientation {
        ss: [1, 0],
        fs: [0, -1],
    },
    TileOrientation {
        ss: [-1, 0],
        fs: [0, 1],
    },
    TileOrientation {
        ss: [-1, 0],
        fs: [0, -1],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_d4_element_is_valid() {
        for o in TILE_ORIENTATIONS_D4 {
            assert_eq!(TileOrientation::new(o.ss, o.fs), Some(o));
        }
    }

    #[test]
    fn rejects_parallel_and_non_unit_steps() {
        assert!(TileOrientation::new([1, 0], [-1, 0]).is_none());
        assert!(TileOrientation::new([1, 1], [0, 1]).is_none());
        assert!(TileOrientation::new([0, 0], [0, 1]).is_none());
    }

    #[test]
    fn snaps_slightly_rotated_crystfel_vectors() {
        let ss = Vector3::new(-2e-4, 1.2e-6, 0.0);
        let fs = Vector3::new(-3e-7, -2e-4, 0.0);
        let o = TileOrientation::from_scan_vectors(&ss, &fs).expect("orientation");
        assert_eq!(o.ss, [-1, 0]);
        assert_eq!(o.fs, [0, -1]);
        assert!(o.is_transposed());
    }

    #[test]
    fn image_orientation_low_corner_is_one_row_down() {
        let o = TileOrientation::IMAGE;
        assert_eq!(o.offset(2, 3), [3, -2]);
        assert_eq!(o.pixel_low_corner(), [0, -1]);
    }

    #[test]
    fn quadrant_orientation_uses_signs() {
        let o = TileOrientation::from_quadrant(-1, 1).expect("orientation");
        assert_eq!(o.fs, [-1, 0]);
        assert_eq!(o.ss, [0, 1]);
        assert!(TileOrientation::from_quadrant(0, 1).is_none());
    }
}
