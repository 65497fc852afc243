//! Source-to-destination pixel correspondence.
//!
//! The map is computed once per geometry and stored as two flat index
//! tables over `u32` offsets:
//!
//! - `dest[s]`: flat image offset `row * W + col` of source pixel
//!   `s = module * (my * mx) + row * mx + col`, or [`UNMAPPED`];
//! - `source[d]`: the inverse, for every image pixel.
//!
//! Edge flags are recorded per source pixel; masking is decided per call.

use log::{debug, warn};
use ndarray::Array2;

use crate::{EdgeKind, EdgeMask, EdgeRule, GeometryDescriptor, GeometryError};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Marker for a source pixel with no destination (and vice versa).
pub const UNMAPPED: u32 = u32::MAX;

/// Border categories a source pixel belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EdgeFlags(u8);

impl EdgeFlags {
    pub const NONE: EdgeFlags = EdgeFlags(0);
    pub const TILE: EdgeFlags = EdgeFlags(1);
    pub const ASIC: EdgeFlags = EdgeFlags(2);

    pub fn of_kind(kind: EdgeKind) -> Self {
        match kind {
            EdgeKind::Tile => Self::TILE,
            EdgeKind::Asic => Self::ASIC,
        }
    }

    /// Flags to skip for a per-call masking request.
    pub fn from_mask(mask: EdgeMask) -> Self {
        let mut f = Self::NONE;
        if mask.ignore_tile_edge {
            f = f.union(Self::TILE);
        }
        if mask.ignore_asic_edge {
            f = f.union(Self::ASIC);
        }
        f
    }

    #[inline]
    pub fn contains(self, other: EdgeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn intersects(self, other: EdgeFlags) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn union(self, other: EdgeFlags) -> Self {
        EdgeFlags(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Where one source pixel lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub row: usize,
    pub col: usize,
    pub tile_edge: bool,
    pub asic_edge: bool,
}

/// Precomputed placement table of one geometry.
#[derive(Clone, Debug)]
pub struct PixelMap {
    n_modules: usize,
    module_shape: [usize; 2],
    image_shape: [usize; 2],
    dest: Vec<u32>,
    source: Vec<u32>,
    flags: Vec<EdgeFlags>,
    overlaps: usize,
}

/// Integer pixel footprint of one tile.
struct TileFrame {
    corner: [i64; 2],
    low: [i64; 2],
}

impl TileFrame {
    /// Low corner (pixel units) of tile-local pixel `(row, col)`.
    #[inline]
    fn pixel(&self, tile: &crate::TilePlacement, row: usize, col: usize) -> [i64; 2] {
        let off = tile.orientation.offset(row as i64, col as i64);
        [
            self.corner[0] + off[0] + self.low[0],
            self.corner[1] + off[1] + self.low[1],
        ]
    }
}

impl PixelMap {
    /// Compute the image extent and the per-pixel mapping.
    ///
    /// Corners are rounded to the nearest whole pixel; the image spans the
    /// bounding box of all tile footprints with physical `+y` mapped to
    /// decreasing row index. When rounding makes two source pixels share a
    /// destination, the later tile wins and the earlier pixel is unmapped.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(descriptor), fields(n_modules = descriptor.n_modules))
    )]
    pub fn build(descriptor: &GeometryDescriptor) -> Result<Self, GeometryError> {
        descriptor.validate()?;

        let [my, mx] = descriptor.module_shape;
        let n_source = descriptor.n_modules * my * mx;
        if n_source >= UNMAPPED as usize {
            return Err(GeometryError::TooLarge { pixels: n_source });
        }

        let frames: Vec<TileFrame> = descriptor
            .tiles
            .iter()
            .map(|tile| TileFrame {
                corner: [
                    (tile.corner.x / descriptor.pixel_size.x).round() as i64,
                    (tile.corner.y / descriptor.pixel_size.y).round() as i64,
                ],
                low: tile.orientation.pixel_low_corner(),
            })
            .collect();

        let (mut x_min, mut x_max) = (i64::MAX, i64::MIN);
        let (mut y_min, mut y_max) = (i64::MAX, i64::MIN);
        for (tile, frame) in descriptor.tiles.iter().zip(&frames) {
            let [th, tw] = tile.shape;
            for (r, c) in [(0, 0), (th - 1, 0), (0, tw - 1), (th - 1, tw - 1)] {
                let [x, y] = frame.pixel(tile, r, c);
                x_min = x_min.min(x);
                x_max = x_max.max(x + 1);
                y_min = y_min.min(y);
                y_max = y_max.max(y + 1);
            }
        }

        let height = (y_max - y_min) as usize;
        let width = (x_max - x_min) as usize;
        let n_image = height.saturating_mul(width);
        if n_image >= UNMAPPED as usize {
            return Err(GeometryError::TooLarge { pixels: n_image });
        }

        let mut dest = vec![UNMAPPED; n_source];
        let mut source = vec![UNMAPPED; n_image];
        let mut flags = vec![EdgeFlags::NONE; n_source];
        let mut overlaps = 0usize;

        for (tile, frame) in descriptor.tiles.iter().zip(&frames) {
            let [th, tw] = tile.shape;
            let [oy, ox] = tile.origin;
            let module_base = tile.module * my * mx;
            for r in 0..th {
                for c in 0..tw {
                    let [x, y] = frame.pixel(tile, r, c);
                    let row = (y_max - 1 - y) as usize;
                    let col = (x - x_min) as usize;
                    let d = row * width + col;
                    let (mr, mc) = (oy + r, ox + c);
                    let s = module_base + mr * mx + mc;

                    let previous = source[d];
                    if previous != UNMAPPED {
                        dest[previous as usize] = UNMAPPED;
                        overlaps += 1;
                    }
                    let stale = dest[s];
                    if stale != UNMAPPED {
                        source[stale as usize] = UNMAPPED;
                        overlaps += 1;
                    }
                    source[d] = s as u32;
                    dest[s] = d as u32;

                    let mut f = EdgeFlags::NONE;
                    if r == 0 || c == 0 || r + 1 == th || c + 1 == tw {
                        f = f.union(EdgeFlags::TILE);
                    }
                    if descriptor
                        .edge_rule
                        .is_module_edge(mr, mc, descriptor.module_shape)
                    {
                        f = f.union(EdgeFlags::ASIC);
                    }
                    flags[s] = f;
                }
            }
        }

        if overlaps > 0 {
            warn!(
                "{} source pixels overlap after rounding to whole pixels; later tiles win",
                overlaps
            );
        }

        let map = Self {
            n_modules: descriptor.n_modules,
            module_shape: descriptor.module_shape,
            image_shape: [height, width],
            dest,
            source,
            flags,
            overlaps,
        };
        debug!(
            "pixel map: {} modules of {:?} -> image {:?}, {} pixels mapped",
            map.n_modules,
            map.module_shape,
            map.image_shape,
            map.n_mapped()
        );
        Ok(map)
    }

    pub fn n_modules(&self) -> usize {
        self.n_modules
    }

    /// `(rows, cols)` of one module's data.
    pub fn module_shape(&self) -> [usize; 2] {
        self.module_shape
    }

    /// `(rows, cols)` of the assembled image.
    pub fn image_shape(&self) -> [usize; 2] {
        self.image_shape
    }

    /// Number of source pixels with a destination.
    pub fn n_mapped(&self) -> usize {
        self.dest.iter().filter(|&&d| d != UNMAPPED).count()
    }

    /// Number of pixel collisions resolved while building.
    pub fn n_overlaps(&self) -> usize {
        self.overlaps
    }

    /// Flat image offset per flat source offset.
    pub fn destinations(&self) -> &[u32] {
        &self.dest
    }

    /// Flat source offset per flat image offset.
    pub fn sources(&self) -> &[u32] {
        &self.source
    }

    /// Edge categories per flat source offset.
    pub fn edge_flags(&self) -> &[EdgeFlags] {
        &self.flags
    }

    pub fn placement(&self, module: usize, row: usize, col: usize) -> Option<Placement> {
        let [my, mx] = self.module_shape;
        if module >= self.n_modules || row >= my || col >= mx {
            return None;
        }
        let s = (module * my + row) * mx + col;
        let d = self.dest[s];
        if d == UNMAPPED {
            return None;
        }
        let d = d as usize;
        let width = self.image_shape[1];
        let f = self.flags[s];
        Some(Placement {
            row: d / width,
            col: d % width,
            tile_edge: f.contains(EdgeFlags::TILE),
            asic_edge: f.contains(EdgeFlags::ASIC),
        })
    }

    /// Boolean `(rows, cols)` mask of one module's pixels in the given edge category.
    ///
    /// Every module shares the same tile layout in data space, so module 0
    /// stands in for all of them.
    pub fn module_edge_mask(&self, kind: EdgeKind) -> Array2<bool> {
        let [my, mx] = self.module_shape;
        let wanted = EdgeFlags::of_kind(kind);
        Array2::from_shape_fn((my, mx), |(r, c)| self.flags[r * mx + c].contains(wanted))
    }
}

/// Edge rule lookup without a built map, for static per-module masking.
pub fn module_edge_mask_for(rule: EdgeRule, module_shape: [usize; 2]) -> Array2<bool> {
    let [my, mx] = module_shape;
    Array2::from_shape_fn((my, mx), |(r, c)| rule.is_module_edge(r, c, module_shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Family, TileOrientation, TilePlacement};
    use nalgebra::{Vector2, Vector3};

    const PX: f64 = 1e-4;

    fn side_by_side() -> GeometryDescriptor {
        GeometryDescriptor {
            family: Family::Generalized,
            n_modules: 2,
            module_shape: [3, 4],
            pixel_size: Vector2::new(PX, PX),
            edge_rule: EdgeRule::ModuleRows,
            tiles: (0..2)
                .map(|m| TilePlacement {
                    module: m,
                    origin: [0, 0],
                    shape: [3, 4],
                    corner: Vector3::new(4.0 * m as f64 * PX, 0.0, 0.0),
                    orientation: TileOrientation::IMAGE,
                })
                .collect(),
        }
    }

    #[test]
    fn side_by_side_modules_fill_the_image() {
        let map = PixelMap::build(&side_by_side()).unwrap();
        assert_eq!(map.image_shape(), [3, 8]);
        assert_eq!(map.n_mapped(), 24);
        assert!(map.sources().iter().all(|&s| s != UNMAPPED));

        let p = map.placement(1, 2, 0).unwrap();
        assert_eq!((p.row, p.col), (2, 4));
        assert!(p.asic_edge);
        assert!(map.placement(2, 0, 0).is_none());
    }

    #[test]
    fn sources_and_destinations_are_inverse() {
        let map = PixelMap::build(&side_by_side()).unwrap();
        for (s, &d) in map.destinations().iter().enumerate() {
            assert_eq!(map.sources()[d as usize] as usize, s);
        }
    }

    #[test]
    fn flipped_tile_is_mirrored_in_place() {
        let mut desc = side_by_side();
        desc.n_modules = 1;
        desc.tiles.truncate(1);
        // rows run up the image, columns run left: anchor at the far corner
        desc.tiles[0].orientation = TileOrientation::new([0, 1], [-1, 0]).unwrap();
        desc.tiles[0].corner = Vector3::new(4.0 * PX, -3.0 * PX, 0.0);
        let map = PixelMap::build(&desc).unwrap();
        assert_eq!(map.image_shape(), [3, 4]);
        let p = map.placement(0, 0, 0).unwrap();
        assert_eq!((p.row, p.col), (2, 3));
        let p = map.placement(0, 2, 3).unwrap();
        assert_eq!((p.row, p.col), (0, 0));
    }

    #[test]
    fn transposed_tile_swaps_extent() {
        let mut desc = side_by_side();
        desc.n_modules = 1;
        desc.tiles.truncate(1);
        desc.tiles[0].orientation = TileOrientation::new([1, 0], [0, -1]).unwrap();
        let map = PixelMap::build(&desc).unwrap();
        assert_eq!(map.image_shape(), [4, 3]);
        let p = map.placement(0, 1, 2).unwrap();
        assert_eq!((p.row, p.col), (2, 1));
    }

    #[test]
    fn gap_between_modules_stays_unmapped() {
        let mut desc = side_by_side();
        desc.tiles[1].corner.x = 6.0 * PX;
        let map = PixelMap::build(&desc).unwrap();
        assert_eq!(map.image_shape(), [3, 10]);
        let unmapped = map.sources().iter().filter(|&&s| s == UNMAPPED).count();
        assert_eq!(unmapped, 6);
    }

    #[test]
    fn overlapping_modules_keep_last_writer() {
        let mut desc = side_by_side();
        desc.tiles[1].corner.x = 2.0 * PX;
        let map = PixelMap::build(&desc).unwrap();
        assert_eq!(map.image_shape(), [3, 6]);
        assert_eq!(map.n_overlaps(), 6);
        assert_eq!(map.n_mapped(), 18);
        assert!(map.placement(0, 0, 3).is_none());
        assert_eq!(map.placement(1, 0, 0).map(|p| p.col), Some(2));
    }

    #[test]
    fn edge_masks_follow_rules() {
        let map = PixelMap::build(&side_by_side()).unwrap();
        let asic = map.module_edge_mask(EdgeKind::Asic);
        assert_eq!(asic.iter().filter(|&&e| e).count(), 8);
        let tile = map.module_edge_mask(EdgeKind::Tile);
        assert_eq!(tile.iter().filter(|&&e| e).count(), 10);
        assert_eq!(
            module_edge_mask_for(EdgeRule::ModuleRows, [3, 4]),
            asic
        );
    }
}
