//! Detector geometry: a validated descriptor plus its precomputed pixel map.

use log::debug;
use ndarray::{ArrayD, ArrayView, ArrayViewMut, Dimension, IxDyn};

use crate::executor::{self, ModuleSource};
use crate::mask::apply_edge_mask;
use crate::{
    AssemblyError, EdgeFlags, EdgeMask, Element, Family, FromElement, GeometryDescriptor,
    GeometryError, PixelMap,
};

/// Immutable detector geometry, ready to assemble and dismantle frames.
///
/// The pixel map is built once in [`Geometry::new`]; every call afterwards
/// only reads it, so one geometry can serve many threads.
#[derive(Clone, Debug)]
pub struct Geometry {
    descriptor: GeometryDescriptor,
    map: PixelMap,
}

impl Geometry {
    pub fn new(descriptor: GeometryDescriptor) -> Result<Self, GeometryError> {
        let map = PixelMap::build(&descriptor)?;
        debug!(
            "{} geometry: {} modules, {} tiles, assembled shape {:?}",
            descriptor.family,
            descriptor.n_modules,
            descriptor.tiles.len(),
            map.image_shape()
        );
        Ok(Self { descriptor, map })
    }

    pub fn descriptor(&self) -> &GeometryDescriptor {
        &self.descriptor
    }

    pub fn pixel_map(&self) -> &PixelMap {
        &self.map
    }

    pub fn family(&self) -> Family {
        self.descriptor.family
    }

    pub fn n_modules(&self) -> usize {
        self.descriptor.n_modules
    }

    /// `(rows, cols)` of one module's data.
    pub fn module_shape(&self) -> [usize; 2] {
        self.descriptor.module_shape
    }

    /// `(rows, cols)` of the assembled image; independent of batch size.
    pub fn assembled_shape(&self) -> [usize; 2] {
        self.map.image_shape()
    }

    /// Fill-valued buffer to assemble into: `(y, x)` or `(batch, y, x)`.
    pub fn output_array_for_position<T: Element>(&self, batch: Option<usize>) -> ArrayD<T> {
        let [h, w] = self.assembled_shape();
        let shape = match batch {
            Some(b) => vec![b, h, w],
            None => vec![h, w],
        };
        ArrayD::from_elem(IxDyn(&shape), T::fill_value())
    }

    /// Fill-valued buffer to dismantle into: `(module, y, x)` or
    /// `(batch, module, y, x)`.
    pub fn output_array_for_dismantle<T: Element>(&self, batch: Option<usize>) -> ArrayD<T> {
        let [my, mx] = self.module_shape();
        let n = self.n_modules();
        let shape = match batch {
            Some(b) => vec![b, n, my, mx],
            None => vec![n, my, mx],
        };
        ArrayD::from_elem(IxDyn(&shape), T::fill_value())
    }

    /// Assemble module data into `out`.
    ///
    /// Pixels on masked edges and image pixels in gaps keep the value `out`
    /// held on entry. Masking the other family's edge category is an error.
    pub fn assemble<'a, S, T, I, D>(
        &self,
        modules: I,
        out: ArrayViewMut<'_, T, D>,
        mask: EdgeMask,
    ) -> Result<(), AssemblyError>
    where
        S: Element,
        T: FromElement<S>,
        I: ModuleSource<'a, S>,
        D: Dimension,
    {
        self.family().check_mask(mask)?;
        executor::assemble(&self.map, modules, out, EdgeFlags::from_mask(mask))
    }

    /// Inverse of [`assemble`](Self::assemble) with no masking.
    pub fn dismantle<S, T, D, E>(
        &self,
        assembled: ArrayView<'_, S, D>,
        out: ArrayViewMut<'_, T, E>,
    ) -> Result<(), AssemblyError>
    where
        S: Element,
        T: FromElement<S>,
        D: Dimension,
        E: Dimension,
    {
        executor::dismantle(&self.map, assembled, out)
    }

    /// Fill the edge pixels of one module in place, for this family's edge
    /// category. `data` is `(..., y, x)`.
    pub fn mask_module<T, D>(&self, data: ArrayViewMut<'_, T, D>) -> Result<(), AssemblyError>
    where
        T: Element,
        D: Dimension,
    {
        let edges = self.map.module_edge_mask(self.family().edge_kind());
        apply_edge_mask(&edges, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EdgeRule, TileOrientation, TilePlacement};
    use nalgebra::{Vector2, Vector3};
    use ndarray::{Array2, Array3, Axis};

    /// One module made of two 3x3 tiles stacked vertically.
    fn tiled() -> Geometry {
        let px = 2e-4;
        let tiles = (0..2)
            .map(|t| TilePlacement {
                module: 0,
                origin: [3 * t, 0],
                shape: [3, 3],
                corner: Vector3::new(0.0, -3.0 * t as f64 * px, 0.0),
                orientation: TileOrientation::IMAGE,
            })
            .collect();
        Geometry::new(GeometryDescriptor {
            family: Family::OneM,
            n_modules: 1,
            module_shape: [6, 3],
            pixel_size: Vector2::new(px, px),
            edge_rule: EdgeRule::TileBorders,
            tiles,
        })
        .unwrap()
    }

    #[test]
    fn allocation_helpers_use_fill_value() {
        let geom = tiled();
        assert_eq!(geom.assembled_shape(), [6, 3]);
        let img = geom.output_array_for_position::<f64>(Some(3));
        assert_eq!(img.shape(), &[3, 6, 3]);
        assert!(img.iter().all(|v| v.is_nan()));
        let mods = geom.output_array_for_dismantle::<bool>(None);
        assert_eq!(mods.shape(), &[1, 6, 3]);
        assert!(mods.iter().all(|&v| !v));
    }

    #[test]
    fn tile_edge_masking_and_asic_rejection() {
        let geom = tiled();
        let modules = Array3::<f32>::ones((1, 6, 3));
        let mut out = Array2::<f32>::from_elem((6, 3), f32::NAN);

        let err = geom
            .assemble(modules.view(), out.view_mut(), EdgeMask::ASIC)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::UnsupportedEdgeMask { .. }));
        assert!(out.iter().all(|v| v.is_nan()));

        geom.assemble(modules.view(), out.view_mut(), EdgeMask::TILE)
            .unwrap();
        // only the centre pixel of each 3x3 tile is interior
        assert_eq!(out.iter().filter(|v| !v.is_nan()).count(), 2);
        assert_eq!(out[[1, 1]], 1.0);
        assert_eq!(out[[4, 1]], 1.0);

        geom.assemble(modules.view(), out.view_mut(), EdgeMask::NONE)
            .unwrap();
        assert!(out.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn mask_module_matches_masked_round_trip() {
        let geom = tiled();
        let modules = Array3::<f64>::from_shape_fn((1, 6, 3), |(_, y, x)| (y * 3 + x) as f64);

        let mut img = geom.output_array_for_position::<f64>(None);
        geom.assemble(modules.view(), img.view_mut(), EdgeMask::TILE)
            .unwrap();
        let mut via_image = geom.output_array_for_dismantle::<f64>(None);
        geom.dismantle(img.view(), via_image.view_mut()).unwrap();

        let mut direct = modules.clone();
        geom.mask_module(direct.index_axis_mut(Axis(0), 0)).unwrap();

        assert_eq!(direct[[0, 4, 1]], 13.0);
        for (a, b) in via_image.iter().zip(direct.iter()) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }
    }
}
