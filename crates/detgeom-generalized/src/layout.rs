use std::borrow::Cow;
use std::fmt;

use detgeom_core::{
    apply_edge_mask, module_edge_mask_for, AssemblyError, EdgeRule, Element, Family, Geometry,
    GeometryDescriptor, GeometryError, TileOrientation, TilePlacement,
};
use log::debug;
use nalgebra::{Vector2, Vector3};
use ndarray::ArrayViewMut;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Constant layout of one generalized (row/column grid) detector model.
///
/// Every module is one monolithic sensor of `module_shape` pixels, read out
/// by a grid of `asic_shape` ASICs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneralizedLayout {
    pub name: Cow<'static, str>,
    /// `(rows, cols)` of one module's data.
    pub module_shape: [usize; 2],
    /// `(rows, cols)` of one ASIC.
    pub asic_shape: [usize; 2],
    /// Pixel pitch `(x, y)` in meters.
    pub pixel_size: [f64; 2],
    /// Which module pixels count as ASIC edges.
    pub edge_rule: EdgeRule,
    /// Which module corner a measured position refers to.
    #[serde(default)]
    pub mounting: Mounting,
}

/// How measured module positions anchor onto the module footprint.
///
/// Module data is always placed by translation only; the mounting decides
/// which footprint corner the given position is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mounting {
    /// Every position is the top-left (low-x, high-y) corner.
    #[default]
    TopLeft,
    /// Modules of the first grid column sit rotated by half a turn and give
    /// their high-x, high-y corner; every other column gives its low-x,
    /// low-y corner.
    OpposedColumns,
}

impl Mounting {
    /// Offset `(x, y)` in pixels from the given position to the top-left
    /// corner of a `[rows, cols]` module in grid column `col`.
    fn top_left_offset(self, col: usize, module_shape: [usize; 2]) -> [f64; 2] {
        let [my, mx] = module_shape;
        match self {
            Mounting::TopLeft => [0.0, 0.0],
            Mounting::OpposedColumns if col == 0 => [-(mx as f64), 0.0],
            Mounting::OpposedColumns => [0.0, my as f64],
        }
    }
}

pub const JUNGFRAU: GeneralizedLayout = GeneralizedLayout {
    name: Cow::Borrowed("JUNGFRAU"),
    module_shape: [512, 1024],
    asic_shape: [256, 256],
    pixel_size: [75e-6, 75e-6],
    edge_rule: EdgeRule::AsicBorders {
        asic_shape: [256, 256],
    },
    mounting: Mounting::OpposedColumns,
};

pub const EPIX100: GeneralizedLayout = GeneralizedLayout {
    name: Cow::Borrowed("ePix100"),
    module_shape: [708, 768],
    asic_shape: [354, 384],
    pixel_size: [50e-6, 50e-6],
    edge_rule: EdgeRule::ModuleRows,
    mounting: Mounting::TopLeft,
};

/// Supported generalized detector models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeneralizedDetector {
    #[serde(rename = "JUNGFRAU")]
    Jungfrau,
    #[serde(rename = "ePix100")]
    Epix100,
}

impl GeneralizedDetector {
    pub fn layout(self) -> &'static GeneralizedLayout {
        match self {
            GeneralizedDetector::Jungfrau => &JUNGFRAU,
            GeneralizedDetector::Epix100 => &EPIX100,
        }
    }
}

impl fmt::Display for GeneralizedDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.layout().name)
    }
}

impl GeneralizedLayout {
    /// Caller-defined layout masking the border pixels of every ASIC.
    ///
    /// `asic_grid` is `(rows, cols)` of ASICs and must divide `module_shape`.
    pub fn custom(
        name: impl Into<Cow<'static, str>>,
        module_shape: [usize; 2],
        asic_grid: [usize; 2],
        pixel_size: [f64; 2],
    ) -> Result<Self, GeometryError> {
        let name = name.into();
        let [my, mx] = module_shape;
        let [gy, gx] = asic_grid;
        if my == 0 || mx == 0 {
            return Err(GeometryError::InvalidLayout(format!(
                "{name}: module shape {module_shape:?} is empty"
            )));
        }
        if gy == 0 || gx == 0 || my % gy != 0 || mx % gx != 0 {
            return Err(GeometryError::InvalidLayout(format!(
                "{name}: ASIC grid {asic_grid:?} does not divide module shape {module_shape:?}"
            )));
        }
        if !pixel_size.iter().all(|p| p.is_finite() && *p > 0.0) {
            return Err(GeometryError::InvalidPixelSize);
        }
        let asic_shape = [my / gy, mx / gx];
        Ok(Self {
            name,
            module_shape,
            asic_shape,
            pixel_size,
            edge_rule: EdgeRule::AsicBorders { asic_shape },
            mounting: Mounting::TopLeft,
        })
    }

    pub fn pixel_size(&self) -> Vector2<f64> {
        Vector2::new(self.pixel_size[0], self.pixel_size[1])
    }

    /// `(rows, cols)` of ASICs in one module.
    pub fn asic_grid(&self) -> [usize; 2] {
        [
            self.module_shape[0] / self.asic_shape[0].max(1),
            self.module_shape[1] / self.asic_shape[1].max(1),
        ]
    }

    /// Grid `(row, col)` of `module`; modules fill columns first.
    pub fn grid_position(module: usize, n_rows: usize) -> (usize, usize) {
        (module % n_rows, module / n_rows)
    }

    /// Descriptor with one axis-aligned tile per module, `corners[m]` being
    /// the top-left corner of module `m`.
    pub fn descriptor(&self, corners: &[Vector3<f64>]) -> GeometryDescriptor {
        let tiles = corners
            .iter()
            .enumerate()
            .map(|(module, corner)| TilePlacement {
                module,
                origin: [0, 0],
                shape: self.module_shape,
                corner: *corner,
                orientation: TileOrientation::IMAGE,
            })
            .collect();
        GeometryDescriptor {
            family: Family::Generalized,
            n_modules: corners.len(),
            module_shape: self.module_shape,
            pixel_size: self.pixel_size(),
            edge_rule: self.edge_rule,
            tiles,
        }
    }

    fn check_grid(&self, n_rows: usize, n_cols: usize) -> Result<(), GeometryError> {
        if n_rows == 0 || n_cols == 0 {
            return Err(GeometryError::InvalidLayout(format!(
                "{}: module grid {n_rows} x {n_cols} is empty",
                self.name
            )));
        }
        Ok(())
    }

    /// `n_rows x n_cols` modules edge to edge without gaps.
    pub fn stacked(&self, n_rows: usize, n_cols: usize) -> Result<Geometry, GeometryError> {
        self.check_grid(n_rows, n_cols)?;
        let [my, mx] = self.module_shape;
        let px = self.pixel_size();
        let corners: Vec<_> = (0..n_rows * n_cols)
            .map(|module| {
                let (row, col) = Self::grid_position(module, n_rows);
                Vector3::new(
                    (col * mx) as f64 * px.x,
                    -((row * my) as f64) * px.y,
                    0.0,
                )
            })
            .collect();
        Geometry::new(self.descriptor(&corners))
    }

    /// Modules at measured positions (m), one per grid cell in column-major
    /// order. Positions are anchored according to [`Mounting`].
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, positions)))]
    pub fn from_module_positions(
        &self,
        n_rows: usize,
        n_cols: usize,
        positions: &[Vector3<f64>],
    ) -> Result<Geometry, GeometryError> {
        self.check_grid(n_rows, n_cols)?;
        if positions.len() != n_rows * n_cols {
            return Err(GeometryError::InvalidModuleCount {
                expected: n_rows * n_cols,
                got: positions.len(),
            });
        }
        let px = self.pixel_size();
        let corners: Vec<_> = positions
            .iter()
            .enumerate()
            .map(|(module, pos)| {
                let (_, col) = Self::grid_position(module, n_rows);
                let [dx, dy] = self.mounting.top_left_offset(col, self.module_shape);
                Vector3::new(pos.x + dx * px.x, pos.y + dy * px.y, pos.z)
            })
            .collect();
        debug!(
            "{}: {} x {} modules from positions ({:?} mounting)",
            self.name, n_rows, n_cols, self.mounting
        );
        Geometry::new(self.descriptor(&corners))
    }

    /// Fill the ASIC-edge pixels of module data `(..., y, x)` in place.
    ///
    /// Needs no geometry: the edge pattern depends only on the layout.
    pub fn mask_module<T, D>(&self, data: ArrayViewMut<'_, T, D>) -> Result<(), AssemblyError>
    where
        T: Element,
        D: ndarray::Dimension,
    {
        let edges = module_edge_mask_for(self.edge_rule, self.module_shape);
        apply_edge_mask(&edges, data)
    }
}
