//! JSON loaders for pre-parsed geometry files.
//!
//! Two file contracts are read here: the quadrant offset file of the 1M
//! detectors ([`QuadrantGeometryFile`]) and a panel file holding one
//! corner and pair of scan vectors per panel of a crystallographic
//! geometry description ([`PanelFile`]).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use detgeom_1m::{Layout1M, QuadrantGeometryFile, N_MODULES};
use detgeom_core::{GeometryError, TileFragment};
use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Load a quadrant geometry file from JSON on disk.
pub fn load_quadrant_file(path: impl AsRef<Path>) -> Result<QuadrantGeometryFile, LoadError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write a quadrant geometry file to disk as pretty JSON.
pub fn write_quadrant_file(
    file: &QuadrantGeometryFile,
    path: impl AsRef<Path>,
) -> Result<(), LoadError> {
    fs::write(path, serde_json::to_string_pretty(file)?)?;
    Ok(())
}

/// Panels of a crystallographic geometry file, keyed by panel name.
///
/// 1M detectors name panels `p{module}a{tile}` (0-based); JUNGFRAU names
/// them `p{module}a{asic}` (1-based).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelFile {
    pub panels: BTreeMap<String, TileFragment>,
}

impl PanelFile {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn panel(&self, name: &str) -> Result<&TileFragment, GeometryError> {
        self.panels
            .get(name)
            .ok_or_else(|| GeometryError::MalformedFile(format!("missing panel {name}")))
    }

    /// Per-module, per-tile fragments of a 1M detector, ready for
    /// [`Layout1M::from_tile_fragments`].
    pub fn module_fragments(
        &self,
        layout: &Layout1M,
    ) -> Result<Vec<Vec<TileFragment>>, GeometryError> {
        let modules = (0..N_MODULES)
            .map(|m| {
                (0..layout.tiles_per_module)
                    .map(|t| self.panel(&format!("p{m}a{t}")).cloned())
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!("{}: read {} panels", layout.name, N_MODULES * layout.tiles_per_module);
        Ok(modules)
    }

    /// Measured position of each JUNGFRAU module listed in `module_numbers`
    /// (1-based), in the order given.
    ///
    /// Modules 1-4 are mounted rotated by half a turn and their ASIC 8 corner
    /// is the module's high-x, high-y corner; list them first so they fill
    /// the first grid column.
    pub fn jungfrau_module_corners(
        &self,
        module_numbers: &[usize],
    ) -> Result<Vec<Vector3<f64>>, GeometryError> {
        module_numbers
            .iter()
            .map(|&n| Ok(self.panel(&jungfrau_panel_name(n))?.corner_pos))
            .collect()
    }
}

/// Panel whose corner locates JUNGFRAU module `n` (1-based).
///
/// Modules 1-4 take their corner from ASIC 8, the others from ASIC 1.
pub fn jungfrau_panel_name(n: usize) -> String {
    let asic = if n > 4 { 1 } else { 8 };
    format!("p{n}a{asic}")
}

/// `1..=n_modules`, the module numbers used when none are given.
pub fn default_module_numbers(n_modules: usize) -> Vec<usize> {
    (1..=n_modules).collect()
}
