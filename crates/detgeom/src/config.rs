//! JSON geometry configuration: which detector, and how to place it.

use std::fs;
use std::path::{Path, PathBuf};

use detgeom_1m::{Detector1M, Layout1M, N_QUADS};
use detgeom_core::Geometry;
use detgeom_generalized::{GeneralizedLayout, EPIX100, JUNGFRAU};
use log::info;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::io::{default_module_numbers, load_quadrant_file, LoadError, PanelFile};

/// How a 1M detector is placed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "construction", rename_all = "snake_case")]
pub enum OneMSource {
    /// Modules edge to edge, no gaps.
    #[default]
    Stacked,
    /// Quadrant corners `(x, y)` in mm plus a quadrant offset file.
    QuadrantFile {
        path: PathBuf,
        quad_positions: [[f64; 2]; N_QUADS],
    },
    /// Panel file with one fragment per tile.
    PanelFile { path: PathBuf },
}

/// How a generalized detector is placed on its module grid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "construction", rename_all = "snake_case")]
pub enum GridSource {
    #[default]
    Stacked,
    /// First-pixel corners in meters, one per module.
    ModulePositions { positions: Vec<Vector3<f64>> },
    /// JUNGFRAU panel file; module numbers default to `1..=n_rows * n_cols`.
    PanelFile {
        path: PathBuf,
        #[serde(default)]
        module_numbers: Option<Vec<usize>>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OneMConfig {
    #[serde(default)]
    pub source: OneMSource,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub n_rows: usize,
    pub n_cols: usize,
    #[serde(default)]
    pub source: GridSource,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomGridConfig {
    pub layout: GeneralizedLayout,
    pub n_rows: usize,
    pub n_cols: usize,
    #[serde(default)]
    pub source: GridSource,
}

/// Detector selection plus construction variant, tagged by `detector`.
///
/// ```json
/// {"detector": "DSSC-1M",
///  "source": {"construction": "quadrant_file", "path": "dssc.json",
///             "quad_positions": [[-124.1, 3.1], [-133.1, -110.6],
///                                [1.0, -125.2], [4.5, -4.9]]}}
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "detector")]
pub enum GeometryConfig {
    #[serde(rename = "AGIPD-1M")]
    Agipd(OneMConfig),
    #[serde(rename = "LPD-1M")]
    Lpd(OneMConfig),
    #[serde(rename = "DSSC-1M")]
    Dssc(OneMConfig),
    #[serde(rename = "JUNGFRAU")]
    Jungfrau(GridConfig),
    #[serde(rename = "ePix100")]
    Epix100(GridConfig),
    #[serde(rename = "custom")]
    Custom(CustomGridConfig),
}

impl GeometryConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Build the geometry; relative file paths resolve against the current
    /// directory.
    pub fn build(&self) -> Result<Geometry, LoadError> {
        self.build_in(Path::new(""))
    }

    /// Build the geometry with relative file paths resolved against `base`.
    pub fn build_in(&self, base: &Path) -> Result<Geometry, LoadError> {
        match self {
            GeometryConfig::Agipd(cfg) => build_1m(Detector1M::Agipd.layout(), &cfg.source, base),
            GeometryConfig::Lpd(cfg) => build_1m(Detector1M::Lpd.layout(), &cfg.source, base),
            GeometryConfig::Dssc(cfg) => build_1m(Detector1M::Dssc.layout(), &cfg.source, base),
            GeometryConfig::Jungfrau(cfg) => {
                build_grid(&JUNGFRAU, cfg.n_rows, cfg.n_cols, &cfg.source, base)
            }
            GeometryConfig::Epix100(cfg) => {
                build_grid(&EPIX100, cfg.n_rows, cfg.n_cols, &cfg.source, base)
            }
            GeometryConfig::Custom(cfg) => {
                build_grid(&cfg.layout, cfg.n_rows, cfg.n_cols, &cfg.source, base)
            }
        }
    }
}

fn build_1m(layout: &Layout1M, source: &OneMSource, base: &Path) -> Result<Geometry, LoadError> {
    let geom = match source {
        OneMSource::Stacked => layout.stacked()?,
        OneMSource::QuadrantFile {
            path,
            quad_positions,
        } => {
            let file = load_quadrant_file(base.join(path))?;
            layout.from_quad_positions(&file, quad_positions)?
        }
        OneMSource::PanelFile { path } => {
            let file = PanelFile::load_json(base.join(path))?;
            layout.from_tile_fragments(&file.module_fragments(layout)?)?
        }
    };
    info!("{}: assembled shape {:?}", layout.name, geom.assembled_shape());
    Ok(geom)
}

fn build_grid(
    layout: &GeneralizedLayout,
    n_rows: usize,
    n_cols: usize,
    source: &GridSource,
    base: &Path,
) -> Result<Geometry, LoadError> {
    let geom = match source {
        GridSource::Stacked => layout.stacked(n_rows, n_cols)?,
        GridSource::ModulePositions { positions } => {
            layout.from_module_positions(n_rows, n_cols, positions)?
        }
        GridSource::PanelFile {
            path,
            module_numbers,
        } => {
            let file = PanelFile::load_json(base.join(path))?;
            let numbers = module_numbers
                .clone()
                .unwrap_or_else(|| default_module_numbers(n_rows * n_cols));
            let corners = file.jungfrau_module_corners(&numbers)?;
            layout.from_module_positions(n_rows, n_cols, &corners)?
        }
    };
    info!(
        "{} {}x{}: assembled shape {:?}",
        layout.name,
        n_rows,
        n_cols,
        geom.assembled_shape()
    );
    Ok(geom)
}

/// Load a [`GeometryConfig`] and build its geometry, resolving file paths
/// relative to the config file.
pub fn build_geometry(config_path: impl AsRef<Path>) -> Result<Geometry, LoadError> {
    let config_path = config_path.as_ref();
    let config = GeometryConfig::load_json(config_path)?;
    let base = config_path.parent().unwrap_or(Path::new(""));
    config.build_in(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_json_shapes() {
        let cfg: GeometryConfig = serde_json::from_str(r#"{"detector": "LPD-1M"}"#).unwrap();
        assert_eq!(
            cfg,
            GeometryConfig::Lpd(OneMConfig {
                source: OneMSource::Stacked
            })
        );

        let cfg: GeometryConfig = serde_json::from_str(
            r#"{"detector": "JUNGFRAU", "n_rows": 2, "n_cols": 1,
                "source": {"construction": "panel_file", "path": "jf.json"}}"#,
        )
        .unwrap();
        assert_eq!(
            cfg,
            GeometryConfig::Jungfrau(GridConfig {
                n_rows: 2,
                n_cols: 1,
                source: GridSource::PanelFile {
                    path: "jf.json".into(),
                    module_numbers: None
                }
            })
        );
    }

    #[test]
    fn stacked_configs_build_without_files() {
        let cfg = GeometryConfig::Epix100(GridConfig {
            n_rows: 2,
            n_cols: 2,
            source: GridSource::Stacked,
        });
        assert_eq!(cfg.build().unwrap().assembled_shape(), [1416, 1536]);

        let cfg = GeometryConfig::Agipd(OneMConfig {
            source: OneMSource::Stacked,
        });
        assert_eq!(cfg.build().unwrap().assembled_shape(), [1024, 1024]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let cfg = GeometryConfig::Dssc(OneMConfig {
            source: OneMSource::PanelFile {
                path: "/nonexistent/dssc-panels.json".into(),
            },
        });
        assert!(matches!(cfg.build(), Err(LoadError::Io(_))));
    }
}
