//! Generalized grid detectors: JUNGFRAU, ePix100 and caller-defined layouts.
//!
//! Modules are single sensors placed on an `n_rows x n_cols` grid, either
//! edge to edge ([`GeneralizedLayout::stacked`]) or at measured positions
//! ([`GeneralizedLayout::from_module_positions`]). Edge masking works on
//! ASIC boundaries; tile-edge masking is rejected.
//!
//! ```
//! use detgeom_generalized::JUNGFRAU;
//!
//! let geom = JUNGFRAU.stacked(3, 2).unwrap();
//! assert_eq!(geom.assembled_shape(), [1536, 2048]);
//! ```

mod layout;

pub use layout::{GeneralizedDetector, GeneralizedLayout, Mounting, EPIX100, JUNGFRAU};
