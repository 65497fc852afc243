//! Assembly and dismantle kernels over a [`PixelMap`].
//!
//! Both directions are gathers from the writer's point of view, so every
//! parallel task owns a disjoint part of the output:
//!
//! - assemble walks image rows (per frame) and reads `map.sources()`;
//! - dismantle walks modules (per frame) and reads `map.destinations()`.
//!
//! All shape checks happen before the first write.

use ndarray::{ArrayView, ArrayView3, ArrayViewMut, ArrayViewMut3, Axis, Dimension, Ix3, Ix4};
use rayon::prelude::*;

use crate::{AssemblyError, EdgeFlags, Element, FromElement, ModuleStack, PixelMap, UNMAPPED};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Module data normalised to `(frames, y, x)` views, one per module.
#[derive(Debug)]
pub struct SourceFrames<'a, S> {
    /// `None` for single-frame input.
    pub batch: Option<usize>,
    pub modules: Vec<ArrayView3<'a, S>>,
}

/// Anything that can be read as per-module data: a contiguous
/// `(module, y, x)` / `(batch, module, y, x)` array or a [`ModuleStack`].
pub trait ModuleSource<'a, S: Element> {
    /// Module count and per-module `(y, x)`, read without touching the data.
    fn layout(&self) -> Result<(usize, [usize; 2]), AssemblyError>;

    fn frames(self) -> Result<SourceFrames<'a, S>, AssemblyError>;
}

impl<'a, S: Element, D: Dimension> ModuleSource<'a, S> for ArrayView<'a, S, D> {
    fn layout(&self) -> Result<(usize, [usize; 2]), AssemblyError> {
        match *self.shape() {
            [.., m, y, x] if self.ndim() <= 4 => Ok((m, [y, x])),
            _ => Err(ndim_error("modules", self.ndim())),
        }
    }

    fn frames(self) -> Result<SourceFrames<'a, S>, AssemblyError> {
        let view = self.into_dyn();
        let (batch, view) = match view.ndim() {
            3 => (None, view.insert_axis(Axis(0))),
            4 => (Some(view.len_of(Axis(0))), view),
            got => {
                return Err(AssemblyError::InvalidNdim {
                    what: "modules",
                    expected: "3 or 4",
                    got,
                })
            }
        };
        let modules = (0..view.len_of(Axis(1)))
            .map(|m| {
                view.clone()
                    .index_axis_move(Axis(1), m)
                    .into_dimensionality::<Ix3>()
                    .map_err(|_| ndim_error("modules", 4))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SourceFrames { batch, modules })
    }
}

/// Dimensionality of a stack the executor can read: 3 or 4 axes with the
/// stacking axis right before `(y, x)`.
fn stack_ndim<S: Element>(stack: &ModuleStack<'_, S>) -> Result<usize, AssemblyError> {
    let ndim = stack.ndim();
    if ndim != 3 && ndim != 4 {
        return Err(ndim_error("module stack", ndim));
    }
    if stack.stack_axis() + 3 != ndim {
        return Err(AssemblyError::StackAxis {
            axis: stack.stack_axis(),
            ndim,
        });
    }
    Ok(ndim)
}

impl<'a, 's: 'a, S: Element> ModuleSource<'a, S> for &'a ModuleStack<'s, S> {
    fn layout(&self) -> Result<(usize, [usize; 2]), AssemblyError> {
        let ndim = stack_ndim(self)?;
        let shape = self.module_shape();
        Ok((self.n_modules(), [shape[ndim - 3], shape[ndim - 2]]))
    }

    fn frames(self) -> Result<SourceFrames<'a, S>, AssemblyError> {
        let ndim = stack_ndim(self)?;
        let batch = (ndim == 4).then(|| self.module_shape()[0]);
        let modules = (0..self.n_modules())
            .map(|m| {
                let data = self.get(m)?;
                let data = if ndim == 3 {
                    data.insert_axis(Axis(0))
                } else {
                    data
                };
                data.into_dimensionality::<Ix3>()
                    .map_err(|_| ndim_error("module stack", ndim))
            })
            .collect::<Result<Vec<_>, AssemblyError>>()?;
        Ok(SourceFrames { batch, modules })
    }
}

fn ndim_error(what: &'static str, got: usize) -> AssemblyError {
    AssemblyError::InvalidNdim {
        what,
        expected: "3 or 4",
        got,
    }
}

/// View a 2-d or 3-d buffer as `(frames, rows, cols)`.
fn frames_mut<'o, T, D: Dimension>(
    out: ArrayViewMut<'o, T, D>,
    what: &'static str,
) -> Result<(Option<usize>, ArrayViewMut3<'o, T>), AssemblyError> {
    let out = out.into_dyn();
    let ndim = out.ndim();
    let (batch, out) = match ndim {
        2 => (None, out.insert_axis(Axis(0))),
        3 => (Some(out.len_of(Axis(0))), out),
        got => {
            return Err(AssemblyError::InvalidNdim {
                what,
                expected: "2 or 3",
                got,
            })
        }
    };
    let out = out
        .into_dimensionality::<Ix3>()
        .map_err(|_| AssemblyError::InvalidNdim {
            what,
            expected: "2 or 3",
            got: ndim,
        })?;
    Ok((batch, out))
}

fn check_modules(map: &PixelMap, layout: (usize, [usize; 2])) -> Result<(), AssemblyError> {
    let (n_modules, [y, x]) = layout;
    if n_modules != map.n_modules() {
        return Err(AssemblyError::ModuleCountMismatch {
            expected: map.n_modules(),
            got: n_modules,
        });
    }
    let [my, mx] = map.module_shape();
    if (y, x) != (my, mx) {
        return Err(AssemblyError::ShapeMismatch {
            what: "module",
            expected: vec![my, mx],
            got: vec![y, x],
        });
    }
    Ok(())
}

/// Copy module data into the assembled image.
///
/// `out` is `(rows, cols)` for single-frame input or `(batch, rows, cols)`
/// for batched input. Image pixels without a source, and source pixels
/// carrying any of the `skip` edge flags, are not written.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(map, modules, out), fields(image = ?map.image_shape()))
)]
pub fn assemble<'a, S, T, I, D>(
    map: &PixelMap,
    modules: I,
    out: ArrayViewMut<'_, T, D>,
    skip: EdgeFlags,
) -> Result<(), AssemblyError>
where
    S: Element,
    T: FromElement<S>,
    I: ModuleSource<'a, S>,
    D: Dimension,
{
    check_modules(map, modules.layout()?)?;
    let src = modules.frames()?;
    let (batch, mut out) = frames_mut(out, "assembled output")?;
    if batch != src.batch {
        return Err(AssemblyError::BatchMismatch {
            input: src.batch,
            output: batch,
        });
    }
    let [h, w] = map.image_shape();
    let (_, oy, ox) = out.dim();
    if (oy, ox) != (h, w) {
        return Err(AssemblyError::ShapeMismatch {
            what: "assembled output",
            expected: vec![h, w],
            got: vec![oy, ox],
        });
    }
    if h == 0 || w == 0 {
        return Ok(());
    }

    let [my, mx] = map.module_shape();
    let plane = my * mx;
    let sources = map.sources();
    let flags = map.edge_flags();
    let modules = &src.modules;

    out.outer_iter_mut()
        .into_par_iter()
        .enumerate()
        .for_each(|(b, mut frame)| {
            frame
                .outer_iter_mut()
                .into_par_iter()
                .zip(sources.par_chunks(w))
                .for_each(|(mut line, row_sources)| {
                    for (dst, &s) in line.iter_mut().zip(row_sources) {
                        if s == UNMAPPED {
                            continue;
                        }
                        let s = s as usize;
                        if flags[s].intersects(skip) {
                            continue;
                        }
                        let (m, rem) = (s / plane, s % plane);
                        *dst = T::from_element(modules[m][[b, rem / mx, rem % mx]]);
                    }
                });
        });
    Ok(())
}

/// Copy the assembled image back into module data.
///
/// `assembled` is `(rows, cols)` or `(batch, rows, cols)`; `out` is
/// `(module, y, x)` or `(batch, module, y, x)` accordingly. Module pixels
/// without a destination are not written.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(map, assembled, out), fields(image = ?map.image_shape()))
)]
pub fn dismantle<S, T, D, E>(
    map: &PixelMap,
    assembled: ArrayView<'_, S, D>,
    out: ArrayViewMut<'_, T, E>,
) -> Result<(), AssemblyError>
where
    S: Element,
    T: FromElement<S>,
    D: Dimension,
    E: Dimension,
{
    let assembled = assembled.into_dyn();
    let (in_batch, assembled) = match assembled.ndim() {
        2 => (None, assembled.insert_axis(Axis(0))),
        3 => (Some(assembled.len_of(Axis(0))), assembled),
        got => {
            return Err(AssemblyError::InvalidNdim {
                what: "assembled input",
                expected: "2 or 3",
                got,
            })
        }
    };
    let assembled = assembled
        .into_dimensionality::<Ix3>()
        .map_err(|_| ndim_error("assembled input", 3))?;
    let [h, w] = map.image_shape();
    let (_, ay, ax) = assembled.dim();
    if (ay, ax) != (h, w) {
        return Err(AssemblyError::ShapeMismatch {
            what: "assembled input",
            expected: vec![h, w],
            got: vec![ay, ax],
        });
    }

    let out = out.into_dyn();
    let (out_batch, out) = match out.ndim() {
        3 => (None, out.insert_axis(Axis(0))),
        4 => (Some(out.len_of(Axis(0))), out),
        got => {
            return Err(AssemblyError::InvalidNdim {
                what: "dismantled output",
                expected: "3 or 4",
                got,
            })
        }
    };
    if in_batch != out_batch {
        return Err(AssemblyError::BatchMismatch {
            input: in_batch,
            output: out_batch,
        });
    }
    let mut out = out
        .into_dimensionality::<Ix4>()
        .map_err(|_| ndim_error("dismantled output", 4))?;
    let n_modules = out.len_of(Axis(1));
    if n_modules != map.n_modules() {
        return Err(AssemblyError::ModuleCountMismatch {
            expected: map.n_modules(),
            got: n_modules,
        });
    }
    let [my, mx] = map.module_shape();
    let (oy, ox) = (out.len_of(Axis(2)), out.len_of(Axis(3)));
    if (oy, ox) != (my, mx) {
        return Err(AssemblyError::ShapeMismatch {
            what: "dismantled output",
            expected: vec![my, mx],
            got: vec![oy, ox],
        });
    }

    let plane = my * mx;
    let dest = map.destinations();
    let assembled = &assembled;

    out.axis_iter_mut(Axis(1))
        .into_par_iter()
        .zip(dest.par_chunks(plane.max(1)))
        .for_each(|(mut module, module_dest)| {
            for (b, mut frame) in module.outer_iter_mut().enumerate() {
                for (dst, &d) in frame.iter_mut().zip(module_dest) {
                    if d == UNMAPPED {
                        continue;
                    }
                    let d = d as usize;
                    *dst = T::from_element(assembled[[b, d / w, d % w]]);
                }
            }
        });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EdgeRule, Family, GeometryDescriptor, TileOrientation, TilePlacement};
    use ndarray::{Array, Array2, Array3, Array4, ArrayD, IxDyn};
    use nalgebra::{Vector2, Vector3};

    fn two_modules() -> PixelMap {
        let px = 1e-4;
        let desc = GeometryDescriptor {
            family: Family::Generalized,
            n_modules: 2,
            module_shape: [3, 4],
            pixel_size: Vector2::new(px, px),
            edge_rule: EdgeRule::AsicBorders {
                asic_shape: [3, 2],
            },
            tiles: (0..2)
                .map(|m| TilePlacement {
                    module: m,
                    origin: [0, 0],
                    shape: [3, 4],
                    corner: Vector3::new(4.0 * m as f64 * px, 0.0, 0.0),
                    orientation: TileOrientation::IMAGE,
                })
                .collect(),
        };
        PixelMap::build(&desc).unwrap()
    }

    #[test]
    fn all_ones_assemble_and_dismantle_exactly() {
        let map = two_modules();
        let modules = Array3::<f32>::ones((2, 3, 4));
        let mut image = Array2::<f32>::from_elem((3, 8), f32::NAN);
        assemble(&map, modules.view(), image.view_mut(), EdgeFlags::NONE).unwrap();
        assert!(image.iter().all(|&v| v == 1.0));

        let mut back = Array3::<f32>::from_elem((2, 3, 4), f32::NAN);
        dismantle(&map, image.view(), back.view_mut()).unwrap();
        assert_eq!(back, modules);
    }

    #[test]
    fn batched_integers_promote_to_float() {
        let map = two_modules();
        let modules = Array4::<u16>::from_shape_fn((5, 2, 3, 4), |(b, m, y, x)| {
            (1000 * b + 100 * m + 10 * y + x) as u16
        });
        let mut image = Array3::<f64>::from_elem((5, 3, 8), f64::NAN);
        assemble(&map, modules.view(), image.view_mut(), EdgeFlags::NONE).unwrap();
        assert_eq!(image[[3, 2, 5]], 3121.0);
        assert_eq!(image[[4, 0, 3]], 4003.0);

        let mut back = Array4::<u16>::zeros((5, 2, 3, 4));
        let image_u16 = image.mapv(|v| v as u16);
        dismantle(&map, image_u16.view(), back.view_mut()).unwrap();
        assert_eq!(back, modules);
    }

    #[test]
    fn skipped_edges_keep_prefilled_value() {
        let map = two_modules();
        let modules = Array3::<f32>::ones((2, 3, 4));
        let mut image = Array2::<f32>::from_elem((3, 8), f32::NAN);
        assemble(&map, modules.view(), image.view_mut(), EdgeFlags::ASIC).unwrap();
        // ASICs of 3x2: every pixel is on an ASIC border
        assert!(image.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn rejected_calls_leave_output_untouched() {
        let map = two_modules();
        let mut image = Array2::<f32>::from_elem((3, 8), -1.0);

        let three = Array3::<f32>::ones((3, 3, 4));
        let err = assemble(&map, three.view(), image.view_mut(), EdgeFlags::NONE).unwrap_err();
        assert!(matches!(err, AssemblyError::ModuleCountMismatch { expected: 2, got: 3 }));

        let wrong = Array3::<f32>::ones((2, 4, 3));
        let err = assemble(&map, wrong.view(), image.view_mut(), EdgeFlags::NONE).unwrap_err();
        assert!(matches!(err, AssemblyError::ShapeMismatch { what: "module", .. }));

        let batched = Array4::<f32>::ones((2, 2, 3, 4));
        let err = assemble(&map, batched.view(), image.view_mut(), EdgeFlags::NONE).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::BatchMismatch {
                input: Some(2),
                output: None
            }
        ));

        let flat = Array::<f32, _>::ones(IxDyn(&[2, 12]));
        let err = assemble(&map, flat.view(), image.view_mut(), EdgeFlags::NONE).unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidNdim { got: 2, .. }));

        assert!(image.iter().all(|&v| v == -1.0));
    }

    #[test]
    fn stack_input_fills_absent_modules() {
        let map = two_modules();
        let present = Array2::<f32>::from_elem((3, 4), 2.0);
        let stack = ModuleStack::new(2, &[3, 4], [(1, present.view().into_dyn())]).unwrap();
        let mut image = Array2::<f32>::zeros((3, 8));
        assemble(&map, &stack, image.view_mut(), EdgeFlags::NONE).unwrap();
        assert!(image.slice(ndarray::s![.., ..4]).iter().all(|v| v.is_nan()));
        assert!(image.slice(ndarray::s![.., 4..]).iter().all(|&v| v == 2.0));
    }

    #[test]
    fn rejected_stack_binds_no_absent_module() {
        let map = two_modules();
        let present = Array2::<f32>::from_elem((3, 4), 2.0);
        let mut image = Array2::<f32>::zeros((3, 8));

        let three =
            ModuleStack::<f32>::new(3, &[3, 4], [(1, present.view().into_dyn())]).unwrap();
        let err = assemble(&map, &three, image.view_mut(), EdgeFlags::NONE).unwrap_err();
        assert!(matches!(err, AssemblyError::ModuleCountMismatch { expected: 2, got: 3 }));
        assert_eq!(three.n_present(), 1);

        let turned = present.t().to_owned().into_dyn();
        let wrong = ModuleStack::<f32>::new(2, &[4, 3], [(0, turned)]).unwrap();
        let err = assemble(&map, &wrong, image.view_mut(), EdgeFlags::NONE).unwrap_err();
        assert!(matches!(err, AssemblyError::ShapeMismatch { what: "module", .. }));
        assert_eq!(wrong.n_present(), 1);
        assert!(image.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn stack_with_foreign_axis_is_rejected() {
        let map = two_modules();
        let stack = ModuleStack::<f32>::new(2, &[3, 4], Vec::<(usize, ArrayD<f32>)>::new())
            .unwrap()
            .with_stack_axis(-1)
            .unwrap();
        let mut image = Array2::<f32>::zeros((3, 8));
        let err = assemble(&map, &stack, image.view_mut(), EdgeFlags::NONE).unwrap_err();
        assert!(matches!(err, AssemblyError::StackAxis { axis: 2, ndim: 3 }));
    }
}
