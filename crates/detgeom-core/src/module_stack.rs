//! Lazy, read-only view over a sparse set of per-module buffers.
//!
//! A [`ModuleStack`] presents `n_modules` slots, each bound to a module
//! buffer (borrowed or owned) or left unbound. Reading an unbound slot binds
//! a fill-valued buffer once and returns it from then on. The stack behaves
//! like an array whose module axis sits at `stack_axis` among the module's
//! own axes, and can be sliced along every other axis without copying.

use std::fmt;
use std::sync::OnceLock;

use ndarray::{ArrayD, ArrayViewD, Axis, CowArray, IxDyn, SliceInfoElem};

use crate::Element;

/// Usage errors of a [`ModuleStack`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("module index {index} out of range for {len} modules")]
    IndexOutOfRange { index: isize, len: usize },
    #[error("module {module} was given twice")]
    DuplicateModule { module: usize },
    #[error("module {module} has shape {got:?}, expected {expected:?}")]
    ModuleShape {
        module: usize,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("axis {axis} is out of bounds for a stack of dimension {ndim}")]
    AxisOutOfRange { axis: isize, ndim: usize },
    #[error("cannot squeeze axis {axis} of length {len}")]
    NotLengthOne { axis: usize, len: usize },
    #[error("the module axis cannot be squeezed")]
    SqueezeStackAxis,
    #[error("a module stack can only select a single module or all modules")]
    PartialModuleSelection,
    #[error("invalid slice: {0}")]
    InvalidSlice(String),
    #[error("device pattern {0:?} must contain exactly one '*'")]
    DevicePattern(String),
    #[error("number of modules cannot exceed {max} (got {got})")]
    TooManyModules { max: usize, got: usize },
    #[error("empty train data")]
    EmptyTrain,
    #[error("no module in the train carries {property:?}")]
    NoModuleData { property: String },
}

/// Result of slicing a [`ModuleStack`].
#[derive(Debug)]
pub enum StackSlice<'b, T: Element> {
    /// A single module (module axis indexed away).
    Module(ArrayViewD<'b, T>),
    /// All modules, sliced along the other axes.
    Stack(ModuleStack<'b, T>),
}

/// Sparse module buffers addressed as one stacked array.
pub struct ModuleStack<'a, T: Element> {
    slots: Vec<OnceLock<CowArray<'a, T, IxDyn>>>,
    module_shape: Vec<usize>,
    stack_axis: usize,
    fill: T,
}

impl<'a, T: Element> ModuleStack<'a, T> {
    /// Bind `modules` (index, buffer) into `n_modules` slots.
    ///
    /// Buffers may be views or owned arrays; every one must have shape
    /// `module_shape`. The stacking axis defaults to `-3` and the fill value
    /// to [`Element::fill_value`].
    pub fn new<I, M>(
        n_modules: usize,
        module_shape: &[usize],
        modules: I,
    ) -> Result<Self, StackError>
    where
        I: IntoIterator<Item = (usize, M)>,
        M: Into<CowArray<'a, T, IxDyn>>,
    {
        let slots: Vec<OnceLock<CowArray<'a, T, IxDyn>>> =
            (0..n_modules).map(|_| OnceLock::new()).collect();
        for (index, data) in modules {
            let data = data.into();
            let slot = slots.get(index).ok_or(StackError::IndexOutOfRange {
                index: index as isize,
                len: n_modules,
            })?;
            if data.shape() != module_shape {
                return Err(StackError::ModuleShape {
                    module: index,
                    expected: module_shape.to_vec(),
                    got: data.shape().to_vec(),
                });
            }
            slot.set(data)
                .map_err(|_| StackError::DuplicateModule { module: index })?;
        }

        let ndim = module_shape.len() + 1;
        Ok(Self {
            slots,
            module_shape: module_shape.to_vec(),
            stack_axis: ndim.saturating_sub(3),
            fill: T::fill_value(),
        })
    }

    /// Place the module axis at `axis` (negative counts from the end).
    pub fn with_stack_axis(mut self, axis: isize) -> Result<Self, StackError> {
        self.stack_axis = normalize_axis(axis, self.ndim())?;
        Ok(self)
    }

    /// Value used for absent modules.
    pub fn with_fill_value(mut self, fill: T) -> Self {
        self.fill = fill;
        self
    }

    pub fn n_modules(&self) -> usize {
        self.slots.len()
    }

    /// Number of bound slots, including ones bound by reads of absent modules.
    pub fn n_present(&self) -> usize {
        self.slots.iter().filter(|s| s.get().is_some()).count()
    }

    pub fn module_shape(&self) -> &[usize] {
        &self.module_shape
    }

    pub fn stack_axis(&self) -> usize {
        self.stack_axis
    }

    pub fn fill_value(&self) -> T {
        self.fill
    }

    pub fn ndim(&self) -> usize {
        self.module_shape.len() + 1
    }

    /// Module shape with the module count inserted at the stacking axis.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = self.module_shape.clone();
        shape.insert(self.stack_axis, self.slots.len());
        shape
    }

    /// Buffer of module `index`, binding a fill-valued one if absent.
    pub fn get(&self, index: usize) -> Result<ArrayViewD<'_, T>, StackError> {
        let slot = self.slots.get(index).ok_or(StackError::IndexOutOfRange {
            index: index as isize,
            len: self.slots.len(),
        })?;
        let data = slot.get_or_init(|| {
            CowArray::from(ArrayD::from_elem(IxDyn(&self.module_shape), self.fill))
        });
        Ok(data.view())
    }

    /// Slice every bound module by `module_elems` (one element per module
    /// axis, missing trailing axes are kept whole). No data is copied and
    /// unbound slots stay unbound.
    pub fn get_all(
        &self,
        module_elems: &[SliceInfoElem],
    ) -> Result<ModuleStack<'_, T>, StackError> {
        let elems = pad_elems(module_elems, self.module_shape.len())?;
        check_elems(&self.module_shape, &elems)?;

        let probe = ArrayD::<()>::from_elem(IxDyn(&self.module_shape), ());
        let new_shape = probe.slice_move(elems.as_slice()).shape().to_vec();

        let mut axis_pos = 0usize;
        let mut new_axis = 0usize;
        for elem in &elems {
            if !matches!(elem, SliceInfoElem::NewAxis) {
                if axis_pos == self.stack_axis {
                    break;
                }
                axis_pos += 1;
            }
            if !matches!(elem, SliceInfoElem::Index(_)) {
                new_axis += 1;
            }
        }

        let slots = self
            .slots
            .iter()
            .map(|slot| {
                let sliced = OnceLock::new();
                if let Some(data) = slot.get() {
                    let _ = sliced.set(CowArray::from(data.view().slice_move(elems.as_slice())));
                }
                sliced
            })
            .collect();

        Ok(ModuleStack {
            slots,
            module_shape: new_shape,
            stack_axis: new_axis,
            fill: self.fill,
        })
    }

    /// Slice the stack as one array.
    ///
    /// The element at the stacking axis must be a module index or the full
    /// range; anything else is rejected.
    pub fn slice(&self, elems: &[SliceInfoElem]) -> Result<StackSlice<'_, T>, StackError> {
        let elems = pad_elems(elems, self.ndim())?;

        let mut axis_pos = 0usize;
        let mut split = None;
        for (i, elem) in elems.iter().enumerate() {
            if matches!(elem, SliceInfoElem::NewAxis) {
                continue;
            }
            if axis_pos == self.stack_axis {
                split = Some(i);
                break;
            }
            axis_pos += 1;
        }
        let split = split.ok_or(StackError::AxisOutOfRange {
            axis: self.stack_axis as isize,
            ndim: self.ndim(),
        })?;

        let mut module_elems = elems;
        let selector = module_elems.remove(split);
        match selector {
            SliceInfoElem::Index(i) => {
                let len = self.slots.len();
                let index = if i < 0 { i + len as isize } else { i };
                if index < 0 || index as usize >= len {
                    return Err(StackError::IndexOutOfRange { index: i, len });
                }
                check_elems(&self.module_shape, &module_elems)?;
                let module = self.get(index as usize)?;
                Ok(StackSlice::Module(module.slice_move(module_elems.as_slice())))
            }
            SliceInfoElem::Slice {
                start: 0,
                end: None,
                step: 1,
            } => Ok(StackSlice::Stack(self.get_all(&module_elems)?)),
            _ => Err(StackError::PartialModuleSelection),
        }
    }

    /// Drop length-1 axes (all of them, or the listed ones).
    pub fn squeeze(&self, axes: Option<&[usize]>) -> Result<ModuleStack<'_, T>, StackError> {
        let shape = self.shape();
        let full = SliceInfoElem::Slice {
            start: 0,
            end: None,
            step: 1,
        };
        let mut elems = vec![full; shape.len()];
        match axes {
            None => {
                for (axis, &len) in shape.iter().enumerate() {
                    if len == 1 && axis != self.stack_axis {
                        elems[axis] = SliceInfoElem::Index(0);
                    }
                }
            }
            Some(axes) => {
                for &axis in axes {
                    let len = *shape.get(axis).ok_or(StackError::AxisOutOfRange {
                        axis: axis as isize,
                        ndim: shape.len(),
                    })?;
                    if axis == self.stack_axis {
                        return Err(StackError::SqueezeStackAxis);
                    }
                    if len != 1 {
                        return Err(StackError::NotLengthOne { axis, len });
                    }
                    elems[axis] = SliceInfoElem::Index(0);
                }
            }
        }
        elems.remove(self.stack_axis);
        self.get_all(&elems)
    }

    /// Copy into one contiguous array of [`shape`](Self::shape); absent
    /// modules read as the fill value.
    pub fn as_array(&self) -> ArrayD<T> {
        let mut out = ArrayD::from_elem(IxDyn(&self.shape()), self.fill);
        for (m, slot) in self.slots.iter().enumerate() {
            if let Some(data) = slot.get() {
                out.index_axis_mut(Axis(self.stack_axis), m).assign(data);
            }
        }
        out
    }
}

impl<T: Element> fmt::Debug for ModuleStack<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleStack")
            .field("shape", &self.shape())
            .field("present", &format_args!("{}/{}", self.n_present(), self.n_modules()))
            .field("dtype", &T::NAME)
            .finish()
    }
}

fn normalize_axis(axis: isize, ndim: usize) -> Result<usize, StackError> {
    let norm = if axis < 0 { axis + ndim as isize } else { axis };
    if norm < 0 || norm as usize >= ndim {
        return Err(StackError::AxisOutOfRange { axis, ndim });
    }
    Ok(norm as usize)
}

/// Pad with full slices so exactly `ndim` axes are consumed.
fn pad_elems(elems: &[SliceInfoElem], ndim: usize) -> Result<Vec<SliceInfoElem>, StackError> {
    let consumed = elems
        .iter()
        .filter(|e| !matches!(e, SliceInfoElem::NewAxis))
        .count();
    if consumed > ndim {
        return Err(StackError::InvalidSlice(format!(
            "{consumed} indices for {ndim} axes"
        )));
    }
    let mut out = elems.to_vec();
    out.extend((consumed..ndim).map(|_| SliceInfoElem::Slice {
        start: 0,
        end: None,
        step: 1,
    }));
    Ok(out)
}

/// Reject anything `slice_move` would panic on.
fn check_elems(shape: &[usize], elems: &[SliceInfoElem]) -> Result<(), StackError> {
    let mut axes = shape.iter().enumerate();
    for elem in elems {
        let (axis, &len) = match elem {
            SliceInfoElem::NewAxis => continue,
            _ => axes
                .next()
                .ok_or_else(|| StackError::InvalidSlice("too many indices".to_string()))?,
        };
        let abs = |i: isize| if i < 0 { i + len as isize } else { i };
        match *elem {
            SliceInfoElem::Index(i) => {
                let j = abs(i);
                if j < 0 || j as usize >= len {
                    return Err(StackError::InvalidSlice(format!(
                        "index {i} out of bounds for axis {axis} of length {len}"
                    )));
                }
            }
            SliceInfoElem::Slice { start, end, step } => {
                if step == 0 {
                    return Err(StackError::InvalidSlice("slice step cannot be zero".to_string()));
                }
                let s = abs(start);
                let e = end.map(abs).unwrap_or(len as isize);
                if s < 0 || s as usize > len || e < 0 || e as usize > len {
                    return Err(StackError::InvalidSlice(format!(
                        "range {start}..{end:?} out of bounds for axis {axis} of length {len}"
                    )));
                }
            }
            SliceInfoElem::NewAxis => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array3, ArrayD};

    fn sparse_stack(modules: &[(usize, f32)]) -> ModuleStack<'static, f32> {
        let data = modules
            .iter()
            .map(|&(m, v)| (m, ArrayD::from_elem(IxDyn(&[2, 3, 4]), v)));
        ModuleStack::new(4, &[2, 3, 4], data).unwrap()
    }

    #[test]
    fn shape_inserts_module_count_at_stack_axis() {
        let stack = sparse_stack(&[(1, 1.0)]);
        assert_eq!(stack.stack_axis(), 1);
        assert_eq!(stack.shape(), vec![2, 4, 3, 4]);
        assert_eq!(stack.ndim(), 4);

        let stack = sparse_stack(&[]).with_stack_axis(0).unwrap();
        assert_eq!(stack.shape(), vec![4, 2, 3, 4]);
        assert!(sparse_stack(&[]).with_stack_axis(4).is_err());
    }

    #[test]
    fn absent_module_reads_fill_and_stays_bound() {
        let stack = sparse_stack(&[(1, 1.0)]);
        assert_eq!(stack.n_present(), 1);
        let m0 = stack.get(0).unwrap();
        assert!(m0.iter().all(|v| v.is_nan()));
        assert_eq!(stack.n_present(), 2);

        let again = stack.get(0).unwrap();
        assert_eq!(m0.as_ptr(), again.as_ptr());
        assert_eq!(
            stack.get(4).unwrap_err(),
            StackError::IndexOutOfRange { index: 4, len: 4 }
        );
    }

    #[test]
    fn new_rejects_bad_modules() {
        let bad = ModuleStack::<f32>::new(2, &[2, 2], [(0, ArrayD::<f32>::zeros(IxDyn(&[2, 3])))]);
        assert!(matches!(bad, Err(StackError::ModuleShape { module: 0, .. })));
        let far = ModuleStack::<f32>::new(2, &[2, 2], [(5, ArrayD::<f32>::zeros(IxDyn(&[2, 2])))]);
        assert!(matches!(far, Err(StackError::IndexOutOfRange { .. })));
    }

    #[test]
    fn views_are_borrowed_not_copied() {
        let a = Array3::<u16>::from_elem((1, 2, 2), 7);
        let stack = ModuleStack::new(2, &[1, 2, 2], [(0, a.view().into_dyn())]).unwrap();
        assert_eq!(stack.get(0).unwrap().as_ptr(), a.as_ptr());
        assert_eq!(stack.fill_value(), 0);
    }

    #[test]
    fn get_all_slices_present_modules_only() {
        let stack = sparse_stack(&[(0, 1.0), (2, 3.0)]);
        let sub = stack
            .get_all(s![0..1, .., 1..3].as_ref())
            .unwrap();
        assert_eq!(sub.module_shape(), &[1, 3, 2]);
        assert_eq!(sub.shape(), vec![1, 4, 3, 2]);
        assert_eq!(sub.n_present(), 2);
        assert_eq!(sub.get(2).unwrap()[[0, 0, 0]], 3.0);

        let frame = stack.get_all(s![1, .., ..].as_ref()).unwrap();
        assert_eq!(frame.stack_axis(), 0);
        assert_eq!(frame.shape(), vec![4, 3, 4]);
    }

    #[test]
    fn slice_selects_one_or_all_modules() {
        let stack = sparse_stack(&[(3, 5.0)]);
        match stack.slice(s![0, -1, .., 0].as_ref()).unwrap() {
            StackSlice::Module(m) => {
                assert_eq!(m.shape(), &[3]);
                assert!(m.iter().all(|&v| v == 5.0));
            }
            StackSlice::Stack(_) => panic!("expected a module"),
        }
        match stack.slice(s![1, ..].as_ref()).unwrap() {
            StackSlice::Stack(sub) => assert_eq!(sub.shape(), vec![4, 3, 4]),
            StackSlice::Module(_) => panic!("expected a stack"),
        }
        assert_eq!(
            stack.slice(s![.., 0..2].as_ref()).unwrap_err(),
            StackError::PartialModuleSelection
        );
        assert!(matches!(
            stack.slice(s![5, ..].as_ref()),
            Err(StackError::InvalidSlice(_))
        ));
    }

    #[test]
    fn as_array_fills_absent_modules() {
        let stack = sparse_stack(&[(2, 2.0)]).with_stack_axis(0).unwrap();
        let arr = stack.as_array();
        assert_eq!(arr.shape(), &[4, 2, 3, 4]);
        assert!(arr.index_axis(Axis(0), 2).iter().all(|&v| v == 2.0));
        assert!(arr.index_axis(Axis(0), 0).iter().all(|v| v.is_nan()));
        assert_eq!(stack.n_present(), 1);
    }

    #[test]
    fn squeeze_drops_unit_axes_but_not_modules() {
        let data = [(0, ArrayD::<i32>::zeros(IxDyn(&[1, 3, 4])))];
        let stack = ModuleStack::new(1, &[1, 3, 4], data).unwrap();
        assert_eq!(stack.shape(), vec![1, 1, 3, 4]);

        let squeezed = stack.squeeze(None).unwrap();
        assert_eq!(squeezed.shape(), vec![1, 3, 4]);
        assert_eq!(squeezed.stack_axis(), 0);

        assert_eq!(
            stack.squeeze(Some(&[1])).unwrap_err(),
            StackError::SqueezeStackAxis
        );
        assert_eq!(
            stack.squeeze(Some(&[2])).unwrap_err(),
            StackError::NotLengthOne { axis: 2, len: 3 }
        );
        assert_eq!(stack.squeeze(Some(&[0])).unwrap().shape(), vec![1, 3, 4]);
    }
}
