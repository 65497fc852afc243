//! Stack per-device arrays of one pulse train into a [`ModuleStack`].

use std::collections::HashMap;

use log::debug;
use ndarray::{ArrayD, ArrayViewD};

use crate::{Element, ModuleStack, StackError};

/// Upper bound on the number of modules of any supported detector.
pub const MAX_MODULES: usize = 16;

/// Which module numbers to look up in a train.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleSelection {
    /// Modules `0..n`, as numbered by 1M detectors.
    Count(usize),
    /// Explicit module numbers; slot `i` holds `numbers[i]`.
    Numbers(Vec<usize>),
}

impl ModuleSelection {
    fn numbers(&self) -> Vec<usize> {
        match self {
            ModuleSelection::Count(n) => (0..*n).collect(),
            ModuleSelection::Numbers(v) => v.clone(),
        }
    }
}

/// Gather `property` of every selected module device of `train`.
///
/// `device_pattern` holds one `*` standing for the module number. Devices
/// missing from the train leave their slot unbound. With
/// `memory_cell_last`, module arrays shaped `(y, x, cells)` are viewed as
/// `(cells, y, x)`. The arrays are borrowed, never copied.
pub fn stack_detector_modules<'a, T: Element>(
    train: &'a HashMap<String, HashMap<String, ArrayD<T>>>,
    device_pattern: &str,
    property: &str,
    selection: &ModuleSelection,
    memory_cell_last: bool,
) -> Result<ModuleStack<'a, T>, StackError> {
    if train.is_empty() {
        return Err(StackError::EmptyTrain);
    }
    let (prefix, suffix) = device_pattern
        .split_once('*')
        .filter(|(_, suffix)| !suffix.contains('*'))
        .ok_or_else(|| StackError::DevicePattern(device_pattern.to_string()))?;

    let numbers = selection.numbers();
    if numbers.len() > MAX_MODULES {
        return Err(StackError::TooManyModules {
            max: MAX_MODULES,
            got: numbers.len(),
        });
    }

    let mut shape: Option<Vec<usize>> = None;
    let mut modules: Vec<(usize, ArrayViewD<'a, T>)> = Vec::with_capacity(numbers.len());
    for (slot, number) in numbers.iter().enumerate() {
        let device = format!("{prefix}{number}{suffix}");
        let Some(array) = train.get(&device).and_then(|d| d.get(property)) else {
            continue;
        };

        let mut view = array.view();
        if memory_cell_last && view.ndim() > 2 {
            let mut axes: Vec<usize> = (0..view.ndim()).collect();
            axes.rotate_right(1);
            view = view.permuted_axes(axes);
        }

        match &shape {
            Some(expected) if expected.as_slice() != view.shape() => {
                return Err(StackError::ModuleShape {
                    module: slot,
                    expected: expected.clone(),
                    got: view.shape().to_vec(),
                });
            }
            Some(_) => {}
            None => shape = Some(view.shape().to_vec()),
        }
        modules.push((slot, view));
    }

    let shape = shape.ok_or_else(|| StackError::NoModuleData {
        property: property.to_string(),
    })?;
    debug!(
        "stacked {}/{} modules of {:?} from {:?}",
        modules.len(),
        numbers.len(),
        shape,
        device_pattern
    );
    ModuleStack::new(numbers.len(), &shape, modules)
}
