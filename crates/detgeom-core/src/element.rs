//! Numeric element types accepted by the assembly kernels.
//!
//! Every kernel is generic over a source element `S` and a destination
//! element `T: FromElement<S>`. The conversion table is closed: identity for
//! every element, integers and `bool` into floating point, and `f32` into
//! `f64`. Any other pairing does not compile.

use std::fmt;

/// A pixel value that can live in a module or an assembled buffer.
pub trait Element: Copy + Send + Sync + PartialEq + fmt::Debug + 'static {
    /// Short type name used in diagnostics.
    const NAME: &'static str;

    /// Value written into pixels that hold no data: NaN for floats, zero otherwise.
    fn fill_value() -> Self;

    /// True if `self` reads as "no data".
    fn is_fill(self) -> bool;
}

/// Type-faithful conversion from a source element.
pub trait FromElement<S: Element>: Element {
    fn from_element(value: S) -> Self;
}

impl<T: Element> FromElement<T> for T {
    #[inline]
    fn from_element(value: T) -> T {
        value
    }
}

macro_rules! impl_integer_element {
    ($($t:ty),* $(,)?) => {
        $(
            impl Element for $t {
                const NAME: &'static str = stringify!($t);

                #[inline]
                fn fill_value() -> Self {
                    0
                }

                #[inline]
                fn is_fill(self) -> bool {
                    self == 0
                }
            }

            impl FromElement<$t> for f32 {
                #[inline]
                fn from_element(value: $t) -> f32 {
                    value as f32
                }
            }

            impl FromElement<$t> for f64 {
                #[inline]
                fn from_element(value: $t) -> f64 {
                    value as f64
                }
            }
        )*
    };
}

macro_rules! impl_float_element {
    ($($t:ty),* $(,)?) => {
        $(
            impl Element for $t {
                const NAME: &'static str = stringify!($t);

                #[inline]
                fn fill_value() -> Self {
                    <$t>::NAN
                }

                #[inline]
                fn is_fill(self) -> bool {
                    self.is_nan()
                }
            }
        )*
    };
}

impl_integer_element!(i16, i32, i64, u16, u32, u64);
impl_float_element!(f32, f64);

impl Element for bool {
    const NAME: &'static str = "bool";

    #[inline]
    fn fill_value() -> Self {
        false
    }

    #[inline]
    fn is_fill(self) -> bool {
        !self
    }
}

impl FromElement<bool> for f32 {
    #[inline]
    fn from_element(value: bool) -> f32 {
        if value {
            1.0
        } else {
            0.0
        }
    }
}

impl FromElement<bool> for f64 {
    #[inline]
    fn from_element(value: bool) -> f64 {
        if value {
            1.0
        } else {
            0.0
        }
    }
}

impl FromElement<f32> for f64 {
    #[inline]
    fn from_element(value: f32) -> f64 {
        value as f64
    }
}
