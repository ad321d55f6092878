//! Ordering and delta arithmetic over threshold values.
//!
//! The evaluation tree never does arithmetic on threshold values itself. It
//! asks a [`ValueOrdering`] to compare two values and to step a value back by
//! the configured delta. This keeps the tree generic over integer and float
//! images, and over the threshold direction.

use std::cmp::Ordering;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// Comparator plus "value minus delta" policy over threshold values.
pub trait ValueOrdering<T> {
    /// Total order over threshold values. Lower values are visited first.
    fn compare(&self, a: &T, b: &T) -> Ordering;

    /// The value `delta` steps below `value` in this ordering.
    ///
    /// Returns `None` when that value is not representable in `T` (e.g. an
    /// unsigned value close to zero). Such a target lies below every node.
    fn value_minus_delta(&self, value: &T) -> Option<T>;
}

/// Checked delta arithmetic for primitive threshold types.
pub trait DeltaValue: Copy + PartialOrd + Debug {
    fn checked_minus(self, delta: Self) -> Option<Self>;
    fn checked_plus(self, delta: Self) -> Option<Self>;
    fn is_zero_delta(self) -> bool;
}

macro_rules! impl_delta_value_int {
    ($($t:ty),*) => {
        $(
            impl DeltaValue for $t {
                #[inline]
                fn checked_minus(self, delta: Self) -> Option<Self> {
                    self.checked_sub(delta)
                }
                #[inline]
                fn checked_plus(self, delta: Self) -> Option<Self> {
                    self.checked_add(delta)
                }
                #[inline]
                fn is_zero_delta(self) -> bool {
                    self == 0
                }
            }
        )*
    };
}

macro_rules! impl_delta_value_float {
    ($($t:ty),*) => {
        $(
            impl DeltaValue for $t {
                #[inline]
                fn checked_minus(self, delta: Self) -> Option<Self> {
                    Some(self - delta)
                }
                #[inline]
                fn checked_plus(self, delta: Self) -> Option<Self> {
                    Some(self + delta)
                }
                #[inline]
                fn is_zero_delta(self) -> bool {
                    self == 0.0
                }
            }
        )*
    };
}

impl_delta_value_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);
impl_delta_value_float!(f32, f64);

/// Direction in which the threshold sweeps the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Regions grow from dark pixels; thresholds increase numerically.
    #[default]
    DarkToBright,
    /// Regions grow from bright pixels; thresholds decrease numerically.
    BrightToDark,
}

/// The standard [`ValueOrdering`] for primitive threshold values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdOrdering<T> {
    pub delta: T,
    pub direction: Direction,
}

impl<T: DeltaValue> ThresholdOrdering<T> {
    pub fn new(delta: T, direction: Direction) -> Self {
        assert!(
            !delta.is_zero_delta(),
            "delta must be non-zero, got {:?}",
            delta
        );
        Self { delta, direction }
    }

    pub fn dark_to_bright(delta: T) -> Self {
        Self::new(delta, Direction::DarkToBright)
    }

    pub fn bright_to_dark(delta: T) -> Self {
        Self::new(delta, Direction::BrightToDark)
    }
}

impl<T: DeltaValue> ValueOrdering<T> for ThresholdOrdering<T> {
    fn compare(&self, a: &T, b: &T) -> Ordering {
        let natural = a
            .partial_cmp(b)
            .unwrap_or_else(|| panic!("incomparable threshold values {:?} and {:?}", a, b));
        match self.direction {
            Direction::DarkToBright => natural,
            Direction::BrightToDark => natural.reverse(),
        }
    }

    fn value_minus_delta(&self, value: &T) -> Option<T> {
        match self.direction {
            Direction::DarkToBright => value.checked_minus(self.delta),
            Direction::BrightToDark => value.checked_plus(self.delta),
        }
    }
}
