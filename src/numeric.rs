//! Overflow-safe increment/decrement over stored integers.
//!
//! Stored values are opaque to the stores, so the integer kind of a value is
//! captured once, at write time, as a [`Kind`] tag. The mutator works on the
//! closed [`Numeric`] variant rebuilt from that tag and never coerces strings
//! or floats.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Integer kind recorded next to a stored value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    I32,
    I64,
    Isize,
    U32,
    U64,
    Usize,
    /// Anything else: the mutator rejects it with `Error::NotIntegerType`.
    Opaque,
}

/// A stored integer of a known concrete width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Numeric {
    I32(i32),
    I64(i64),
    Isize(isize),
    U32(u32),
    U64(u64),
    Usize(usize),
    Unsupported,
}

impl Numeric {
    /// Classify a value by its concrete type.
    ///
    /// ```
    /// use cache_mux::numeric::Numeric;
    ///
    /// assert_eq!(Numeric::of(&7u32), Numeric::U32(7));
    /// assert_eq!(Numeric::of(&"7".to_string()), Numeric::Unsupported);
    /// ```
    pub fn of<T: Any>(value: &T) -> Numeric {
        let any = value as &dyn Any;
        if let Some(v) = any.downcast_ref::<i32>() {
            Numeric::I32(*v)
        } else if let Some(v) = any.downcast_ref::<i64>() {
            Numeric::I64(*v)
        } else if let Some(v) = any.downcast_ref::<isize>() {
            Numeric::Isize(*v)
        } else if let Some(v) = any.downcast_ref::<u32>() {
            Numeric::U32(*v)
        } else if let Some(v) = any.downcast_ref::<u64>() {
            Numeric::U64(*v)
        } else if let Some(v) = any.downcast_ref::<usize>() {
            Numeric::Usize(*v)
        } else {
            Numeric::Unsupported
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Numeric::I32(_) => Kind::I32,
            Numeric::I64(_) => Kind::I64,
            Numeric::Isize(_) => Kind::Isize,
            Numeric::U32(_) => Kind::U32,
            Numeric::U64(_) => Kind::U64,
            Numeric::Usize(_) => Kind::Usize,
            Numeric::Unsupported => Kind::Opaque,
        }
    }

    /// Add `delta`, failing instead of wrapping.
    fn offset(self, delta: i128) -> Result<Numeric> {
        let (current, min, max) = match self {
            Numeric::I32(v) => (v as i128, i32::MIN as i128, i32::MAX as i128),
            Numeric::I64(v) => (v as i128, i64::MIN as i128, i64::MAX as i128),
            Numeric::Isize(v) => (v as i128, isize::MIN as i128, isize::MAX as i128),
            Numeric::U32(v) => (v as i128, 0, u32::MAX as i128),
            Numeric::U64(v) => (v as i128, 0, u64::MAX as i128),
            Numeric::Usize(v) => (v as i128, 0, usize::MAX as i128),
            Numeric::Unsupported => return Err(Error::NotIntegerType),
        };

        // |current| <= 2^64 and |delta| <= 2^63, no i128 overflow possible
        let next = current + delta;
        if next > max {
            return Err(Error::Overflow);
        }
        if next < min {
            return Err(Error::Underflow);
        }

        Ok(match self {
            Numeric::I32(_) => Numeric::I32(next as i32),
            Numeric::I64(_) => Numeric::I64(next as i64),
            Numeric::Isize(_) => Numeric::Isize(next as isize),
            Numeric::U32(_) => Numeric::U32(next as u32),
            Numeric::U64(_) => Numeric::U64(next as u64),
            Numeric::Usize(_) => Numeric::Usize(next as usize),
            Numeric::Unsupported => Numeric::Unsupported,
        })
    }
}

/// Increment a stored integer by `step`.
///
/// # Errors
///
/// - `Error::Overflow`: result exceeds the kind's maximum
/// - `Error::Underflow`: negative `step` takes the result below the kind's minimum
/// - `Error::NotIntegerType`: `value` is `Numeric::Unsupported`
pub fn increment(value: Numeric, step: i64) -> Result<Numeric> {
    value.offset(step as i128)
}

/// Decrement a stored integer by `step`.
///
/// # Errors
///
/// - `Error::Underflow`: result goes below the kind's minimum (zero for unsigned)
/// - `Error::Overflow`: negative `step` takes the result above the kind's maximum
/// - `Error::NotIntegerType`: `value` is `Numeric::Unsupported`
pub fn decrement(value: Numeric, step: i64) -> Result<Numeric> {
    value.offset(-(step as i128))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn test_classify_integer_kinds() {
        assert_eq!(Numeric::of(&1i32), Numeric::I32(1));
        assert_eq!(Numeric::of(&1i64), Numeric::I64(1));
        assert_eq!(Numeric::of(&1isize), Numeric::Isize(1));
        assert_eq!(Numeric::of(&1u32), Numeric::U32(1));
        assert_eq!(Numeric::of(&1u64), Numeric::U64(1));
        assert_eq!(Numeric::of(&1usize), Numeric::Usize(1));
    }

    #[test]
    fn test_classify_rejects_non_integers() {
        assert_eq!(Numeric::of(&1.5f64), Numeric::Unsupported);
        assert_eq!(Numeric::of(&"10"), Numeric::Unsupported);
        assert_eq!(Numeric::of(&1i16), Numeric::Unsupported);
        assert_eq!(Numeric::Unsupported.kind(), Kind::Opaque);
    }

    #[test]
    fn test_increment_overflow_per_kind() {
        assert!(matches!(increment(Numeric::I32(i32::MAX), 1), Err(Error::Overflow)));
        assert!(matches!(increment(Numeric::I64(i64::MAX), 1), Err(Error::Overflow)));
        assert!(matches!(increment(Numeric::U32(u32::MAX), 1), Err(Error::Overflow)));
        assert!(matches!(increment(Numeric::U64(u64::MAX), 1), Err(Error::Overflow)));
        assert!(matches!(
            increment(Numeric::Usize(usize::MAX), 1),
            Err(Error::Overflow)
        ));
        // i32 headroom is checked against the step, not just the boundary value
        assert!(matches!(
            increment(Numeric::I32(i32::MAX - 1), 5),
            Err(Error::Overflow)
        ));
    }

    #[test]
    fn test_decrement_underflow_per_kind() {
        assert!(matches!(decrement(Numeric::U32(0), 1), Err(Error::Underflow)));
        assert!(matches!(decrement(Numeric::U64(3), 4), Err(Error::Underflow)));
        assert!(matches!(decrement(Numeric::I32(i32::MIN), 1), Err(Error::Underflow)));
        assert!(matches!(
            decrement(Numeric::Isize(isize::MIN), 1),
            Err(Error::Underflow)
        ));
    }

    #[test]
    fn test_wide_step_on_narrow_kind() {
        assert!(matches!(
            increment(Numeric::U32(0), i64::from(u32::MAX) + 1),
            Err(Error::Overflow)
        ));
        assert_eq!(
            increment(Numeric::U64(0), i64::MAX).unwrap(),
            Numeric::U64(i64::MAX as u64)
        );
    }

    #[test]
    fn test_negative_step() {
        assert_eq!(increment(Numeric::I64(5), -7).unwrap(), Numeric::I64(-2));
        assert!(matches!(increment(Numeric::U32(5), -7), Err(Error::Underflow)));
        assert_eq!(decrement(Numeric::U32(5), -7).unwrap(), Numeric::U32(12));
        assert!(matches!(
            decrement(Numeric::I64(0), i64::MIN),
            Err(Error::Overflow)
        ));
    }

    #[test]
    fn test_unsupported_is_not_integer() {
        assert!(matches!(
            increment(Numeric::Unsupported, 1),
            Err(Error::NotIntegerType)
        ));
        assert!(matches!(
            decrement(Numeric::Unsupported, 1),
            Err(Error::NotIntegerType)
        ));
    }

    quickcheck! {
        fn prop_increment_then_decrement_is_identity(start: i64, step: i32) -> bool {
            let step = i64::from(step);
            match increment(Numeric::I64(start), step) {
                Ok(up) => decrement(up, step).ok() == Some(Numeric::I64(start)),
                Err(_) => true,
            }
        }

        fn prop_u32_never_wraps(start: u32, step: i64) -> bool {
            match increment(Numeric::U32(start), step) {
                Ok(Numeric::U32(v)) => i128::from(v) == i128::from(start) + i128::from(step),
                Ok(_) => false,
                Err(_) => {
                    let next = i128::from(start) + i128::from(step);
                    next > i128::from(u32::MAX) || next < 0
                }
            }
        }
    }
}
