use std::cmp::{self, Ordering};
use std::convert::TryFrom;
use std::fmt::{self, Debug, Display, LowerHex, UpperHex};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum IntPriv {
    /// Always non-negative.
    PosInt(u64),
    /// Always negative.
    NegInt(i64),
}

/// A signed-or-unsigned msgpack integer.
///
/// The wire format has separate tag families for positive and negative
/// values, each with its own width range, so this holds either a `u64` or
/// an `i64` internally rather than forcing everything through `i64` and
/// losing the top bit of `u64::MAX`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Integer {
    n: IntPriv,
}

impl Integer {
    /// Minimum possible integer that can be represented. Equivalent to
    /// `i64::MIN`.
    pub fn min_value() -> Integer {
        Integer {
            n: IntPriv::NegInt(i64::MIN),
        }
    }

    /// Maximum possible integer that can be represented. Equivalent to
    /// `u64::MAX`.
    pub fn max_value() -> Integer {
        Integer {
            n: IntPriv::PosInt(u64::MAX),
        }
    }

    /// Returns `true` if the integer can be represented as `i64`.
    #[inline]
    pub fn is_i64(&self) -> bool {
        match self.n {
            IntPriv::PosInt(n) => n <= i64::MAX as u64,
            IntPriv::NegInt(..) => true,
        }
    }

    /// Returns `true` if the integer can be represented as `u64`.
    #[inline]
    pub fn is_u64(&self) -> bool {
        matches!(self.n, IntPriv::PosInt(..))
    }

    /// Returns the integer as `i64` if it fits, or else `None`.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self.n {
            IntPriv::PosInt(n) => i64::try_from(n).ok(),
            IntPriv::NegInt(n) => Some(n),
        }
    }

    /// Returns the integer as `u64` if it fits, or else `None`.
    #[inline]
    pub fn as_u64(&self) -> Option<u64> {
        match self.n {
            IntPriv::PosInt(n) => Some(n),
            IntPriv::NegInt(n) => u64::try_from(n).ok(),
        }
    }

    /// Returns the integer as `f64`. This is always possible, though
    /// values outside `f64`'s 53-bit mantissa lose precision.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self.n {
            IntPriv::PosInt(n) => n as f64,
            IntPriv::NegInt(n) => n as f64,
        }
    }

    /// Casts the value to `u64` bit-for-bit, with no range check.
    #[inline]
    pub fn as_bits(&self) -> u64 {
        match self.n {
            IntPriv::PosInt(n) => n,
            IntPriv::NegInt(n) => n as u64,
        }
    }

    pub(crate) fn repr(&self) -> IntPriv {
        self.n
    }

    pub(crate) fn from_parts(n: IntPriv) -> Self {
        Integer { n }
    }
}

impl Default for Integer {
    fn default() -> Self {
        Self {
            n: IntPriv::PosInt(0),
        }
    }
}

impl cmp::Ord for Integer {
    fn cmp(&self, other: &Integer) -> Ordering {
        match (self.n, other.n) {
            (IntPriv::NegInt(lhs), IntPriv::NegInt(rhs)) => lhs.cmp(&rhs),
            (IntPriv::NegInt(_), IntPriv::PosInt(_)) => Ordering::Less,
            (IntPriv::PosInt(_), IntPriv::NegInt(_)) => Ordering::Greater,
            (IntPriv::PosInt(lhs), IntPriv::PosInt(rhs)) => lhs.cmp(&rhs),
        }
    }
}

impl cmp::PartialOrd for Integer {
    fn partial_cmp(&self, other: &Integer) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Debug for Integer {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        Debug::fmt(&self.n, fmt)
    }
}

impl Display for Integer {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self.n {
            IntPriv::PosInt(v) => Display::fmt(&v, fmt),
            IntPriv::NegInt(v) => Display::fmt(&v, fmt),
        }
    }
}

impl UpperHex for Integer {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        UpperHex::fmt(&self.as_bits(), fmt)
    }
}

impl LowerHex for Integer {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        LowerHex::fmt(&self.as_bits(), fmt)
    }
}

macro_rules! impl_from_unsigned {
    ($t: ty) => {
        impl From<$t> for Integer {
            fn from(n: $t) -> Self {
                Integer {
                    n: IntPriv::PosInt(n as u64),
                }
            }
        }
    };
}

macro_rules! impl_from_signed {
    ($t: ty) => {
        impl From<$t> for Integer {
            fn from(n: $t) -> Self {
                if n < 0 {
                    Integer {
                        n: IntPriv::NegInt(n as i64),
                    }
                } else {
                    Integer {
                        n: IntPriv::PosInt(n as u64),
                    }
                }
            }
        }
    };
}

impl_from_unsigned!(u8);
impl_from_unsigned!(u16);
impl_from_unsigned!(u32);
impl_from_unsigned!(u64);
impl_from_unsigned!(usize);
impl_from_signed!(i8);
impl_from_signed!(i16);
impl_from_signed!(i32);
impl_from_signed!(i64);
impl_from_signed!(isize);

macro_rules! impl_try_from {
    ($t: ty) => {
        impl TryFrom<Integer> for $t {
            type Error = Integer;
            fn try_from(v: Integer) -> Result<Self, Self::Error> {
                match v.n {
                    IntPriv::PosInt(n) => TryFrom::try_from(n).map_err(|_| v),
                    IntPriv::NegInt(n) => TryFrom::try_from(n).map_err(|_| v),
                }
            }
        }
    };
}

impl_try_from!(u8);
impl_try_from!(u16);
impl_try_from!(u32);
impl_try_from!(u64);
impl_try_from!(usize);
impl_try_from!(i8);
impl_try_from!(i16);
impl_try_from!(i32);
impl_try_from!(i64);
impl_try_from!(isize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_unsigned_boundary() {
        assert!(Integer::from(-1i64).is_i64());
        assert!(!Integer::from(-1i64).is_u64());
        assert!(Integer::from(u64::MAX).is_u64());
        assert!(!Integer::from(u64::MAX).is_i64());
    }

    #[test]
    fn ordering_crosses_the_sign_boundary() {
        assert!(Integer::from(-1i64) < Integer::from(0u64));
        assert!(Integer::from(0u64) < Integer::from(u64::MAX));
        assert!(Integer::min_value() < Integer::max_value());
    }

    #[test]
    fn as_f64_never_fails() {
        assert_eq!(Integer::from(-5i64).as_f64(), -5.0);
        assert_eq!(Integer::from(5u64).as_f64(), 5.0);
    }
}
