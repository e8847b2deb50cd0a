use std::fmt;

/// Half of the serial number space; distances at or beyond this are ambiguous.
const HALF_RANGE: u32 = 1 << 31;

/// 32-bit serial number compared with RFC 1982 sequence-space arithmetic.
///
/// Serials wrap at 2^32. `a` precedes `b` when the forward distance from
/// `a` to `b`, taken modulo 2^32, is non-zero and below 2^31.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Serial(pub u32);

impl Serial {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// The serial that follows this one, wrapping past `u32::MAX`.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    #[must_use]
    pub fn add(self, steps: u32) -> Self {
        Self(self.0.wrapping_add(steps))
    }

    /// Forward distance from `self` to `later`, modulo 2^32.
    pub fn distance_to(self, later: Serial) -> u32 {
        later.0.wrapping_sub(self.0)
    }

    /// Returns true when `self` is strictly earlier than `other`.
    pub fn precedes(self, other: Serial) -> bool {
        let distance = self.distance_to(other);
        distance != 0 && distance < HALF_RANGE
    }
}

impl From<u32> for Serial {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_past_max() {
        assert_eq!(Serial(u32::MAX).next(), Serial(0));
        assert_eq!(Serial(u32::MAX).add(2), Serial(1));
    }

    #[test]
    fn max_precedes_small_values_after_wrap() {
        assert!(Serial(0xFFFF_FFFF).precedes(Serial(1)));
        assert!(!Serial(1).precedes(Serial(0xFFFF_FFFF)));
    }

    #[test]
    fn equal_serials_do_not_precede() {
        assert!(!Serial(7).precedes(Serial(7)));
    }

    #[test]
    fn half_range_is_ambiguous() {
        assert!(!Serial(0).precedes(Serial(HALF_RANGE)));
        assert!(!Serial(HALF_RANGE).precedes(Serial(0)));
        assert!(Serial(0).precedes(Serial(HALF_RANGE - 1)));
    }
}
