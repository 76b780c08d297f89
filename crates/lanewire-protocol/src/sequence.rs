//! Wraparound arithmetic over the sequence space.
//!
//! Sequence numbers live in `[0, MAX_SEQUENCE)` and are only ever compared through
//! [`relative`]; raw `<`/`>` is wrong as soon as the counter wraps.

use lanewire_core::{
    constants::{HALF_MAX_SEQUENCE, MAX_SEQUENCE},
    packet::SequenceNumber,
};

/// Signed distance from `b` to `a`, in `[-MAX_SEQUENCE / 2, MAX_SEQUENCE / 2)`.
///
/// Positive means `a` is ahead of `b`.
#[inline]
pub fn relative(a: SequenceNumber, b: SequenceNumber) -> i32 {
    let modulus = i32::from(MAX_SEQUENCE);
    let half = i32::from(HALF_MAX_SEQUENCE);
    (i32::from(a) - i32::from(b) + modulus + half).rem_euclid(modulus) - half
}

/// Returns the sequence following `sequence`.
#[inline]
pub fn next(sequence: SequenceNumber) -> SequenceNumber {
    (sequence + 1) % MAX_SEQUENCE
}

/// Returns `sequence` advanced by `count`.
#[inline]
pub fn advance(sequence: SequenceNumber, count: u16) -> SequenceNumber {
    ((u32::from(sequence) + u32::from(count)) % u32::from(MAX_SEQUENCE)) as SequenceNumber
}

/// Returns true if `sequence` is a valid member of the sequence space.
#[inline]
pub fn is_valid(sequence: SequenceNumber) -> bool {
    sequence < MAX_SEQUENCE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_basics() {
        assert_eq!(relative(5, 5), 0);
        assert_eq!(relative(6, 5), 1);
        assert_eq!(relative(5, 6), -1);
        assert_eq!(relative(0, MAX_SEQUENCE - 1), 1);
        assert_eq!(relative(MAX_SEQUENCE - 1, 0), -1);
    }

    #[test]
    fn test_relative_is_antisymmetric_near_wrap() {
        let points = [0, 1, 63, 100, 16383, 16384, 30000, MAX_SEQUENCE - 64, MAX_SEQUENCE - 1];
        for &a in &points {
            for &b in &points {
                let d = relative(a, b);
                assert!((-i32::from(HALF_MAX_SEQUENCE)..i32::from(HALF_MAX_SEQUENCE)).contains(&d));
                if d.abs() < i32::from(HALF_MAX_SEQUENCE) {
                    assert_eq!(d, -relative(b, a), "a={} b={}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_relative_range_edge() {
        assert_eq!(relative(HALF_MAX_SEQUENCE, 0), -i32::from(HALF_MAX_SEQUENCE));
        assert_eq!(relative(HALF_MAX_SEQUENCE - 1, 0), i32::from(HALF_MAX_SEQUENCE) - 1);
    }

    #[test]
    fn test_next_and_advance_wrap() {
        assert_eq!(next(MAX_SEQUENCE - 1), 0);
        assert_eq!(next(10), 11);
        assert_eq!(advance(MAX_SEQUENCE - 2, 5), 3);
        assert!(is_valid(MAX_SEQUENCE - 1));
        assert!(!is_valid(MAX_SEQUENCE));
    }
}
