// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared security utilities.

use subtle::ConstantTimeEq;

/// Timing-safe byte string comparison.
///
/// Running time depends only on the length of `actual`, not on the position
/// of the first mismatching byte. Both inputs are padded with a sentinel
/// terminator so that a length mismatch is folded into the accumulator
/// rather than decided by an early return; the final zero test goes through
/// [`subtle`] to stay branch-free.
///
/// Works on values of any (differing) lengths, unlike `subtle`'s own
/// slice comparison, which requires equal lengths up front.
pub fn timing_safe_eq(expected: &[u8], actual: &[u8]) -> bool {
    // One extra sentinel byte keeps the loop bound non-zero and makes
    // "prefix of the other" inputs mismatch on the terminator.
    let expected_len = expected.len() + 1;
    let actual_len = actual.len() + 1;

    // Full-width accumulator: narrowing the length term would let lengths
    // whose XOR is a multiple of 256 cancel out.
    let mut acc = expected_len ^ actual_len;
    for i in 0..actual_len {
        let e = if i % expected_len == expected.len() {
            0
        } else {
            expected[i % expected_len]
        };
        let a = if i == actual.len() { 0 } else { actual[i] };
        acc |= usize::from(e ^ a);
    }
    acc.ct_eq(&0).into()
}

/// Timing-safe comparison of two strings.
#[inline]
pub fn timing_safe_str_eq(expected: &str, actual: &str) -> bool {
    timing_safe_eq(expected.as_bytes(), actual.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal() {
        assert!(timing_safe_eq(b"", b""));
        assert!(timing_safe_eq(b"a", b"a"));
        assert!(timing_safe_eq(b"open sesame", b"open sesame"));
    }

    #[test]
    fn unequal() {
        assert!(!timing_safe_eq(b"a", b"b"));
        assert!(!timing_safe_eq(b"abc", b"abd"));
        assert!(!timing_safe_eq(b"abc", b"ab"));
        assert!(!timing_safe_eq(b"ab", b"abc"));
        assert!(!timing_safe_eq(b"", b"a"));
        assert!(!timing_safe_eq(b"a", b""));
        // A repeated prefix must not compare equal to the repetition.
        assert!(!timing_safe_eq(b"ab", b"abab"));
    }

    #[test]
    fn length_difference_of_256() {
        // The padded lengths XOR to a multiple of 256 here; a narrowed
        // accumulator would report equality.
        assert!(!timing_safe_eq(b"", &[0u8; 256]));
        assert!(!timing_safe_eq(&[0u8; 256], b""));

        // Same shape with every per-byte XOR also zero: "ab" against the
        // sentinel-padded pattern "ab\0" repeated out to 770 bytes.
        let mut long = Vec::with_capacity(770);
        for _ in 0..256 {
            long.extend_from_slice(b"ab\0");
        }
        long.extend_from_slice(b"ab");
        assert_eq!(long.len(), 770);
        assert!(!timing_safe_eq(b"ab", &long));
    }

    #[test]
    fn random_pairs() {
        // Property check over random lengths and contents.
        use rand::{Rng, RngCore};
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let len_a = rng.gen_range(0..64);
            let len_b = rng.gen_range(0..64);
            let mut a = vec![0u8; len_a];
            let mut b = vec![0u8; len_b];
            rng.fill_bytes(&mut a);
            rng.fill_bytes(&mut b);
            assert_eq!(timing_safe_eq(&a, &b), a == b);
            assert!(timing_safe_eq(&a, &a.clone()));
        }
    }
}
