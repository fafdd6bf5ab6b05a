//! Compact target expansion, difficulty scaling and target comparison.
//!
//! Targets and hashes are 32-byte arrays stored little-endian: the most
//! significant byte lives at index 31. This is the order the SHA-256 digest
//! bytes come out in, so a raw digest can be compared against a target
//! without any reversal.

/// A 256-bit target, most significant byte at index 31.
pub type Target = [u8; 32];

/// Compact encoding of the difficulty-1 target.
pub const DIFF1_BITS: u32 = 0x1d00ffff;

/// The difficulty-1 target (`0xffff * 2^208`) as a float.
pub const MAX_TARGET_F64: f64 =
    26959535291011309493156476344723991336010898738574164086137773096960.0;

const TWO_POW_64: f64 = 18446744073709551616.0;

/// Convert compact "bits" representation to a 256-bit target.
///
/// The bits format is: [exponent (1 byte)][mantissa (3 bytes)]
/// Target = mantissa * 256^(exponent - 3)
///
/// Mantissa bytes that would land beyond the 32-byte range are dropped, and
/// everything outside the placed mantissa is zero.
pub fn bits_to_target(bits: u32) -> Target {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007F_FFFF;
    let mut target = [0u8; 32];

    // A set sign bit encodes a negative target, which no hash can meet.
    if bits & 0x0080_0000 != 0 {
        return target;
    }

    if exponent <= 3 {
        let value = mantissa >> (8 * (3 - exponent));
        target[..4].copy_from_slice(&value.to_le_bytes());
        return target;
    }

    let shift = exponent - 3;
    for (i, byte) in mantissa.to_le_bytes()[..3].iter().enumerate() {
        if let Some(slot) = target.get_mut(shift + i) {
            *slot = *byte;
        }
    }

    target
}

/// Convert a 256-bit target back to normalized compact "bits".
///
/// This is the inverse of `bits_to_target` for normalized encodings.
pub fn target_to_bits(target: &Target) -> u32 {
    let Some(top) = target.iter().rposition(|&b| b != 0) else {
        return 0;
    };

    let mut size = (top + 1) as u32;
    let mut compact = if size <= 3 {
        let low = u32::from_le_bytes([target[0], target[1], target[2], 0]);
        low << (8 * (3 - size))
    } else {
        let at = size as usize - 3;
        u32::from_le_bytes([target[at], target[at + 1], target[at + 2], 0])
    };

    // Keep the sign bit clear by moving one byte into the exponent.
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007F_FFFF)
}

/// Returns true when `difficulty` can be used to scale a target.
#[inline]
pub fn is_valid_difficulty(difficulty: f64) -> bool {
    difficulty.is_finite() && difficulty > 0.0
}

/// Divide a 256-bit target by a floating-point difficulty.
///
/// The division walks the four 64-bit limbs from most to least significant,
/// carrying the floating remainder (scaled by 2^64) into the next limb. Limb
/// results that overflow are clamped to `u64::MAX`.
///
/// Callers must reject NaN, infinite and non-positive difficulties first
/// (see [`is_valid_difficulty`]).
pub fn scale_target_by_difficulty(target: &Target, difficulty: f64) -> Target {
    // Division by one is exact; the float path would round limbs above 2^53.
    if difficulty == 1.0 {
        return *target;
    }

    let mut limbs = [0u64; 4];
    for (i, limb) in limbs.iter_mut().enumerate() {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&target[i * 8..i * 8 + 8]);
        *limb = u64::from_le_bytes(bytes);
    }

    let mut result = [0u64; 4];
    let mut remainder = 0.0f64;
    for i in (0..4).rev() {
        let value = limbs[i] as f64 + remainder * TWO_POW_64;
        let quotient = value / difficulty;

        result[i] = if quotient >= u64::MAX as f64 {
            u64::MAX
        } else if quotient <= 0.0 {
            0
        } else {
            quotient as u64
        };

        remainder = value - (result[i] as f64) * difficulty;
    }

    let mut scaled = [0u8; 32];
    for (i, limb) in result.iter().enumerate() {
        scaled[i * 8..i * 8 + 8].copy_from_slice(&limb.to_le_bytes());
    }
    scaled
}

/// Check if a hash meets the target.
///
/// Compares from the most significant byte (index 31) down. Equality passes.
#[inline]
pub fn meets_target(hash: &[u8; 32], target: &Target) -> bool {
    for i in (0..32).rev() {
        if hash[i] < target[i] {
            return true;
        }
        if hash[i] > target[i] {
            return false;
        }
    }
    true
}

/// Convert a 256-bit little-endian value to an approximate f64.
fn target_to_f64(value: &[u8; 32]) -> f64 {
    value
        .iter()
        .rev()
        .fold(0.0f64, |acc, &byte| acc * 256.0 + byte as f64)
}

/// Difficulty of a hash: the difficulty-1 target divided by the hash value.
///
/// An all-zero hash (or any non-finite result) reports zero.
pub fn hash_difficulty(hash: &[u8; 32]) -> f64 {
    let difficulty = MAX_TARGET_F64 / target_to_f64(hash);
    if difficulty.is_finite() {
        difficulty
    } else {
        0.0
    }
}

/// Calculate approximate difficulty from bits.
///
/// Difficulty = max_target / current_target, where max_target is the
/// difficulty-1 target (bits = 0x1d00ffff).
pub fn bits_to_difficulty(bits: u32) -> f64 {
    let current = target_to_f64(&bits_to_target(bits));
    if current == 0.0 {
        return f64::INFINITY;
    }
    MAX_TARGET_F64 / current
}

/// Format difficulty for display (e.g., "1.23T" for trillion).
pub fn format_difficulty(difficulty: f64) -> alloc::string::String {
    if difficulty >= 1e15 {
        alloc::format!("{:.2}P", difficulty / 1e15)
    } else if difficulty >= 1e12 {
        alloc::format!("{:.2}T", difficulty / 1e12)
    } else if difficulty >= 1e9 {
        alloc::format!("{:.2}G", difficulty / 1e9)
    } else if difficulty >= 1e6 {
        alloc::format!("{:.2}M", difficulty / 1e6)
    } else if difficulty >= 1e3 {
        alloc::format!("{:.2}K", difficulty / 1e3)
    } else {
        alloc::format!("{:.4}", difficulty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[rustfmt::skip]
    const DIFF1_TARGET: Target = [
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00,
    ];

    fn to_be(target: &Target) -> [u8; 32] {
        let mut be = *target;
        be.reverse();
        be
    }

    #[test]
    fn test_bits_to_target_diff1() {
        assert_eq!(bits_to_target(DIFF1_BITS), DIFF1_TARGET);

        // Displayed big-endian: 00000000ffff0000...
        let be = to_be(&bits_to_target(DIFF1_BITS));
        assert_eq!(&be[..6], &[0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF]);
        assert!(be[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bits_to_target_high_difficulty() {
        let target = bits_to_target(0x17034219);

        // Exponent 23: mantissa 0x034219 occupies bytes 20..23.
        assert_eq!(target[22], 0x03);
        assert_eq!(target[21], 0x42);
        assert_eq!(target[20], 0x19);
        for (i, byte) in target.iter().enumerate() {
            if !(20..23).contains(&i) {
                assert_eq!(*byte, 0, "byte {} should be 0", i);
            }
        }
    }

    #[test]
    fn test_bits_to_target_small_exponent() {
        let target = bits_to_target(0x02123456);
        assert_eq!(target[0], 0x34);
        assert_eq!(target[1], 0x12);
        assert!(target[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bits_to_target_negative_and_overflow() {
        assert_eq!(bits_to_target(0x1d800000), [0u8; 32]);

        // Exponent 34 pushes two mantissa bytes past the top; they are dropped.
        let target = bits_to_target(0x22123456);
        assert_eq!(target[31], 0x56);
        assert!(target[..31].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bits_roundtrip() {
        for &bits in &[0x1d00ffffu32, 0x17034219, 0x1b0404cb, 0x1a05db8b, 0x207fffff] {
            let target = bits_to_target(bits);
            assert_eq!(target_to_bits(&target), bits, "roundtrip failed for {:08x}", bits);
        }
    }

    #[test]
    fn test_scale_identity_diff1() {
        let diff1 = bits_to_target(DIFF1_BITS);
        assert_eq!(scale_target_by_difficulty(&diff1, 1.0), diff1);
    }

    #[test]
    fn test_scale_by_two_halves_target() {
        let scaled = scale_target_by_difficulty(&DIFF1_TARGET, 2.0);
        // 0xffff0000 >> 1 in the top limb.
        let mut expected = [0u8; 32];
        expected[24..32].copy_from_slice(&0x7FFF_8000u64.to_le_bytes());
        assert_eq!(scaled, expected);
    }

    #[test]
    fn test_scale_fractional_difficulty_grows_target() {
        let scaled = scale_target_by_difficulty(&DIFF1_TARGET, 0.001);
        assert!(meets_target(&DIFF1_TARGET, &scaled));
        assert!(!meets_target(&scaled, &DIFF1_TARGET));
        assert!((hash_difficulty(&scaled) - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_scale_clamps_overflow() {
        let mut big = [0u8; 32];
        big[24..32].copy_from_slice(&(u64::MAX / 2).to_le_bytes());
        let scaled = scale_target_by_difficulty(&big, 1e-6);
        assert_eq!(&scaled[24..32], &u64::MAX.to_le_bytes());
    }

    #[test]
    fn test_meets_target() {
        let target = bits_to_target(DIFF1_BITS);

        let mut good = [0u8; 32];
        good[27] = 0x12;
        good[26] = 0x34;
        assert!(meets_target(&good, &target));

        let mut bad = [0u8; 32];
        bad[28] = 0x01;
        assert!(!meets_target(&bad, &target));

        assert!(meets_target(&target, &target));
    }

    #[test]
    fn test_hash_difficulty() {
        assert!((hash_difficulty(&DIFF1_TARGET) - 1.0).abs() < 1e-9);
        assert_eq!(hash_difficulty(&[0u8; 32]), 0.0);

        let half = scale_target_by_difficulty(&DIFF1_TARGET, 2.0);
        assert!((hash_difficulty(&half) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_difficulty_calculation() {
        assert!((bits_to_difficulty(DIFF1_BITS) - 1.0).abs() < 0.01);
        assert_eq!(format_difficulty(1.5e12), "1.50T");
        assert!(!is_valid_difficulty(f64::NAN));
        assert!(!is_valid_difficulty(f64::INFINITY));
        assert!(!is_valid_difficulty(0.0));
        assert!(!is_valid_difficulty(-3.0));
        assert!(is_valid_difficulty(0.0014));
    }

    fn arb_normalized_bits() -> impl Strategy<Value = u32> {
        (3u32..=32, 0x01_0000u32..=0x7F_FFFF).prop_map(|(exp, mant)| (exp << 24) | mant)
    }

    proptest! {
        #[test]
        fn prop_bits_roundtrip(bits in arb_normalized_bits()) {
            prop_assert_eq!(target_to_bits(&bits_to_target(bits)), bits);
        }

        #[test]
        fn prop_meets_target_total_order(
            h1 in prop::array::uniform32(any::<u8>()),
            h2 in prop::array::uniform32(any::<u8>()),
            t in prop::array::uniform32(any::<u8>()),
        ) {
            let (lo, hi) = if to_be(&h1) <= to_be(&h2) { (h1, h2) } else { (h2, h1) };
            if meets_target(&hi, &t) {
                prop_assert!(meets_target(&lo, &t));
                prop_assert!(to_be(&hi) <= to_be(&t));
            }
            if !meets_target(&lo, &t) {
                prop_assert!(!meets_target(&hi, &t));
            }
        }

        #[test]
        fn prop_scale_identity(t in prop::array::uniform32(any::<u8>())) {
            prop_assert_eq!(scale_target_by_difficulty(&t, 1.0), t);
        }

        #[test]
        fn prop_scale_never_grows_for_difficulty_above_one(
            bits in arb_normalized_bits(),
            difficulty in 1.0f64..1e12,
        ) {
            let target = bits_to_target(bits);
            let scaled = scale_target_by_difficulty(&target, difficulty);
            prop_assert!(meets_target(&scaled, &target));
        }
    }
}
