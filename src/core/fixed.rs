//! Q16.16 Fixed-Point Arithmetic
//!
//! Deterministic math for the lockstep simulation. All operations use
//! integer arithmetic only - no floats anywhere a tick can reach.
//!
//! ## Format: Q16.16
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Bit Layout: Q16.16 (32-bit signed integer)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  [S][IIIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]                    │
//! │   │  └──── 16 bits ───┘└──── 16 bits ───┘                   │
//! │   └─ Sign bit                                               │
//! │                                                             │
//! │  Range: -32768.0 to +32767.99998 (approx)                   │
//! │  Precision: 1/65536 ≈ 0.000015 units                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The trigonometric functions are table-driven: the tables are built at
//! compile time from integer-only Horner series, so every participant
//! carries bit-identical tables regardless of its native float unit.

/// Q16.16 fixed-point number stored as i32.
/// 16 bits integer, 16 bits fractional.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE;

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1;

/// Maximum positive value
pub const FIXED_MAX: Fixed = i32::MAX;

/// Minimum negative value
pub const FIXED_MIN: Fixed = i32::MIN;

/// π in Q16.16
pub const FIXED_PI: Fixed = 205887;

/// π/2 in Q16.16
pub const FIXED_HALF_PI: Fixed = 102944;

/// 2π in Q16.16
pub const FIXED_TAU: Fixed = 411775;

// =============================================================================
// CORE OPERATIONS (All deterministic, wrapping semantics)
// =============================================================================

/// Convert a compile-time float to fixed-point, rounding to nearest.
///
/// # Warning
/// Only use at compile-time or initialization. NEVER in tick code.
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    let scaled = f * (FIXED_ONE as f64);
    if scaled >= 0.0 {
        (scaled + 0.5) as Fixed
    } else {
        (scaled - 0.5) as Fixed
    }
}

/// Convert fixed-point to float for display/rendering.
///
/// # Warning
/// Only use for visual output and logging. NEVER use the result in
/// simulation logic. Calls inside a tick trip the debug guard.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    super::guard::flag_nondeterministic("fixed-to-float conversion");
    f as f32 / FIXED_ONE as f32
}

/// Multiply two fixed-point numbers.
///
/// Uses an i64 intermediate to prevent overflow, then truncates.
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Divide two fixed-point numbers.
///
/// Pre-shifts the numerator to maintain precision.
/// Returns 0 on divide-by-zero (deterministic, no panic).
#[inline]
pub fn fixed_div(a: Fixed, b: Fixed) -> Fixed {
    if b == 0 {
        return 0;
    }
    let wide = (a as i64) << FIXED_SCALE;
    (wide / b as i64) as Fixed
}

/// Square root, exact on every platform.
///
/// Computes the integer square root of the operand pre-shifted by 16
/// (`floor(sqrt(x << 16))`), which is the Q16.16 root. Integer Newton
/// iteration converges to the exact floor, so the result bit pattern is
/// identical on every host regardless of its float hardware.
///
/// Returns 0 for non-positive inputs.
pub fn fixed_sqrt(x: Fixed) -> Fixed {
    if x <= 0 {
        return 0;
    }
    let n = (x as u64) << FIXED_SCALE;
    let mut x0 = n;
    let mut x1 = (x0 + n / x0) >> 1;
    while x1 < x0 {
        x0 = x1;
        x1 = (x0 + n / x0) >> 1;
    }
    x0 as Fixed
}

/// Absolute value of a fixed-point number.
#[inline]
pub fn fixed_abs(x: Fixed) -> Fixed {
    if x < 0 {
        x.wrapping_neg()
    } else {
        x
    }
}

/// Minimum of two fixed-point numbers.
#[inline]
pub fn fixed_min(a: Fixed, b: Fixed) -> Fixed {
    if a < b {
        a
    } else {
        b
    }
}

/// Maximum of two fixed-point numbers.
#[inline]
pub fn fixed_max(a: Fixed, b: Fixed) -> Fixed {
    if a > b {
        a
    } else {
        b
    }
}

/// Clamp a fixed-point number to a range.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    fixed_max(min, fixed_min(max, value))
}

/// Linear interpolation: a + (b - a) * t
/// where t is in fixed-point (0.0 = 0, 1.0 = FIXED_ONE)
#[inline]
pub fn fixed_lerp(a: Fixed, b: Fixed, t: Fixed) -> Fixed {
    let diff = b.wrapping_sub(a);
    a.wrapping_add(fixed_mul(diff, t))
}

// =============================================================================
// TRIGONOMETRY (compile-time integer tables + integer interpolation)
// =============================================================================

/// Sine table resolution: 1024 entries per full turn.
const SIN_TABLE_BITS: u32 = 10;

/// Number of sine table entries (power of two, indexed with a mask).
pub const SIN_TABLE_SIZE: usize = 1 << SIN_TABLE_BITS;

/// Arctangent table: atan(i/256) for i in 0..=256.
pub const ATAN_TABLE_SIZE: usize = 257;

/// 1.0 in the Q30 working precision the table builders use.
const Q30_ONE: i64 = 1 << 30;

/// π/2 in Q30.
const HALF_PI_Q30: i64 = 1686629713;

/// π/4 in Q30.
const QUARTER_PI_Q30: i64 = 843314857;

/// 1/(2π) in Q32, for radians → table-phase conversion.
const INV_TAU_Q32: i64 = 683565276;

/// First-quadrant sine via integer Horner series, Q16.16 out.
///
/// `r` in 0..=256 spans [0, π/2]. Truncated after the x¹¹ term; the
/// residual is below one Q16.16 ulp across the whole quadrant.
const fn sin_quarter(r: i64) -> i32 {
    let x = (r * HALF_PI_Q30) >> 8;
    let x2 = (x * x) >> 30;
    // sin x = x·(1 - x²/6·(1 - x²/20·(1 - x²/42·(1 - x²/72·(1 - x²/110)))))
    let mut t = Q30_ONE - x2 / 110;
    t = Q30_ONE - (((x2 / 72) * t) >> 30);
    t = Q30_ONE - (((x2 / 42) * t) >> 30);
    t = Q30_ONE - (((x2 / 20) * t) >> 30);
    t = Q30_ONE - (((x2 / 6) * t) >> 30);
    let s = (x * t) >> 30;
    ((s + (1 << 13)) >> 14) as i32
}

/// Full-circle sine table in Q16.16, built at compile time.
static SIN_TABLE: [Fixed; SIN_TABLE_SIZE] = {
    let mut table = [0i32; SIN_TABLE_SIZE];
    let mut i = 0usize;
    while i < SIN_TABLE_SIZE {
        let quadrant = i >> 8;
        let r = (i & 255) as i64;
        table[i] = match quadrant {
            0 => sin_quarter(r),
            1 => sin_quarter(256 - r),
            2 => -sin_quarter(r),
            _ => -sin_quarter(256 - r),
        };
        i += 1;
    }
    table
};

/// Arctangent of a Q30 ratio via integer Horner series, Q30 out.
///
/// Accurate for |u| ≤ 0.5; larger ratios are folded through the
/// (t-1)/(t+1) identity before reaching this.
const fn atan_series_q30(u: i64) -> i64 {
    let u2 = (u * u) >> 30;
    // atan u = u·(1 - u²(1/3 - u²(1/5 - u²(1/7 - u²(1/9 - u²(1/11 - u²(1/13 - u²/15)))))))
    let mut t = Q30_ONE / 15;
    t = Q30_ONE / 13 - ((u2 * t) >> 30);
    t = Q30_ONE / 11 - ((u2 * t) >> 30);
    t = Q30_ONE / 9 - ((u2 * t) >> 30);
    t = Q30_ONE / 7 - ((u2 * t) >> 30);
    t = Q30_ONE / 5 - ((u2 * t) >> 30);
    t = Q30_ONE / 3 - ((u2 * t) >> 30);
    let p = Q30_ONE - ((u2 * t) >> 30);
    (u * p) >> 30
}

/// atan(i/256) in Q16.16 radians, built at compile time.
static ATAN_TABLE: [Fixed; ATAN_TABLE_SIZE] = {
    let mut table = [0i32; ATAN_TABLE_SIZE];
    let mut i = 0usize;
    while i < ATAN_TABLE_SIZE {
        let t = (i as i64) << 22; // i/256 in Q30
        let a = if i <= 128 {
            atan_series_q30(t)
        } else {
            // atan t = π/4 + atan((t-1)/(t+1)), |(t-1)/(t+1)| ≤ 1/3
            let u = ((t - Q30_ONE) << 30) / (t + Q30_ONE);
            QUARTER_PI_Q30 + atan_series_q30(u)
        };
        table[i] = ((a + (1 << 13)) >> 14) as i32;
        i += 1;
    }
    table
};

/// Sine of an angle in Q16.16 radians.
///
/// Table lookup with integer linear interpolation; wraps over the full
/// circle, so any angle magnitude is valid.
pub fn fixed_sin(angle: Fixed) -> Fixed {
    // radians → fractional turn in 16 bits (two's complement wrap
    // handles negative angles)
    let turns = ((angle as i64) * INV_TAU_Q32) >> 32;
    let phase = (turns & 0xFFFF) as u32;
    let idx = (phase >> 6) as usize;
    let frac = (phase & 0x3F) as i64;
    let a = SIN_TABLE[idx] as i64;
    let b = SIN_TABLE[(idx + 1) & (SIN_TABLE_SIZE - 1)] as i64;
    (a + (((b - a) * frac) >> 6)) as Fixed
}

/// Cosine of an angle in Q16.16 radians.
#[inline]
pub fn fixed_cos(angle: Fixed) -> Fixed {
    fixed_sin(angle.wrapping_add(FIXED_HALF_PI))
}

/// Four-quadrant arctangent in Q16.16 radians, result in (-π, π].
///
/// The ratio of the smaller to the larger magnitude indexes the table;
/// octant fixups recover the full circle. `fixed_atan2(0, 0)` returns 0
/// (deterministic, no panic).
pub fn fixed_atan2(y: Fixed, x: Fixed) -> Fixed {
    if x == 0 && y == 0 {
        return 0;
    }
    let ax = fixed_abs(x) as i64;
    let ay = fixed_abs(y) as i64;
    let (num, den) = if ay <= ax { (ay, ax) } else { (ax, ay) };

    // ratio in 0..=256 table steps with 6 fractional bits
    let scaled = ((num << 14) / den) as usize;
    let idx = scaled >> 6;
    let frac = (scaled & 0x3F) as i64;
    let base = if idx >= ATAN_TABLE_SIZE - 1 {
        ATAN_TABLE[ATAN_TABLE_SIZE - 1]
    } else {
        let a = ATAN_TABLE[idx] as i64;
        let b = ATAN_TABLE[idx + 1] as i64;
        (a + (((b - a) * frac) >> 6)) as Fixed
    };

    let mut angle = if ay > ax {
        FIXED_HALF_PI.wrapping_sub(base)
    } else {
        base
    };
    if x < 0 {
        angle = FIXED_PI.wrapping_sub(angle);
    }
    if y < 0 {
        angle = angle.wrapping_neg();
    }
    angle
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_constants() {
        assert_eq!(FIXED_ONE, 65536);
        assert_eq!(FIXED_HALF, 32768);
        assert_eq!(FIXED_SCALE, 16);
        assert_eq!(FIXED_PI, to_fixed(std::f64::consts::PI));
        assert_eq!(FIXED_TAU, to_fixed(std::f64::consts::TAU));
        assert_eq!(FIXED_HALF_PI, to_fixed(std::f64::consts::FRAC_PI_2));
    }

    #[test]
    fn test_to_fixed_rounds() {
        assert_eq!(to_fixed(1.0), FIXED_ONE);
        assert_eq!(to_fixed(0.5), FIXED_HALF);
        assert_eq!(to_fixed(-1.0), -FIXED_ONE);
        assert_eq!(to_fixed(2.5), 2 * FIXED_ONE + FIXED_HALF);
        // rounding, not truncation: 0.3 * 65536 = 19660.8
        assert_eq!(to_fixed(0.3), 19661);
        assert_eq!(to_fixed(-0.3), -19661);
    }

    #[test]
    fn test_fixed_mul() {
        assert_eq!(fixed_mul(to_fixed(2.0), to_fixed(3.0)), to_fixed(6.0));
        assert_eq!(fixed_mul(FIXED_HALF, FIXED_HALF), to_fixed(0.25));
        assert_eq!(fixed_mul(to_fixed(-2.0), to_fixed(3.0)), to_fixed(-6.0));
    }

    #[test]
    fn test_fixed_div() {
        assert_eq!(fixed_div(to_fixed(6.0), to_fixed(2.0)), to_fixed(3.0));
        assert_eq!(fixed_div(FIXED_ONE, to_fixed(4.0)), to_fixed(0.25));
        // Divide by zero returns 0
        assert_eq!(fixed_div(FIXED_ONE, 0), 0);
    }

    #[test]
    fn test_fixed_sqrt_exact_bit_patterns() {
        // floor(sqrt(q << 16)) — bit-exact on every platform
        assert_eq!(fixed_sqrt(to_fixed(4.0)), to_fixed(2.0));
        assert_eq!(fixed_sqrt(FIXED_ONE), FIXED_ONE);
        // sqrt(2.0) = floor(sqrt(2^33)) = 92681
        assert_eq!(fixed_sqrt(to_fixed(2.0)), 92681);
        assert_eq!(fixed_sqrt(0), 0);
        assert_eq!(fixed_sqrt(-FIXED_ONE), 0);
        assert_eq!(fixed_sqrt(1), 256);
    }

    #[test]
    fn test_clamp_lerp() {
        assert_eq!(fixed_clamp(to_fixed(5.0), 0, FIXED_ONE), FIXED_ONE);
        assert_eq!(fixed_clamp(-FIXED_ONE, 0, FIXED_ONE), 0);
        assert_eq!(fixed_lerp(0, to_fixed(10.0), FIXED_HALF), to_fixed(5.0));
        assert_eq!(fixed_lerp(to_fixed(2.0), to_fixed(2.0), FIXED_HALF), to_fixed(2.0));
    }

    #[test]
    fn test_sin_cardinal_points() {
        let tolerance = 8; // ~0.0001 in Q16.16
        assert_eq!(fixed_sin(0), 0);
        assert!((fixed_sin(FIXED_HALF_PI) - FIXED_ONE).abs() <= tolerance);
        assert!(fixed_sin(FIXED_PI).abs() <= tolerance);
        assert!((fixed_sin(-FIXED_HALF_PI) + FIXED_ONE).abs() <= tolerance);
        assert!((fixed_cos(0) - FIXED_ONE).abs() <= tolerance);
        assert!(fixed_cos(FIXED_HALF_PI).abs() <= tolerance);
        assert!((fixed_cos(FIXED_PI) + FIXED_ONE).abs() <= tolerance);
    }

    #[test]
    fn test_sin_against_float_reference() {
        // Float reference is display-only; the table itself is integer-built.
        for i in -64i32..=64 {
            let angle = i * (FIXED_TAU / 64);
            let expected = to_fixed((angle as f64 / FIXED_ONE as f64).sin());
            let got = fixed_sin(angle);
            assert!(
                (got - expected).abs() < 64,
                "sin step {}: got {} expected {}",
                i,
                got,
                expected
            );
        }
    }

    #[test]
    fn test_sin_determinism() {
        for angle in [-FIXED_TAU, -12345, 0, 777, FIXED_PI, 10i32.wrapping_mul(FIXED_TAU)] {
            assert_eq!(fixed_sin(angle), fixed_sin(angle));
        }
    }

    #[test]
    fn test_atan2_quadrants() {
        let tolerance = 16;
        assert_eq!(fixed_atan2(0, 0), 0);
        assert_eq!(fixed_atan2(0, FIXED_ONE), 0);
        assert!((fixed_atan2(FIXED_ONE, 0) - FIXED_HALF_PI).abs() <= tolerance);
        assert!((fixed_atan2(-FIXED_ONE, 0) + FIXED_HALF_PI).abs() <= tolerance);
        assert!((fixed_atan2(0, -FIXED_ONE) - FIXED_PI).abs() <= tolerance);
        // atan2(1, 1) = π/4
        let quarter_pi = FIXED_PI / 4;
        assert!((fixed_atan2(FIXED_ONE, FIXED_ONE) - quarter_pi).abs() <= tolerance);
        assert!((fixed_atan2(-FIXED_ONE, FIXED_ONE) + quarter_pi).abs() <= tolerance);
    }

    #[test]
    fn test_atan2_matches_sin_cos_roundtrip() {
        // angle → (cos, sin) → atan2 should land near the original angle
        for i in -31i32..=31 {
            let angle = i * (FIXED_PI / 32);
            let x = fixed_cos(angle);
            let y = fixed_sin(angle);
            let back = fixed_atan2(y, x);
            let mut diff = back.wrapping_sub(angle);
            if diff > FIXED_PI {
                diff -= FIXED_TAU;
            }
            if diff < -FIXED_PI {
                diff += FIXED_TAU;
            }
            assert!(diff.abs() < 128, "angle {} round-tripped to {}", angle, back);
        }
    }
}
