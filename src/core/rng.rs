//! Deterministic Random Number Generator
//!
//! Uses the xoroshiro64** algorithm: two 32-bit state words, fast integer
//! update, identical sequence on every platform for a given seed. The two
//! words travel verbatim inside snapshots so that a restored participant
//! resumes the exact same stream.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::fixed::{Fixed, FIXED_SCALE};

/// Deterministic PRNG with two 32-bit words of state.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG produces the exact same sequence of
/// values on any platform (x86, ARM, WASM).
///
/// # Contract
///
/// Within a tick, draw from this RNG only in code paths that run
/// identically on every participant (systems and lifecycle callbacks).
/// Reaching for a host-provided random source instead produces desync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    s0: u32,
    s1: u32,
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the state words, ensuring good
    /// distribution even from weak seeds. All-zero state is remapped
    /// (xoroshiro never leaves it).
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let s0 = splitmix64(&mut s) as u32;
        let s1 = splitmix64(&mut s) as u32;
        if s0 == 0 && s1 == 0 {
            Self { s0: 1, s1: 1 }
        } else {
            Self { s0, s1 }
        }
    }

    /// Generate the next 32-bit random value (xoroshiro64** step).
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        let s0 = self.s0;
        let mut s1 = self.s1;
        let result = s0.wrapping_mul(0x9E37_79BB).rotate_left(5).wrapping_mul(5);

        s1 ^= s0;
        self.s0 = s0.rotate_left(26) ^ s1 ^ (s1 << 9);
        self.s1 = s1.rotate_left(13);

        result
    }

    /// Random Q16.16 fraction in [0, 1), built integer-only from the
    /// high 16 bits of the next draw.
    #[inline]
    pub fn d_random(&mut self) -> Fixed {
        (self.next_u32() >> FIXED_SCALE) as Fixed
    }

    /// Random Q16.16 value in [min, max).
    #[inline]
    pub fn d_random_range(&mut self, min: Fixed, max: Fixed) -> Fixed {
        if min >= max {
            return min;
        }
        let range = max.wrapping_sub(min) as i64;
        let frac = self.d_random() as i64; // [0, 65536)
        min.wrapping_add(((range * frac) >> FIXED_SCALE) as Fixed)
    }

    /// Random integer in [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // 64-bit multiply-shift keeps the draw uniform enough without
        // rejection loops of data-dependent length
        ((self.next_u32() as u64 * max as u64) >> 32) as u32
    }

    /// Random integer in [min, max].
    #[inline]
    pub fn next_int_range(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        let range = (max - min + 1) as u32;
        min + self.next_int(range) as i32
    }

    /// Random boolean with the given probability.
    ///
    /// probability is in Q16.16 where FIXED_ONE = 100%.
    #[inline]
    pub fn next_bool(&mut self, probability: Fixed) -> bool {
        self.d_random() < probability
    }

    /// Shuffle a slice in place using Fisher-Yates.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        for i in (1..len).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            Some(&slice[idx])
        }
    }

    /// Expose the two state words verbatim (for snapshots).
    pub fn save_state(&self) -> (u32, u32) {
        (self.s0, self.s1)
    }

    /// Reinstall previously saved state words verbatim.
    pub fn load_state(&mut self, state: (u32, u32)) {
        self.s0 = state.0;
        self.s1 = state.1;
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Derive a room seed from the room id and the founding client ids.
///
/// Every participant derives the same seed independently; the client-id
/// list is sorted internally so argument order cannot matter.
pub fn derive_room_seed(room_id: &str, client_ids: &[String]) -> u64 {
    let mut sorted: Vec<&String> = client_ids.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    hasher.update(b"QUORUM_ENGINE_SEED_V1");
    hasher.update(room_id.as_bytes());
    for cid in sorted {
        hasher.update([0u8]); // separator so ids cannot merge
        hasher.update(cid.as_bytes());
    }
    let hash = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(bytes)
}

// =============================================================================
// TESTS
// =============================================================================
