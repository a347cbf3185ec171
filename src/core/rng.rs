//! Seeded randomness
//!
//! Reducers never see an RNG object. They get the session's string seed in
//! [`Ctx`](crate::game::Ctx) and derive draws from it, so a replay with the
//! same seed deals the same cards.
//!
//! Draws go through Xorshift128+ seeded by SplitMix64. The seed string is
//! hashed with SHA-256 under a fixed domain tag first.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Domain tag mixed into every seed string before hashing.
const SEED_DOMAIN: &[u8] = b"TABLETOP_SEED_V1";

/// Xorshift128+ generator.
///
/// ```
/// use tabletop::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::from_seed_str("table-7");
/// let mut b = DeterministicRng::from_seed_str("table-7");
/// assert_eq!(a.int_between(1, 6), b.int_between(1, 6));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    s: [u64; 2],
}

impl DeterministicRng {
    /// Generator for a raw 64-bit seed.
    pub fn new(seed: u64) -> Self {
        let mut mix = seed;
        let s = [splitmix64(&mut mix), splitmix64(&mut mix)];
        // all-zero state would emit zeros forever
        if s == [0, 0] {
            return Self { s: [1, 1] };
        }
        Self { s }
    }

    /// Generator for a session seed string.
    pub fn from_seed_str(seed: &str) -> Self {
        Self::new(derive_seed(seed))
    }

    /// Next raw output.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let [a, b] = self.s;
        let out = a.wrapping_add(b);
        let x = b ^ a;
        self.s = [a.rotate_left(24) ^ x ^ (x << 16), x.rotate_left(37)];
        out
    }

    /// Uniform-ish integer in `[lo, hi]`. Returns `lo` when the range is empty.
    pub fn int_between(&mut self, lo: i64, hi: i64) -> i64 {
        if hi <= lo {
            return lo;
        }
        let span = hi.abs_diff(lo) + 1;
        lo.wrapping_add((self.next_u64() % span) as i64)
    }
}

fn splitmix64(x: &mut u64) -> u64 {
    *x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// 64-bit generator seed for a session seed string.
pub fn derive_seed(seed: &str) -> u64 {
    let digest = Sha256::new()
        .chain_update(SEED_DOMAIN)
        .chain_update(seed.as_bytes())
        .finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// One draw in `[min, max]` keyed by `seed`.
///
/// Pure: the same triple always gives the same number.
pub fn seeded_int_between(min: i64, max: i64, seed: &str) -> i64 {
    DeterministicRng::from_seed_str(seed).int_between(min, max)
}
