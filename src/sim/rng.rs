//! Seeded pseudo-random stream
//!
//! Every random decision in a session is drawn from one `PseudoRandomStream`.
//! The generator is PCG32 keyed by the first 16 bytes of the BLAKE3 digest of
//! the seed string, so any oracle value (a uint256 rendered in decimal, a test
//! string, a small integer) maps to a fixed, replayable sequence.

use std::fmt;

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

/// 2^32, maps a u32 draw into [0, 1)
const U32_RANGE: f64 = 4_294_967_296.0;

/// Oracle-delivered seed value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Seed(String);

impl Seed {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for Seed {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for Seed {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reproducible stream of uniform draws
///
/// Owned by a single session; only the simulation loop draws from it.
#[derive(Debug, Clone)]
pub struct PseudoRandomStream {
    rng: Pcg32,
    draws: u64,
}

impl PseudoRandomStream {
    pub fn new(seed: &Seed) -> Self {
        Self {
            rng: Pcg32::from_seed(derive_key(seed.as_str())),
            draws: 0,
        }
    }

    /// Reset to the start of the sequence for `seed`
    pub fn init(&mut self, seed: &Seed) {
        *self = Self::new(seed);
    }

    /// Uniform value in [0, 1)
    pub fn next_float(&mut self) -> f64 {
        self.draws += 1;
        f64::from(self.rng.next_u32()) / U32_RANGE
    }

    /// Integer in [min, max). Always consumes exactly one draw, even for an
    /// empty range (which yields `min`).
    pub fn next_int(&mut self, min: i32, max: i32) -> i32 {
        let f = self.next_float();
        if max <= min {
            return min;
        }
        let span = i64::from(max) - i64::from(min);
        let offset = (f * span as f64).floor() as i64;
        (i64::from(min) + offset.min(span - 1)) as i32
    }

    /// Uniformly pick one element. Consumes one draw even when `items` is empty.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        let f = self.next_float();
        if items.is_empty() {
            return None;
        }
        let index = ((f * items.len() as f64).floor() as usize).min(items.len() - 1);
        items.get(index)
    }

    /// Number of draws taken since the last `init`
    pub fn draws(&self) -> u64 {
        self.draws
    }
}

fn derive_key(seed: &str) -> [u8; 16] {
    let digest = blake3::hash(seed.as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest.as_bytes()[..16]);
    key
}
