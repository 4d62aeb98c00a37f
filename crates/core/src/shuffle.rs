//! Deterministic seeded shuffle for per-student question order.
//!
//! Every student must see one fixed but individual order, reproducible across
//! sessions and platforms, so the generator is pinned bit-for-bit: a
//! polynomial fold of the seed string's UTF-16 code units feeds the mulberry32
//! mixing generator, which drives a standard Fisher-Yates pass. Do not change
//! the constants; cached orders and recorded answer indices depend on them.

/// Fold a seed string into a 32-bit state: `seed = seed*31 + code_unit`,
/// wrapping, over UTF-16 code units.
#[must_use]
pub fn fold_seed(seed: &str) -> u32 {
    seed.encode_utf16()
        .fold(0_u32, |acc, cu| acc.wrapping_mul(31).wrapping_add(u32::from(cu)))
}

/// The mulberry32 generator. Produces floats in `[0, 1)`.
#[derive(Debug, Clone)]
pub struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    #[must_use]
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Seed directly from a string via the polynomial fold.
    #[must_use]
    pub fn from_seed_str(seed: &str) -> Self {
        Self::new(fold_seed(seed))
    }

    /// Next float in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        f64::from(t ^ (t >> 14)) / 4_294_967_296.0
    }
}

/// Deterministic permutation of `items` driven by `seed`.
///
/// Repeated calls with the same inputs yield identical output, and the output
/// is a permutation of the input.
#[must_use]
pub fn shuffle<T>(seed: &str, items: Vec<T>) -> Vec<T> {
    let mut items = items;
    let mut rng = Mulberry32::from_seed_str(seed);
    for i in (1..items.len()).rev() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let j = (rng.next_f64() * (i + 1) as f64) as usize;
        items.swap(i, j);
    }
    items
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
