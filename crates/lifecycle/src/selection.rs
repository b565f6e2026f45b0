//! Fair winner selection for prize draws.

use rand::Rng;

/// Selects up to `number_available` winners uniformly at random, without
/// replacement.
///
/// Runs a Fisher–Yates shuffle over `candidates` and keeps the first
/// `number_available` entries, so every candidate has the same probability of
/// being chosen. When there are fewer candidates than slots, every candidate
/// wins exactly once.
pub fn select_winners<T, R>(rng: &mut R, mut candidates: Vec<T>, number_available: usize) -> Vec<T>
where
    R: Rng + ?Sized,
{
    for i in (1..candidates.len()).rev() {
        let j = rng.gen_range(0..=i);
        candidates.swap(i, j);
    }
    candidates.truncate(number_available);
    candidates
}
