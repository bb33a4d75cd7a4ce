//! Seedable source of uniform variates.
//!
//! Every stochastic decision in the scheduler goes through [`Variate`] so the
//! daemon can run on a real RNG while tests replay a fixed script and assert
//! exact transitions.

use rand::Rng;

/// Uniform draws used by the samplers and the digest planner.
pub trait Variate {
    /// Uniform draw in `[0, 1)`.
    fn unit(&mut self) -> f64;

    /// Uniform draw in `[lo, hi)`.
    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.unit()
    }

    /// `amount` distinct indices from `0..length`, in sampled order.
    /// `amount` is capped at `length`.
    fn sample_indices(&mut self, length: usize, amount: usize) -> Vec<usize>;
}

impl<R: Rng> Variate for R {
    fn unit(&mut self) -> f64 {
        self.random::<f64>()
    }

    fn sample_indices(&mut self, length: usize, amount: usize) -> Vec<usize> {
        rand::seq::index::sample(self, length, amount.min(length)).into_vec()
    }
}

/// Replays a fixed list of unit draws, cycling when exhausted.
///
/// Index sampling is a deterministic rotation driven by the same script:
/// each pick takes the next draw, scales it onto the remaining candidates,
/// and removes the chosen one. A script of all zeros therefore picks
/// `0, 1, 2, ...` in order.
#[derive(Debug, Clone)]
pub struct ScriptedVariate {
    draws: Vec<f64>,
    cursor: usize,
}

impl ScriptedVariate {
    pub fn new(draws: impl Into<Vec<f64>>) -> Self {
        let mut draws: Vec<f64> = draws.into();
        if draws.is_empty() {
            draws.push(0.5);
        }
        for d in &mut draws {
            *d = clamp(*d, 0.0, 1.0 - f64::EPSILON);
        }
        Self { draws, cursor: 0 }
    }

    /// Every draw sits at the midpoint, so every jittered value lands on its center.
    pub fn centered() -> Self {
        Self::new(vec![0.5])
    }

    /// Number of draws consumed so far.
    pub fn consumed(&self) -> usize {
        self.cursor
    }
}

impl Variate for ScriptedVariate {
    fn unit(&mut self) -> f64 {
        let value = self.draws[self.cursor % self.draws.len()];
        self.cursor += 1;
        value
    }

    fn sample_indices(&mut self, length: usize, amount: usize) -> Vec<usize> {
        let mut remaining: Vec<usize> = (0..length).collect();
        let mut picked = Vec::with_capacity(amount.min(length));
        while picked.len() < amount && !remaining.is_empty() {
            let slot = (self.unit() * remaining.len() as f64) as usize;
            picked.push(remaining.remove(slot.min(remaining.len() - 1)));
        }
        picked
    }
}

/// Clamp that maps NaN to `lo`, so a poisoned draw can never escape the bounds.
pub fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        return lo;
    }
    value.max(lo).min(hi)
}
