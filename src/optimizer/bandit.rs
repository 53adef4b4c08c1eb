// src/optimizer/bandit.rs
//! Beta-Bernoulli arms and Thompson sampling.

use rand::Rng;
use rand_distr::StandardNormal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::RadarError;

/// Posterior over a {0,1} reward: Beta(a, b), both starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BetaBernoulliArm {
    pub key: String,
    pub a: f64,
    pub b: f64,
    pub n: u64,
}

impl BetaBernoulliArm {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            a: 1.0,
            b: 1.0,
            n: 0,
        }
    }

    pub fn update(&mut self, reward: u8) {
        if reward != 0 {
            self.a += 1.0;
        } else {
            self.b += 1.0;
        }
        self.n += 1;
    }

    pub fn mean(&self) -> f64 {
        let den = self.a + self.b;
        if den <= 0.0 {
            return 0.5;
        }
        self.a / den
    }

    /// One draw from Beta(a, b) as X / (X + Y) with X ~ Gamma(a), Y ~ Gamma(b).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let x = gamma_sample(rng, self.a);
        let y = gamma_sample(rng, self.b);
        if x + y == 0.0 {
            return 0.5;
        }
        x / (x + y)
    }
}

/// Gamma(k, 1) by Marsaglia and Tsang. Shapes below 1 use
/// Gamma(k) = Gamma(k + 1) * U^(1/k).
pub fn gamma_sample<R: Rng + ?Sized>(rng: &mut R, k: f64) -> f64 {
    if k.is_nan() || k <= 0.0 {
        return 0.0;
    }
    if k < 1.0 {
        let u: f64 = rng.random();
        return gamma_sample(rng, k + 1.0) * u.powf(1.0 / k);
    }

    let d = k - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x: f64 = rng.sample(StandardNormal);
        let v = 1.0 + c * x;
        if v <= 0.0 {
            continue;
        }
        let v = v * v * v;
        let u: f64 = rng.random();
        if u < 1.0 - 0.0331 * (x * x) * (x * x) {
            return d * v;
        }
        if u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

/// One row of a suggested allocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub key: String,
    pub score: f64,
    pub mean: f64,
    pub n: u64,
}

/// Arms keyed by alert source. Ordered so that sampling consumes the RNG
/// stream in the same order on every run.
#[derive(Debug, Clone, Default)]
pub struct Bandit {
    pub arms: BTreeMap<String, BetaBernoulliArm>,
}

fn arm_key(key: &str) -> String {
    let key = key.trim();
    if key.is_empty() {
        "unknown".to_string()
    } else {
        key.to_string()
    }
}

impl Bandit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an arm without observing anything.
    pub fn ensure(&mut self, key: &str) -> &mut BetaBernoulliArm {
        let key = arm_key(key);
        self.arms
            .entry(key.clone())
            .or_insert_with(|| BetaBernoulliArm::new(key))
    }

    pub fn update(&mut self, key: &str, reward: u8) {
        self.ensure(key).update(reward);
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Sample every arm once and keep the best `slots`, ordered by sampled
    /// score then posterior mean.
    pub fn suggest_allocation<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        slots: i64,
    ) -> Result<Vec<Allocation>, RadarError> {
        if slots <= 0 {
            return Err(RadarError::InvalidSlots(slots));
        }
        let mut out: Vec<Allocation> = self
            .arms
            .values()
            .map(|arm| Allocation {
                key: arm.key.clone(),
                score: arm.sample(rng),
                mean: arm.mean(),
                n: arm.n,
            })
            .collect();
        out.sort_by(|x, y| {
            y.score
                .total_cmp(&x.score)
                .then_with(|| y.mean.total_cmp(&x.mean))
        });
        out.truncate(slots as usize);
        Ok(out)
    }
}
