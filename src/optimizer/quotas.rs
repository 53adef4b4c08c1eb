// src/optimizer/quotas.rs
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::BTreeMap;

use super::bandit::Bandit;
use crate::reco::{Recommendation, SignalQuota, RECO_VERSION};

/// Split `slots` daily action slots across arms: each round samples every
/// arm afresh and gives one slot to the best draw. Arms are not updated
/// between rounds.
pub fn suggest_quotas<R: Rng + ?Sized>(
    rng: &mut R,
    bandit: &Bandit,
    slots: i64,
) -> BTreeMap<String, i64> {
    let mut out = BTreeMap::new();
    if bandit.is_empty() || slots <= 0 {
        return out;
    }
    for _ in 0..slots {
        let mut best: Option<(&str, f64)> = None;
        for (key, arm) in &bandit.arms {
            let s = arm.sample(rng);
            if best.map_or(true, |(_, score)| s > score) {
                best = Some((key.as_str(), s));
            }
        }
        let Some((key, _)) = best else { break };
        *out.entry(key.to_string()).or_insert(0) += 1;
    }
    out
}

/// Every arm appears, including those that won no slot. Ordered by quota,
/// then mean reward, then signal name.
pub fn build_recommendation(
    now: DateTime<Utc>,
    input_paper: &str,
    input_labels: &str,
    primary_window_sec: u64,
    slots: i64,
    quotas: &BTreeMap<String, i64>,
    bandit: &Bandit,
) -> Recommendation {
    let mut qs: Vec<SignalQuota> = bandit
        .arms
        .iter()
        .map(|(key, arm)| SignalQuota {
            signal: key.clone(),
            mean_reward: arm.mean(),
            n: arm.n,
            suggested_daily_quota: quotas.get(key).copied().unwrap_or(0),
        })
        .collect();
    qs.sort_by(|x, y| {
        y.suggested_daily_quota
            .cmp(&x.suggested_daily_quota)
            .then_with(|| y.mean_reward.total_cmp(&x.mean_reward))
            .then_with(|| x.signal.cmp(&y.signal))
    });

    Recommendation {
        version: RECO_VERSION.to_string(),
        generated_at: now,
        input_paper: input_paper.to_string(),
        input_labels: input_labels.to_string(),
        primary_window_sec,
        slots,
        quotas: qs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn skewed() -> Bandit {
        let mut b = Bandit::new();
        for i in 0..20 {
            b.update("sig_A", u8::from(i < 16));
            b.update("sig_B", u8::from(i < 4));
        }
        b
    }

    #[test]
    fn quotas_sum_to_slots_and_favor_the_better_arm() {
        let b = skewed();
        let q = suggest_quotas(&mut StdRng::seed_from_u64(7), &b, 30);
        assert_eq!(q.values().sum::<i64>(), 30);
        let a = q.get("sig_A").copied().unwrap_or(0);
        let bb = q.get("sig_B").copied().unwrap_or(0);
        assert!(a >= bb, "a={a} b={bb}");
    }

    #[test]
    fn quotas_are_deterministic_for_a_seed() {
        let b = skewed();
        let one = suggest_quotas(&mut StdRng::seed_from_u64(42), &b, 25);
        let two = suggest_quotas(&mut StdRng::seed_from_u64(42), &b, 25);
        assert_eq!(one, two);
    }

    #[test]
    fn empty_inputs_give_no_quotas() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(suggest_quotas(&mut rng, &Bandit::new(), 10).is_empty());
        assert!(suggest_quotas(&mut rng, &skewed(), 0).is_empty());
    }

    #[test]
    fn recommendation_lists_every_arm_in_order() {
        let mut b = skewed();
        b.ensure("sig_C");
        let mut quotas = BTreeMap::new();
        quotas.insert("sig_A".to_string(), 7);
        quotas.insert("sig_B".to_string(), 3);
        let now = Utc.with_ymd_and_hms(2026, 1, 29, 8, 0, 0).unwrap();
        let r = build_recommendation(now, "paper.jsonl", "", 30, 10, &quotas, &b);

        assert_eq!(r.version, RECO_VERSION);
        assert_eq!(r.primary_window_sec, 30);
        let order: Vec<_> = r.quotas.iter().map(|q| q.signal.as_str()).collect();
        assert_eq!(order, vec!["sig_A", "sig_B", "sig_C"]);
        assert_eq!(r.quotas[2].suggested_daily_quota, 0);
        assert_eq!(r.quotas[2].mean_reward, 0.5);
        assert_eq!(r.quotas[0].n, 20);
    }

    #[test]
    fn equal_quotas_fall_back_to_mean_then_name() {
        let mut b = Bandit::new();
        b.ensure("zeta");
        b.ensure("alpha");
        b.update("mid", 1);
        let r = build_recommendation(Utc::now(), "-", "", 0, 0, &BTreeMap::new(), &b);
        let order: Vec<_> = r.quotas.iter().map(|q| q.signal.as_str()).collect();
        assert_eq!(order, vec!["mid", "alpha", "zeta"]);
    }
}
