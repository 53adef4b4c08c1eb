// src/engine/mod.rs
//! The control loop: evaluate generators, admit through the pipeline,
//! deliver. One tick runs to completion before the next one starts.

pub mod policy;
pub mod reco_loader;
pub mod state;

pub use policy::{run_pipeline, PipelineStats};
pub use reco_loader::RecoOverrides;
pub use state::EngineState;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{self, MissedTickBehavior};

use crate::config::RadarConfig;
use crate::event::Event;
use crate::generators::{build_generators, AlertGenerator};
use crate::marketdata::{providers::build_fusion, Fusion};
use crate::notify::{build_notifiers, deliver, Notifier};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub trade_date: String,
    pub generators_run: usize,
    pub generator_errors: usize,
    pub stats: PipelineStats,
    pub notifier_failures: usize,
}

pub struct Engine {
    config: RadarConfig,
    fusion: Option<Arc<dyn Fusion>>,
    generators: Vec<Box<dyn AlertGenerator>>,
    notifiers: Vec<Box<dyn Notifier>>,
    state: EngineState,
    /// Last evaluation time, by generator index.
    last_eval: HashMap<usize, DateTime<Utc>>,
    reco: RecoOverrides,
}

impl Engine {
    pub fn new(
        config: RadarConfig,
        fusion: Option<Arc<dyn Fusion>>,
        generators: Vec<Box<dyn AlertGenerator>>,
        notifiers: Vec<Box<dyn Notifier>>,
    ) -> Self {
        let mut reco = RecoOverrides::new(config.engine.reco_path.as_deref());
        reco.refresh();
        Self {
            config,
            fusion,
            generators,
            notifiers,
            state: EngineState::default(),
            last_eval: HashMap::new(),
            reco,
        }
    }

    /// Build every collaborator from config. Configuration errors surface
    /// here and nowhere else.
    pub fn from_config(config: RadarConfig) -> Result<Self> {
        config.validate()?;
        let fusion = build_fusion(&config.marketdata)
            .context("init marketdata")?
            .map(|f| f as Arc<dyn Fusion>);
        let generators =
            build_generators(&config.generators, config.engine.offset()).context("init generators")?;
        let notifiers = build_notifiers(&config.notifiers).context("init notifiers")?;
        tracing::info!(
            generators = generators.len(),
            notifiers = notifiers.len(),
            marketdata = fusion.is_some(),
            "engine ready"
        );
        Ok(Self::new(config, fusion, generators, notifiers))
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn reco(&self) -> &RecoOverrides {
        &self.reco
    }

    /// One full pass. Generator and notifier failures are logged and counted,
    /// never returned.
    pub async fn run_once(&mut self, now: DateTime<Utc>) -> TickReport {
        let trade_date = self.config.engine.trade_date(now);
        let mut report = TickReport {
            trade_date: trade_date.clone(),
            ..TickReport::default()
        };

        let mut candidates: Vec<Event> = Vec::new();
        let fusion = self.fusion.as_deref();
        for (i, g) in self.generators.iter_mut().enumerate() {
            let min_interval = ChronoDuration::from_std(g.min_interval()).unwrap_or(ChronoDuration::zero());
            if min_interval > ChronoDuration::zero() {
                if let Some(last) = self.last_eval.get(&i) {
                    if now - *last < min_interval {
                        tracing::debug!(generator = g.name(), "skipped: min_interval");
                        continue;
                    }
                }
            }
            self.last_eval.insert(i, now);
            report.generators_run += 1;

            match g.evaluate(&trade_date, fusion, now).await {
                Ok(mut evs) => candidates.append(&mut evs),
                Err(e) => {
                    report.generator_errors += 1;
                    counter!("radar_generator_errors_total").increment(1);
                    tracing::warn!(generator = g.name(), error = %format!("{e:#}"), "generator error");
                }
            }
        }

        self.reco.refresh();
        let per_signal = self
            .reco
            .effective(&self.config.policy.action_max_events_per_signal_per_day);
        let (admitted, stats) = run_pipeline(
            &mut self.state,
            &self.config.policy,
            per_signal,
            candidates,
            &trade_date,
            now,
        );
        report.stats = stats;
        report.notifier_failures = deliver(&self.notifiers, &admitted).await;

        gauge!("radar_engine_last_tick_ts").set(now.timestamp() as f64);
        report
    }

    /// Tick every `interval_seconds` until ctrl-c.
    pub async fn run(&mut self) -> Result<()> {
        let every = std::time::Duration::from_secs(self.config.engine.interval_seconds.max(1));
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = every.as_secs(), "engine loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let r = self.run_once(Utc::now()).await;
                    tracing::debug!(
                        trade_date = %r.trade_date,
                        admitted = r.stats.admitted,
                        generator_errors = r.generator_errors,
                        notifier_failures = r.notifier_failures,
                        "tick done"
                    );
                }
                res = tokio::signal::ctrl_c() => {
                    res.context("listen for ctrl-c")?;
                    tracing::info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradeDateMode;
    use crate::event::Tier;
    use crate::reco::{self, Recommendation, SignalQuota, RECO_VERSION};
    use anyhow::anyhow;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Scripted {
        name: String,
        min_interval: Duration,
        events: Vec<Event>,
        fail: bool,
        calls: Arc<Mutex<usize>>,
    }

    impl Scripted {
        fn new(name: &str, events: Vec<Event>) -> Self {
            Self {
                name: name.into(),
                min_interval: Duration::ZERO,
                events,
                fail: false,
                calls: Arc::new(Mutex::new(0)),
            }
        }
    }

    #[async_trait::async_trait]
    impl AlertGenerator for Scripted {
        fn name(&self) -> &str {
            &self.name
        }
        fn min_interval(&self) -> Duration {
            self.min_interval
        }
        async fn evaluate(
            &mut self,
            trade_date: &str,
            _fusion: Option<&dyn Fusion>,
            _now: DateTime<Utc>,
        ) -> anyhow::Result<Vec<Event>> {
            *self.calls.lock() += 1;
            if self.fail {
                return Err(anyhow!("upstream down"));
            }
            Ok(self
                .events
                .iter()
                .cloned()
                .map(|mut e| {
                    e.trade_date = trade_date.to_string();
                    e
                })
                .collect())
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        batches: Arc<Mutex<Vec<Vec<Event>>>>,
    }

    #[async_trait::async_trait]
    impl Notifier for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        async fn notify(&self, events: &[Event]) -> anyhow::Result<()> {
            self.batches.lock().push(events.to_vec());
            Ok(())
        }
    }

    fn fixed_config() -> RadarConfig {
        let mut cfg = RadarConfig::default();
        cfg.engine.trade_date_mode = TradeDateMode::Fixed;
        cfg.engine.fixed_trade_date = Some("20260129".into());
        cfg
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 29, 1, 30, 0).unwrap()
    }

    fn spike(symbol: &str) -> Event {
        Event::new("spike", "", format!("{symbol} spike")).with_symbol(symbol)
    }

    #[tokio::test]
    async fn tick_delivers_and_next_tick_dedupes() {
        let rec = Recorder::default();
        let mut engine = Engine::new(
            fixed_config(),
            None,
            vec![Box::new(Scripted::new("spike", vec![spike("GC001"), spike("GC002")]))],
            vec![Box::new(rec.clone())],
        );

        let r = engine.run_once(t0()).await;
        assert_eq!(r.trade_date, "20260129");
        assert_eq!(r.stats.admitted, 2);
        assert_eq!(rec.batches.lock()[0][0].trade_date, "20260129");

        let r = engine.run_once(t0() + ChronoDuration::seconds(60)).await;
        assert_eq!(r.stats.deduped, 2);
        assert_eq!(r.stats.admitted, 0);
        // Nothing admitted, nothing delivered.
        assert_eq!(rec.batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn failing_generator_does_not_block_others() {
        let rec = Recorder::default();
        let mut broken = Scripted::new("broken", vec![]);
        broken.fail = true;
        let mut engine = Engine::new(
            fixed_config(),
            None,
            vec![Box::new(broken), Box::new(Scripted::new("spike", vec![spike("GC001")]))],
            vec![Box::new(rec.clone())],
        );
        let r = engine.run_once(t0()).await;
        assert_eq!(r.generators_run, 2);
        assert_eq!(r.generator_errors, 1);
        assert_eq!(r.stats.admitted, 1);
    }

    #[tokio::test]
    async fn min_interval_skips_early_ticks() {
        let mut g = Scripted::new("slow", vec![]);
        g.min_interval = Duration::from_secs(60);
        let calls = g.calls.clone();
        let mut engine = Engine::new(fixed_config(), None, vec![Box::new(g)], vec![Box::new(Recorder::default())]);

        engine.run_once(t0()).await;
        let r = engine.run_once(t0() + ChronoDuration::seconds(10)).await;
        assert_eq!(r.generators_run, 0);
        engine.run_once(t0() + ChronoDuration::seconds(61)).await;
        assert_eq!(*calls.lock(), 2);
    }

    #[tokio::test]
    async fn reco_quotas_cap_action_per_signal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("optimizer.reco.json");
        reco::write(
            &path,
            &Recommendation {
                version: RECO_VERSION.into(),
                generated_at: t0(),
                input_paper: "paper.jsonl".into(),
                input_labels: String::new(),
                primary_window_sec: 30,
                slots: 1,
                quotas: vec![SignalQuota {
                    signal: "spike".into(),
                    mean_reward: 0.7,
                    n: 12,
                    suggested_daily_quota: 1,
                }],
            },
        )
        .unwrap();

        let mut cfg = fixed_config();
        cfg.engine.reco_path = Some(path);
        // Static caps are replaced wholesale by the recommendation.
        cfg.policy
            .action_max_events_per_signal_per_day
            .insert("spike".into(), 25);

        let rec = Recorder::default();
        let events = vec![spike("A"), spike("B"), spike("C")];
        let mut engine = Engine::new(cfg, None, vec![Box::new(Scripted::new("spike", events))], vec![Box::new(rec.clone())]);
        assert_eq!(engine.reco().quotas().get("spike"), Some(&1));

        let r = engine.run_once(t0()).await;
        assert_eq!(r.stats.admitted, 3);
        assert_eq!(r.stats.daily_downgraded, 2);
        let tiers: Vec<Tier> = rec.batches.lock()[0].iter().map(|e| e.tier).collect();
        assert_eq!(tiers, vec![Tier::Action, Tier::Observe, Tier::Observe]);
    }

    #[test]
    fn from_config_requires_a_notifier() {
        let err = Engine::from_config(fixed_config()).err().unwrap();
        assert!(format!("{err:#}").contains("no notifiers configured"));
    }
}
