use log::{debug, info};

use super::candle::{Candle, StreamKey};
use super::dedup::Deduplicator;
use super::rules::{evaluate, RuleBook, RuleKind, Signal};
use super::tier::TierFilter;
use super::window::{IngestOutcome, StreamPhase, WindowSnapshot, WindowStore};
use crate::error::ScanError;

/// What one candle did to its stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub phase: StreamPhase,
    pub ingest: Option<IngestOutcome>,
    /// Signals produced by the evaluators before filtering.
    pub raw_signals: usize,
    /// Signals that passed the tier filter and dedup.
    pub alerts: Vec<Signal>,
}

impl ScanOutcome {
    fn idle(phase: StreamPhase, ingest: Option<IngestOutcome>) -> Self {
        Self {
            phase,
            ingest,
            raw_signals: 0,
            alerts: Vec::new(),
        }
    }
}

/// Routes candles through window -> rules -> tier filter -> dedup.
///
/// `process` takes `&self` and is safe to call from many tasks at once; the
/// window store and the deduplicator lock per key. Callers must keep candles
/// of one stream in order, which [`super::runtime::ScannerRuntime`] does by
/// pinning each stream to one worker.
pub struct Scanner {
    rules: RuleBook,
    windows: WindowStore,
    tiers: TierFilter,
    dedup: Deduplicator,
    fast_path_spikes: bool,
}

impl Scanner {
    pub fn new(rules: RuleBook, windows: WindowStore, tiers: TierFilter, dedup: Deduplicator) -> Self {
        Self {
            rules,
            windows,
            tiers,
            dedup,
            fast_path_spikes: false,
        }
    }

    /// Also run the spike rules on in-progress candles.
    pub fn with_fast_path_spikes(mut self, enabled: bool) -> Self {
        self.fast_path_spikes = enabled;
        self
    }

    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    pub fn windows(&self) -> &WindowStore {
        &self.windows
    }

    pub fn phase(&self, key: &StreamKey) -> StreamPhase {
        self.windows.phase(key)
    }

    pub fn process(&self, candle: &Candle) -> Result<ScanOutcome, ScanError> {
        candle.validate()?;
        if candle.is_closed {
            self.process_closed(candle)
        } else {
            Ok(self.process_live(candle))
        }
    }

    /// Evicts dedup records past their retention. Returns how many went.
    pub fn sweep(&self, now_ms: i64) -> usize {
        self.dedup.sweep(now_ms)
    }

    fn process_closed(&self, candle: &Candle) -> Result<ScanOutcome, ScanError> {
        let ingested = self.windows.ingest(candle)?;
        let phase = ingested.phase();

        match ingested.outcome {
            IngestOutcome::Duplicate => {
                debug!(target: "feed", "{} duplicate close at {}", candle.key(), candle.open_time);
                return Ok(ScanOutcome::idle(phase, Some(ingested.outcome)));
            }
            IngestOutcome::Reset { missed_bars } => {
                info!(
                    target: "feed",
                    "{} skipped {} bar(s), window reset",
                    candle.key(),
                    missed_bars
                );
            }
            IngestOutcome::Seeded | IngestOutcome::Appended => {}
        }

        if phase == StreamPhase::Ready && ingested.previous_phase != StreamPhase::Ready {
            info!(target: "rule", "{} ready with {} bars", candle.key(), ingested.snapshot.len());
        }
        if phase != StreamPhase::Ready {
            return Ok(ScanOutcome::idle(phase, Some(ingested.outcome)));
        }

        let (raw_signals, alerts) = self.run_rules(&ingested.snapshot, |_| true);
        Ok(ScanOutcome {
            phase,
            ingest: Some(ingested.outcome),
            raw_signals,
            alerts,
        })
    }

    fn process_live(&self, candle: &Candle) -> ScanOutcome {
        let phase = self.windows.phase(&candle.key());
        if !self.fast_path_spikes {
            return ScanOutcome::idle(phase, None);
        }
        let Some(preview) = self.windows.preview(candle) else {
            return ScanOutcome::idle(phase, None);
        };
        let (raw_signals, alerts) = self.run_rules(&preview, RuleKind::is_spike);
        ScanOutcome {
            phase,
            ingest: None,
            raw_signals,
            alerts,
        }
    }

    fn run_rules(
        &self,
        snapshot: &WindowSnapshot,
        include: impl Fn(&RuleKind) -> bool,
    ) -> (usize, Vec<Signal>) {
        let mut raw = 0;
        let mut alerts = Vec::new();

        for (rule, params) in self.rules.enabled(snapshot.timeframe) {
            if !include(&rule) {
                continue;
            }
            let Some(signal) = evaluate(rule, snapshot, params) else {
                continue;
            };
            raw += 1;

            let verdict = self.tiers.check(&signal);
            if !verdict.passed {
                debug!(
                    target: "rule",
                    "{} {} {} below tier {} floor: {:.2} < {:.2}",
                    signal.symbol,
                    signal.timeframe,
                    rule,
                    verdict.tier,
                    verdict.notional,
                    verdict.min_notional
                );
                continue;
            }
            if !self.dedup.admit(&signal) {
                debug!(
                    target: "rule",
                    "{} {} {} cooling down",
                    signal.symbol, signal.timeframe, rule
                );
                continue;
            }

            info!(
                target: "rule",
                "{} {} {} {} @ {} strength {:.2}{}",
                rule.label(),
                signal.symbol,
                signal.timeframe,
                signal.direction,
                signal.price,
                signal.strength,
                if signal.provisional { " (live bar)" } else { "" }
            );
            alerts.push(signal);
        }

        (raw, alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::candle::Timeframe;
    use crate::scanner::rules::test_support::T0;
    use crate::scanner::rules::{RuleParams, SpikeParams};
    use crate::scanner::tier::{NotionalBasis, Tier, TierTable};
    use crate::scanner::window::WindowSpec;
    use std::collections::HashMap;
    use std::time::Duration;

    fn scanner() -> Scanner {
        let rules = RuleBook::new().with_rule(
            RuleKind::PumpSpike,
            Timeframe::OneMinute,
            RuleParams::Spike(SpikeParams {
                price_pct_threshold: 2.0,
                volume_multiplier: 2.0,
                lookback_bars: 1,
                volume_lookback_bars: 3,
            }),
        );
        let specs = HashMap::from([(
            Timeframe::OneMinute,
            WindowSpec {
                capacity: 4,
                trend_period: 4,
                fast_period: 2,
                slow_period: 3,
            },
        )]);
        let dedup = Deduplicator::new(rules.cooldowns(), Duration::from_secs(60), Duration::from_secs(60));
        Scanner::new(
            rules,
            WindowStore::new(specs),
            TierFilter::new(
                TierTable::new().with_threshold(Tier::S, 0.0).with_symbol("BTCUSDT", Tier::S),
                NotionalBasis::Close,
            ),
            dedup,
        )
    }

    fn candle(timeframe: Timeframe, index: i64, close: f64, volume: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            timeframe,
            open_time: T0 + index * timeframe.as_millis(),
            open: close,
            high: close,
            low: close,
            close,
            volume,
            quote_volume: None,
            is_closed: true,
        }
    }

    #[test]
    fn test_unscanned_timeframe_is_rejected() {
        let err = scanner()
            .process(&candle(Timeframe::FiveMinutes, 0, 1.0, 1.0))
            .unwrap_err();
        assert_eq!(err, ScanError::UnscannedTimeframe(Timeframe::FiveMinutes));
    }

    #[test]
    fn test_phases_and_first_evaluation() {
        let s = scanner();
        let key = StreamKey::new("BTCUSDT", Timeframe::OneMinute);

        let first = s.process(&candle(Timeframe::OneMinute, 0, 10.0, 1.0)).unwrap();
        assert_eq!(first.ingest, Some(IngestOutcome::Seeded));
        assert_eq!(first.phase, StreamPhase::Accumulating);

        for i in 1..3 {
            s.process(&candle(Timeframe::OneMinute, i, 10.0, 1.0)).unwrap();
        }
        let ready = s.process(&candle(Timeframe::OneMinute, 3, 11.0, 5.0)).unwrap();
        assert_eq!(ready.phase, StreamPhase::Ready);
        assert_eq!(s.phase(&key), StreamPhase::Ready);
        assert_eq!(ready.alerts.len(), 1);
        assert_eq!(s.sweep(T0), 0);
    }
}
