//! Cooldown tracking per (symbol, timeframe, rule).

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;

use super::candle::Timeframe;
use super::rules::{RuleKind, Signal};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub rule: RuleKind,
}

impl From<&Signal> for DedupKey {
    fn from(s: &Signal) -> Self {
        Self {
            symbol: s.symbol.clone(),
            timeframe: s.timeframe,
            rule: s.rule,
        }
    }
}

/// Admits a signal only if its key has not alerted within the rule's cooldown.
///
/// Time is the signal's own timestamp (bar close time), so replaying the same
/// candles always yields the same admissions.
pub struct Deduplicator {
    cooldowns: HashMap<RuleKind, i64>,
    default_cooldown: i64,
    retention: i64,
    records: DashMap<DedupKey, i64>,
}

impl Deduplicator {
    pub fn new(
        cooldowns: &HashMap<RuleKind, Duration>,
        default_cooldown: Duration,
        retention: Duration,
    ) -> Self {
        let cooldowns: HashMap<RuleKind, i64> = cooldowns
            .iter()
            .map(|(rule, d)| (*rule, d.as_millis() as i64))
            .collect();
        let default_cooldown = default_cooldown.as_millis() as i64;
        let longest = cooldowns
            .values()
            .copied()
            .max()
            .unwrap_or(0)
            .max(default_cooldown);

        Self {
            cooldowns,
            default_cooldown,
            retention: (retention.as_millis() as i64).max(longest),
            records: DashMap::new(),
        }
    }

    pub fn cooldown_ms(&self, rule: RuleKind) -> i64 {
        self.cooldowns
            .get(&rule)
            .copied()
            .unwrap_or(self.default_cooldown)
    }

    pub fn admit(&self, signal: &Signal) -> bool {
        let now = signal.timestamp;
        let cooldown = self.cooldown_ms(signal.rule);
        match self.records.entry(DedupKey::from(signal)) {
            Entry::Vacant(e) => {
                e.insert(now);
                true
            }
            Entry::Occupied(mut e) => {
                if now - *e.get() >= cooldown {
                    e.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Drops records older than the retention horizon. Returns how many went.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, last| now_ms - *last < self.retention);
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::rules::{Direction, SignalMetrics};

    const SEC: i64 = 1_000;

    fn signal(rule: RuleKind, timestamp: i64) -> Signal {
        Signal {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::OneMinute,
            rule,
            direction: rule.direction(),
            price: 1.0,
            volume: 1.0,
            quote_volume: None,
            typical_price: 1.0,
            timestamp,
            strength: 1.0,
            metrics: SignalMetrics::default(),
            provisional: false,
        }
    }

    fn dedup(cooldown_secs: u64) -> Deduplicator {
        Deduplicator::new(
            &HashMap::new(),
            Duration::from_secs(cooldown_secs),
            Duration::from_secs(0),
        )
    }

    #[test]
    fn test_within_cooldown_is_suppressed() {
        let d = dedup(60);
        assert!(d.admit(&signal(RuleKind::PumpSpike, 0)));
        assert!(!d.admit(&signal(RuleKind::PumpSpike, 30 * SEC)));
    }

    #[test]
    fn test_after_cooldown_is_admitted() {
        let d = dedup(60);
        assert!(d.admit(&signal(RuleKind::PumpSpike, 0)));
        assert!(d.admit(&signal(RuleKind::PumpSpike, 61 * SEC)));
    }

    #[test]
    fn test_suppressed_signal_does_not_extend_cooldown() {
        let d = dedup(60);
        assert!(d.admit(&signal(RuleKind::PumpSpike, 0)));
        assert!(!d.admit(&signal(RuleKind::PumpSpike, 50 * SEC)));
        assert!(d.admit(&signal(RuleKind::PumpSpike, 60 * SEC)));
    }

    #[test]
    fn test_keys_are_independent() {
        let d = dedup(60);
        assert!(d.admit(&signal(RuleKind::PumpSpike, 0)));
        assert!(d.admit(&signal(RuleKind::BreakoutUp, 0)));
        let mut other = signal(RuleKind::PumpSpike, 0);
        other.timeframe = Timeframe::FiveMinutes;
        assert!(d.admit(&other));
        other.symbol = "ETHUSDT".to_string();
        assert!(d.admit(&other));
        assert_eq!(d.len(), 4);
    }

    #[test]
    fn test_per_rule_cooldowns() {
        let cooldowns = HashMap::from([
            (RuleKind::PumpSpike, Duration::from_secs(60)),
            (RuleKind::BreakoutUp, Duration::from_secs(600)),
        ]);
        let d = Deduplicator::new(&cooldowns, Duration::from_secs(60), Duration::ZERO);
        assert!(d.admit(&signal(RuleKind::PumpSpike, 0)));
        assert!(d.admit(&signal(RuleKind::BreakoutUp, 0)));
        assert!(d.admit(&signal(RuleKind::PumpSpike, 120 * SEC)));
        assert!(!d.admit(&signal(RuleKind::BreakoutUp, 120 * SEC)));
    }

    #[test]
    fn test_sweep_evicts_stale_records() {
        let d = Deduplicator::new(
            &HashMap::new(),
            Duration::from_secs(60),
            Duration::from_secs(300),
        );
        d.admit(&signal(RuleKind::PumpSpike, 0));
        d.admit(&signal(RuleKind::DumpSpike, 200 * SEC));
        assert_eq!(d.sweep(250 * SEC), 0);
        assert_eq!(d.sweep(400 * SEC), 1);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_retention_never_shorter_than_cooldown() {
        let d = Deduplicator::new(
            &HashMap::new(),
            Duration::from_secs(600),
            Duration::from_secs(10),
        );
        d.admit(&signal(RuleKind::PumpSpike, 0));
        assert_eq!(d.sweep(300 * SEC), 0);
        assert!(!d.admit(&signal(RuleKind::PumpSpike, 300 * SEC)));
    }
}
