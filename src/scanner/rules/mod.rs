//! Detection rules.
//!
//! Every rule is a pure function of a [`WindowSnapshot`] and its parameters:
//! no shared state, no side effects. The orchestrator runs them in a fixed loop
//! over [`RuleKind::ALL`].

mod breakout;
mod cross;
mod spike;

pub use breakout::{breakdown_down, breakout_up};
pub use cross::{ema_cross_down, ema_cross_up};
pub use spike::{dump_spike, pump_spike};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::candle::Timeframe;
use super::window::WindowSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    PumpSpike,
    DumpSpike,
    BreakoutUp,
    BreakdownDown,
    EmaCrossUp,
    EmaCrossDown,
}

impl RuleKind {
    pub const ALL: [RuleKind; 6] = [
        RuleKind::PumpSpike,
        RuleKind::DumpSpike,
        RuleKind::BreakoutUp,
        RuleKind::BreakdownDown,
        RuleKind::EmaCrossUp,
        RuleKind::EmaCrossDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::PumpSpike => "pump_spike",
            RuleKind::DumpSpike => "dump_spike",
            RuleKind::BreakoutUp => "breakout_up",
            RuleKind::BreakdownDown => "breakdown_down",
            RuleKind::EmaCrossUp => "ema_cross_up",
            RuleKind::EmaCrossDown => "ema_cross_down",
        }
    }

    /// Short tag used in alert messages.
    pub fn label(&self) -> &'static str {
        match self {
            RuleKind::PumpSpike => "PUMP",
            RuleKind::DumpSpike => "DUMP",
            RuleKind::BreakoutUp => "BREAKOUT_UP",
            RuleKind::BreakdownDown => "BREAKDOWN_DN",
            RuleKind::EmaCrossUp => "EMA_CROSS_UP",
            RuleKind::EmaCrossDown => "EMA_CROSS_DN",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            RuleKind::PumpSpike | RuleKind::BreakoutUp | RuleKind::EmaCrossUp => Direction::Up,
            RuleKind::DumpSpike | RuleKind::BreakdownDown | RuleKind::EmaCrossDown => {
                Direction::Down
            }
        }
    }

    /// Spike rules work on raw price/volume and may run on in-progress bars.
    pub fn is_spike(&self) -> bool {
        matches!(self, RuleKind::PumpSpike | RuleKind::DumpSpike)
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Rule-specific readings attached to a signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pct_change: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema_fast: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema_slow: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub rule: RuleKind,
    pub direction: Direction,
    /// Close of the triggering bar.
    pub price: f64,
    /// Base-asset volume of the triggering bar.
    pub volume: f64,
    pub quote_volume: Option<f64>,
    pub typical_price: f64,
    /// Close time of the triggering bar, epoch milliseconds.
    pub timestamp: i64,
    pub strength: f64,
    pub metrics: SignalMetrics,
    pub provisional: bool,
}

impl Signal {
    /// Builds a signal from the newest bar of `snapshot`.
    pub(crate) fn from_snapshot(
        snapshot: &WindowSnapshot,
        rule: RuleKind,
        strength: f64,
        metrics: SignalMetrics,
    ) -> Option<Self> {
        let bar = snapshot.last()?;
        Some(Self {
            symbol: snapshot.symbol.clone(),
            timeframe: snapshot.timeframe,
            rule,
            direction: rule.direction(),
            price: bar.close,
            volume: bar.volume,
            quote_volume: bar.quote_volume,
            typical_price: bar.typical_price(),
            timestamp: snapshot.close_time()?,
            strength,
            metrics,
            provisional: snapshot.provisional,
        })
    }
}

/// Thresholds for pump and dump spikes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeParams {
    /// Percent move over `lookback_bars`. Dump spikes use its negated magnitude.
    pub price_pct_threshold: f64,
    /// Current volume must be at least this multiple of the baseline.
    pub volume_multiplier: f64,
    pub lookback_bars: usize,
    /// Bars before the current one averaged into the volume baseline.
    pub volume_lookback_bars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakoutParams {
    /// Bars before the current one forming the reference range.
    pub range_lookback_bars: usize,
    pub buffer_pct: f64,
    /// 0 disables volume confirmation.
    pub volume_multiplier: f64,
    pub volume_lookback_bars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossParams {
    /// 0 disables volume confirmation.
    pub volume_multiplier: f64,
    pub volume_lookback_bars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleParams {
    Spike(SpikeParams),
    Breakout(BreakoutParams),
    Cross(CrossParams),
}

impl RuleParams {
    /// Bars a window must hold before the rule can be evaluated.
    pub fn required_history(&self) -> usize {
        match self {
            RuleParams::Spike(p) => p.lookback_bars.max(p.volume_lookback_bars) + 1,
            RuleParams::Breakout(p) => {
                let volume = if p.volume_multiplier > 0.0 {
                    p.volume_lookback_bars
                } else {
                    0
                };
                p.range_lookback_bars.max(volume) + 1
            }
            RuleParams::Cross(p) => {
                if p.volume_multiplier > 0.0 {
                    p.volume_lookback_bars + 1
                } else {
                    1
                }
            }
        }
    }
}

/// Runs one rule. Parameters of the wrong family never fire.
pub fn evaluate(rule: RuleKind, snapshot: &WindowSnapshot, params: &RuleParams) -> Option<Signal> {
    match (rule, params) {
        (RuleKind::PumpSpike, RuleParams::Spike(p)) => pump_spike(snapshot, p),
        (RuleKind::DumpSpike, RuleParams::Spike(p)) => dump_spike(snapshot, p),
        (RuleKind::BreakoutUp, RuleParams::Breakout(p)) => breakout_up(snapshot, p),
        (RuleKind::BreakdownDown, RuleParams::Breakout(p)) => breakdown_down(snapshot, p),
        (RuleKind::EmaCrossUp, RuleParams::Cross(p)) => ema_cross_up(snapshot, p),
        (RuleKind::EmaCrossDown, RuleParams::Cross(p)) => ema_cross_down(snapshot, p),
        _ => None,
    }
}

/// Volume confirmation shared by every rule: `volume >= multiplier * baseline`.
/// Returns the volume ratio when it holds. A zero baseline counts as one unit.
pub(crate) fn volume_confirms(
    snapshot: &WindowSnapshot,
    multiplier: f64,
    lookback: usize,
) -> Option<f64> {
    let current = snapshot.last()?.volume;
    let mut baseline = snapshot.baseline_volume(lookback)?;
    if baseline <= 0.0 {
        baseline = 1.0;
    }
    let ratio = current / baseline;
    (current >= multiplier * baseline).then_some(ratio)
}

/// Read-only rule parameters keyed by (rule kind, timeframe), plus per-rule
/// cooldowns.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    params: HashMap<(RuleKind, Timeframe), RuleParams>,
    cooldowns: HashMap<RuleKind, Duration>,
}

impl RuleBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: RuleKind, timeframe: Timeframe, params: RuleParams) -> Self {
        self.params.insert((rule, timeframe), params);
        self
    }

    pub fn with_cooldown(mut self, rule: RuleKind, cooldown: Duration) -> Self {
        self.cooldowns.insert(rule, cooldown);
        self
    }

    pub fn get(&self, rule: RuleKind, timeframe: Timeframe) -> Option<&RuleParams> {
        self.params.get(&(rule, timeframe))
    }

    /// Enabled rules for a timeframe, in [`RuleKind::ALL`] order.
    pub fn enabled(&self, timeframe: Timeframe) -> impl Iterator<Item = (RuleKind, &RuleParams)> {
        RuleKind::ALL
            .into_iter()
            .filter_map(move |rule| self.get(rule, timeframe).map(|p| (rule, p)))
    }

    pub fn cooldowns(&self) -> &HashMap<RuleKind, Duration> {
        &self.cooldowns
    }

    pub fn timeframes(&self) -> Vec<Timeframe> {
        let mut tfs: Vec<Timeframe> = self.params.keys().map(|(_, tf)| *tf).collect();
        tfs.sort();
        tfs.dedup();
        tfs
    }

    /// Longest history any enabled rule on `timeframe` needs.
    pub fn required_history(&self, timeframe: Timeframe) -> usize {
        self.enabled(timeframe)
            .map(|(_, p)| p.required_history())
            .max()
            .unwrap_or(1)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::super::candle::{Bar, Timeframe};
    use super::super::window::{EmaReading, WindowSnapshot};

    pub const T0: i64 = 1_700_000_040_000;

    /// Snapshot of 1m bars built from (close, volume) pairs; open = previous close.
    pub fn snapshot(bars: &[(f64, f64)], ema: Option<f64>) -> WindowSnapshot {
        let mut prev = bars.first().map(|b| b.0).unwrap_or(0.0);
        let bars = bars
            .iter()
            .enumerate()
            .map(|(i, &(close, volume))| {
                let bar = Bar {
                    open_time: T0 + i as i64 * 60_000,
                    open: prev,
                    high: prev.max(close),
                    low: prev.min(close),
                    close,
                    volume,
                    quote_volume: None,
                };
                prev = close;
                bar
            })
            .collect::<Vec<_>>();
        WindowSnapshot {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::OneMinute,
            capacity: bars.len(),
            bars,
            ema,
            ema_fast: EmaReading::default(),
            ema_slow: EmaReading::default(),
            provisional: false,
        }
    }

    pub fn flat(n: usize, close: f64, volume: f64) -> Vec<(f64, f64)> {
        vec![(close, volume); n]
    }
}
