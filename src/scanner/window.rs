//! Rolling per-stream candle windows.
//!
//! A window holds the last N closed bars of one (symbol, timeframe) stream and
//! the EMA state derived from them. Open times must be contiguous: a candle that
//! skips one or more intervals clears the window and reseeds it, so bars from
//! before a feed interruption never mix with fresh ones.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use ta::indicators::ExponentialMovingAverage;
use ta::{Next, Reset};

use super::candle::{Bar, Candle, StreamKey, Timeframe};
use crate::error::ScanError;

/// Sizing of every window created for one timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub capacity: usize,
    pub trend_period: usize,
    pub fast_period: usize,
    pub slow_period: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    AwaitingFirstCandle,
    Accumulating,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First candle of a fresh window.
    Seeded,
    Appended,
    /// Contiguity broke; the window now holds only this candle.
    Reset { missed_bars: i64 },
    /// Same open time as the tail. Nothing changed.
    Duplicate,
}

/// Current and previous EMA values; `None` until the average has seen enough bars.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EmaReading {
    pub current: Option<f64>,
    pub previous: Option<f64>,
}

#[derive(Debug, Clone)]
struct EmaTrack {
    period: usize,
    ema: ExponentialMovingAverage,
    seen: usize,
    current: f64,
    previous: f64,
}

impl EmaTrack {
    fn new(period: usize) -> Result<Self, ScanError> {
        let ema =
            ExponentialMovingAverage::new(period).map_err(|_| ScanError::InvalidEmaPeriod(period))?;
        Ok(Self {
            period,
            ema,
            seen: 0,
            current: 0.0,
            previous: 0.0,
        })
    }

    fn update(&mut self, close: f64) {
        self.previous = self.current;
        self.current = self.ema.next(close);
        self.seen += 1;
    }

    fn reset(&mut self) {
        self.ema.reset();
        self.seen = 0;
        self.current = 0.0;
        self.previous = 0.0;
    }

    fn reading(&self) -> EmaReading {
        EmaReading {
            current: (self.seen >= self.period).then_some(self.current),
            previous: (self.seen > self.period).then_some(self.previous),
        }
    }
}

/// Read-only view handed to the rule evaluators.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
    pub capacity: usize,
    /// Trend EMA, `None` until the window holds `capacity` bars.
    pub ema: Option<f64>,
    pub ema_fast: EmaReading,
    pub ema_slow: EmaReading,
    /// Built from an in-progress candle rather than persisted state.
    pub provisional: bool,
}

impl WindowSnapshot {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.bars.len() >= self.capacity
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> impl Iterator<Item = f64> + '_ {
        self.bars.iter().map(|b| b.close)
    }

    pub fn volumes(&self) -> impl Iterator<Item = f64> + '_ {
        self.bars.iter().map(|b| b.volume)
    }

    /// Close time of the newest bar, in epoch milliseconds.
    pub fn close_time(&self) -> Option<i64> {
        self.last()
            .map(|b| b.open_time + self.timeframe.as_millis())
    }

    /// Mean volume of up to `lookback` bars before the newest one.
    pub fn baseline_volume(&self, lookback: usize) -> Option<f64> {
        let n = self.bars.len();
        let take = lookback.min(n.saturating_sub(1));
        if take == 0 {
            return None;
        }
        let sum: f64 = self.bars[n - 1 - take..n - 1].iter().map(|b| b.volume).sum();
        Some(sum / take as f64)
    }
}

#[derive(Debug, Clone)]
pub struct Window {
    key: StreamKey,
    spec: WindowSpec,
    bars: VecDeque<Bar>,
    trend: EmaTrack,
    fast: EmaTrack,
    slow: EmaTrack,
    resets: u64,
}

impl Window {
    pub fn new(key: StreamKey, spec: WindowSpec) -> Result<Self, ScanError> {
        Ok(Self {
            key,
            spec,
            bars: VecDeque::with_capacity(spec.capacity),
            trend: EmaTrack::new(spec.trend_period)?,
            fast: EmaTrack::new(spec.fast_period)?,
            slow: EmaTrack::new(spec.slow_period)?,
            resets: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn phase(&self) -> StreamPhase {
        if self.bars.is_empty() {
            StreamPhase::AwaitingFirstCandle
        } else if self.bars.len() < self.spec.capacity {
            StreamPhase::Accumulating
        } else {
            StreamPhase::Ready
        }
    }

    /// Appends a closed candle, enforcing contiguity and capacity.
    pub fn push(&mut self, candle: &Candle) -> Result<IngestOutcome, ScanError> {
        if candle.timeframe != self.key.timeframe {
            return Err(ScanError::TimeframeMismatch {
                symbol: candle.symbol.clone(),
                expected: self.key.timeframe,
                got: candle.timeframe,
            });
        }

        let interval = self.key.timeframe.as_millis();
        let outcome = match self.bars.back().map(|b| b.open_time) {
            None => IngestOutcome::Seeded,
            Some(tail) if candle.open_time == tail + interval => IngestOutcome::Appended,
            Some(tail) if candle.open_time == tail => return Ok(IngestOutcome::Duplicate),
            Some(tail) if candle.open_time < tail => {
                return Err(ScanError::TimeRegression {
                    symbol: candle.symbol.clone(),
                    timeframe: candle.timeframe,
                    open_time: candle.open_time,
                    tail,
                })
            }
            Some(tail) => {
                self.clear();
                self.resets += 1;
                IngestOutcome::Reset {
                    missed_bars: (candle.open_time - tail) / interval - 1,
                }
            }
        };

        if self.bars.len() == self.spec.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(Bar::from(candle));
        self.trend.update(candle.close);
        self.fast.update(candle.close);
        self.slow.update(candle.close);

        Ok(outcome)
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            symbol: self.key.symbol.clone(),
            timeframe: self.key.timeframe,
            bars: self.bars.iter().copied().collect(),
            capacity: self.spec.capacity,
            ema: self.trend_ema(&self.trend, self.bars.len()),
            ema_fast: self.fast.reading(),
            ema_slow: self.slow.reading(),
            provisional: false,
        }
    }

    /// What the window would look like if `live` closed right now. Only
    /// available for a ready window whose tail directly precedes `live`.
    pub fn preview(&self, live: &Candle) -> Option<WindowSnapshot> {
        if self.phase() != StreamPhase::Ready || live.timeframe != self.key.timeframe {
            return None;
        }
        let tail = self.bars.back()?.open_time;
        if live.open_time != tail + self.key.timeframe.as_millis() {
            return None;
        }

        let mut bars: Vec<Bar> = self.bars.iter().skip(1).copied().collect();
        bars.push(Bar::from(live));

        let mut trend = self.trend.clone();
        let mut fast = self.fast.clone();
        let mut slow = self.slow.clone();
        trend.update(live.close);
        fast.update(live.close);
        slow.update(live.close);

        let ema = self.trend_ema(&trend, bars.len());
        Some(WindowSnapshot {
            symbol: self.key.symbol.clone(),
            timeframe: self.key.timeframe,
            bars,
            capacity: self.spec.capacity,
            ema,
            ema_fast: fast.reading(),
            ema_slow: slow.reading(),
            provisional: true,
        })
    }

    fn trend_ema(&self, trend: &EmaTrack, len: usize) -> Option<f64> {
        trend.reading().current.filter(|_| len >= self.spec.capacity)
    }

    fn clear(&mut self) {
        self.bars.clear();
        self.trend.reset();
        self.fast.reset();
        self.slow.reset();
    }
}

/// Result of storing one closed candle.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub outcome: IngestOutcome,
    pub previous_phase: StreamPhase,
    pub snapshot: WindowSnapshot,
}

impl Ingested {
    pub fn phase(&self) -> StreamPhase {
        if self.snapshot.is_ready() {
            StreamPhase::Ready
        } else {
            StreamPhase::Accumulating
        }
    }
}

/// All windows, sharded by stream key. Windows are created lazily on the
/// first candle of a stream; each shard lock covers only its own keys.
pub struct WindowStore {
    specs: HashMap<Timeframe, WindowSpec>,
    windows: DashMap<StreamKey, Window>,
}

impl WindowStore {
    pub fn new(specs: HashMap<Timeframe, WindowSpec>) -> Self {
        Self {
            specs,
            windows: DashMap::new(),
        }
    }

    pub fn spec(&self, timeframe: Timeframe) -> Option<&WindowSpec> {
        self.specs.get(&timeframe)
    }

    pub fn ingest(&self, candle: &Candle) -> Result<Ingested, ScanError> {
        if !candle.is_closed {
            return Err(ScanError::MalformedCandle {
                symbol: candle.symbol.clone(),
                timeframe: candle.timeframe,
                reason: "in-progress candle cannot be stored".to_string(),
            });
        }
        let spec = *self
            .specs
            .get(&candle.timeframe)
            .ok_or(ScanError::UnscannedTimeframe(candle.timeframe))?;

        let mut window = match self.windows.entry(candle.key()) {
            Entry::Occupied(e) => e.into_ref(),
            Entry::Vacant(e) => e.insert(Window::new(candle.key(), spec)?),
        };

        let previous_phase = window.phase();
        let outcome = window.push(candle)?;
        Ok(Ingested {
            outcome,
            previous_phase,
            snapshot: window.snapshot(),
        })
    }

    pub fn preview(&self, live: &Candle) -> Option<WindowSnapshot> {
        self.windows.get(&live.key())?.preview(live)
    }

    pub fn snapshot(&self, key: &StreamKey) -> Option<WindowSnapshot> {
        self.windows.get(key).map(|w| w.snapshot())
    }

    pub fn phase(&self, key: &StreamKey) -> StreamPhase {
        self.windows
            .get(key)
            .map(|w| w.phase())
            .unwrap_or(StreamPhase::AwaitingFirstCandle)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_040_000;
    const MIN: i64 = 60_000;

    fn spec(capacity: usize) -> WindowSpec {
        WindowSpec {
            capacity,
            trend_period: capacity,
            fast_period: 2,
            slow_period: 3,
        }
    }

    fn candle(i: i64, close: f64) -> Candle {
        Candle {
            symbol: "ETHUSDT".to_string(),
            timeframe: Timeframe::OneMinute,
            open_time: T0 + i * MIN,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            quote_volume: None,
            is_closed: true,
        }
    }

    fn window(capacity: usize) -> Window {
        Window::new(StreamKey::new("ETHUSDT", Timeframe::OneMinute), spec(capacity)).unwrap()
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut w = window(3);
        for i in 0..5 {
            w.push(&candle(i, 100.0 + i as f64)).unwrap();
        }
        let snap = w.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.closes().collect::<Vec<_>>(), vec![102.0, 103.0, 104.0]);
        assert_eq!(w.phase(), StreamPhase::Ready);
    }

    #[test]
    fn test_phase_progression() {
        let mut w = window(2);
        assert_eq!(w.phase(), StreamPhase::AwaitingFirstCandle);
        assert_eq!(w.push(&candle(0, 1.0)).unwrap(), IngestOutcome::Seeded);
        assert_eq!(w.phase(), StreamPhase::Accumulating);
        assert_eq!(w.push(&candle(1, 1.0)).unwrap(), IngestOutcome::Appended);
        assert_eq!(w.phase(), StreamPhase::Ready);
    }

    #[test]
    fn test_gap_resets_window() {
        let mut w = window(3);
        for i in 0..3 {
            w.push(&candle(i, 10.0)).unwrap();
        }
        let outcome = w.push(&candle(6, 20.0)).unwrap();
        assert_eq!(outcome, IngestOutcome::Reset { missed_bars: 3 });
        let snap = w.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.bars[0].close, 20.0);
        assert_eq!(snap.ema, None);
        assert_eq!(w.resets(), 1);
    }

    #[test]
    fn test_duplicate_is_ignored() {
        let mut w = window(3);
        w.push(&candle(0, 10.0)).unwrap();
        assert_eq!(w.push(&candle(0, 11.0)).unwrap(), IngestOutcome::Duplicate);
        assert_eq!(w.snapshot().closes().collect::<Vec<_>>(), vec![10.0]);
    }

    #[test]
    fn test_time_regression_rejected() {
        let mut w = window(3);
        w.push(&candle(5, 10.0)).unwrap();
        let err = w.push(&candle(4, 10.0)).unwrap_err();
        assert!(matches!(err, ScanError::TimeRegression { .. }));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_timeframe_mismatch_rejected() {
        let mut w = window(3);
        let mut c = candle(0, 10.0);
        c.timeframe = Timeframe::FiveMinutes;
        assert!(matches!(
            w.push(&c),
            Err(ScanError::TimeframeMismatch { .. })
        ));
    }

    #[test]
    fn test_ema_incremental_formula() {
        // period 3 -> k = 0.5
        let mut w = Window::new(
            StreamKey::new("ETHUSDT", Timeframe::OneMinute),
            WindowSpec {
                capacity: 3,
                trend_period: 3,
                fast_period: 2,
                slow_period: 3,
            },
        )
        .unwrap();
        w.push(&candle(0, 10.0)).unwrap();
        w.push(&candle(1, 11.0)).unwrap();
        assert_eq!(w.snapshot().ema, None);
        w.push(&candle(2, 12.0)).unwrap();
        let ema = w.snapshot().ema.unwrap();
        assert!((ema - 11.25).abs() < 1e-10);
        w.push(&candle(3, 13.0)).unwrap();
        let ema = w.snapshot().ema.unwrap();
        assert!((ema - 12.125).abs() < 1e-10);
    }

    #[test]
    fn test_trend_ema_waits_for_full_window() {
        let mut w = Window::new(
            StreamKey::new("ETHUSDT", Timeframe::OneMinute),
            WindowSpec {
                capacity: 31,
                trend_period: 20,
                fast_period: 2,
                slow_period: 3,
            },
        )
        .unwrap();
        let params = crate::scanner::rules::BreakoutParams {
            range_lookback_bars: 10,
            buffer_pct: 0.2,
            volume_multiplier: 0.0,
            volume_lookback_bars: 20,
        };

        for i in 0..20 {
            w.push(&candle(i, 100.0)).unwrap();
        }
        w.push(&candle(20, 150.0)).unwrap();
        let early = w.snapshot();
        assert_eq!(early.ema, None);
        assert!(crate::scanner::rules::breakout_up(&early, &params).is_none());

        for i in 21..30 {
            w.push(&candle(i, 100.0)).unwrap();
        }
        w.push(&candle(30, 150.0)).unwrap();
        let ready = w.snapshot();
        assert!(ready.is_ready());
        assert!(ready.ema.is_some());
        assert!(crate::scanner::rules::breakout_up(&ready, &params).is_some());
    }

    #[test]
    fn test_ema_previous_needs_one_extra_bar() {
        let mut w = window(5);
        w.push(&candle(0, 10.0)).unwrap();
        w.push(&candle(1, 10.0)).unwrap();
        let fast = w.snapshot().ema_fast;
        assert!(fast.current.is_some());
        assert!(fast.previous.is_none());
        w.push(&candle(2, 10.0)).unwrap();
        assert!(w.snapshot().ema_fast.previous.is_some());
    }

    #[test]
    fn test_preview_does_not_mutate() {
        let mut w = window(3);
        for i in 0..3 {
            w.push(&candle(i, 10.0)).unwrap();
        }
        let mut live = candle(3, 15.0);
        live.is_closed = false;
        let preview = w.preview(&live).unwrap();
        assert!(preview.provisional);
        assert_eq!(preview.closes().collect::<Vec<_>>(), vec![10.0, 10.0, 15.0]);
        assert_eq!(w.snapshot().closes().collect::<Vec<_>>(), vec![10.0, 10.0, 10.0]);

        let far = candle(9, 15.0);
        assert!(w.preview(&far).is_none());
    }

    #[test]
    fn test_baseline_volume_excludes_newest() {
        let mut w = window(4);
        for (i, v) in [2.0, 4.0, 6.0, 100.0].iter().enumerate() {
            let mut c = candle(i as i64, 10.0);
            c.volume = *v;
            w.push(&c).unwrap();
        }
        let snap = w.snapshot();
        assert_eq!(snap.baseline_volume(3), Some(4.0));
        assert_eq!(snap.baseline_volume(10), Some(4.0));
        assert_eq!(snap.baseline_volume(1), Some(6.0));
    }

    #[test]
    fn test_store_creates_windows_lazily() {
        let store = WindowStore::new(HashMap::from([(Timeframe::OneMinute, spec(3))]));
        assert!(store.is_empty());
        let ingested = store.ingest(&candle(0, 1.0)).unwrap();
        assert_eq!(ingested.outcome, IngestOutcome::Seeded);
        assert_eq!(ingested.previous_phase, StreamPhase::AwaitingFirstCandle);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_rejects_open_and_unscanned_candles() {
        let store = WindowStore::new(HashMap::from([(Timeframe::OneMinute, spec(3))]));
        let mut open = candle(0, 1.0);
        open.is_closed = false;
        assert!(store.ingest(&open).is_err());

        let mut hourly = candle(0, 1.0);
        hourly.timeframe = Timeframe::OneHour;
        assert_eq!(
            store.ingest(&hourly).unwrap_err(),
            ScanError::UnscannedTimeframe(Timeframe::OneHour)
        );
        assert!(store.is_empty());
    }
}
