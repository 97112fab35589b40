use super::{volume_confirms, BreakoutParams, RuleKind, Signal, SignalMetrics};
use crate::scanner::window::WindowSnapshot;

/// Newest close above the prior range high (plus buffer) and above the trend EMA.
/// Never fires while the EMA is not ready.
pub fn breakout_up(snapshot: &WindowSnapshot, params: &BreakoutParams) -> Option<Signal> {
    let ema = snapshot.ema?;
    let (range, last) = reference_range(snapshot, params.range_lookback_bars)?;
    let range_high = range.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let level = range_high * (1.0 + params.buffer_pct / 100.0);

    if !(last > level && last > ema) {
        return None;
    }
    let volume_ratio = confirm_volume(snapshot, params)?;

    Signal::from_snapshot(
        snapshot,
        RuleKind::BreakoutUp,
        last / level,
        SignalMetrics {
            range_high: Some(range_high),
            ema: Some(ema),
            volume_ratio,
            ..SignalMetrics::default()
        },
    )
}

/// Newest close below the prior range low (minus buffer) and below the trend EMA.
pub fn breakdown_down(snapshot: &WindowSnapshot, params: &BreakoutParams) -> Option<Signal> {
    let ema = snapshot.ema?;
    let (range, last) = reference_range(snapshot, params.range_lookback_bars)?;
    let range_low = range.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let level = range_low * (1.0 - params.buffer_pct / 100.0);

    if !(last < level && last < ema) || last <= 0.0 {
        return None;
    }
    let volume_ratio = confirm_volume(snapshot, params)?;

    Signal::from_snapshot(
        snapshot,
        RuleKind::BreakdownDown,
        level / last,
        SignalMetrics {
            range_low: Some(range_low),
            ema: Some(ema),
            volume_ratio,
            ..SignalMetrics::default()
        },
    )
}

/// The `lookback` bars before the newest one, and the newest close.
fn reference_range(
    snapshot: &WindowSnapshot,
    lookback: usize,
) -> Option<(&[crate::scanner::candle::Bar], f64)> {
    let n = snapshot.len();
    if lookback == 0 || n <= lookback {
        return None;
    }
    Some((&snapshot.bars[n - 1 - lookback..n - 1], snapshot.bars[n - 1].close))
}

/// `Some(None)` when confirmation is off, `None` when it is on and fails.
fn confirm_volume(snapshot: &WindowSnapshot, params: &BreakoutParams) -> Option<Option<f64>> {
    if params.volume_multiplier <= 0.0 {
        return Some(None);
    }
    volume_confirms(snapshot, params.volume_multiplier, params.volume_lookback_bars).map(Some)
}
