use super::{volume_confirms, CrossParams, RuleKind, Signal, SignalMetrics};
use crate::scanner::window::WindowSnapshot;

/// Fast EMA crosses above the slow EMA on the newest bar.
pub fn ema_cross_up(snapshot: &WindowSnapshot, params: &CrossParams) -> Option<Signal> {
    cross(snapshot, params, RuleKind::EmaCrossUp)
}

/// Fast EMA crosses below the slow EMA on the newest bar.
pub fn ema_cross_down(snapshot: &WindowSnapshot, params: &CrossParams) -> Option<Signal> {
    cross(snapshot, params, RuleKind::EmaCrossDown)
}

fn cross(snapshot: &WindowSnapshot, params: &CrossParams, rule: RuleKind) -> Option<Signal> {
    let fast = snapshot.ema_fast.current?;
    let fast_prev = snapshot.ema_fast.previous?;
    let slow = snapshot.ema_slow.current?;
    let slow_prev = snapshot.ema_slow.previous?;

    let crossed = match rule {
        RuleKind::EmaCrossUp => fast_prev <= slow_prev && fast > slow,
        _ => fast_prev >= slow_prev && fast < slow,
    };
    if !crossed || slow <= 0.0 {
        return None;
    }

    let volume_ratio = if params.volume_multiplier > 0.0 {
        Some(volume_confirms(
            snapshot,
            params.volume_multiplier,
            params.volume_lookback_bars,
        )?)
    } else {
        None
    };

    Signal::from_snapshot(
        snapshot,
        rule,
        (fast - slow).abs() / slow * 100.0,
        SignalMetrics {
            ema_fast: Some(fast),
            ema_slow: Some(slow),
            volume_ratio,
            ..SignalMetrics::default()
        },
    )
}
