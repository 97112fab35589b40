use super::{volume_confirms, RuleKind, Signal, SignalMetrics, SpikeParams};
use crate::scanner::window::WindowSnapshot;

/// Price up by at least the threshold over the lookback AND volume at least
/// `volume_multiplier` times the baseline. Neither condition alone qualifies.
pub fn pump_spike(snapshot: &WindowSnapshot, params: &SpikeParams) -> Option<Signal> {
    spike(snapshot, params, RuleKind::PumpSpike)
}

/// Mirror of [`pump_spike`] for downward moves.
pub fn dump_spike(snapshot: &WindowSnapshot, params: &SpikeParams) -> Option<Signal> {
    spike(snapshot, params, RuleKind::DumpSpike)
}

fn spike(snapshot: &WindowSnapshot, params: &SpikeParams, rule: RuleKind) -> Option<Signal> {
    let n = snapshot.len();
    if params.lookback_bars == 0 || n <= params.lookback_bars {
        return None;
    }
    let base = snapshot.bars[n - 1 - params.lookback_bars].close;
    let last = snapshot.bars[n - 1].close;
    if base <= 0.0 {
        return None;
    }

    let pct = (last - base) / base * 100.0;
    let threshold = params.price_pct_threshold.abs();
    let price_ok = match rule {
        RuleKind::PumpSpike => pct >= threshold,
        _ => pct <= -threshold,
    };
    if !price_ok {
        return None;
    }

    let ratio = volume_confirms(snapshot, params.volume_multiplier, params.volume_lookback_bars)?;

    let price_score = if threshold > 0.0 { pct.abs() / threshold } else { 1.0 };
    let volume_score = if params.volume_multiplier > 0.0 {
        ratio / params.volume_multiplier
    } else {
        ratio
    };

    Signal::from_snapshot(
        snapshot,
        rule,
        (price_score * volume_score).sqrt(),
        SignalMetrics {
            pct_change: Some(pct),
            volume_ratio: Some(ratio),
            ..SignalMetrics::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::scanner::rules::Direction;

    fn params(pct: f64, mult: f64) -> SpikeParams {
        SpikeParams {
            price_pct_threshold: pct,
            volume_multiplier: mult,
            lookback_bars: 1,
            volume_lookback_bars: 20,
        }
    }

    fn with_last(close: f64, volume: f64) -> Vec<(f64, f64)> {
        let mut bars = flat(20, 100.0, 10.0);
        bars.push((close, volume));
        bars
    }

    #[test]
    fn test_pump_requires_price_and_volume() {
        let p = params(3.0, 3.0);
        let signal = pump_spike(&snapshot(&with_last(105.0, 40.0), None), &p).unwrap();
        assert_eq!(signal.rule, RuleKind::PumpSpike);
        assert_eq!(signal.direction, Direction::Up);
        assert_eq!(signal.price, 105.0);
        assert!((signal.metrics.pct_change.unwrap() - 5.0).abs() < 1e-9);
        assert!((signal.metrics.volume_ratio.unwrap() - 4.0).abs() < 1e-9);
        assert!(signal.strength > 1.0);
    }

    #[test]
    fn test_pump_price_only_does_not_fire() {
        let p = params(3.0, 3.0);
        assert!(pump_spike(&snapshot(&with_last(105.0, 20.0), None), &p).is_none());
    }

    #[test]
    fn test_pump_volume_only_does_not_fire() {
        let p = params(3.0, 3.0);
        assert!(pump_spike(&snapshot(&with_last(101.0, 80.0), None), &p).is_none());
    }

    #[test]
    fn test_pump_threshold_is_inclusive() {
        // 128 -> 132 is exactly +3.125%; 30 is exactly 3x the baseline
        let mut bars = flat(20, 128.0, 10.0);
        bars.push((132.0, 30.0));
        let p = params(3.125, 3.0);
        assert!(pump_spike(&snapshot(&bars, None), &p).is_some());
    }

    #[test]
    fn test_dump_accepts_either_threshold_sign() {
        let snap = snapshot(&with_last(95.0, 40.0), None);
        for threshold in [-3.0, 3.0] {
            let signal = dump_spike(&snap, &params(threshold, 3.0)).unwrap();
            assert_eq!(signal.direction, Direction::Down);
            assert!(signal.metrics.pct_change.unwrap() < 0.0);
        }
        assert!(pump_spike(&snap, &params(3.0, 3.0)).is_none());
    }

    #[test]
    fn test_multi_bar_lookback() {
        let mut bars = flat(18, 100.0, 10.0);
        bars.extend([(101.0, 10.0), (102.0, 10.0), (104.0, 50.0)]);
        let mut p = params(3.5, 3.0);
        assert!(pump_spike(&snapshot(&bars, None), &p).is_none());
        p.lookback_bars = 3;
        assert!(pump_spike(&snapshot(&bars, None), &p).is_some());
    }

    #[test]
    fn test_too_short_window_is_none() {
        let p = params(3.0, 3.0);
        assert!(pump_spike(&snapshot(&[(100.0, 1.0)], None), &p).is_none());
    }

    #[test]
    fn test_provisional_flag_carries_over() {
        let mut snap = snapshot(&with_last(105.0, 40.0), None);
        snap.provisional = true;
        assert!(pump_spike(&snap, &params(3.0, 3.0)).unwrap().provisional);
    }
}
