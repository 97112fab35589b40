//! Alert hand-off: the bounded queue the scanner pushes into, the sink seam,
//! and the task that drains one into the other.

pub mod queue;
pub mod sinks;

pub use queue::{AlertQueue, OverflowPolicy, PushOutcome};
pub use sinks::{FanoutSink, LogSink, TelegramSink, WebhookSink};

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;

use crate::error::SinkError;
use crate::scanner::rules::Signal;

/// Destination for admitted alerts. Failures are reported, never retried.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, signal: &Signal) -> Result<(), SinkError>;
}

/// Drains `queue` into `sink` until the queue is closed and empty.
pub async fn run_delivery(queue: Arc<AlertQueue>, sink: Arc<dyn AlertSink>) {
    while let Some(signal) = queue.pop().await {
        match sink.deliver(&signal).await {
            Ok(()) => debug!(
                target: "sink",
                "{} delivered {} {} {}",
                sink.name(),
                signal.symbol,
                signal.timeframe,
                signal.rule
            ),
            Err(e) => warn!(
                target: "sink",
                "{} failed to deliver {} {} {}: {}",
                sink.name(),
                signal.symbol,
                signal.timeframe,
                signal.rule,
                e
            ),
        }
    }
    debug!(target: "sink", "alert delivery stopped");
}

/// `[TS] PUMP | BTCUSDT 1m @ 105 | {"pct_change":5.0,"volume_ratio":4.0}`
pub fn format_alert(prefix: &str, signal: &Signal) -> String {
    let metrics = match serde_json::to_value(&signal.metrics) {
        Ok(Value::Object(map)) => {
            let rounded: serde_json::Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, round_value(v)))
                .collect();
            Value::Object(rounded).to_string()
        }
        _ => "{}".to_string(),
    };
    format!(
        "[{}] {} | {} {} @ {}{} | {}",
        prefix,
        signal.rule.label(),
        signal.symbol,
        signal.timeframe,
        format_price(signal.price),
        if signal.provisional { " (live)" } else { "" },
        metrics
    )
}

fn round_value(v: Value) -> Value {
    match v.as_f64() {
        Some(f) if f.is_finite() => {
            let r = (f * 10_000.0).round() / 10_000.0;
            serde_json::Number::from_f64(r)
                .map(Value::Number)
                .unwrap_or(v)
        }
        _ => v,
    }
}

/// Six significant digits, trailing zeros trimmed.
pub fn format_price(price: f64) -> String {
    if price == 0.0 || !price.is_finite() {
        return price.to_string();
    }
    let magnitude = price.abs().log10().floor() as i32 + 1;
    let decimals = (6 - magnitude).clamp(0, 12) as usize;
    let s = format!("{:.*}", decimals, price);
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::candle::Timeframe;
    use crate::scanner::rules::{RuleKind, SignalMetrics};
    use parking_lot::Mutex;

    fn signal() -> Signal {
        Signal {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::OneMinute,
            rule: RuleKind::PumpSpike,
            direction: RuleKind::PumpSpike.direction(),
            price: 105.0,
            volume: 40.0,
            quote_volume: None,
            typical_price: 104.0,
            timestamp: 0,
            strength: 1.5,
            metrics: SignalMetrics {
                pct_change: Some(5.000_000_01),
                volume_ratio: Some(4.0),
                ..SignalMetrics::default()
            },
            provisional: false,
        }
    }

    #[test]
    fn test_format_alert() {
        assert_eq!(
            format_alert("TS", &signal()),
            r#"[TS] PUMP | BTCUSDT 1m @ 105 | {"pct_change":5.0,"volume_ratio":4.0}"#
        );
    }

    #[test]
    fn test_format_price_significant_digits() {
        assert_eq!(format_price(64_123.456), "64123.5");
        assert_eq!(format_price(0.000_123_456_78), "0.000123457");
        assert_eq!(format_price(1.5), "1.5");
    }

    struct Failing;

    #[async_trait]
    impl AlertSink for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn deliver(&self, _signal: &Signal) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("down".to_string()))
        }
    }

    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl AlertSink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, signal: &Signal) -> Result<(), SinkError> {
            self.0.lock().push(signal.symbol.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivery_survives_sink_failure() {
        let queue = Arc::new(AlertQueue::new(8, OverflowPolicy::DropOldest));
        queue.push(signal());
        queue.push(signal());
        queue.close();
        run_delivery(queue.clone(), Arc::new(Failing)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_delivery_forwards_in_order() {
        let queue = Arc::new(AlertQueue::new(8, OverflowPolicy::DropOldest));
        let mut second = signal();
        second.symbol = "ETHUSDT".to_string();
        queue.push(signal());
        queue.push(second);
        queue.close();
        let sink = Arc::new(Recording(Mutex::new(Vec::new())));
        run_delivery(queue, sink.clone()).await;
        assert_eq!(*sink.0.lock(), vec!["BTCUSDT", "ETHUSDT"]);
    }
}
