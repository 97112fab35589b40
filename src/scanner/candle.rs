use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScanError;

/// Kline intervals scanned on Binance spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    EightHours,
    TwelveHours,
    OneDay,
}

impl Timeframe {
    pub const ALL: [Timeframe; 12] = [
        Timeframe::OneMinute,
        Timeframe::ThreeMinutes,
        Timeframe::FiveMinutes,
        Timeframe::FifteenMinutes,
        Timeframe::ThirtyMinutes,
        Timeframe::OneHour,
        Timeframe::TwoHours,
        Timeframe::FourHours,
        Timeframe::SixHours,
        Timeframe::EightHours,
        Timeframe::TwelveHours,
        Timeframe::OneDay,
    ];

    pub fn as_secs(&self) -> i64 {
        match self {
            Timeframe::OneMinute => 60,
            Timeframe::ThreeMinutes => 180,
            Timeframe::FiveMinutes => 300,
            Timeframe::FifteenMinutes => 900,
            Timeframe::ThirtyMinutes => 1_800,
            Timeframe::OneHour => 3_600,
            Timeframe::TwoHours => 7_200,
            Timeframe::FourHours => 14_400,
            Timeframe::SixHours => 21_600,
            Timeframe::EightHours => 28_800,
            Timeframe::TwelveHours => 43_200,
            Timeframe::OneDay => 86_400,
        }
    }

    pub fn as_millis(&self) -> i64 {
        self.as_secs() * 1_000
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::ThreeMinutes => "3m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::ThirtyMinutes => "30m",
            Timeframe::OneHour => "1h",
            Timeframe::TwoHours => "2h",
            Timeframe::FourHours => "4h",
            Timeframe::SixHours => "6h",
            Timeframe::EightHours => "8h",
            Timeframe::TwelveHours => "12h",
            Timeframe::OneDay => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| format!("unsupported timeframe '{}'", s))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}

/// Identity of one independently scanned stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl StreamKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.symbol, self.timeframe)
    }
}

/// One OHLCV update from the feed. `open_time` is the exchange-assigned bar
/// start in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: Option<f64>,
    pub is_closed: bool,
}

impl Candle {
    pub fn key(&self) -> StreamKey {
        StreamKey::new(self.symbol.clone(), self.timeframe)
    }

    pub fn close_time(&self) -> i64 {
        self.open_time + self.timeframe.as_millis()
    }

    /// Rejects candles that would corrupt rolling state.
    pub fn validate(&self) -> Result<(), ScanError> {
        let malformed = |reason: &str| ScanError::MalformedCandle {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            reason: reason.to_string(),
        };

        if self.symbol.trim().is_empty() {
            return Err(malformed("empty symbol"));
        }
        let values = [self.open, self.high, self.low, self.close, self.volume];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(malformed("non-finite price or volume"));
        }
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(malformed("non-positive price"));
        }
        if self.volume < 0.0 {
            return Err(malformed("negative volume"));
        }
        if let Some(q) = self.quote_volume {
            if !q.is_finite() || q < 0.0 {
                return Err(malformed("invalid quote volume"));
            }
        }
        if self.high < self.open.max(self.close).max(self.low) {
            return Err(malformed("high below open/close/low"));
        }
        if self.low > self.open.min(self.close) {
            return Err(malformed("low above open/close"));
        }
        if self.open_time < 0 || self.open_time % self.timeframe.as_millis() != 0 {
            return Err(malformed("open time not aligned to timeframe"));
        }
        Ok(())
    }
}

/// The persisted part of a closed candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bar {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: Option<f64>,
}

impl Bar {
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

impl From<&Candle> for Bar {
    fn from(c: &Candle) -> Self {
        Self {
            open_time: c.open_time,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            quote_volume: c.quote_volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle() -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::OneMinute,
            open_time: 1_700_000_040_000,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
            quote_volume: Some(1_005.0),
            is_closed: true,
        }
    }

    #[test]
    fn test_timeframe_parse_roundtrip() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>(), Ok(tf));
        }
        assert!("7m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_valid_candle_passes() {
        assert!(candle().validate().is_ok());
        assert_eq!(candle().close_time(), 1_700_000_100_000);
    }

    #[test]
    fn test_inverted_range_is_malformed() {
        let mut c = candle();
        c.high = 98.0;
        assert!(matches!(c.validate(), Err(ScanError::MalformedCandle { .. })));
    }

    #[test]
    fn test_nan_is_malformed() {
        let mut c = candle();
        c.close = f64::NAN;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_misaligned_open_time_is_malformed() {
        let mut c = candle();
        c.open_time += 1_500;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_empty_symbol_is_malformed() {
        let mut c = candle();
        c.symbol = "  ".to_string();
        assert!(c.validate().is_err());
    }
}
