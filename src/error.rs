use thiserror::Error;

use crate::scanner::candle::Timeframe;

#[derive(Error, Debug)]
pub enum TradeSeekerError {
    #[error("WebSocket error: {0}")]
    WebsocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Malformed kline payload: {0}")]
    MalformedKline(String),
}

/// Errors raised by the scanning core. None of them is fatal: each one is
/// scoped to a single candle of a single (symbol, timeframe) stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("malformed candle for {symbol} {timeframe}: {reason}")]
    MalformedCandle {
        symbol: String,
        timeframe: Timeframe,
        reason: String,
    },

    #[error("open time went backwards for {symbol} {timeframe}: got {open_time}, tail is {tail}")]
    TimeRegression {
        symbol: String,
        timeframe: Timeframe,
        open_time: i64,
        tail: i64,
    },

    #[error("candle for {symbol} has timeframe {got}, window expects {expected}")]
    TimeframeMismatch {
        symbol: String,
        expected: Timeframe,
        got: Timeframe,
    },

    #[error("timeframe {0} is not scanned")]
    UnscannedTimeframe(Timeframe),

    #[error("invalid EMA period {0}")]
    InvalidEmaPeriod(usize),

    #[error("scanner shard {0} is closed")]
    ShardClosed(usize),

    #[error("scanner shard {shard} is full, dropped {symbol} {timeframe} candle")]
    ShardFull {
        shard: usize,
        symbol: String,
        timeframe: Timeframe,
    },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sink responded with status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
