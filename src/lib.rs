//! Multi-symbol spot scanner: pump/dump spikes, range breakouts and EMA
//! crosses over Binance kline streams, filtered by tier and cooled down per
//! (symbol, timeframe, rule).

pub mod alerts;
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod scanner;
