use futures_util::StreamExt;
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite;

use crate::config::FeedConfig;
use crate::error::TradeSeekerError;
use crate::scanner::candle::{Candle, Timeframe};

#[derive(Debug, Deserialize)]
struct KlineEnvelope {
    stream: String,
    data: KlineEvent,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "q")]
    quote_volume: Option<String>,
    #[serde(rename = "x")]
    is_closed: bool,
}

/// `btcusdt@kline_1m` for every symbol and timeframe.
pub fn stream_names(symbols: &[String], timeframes: &[Timeframe]) -> Vec<String> {
    symbols
        .iter()
        .flat_map(|s| {
            timeframes
                .iter()
                .map(move |tf| format!("{}@kline_{}", s.to_lowercase(), tf))
        })
        .collect()
}

pub fn combined_stream_url(ws_base: &str, streams: &[String]) -> String {
    format!(
        "{}/stream?streams={}",
        ws_base.trim_end_matches('/'),
        streams.join("/")
    )
}

/// Parses one combined-stream kline message into a [`Candle`].
pub fn parse_kline_message(text: &str) -> Result<Candle, TradeSeekerError> {
    let envelope: KlineEnvelope = serde_json::from_str(text)?;
    let event = envelope.data;
    if event.event_type != "kline" {
        return Err(TradeSeekerError::MalformedKline(format!(
            "{}: unexpected event {}",
            envelope.stream, event.event_type
        )));
    }

    let k = event.kline;
    let timeframe: Timeframe = k
        .interval
        .parse()
        .map_err(|e: String| TradeSeekerError::MalformedKline(format!("{}: {}", envelope.stream, e)))?;
    let quote_volume = match k.quote_volume.as_deref() {
        Some(q) => Some(parse_number("q", q)?),
        None => None,
    };

    Ok(Candle {
        symbol: event.symbol.to_uppercase(),
        timeframe,
        open_time: k.open_time,
        open: parse_number("o", &k.open)?,
        high: parse_number("h", &k.high)?,
        low: parse_number("l", &k.low)?,
        close: parse_number("c", &k.close)?,
        volume: parse_number("v", &k.volume)?,
        quote_volume,
        is_closed: k.is_closed,
    })
}

fn parse_number(field: &str, raw: &str) -> Result<f64, TradeSeekerError> {
    raw.parse::<f64>()
        .map_err(|_| TradeSeekerError::MalformedKline(format!("field {} is not a number: {:?}", field, raw)))
}

/// Runs one WebSocket session until the server closes it or it errors.
pub async fn connect_to_klines(
    url: &str,
    sender: &mpsc::Sender<Candle>,
) -> Result<(), TradeSeekerError> {
    info!(target: "feed", "Connecting to Binance WebSocket: {}", url);

    let (mut ws_stream, _) = connect_async(url).await?;
    info!(target: "feed", "Successfully connected to WebSocket");

    while let Some(message) = ws_stream.next().await {
        match message? {
            tungstenite::protocol::Message::Text(text) => match parse_kline_message(&text) {
                Ok(candle) => {
                    if sender.send(candle).await.is_err() {
                        debug!(target: "feed", "candle receiver dropped, closing connection");
                        return Ok(());
                    }
                }
                Err(e) => warn!(target: "feed", "Failed to parse kline data: {}", e),
            },
            tungstenite::protocol::Message::Close(_) => {
                info!(target: "feed", "WebSocket connection closed");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

/// Keeps one connection alive, reconnecting after `reconnect_delay`, until
/// the candle receiver goes away.
pub async fn run_kline_feed(
    url: String,
    sender: mpsc::Sender<Candle>,
    reconnect_delay: Duration,
) {
    loop {
        if let Err(e) = connect_to_klines(&url, &sender).await {
            error!(target: "feed", "WebSocket error: {}", e);
        }
        if sender.is_closed() {
            break;
        }
        warn!(
            target: "feed",
            "reconnecting in {}s",
            reconnect_delay.as_secs()
        );
        tokio::time::sleep(reconnect_delay).await;
    }
}

/// Splits every (symbol, timeframe) stream across connections of at most
/// `streams_per_connection` streams and starts one feed task per connection.
pub fn spawn_feeds(
    config: &FeedConfig,
    symbols: &[String],
    timeframes: &[Timeframe],
    sender: mpsc::Sender<Candle>,
) -> Vec<JoinHandle<()>> {
    let streams = stream_names(symbols, timeframes);
    let delay = Duration::from_secs(config.reconnect_delay_secs.max(1));

    streams
        .chunks(config.streams_per_connection.max(1))
        .map(|chunk| {
            let url = combined_stream_url(&config.ws_url, chunk);
            tokio::spawn(run_kline_feed(url, sender.clone(), delay))
        })
        .collect()
}
