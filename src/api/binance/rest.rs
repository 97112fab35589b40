//! USDT symbol discovery.

use log::{info, warn};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::config::{SymbolMode, SymbolsConfig};
use crate::error::TradeSeekerError;

pub const FALLBACK_SYMBOLS: [&str; 3] = ["BTCUSDT", "ETHUSDT", "SOLUSDT"];

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    quote_asset: String,
}

fn trading_symbols(info: ExchangeInfo, quote_asset: &str) -> Vec<String> {
    info.symbols
        .into_iter()
        .filter(|s| s.status == "TRADING" && s.quote_asset.eq_ignore_ascii_case(quote_asset))
        .map(|s| s.symbol.to_uppercase())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Every symbol currently trading against `quote_asset`.
pub async fn fetch_exchange_symbols(
    rest_url: &str,
    quote_asset: &str,
    timeout: Duration,
) -> Result<Vec<String>, TradeSeekerError> {
    let url = format!("{}/api/v3/exchangeInfo", rest_url.trim_end_matches('/'));
    info!(target: "http", "GET {}", url);

    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let info: ExchangeInfo = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(trading_symbols(info, quote_asset))
}

/// One symbol per line; blank lines, `#` comments and other quote assets are skipped.
pub fn parse_symbol_list(text: &str, quote_asset: &str) -> Vec<String> {
    let suffix = quote_asset.to_uppercase();
    text.lines()
        .map(|l| l.trim().to_uppercase())
        .filter(|l| !l.is_empty() && !l.starts_with('#') && l.ends_with(&suffix))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn read_symbol_file(path: &Path, quote_asset: &str) -> Result<Vec<String>, TradeSeekerError> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_symbol_list(&text, quote_asset))
}

/// Resolves the symbol universe. File and exchange sources fall back to
/// each other, then to [`FALLBACK_SYMBOLS`].
pub async fn resolve_symbols(config: &SymbolsConfig, rest_url: &str, timeout: Duration) -> Vec<String> {
    let quote = config.quote_asset.as_str();

    if config.mode == SymbolMode::Static {
        let text = config.static_list.join("\n");
        return parse_symbol_list(&text, quote);
    }

    let order = match config.mode {
        SymbolMode::File => [SymbolMode::File, SymbolMode::Exchange],
        _ => [SymbolMode::Exchange, SymbolMode::File],
    };

    for source in order {
        let found = match source {
            SymbolMode::File => match &config.file {
                Some(path) => read_symbol_file(path, quote).map_err(|e| {
                    warn!(target: "cfg", "cannot read symbol file {}: {}", path.display(), e);
                }),
                None => continue,
            },
            _ => fetch_exchange_symbols(rest_url, quote, timeout)
                .await
                .map_err(|e| warn!(target: "http", "exchangeInfo failed: {}", e)),
        };
        match found {
            Ok(symbols) if !symbols.is_empty() => {
                info!(target: "cfg", "{} {} symbols from {:?}", symbols.len(), quote, source);
                return symbols;
            }
            Ok(_) => warn!(target: "cfg", "{:?} source returned no {} symbols", source, quote),
            Err(()) => {}
        }
    }

    warn!(target: "cfg", "using fallback symbols {:?}", FALLBACK_SYMBOLS);
    FALLBACK_SYMBOLS.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_exchange_info_filter() {
        let info: ExchangeInfo = serde_json::from_str(
            r#"{"timezone":"UTC","symbols":[
                {"symbol":"ETHUSDT","status":"TRADING","baseAsset":"ETH","quoteAsset":"USDT"},
                {"symbol":"BTCUSDT","status":"TRADING","baseAsset":"BTC","quoteAsset":"USDT"},
                {"symbol":"LUNAUSDT","status":"BREAK","baseAsset":"LUNA","quoteAsset":"USDT"},
                {"symbol":"ETHBTC","status":"TRADING","baseAsset":"ETH","quoteAsset":"BTC"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(trading_symbols(info, "USDT"), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_parse_symbol_list() {
        let text = "# majors\nbtcusdt\n\nETHBTC\n  SOLUSDT  \nBTCUSDT\n";
        assert_eq!(parse_symbol_list(text, "USDT"), vec!["BTCUSDT", "SOLUSDT"]);
    }

    #[tokio::test]
    async fn test_static_mode() {
        let config = SymbolsConfig {
            mode: SymbolMode::Static,
            static_list: vec!["ethusdt".to_string(), "BTCUSDT".to_string()],
            ..SymbolsConfig::default()
        };
        let symbols = resolve_symbols(&config, "http://127.0.0.1:9", Duration::from_millis(50)).await;
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[tokio::test]
    async fn test_file_mode_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "DOGEUSDT\nADAUSDT").unwrap();
        let config = SymbolsConfig {
            mode: SymbolMode::File,
            file: Some(file.path().to_path_buf()),
            ..SymbolsConfig::default()
        };
        let symbols = resolve_symbols(&config, "http://127.0.0.1:9", Duration::from_millis(50)).await;
        assert_eq!(symbols, vec!["ADAUSDT", "DOGEUSDT"]);
    }

    #[tokio::test]
    async fn test_unreachable_sources_fall_back() {
        let config = SymbolsConfig {
            mode: SymbolMode::File,
            file: Some("/definitely/not/here.txt".into()),
            ..SymbolsConfig::default()
        };
        let symbols = resolve_symbols(&config, "http://127.0.0.1:9", Duration::from_millis(200)).await;
        assert_eq!(symbols, FALLBACK_SYMBOLS.to_vec());
    }
}
