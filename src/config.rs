//! YAML configuration.
//!
//! Loaded once at startup and turned into the read-only structures the scanner
//! consumes: a [`RuleBook`], one [`WindowSpec`] per timeframe and a [`TierTable`].
//! Rule thresholds have no built-in defaults; an enabled rule without them is
//! rejected.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alerts::OverflowPolicy;
use crate::error::ConfigError;
use crate::scanner::rules::{BreakoutParams, CrossParams, RuleBook, RuleKind, RuleParams, SpikeParams};
use crate::scanner::{
    Deduplicator, NotionalBasis, Scanner, Tier, TierFilter, TierTable, Timeframe, WindowSpec,
    WindowStore,
};

pub const CONFIG_ENV_VAR: &str = "TRADE_SEEKER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub symbols: SymbolsConfig,
    pub tiers: TiersConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    pub timeframes: BTreeMap<Timeframe, TimeframeConfig>,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolMode {
    Static,
    File,
    #[default]
    Exchange,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymbolsConfig {
    #[serde(default)]
    pub mode: SymbolMode,
    #[serde(default)]
    pub static_list: Vec<String>,
    pub file: Option<PathBuf>,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
}

impl Default for SymbolsConfig {
    fn default() -> Self {
        Self {
            mode: SymbolMode::default(),
            static_list: Vec::new(),
            file: None,
            quote_asset: default_quote_asset(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TiersConfig {
    #[serde(default)]
    pub notional_basis: NotionalBasis,
    pub thresholds: BTreeMap<Tier, f64>,
    #[serde(default)]
    pub symbols: BTreeMap<Tier, Vec<String>>,
    /// Floor for symbols missing from `symbols`. Unset means they never alert.
    pub unknown_min_notional: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmaConfig {
    #[serde(default = "default_ema_trend")]
    pub trend: usize,
    #[serde(default = "default_ema_fast")]
    pub fast: usize,
    #[serde(default = "default_ema_slow")]
    pub slow: usize,
}

impl Default for EmaConfig {
    fn default() -> Self {
        Self {
            trend: default_ema_trend(),
            fast: default_ema_fast(),
            slow: default_ema_slow(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmaOverride {
    pub trend: Option<usize>,
    pub fast: Option<usize>,
    pub slow: Option<usize>,
}

impl EmaConfig {
    fn merged(&self, over: Option<&EmaOverride>) -> EmaConfig {
        match over {
            None => *self,
            Some(o) => EmaConfig {
                trend: o.trend.unwrap_or(self.trend),
                fast: o.fast.unwrap_or(self.fast),
                slow: o.slow.unwrap_or(self.slow),
            },
        }
    }
}

/// Pump/dump section. Every field is optional so a timeframe can override
/// just the ones it changes.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpikeRuleConfig {
    pub enabled: Option<bool>,
    pub price_pct_threshold: Option<f64>,
    pub volume_multiplier: Option<f64>,
    pub lookback_bars: Option<usize>,
    pub volume_lookback_bars: Option<usize>,
    pub cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakoutRuleConfig {
    pub enabled: Option<bool>,
    pub range_lookback_bars: Option<usize>,
    pub buffer_pct: Option<f64>,
    pub volume_multiplier: Option<f64>,
    pub volume_lookback_bars: Option<usize>,
    pub cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrossRuleConfig {
    pub enabled: Option<bool>,
    pub volume_multiplier: Option<f64>,
    pub volume_lookback_bars: Option<usize>,
    pub cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    #[serde(default)]
    pub ema: EmaConfig,
    /// Cooldown for rules that do not set their own.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    pub pump_spike: Option<SpikeRuleConfig>,
    pub dump_spike: Option<SpikeRuleConfig>,
    pub breakout_up: Option<BreakoutRuleConfig>,
    pub breakdown_down: Option<BreakoutRuleConfig>,
    pub ema_cross_up: Option<CrossRuleConfig>,
    pub ema_cross_down: Option<CrossRuleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeframeConfig {
    /// Minimum window length; raised automatically to what the rules need.
    pub window_size: Option<usize>,
    pub ema: Option<EmaOverride>,
    pub pump_spike: Option<SpikeRuleConfig>,
    pub dump_spike: Option<SpikeRuleConfig>,
    pub breakout_up: Option<BreakoutRuleConfig>,
    pub breakdown_down: Option<BreakoutRuleConfig>,
    pub ema_cross_up: Option<CrossRuleConfig>,
    pub ema_cross_down: Option<CrossRuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScannerConfig {
    #[serde(default = "default_shards")]
    pub shards: usize,
    #[serde(default = "default_shard_buffer")]
    pub shard_buffer: usize,
    #[serde(default = "default_feed_buffer")]
    pub feed_buffer: usize,
    #[serde(default)]
    pub fast_path_spikes: bool,
    #[serde(default = "default_retention_secs")]
    pub dedup_retention_secs: u64,
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            shard_buffer: default_shard_buffer(),
            feed_buffer: default_feed_buffer(),
            fast_path_spikes: false,
            dedup_retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertsConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_true")]
    pub log: bool,
    #[serde(default)]
    pub telegram: TelegramConfig,
    pub webhook: Option<WebhookConfig>,
    #[serde(default = "default_sink_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            overflow: OverflowPolicy::default(),
            prefix: default_prefix(),
            log: true,
            telegram: TelegramConfig::default(),
            webhook: None,
            timeout_secs: default_sink_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pause between consecutive Telegram messages, 0 for none.
    #[serde(default)]
    pub throttle_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            throttle_ms: 0,
        }
    }
}

impl TelegramConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_streams_per_connection")]
    pub streams_per_connection: usize,
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_delay_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            rest_url: default_rest_url(),
            streams_per_connection: default_streams_per_connection(),
            reconnect_delay_secs: default_reconnect_secs(),
        }
    }
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}
fn default_ema_trend() -> usize {
    20
}
fn default_ema_fast() -> usize {
    9
}
fn default_ema_slow() -> usize {
    20
}
fn default_cooldown_secs() -> u64 {
    20 * 60
}
fn default_lookback_bars() -> usize {
    1
}
fn default_volume_lookback_bars() -> usize {
    20
}
fn default_range_lookback_bars() -> usize {
    20
}
fn default_shards() -> usize {
    8
}
fn default_shard_buffer() -> usize {
    1_024
}
fn default_feed_buffer() -> usize {
    4_096
}
fn default_retention_secs() -> u64 {
    2 * 60 * 60
}
fn default_sweep_secs() -> u64 {
    5 * 60
}
fn default_queue_capacity() -> usize {
    1_024
}
fn default_prefix() -> String {
    "TS".to_string()
}
fn default_true() -> bool {
    true
}
fn default_sink_timeout_secs() -> u64 {
    6
}
fn default_ws_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}
fn default_rest_url() -> String {
    "https://api.binance.com".to_string()
}
fn default_streams_per_connection() -> usize {
    200
}
fn default_reconnect_secs() -> u64 {
    5
}

/// Everything the scanner needs, resolved and validated.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub rules: RuleBook,
    pub windows: HashMap<Timeframe, WindowSpec>,
    pub tiers: TierTable,
    pub notional_basis: NotionalBasis,
    pub default_cooldown: Duration,
    pub retention: Duration,
    pub fast_path_spikes: bool,
}

impl ScanPlan {
    pub fn build_scanner(&self) -> Scanner {
        let dedup = Deduplicator::new(self.rules.cooldowns(), self.default_cooldown, self.retention);
        Scanner::new(
            self.rules.clone(),
            WindowStore::new(self.windows.clone()),
            TierFilter::new(self.tiers.clone(), self.notional_basis),
            dedup,
        )
        .with_fast_path_spikes(self.fast_path_spikes)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parses only. Semantic checks happen once, in [`Config::plan`].
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Resolves per-timeframe overrides and checks every section, reporting
    /// all problems at once.
    pub fn plan(&self) -> Result<ScanPlan, ConfigError> {
        let mut errors = Vec::new();

        let mut book = RuleBook::new();
        let mut windows = HashMap::new();

        if self.timeframes.is_empty() {
            errors.push("at least one timeframe must be configured".to_string());
        }

        for (rule, section) in self.base_cooldowns() {
            if let Some(secs) = section {
                book = book.with_cooldown(rule, Duration::from_secs(secs));
            }
        }

        for (tf, tf_cfg) in &self.timeframes {
            let ema = self.rules.ema.merged(tf_cfg.ema.as_ref());
            if ema.trend == 0 || ema.fast == 0 || ema.slow == 0 {
                errors.push(format!("{}: EMA periods must be at least 1", tf));
            }

            let resolved = [
                (RuleKind::PumpSpike, resolve_spike(self.rules.pump_spike, tf_cfg.pump_spike)),
                (RuleKind::DumpSpike, resolve_spike(self.rules.dump_spike, tf_cfg.dump_spike)),
                (
                    RuleKind::BreakoutUp,
                    resolve_breakout(self.rules.breakout_up, tf_cfg.breakout_up),
                ),
                (
                    RuleKind::BreakdownDown,
                    resolve_breakout(self.rules.breakdown_down, tf_cfg.breakdown_down),
                ),
                (
                    RuleKind::EmaCrossUp,
                    resolve_cross(self.rules.ema_cross_up, tf_cfg.ema_cross_up),
                ),
                (
                    RuleKind::EmaCrossDown,
                    resolve_cross(self.rules.ema_cross_down, tf_cfg.ema_cross_down),
                ),
            ];

            let mut cross_enabled = false;
            for (rule, result) in resolved {
                match result {
                    Ok(Some(params)) => {
                        cross_enabled |= matches!(params, RuleParams::Cross(_));
                        book = book.with_rule(rule, *tf, params);
                    }
                    Ok(None) => {}
                    Err(e) => errors.push(format!("{} {}: {}", tf, rule, e)),
                }
            }
            if tf_cfg_sets_cooldown(tf_cfg) {
                errors.push(format!(
                    "{}: cooldown_secs is set per rule kind under `rules`, not per timeframe",
                    tf
                ));
            }
            if cross_enabled && ema.fast >= ema.slow {
                errors.push(format!("{}: EMA fast period must be below slow period", tf));
            }
            if tf_cfg.window_size == Some(0) {
                errors.push(format!("{}: window_size must be at least 1", tf));
            }

            let mut capacity = tf_cfg
                .window_size
                .unwrap_or(0)
                .max(ema.trend)
                .max(book.required_history(*tf));
            if cross_enabled {
                capacity = capacity.max(ema.slow + 1).max(ema.fast + 1);
            }
            windows.insert(
                *tf,
                WindowSpec {
                    capacity,
                    trend_period: ema.trend.max(1),
                    fast_period: ema.fast.max(1),
                    slow_period: ema.slow.max(1),
                },
            );
        }

        let tiers = self.tier_table(&mut errors);

        if self.scanner.shards == 0 {
            errors.push("scanner.shards must be at least 1".to_string());
        }
        if self.scanner.sweep_interval_secs == 0 {
            errors.push("scanner.sweep_interval_secs must be at least 1".to_string());
        }
        if self.alerts.queue_capacity == 0 {
            errors.push("alerts.queue_capacity must be at least 1".to_string());
        }
        if !(1..=1024).contains(&self.feed.streams_per_connection) {
            errors.push("feed.streams_per_connection must be within 1..=1024".to_string());
        }
        if self.symbols.mode == SymbolMode::Static && self.symbols.static_list.is_empty() {
            errors.push("symbols.static_list is empty while symbols.mode is static".to_string());
        }
        if self.symbols.mode == SymbolMode::File && self.symbols.file.is_none() {
            errors.push("symbols.file is required when symbols.mode is file".to_string());
        }

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors.join("; ")));
        }

        Ok(ScanPlan {
            rules: book,
            windows,
            tiers,
            notional_basis: self.tiers.notional_basis,
            default_cooldown: Duration::from_secs(self.rules.cooldown_secs),
            retention: Duration::from_secs(self.scanner.dedup_retention_secs),
            fast_path_spikes: self.scanner.fast_path_spikes,
        })
    }

    fn base_cooldowns(&self) -> [(RuleKind, Option<u64>); 6] {
        let r = &self.rules;
        [
            (RuleKind::PumpSpike, r.pump_spike.and_then(|c| c.cooldown_secs)),
            (RuleKind::DumpSpike, r.dump_spike.and_then(|c| c.cooldown_secs)),
            (RuleKind::BreakoutUp, r.breakout_up.and_then(|c| c.cooldown_secs)),
            (RuleKind::BreakdownDown, r.breakdown_down.and_then(|c| c.cooldown_secs)),
            (RuleKind::EmaCrossUp, r.ema_cross_up.and_then(|c| c.cooldown_secs)),
            (RuleKind::EmaCrossDown, r.ema_cross_down.and_then(|c| c.cooldown_secs)),
        ]
    }

    fn tier_table(&self, errors: &mut Vec<String>) -> TierTable {
        let mut table = TierTable::new();

        for (tier, min) in &self.tiers.thresholds {
            if *tier == Tier::Unknown {
                errors.push("tiers.thresholds: use unknown_min_notional for Unknown".to_string());
                continue;
            }
            if !min.is_finite() || *min < 0.0 {
                errors.push(format!("tiers.thresholds.{}: must be a non-negative number", tier));
                continue;
            }
            table = table.with_threshold(*tier, *min);
        }

        let mut seen = HashSet::new();
        for (tier, symbols) in &self.tiers.symbols {
            if *tier == Tier::Unknown {
                errors.push("tiers.symbols: symbols cannot be assigned to Unknown".to_string());
                continue;
            }
            if !self.tiers.thresholds.contains_key(tier) {
                errors.push(format!("tiers.symbols.{}: tier has no threshold", tier));
            }
            for symbol in symbols {
                let symbol = symbol.trim().to_uppercase();
                if !seen.insert(symbol.clone()) {
                    errors.push(format!("tiers.symbols: {} is listed more than once", symbol));
                    continue;
                }
                table = table.with_symbol(symbol, *tier);
            }
        }

        if let Some(min) = self.tiers.unknown_min_notional {
            let strictest = table.strictest_threshold();
            if !min.is_finite() || min < 0.0 {
                errors.push("tiers.unknown_min_notional must be a non-negative number".to_string());
            } else if min < strictest {
                errors.push(format!(
                    "tiers.unknown_min_notional ({}) is below the strictest tier floor ({})",
                    min, strictest
                ));
            } else {
                table = table.with_unknown_min_notional(min);
            }
        }

        table
    }
}

fn tf_cfg_sets_cooldown(c: &TimeframeConfig) -> bool {
    c.pump_spike.is_some_and(|s| s.cooldown_secs.is_some())
        || c.dump_spike.is_some_and(|s| s.cooldown_secs.is_some())
        || c.breakout_up.is_some_and(|s| s.cooldown_secs.is_some())
        || c.breakdown_down.is_some_and(|s| s.cooldown_secs.is_some())
        || c.ema_cross_up.is_some_and(|s| s.cooldown_secs.is_some())
        || c.ema_cross_down.is_some_and(|s| s.cooldown_secs.is_some())
}

fn resolve_spike(
    base: Option<SpikeRuleConfig>,
    over: Option<SpikeRuleConfig>,
) -> Result<Option<RuleParams>, String> {
    if base.is_none() && over.is_none() {
        return Ok(None);
    }
    let b = base.unwrap_or_default();
    let o = over.unwrap_or_default();
    if !o.enabled.or(b.enabled).unwrap_or(true) {
        return Ok(None);
    }

    let price_pct_threshold = o
        .price_pct_threshold
        .or(b.price_pct_threshold)
        .ok_or("price_pct_threshold is required")?;
    let volume_multiplier = o
        .volume_multiplier
        .or(b.volume_multiplier)
        .ok_or("volume_multiplier is required")?;
    let params = SpikeParams {
        price_pct_threshold,
        volume_multiplier,
        lookback_bars: o
            .lookback_bars
            .or(b.lookback_bars)
            .unwrap_or_else(default_lookback_bars),
        volume_lookback_bars: o
            .volume_lookback_bars
            .or(b.volume_lookback_bars)
            .unwrap_or_else(default_volume_lookback_bars),
    };

    if !params.price_pct_threshold.is_finite() || params.price_pct_threshold == 0.0 {
        return Err("price_pct_threshold must be a non-zero number".to_string());
    }
    if !params.volume_multiplier.is_finite() || params.volume_multiplier <= 0.0 {
        return Err("volume_multiplier must be positive".to_string());
    }
    if params.lookback_bars == 0 || params.volume_lookback_bars == 0 {
        return Err("lookback_bars and volume_lookback_bars must be at least 1".to_string());
    }
    Ok(Some(RuleParams::Spike(params)))
}

fn resolve_breakout(
    base: Option<BreakoutRuleConfig>,
    over: Option<BreakoutRuleConfig>,
) -> Result<Option<RuleParams>, String> {
    if base.is_none() && over.is_none() {
        return Ok(None);
    }
    let b = base.unwrap_or_default();
    let o = over.unwrap_or_default();
    if !o.enabled.or(b.enabled).unwrap_or(true) {
        return Ok(None);
    }

    let buffer_pct = o
        .buffer_pct
        .or(b.buffer_pct)
        .ok_or("buffer_pct is required")?;
    let params = BreakoutParams {
        range_lookback_bars: o
            .range_lookback_bars
            .or(b.range_lookback_bars)
            .unwrap_or_else(default_range_lookback_bars),
        buffer_pct,
        volume_multiplier: o.volume_multiplier.or(b.volume_multiplier).unwrap_or(0.0),
        volume_lookback_bars: o
            .volume_lookback_bars
            .or(b.volume_lookback_bars)
            .unwrap_or_else(default_volume_lookback_bars),
    };

    if !params.buffer_pct.is_finite() || params.buffer_pct < 0.0 {
        return Err("buffer_pct must be a non-negative number".to_string());
    }
    if !params.volume_multiplier.is_finite() || params.volume_multiplier < 0.0 {
        return Err("volume_multiplier must be a non-negative number".to_string());
    }
    if params.range_lookback_bars == 0 || params.volume_lookback_bars == 0 {
        return Err("range_lookback_bars and volume_lookback_bars must be at least 1".to_string());
    }
    Ok(Some(RuleParams::Breakout(params)))
}

fn resolve_cross(
    base: Option<CrossRuleConfig>,
    over: Option<CrossRuleConfig>,
) -> Result<Option<RuleParams>, String> {
    if base.is_none() && over.is_none() {
        return Ok(None);
    }
    let b = base.unwrap_or_default();
    let o = over.unwrap_or_default();
    if !o.enabled.or(b.enabled).unwrap_or(true) {
        return Ok(None);
    }

    let params = CrossParams {
        volume_multiplier: o.volume_multiplier.or(b.volume_multiplier).unwrap_or(0.0),
        volume_lookback_bars: o
            .volume_lookback_bars
            .or(b.volume_lookback_bars)
            .unwrap_or_else(default_volume_lookback_bars),
    };
    if !params.volume_multiplier.is_finite() || params.volume_multiplier < 0.0 {
        return Err("volume_multiplier must be a non-negative number".to_string());
    }
    if params.volume_lookback_bars == 0 {
        return Err("volume_lookback_bars must be at least 1".to_string());
    }
    Ok(Some(RuleParams::Cross(params)))
}
