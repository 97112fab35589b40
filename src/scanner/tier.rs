//! Tier-based minimum-notional filtering.

use dashmap::DashSet;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::rules::Signal;

/// Symbol classification. `Unknown` is never configured directly: it is what
/// a symbol absent from the tier map resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    S,
    A,
    B,
    C,
    D,
    Unknown,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::S => "S",
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
            Tier::D => "D",
            Tier::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// How a signal's notional is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotionalBasis {
    /// close * volume
    #[default]
    Close,
    /// (high + low + close) / 3 * volume
    Typical,
    /// Exchange-reported quote volume, close * volume when absent.
    QuoteVolume,
}

impl NotionalBasis {
    pub fn notional(&self, signal: &Signal) -> f64 {
        match self {
            NotionalBasis::Close => signal.price * signal.volume,
            NotionalBasis::Typical => signal.typical_price * signal.volume,
            NotionalBasis::QuoteVolume => signal
                .quote_volume
                .unwrap_or(signal.price * signal.volume),
        }
    }
}

/// Read-only symbol -> tier -> minimum notional lookup.
#[derive(Debug, Clone, Default)]
pub struct TierTable {
    symbols: HashMap<String, Tier>,
    thresholds: HashMap<Tier, f64>,
    unknown_min_notional: Option<f64>,
}

impl TierTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, tier: Tier, min_notional: f64) -> Self {
        self.thresholds.insert(tier, min_notional);
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>, tier: Tier) -> Self {
        self.symbols.insert(symbol.into(), tier);
        self
    }

    /// Floor for unclassified symbols. Without it they never alert. Never
    /// below the strictest configured tier.
    pub fn with_unknown_min_notional(mut self, min_notional: f64) -> Self {
        self.unknown_min_notional = Some(min_notional);
        self
    }

    pub fn tier_of(&self, symbol: &str) -> Tier {
        self.symbols.get(symbol).copied().unwrap_or(Tier::Unknown)
    }

    /// Minimum notional for `tier`; +inf when nothing is configured for it.
    pub fn min_notional(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Unknown => match self.unknown_min_notional {
                Some(min) => min.max(self.strictest_threshold()),
                None => f64::INFINITY,
            },
            _ => self.thresholds.get(&tier).copied().unwrap_or(f64::INFINITY),
        }
    }

    /// Largest configured tier floor, 0 when no tier has one.
    pub fn strictest_threshold(&self) -> f64 {
        self.thresholds.values().copied().fold(0.0, f64::max)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierVerdict {
    pub tier: Tier,
    pub notional: f64,
    pub min_notional: f64,
    pub passed: bool,
}

pub struct TierFilter {
    table: TierTable,
    basis: NotionalBasis,
    reported_unknown: DashSet<String>,
}

impl TierFilter {
    pub fn new(table: TierTable, basis: NotionalBasis) -> Self {
        Self {
            table,
            basis,
            reported_unknown: DashSet::new(),
        }
    }

    pub fn table(&self) -> &TierTable {
        &self.table
    }

    pub fn check(&self, signal: &Signal) -> TierVerdict {
        let tier = self.table.tier_of(&signal.symbol);
        if tier == Tier::Unknown && self.reported_unknown.insert(signal.symbol.clone()) {
            warn!(
                target: "rule",
                "{} has no tier, applying strictest floor {}",
                signal.symbol,
                self.table.min_notional(Tier::Unknown)
            );
        }
        let notional = self.basis.notional(signal);
        let min_notional = self.table.min_notional(tier);
        TierVerdict {
            tier,
            notional,
            min_notional,
            passed: notional >= min_notional,
        }
    }

    /// Inclusive: a notional equal to the floor passes.
    pub fn passes(&self, signal: &Signal) -> bool {
        self.check(signal).passed
    }
}
