//! The streaming rule-evaluation engine.
//!
//! Data flow: candle -> [`window::WindowStore`] -> [`rules`] -> [`tier::TierFilter`]
//! -> [`dedup::Deduplicator`] -> alert queue. [`orchestrator::Scanner`] wires the
//! stages; [`runtime::ScannerRuntime`] runs it on sharded worker tasks.

pub mod candle;
pub mod dedup;
pub mod orchestrator;
pub mod rules;
pub mod runtime;
pub mod tier;
pub mod window;

pub use candle::{Candle, StreamKey, Timeframe};
pub use dedup::Deduplicator;
pub use orchestrator::{ScanOutcome, Scanner};
pub use rules::{Direction, RuleBook, RuleKind, RuleParams, Signal};
pub use runtime::ScannerRuntime;
pub use tier::{NotionalBasis, Tier, TierFilter, TierTable};
pub use window::{StreamPhase, WindowSpec, WindowStore};
