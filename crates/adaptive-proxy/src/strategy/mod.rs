//! Delivery strategies: headless render, structured fetch, stream passthrough.

pub mod render;
pub mod stream;
pub mod structured;

use crate::cache::CacheKind;
use crate::response::ResponseDescriptor;

/// A strategy's result: the response, plus what (if anything) the
/// coordinator should write to the cache for this key.
pub struct StrategyOutput {
    pub descriptor: ResponseDescriptor,
    pub cache_write: Option<(CacheKind, String)>,
}

/// Which strategy the coordinator selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Render,
    Structured,
    Stream,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Render => "render",
            StrategyKind::Structured => "structured",
            StrategyKind::Stream => "stream",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
