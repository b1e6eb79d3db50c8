//! Compaction filters — user hooks that drop or rewrite values as they
//! are rewritten by compaction.
//!
//! A filter sees each surviving `Value` entry once per compaction, at the
//! point where no live snapshot still needs an older version.  Returning
//! [`FilterDecision::Remove`] replaces the entry with a tombstone (so
//! older versions in files outside the compaction stay shadowed);
//! [`FilterDecision::Change`] rewrites the value in place.
//!
//! Merge operands are offered to [`CompactionFilter::filter_merge_operand`]
//! individually — the multi-operand variant of the value hook — and a
//! `true` return drops that operand from the chain.
//!
//! Filters are produced per compaction by a [`CompactionFilterFactory`],
//! so stateful filters get a fresh instance with the compaction's context.

use std::sync::Arc;

// ------------------------------------------------------------------------------------------------
// Decision
// ------------------------------------------------------------------------------------------------

/// What to do with one value during compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// Keep the entry unchanged.
    Keep,
    /// Replace the entry with a tombstone.
    Remove,
    /// Keep the key with a rewritten value.
    Change(Vec<u8>),
}

// ------------------------------------------------------------------------------------------------
// Traits
// ------------------------------------------------------------------------------------------------

/// Per-compaction value filter.
pub trait CompactionFilter: Send + Sync {
    /// Stable identifier for diagnostics.
    fn name(&self) -> &str;

    /// Decide the fate of a `Value` entry.
    fn filter(&self, level: usize, user_key: &[u8], value: &[u8]) -> FilterDecision;

    /// Decide whether a single merge operand is dropped from its chain.
    ///
    /// The default keeps every operand.
    fn filter_merge_operand(&self, _level: usize, _user_key: &[u8], _operand: &[u8]) -> bool {
        false
    }
}

/// Context handed to the factory for each compaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionFilterContext {
    /// The compaction covers the whole key space of the family.
    pub is_full_compaction: bool,
    /// The compaction was requested via `compact_range`.
    pub is_manual_compaction: bool,
}

/// Produces one filter instance per compaction.
pub trait CompactionFilterFactory: Send + Sync {
    /// Stable identifier for diagnostics.
    fn name(&self) -> &str;

    /// Create the filter for a compaction with the given context.
    fn create(&self, context: CompactionFilterContext) -> Arc<dyn CompactionFilter>;
}

/// Factory that hands out the same filter for every compaction.
pub struct FixedCompactionFilterFactory {
    filter: Arc<dyn CompactionFilter>,
}

impl FixedCompactionFilterFactory {
    /// Wrap a stateless filter.
    pub fn new(filter: Arc<dyn CompactionFilter>) -> Self {
        Self { filter }
    }
}

impl CompactionFilterFactory for FixedCompactionFilterFactory {
    fn name(&self) -> &str {
        "vesperdb.FixedCompactionFilterFactory"
    }

    fn create(&self, _context: CompactionFilterContext) -> Arc<dyn CompactionFilter> {
        Arc::clone(&self.filter)
    }
}
