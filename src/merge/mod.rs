//! User-defined merge semantics.
//!
//! A **merge operand** (`ValueType::Merge`) is a deferred read-modify-write:
//! instead of reading the current value, combining, and writing a full
//! value, callers append an operand and the engine folds the operand chain
//! into a final value later — during reads, flushes, and compactions.
//!
//! ## Resolution
//!
//! Walking a key's version chain newest → oldest, the engine accumulates
//! consecutive `Merge` operands in a [`MergeContext`].  The chain ends at:
//!
//! - a `Value` — resolved as `full_merge(key, Some(value), operands)`;
//! - a `Deletion` — resolved as `full_merge(key, None, operands)`;
//! - the bottom of the tree — resolved as `full_merge(key, None, operands)`.
//!
//! If the chain cannot be terminated inside one layer (memtable, single
//! table), the layer reports the pending operands upward and the search
//! continues in older layers.
//!
//! ## Partial merges
//!
//! During compaction the full chain may not be visible (older operands live
//! in files outside the compaction inputs).  When an operator supports
//! [`MergeOperator::partial_merge`], adjacent operands are collapsed without
//! a base value once at least `min_partial_merge_operands` have accumulated.
//!
//! ## Failure
//!
//! A merge operator returning `None` signals a malformed operand chain.
//! Reads surface this as `Corruption` for that key only; compactions keep
//! the raw operands so no data is lost.

#[cfg(test)]
mod tests;

pub mod operators;

use tracing::error;

use crate::error::{Error, Result};

// ------------------------------------------------------------------------------------------------
// MergeOperator trait
// ------------------------------------------------------------------------------------------------

/// Combines a base value (or its absence) with a chain of merge operands.
///
/// Implementations must be deterministic: the engine may re-run a merge for
/// the same inputs during reads, flushes, and compactions, and all runs
/// must agree.
pub trait MergeOperator: Send + Sync {
    /// Stable identifier recorded for diagnostics.
    fn name(&self) -> &str;

    /// Fold `operands` (oldest first) on top of `existing`.
    ///
    /// Returns `None` when the operands are malformed for this operator.
    fn full_merge(
        &self,
        key: &[u8],
        existing: Option<&[u8]>,
        operands: &[Vec<u8>],
    ) -> Option<Vec<u8>>;

    /// Combine two adjacent operands without a base value.
    ///
    /// `lhs` is older than `rhs`.  Returning `None` declines the collapse;
    /// the operands are then kept separate until a full merge is possible.
    fn partial_merge(&self, _key: &[u8], _lhs: &[u8], _rhs: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// Collapse a run of operands (oldest first) without a base value.
    ///
    /// The default folds pairwise through [`MergeOperator::partial_merge`]
    /// and declines if any single step declines.
    fn partial_merge_multi(&self, key: &[u8], operands: &[Vec<u8>]) -> Option<Vec<u8>> {
        let mut iter = operands.iter();
        let mut acc = iter.next()?.clone();
        for operand in iter {
            acc = self.partial_merge(key, &acc, operand)?;
        }
        Some(acc)
    }

    /// True when the operator is associative — `full_merge` with a missing
    /// base treats the first operand as the base.
    fn is_associative(&self) -> bool {
        false
    }
}

// ------------------------------------------------------------------------------------------------
// Associative adapter
// ------------------------------------------------------------------------------------------------

/// Simplified interface for associative operators: one binary `merge` step.
///
/// Wrap with [`AssociativeOperatorAdapter`] to obtain a full
/// [`MergeOperator`].
pub trait AssociativeMergeOperator: Send + Sync {
    /// Stable identifier.
    fn name(&self) -> &str;

    /// Combine `existing` (possibly absent) with one operand.
    fn merge(&self, key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>>;
}

/// Adapts an [`AssociativeMergeOperator`] to the general interface by
/// left-folding operands.
pub struct AssociativeOperatorAdapter<T: AssociativeMergeOperator> {
    inner: T,
}

impl<T: AssociativeMergeOperator> AssociativeOperatorAdapter<T> {
    /// Wrap an associative operator.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: AssociativeMergeOperator> MergeOperator for AssociativeOperatorAdapter<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn full_merge(
        &self,
        key: &[u8],
        existing: Option<&[u8]>,
        operands: &[Vec<u8>],
    ) -> Option<Vec<u8>> {
        let mut acc: Option<Vec<u8>> = existing.map(<[u8]>::to_vec);
        for operand in operands {
            acc = Some(self.inner.merge(key, acc.as_deref(), operand)?);
        }
        acc
    }

    fn partial_merge(&self, key: &[u8], lhs: &[u8], rhs: &[u8]) -> Option<Vec<u8>> {
        self.inner.merge(key, Some(lhs), rhs)
    }

    fn is_associative(&self) -> bool {
        true
    }
}

// ------------------------------------------------------------------------------------------------
// MergeContext — operand accumulator
// ------------------------------------------------------------------------------------------------

/// Accumulates merge operands while walking a version chain newest → oldest.
///
/// Operands are pushed in walk order (newest first) and handed to the
/// operator oldest-first.
#[derive(Debug, Default)]
pub struct MergeContext {
    /// Operands in newest-first order.
    operands: Vec<Vec<u8>>,
}

impl MergeContext {
    /// Fresh, empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one operand encountered during the walk (newest first).
    pub fn push_operand(&mut self, operand: &[u8]) {
        self.operands.push(operand.to_vec());
    }

    /// Number of accumulated operands.
    pub fn len(&self) -> usize {
        self.operands.len()
    }

    /// True when no operands have accumulated.
    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    /// Operands in oldest-first order, ready for the operator.
    pub fn operands_oldest_first(&self) -> Vec<Vec<u8>> {
        let mut out = self.operands.clone();
        out.reverse();
        out
    }

    /// Consume the context, yielding operands in newest-first order.
    pub fn into_operands_newest_first(self) -> Vec<Vec<u8>> {
        self.operands
    }
}

// ------------------------------------------------------------------------------------------------
// Resolution helpers
// ------------------------------------------------------------------------------------------------

/// Fold an accumulated operand chain onto a base value.
///
/// `base` is `Some` for a terminating `Value`, `None` for a terminating
/// `Deletion` or an exhausted search.  Operator failure is logged and
/// surfaced as [`Error::Corruption`] for this key only.
pub fn resolve_full_merge(
    operator: &dyn MergeOperator,
    key: &[u8],
    base: Option<&[u8]>,
    ctx: &MergeContext,
) -> Result<Vec<u8>> {
    let operands = ctx.operands_oldest_first();
    match operator.full_merge(key, base, &operands) {
        Some(value) => Ok(value),
        None => {
            error!(
                operator = operator.name(),
                operand_count = operands.len(),
                "merge operator failed to combine operand chain"
            );
            Err(Error::Corruption(format!(
                "merge operator '{}' failed",
                operator.name()
            )))
        }
    }
}

/// Attempt a partial collapse of the operands held by `ctx`.
///
/// Used by compaction when the chain has no visible base.  The collapse is
/// only attempted once at least `min_operands` have accumulated, and only
/// replaces the context when the operator accepts the whole run.
pub fn try_partial_merge(
    operator: &dyn MergeOperator,
    key: &[u8],
    ctx: &mut MergeContext,
    min_operands: usize,
) -> bool {
    if ctx.len() < min_operands.max(2) {
        return false;
    }
    let operands = ctx.operands_oldest_first();
    match operator.partial_merge_multi(key, &operands) {
        Some(collapsed) => {
            *ctx = MergeContext::new();
            ctx.push_operand(&collapsed);
            true
        }
        None => false,
    }
}
