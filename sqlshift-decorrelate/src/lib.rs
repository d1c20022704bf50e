//! Correlated sub-query decorrelation over a generic SQL syntax tree.
//!
//! A correlated sub-query predicate (a "filter block") is rewritten into an
//! equivalent join between a cloned outer query and a cloned, decorrelated
//! inner query. The fixed orchestration lives in
//! [`decorrelate_filter_block`]; the per-predicate-kind variants (EXISTS,
//! NOT EXISTS, IN, NOT IN, comparator sub-queries, ...) plug in through
//! [`FilterRewriteStrategy`] and compose the [`Decorrelator`] primitives:
//!
//! - tree surgery: join/derived-table/WHERE/ON construction,
//! - classification: partitioning predicate operands into correlated and
//!   uncorrelated join keys,
//! - projection rebuilding: exporting join keys, GROUP/ORDER re-binding,
//!   canonical alias renumbering,
//! - set rewrites: MINUS as NOT IN, `collect_set`/`array_contains`.
//!
//! The engine never parses or prints SQL; it edits [`sqlshift_ast`] arenas
//! handed to it and reports catalog questions to a caller-supplied
//! [`ScopeInfo`].

mod classify;
mod context;
mod process;
mod projection;
mod set_rewrite;
mod surgery;

#[cfg(test)]
mod test_support;

pub use classify::FilterKeys;
pub use context::{
    AliasRegistry, BasketKey, BasketValue, ColumnInfo, FilterBlock, FilterBlockContext,
    QueryBlock, ScopeInfo, SubQueryFilterBlock, TranslateContext, GENERATED_PREFIX,
};
pub use process::{decorrelate_filter_block, Decorrelator, FilterRewriteStrategy};
