//! Correlation classification: partitioning the operands of the filter
//! block's comparison predicates into correlated (outer-scope) and
//! uncorrelated (inner-scope) key lists.

use sqlshift_ast::{NodeId, NodeKind};
use sqlshift_errors::{bad_shape, XlateResult};

use crate::context::{BasketKey, BasketValue};
use crate::process::Decorrelator;

/// Operand partition of one comparison predicate. Uncorrelated operands are
/// the join keys on the inner query ("bottom"); correlated operands are the
/// outer-query keys ("top").
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterKeys {
    pub correlated: Vec<NodeId>,
    pub uncorrelated: Vec<NodeId>,
}

impl Decorrelator<'_> {
    /// Partition the immediate operands of one comparison predicate.
    ///
    /// Correlation is decided against the *original* outer/inner pair, not
    /// the clones being edited. Uncorrelated operands are kept only when
    /// they are (or contain) a column reference; bare literals carry no join
    /// key. Correlated operands are always recorded.
    ///
    /// Side effect: a correlated operand under a non-equality operator flags
    /// the rewrite as not-equal-correlated and, when the basket carries a
    /// join-type condition table for the active join-type node, appends the
    /// predicate there for the join construction step to consume later.
    pub fn classify_predicate(&mut self, filter_op: NodeId) -> XlateResult<FilterKeys> {
        let scope_stack = [self.original_top_select, self.original_bottom_select];
        let mut keys = FilterKeys::default();

        for i in 0..self.tree.child_count(filter_op) {
            let operand = match self.tree.child(filter_op, i) {
                Some(c) => c,
                None => break,
            };
            if self
                .scope
                .is_correlated(self.tree, &scope_stack, operand)
            {
                keys.correlated.push(operand);
                if self.tree.kind(filter_op) != NodeKind::Eq {
                    self.has_not_equal_correlated = true;
                    self.record_not_equal_condition(filter_op);
                }
            } else if self
                .tree
                .find_only_node(operand, NodeKind::CascadedElement)
                .is_some()
            {
                keys.uncorrelated.push(operand);
            }
        }

        Ok(keys)
    }

    fn record_not_equal_condition(&mut self, filter_op: NodeId) {
        let join_type = match self.join_type_node {
            Some(n) => n,
            None => return,
        };
        if let Some(BasketValue::JoinConditionTable(table)) =
            self.ctx.get_mut(&BasketKey::JoinTypeConditions)
        {
            if let Some(conditions) = table.get_mut(&join_type) {
                conditions.push(filter_op);
            }
        }
    }

    /// Classify every comparison predicate reachable from the filter
    /// block's predicate, walking AND/OR connectives depth-first. A leaf
    /// that is neither a comparison nor a connective is a shape error.
    pub fn collect_filter_keys(&mut self) -> XlateResult<Vec<FilterKeys>> {
        let mut out = Vec::new();
        self.collect_keys_rec(self.fb_node, &mut out)?;
        Ok(out)
    }

    fn collect_keys_rec(&mut self, op: NodeId, out: &mut Vec<FilterKeys>) -> XlateResult<()> {
        let kind = self.tree.kind(op);
        if kind.is_comparison_op() {
            out.push(self.classify_predicate(op)?);
            return Ok(());
        }
        if kind.is_logic_op() {
            for i in 0..self.tree.child_count(op) {
                if let Some(child) = self.tree.child(op, i) {
                    self.collect_keys_rec(child, out)?;
                }
            }
            return Ok(());
        }
        bad_shape!("unknown filter operation: {}", self.tree.text(op))
    }
}
