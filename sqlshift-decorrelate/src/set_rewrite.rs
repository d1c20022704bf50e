//! Set-operation rewrites: MINUS as NOT IN, and the aggregate-membership
//! pair `collect_set`/`array_contains` used when a rewritten predicate must
//! compare against a grouped inner query.

use itertools::Itertools;

use sqlshift_ast::{NodeId, NodeKind};
use sqlshift_errors::{bad_shape, internal_err, unsupported, XlateResult};

use crate::process::Decorrelator;

impl Decorrelator<'_> {
    /// `minuend MINUS subtrahend` as a NOT IN predicate: the minuend's
    /// projection becomes the left-hand side (a single column reference, or
    /// a vector for multi-column projections) and the subtrahend is wrapped
    /// as the SUBQUERY operand.
    pub fn build_not_in_for_minus(
        &mut self,
        minuend: NodeId,
        subtrahend: NodeId,
    ) -> XlateResult<NodeId> {
        let not_in = self.tree.add_kind(NodeKind::NotIn);
        let parameter = self.build_not_in_parameter(minuend)?;
        self.tree.attach_child(not_in, parameter);
        let subquery = self.tree.add_kind(NodeKind::Subquery);
        self.tree.attach_child(not_in, subquery);
        self.tree.attach_child(subquery, subtrahend);
        Ok(not_in)
    }

    fn build_not_in_parameter(&mut self, select: NodeId) -> XlateResult<NodeId> {
        let select_list = match self.tree.first_child_with_kind(select, NodeKind::SelectList) {
            Some(list) => list,
            None => bad_shape!("MINUS rewrite over `select *` is unsupported"),
        };
        if self.tree.child_count(select_list) == 0 {
            bad_shape!("MINUS rewrite over `select *` is unsupported");
        }
        let items = self.tree.children(select_list).to_vec();
        if let Ok(&item) = items.iter().exactly_one() {
            let reference = self
                .tree
                .child(item, 0)
                .and_then(|expr| self.tree.child(expr, 0))
                .ok_or_else(|| internal_err("projected item has no expression"))?;
            return Ok(self.tree.clone_tree(reference));
        }
        let vector = self.tree.add_kind(NodeKind::VectorExpr);
        for item in items {
            let reference = self
                .tree
                .child(item, 0)
                .and_then(|expr| self.tree.child(expr, 0))
                .ok_or_else(|| internal_err("projected item has no expression"))?;
            let expr = self.tree.add_kind(NodeKind::Expr);
            self.tree.attach_child(vector, expr);
            let cloned = self.tree.clone_tree(reference);
            self.tree.attach_child(expr, cloned);
        }
        Ok(vector)
    }

    /// Rewrite every NOT IN leaf under `logic_expr` (recursing through AND)
    /// into `NOT array_contains(haystack, needle)`, consuming the leaf's
    /// operands as the call arguments. Any other leaf operator is
    /// unsupported here.
    pub fn rebuild_array_contains(&mut self, logic_expr: NodeId) -> XlateResult<()> {
        for i in 0..self.tree.child_count(logic_expr) {
            let op = match self.tree.child(logic_expr, i) {
                Some(c) => c,
                None => break,
            };
            match self.tree.kind(op) {
                NodeKind::And => {
                    self.rebuild_array_contains(op)?;
                    continue;
                }
                NodeKind::NotIn => {}
                other => unsupported!("unprocessed logic operator: {other:?}"),
            }
            self.tree.delete_child(logic_expr, i);
            let not = self.tree.add_kind(NodeKind::Not);
            self.tree.insert_child(logic_expr, i, not);
            let cascaded = self.tree.add_kind(NodeKind::CascadedElement);
            self.tree.attach_child(not, cascaded);
            let call = self.tree.add_kind(NodeKind::RoutineCall);
            self.tree.attach_child(cascaded, call);
            let name = self.tree.add_kind(NodeKind::RoutineName);
            self.tree.attach_child(call, name);
            let ident = self.tree.add(NodeKind::Ident, "array_contains");
            self.tree.attach_child(name, ident);
            let arguments = self.tree.add_kind(NodeKind::Arguments);
            self.tree.attach_child(call, arguments);
            while self.tree.child_count(op) > 0 {
                let operand = self.tree.delete_child(op, 0);
                let argument = self.tree.add_kind(NodeKind::Argument);
                self.tree.attach_child(arguments, argument);
                let expr = self.tree.add_kind(NodeKind::Expr);
                self.tree.attach_child(argument, expr);
                self.tree.attach_child(expr, operand);
            }
        }
        Ok(())
    }

    /// Wrap every projected expression of the bottom query in a
    /// `collect_set(...)` call, so the grouped inner query exports value
    /// sets for `array_contains` to probe.
    pub fn rebuild_collect_set(&mut self) -> XlateResult<()> {
        let select_list = self
            .tree
            .first_child_with_kind(self.bottom_select, NodeKind::SelectList)
            .ok_or_else(|| internal_err("inner query has no projection list"))?;
        for i in 0..self.tree.child_count(select_list) {
            let expr = self
                .tree
                .child(select_list, i)
                .and_then(|item| self.tree.child(item, 0))
                .ok_or_else(|| internal_err("projected item has no expression"))?;
            let element = self.tree.delete_child(expr, 0);
            let cascaded = self.tree.add_kind(NodeKind::CascadedElement);
            self.tree.attach_child(expr, cascaded);
            let call = self.tree.add_kind(NodeKind::RoutineCall);
            self.tree.attach_child(cascaded, call);
            let name = self.tree.add_kind(NodeKind::RoutineName);
            self.tree.attach_child(call, name);
            let ident = self.tree.add(NodeKind::Ident, "collect_set");
            self.tree.attach_child(name, ident);
            let arguments = self.tree.add_kind(NodeKind::Arguments);
            self.tree.attach_child(call, arguments);
            let argument = self.tree.add_kind(NodeKind::Argument);
            self.tree.attach_child(arguments, argument);
            let inner_expr = self.tree.add_kind(NodeKind::Expr);
            self.tree.attach_child(argument, inner_expr);
            self.tree.attach_child(inner_expr, element);
        }
        Ok(())
    }
}
