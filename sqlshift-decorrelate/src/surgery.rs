//! Tree-surgery primitives: pure constructors over the arena used by every
//! rewrite strategy. These build joins, closing selects, WHERE/ON branches,
//! and column references, and keep the alias registry up to date as new
//! derived tables appear.

use sqlshift_ast::{NodeId, NodeKind};
use sqlshift_errors::{bad_shape, internal_err, invariant, XlateResult};

use crate::context::GENERATED_PREFIX;
use crate::process::Decorrelator;

impl Decorrelator<'_> {
    /// Fresh globally-unique alias wrapped in an ALIAS node.
    pub fn create_alias(&mut self) -> NodeId {
        let name = self.ctx.next_alias_name();
        let alias = self.tree.add_kind(NodeKind::Alias);
        let ident = self.tree.add(NodeKind::Ident, name);
        self.tree.attach_child(alias, ident);
        alias
    }

    /// Name carried by an ALIAS node.
    pub fn alias_text(&self, alias: NodeId) -> XlateResult<String> {
        let ident = self
            .tree
            .child(alias, 0)
            .ok_or_else(|| internal_err(format!("alias node {alias} has no name")))?;
        Ok(self.tree.text(ident).to_string())
    }

    /// Wrap `select` into a TABLE_REF_ELEMENT (derived table) with a fresh
    /// view alias, registering the select's table names against that alias.
    pub fn create_table_ref_element(&mut self, select: NodeId) -> XlateResult<NodeId> {
        let table_ref_element = self.tree.add_kind(NodeKind::TableRefElement);
        let view_alias = self.create_alias();
        let alias_name = self.alias_text(view_alias)?;
        for table in self.table_names_of(select) {
            self.aliases.register_table_alias(table, alias_name.clone());
        }
        self.tree.attach_child(table_ref_element, view_alias);
        let table_expression = self.tree.add_kind(NodeKind::TableExpression);
        self.tree.attach_child(table_ref_element, table_expression);
        let select_mode = self.tree.add_kind(NodeKind::SelectMode);
        self.tree.attach_child(table_expression, select_mode);
        let select_statement = self.tree.add_kind(NodeKind::SelectStatement);
        self.tree.attach_child(select_mode, select_statement);
        let subquery = self.tree.add_kind(NodeKind::Subquery);
        self.tree.attach_child(select_statement, subquery);
        self.tree.attach_child(subquery, select);
        Ok(table_ref_element)
    }

    /// Table names referenced by the FROM clause of `select`.
    fn table_names_of(&self, select: NodeId) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(from) = self.tree.first_child_with_kind(select, NodeKind::From) {
            self.collect_table_names(from, &mut names);
        }
        names
    }

    fn collect_table_names(&self, node: NodeId, out: &mut Vec<String>) {
        if self.tree.kind(node) == NodeKind::TableExpression {
            if let Some(ident) = self.tree.first_child_with_kind(node, NodeKind::Ident) {
                out.push(self.tree.text(ident).to_string());
            }
        }
        for &child in self.tree.children(node) {
            self.collect_table_names(child, out);
        }
    }

    /// Create an empty JOIN_DEF under the first FROM-list entry of `select`.
    pub fn create_join(&mut self, select: NodeId) -> XlateResult<NodeId> {
        let from = self
            .tree
            .first_child_with_kind(select, NodeKind::From)
            .ok_or_else(|| internal_err("select has no FROM clause to join under"))?;
        let table_ref = self
            .tree
            .child(from, 0)
            .ok_or_else(|| internal_err("FROM clause has no table reference"))?;
        let join = self.tree.add_kind(NodeKind::JoinDef);
        self.tree.attach_child(table_ref, join);
        Ok(join)
    }

    /// Populate a JOIN_DEF with an optional join-type node and `select` as a
    /// derived table; returns the derived table's alias node.
    pub fn build_join(
        &mut self,
        join_type: Option<NodeId>,
        join: NodeId,
        select: NodeId,
    ) -> XlateResult<NodeId> {
        if let Some(join_type) = join_type {
            self.tree.attach_child(join, join_type);
        }
        let table_ref_element = self.create_table_ref_element(select)?;
        self.tree.attach_child(join, table_ref_element);
        self.tree
            .first_child_with_kind(table_ref_element, NodeKind::Alias)
            .ok_or_else(|| internal_err("derived table lost its alias"))
    }

    /// SELECT wrapping a table reference, used to turn a rewritten subtree
    /// back into a valid derived table.
    pub fn create_closing_select(&mut self, table_ref_element: NodeId) -> NodeId {
        let select = self.tree.add_kind(NodeKind::Select);
        let from = self.tree.add_kind(NodeKind::From);
        self.tree.attach_child(select, from);
        let table_ref = self.tree.add_kind(NodeKind::TableRef);
        self.tree.attach_child(from, table_ref);
        self.tree.attach_child(table_ref, table_ref_element);
        select
    }

    /// Single-part column reference wrapping an existing ident node.
    pub fn create_column_ref(&mut self, ident: NodeId) -> NodeId {
        let cascaded = self.tree.add_kind(NodeKind::CascadedElement);
        let any = self.tree.add_kind(NodeKind::AnyElement);
        self.tree.attach_child(cascaded, any);
        self.tree.attach_child(any, ident);
        cascaded
    }

    /// Two-part (`table.column`) reference from existing ident nodes.
    pub fn create_qualified_column_ref(&mut self, table: NodeId, column: NodeId) -> NodeId {
        let cascaded = self.tree.add_kind(NodeKind::CascadedElement);
        let any = self.tree.add_kind(NodeKind::AnyElement);
        self.tree.attach_child(cascaded, any);
        self.tree.attach_child(any, table);
        self.tree.attach_child(any, column);
        cascaded
    }

    pub fn create_logic_expr(&mut self, op: NodeId, left: NodeId, right: NodeId) -> NodeId {
        let logic_expr = self.tree.add_kind(NodeKind::LogicExpr);
        self.tree.attach_child(logic_expr, op);
        self.tree.attach_child(op, left);
        self.tree.attach_child(op, right);
        logic_expr
    }

    /// ON branch holding a single `left <op> right` condition.
    pub fn build_on(&mut self, op: NodeId, left: NodeId, right: NodeId) -> NodeId {
        let on = self.tree.add_kind(NodeKind::On);
        let logic_expr = self.create_logic_expr(op, left, right);
        self.tree.attach_child(on, logic_expr);
        on
    }

    /// WHERE branch holding a single `left <op> right` condition.
    pub fn build_where(&mut self, op: NodeId, left: NodeId, right: NodeId) -> NodeId {
        let where_ = self.tree.add_kind(NodeKind::Where);
        let logic_expr = self.create_logic_expr(op, left, right);
        self.tree.attach_child(where_, logic_expr);
        where_
    }

    /// WHERE branch pairing `left[i] <op> right[i]` key conditions, chained
    /// with AND. The key lists must be non-empty and of equal length.
    pub fn build_where_multi(
        &mut self,
        op: NodeId,
        left: &[NodeId],
        right: &[NodeId],
    ) -> XlateResult<NodeId> {
        if left.is_empty() || left.len() != right.len() {
            bad_shape!(
                "mismatched join key lists: {} vs {}",
                left.len(),
                right.len()
            );
        }
        let where_ = self.tree.add_kind(NodeKind::Where);
        let logic_expr = self.tree.add_kind(NodeKind::LogicExpr);
        self.tree.attach_child(where_, logic_expr);
        let mut current = logic_expr;
        for (&l, &r) in left.iter().zip(right.iter()) {
            if self.tree.child_count(logic_expr) > 0 {
                let and = self.tree.add_kind(NodeKind::And);
                let prev = self.tree.delete_child(logic_expr, 0);
                self.tree.attach_child(and, prev);
                self.tree.attach_child(logic_expr, and);
                current = and;
            }
            let operation = self.tree.clone_tree(op);
            let l_ident = self
                .tree
                .child(l, 0)
                .ok_or_else(|| internal_err("key alias without name"))?;
            let r_ident = self
                .tree
                .child(r, 0)
                .ok_or_else(|| internal_err("key alias without name"))?;
            let l_ident = self.tree.clone_tree(l_ident);
            let r_ident = self.tree.clone_tree(r_ident);
            let l_ref = self.create_column_ref(l_ident);
            let r_ref = self.create_column_ref(r_ident);
            self.tree.attach_child(operation, l_ref);
            self.tree.attach_child(operation, r_ref);
            self.tree.attach_child(current, operation);
        }
        Ok(where_)
    }

    /// Conjoin one more `left <op> right` condition into an existing
    /// single-condition WHERE.
    pub fn add_condition_to_where(
        &mut self,
        where_: NodeId,
        op: NodeId,
        left: NodeId,
        right: NodeId,
    ) -> XlateResult<()> {
        let logic_expr = self
            .tree
            .first_child_with_kind(where_, NodeKind::LogicExpr)
            .ok_or_else(|| internal_err("WHERE branch without LOGIC_EXPR"))?;
        invariant!(
            self.tree.child_count(logic_expr) == 1,
            "WHERE LOGIC_EXPR must hold exactly one condition before chaining"
        );
        let current = self.tree.delete_child(logic_expr, 0);
        let and = self.tree.add_kind(NodeKind::And);
        self.tree.attach_child(logic_expr, and);
        self.tree.attach_child(and, current);
        self.tree.attach_child(op, left);
        self.tree.attach_child(op, right);
        self.tree.attach_child(and, op);
        Ok(())
    }

    /// `left MINUS right` subtree, each branch wrapped as a SUBQUERY.
    pub fn create_minus(&mut self, left: NodeId, right: NodeId) -> NodeId {
        let minus = self.tree.add_kind(NodeKind::Minus);
        for select in [left, right] {
            let subquery = self.tree.add_kind(NodeKind::Subquery);
            self.tree.attach_child(minus, subquery);
            self.tree.attach_child(subquery, select);
        }
        minus
    }

    /// Clone of the subquery predicate with its SUBQUERY operand replaced by
    /// a `view_alias.col_alias` reference.
    pub fn create_op_branch(
        &mut self,
        view_alias: NodeId,
        col_alias: NodeId,
    ) -> XlateResult<NodeId> {
        let branch = self.tree.clone_tree(self.subq_node);
        for i in 0..self.tree.child_count(branch) {
            let child = match self.tree.child(branch, i) {
                Some(c) => c,
                None => break,
            };
            if self.tree.kind(child) == NodeKind::Subquery {
                let view_ident = self
                    .tree
                    .child(view_alias, 0)
                    .ok_or_else(|| internal_err("view alias without name"))?;
                let col_ident = self
                    .tree
                    .child(col_alias, 0)
                    .ok_or_else(|| internal_err("column alias without name"))?;
                let view_ident = self.tree.clone_tree(view_ident);
                let col_ident = self.tree.clone_tree(col_ident);
                let reference = self.create_qualified_column_ref(view_ident, col_ident);
                self.tree.replace_child(branch, i, reference);
            }
        }
        Ok(branch)
    }

    /// WHERE on the new outer query re-applying the subquery predicate
    /// against the derived table's aliased column.
    pub fn build_where_branch(
        &mut self,
        view_alias: NodeId,
        col_alias: NodeId,
    ) -> XlateResult<()> {
        let where_ = self.tree.add_kind(NodeKind::Where);
        let logic_expr = self.tree.add_kind(NodeKind::LogicExpr);
        self.tree.attach_child(where_, logic_expr);
        let branch = self.create_op_branch(view_alias, col_alias)?;
        self.tree.attach_child(logic_expr, branch);
        self.tree.attach_child(self.top_select, where_);
        Ok(())
    }

    /// The non-SUBQUERY operand of the subquery predicate, if any.
    pub fn get_subq_op_element(&self) -> Option<NodeId> {
        self.tree
            .children(self.subq_node)
            .iter()
            .copied()
            .find(|&c| self.tree.kind(c) != NodeKind::Subquery)
    }

    /// Rewrite the subquery predicate's operand to reference a generated
    /// column alias, synthesizing the reference nodes for operand shapes
    /// with no column reference at all (`count(*)`).
    pub fn rebuild_subq_op_element(
        &mut self,
        op_element: NodeId,
        column_alias: NodeId,
    ) -> XlateResult<()> {
        let alias_ident = self
            .tree
            .child(column_alias, 0)
            .ok_or_else(|| internal_err("column alias without name"))?;
        let alias_ident = self.tree.clone_tree(alias_ident);

        let any = match self.tree.find_only_node(op_element, NodeKind::AnyElement) {
            Some(any) => {
                while self.tree.child_count(any) > 0 {
                    self.tree.delete_child(any, 0);
                }
                any
            }
            None => self.tree.add_kind(NodeKind::AnyElement),
        };
        self.tree.attach_child(any, alias_ident);

        let cascaded = match self.tree.parent(any) {
            Some(parent) => parent,
            None => {
                let cascaded = self.tree.add_kind(NodeKind::CascadedElement);
                self.tree.attach_child(cascaded, any);
                cascaded
            }
        };

        let index = self.tree.pos(op_element);
        self.tree.delete_child(self.subq_node, index);
        self.tree.insert_child(self.subq_node, index, cascaded);
        Ok(())
    }

    /// Positional equality ON condition over two select lists, used by
    /// set-intersection shapes: `top.a0 = bottom.b0 AND top.a1 = bottom.b1 ...`.
    pub fn make_on(
        &mut self,
        top_select_list: NodeId,
        bottom_select_list: NodeId,
        top_alias: NodeId,
        bottom_alias: NodeId,
    ) -> XlateResult<NodeId> {
        let on = self.tree.add_kind(NodeKind::On);
        let logic_expr = self.tree.add_kind(NodeKind::LogicExpr);
        self.tree.attach_child(on, logic_expr);

        let count = self.tree.child_count(top_select_list);
        invariant!(
            count == self.tree.child_count(bottom_select_list),
            "positional ON requires equally sized select lists"
        );
        for i in 0..count {
            let top_ident = self.projected_alias_ident(top_select_list, i)?;
            let bottom_ident = self.projected_alias_ident(bottom_select_list, i)?;
            let top_column = self.tree.dup_node(top_ident);
            let bottom_column = self.tree.dup_node(bottom_ident);
            let top_qualifier = self
                .tree
                .child(top_alias, 0)
                .ok_or_else(|| internal_err("table alias without name"))?;
            let bottom_qualifier = self
                .tree
                .child(bottom_alias, 0)
                .ok_or_else(|| internal_err("table alias without name"))?;
            let top_qualifier = self.tree.clone_tree(top_qualifier);
            let bottom_qualifier = self.tree.clone_tree(bottom_qualifier);
            let left = self.create_qualified_column_ref(top_qualifier, top_column);
            let right = self.create_qualified_column_ref(bottom_qualifier, bottom_column);
            let equals = self.tree.add_kind(NodeKind::Eq);
            self.tree.attach_child(equals, left);
            self.tree.attach_child(equals, right);
            if self.tree.child_count(logic_expr) > 0 {
                let origin = self.tree.delete_child(logic_expr, 0);
                let and = self.tree.add_kind(NodeKind::And);
                self.tree.attach_child(and, origin);
                self.tree.attach_child(and, equals);
                self.tree.attach_child(logic_expr, and);
            } else {
                self.tree.attach_child(logic_expr, equals);
            }
        }
        Ok(on)
    }

    fn projected_alias_ident(&self, select_list: NodeId, i: usize) -> XlateResult<NodeId> {
        self.tree
            .child(select_list, i)
            .and_then(|item| self.tree.child(item, 1))
            .and_then(|alias| self.tree.child(alias, 0))
            .ok_or_else(|| internal_err("select item without alias in positional ON"))
    }

    /// Project the IN predicate's left-hand side (single column or vector)
    /// into `select`'s projection list; returns the new alias nodes.
    pub fn add_select_items_for_in(
        &mut self,
        select: NodeId,
        subq: NodeId,
    ) -> XlateResult<Vec<NodeId>> {
        let left = match self.tree.child(subq, 0) {
            Some(l) => l,
            None => return Ok(Vec::new()),
        };
        let select_list = self
            .tree
            .first_child_with_kind(select, NodeKind::SelectList)
            .ok_or_else(|| internal_err("select without projection list"))?;
        let mut aliases = Vec::new();
        match self.tree.kind(left) {
            NodeKind::CascadedElement => {
                let cloned = self.tree.clone_tree(left);
                aliases.push(self.add_select_item(select_list, cloned)?);
            }
            NodeKind::VectorExpr => {
                for i in 0..self.tree.child_count(left) {
                    let element = self
                        .tree
                        .child(left, i)
                        .and_then(|expr| self.tree.child(expr, 0))
                        .ok_or_else(|| internal_err("vector expression without operand"))?;
                    let cloned = self.tree.clone_tree(element);
                    aliases.push(self.add_select_item(select_list, cloned)?);
                }
            }
            _ => {}
        }
        Ok(aliases)
    }

    /// Replace the bottom query's WHERE and re-wrap the filter block's
    /// predicate into the new outer WHERE, optionally conjoining an equality
    /// between two compare-key aliases.
    pub fn build_where_by_fb(
        &mut self,
        subq_condition: NodeId,
        compare_key_alias_1: Option<NodeId>,
        compare_key_alias_2: Option<NodeId>,
    ) -> XlateResult<NodeId> {
        self.tree.delete_branch(self.bottom_select, NodeKind::Where);
        let where_ = self.tree.add_kind(NodeKind::Where);
        let logic_expr = self.tree.add_kind(NodeKind::LogicExpr);
        self.tree.attach_child(where_, logic_expr);
        self.tree.attach_child(logic_expr, self.fb_node);
        if let (Some(alias1), Some(alias2)) = (compare_key_alias_1, compare_key_alias_2) {
            let op = self.tree.dup_node(subq_condition);
            let ident1 = self
                .tree
                .child(alias1, 0)
                .ok_or_else(|| internal_err("compare key alias without name"))?;
            let ident2 = self
                .tree
                .child(alias2, 0)
                .ok_or_else(|| internal_err("compare key alias without name"))?;
            let ident1 = self.tree.clone_tree(ident1);
            let ident2 = self.tree.clone_tree(ident2);
            let left = self.create_column_ref(ident1);
            let right = self.create_column_ref(ident2);
            self.add_condition_to_where(where_, op, left, right)?;
        }
        self.tree.attach_child(self.top_select, where_);
        Ok(where_)
    }

    /// Attach a prebuilt condition as the outer query's WHERE.
    pub fn build_simple_where(&mut self, condition: NodeId) {
        let where_ = self.tree.add_kind(NodeKind::Where);
        let logic_expr = self.tree.add_kind(NodeKind::LogicExpr);
        self.tree.attach_child(where_, logic_expr);
        self.tree.attach_child(logic_expr, condition);
        self.tree.attach_child(self.top_select, where_);
    }

    /// `SELECT count(*) AS <prefix>_col_0` projection list.
    pub fn create_count_asterisk_select_list(&mut self) -> NodeId {
        let select_list = self.tree.add_kind(NodeKind::SelectList);
        let select_item = self.tree.add_kind(NodeKind::SelectItem);
        self.tree.attach_child(select_list, select_item);
        let expr = self.tree.add_kind(NodeKind::Expr);
        self.tree.attach_child(select_item, expr);
        let function = self.tree.add_kind(NodeKind::StandardFunction);
        self.tree.attach_child(expr, function);
        let count = self.tree.add_kind(NodeKind::Count);
        self.tree.attach_child(function, count);
        let asterisk = self.tree.add_kind(NodeKind::Asterisk);
        self.tree.attach_child(count, asterisk);
        let alias = self.tree.add_kind(NodeKind::Alias);
        self.tree.attach_child(select_item, alias);
        let alias_name = self
            .tree
            .add(NodeKind::Ident, format!("{GENERATED_PREFIX}_col_0"));
        self.tree.attach_child(alias, alias_name);
        select_list
    }

    /// Fresh SELECT from a table-ref element and a prebuilt projection list.
    pub fn re_create_bottom_select(
        &mut self,
        table_ref_element: NodeId,
        select_list: NodeId,
    ) -> NodeId {
        let select = self.tree.add_kind(NodeKind::Select);
        let from = self.tree.add_kind(NodeKind::From);
        self.tree.attach_child(select, from);
        let table_ref = self.tree.add_kind(NodeKind::TableRef);
        self.tree.attach_child(from, table_ref);
        self.tree.attach_child(table_ref, table_ref_element);
        self.tree.attach_child(select, select_list);
        select
    }

    /// Append `WHERE <alias>.<prefix>_col_0 = 0` to a closing select for the
    /// uncorrelated NOT EXISTS shape. The select must not already carry a
    /// WHERE.
    pub fn rebuild_not_exists_uncorrelated_where(
        &mut self,
        select: NodeId,
        table_alias_ident: NodeId,
    ) -> XlateResult<()> {
        if self
            .tree
            .first_child_with_kind(select, NodeKind::Where)
            .is_some()
        {
            bad_shape!("uncorrelated NOT EXISTS rewrite target already has a WHERE clause");
        }
        let column = self
            .tree
            .add(NodeKind::Ident, format!("{GENERATED_PREFIX}_col_0"));
        let reference = self.create_qualified_column_ref(table_alias_ident, column);
        let zero = self.tree.add(NodeKind::IntLiteral, "0");
        let equals = self.tree.add_kind(NodeKind::Eq);
        let where_ = self.build_where(equals, reference, zero);
        self.tree.attach_child(select, where_);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{engine_fixture, select_with_table, OuterTables};
    use pretty_assertions::assert_eq;
    use sqlshift_ast::SyntaxTree;
    use sqlshift_errors::XlateError;

    #[test]
    fn build_join_wraps_select_as_aliased_derived_table() {
        let mut tree = SyntaxTree::new();
        let inner = select_with_table(&mut tree, "lineitem", &["l_orderkey"]);
        let outer = select_with_table(&mut tree, "orders", &["o_orderkey"]);
        let fb = tree.add_kind(NodeKind::Eq);

        let scope = OuterTables::new(&[]);
        let mut fx = engine_fixture(tree, fb, &scope);
        let mut engine = fx.engine();
        let join = engine.create_join(outer).unwrap();
        let join_type = engine.tree.add(NodeKind::JoinType, "left");
        let alias = engine.build_join(Some(join_type), join, inner).unwrap();

        // join lands under the first FROM-list entry of the outer select
        let from = engine
            .tree
            .first_child_with_kind(outer, NodeKind::From)
            .unwrap();
        let table_ref = engine.tree.child(from, 0).unwrap();
        assert_eq!(
            engine.tree.first_child_with_kind(table_ref, NodeKind::JoinDef),
            Some(join)
        );
        // the derived table registers its source table under the new alias
        let alias_name = engine.alias_text(alias).unwrap();
        assert_eq!(engine.aliases.table_alias("lineitem"), Some(&*alias_name));
        // and the wrapped select is reachable through the subquery chain
        let tre = engine.tree.child(join, 1).unwrap();
        assert_eq!(
            engine.tree.find_only_node(tre, NodeKind::Subquery).map(|s| engine
                .tree
                .child(s, 0)
                .unwrap()),
            Some(inner)
        );
    }

    #[test]
    fn where_multi_chains_conditions_with_and() {
        let mut tree = SyntaxTree::new();
        let fb = tree.add_kind(NodeKind::Eq);
        let scope = OuterTables::new(&[]);
        let mut fx = engine_fixture(tree, fb, &scope);
        let mut engine = fx.engine();

        let op = engine.tree.add_kind(NodeKind::Eq);
        let mut lefts = Vec::new();
        let mut rights = Vec::new();
        for _ in 0..2 {
            lefts.push(engine.create_alias());
            rights.push(engine.create_alias());
        }
        let where_ = engine.build_where_multi(op, &lefts, &rights).unwrap();
        let logic = engine
            .tree
            .first_child_with_kind(where_, NodeKind::LogicExpr)
            .unwrap();
        assert_eq!(engine.tree.child_count(logic), 1);
        let and = engine.tree.child(logic, 0).unwrap();
        assert_eq!(engine.tree.kind(and), NodeKind::And);
        assert_eq!(engine.tree.child_count(and), 2);
    }

    #[test]
    fn where_multi_rejects_mismatched_key_lists() {
        let mut tree = SyntaxTree::new();
        let fb = tree.add_kind(NodeKind::Eq);
        let scope = OuterTables::new(&[]);
        let mut fx = engine_fixture(tree, fb, &scope);
        let mut engine = fx.engine();

        let op = engine.tree.add_kind(NodeKind::Eq);
        let a = engine.create_alias();
        assert!(matches!(
            engine.build_where_multi(op, &[a], &[]),
            Err(XlateError::BadShape(_))
        ));
        assert!(matches!(
            engine.build_where_multi(op, &[], &[]),
            Err(XlateError::BadShape(_))
        ));
    }

    #[test]
    fn make_on_pairs_projected_aliases_positionally() {
        let mut tree = SyntaxTree::new();
        let fb = tree.add_kind(NodeKind::Eq);
        let scope = OuterTables::new(&[]);
        let mut fx = engine_fixture(tree, fb, &scope);
        let mut engine = fx.engine();

        // two select lists whose items already carry aliases
        let mut lists = Vec::new();
        for _ in 0..2 {
            let list = engine.tree.add_kind(NodeKind::SelectList);
            for col in ["k0", "k1"] {
                let ident = engine.tree.add(NodeKind::Ident, col);
                let reference = engine.create_column_ref(ident);
                engine.add_select_item(list, reference).unwrap();
            }
            lists.push(list);
        }
        let top_alias = engine.create_alias();
        let bottom_alias = engine.create_alias();
        let on = engine
            .make_on(lists[0], lists[1], top_alias, bottom_alias)
            .unwrap();
        let logic = engine
            .tree
            .first_child_with_kind(on, NodeKind::LogicExpr)
            .unwrap();
        let and = engine.tree.child(logic, 0).unwrap();
        assert_eq!(engine.tree.kind(and), NodeKind::And);
        let first = engine.tree.child(and, 0).unwrap();
        let second = engine.tree.child(and, 1).unwrap();
        assert_eq!(engine.tree.kind(first), NodeKind::Eq);
        assert_eq!(engine.tree.kind(second), NodeKind::Eq);
    }

    #[test]
    fn not_exists_where_rebuild_rejects_existing_where() {
        let mut tree = SyntaxTree::new();
        let fb = tree.add_kind(NodeKind::Eq);
        let scope = OuterTables::new(&[]);
        let mut fx = engine_fixture(tree, fb, &scope);
        let mut engine = fx.engine();

        let select = engine.tree.add_kind(NodeKind::Select);
        let alias_ident = engine.tree.add(NodeKind::Ident, "sqlshift_9");
        engine
            .rebuild_not_exists_uncorrelated_where(select, alias_ident)
            .unwrap();
        let where_ = engine
            .tree
            .first_child_with_kind(select, NodeKind::Where)
            .unwrap();
        assert_eq!(
            engine.tree.dump(where_),
            "(where (LOGIC_EXPR (= (CASCADED_ELEMENT (ANY_ELEMENT sqlshift_9 sqlshift_col_0)) 0)))"
        );

        let alias_ident_2 = engine.tree.add(NodeKind::Ident, "sqlshift_9");
        assert!(matches!(
            engine.rebuild_not_exists_uncorrelated_where(select, alias_ident_2),
            Err(XlateError::BadShape(_))
        ));
    }

    #[test]
    fn count_star_closing_select_chain() {
        let mut tree = SyntaxTree::new();
        let inner = select_with_table(&mut tree, "lineitem", &["l_orderkey"]);
        let fb = tree.add_kind(NodeKind::Eq);
        let scope = OuterTables::new(&[]);
        let mut fx = engine_fixture(tree, fb, &scope);
        let mut engine = fx.engine();

        let table_ref_element = engine.create_table_ref_element(inner).unwrap();
        let select_list = engine.create_count_asterisk_select_list();
        let select = engine.re_create_bottom_select(table_ref_element, select_list);

        // SELECT count(*) AS <prefix>_col_0 FROM (inner) <alias>
        let list = engine
            .tree
            .first_child_with_kind(select, NodeKind::SelectList)
            .unwrap();
        let item = engine.tree.child(list, 0).unwrap();
        assert_eq!(
            engine.tree.dump(item),
            "(SELECT_ITEM (EXPR (STANDARD_FUNCTION (count *))) (ALIAS sqlshift_col_0))"
        );
        let from = engine
            .tree
            .first_child_with_kind(select, NodeKind::From)
            .unwrap();
        assert_eq!(
            engine
                .tree
                .find_only_node(from, NodeKind::Subquery)
                .and_then(|s| engine.tree.child(s, 0)),
            Some(inner)
        );
    }

    #[test]
    fn in_lhs_vector_is_projected_per_column() {
        let mut tree = SyntaxTree::new();
        let select = select_with_table(&mut tree, "lineitem", &[]);
        let subq = tree.add_kind(NodeKind::In);
        let vector = tree.add_kind(NodeKind::VectorExpr);
        tree.attach_child(subq, vector);
        for col in ["o_orderkey", "o_custkey"] {
            let expr = tree.add_kind(NodeKind::Expr);
            tree.attach_child(vector, expr);
            let any = tree.add_kind(NodeKind::AnyElement);
            let cascaded = tree.add_kind(NodeKind::CascadedElement);
            tree.attach_child(expr, cascaded);
            tree.attach_child(cascaded, any);
            let ident = tree.add(NodeKind::Ident, col);
            tree.attach_child(any, ident);
        }
        let fb = tree.add_kind(NodeKind::Eq);
        let scope = OuterTables::new(&[]);
        let mut fx = engine_fixture(tree, fb, &scope);
        let mut engine = fx.engine();

        let aliases = engine.add_select_items_for_in(select, subq).unwrap();
        assert_eq!(aliases.len(), 2);
        let list = engine
            .tree
            .first_child_with_kind(select, NodeKind::SelectList)
            .unwrap();
        assert_eq!(engine.tree.child_count(list), 2);
        // the predicate's own operands are untouched
        assert_eq!(engine.tree.child_count(vector), 2);
    }

    #[test]
    fn subq_operand_rewrite_handles_count_star_shape() {
        let mut tree = SyntaxTree::new();
        // comparator predicate whose operand is a bare function call,
        // carrying no column reference at all
        let gt = tree.add_kind(NodeKind::Gt);
        let function = tree.add_kind(NodeKind::StandardFunction);
        let count = tree.add_kind(NodeKind::Count);
        tree.attach_child(gt, function);
        tree.attach_child(function, count);
        let subquery = tree.add_kind(NodeKind::Subquery);
        tree.attach_child(gt, subquery);
        let fb = tree.add_kind(NodeKind::Eq);

        let scope = OuterTables::new(&[]);
        let mut fx = engine_fixture(tree, fb, &scope);
        fx.subq_node = gt;
        let mut engine = fx.engine();
        let op_element = engine.get_subq_op_element().unwrap();
        assert_eq!(op_element, function);
        let column_alias = engine.create_alias();
        engine
            .rebuild_subq_op_element(op_element, column_alias)
            .unwrap();

        let replaced = engine.tree.child(gt, 0).unwrap();
        let alias_name = engine.alias_text(column_alias).unwrap();
        assert_eq!(
            engine.tree.dump(replaced),
            format!("(CASCADED_ELEMENT (ANY_ELEMENT {alias_name}))")
        );
        // the SUBQUERY operand stays in place
        assert_eq!(engine.tree.child(gt, 1), Some(subquery));
    }

    #[test]
    fn where_by_fb_moves_predicate_and_conjoins_compare_keys() {
        let mut tree = SyntaxTree::new();
        let bottom = select_with_table(&mut tree, "lineitem", &[]);
        let stale_where = tree.add_kind(NodeKind::Where);
        tree.attach_child(bottom, stale_where);
        let top = select_with_table(&mut tree, "orders", &[]);
        let fb = tree.add_kind(NodeKind::Eq);
        let subq_condition = tree.add_kind(NodeKind::Gt);

        let scope = OuterTables::new(&[]);
        let mut fx = engine_fixture(tree, fb, &scope);
        fx.bottom_select = bottom;
        fx.top_select = top;
        let mut engine = fx.engine();
        let key1 = engine.create_alias();
        let key2 = engine.create_alias();
        engine
            .build_where_by_fb(subq_condition, Some(key1), Some(key2))
            .unwrap();

        assert!(engine
            .tree
            .first_child_with_kind(bottom, NodeKind::Where)
            .is_none());
        let where_ = engine
            .tree
            .first_child_with_kind(top, NodeKind::Where)
            .unwrap();
        let and = engine.tree.find_only_node(where_, NodeKind::And).unwrap();
        assert_eq!(engine.tree.child(and, 0), Some(fb));
        // the conjoined condition is a dup of the subquery operator over
        // the two compare-key aliases
        let conjoined = engine.tree.child(and, 1).unwrap();
        assert_eq!(engine.tree.kind(conjoined), NodeKind::Gt);
        assert_ne!(conjoined, subq_condition);
        assert_eq!(engine.tree.child_count(conjoined), 2);
    }

    #[test]
    fn minus_wraps_both_branches_as_subqueries() {
        let mut tree = SyntaxTree::new();
        let left = select_with_table(&mut tree, "a", &["x"]);
        let right = select_with_table(&mut tree, "b", &["x"]);
        let fb = tree.add_kind(NodeKind::Eq);
        let scope = OuterTables::new(&[]);
        let mut fx = engine_fixture(tree, fb, &scope);
        let mut engine = fx.engine();

        let minus = engine.create_minus(left, right);
        assert_eq!(engine.tree.kind(minus), NodeKind::Minus);
        assert_eq!(engine.tree.child_count(minus), 2);
        for (i, select) in [left, right].into_iter().enumerate() {
            let subquery = engine.tree.child(minus, i).unwrap();
            assert_eq!(engine.tree.kind(subquery), NodeKind::Subquery);
            assert_eq!(engine.tree.child(subquery, 0), Some(select));
        }
    }

    #[test]
    fn op_branch_substitutes_subquery_operand() {
        let mut tree = SyntaxTree::new();
        // subq predicate: NOT_IN(lhs_ref, SUBQUERY)
        let not_in = tree.add_kind(NodeKind::NotIn);
        let lhs = tree.add_kind(NodeKind::CascadedElement);
        let any = tree.add_kind(NodeKind::AnyElement);
        let col = tree.add(NodeKind::Ident, "o_orderkey");
        tree.attach_child(not_in, lhs);
        tree.attach_child(lhs, any);
        tree.attach_child(any, col);
        let subquery = tree.add_kind(NodeKind::Subquery);
        tree.attach_child(not_in, subquery);
        let fb = tree.add_kind(NodeKind::Eq);

        let scope = OuterTables::new(&[]);
        let mut fx = engine_fixture(tree, fb, &scope);
        fx.subq_node = not_in;
        let mut engine = fx.engine();
        let view_alias = engine.create_alias();
        let col_alias = engine.create_alias();
        let branch = engine.create_op_branch(view_alias, col_alias).unwrap();

        assert_eq!(engine.tree.kind(branch), NodeKind::NotIn);
        let replaced = engine.tree.child(branch, 1).unwrap();
        assert_eq!(engine.tree.kind(replaced), NodeKind::CascadedElement);
        // original predicate keeps its SUBQUERY operand
        assert_eq!(engine.tree.kind(engine.tree.child(not_in, 1).unwrap()), NodeKind::Subquery);
    }
}
