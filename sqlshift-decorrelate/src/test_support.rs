//! Builders shared by the unit tests: canned query subtrees, a
//! table-name-based correlation oracle, and a fixture wiring a
//! [`Decorrelator`] over a standalone tree.

use std::collections::HashSet;

use sqlshift_ast::{NodeId, NodeKind, SyntaxTree};

use crate::context::{ColumnInfo, ScopeInfo, TranslateContext};
use crate::process::Decorrelator;

/// `CASCADED_ELEMENT (ANY_ELEMENT [table] column)`.
pub(crate) fn column_ref(tree: &mut SyntaxTree, table: Option<&str>, column: &str) -> NodeId {
    let cascaded = tree.add_kind(NodeKind::CascadedElement);
    let any = tree.add_kind(NodeKind::AnyElement);
    tree.attach_child(cascaded, any);
    if let Some(table) = table {
        let qualifier = tree.add(NodeKind::Ident, table);
        tree.attach_child(any, qualifier);
    }
    let ident = tree.add(NodeKind::Ident, column);
    tree.attach_child(any, ident);
    cascaded
}

/// Minimal `SELECT columns FROM table` subtree. The projection list is
/// always present, possibly empty.
pub(crate) fn select_with_table(
    tree: &mut SyntaxTree,
    table: &str,
    columns: &[&str],
) -> NodeId {
    let select = tree.add_kind(NodeKind::Select);
    let from = tree.add_kind(NodeKind::From);
    tree.attach_child(select, from);
    let table_ref = tree.add_kind(NodeKind::TableRef);
    tree.attach_child(from, table_ref);
    let table_ref_element = tree.add_kind(NodeKind::TableRefElement);
    tree.attach_child(table_ref, table_ref_element);
    let table_expression = tree.add_kind(NodeKind::TableExpression);
    tree.attach_child(table_ref_element, table_expression);
    let ident = tree.add(NodeKind::Ident, table);
    tree.attach_child(table_expression, ident);
    let select_list = tree.add_kind(NodeKind::SelectList);
    tree.attach_child(select, select_list);
    for column in columns {
        let item = tree.add_kind(NodeKind::SelectItem);
        tree.attach_child(select_list, item);
        let expr = tree.add_kind(NodeKind::Expr);
        tree.attach_child(item, expr);
        let reference = column_ref(tree, None, column);
        tree.attach_child(expr, reference);
    }
    select
}

/// Correlation oracle that treats any two-part reference whose qualifier is
/// one of the given table names as an outer-scope column.
pub(crate) struct OuterTables {
    tables: HashSet<String>,
    rows: Option<Vec<ColumnInfo>>,
}

impl OuterTables {
    pub(crate) fn new(tables: &[&str]) -> Self {
        OuterTables {
            tables: tables.iter().map(|t| t.to_string()).collect(),
            rows: None,
        }
    }

    pub(crate) fn with_rows(mut self, rows: Vec<ColumnInfo>) -> Self {
        self.rows = Some(rows);
        self
    }
}

impl ScopeInfo for OuterTables {
    fn row_info(&self, _tree: &SyntaxTree, _from: NodeId) -> Option<Vec<ColumnInfo>> {
        self.rows.clone()
    }

    fn is_correlated(
        &self,
        tree: &SyntaxTree,
        _scope_stack: &[NodeId],
        operand: NodeId,
    ) -> bool {
        let any = match tree.find_only_node(operand, NodeKind::AnyElement) {
            Some(a) => a,
            None => return false,
        };
        if tree.child_count(any) != 2 {
            return false;
        }
        match tree.child(any, 0) {
            Some(qualifier) => self.tables.contains(tree.text(qualifier)),
            None => false,
        }
    }
}

/// Owns everything a [`Decorrelator`] borrows. Tests override the query
/// references they care about and leave the canned defaults elsewhere.
pub(crate) struct EngineFixture<'s> {
    pub(crate) tree: SyntaxTree,
    pub(crate) ctx: TranslateContext,
    scope: &'s dyn ScopeInfo,
    pub(crate) original_top_select: NodeId,
    pub(crate) original_bottom_select: NodeId,
    pub(crate) top_select: NodeId,
    pub(crate) bottom_select: NodeId,
    pub(crate) subq_node: NodeId,
    pub(crate) fb_node: NodeId,
}

pub(crate) fn engine_fixture<'s>(
    mut tree: SyntaxTree,
    fb_node: NodeId,
    scope: &'s dyn ScopeInfo,
) -> EngineFixture<'s> {
    let original_top_select = select_with_table(&mut tree, "orders", &["o_orderkey"]);
    let original_bottom_select = select_with_table(&mut tree, "lineitem", &["l_orderkey"]);
    let top_select = tree.clone_tree(original_top_select);
    let bottom_select = tree.clone_tree(original_bottom_select);
    let subq_node = tree.add_kind(NodeKind::NotIn);
    let subquery = tree.add_kind(NodeKind::Subquery);
    tree.attach_child(subq_node, subquery);
    EngineFixture {
        tree,
        ctx: TranslateContext::new(),
        scope,
        original_top_select,
        original_bottom_select,
        top_select,
        bottom_select,
        subq_node,
        fb_node,
    }
}

impl EngineFixture<'_> {
    pub(crate) fn engine(&mut self) -> Decorrelator<'_> {
        Decorrelator::new(
            &mut self.tree,
            &mut self.ctx,
            self.scope,
            self.original_top_select,
            self.original_bottom_select,
            self.top_select,
            self.bottom_select,
            self.subq_node,
            self.fb_node,
        )
    }
}
