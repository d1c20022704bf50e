//! Shared state for one translation run: the basket side-table, the
//! query/filter block stacks, and the alias registry scoped to a single
//! rewrite.

use std::collections::HashMap;

use sqlshift_ast::{NodeId, NodeKind, SyntaxTree};
use sqlshift_errors::{internal, XlateResult};

/// Name prefix for every alias this engine generates. Canonical renumbering
/// and user-alias preservation both key off this prefix.
pub const GENERATED_PREFIX: &str = "sqlshift";

/// One column of a relation, as reported by the catalog layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub table_alias: String,
    pub column_alias: String,
}

/// Catalog-facing queries the engine needs from its caller: projection
/// expansion for `SELECT *` shapes, and the correlation oracle.
///
/// The oracle is always consulted against the *original* (pre-clone) query
/// scope stack, innermost scope last.
pub trait ScopeInfo {
    /// Ordered column list for the relation(s) referenced by a FROM clause,
    /// or `None` when the catalog has no row info for it.
    fn row_info(&self, tree: &SyntaxTree, from: NodeId) -> Option<Vec<ColumnInfo>>;

    /// Whether `operand` resolves to a column of an enclosing query scope.
    fn is_correlated(&self, tree: &SyntaxTree, scope_stack: &[NodeId], operand: NodeId) -> bool;
}

/// Key into the translation basket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasketKey {
    /// A fact attached to a specific node.
    Node(NodeId),
    /// The join-type node to not-equal-condition-list association table.
    JoinTypeConditions,
}

/// Value in the translation basket. A closed enum: the engine only ever
/// smuggles these two shapes between rewrite steps.
#[derive(Debug, Clone)]
pub enum BasketValue {
    Flag(bool),
    JoinConditionTable(HashMap<NodeId, Vec<NodeId>>),
}

/// Keyed side-table shared across all filter-block rewrites of one
/// translation run, plus the counter backing globally-unique alias names.
///
/// Owned by the driver and lent to the engine; the engine adds and checks
/// entries but never removes them. Absence of a key is an expected state.
#[derive(Debug, Default)]
pub struct TranslateContext {
    basket: HashMap<BasketKey, BasketValue>,
    alias_seq: u32,
}

impl TranslateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &BasketKey) -> Option<&BasketValue> {
        self.basket.get(key)
    }

    pub fn get_mut(&mut self, key: &BasketKey) -> Option<&mut BasketValue> {
        self.basket.get_mut(key)
    }

    pub fn put(&mut self, key: BasketKey, value: BasketValue) {
        self.basket.insert(key, value);
    }

    /// Next globally-unique generated alias name (`sqlshift_0`,
    /// `sqlshift_1`, ...). Unique across every rewrite sharing this context.
    pub fn next_alias_name(&mut self) -> String {
        let name = format!("{}_{}", GENERATED_PREFIX, self.alias_seq);
        self.alias_seq += 1;
        name
    }
}

/// One nested query scope being rewritten.
///
/// Wraps a SELECT subtree and remembers its GROUP/ORDER branches for later
/// re-binding, plus an aggregation marker that is cleared on entry to a
/// filter-block rewrite (the rewritten pair must not inherit stale
/// aggregation state).
#[derive(Debug, Clone)]
pub struct QueryBlock {
    select: NodeId,
    group: Option<NodeId>,
    order: Option<NodeId>,
    aggregation: Option<NodeId>,
}

impl QueryBlock {
    pub fn new(tree: &SyntaxTree, select: NodeId) -> Self {
        QueryBlock {
            select,
            group: tree.first_child_with_kind(select, NodeKind::Group),
            order: tree.first_child_with_kind(select, NodeKind::Order),
            aggregation: None,
        }
    }

    pub fn select(&self) -> NodeId {
        self.select
    }

    pub fn group(&self) -> Option<NodeId> {
        self.group
    }

    pub fn order(&self) -> Option<NodeId> {
        self.order
    }

    pub fn set_aggregation(&mut self, node: Option<NodeId>) {
        self.aggregation = node;
    }

    pub fn aggregation(&self) -> Option<NodeId> {
        self.aggregation
    }

    pub fn clear_aggregation(&mut self) {
        self.aggregation = None;
    }

    /// Deep copy of the whole query, used for the rewritten inner query.
    pub fn clone_whole_query(&self, tree: &mut SyntaxTree) -> NodeId {
        tree.clone_tree(self.select)
    }

    /// Deep copy without the predicate payload (WHERE branch), used for the
    /// rewritten outer query.
    pub fn clone_skeleton_query(&self, tree: &mut SyntaxTree) -> NodeId {
        let copy = tree.clone_tree(self.select);
        tree.delete_branch(copy, NodeKind::Where);
        copy
    }
}

/// The correlated predicate subtree being unnested, plus the slot its
/// rewritten replacement is installed into.
#[derive(Debug)]
pub struct FilterBlock {
    node: NodeId,
    transformed: Option<NodeId>,
}

impl FilterBlock {
    pub fn new(node: NodeId) -> Self {
        FilterBlock {
            node,
            transformed: None,
        }
    }

    pub fn ast_node(&self) -> NodeId {
        self.node
    }

    pub fn set_ast_node(&mut self, node: NodeId) {
        self.node = node;
    }

    pub fn transformed_node(&self) -> Option<NodeId> {
        self.transformed
    }

    pub fn set_transformed_node(&mut self, node: NodeId) {
        self.transformed = Some(node);
    }
}

/// The subquery predicate node (e.g. a NOT_IN with a SUBQUERY operand)
/// owning the filter block, with a transform-once guard.
#[derive(Debug)]
pub struct SubQueryFilterBlock {
    node: NodeId,
    transformed: bool,
}

impl SubQueryFilterBlock {
    pub fn new(node: NodeId) -> Self {
        SubQueryFilterBlock {
            node,
            transformed: false,
        }
    }

    pub fn ast_node(&self) -> NodeId {
        self.node
    }

    pub fn is_transformed(&self) -> bool {
        self.transformed
    }

    /// Mark this block transformed. Transforming the same block twice is a
    /// bug in the orchestration, not bad input.
    pub fn set_transformed(&mut self) -> XlateResult<()> {
        if self.transformed {
            internal!("sub-query filter block {} transformed twice", self.node);
        }
        self.transformed = true;
        Ok(())
    }
}

/// Stacks of nested query scopes (innermost on top) and of pending
/// sub-query filter blocks. Lives for one transformation pass.
#[derive(Debug, Default)]
pub struct FilterBlockContext {
    query_stack: Vec<QueryBlock>,
    subquery_stack: Vec<SubQueryFilterBlock>,
}

impl FilterBlockContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_query(&mut self, block: QueryBlock) {
        self.query_stack.push(block);
    }

    pub fn pop_query(&mut self) -> Option<QueryBlock> {
        self.query_stack.pop()
    }

    pub fn peek_query(&self) -> Option<&QueryBlock> {
        self.query_stack.last()
    }

    pub fn query_depth(&self) -> usize {
        self.query_stack.len()
    }

    pub fn push_subquery(&mut self, block: SubQueryFilterBlock) {
        self.subquery_stack.push(block);
    }

    pub fn peek_subquery_mut(&mut self) -> Option<&mut SubQueryFilterBlock> {
        self.subquery_stack.last_mut()
    }
}

/// Alias bookkeeping for one rewrite: table name to generated table alias,
/// and table alias to (column name to column alias). Consulted by exact
/// lookup only; insertion order is irrelevant.
#[derive(Debug, Default)]
pub struct AliasRegistry {
    table_aliases: HashMap<String, String>,
    column_aliases: HashMap<String, HashMap<String, String>>,
}

impl AliasRegistry {
    pub fn register_table_alias(&mut self, table: impl Into<String>, alias: impl Into<String>) {
        self.table_aliases.insert(table.into(), alias.into());
    }

    pub fn table_alias(&self, table: &str) -> Option<&str> {
        self.table_aliases.get(table).map(String::as_str)
    }

    /// Record `column -> column_alias` under a table alias. The empty string
    /// keys projections with no table alias.
    pub fn register_column_alias(
        &mut self,
        table_alias: impl Into<String>,
        column: impl Into<String>,
        column_alias: impl Into<String>,
    ) {
        self.column_aliases
            .entry(table_alias.into())
            .or_default()
            .insert(column.into(), column_alias.into());
    }

    pub fn column_alias(&self, table_alias: &str, column: &str) -> Option<&str> {
        self.column_aliases
            .get(table_alias)
            .and_then(|m| m.get(column))
            .map(String::as_str)
    }
}
