//! The decorrelation template: the fixed orchestration every
//! predicate-kind variant specializes through [`FilterRewriteStrategy`].

use sqlshift_ast::{NodeId, NodeKind, SyntaxTree};
use sqlshift_errors::{internal_err, invariant, XlateResult};
use tracing::trace;

use crate::context::{
    AliasRegistry, FilterBlock, FilterBlockContext, ScopeInfo, TranslateContext,
};

/// Rewrite engine state for one filter-block transformation.
///
/// Holds the arena, the lent translation context, the correlation oracle,
/// references to the original (pre-clone) and cloned query pair, and the
/// alias bookkeeping built up as joins and projections are created. The
/// surgery, classification, projection, and set-rewrite primitives are all
/// methods on this type; a strategy composes them inside
/// [`FilterRewriteStrategy::rewrite_filter_block`].
pub struct Decorrelator<'a> {
    pub tree: &'a mut SyntaxTree,
    pub ctx: &'a mut TranslateContext,
    pub scope: &'a dyn ScopeInfo,

    /// Original query pair; correlation is always tested against these.
    pub original_top_select: NodeId,
    pub original_bottom_select: NodeId,

    /// Cloned query pair the rewrite edits.
    pub top_select: NodeId,
    pub bottom_select: NodeId,

    /// The subquery predicate node owning the filter block.
    pub subq_node: NodeId,
    /// The filter block's predicate; may be replaced during the rewrite
    /// (e.g. when an IS NULL anti-condition is conjoined in).
    pub fb_node: NodeId,

    /// GROUP/ORDER branches of the cloned outer query, re-bound after
    /// column renaming.
    pub top_group: Option<NodeId>,
    pub top_order: Option<NodeId>,

    pub aliases: AliasRegistry,
    /// Set when the classifier sees a correlated operand under a
    /// non-equality comparison.
    pub has_not_equal_correlated: bool,
    /// The join-type node the current rewrite is building, if any; keys the
    /// basket's not-equal-condition table.
    pub join_type_node: Option<NodeId>,
}

impl<'a> Decorrelator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        tree: &'a mut SyntaxTree,
        ctx: &'a mut TranslateContext,
        scope: &'a dyn ScopeInfo,
        original_top_select: NodeId,
        original_bottom_select: NodeId,
        top_select: NodeId,
        bottom_select: NodeId,
        subq_node: NodeId,
        fb_node: NodeId,
    ) -> Self {
        let top_group = tree.first_child_with_kind(top_select, NodeKind::Group);
        let top_order = tree.first_child_with_kind(top_select, NodeKind::Order);
        Decorrelator {
            tree,
            ctx,
            scope,
            original_top_select,
            original_bottom_select,
            top_select,
            bottom_select,
            subq_node,
            fb_node,
            top_group,
            top_order,
            aliases: AliasRegistry::default(),
            has_not_equal_correlated: false,
            join_type_node: None,
        }
    }
}

/// The contract a predicate-kind variant (EXISTS, NOT EXISTS, IN, NOT IN,
/// comparator subquery, ...) must satisfy: consume the original/cloned
/// query references and the filter predicate held by the engine, and leave
/// the rewritten outer query in `engine.top_select` with exactly one
/// replacement predicate in `engine.fb_node`.
pub trait FilterRewriteStrategy {
    fn rewrite_filter_block(&self, engine: &mut Decorrelator<'_>) -> XlateResult<()>;
}

/// Rewrite one correlated filter block.
///
/// The fixed template: pop the innermost query block, clear its aggregation
/// marker, read the enclosing block, restore the stack, mark the sub-query
/// filter block transformed, clone the outer skeleton and the whole inner
/// query, expand a missing outer projection, delegate to the variant,
/// renumber generated aliases, and install the rewritten outer subtree as
/// the filter block's output.
pub fn decorrelate_filter_block(
    tree: &mut SyntaxTree,
    fb_context: &mut FilterBlockContext,
    fb: &mut FilterBlock,
    ctx: &mut TranslateContext,
    scope: &dyn ScopeInfo,
    strategy: &dyn FilterRewriteStrategy,
) -> XlateResult<()> {
    let depth_before = fb_context.query_depth();

    let mut bottom = fb_context
        .pop_query()
        .ok_or_else(|| internal_err("no inner query block on the stack"))?;
    bottom.clear_aggregation();
    let original_top_select = fb_context
        .peek_query()
        .ok_or_else(|| internal_err("no outer query block on the stack"))?
        .select();
    let original_bottom_select = bottom.select();

    // Transform-once guard comes before the clones: an aborted rewrite must
    // not leave cloned query trees in the arena.
    let subq = fb_context
        .peek_subquery_mut()
        .ok_or_else(|| internal_err("no sub-query filter block on the stack"))?;
    subq.set_transformed()?;
    let subq_node = subq.ast_node();

    let top_select = fb_context
        .peek_query()
        .ok_or_else(|| internal_err("no outer query block on the stack"))?
        .clone_skeleton_query(tree);
    let bottom_select = bottom.clone_whole_query(tree);
    fb_context.push_query(bottom);
    invariant!(
        fb_context.query_depth() == depth_before,
        "query stack depth changed during filter block setup"
    );

    trace!(
        target: "decorrelate",
        subq = %subq_node,
        predicate = %tree.dump(fb.ast_node()),
        "rewriting correlated filter block"
    );

    let mut engine = Decorrelator::new(
        tree,
        ctx,
        scope,
        original_top_select,
        original_bottom_select,
        top_select,
        bottom_select,
        subq_node,
        fb.ast_node(),
    );
    engine.pre_process_asterisk();
    strategy.rewrite_filter_block(&mut engine)?;
    engine.rebuild_column_alias(top_select);
    let fb_node = engine.fb_node;

    fb.set_ast_node(fb_node);
    fb.set_transformed_node(top_select);

    trace!(
        target: "decorrelate",
        rewritten = %tree.dump(top_select),
        "installed decorrelated outer query"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BasketKey, BasketValue, QueryBlock, SubQueryFilterBlock};
    use crate::test_support::{column_ref, select_with_table, OuterTables};
    use pretty_assertions::assert_eq;
    use sqlshift_errors::XlateError;

    /// The NOT IN shape: left join the inner query, group its join keys,
    /// and keep outer rows where the joined key came up NULL.
    struct LeftJoinRewrite;

    impl FilterRewriteStrategy for LeftJoinRewrite {
        fn rewrite_filter_block(&self, engine: &mut Decorrelator<'_>) -> XlateResult<()> {
            let join = engine.create_join(engine.top_select)?;
            let join_type = engine.tree.add(NodeKind::JoinType, "left");
            engine.join_type_node = Some(join_type);
            let join_alias = engine.build_join(Some(join_type), join, engine.bottom_select)?;
            engine.rebuild_select_list_by_filter(true, true, join_alias, None)?;
            let condition = engine.fb_node;
            engine.build_simple_where(condition);
            Ok(())
        }
    }

    fn scenario(
        tree: &mut SyntaxTree,
    ) -> (FilterBlockContext, FilterBlock, NodeId, NodeId, NodeId) {
        let outer = select_with_table(tree, "orders", &["o_orderkey"]);
        let inner = select_with_table(tree, "lineitem", &["l_orderkey"]);

        let predicate = tree.add_kind(NodeKind::Eq);
        let inner_ref = column_ref(tree, Some("lineitem"), "l_orderkey");
        let outer_ref = column_ref(tree, Some("orders"), "o_orderkey");
        tree.attach_child(predicate, inner_ref);
        tree.attach_child(predicate, outer_ref);

        let subq = tree.add_kind(NodeKind::NotIn);
        let subquery = tree.add_kind(NodeKind::Subquery);
        tree.attach_child(subq, subquery);

        let mut fb_context = FilterBlockContext::new();
        fb_context.push_query(QueryBlock::new(tree, outer));
        fb_context.push_query(QueryBlock::new(tree, inner));
        fb_context.push_subquery(SubQueryFilterBlock::new(subq));

        let fb = FilterBlock::new(predicate);
        (fb_context, fb, outer, inner, predicate)
    }

    #[test]
    fn not_in_shape_becomes_grouped_left_join_with_anti_condition() {
        let mut tree = SyntaxTree::new();
        let (mut fb_context, mut fb, outer, inner, predicate) = scenario(&mut tree);
        let mut ctx = TranslateContext::new();
        let scope = OuterTables::new(&["orders"]);

        decorrelate_filter_block(
            &mut tree,
            &mut fb_context,
            &mut fb,
            &mut ctx,
            &scope,
            &LeftJoinRewrite,
        )
        .unwrap();

        // the rewritten outer query is a fresh subtree, not the original
        let rewritten = fb.transformed_node().unwrap();
        assert_ne!(rewritten, outer);

        // it carries the left join to the decorrelated inner clone
        let from = tree.first_child_with_kind(rewritten, NodeKind::From).unwrap();
        let table_ref = tree.child(from, 0).unwrap();
        let join = tree
            .first_child_with_kind(table_ref, NodeKind::JoinDef)
            .unwrap();
        let join_type = tree.child(join, 0).unwrap();
        assert_eq!(tree.kind(join_type), NodeKind::JoinType);
        assert_eq!(tree.text(join_type), "left");

        // the joined derived table projects and groups the join key once
        let derived = tree.child(join, 1).unwrap();
        let inner_clone = tree
            .find_only_node(derived, NodeKind::Subquery)
            .and_then(|s| tree.child(s, 0))
            .unwrap();
        assert_ne!(inner_clone, inner);
        let inner_list = tree
            .first_child_with_kind(inner_clone, NodeKind::SelectList)
            .unwrap();
        assert_eq!(tree.child_count(inner_list), 2);
        let inner_group = tree
            .first_child_with_kind(inner_clone, NodeKind::Group)
            .unwrap();
        assert_eq!(tree.child_count(inner_group), 1);

        // replacement predicate: original equality AND a tagged IS NULL
        let and = fb.ast_node();
        assert_eq!(tree.kind(and), NodeKind::And);
        assert_eq!(tree.child(and, 0), Some(predicate));
        let is_null = tree.child(and, 1).unwrap();
        assert_eq!(tree.kind(is_null), NodeKind::IsNull);
        assert!(matches!(
            ctx.get(&BasketKey::Node(is_null)),
            Some(BasketValue::Flag(true))
        ));

        // the equality's inner operand now references the derived table
        let join_alias_ident = tree
            .first_child_with_kind(derived, NodeKind::Alias)
            .and_then(|alias| tree.child(alias, 0))
            .unwrap();
        let inner_any = tree
            .find_only_node(tree.child(predicate, 0).unwrap(), NodeKind::AnyElement)
            .unwrap();
        assert_eq!(
            tree.text(tree.child(inner_any, 0).unwrap()),
            tree.text(join_alias_ident)
        );

        // the predicate landed in the rewritten outer WHERE
        let where_ = tree
            .first_child_with_kind(rewritten, NodeKind::Where)
            .unwrap();
        assert_eq!(tree.find_only_node(where_, NodeKind::And), Some(and));

        // the originals are structurally untouched
        assert!(tree.first_child_with_kind(outer, NodeKind::JoinDef).is_none());
        let original_inner_list = tree
            .first_child_with_kind(inner, NodeKind::SelectList)
            .unwrap();
        assert_eq!(tree.child_count(original_inner_list), 1);
    }

    #[test]
    fn rewriting_the_same_block_twice_is_an_internal_error() {
        let mut tree = SyntaxTree::new();
        let (mut fb_context, mut fb, _, _, _) = scenario(&mut tree);
        let mut ctx = TranslateContext::new();
        let scope = OuterTables::new(&["orders"]);

        decorrelate_filter_block(
            &mut tree,
            &mut fb_context,
            &mut fb,
            &mut ctx,
            &scope,
            &LeftJoinRewrite,
        )
        .unwrap();
        let nodes_before = tree.node_count();
        assert!(matches!(
            decorrelate_filter_block(
                &mut tree,
                &mut fb_context,
                &mut fb,
                &mut ctx,
                &scope,
                &LeftJoinRewrite,
            ),
            Err(XlateError::Internal(_))
        ));
        // the aborted rewrite cloned nothing into the arena
        assert_eq!(tree.node_count(), nodes_before);
    }

    #[test]
    fn inner_aggregation_marker_is_cleared_on_entry() {
        let mut tree = SyntaxTree::new();
        let (mut fb_context, mut fb, _, _, _) = scenario(&mut tree);
        let marker = tree.add_kind(NodeKind::StandardFunction);
        let mut inner_block = fb_context.pop_query().unwrap();
        inner_block.set_aggregation(Some(marker));
        fb_context.push_query(inner_block);

        let mut ctx = TranslateContext::new();
        let scope = OuterTables::new(&["orders"]);
        decorrelate_filter_block(
            &mut tree,
            &mut fb_context,
            &mut fb,
            &mut ctx,
            &scope,
            &LeftJoinRewrite,
        )
        .unwrap();

        let inner_block = fb_context.pop_query().unwrap();
        assert_eq!(inner_block.aggregation(), None);
    }

    #[test]
    fn empty_query_stack_is_an_internal_error() {
        let mut tree = SyntaxTree::new();
        let predicate = tree.add_kind(NodeKind::Eq);
        let mut fb_context = FilterBlockContext::new();
        let mut fb = FilterBlock::new(predicate);
        let mut ctx = TranslateContext::new();
        let scope = OuterTables::new(&[]);
        assert!(matches!(
            decorrelate_filter_block(
                &mut tree,
                &mut fb_context,
                &mut fb,
                &mut ctx,
                &scope,
                &LeftJoinRewrite,
            ),
            Err(XlateError::Internal(_))
        ));
    }
}
