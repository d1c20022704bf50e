//! Projection-list rebuilding: exporting join keys through the derived
//! tables, GROUP/ORDER re-binding against the renamed columns, and the
//! final canonical renumbering of generated aliases.

use std::collections::HashMap;

use sqlshift_ast::{NodeId, NodeKind};
use sqlshift_errors::{bad_shape_err, internal, internal_err, XlateResult};

use crate::context::{BasketKey, BasketValue, GENERATED_PREFIX};
use crate::process::Decorrelator;

impl Decorrelator<'_> {
    /// Expand an empty outer projection list from catalog row info, so the
    /// rewritten outer query projects the same columns the original
    /// `SELECT *` resolved to. A no-op when the projection is already
    /// explicit or the catalog has nothing to offer.
    pub fn pre_process_asterisk(&mut self) {
        if let Some(list) = self
            .tree
            .first_child_with_kind(self.top_select, NodeKind::SelectList)
        {
            if self.tree.child_count(list) > 0 {
                return;
            }
        }
        let from = match self
            .tree
            .first_child_with_kind(self.original_top_select, NodeKind::From)
        {
            Some(f) => f,
            None => return,
        };
        let columns = match self.scope.row_info(self.tree, from) {
            Some(c) if !c.is_empty() => c,
            _ => return,
        };
        let list = match self
            .tree
            .first_child_with_kind(self.top_select, NodeKind::SelectList)
        {
            Some(l) => l,
            None => {
                let l = self.tree.add_kind(NodeKind::SelectList);
                self.tree.attach_child(self.top_select, l);
                l
            }
        };
        for column in columns {
            let table = self.tree.add(NodeKind::Ident, column.table_alias);
            let name = self.tree.add(NodeKind::Ident, column.column_alias);
            let reference = self.create_qualified_column_ref(table, name);
            let item = self.tree.add_kind(NodeKind::SelectItem);
            let expr = self.tree.add_kind(NodeKind::Expr);
            self.tree.attach_child(item, expr);
            self.tree.attach_child(expr, reference);
            self.tree.attach_child(list, item);
        }
    }

    /// Append a column reference to a projection list and give it a fresh
    /// generated alias; returns the alias node. Two-part references are
    /// stripped to their column part before projecting (the derived table's
    /// own qualifier would not resolve inside it).
    pub fn add_select_item(
        &mut self,
        select_list: NodeId,
        column_ref: NodeId,
    ) -> XlateResult<NodeId> {
        if self.tree.child_count(column_ref) == 0 {
            return Ok(column_ref);
        }
        let head = self
            .tree
            .child(column_ref, 0)
            .ok_or_else(|| internal_err("column reference lost its head"))?;
        if self.tree.kind(head) == NodeKind::AnyElement && self.tree.child_count(head) == 2 {
            self.tree.delete_child(head, 0);
        }
        let item = self.tree.add_kind(NodeKind::SelectItem);
        let expr = self.tree.add_kind(NodeKind::Expr);
        self.tree.attach_child(item, expr);
        self.tree.attach_child(expr, column_ref);
        self.tree.attach_child(select_list, item);
        Ok(self.add_alias(item))
    }

    /// Existing alias of a select item, or a fresh generated one.
    pub fn add_alias(&mut self, item: NodeId) -> NodeId {
        if let Some(alias) = self.tree.first_child_with_kind(item, NodeKind::Alias) {
            return alias;
        }
        let alias = self.create_alias();
        self.tree.attach_child(item, alias);
        alias
    }

    /// Add a grouping element for `column_ref` on the bottom query, creating
    /// the GROUP branch when absent. Two-part references are stripped the
    /// same way projected items are.
    pub fn build_group(&mut self, column_ref: NodeId) {
        if let Some(head) = self.tree.child(column_ref, 0) {
            if self.tree.kind(head) == NodeKind::AnyElement && self.tree.child_count(head) == 2 {
                self.tree.delete_child(head, 0);
            }
        }
        let group = match self
            .tree
            .first_child_with_kind(self.bottom_select, NodeKind::Group)
        {
            Some(g) => g,
            None => {
                let g = self.tree.add_kind(NodeKind::Group);
                self.tree.attach_child(self.bottom_select, g);
                g
            }
        };
        let element = self.tree.add_kind(NodeKind::GroupByElement);
        self.tree.attach_child(group, element);
        let expr = self.tree.add_kind(NodeKind::Expr);
        self.tree.attach_child(element, expr);
        self.tree.attach_child(expr, column_ref);
    }

    /// Alias every item of a projection list, register the column-name to
    /// alias mapping under `table_alias` (or the anonymous scope), and
    /// re-bind GROUP/ORDER references accordingly. Returns the alias nodes
    /// in projection order.
    pub fn build_select_list_alias(
        &mut self,
        table_alias: Option<NodeId>,
        select_list: NodeId,
    ) -> XlateResult<Vec<NodeId>> {
        let scope_key = match table_alias {
            Some(alias) => self.alias_text(alias)?,
            None => String::new(),
        };
        let mut alias_list = Vec::new();
        for i in 0..self.tree.child_count(select_list) {
            let item = match self.tree.child(select_list, i) {
                Some(it) => it,
                None => break,
            };
            let column_alias = if self.tree.child_count(item) > 1 {
                match self.tree.child(item, 1) {
                    Some(a) => a,
                    None => continue,
                }
            } else {
                self.add_alias(item)
            };
            alias_list.push(column_alias);

            let any = self
                .tree
                .child(item, 0)
                .and_then(|expr| self.tree.child(expr, 0))
                .and_then(|cascaded| self.tree.child(cascaded, 0));
            let any = match any {
                Some(a) if self.tree.kind(a) == NodeKind::AnyElement => a,
                _ => continue,
            };
            let column_name = if self.tree.child_count(any) == 2 {
                self.tree.child(any, 1)
            } else {
                self.tree.child(any, 0)
            };
            let column_name = match column_name {
                Some(c) => self.tree.text(c).to_string(),
                None => continue,
            };
            let alias_name = self.alias_text(column_alias)?;
            self.aliases
                .register_column_alias(scope_key.clone(), column_name, alias_name);
        }
        self.rebuild_group_order(table_alias)?;
        Ok(alias_list)
    }

    /// Closing-select projection re-exporting every alias of an inner
    /// derived table, renaming ORDER references as new aliases supersede the
    /// old ones.
    pub fn create_select_list_for_closing_select(
        &mut self,
        alias_list: &[NodeId],
    ) -> XlateResult<NodeId> {
        let select_list = self.tree.add_kind(NodeKind::SelectList);
        for &alias in alias_list {
            let old_name = self.alias_text(alias)?;
            let ident = self
                .tree
                .child(alias, 0)
                .ok_or_else(|| internal_err("alias node without name"))?;
            let ident = self.tree.clone_tree(ident);
            let reference = self.create_column_ref(ident);
            let new_alias = self.add_select_item(select_list, reference)?;
            let new_name = self.alias_text(new_alias)?;
            self.re_rebuild_group_order(&old_name, &new_name);
        }
        Ok(select_list)
    }

    /// Rebuild the projections of both cloned queries around the collected
    /// join keys.
    ///
    /// Every uncorrelated (bottom) key is projected out of the inner query
    /// under a generated alias and its reference inside the predicate is
    /// rewritten to `join_sub_alias.key_alias`. With `need_group`, each
    /// distinct key column is projected and grouped exactly once, and
    /// repeated keys reuse the first alias. With `is_left_join`, an
    /// `IS NULL` anti-condition on the (rewritten) bottom key is conjoined
    /// into the filter predicate and tagged in the basket so later passes
    /// keep their hands off it. The first correlated (top) key, if any, is
    /// projected into the outer query under `top_alias`.
    pub fn rebuild_select_list_by_filter(
        &mut self,
        is_left_join: bool,
        need_group: bool,
        join_sub_alias: NodeId,
        top_alias: Option<NodeId>,
    ) -> XlateResult<()> {
        let key_sets = self.collect_filter_keys()?;
        let join_alias_name = self.alias_text(join_sub_alias)?;
        let mut grouped: HashMap<String, NodeId> = HashMap::new();

        for keys in &key_sets {
            for &bottom_key in &keys.uncorrelated {
                let any = self
                    .tree
                    .find_only_node(bottom_key, NodeKind::AnyElement)
                    .ok_or_else(|| bad_shape_err("join key has no column reference"))?;
                let select_key = {
                    let count = self.tree.child_count(any);
                    let ident = if count == 2 {
                        self.tree.child(any, 1)
                    } else {
                        self.tree.child(any, 0)
                    };
                    match ident {
                        Some(id) => self.tree.text(id).to_string(),
                        None => return Err(bad_shape_err("join key has no column name")),
                    }
                };

                let bottom_list = self
                    .tree
                    .first_child_with_kind(self.bottom_select, NodeKind::SelectList)
                    .ok_or_else(|| bad_shape_err("inner query has no projection list"))?;
                let key_alias = if need_group {
                    match grouped.get(&select_key) {
                        Some(&alias) => alias,
                        None => {
                            let group_ref = self.tree.clone_tree(bottom_key);
                            self.build_group(group_ref);
                            let item_ref = self.tree.clone_tree(bottom_key);
                            let alias = self.add_select_item(bottom_list, item_ref)?;
                            grouped.insert(select_key.clone(), alias);
                            alias
                        }
                    }
                } else {
                    let item_ref = self.tree.clone_tree(bottom_key);
                    self.add_select_item(bottom_list, item_ref)?
                };
                let key_alias_name = self.alias_text(key_alias)?;

                // Re-point the predicate's bottom operand at the exported key.
                if self.tree.child_count(any) == 2 {
                    if let (Some(qualifier), Some(column)) =
                        (self.tree.child(any, 0), self.tree.child(any, 1))
                    {
                        self.tree.set_text(qualifier, join_alias_name.clone());
                        self.tree.set_text(column, key_alias_name);
                    }
                } else if let Some(column) = self.tree.child(any, 0) {
                    self.tree.set_text(column, key_alias_name);
                }

                if is_left_join && !keys.correlated.is_empty() {
                    let is_null = self.tree.add_kind(NodeKind::IsNull);
                    let key_copy = self.tree.clone_tree(bottom_key);
                    self.tree.attach_child(is_null, key_copy);
                    let and = self.tree.add_kind(NodeKind::And);
                    self.tree.attach_child(and, self.fb_node);
                    self.tree.attach_child(and, is_null);
                    self.tag_no_optimize(is_null)?;
                    self.fb_node = and;
                }

                self.rebuild_where_key(bottom_key, any);
            }

            if let (Some(&top_key), Some(top_alias)) = (keys.correlated.first(), top_alias) {
                let top_list = self
                    .tree
                    .first_child_with_kind(self.top_select, NodeKind::SelectList)
                    .ok_or_else(|| bad_shape_err("outer query has no projection list"))?;
                let item_ref = self.tree.clone_tree(top_key);
                let key_alias = self.add_select_item(top_list, item_ref)?;
                let key_alias_name = self.alias_text(key_alias)?;
                let top_alias_name = self.alias_text(top_alias)?;
                let any = self
                    .tree
                    .find_only_node(top_key, NodeKind::AnyElement)
                    .ok_or_else(|| bad_shape_err("outer join key has no column reference"))?;
                if self.tree.child_count(any) == 2 {
                    if let (Some(qualifier), Some(column)) =
                        (self.tree.child(any, 0), self.tree.child(any, 1))
                    {
                        self.tree.set_text(qualifier, top_alias_name);
                        self.tree.set_text(column, key_alias_name);
                    }
                } else if let Some(column) = self.tree.child(any, 0) {
                    self.tree.set_text(column, key_alias_name);
                }
                self.rebuild_where_key(top_key, any);
            }
        }
        Ok(())
    }

    /// Mark `node` as opaque to downstream condition optimization. A prior
    /// mark on the same node means two rewrites raced over it.
    pub fn tag_no_optimize(&mut self, node: NodeId) -> XlateResult<()> {
        let key = BasketKey::Node(node);
        if self.ctx.get(&key).is_some() {
            internal!("translate context conflict on node {node}");
        }
        self.ctx.put(key, BasketValue::Flag(true));
        Ok(())
    }

    /// When a join key sits below extra wrapping inside its comparison
    /// operand, replace the whole operand with the bare column reference so
    /// the rewritten predicate compares the exported key directly.
    fn rebuild_where_key(&mut self, key: NodeId, any: NodeId) {
        if self.tree.kind(key) == NodeKind::CascadedElement {
            return;
        }
        let cascaded = match self.tree.parent(any) {
            Some(c) => c,
            None => return,
        };
        let parent = match self.tree.parent(key) {
            Some(p) => p,
            None => return,
        };
        let index = self.tree.pos(key);
        self.tree.delete_child(parent, index);
        self.tree.insert_child(parent, index, cascaded);
    }

    /// Re-bind GROUP/ORDER column references of the outer query to the
    /// aliases registered for `table_alias` (or the anonymous scope).
    /// Ordinal ORDER BY elements are left alone.
    pub fn rebuild_group_order(&mut self, table_alias: Option<NodeId>) -> XlateResult<()> {
        let scope_key = match table_alias {
            Some(alias) => self.alias_text(alias)?,
            None => String::new(),
        };
        if let Some(group) = self.top_group {
            for i in 0..self.tree.child_count(group) {
                let any = self
                    .tree
                    .child(group, i)
                    .and_then(|element| self.tree.child(element, 0))
                    .and_then(|expr| self.tree.child(expr, 0))
                    .and_then(|cascaded| self.tree.child(cascaded, 0));
                if let Some(any) = any {
                    if self.tree.kind(any) == NodeKind::AnyElement {
                        self.rebuild_any_element_alias(&scope_key, any);
                    }
                }
            }
        }
        if let Some(order) = self.top_order {
            if let Some(elements) = self.tree.child(order, 0) {
                for i in 0..self.tree.child_count(elements) {
                    let cascaded = self
                        .tree
                        .child(elements, i)
                        .and_then(|element| self.tree.child(element, 0))
                        .and_then(|expr| self.tree.child(expr, 0));
                    let cascaded = match cascaded {
                        Some(c) if self.tree.kind(c) == NodeKind::CascadedElement => c,
                        _ => continue,
                    };
                    if let Some(any) = self.tree.child(cascaded, 0) {
                        if self.tree.kind(any) == NodeKind::AnyElement {
                            self.rebuild_any_element_alias(&scope_key, any);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn rebuild_any_element_alias(&mut self, scope_key: &str, any: NodeId) {
        if self.tree.child_count(any) == 2 {
            self.tree.delete_child(any, 0);
        }
        let column = match self.tree.child(any, 0) {
            Some(c) => c,
            None => return,
        };
        let substitute = self
            .aliases
            .column_alias(scope_key, self.tree.text(column))
            .map(str::to_string);
        if let Some(substitute) = substitute {
            self.tree.set_text(column, substitute);
        }
    }

    /// Propagate an alias rename into ORDER BY references. GROUP BY is not
    /// re-bound here: grouping happens inside the derived table, where the
    /// old name is still the one in scope.
    pub fn re_rebuild_group_order(&mut self, old_name: &str, new_name: &str) {
        let order = match self.top_order {
            Some(o) => o,
            None => return,
        };
        let elements = match self.tree.child(order, 0) {
            Some(e) => e,
            None => return,
        };
        for i in 0..self.tree.child_count(elements) {
            let any = self
                .tree
                .child(elements, i)
                .and_then(|element| self.tree.child(element, 0))
                .and_then(|expr| self.tree.child(expr, 0))
                .and_then(|cascaded| self.tree.child(cascaded, 0));
            let any = match any {
                Some(a) if self.tree.kind(a) == NodeKind::AnyElement => a,
                _ => continue,
            };
            // a leftover qualifier no longer resolves against the closing
            // select
            if self.tree.child_count(any) == 2 {
                self.tree.delete_child(any, 0);
            }
            let column = match self.tree.children(any).last().copied() {
                Some(c) => c,
                None => continue,
            };
            if self.tree.text(column) == old_name {
                self.tree.set_text(column, new_name.to_string());
            }
        }
    }

    /// Renumber generated aliases of `select`'s projection into the
    /// canonical `<prefix>_col_N` form, in projection order, propagating
    /// each rename into ORDER BY. User-written aliases are left untouched.
    pub fn rebuild_column_alias(&mut self, select: NodeId) {
        let list = match self.tree.first_child_with_kind(select, NodeKind::SelectList) {
            Some(l) => l,
            None => return,
        };
        let mut count = 0usize;
        for i in 0..self.tree.child_count(list) {
            let ident = self
                .tree
                .child(list, i)
                .filter(|&item| self.tree.child_count(item) == 2)
                .and_then(|item| self.tree.child(item, 1))
                .and_then(|alias| self.tree.child(alias, 0));
            let ident = match ident {
                Some(id) => id,
                None => continue,
            };
            let old_name = self.tree.text(ident).to_string();
            if old_name.split('_').next() != Some(GENERATED_PREFIX) {
                continue;
            }
            let new_name = format!("{GENERATED_PREFIX}_col_{count}");
            count += 1;
            self.tree.set_text(ident, new_name.clone());
            self.re_rebuild_group_order(&old_name, &new_name);
        }
    }

    /// Rewrite a column reference through the alias registries: the table
    /// part to its derived-table alias, the column part to its registered
    /// column alias. Returns the same node.
    pub fn rebuild_cascated_element(&mut self, cascaded: NodeId) -> NodeId {
        let any = match self.tree.child(cascaded, 0) {
            Some(a) if self.tree.kind(a) == NodeKind::AnyElement => a,
            _ => return cascaded,
        };
        if self.tree.child_count(any) == 2 {
            let (table, column) = match (self.tree.child(any, 0), self.tree.child(any, 1)) {
                (Some(t), Some(c)) => (t, c),
                _ => return cascaded,
            };
            let table_name = self.tree.text(table).to_string();
            if let Some(table_alias) = self.aliases.table_alias(&table_name).map(str::to_string) {
                let column_name = self.tree.text(column).to_string();
                if let Some(column_alias) = self
                    .aliases
                    .column_alias(&table_alias, &column_name)
                    .map(str::to_string)
                {
                    self.tree.set_text(column, column_alias);
                }
                self.tree.set_text(table, table_alias);
            }
        } else if let Some(column) = self.tree.child(any, 0) {
            let column_name = self.tree.text(column).to_string();
            if let Some(column_alias) = self
                .aliases
                .column_alias("", &column_name)
                .map(str::to_string)
            {
                self.tree.set_text(column, column_alias);
            }
        }
        cascaded
    }

    /// Retag bare `*` projections of `select` as empty projection lists, so
    /// later steps can expand them from catalog row info.
    pub fn process_select_asterisk(&mut self, select: NodeId) {
        for i in 0..self.tree.child_count(select) {
            if let Some(child) = self.tree.child(select, i) {
                if self.tree.kind(child) == NodeKind::Asterisk {
                    self.tree.retag(child, NodeKind::SelectList, "SELECT_LIST");
                }
            }
        }
    }
}
