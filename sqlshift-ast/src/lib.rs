//! Mutable typed syntax tree used by the sqlshift rewrite passes.
//!
//! The tree is an arena of nodes addressed by stable [`NodeId`]s. Each node
//! stores its kind, its token text, a non-owning back-reference to its
//! parent, its ordinal position among its siblings, and an ordered child
//! list. Structural edits update parent and child links together, so the
//! ordinal invariant (`tree.child(n, i)` has `pos() == i`) holds after
//! every operation.
//!
//! Nodes are never freed while the arena is alive; a detached subtree is
//! simply unreachable from the statement root. One arena lives for the
//! duration of one translated statement, so this never accumulates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable handle to a node in a [`SyntaxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Node vocabulary produced by the upstream parser and consumed by the
/// rewrite passes. The parser itself is out of scope here; rewrites only
/// ever construct and rearrange nodes of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Select,
    SelectList,
    SelectItem,
    Expr,
    From,
    TableRef,
    TableRefElement,
    TableExpression,
    SelectMode,
    SelectStatement,
    Subquery,
    Alias,
    Ident,
    IntLiteral,
    Where,
    On,
    Group,
    GroupByElement,
    Order,
    OrderByElements,
    OrderByElement,
    JoinDef,
    JoinType,
    LogicExpr,
    And,
    Or,
    Not,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Exists,
    Minus,
    VectorExpr,
    RoutineCall,
    RoutineName,
    Arguments,
    Argument,
    CascadedElement,
    AnyElement,
    Asterisk,
    StandardFunction,
    Count,
}

impl NodeKind {
    /// Comparison-class predicate operators: the leaves the correlation
    /// classifier knows how to take apart.
    pub fn is_comparison_op(self) -> bool {
        matches!(
            self,
            NodeKind::Eq
                | NodeKind::NotEq
                | NodeKind::Lt
                | NodeKind::LtEq
                | NodeKind::Gt
                | NodeKind::GtEq
                | NodeKind::Like
                | NodeKind::In
                | NodeKind::NotIn
                | NodeKind::IsNull
                | NodeKind::IsNotNull
        )
    }

    /// Logic connectives the classifier recurses through.
    pub fn is_logic_op(self) -> bool {
        matches!(self, NodeKind::And | NodeKind::Or)
    }
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    text: String,
    parent: Option<NodeId>,
    /// Ordinal position among siblings; meaningless while detached.
    pos: usize,
    children: Vec<NodeId>,
}

/// Arena-backed mutable tree.
#[derive(Debug, Default, Clone)]
pub struct SyntaxTree {
    nodes: Vec<Node>,
}

impl SyntaxTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached node.
    pub fn add(&mut self, kind: NodeKind, text: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            text: text.into(),
            parent: None,
            pos: 0,
            children: Vec::new(),
        });
        id
    }

    /// Create a detached node whose text is the conventional token text for
    /// its kind (`"SELECT_LIST"`, `"and"`, ...). For [`NodeKind::Ident`]
    /// and literals use [`SyntaxTree::add`] with the real text.
    pub fn add_kind(&mut self, kind: NodeKind) -> NodeId {
        let text = default_text(kind);
        self.add(kind, text)
    }

    /// Number of nodes in the arena, reachable or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.nodes[id.index()].kind
    }

    pub fn text(&self, id: NodeId) -> &str {
        &self.nodes[id.index()].text
    }

    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        self.nodes[id.index()].text = text.into();
    }

    /// Retag a node in place, keeping its children. Used for token-level
    /// rewrites such as turning a bare `*` projection into an empty
    /// select list.
    pub fn retag(&mut self, id: NodeId, kind: NodeKind, text: impl Into<String>) {
        let node = &mut self.nodes[id.index()];
        node.kind = kind;
        node.text = text.into();
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    /// Ordinal position of `id` among its siblings.
    pub fn pos(&self, id: NodeId) -> usize {
        self.nodes[id.index()].pos
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.nodes[id.index()].children.len()
    }

    pub fn child(&self, id: NodeId, i: usize) -> Option<NodeId> {
        self.nodes[id.index()].children.get(i).copied()
    }

    /// Append `child` under `parent`, detaching it from any previous parent
    /// first (rewrites relocate subtrees freely).
    pub fn attach_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        let pos = self.nodes[parent.index()].children.len();
        self.nodes[parent.index()].children.push(child);
        let node = &mut self.nodes[child.index()];
        node.parent = Some(parent);
        node.pos = pos;
    }

    /// Insert `child` at position `idx` under `parent`, shifting later
    /// siblings right and renumbering them.
    pub fn insert_child(&mut self, parent: NodeId, idx: usize, child: NodeId) {
        self.detach(child);
        self.nodes[parent.index()].children.insert(idx, child);
        let node = &mut self.nodes[child.index()];
        node.parent = Some(parent);
        self.renumber_from(parent, idx);
    }

    /// Remove and return the child at position `idx`, renumbering later
    /// siblings. The removed subtree is detached, not destroyed.
    pub fn delete_child(&mut self, parent: NodeId, idx: usize) -> NodeId {
        let child = self.nodes[parent.index()].children.remove(idx);
        self.nodes[child.index()].parent = None;
        self.renumber_from(parent, idx);
        child
    }

    /// Replace the child at position `idx`, returning the detached old child.
    pub fn replace_child(&mut self, parent: NodeId, idx: usize, new: NodeId) -> NodeId {
        let old = self.delete_child(parent, idx);
        self.insert_child(parent, idx, new);
        old
    }

    /// Detach `id` from its parent if it has one.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.index()].parent {
            let pos = self.nodes[id.index()].pos;
            self.delete_child(parent, pos);
        }
    }

    fn renumber_from(&mut self, parent: NodeId, from: usize) {
        let children: Vec<NodeId> = self.nodes[parent.index()].children[from..].to_vec();
        for (offset, child) in children.into_iter().enumerate() {
            self.nodes[child.index()].pos = from + offset;
        }
    }

    /// Deep-copy the subtree rooted at `id`; the copy's root is detached.
    pub fn clone_tree(&mut self, id: NodeId) -> NodeId {
        let (kind, text) = {
            let node = &self.nodes[id.index()];
            (node.kind, node.text.clone())
        };
        let copy = self.add(kind, text);
        for i in 0..self.child_count(id) {
            let child = self.nodes[id.index()].children[i];
            let child_copy = self.clone_tree(child);
            self.attach_child(copy, child_copy);
        }
        copy
    }

    /// Shallow-copy a node (kind and text only, no children), detached.
    pub fn dup_node(&mut self, id: NodeId) -> NodeId {
        let node = &self.nodes[id.index()];
        let (kind, text) = (node.kind, node.text.clone());
        self.add(kind, text)
    }

    /// First direct child of `id` with the given kind.
    pub fn first_child_with_kind(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| self.kind(c) == kind)
    }

    /// First node of the given kind in the subtree rooted at `root`
    /// (including `root` itself), depth-first.
    pub fn find_only_node(&self, root: NodeId, kind: NodeKind) -> Option<NodeId> {
        if self.kind(root) == kind {
            return Some(root);
        }
        self.children(root)
            .iter()
            .find_map(|&c| self.find_only_node(c, kind))
    }

    /// Delete the first direct child of the given kind, if any, returning it.
    pub fn delete_branch(&mut self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        let branch = self.first_child_with_kind(id, kind)?;
        let pos = self.pos(branch);
        Some(self.delete_child(id, pos))
    }

    /// Render the subtree as a one-line s-expression. Test diagnostics only.
    pub fn dump(&self, id: NodeId) -> String {
        let node = &self.nodes[id.index()];
        if node.children.is_empty() {
            return node.text.clone();
        }
        let children = node
            .children
            .iter()
            .map(|&c| self.dump(c))
            .collect::<Vec<_>>()
            .join(" ");
        format!("({} {})", node.text, children)
    }
}

fn default_text(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Select => "select",
        NodeKind::SelectList => "SELECT_LIST",
        NodeKind::SelectItem => "SELECT_ITEM",
        NodeKind::Expr => "EXPR",
        NodeKind::From => "from",
        NodeKind::TableRef => "TABLE_REF",
        NodeKind::TableRefElement => "TABLE_REF_ELEMENT",
        NodeKind::TableExpression => "TABLE_EXPRESSION",
        NodeKind::SelectMode => "SELECT_MODE",
        NodeKind::SelectStatement => "SELECT_STATEMENT",
        NodeKind::Subquery => "SUBQUERY",
        NodeKind::Alias => "ALIAS",
        NodeKind::Ident => "ID",
        NodeKind::IntLiteral => "0",
        NodeKind::Where => "where",
        NodeKind::On => "on",
        NodeKind::Group => "group",
        NodeKind::GroupByElement => "GROUP_BY_ELEMENT",
        NodeKind::Order => "order",
        NodeKind::OrderByElements => "ORDER_BY_ELEMENTS",
        NodeKind::OrderByElement => "ORDER_BY_ELEMENT",
        NodeKind::JoinDef => "join",
        NodeKind::JoinType => "JOIN_TYPE",
        NodeKind::LogicExpr => "LOGIC_EXPR",
        NodeKind::And => "and",
        NodeKind::Or => "or",
        NodeKind::Not => "not",
        NodeKind::Eq => "=",
        NodeKind::NotEq => "<>",
        NodeKind::Lt => "<",
        NodeKind::LtEq => "<=",
        NodeKind::Gt => ">",
        NodeKind::GtEq => ">=",
        NodeKind::Like => "like",
        NodeKind::In => "IN",
        NodeKind::NotIn => "NOT_IN",
        NodeKind::IsNull => "IS_NULL",
        NodeKind::IsNotNull => "IS_NOT_NULL",
        NodeKind::Exists => "EXISTS",
        NodeKind::Minus => "minus",
        NodeKind::VectorExpr => "VECTOR_EXPR",
        NodeKind::RoutineCall => "ROUTINE_CALL",
        NodeKind::RoutineName => "ROUTINE_NAME",
        NodeKind::Arguments => "ARGUMENTS",
        NodeKind::Argument => "ARGUMENT",
        NodeKind::CascadedElement => "CASCADED_ELEMENT",
        NodeKind::AnyElement => "ANY_ELEMENT",
        NodeKind::Asterisk => "*",
        NodeKind::StandardFunction => "STANDARD_FUNCTION",
        NodeKind::Count => "count",
    }
}
