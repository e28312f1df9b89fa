//! Expression graph.
//!
//! Rule conditions and actions are stored in an arena of [`Node`]s addressed
//! by [`NodeId`]. A node only refers to other nodes through ids, so a subtree
//! may be shared by several parents and a whole graph can be copied by
//! remapping ids (see [`crate::knowledge`]).

mod builder;
mod dsl;
mod equality;
mod eval;

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::access::{PathSegment, VariablePath};
use crate::error::BuildError;
use crate::value::{MapKey, Value};

pub use builder::AstBuilder;
pub use dsl::{Action, Expr, RuleDef};
pub use eval::Session;

pub(crate) use equality::canonical;

/// Stable identifier of a node inside one [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A constant written in a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Literal {
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Nil => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    fn map_key(&self) -> Option<MapKey> {
        match self {
            Self::Bool(b) => Some(MapKey::Bool(*b)),
            Self::Int(i) => Some(MapKey::Int(*i)),
            Self::String(s) => Some(MapKey::String(s.clone())),
            Self::Nil | Self::Float(_) => None,
        }
    }
}

// Floats compare by bit pattern so that literals can key the dedup index.
impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Nil => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::String(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Binary operators in precedence groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    BitAnd,
    BitOr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Add => "+",
            Self::Sub => "-",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    /// `&&` and `||`: operand order is irrelevant for structural equality.
    #[must_use]
    pub const fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Set => "=",
            Self::Add => "+=",
            Self::Sub => "-=",
            Self::Mul => "*=",
            Self::Div => "/=",
        }
    }

    pub(crate) const fn binary(self) -> Option<BinaryOp> {
        match self {
            Self::Set => None,
            Self::Add => Some(BinaryOp::Add),
            Self::Sub => Some(BinaryOp::Sub),
            Self::Mul => Some(BinaryOp::Mul),
            Self::Div => Some(BinaryOp::Div),
        }
    }
}

/// One node of the expression graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Constant { literal: Literal },
    /// A root binding of the data context.
    Variable { name: String },
    /// `parent.field`
    Field { parent: NodeId, field: String },
    /// `parent[selector]`
    Selector { parent: NodeId, selector: NodeId },
    /// `Name(args...)`, resolved against the built-in registry.
    Call { name: String, args: Vec<NodeId> },
    /// `receiver.Name(args...)`
    Method { receiver: NodeId, name: String, args: Vec<NodeId> },
    Negation { inner: NodeId },
    Group { inner: NodeId },
    Binary { op: BinaryOp, left: NodeId, right: NodeId },
    /// `target op= value`, only found in action lists.
    Assignment { target: NodeId, op: AssignOp, value: NodeId },
}

impl Node {
    /// Short label used in build diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Constant { .. } => "constant",
            Self::Variable { .. } => "variable",
            Self::Field { .. } => "field access",
            Self::Selector { .. } => "selector",
            Self::Call { .. } => "function call",
            Self::Method { .. } => "method call",
            Self::Negation { .. } => "negation",
            Self::Group { .. } => "group",
            Self::Binary { .. } => "binary expression",
            Self::Assignment { .. } => "assignment",
        }
    }

    /// Direct children in evaluation order.
    #[must_use]
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Self::Constant { .. } | Self::Variable { .. } => Vec::new(),
            Self::Field { parent, .. } => vec![*parent],
            Self::Selector { parent, selector } => vec![*parent, *selector],
            Self::Call { args, .. } => args.clone(),
            Self::Method { receiver, args, .. } => {
                let mut ids = Vec::with_capacity(args.len() + 1);
                ids.push(*receiver);
                ids.extend_from_slice(args);
                ids
            }
            Self::Negation { inner } | Self::Group { inner } => vec![*inner],
            Self::Binary { left, right, .. } => vec![*left, *right],
            Self::Assignment { target, value, .. } => vec![*target, *value],
        }
    }

    /// Returns a copy of this node with every child id passed through `map`.
    pub(crate) fn remap<E>(&self, mut map: impl FnMut(NodeId) -> Result<NodeId, E>) -> Result<Self, E> {
        Ok(match self {
            Self::Constant { .. } | Self::Variable { .. } => self.clone(),
            Self::Field { parent, field } => Self::Field {
                parent: map(*parent)?,
                field: field.clone(),
            },
            Self::Selector { parent, selector } => Self::Selector {
                parent: map(*parent)?,
                selector: map(*selector)?,
            },
            Self::Call { name, args } => Self::Call {
                name: name.clone(),
                args: args.iter().map(|a| map(*a)).collect::<Result<_, E>>()?,
            },
            Self::Method { receiver, name, args } => Self::Method {
                receiver: map(*receiver)?,
                name: name.clone(),
                args: args.iter().map(|a| map(*a)).collect::<Result<_, E>>()?,
            },
            Self::Negation { inner } => Self::Negation { inner: map(*inner)? },
            Self::Group { inner } => Self::Group { inner: map(*inner)? },
            Self::Binary { op, left, right } => Self::Binary {
                op: *op,
                left: map(*left)?,
                right: map(*right)?,
            },
            Self::Assignment { target, op, value } => Self::Assignment {
                target: map(*target)?,
                op: *op,
                value: map(*value)?,
            },
        })
    }

    /// Returns true for nodes that name a storage location.
    #[must_use]
    pub const fn is_variable(&self) -> bool {
        matches!(self, Self::Variable { .. } | Self::Field { .. } | Self::Selector { .. })
    }
}

/// Node arena.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a node without any deduplication.
    pub fn push(&mut self, node: Node) -> NodeId {
        #[allow(clippy::cast_possible_truncation)]
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> Result<&Node, BuildError> {
        self.nodes
            .get(id.index())
            .ok_or(BuildError::DanglingNode { id })
    }

    pub(crate) fn replace(&mut self, id: NodeId, node: Node) -> Result<(), BuildError> {
        let slot = self
            .nodes
            .get_mut(id.index())
            .ok_or(BuildError::DanglingNode { id })?;
        *slot = node;
        Ok(())
    }

    /// All nodes in id order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Rebuilds an arena from a flattened node list, checking every
    /// reference and rejecting reference cycles.
    ///
    /// Children may sit at higher ids than their parents; copies reserve the
    /// parent slot first.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self, BuildError> {
        let ast = Self { nodes };
        for node in &ast.nodes {
            for child in node.children() {
                ast.get(child)?;
            }
        }
        ast.check_acyclic()?;
        Ok(ast)
    }

    // Iterative depth-first walk with visiting/done marks.
    fn check_acyclic(&self) -> Result<(), BuildError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unseen,
            Visiting,
            Done,
        }

        let mut marks = vec![Mark::Unseen; self.nodes.len()];
        let mut stack: Vec<(NodeId, Vec<NodeId>)> = Vec::new();
        for (start, node) in self.nodes.iter().enumerate() {
            if marks[start] != Mark::Unseen {
                continue;
            }
            marks[start] = Mark::Visiting;
            #[allow(clippy::cast_possible_truncation)]
            stack.push((NodeId(start as u32), node.children()));
            while let Some((id, pending)) = stack.last_mut() {
                let id = *id;
                let Some(child) = pending.pop() else {
                    marks[id.index()] = Mark::Done;
                    stack.pop();
                    continue;
                };
                match marks[child.index()] {
                    Mark::Visiting => return Err(BuildError::CyclicNode { id: child }),
                    Mark::Done => {}
                    Mark::Unseen => {
                        marks[child.index()] = Mark::Visiting;
                        stack.push((child, self.get(child)?.children()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Static path a variable node reads, with `Any` for selectors that
    /// are only known at evaluation time. `None` for non-variable nodes or
    /// chains rooted in a computed value.
    #[must_use]
    pub fn variable_path(&self, id: NodeId) -> Option<VariablePath> {
        match self.get(id).ok()? {
            Node::Variable { name } => Some(VariablePath::root(name.clone())),
            Node::Field { parent, field } => Some(
                self.variable_path(*parent)?
                    .child(PathSegment::Field(field.clone())),
            ),
            Node::Selector { parent, selector } => {
                let base = self.variable_path(*parent)?;
                let step = match self.get(*selector).ok()? {
                    Node::Constant { literal } => match literal {
                        Literal::Int(i) => PathSegment::Index(*i),
                        other => other.map_key().map_or(PathSegment::Any, PathSegment::Key),
                    },
                    _ => PathSegment::Any,
                };
                Some(base.child(step))
            }
            _ => None,
        }
    }

    /// Every data path the subtree at `id` may read.
    ///
    /// A variable chain contributes only its full path; selector
    /// expressions and call arguments contribute their own paths.
    #[must_use]
    pub fn read_paths(&self, id: NodeId) -> Vec<VariablePath> {
        let mut out = Vec::new();
        self.collect_reads(id, &mut out);
        out
    }

    fn collect_reads(&self, id: NodeId, out: &mut Vec<VariablePath>) {
        let Ok(node) = self.get(id) else {
            return;
        };
        if node.is_variable() {
            if let Some(path) = self.variable_path(id) {
                if !out.contains(&path) {
                    out.push(path);
                }
                self.collect_selector_reads(id, out);
                return;
            }
        }
        for child in node.children() {
            self.collect_reads(child, out);
        }
    }

    fn collect_selector_reads(&self, id: NodeId, out: &mut Vec<VariablePath>) {
        match self.get(id) {
            Ok(Node::Field { parent, .. }) => self.collect_selector_reads(*parent, out),
            Ok(Node::Selector { parent, selector }) => {
                self.collect_reads(*selector, out);
                self.collect_selector_reads(*parent, out);
            }
            _ => {}
        }
    }

    /// Returns true when the subtree calls a function flagged volatile.
    #[must_use]
    pub fn is_volatile(&self, id: NodeId) -> bool {
        match self.get(id) {
            Ok(Node::Call { name, args }) => {
                crate::builtins::is_volatile(name) || args.iter().any(|a| self.is_volatile(*a))
            }
            Ok(node) => node.children().into_iter().any(|c| self.is_volatile(c)),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_of(ast: &Ast, id: NodeId) -> String {
        ast.variable_path(id).map(|p| p.to_string()).unwrap_or_default()
    }

    #[test]
    fn test_variable_paths() {
        let mut ast = Ast::new();
        let order = ast.push(Node::Variable { name: "Order".into() });
        let lines = ast.push(Node::Field { parent: order, field: "Lines".into() });
        let zero = ast.push(Node::Constant { literal: Literal::Int(0) });
        let first = ast.push(Node::Selector { parent: lines, selector: zero });
        let key = ast.push(Node::Variable { name: "Key".into() });
        let dynamic = ast.push(Node::Selector { parent: lines, selector: key });
        assert_eq!(path_of(&ast, first), "Order.Lines[0]");
        assert_eq!(path_of(&ast, dynamic), "Order.Lines[*]");
        assert_eq!(
            ast.read_paths(dynamic)
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec!["Order.Lines[*]", "Key"]
        );
    }

    #[test]
    fn test_read_paths_of_calls_and_methods() {
        let mut ast = Ast::new();
        let a = ast.push(Node::Variable { name: "A".into() });
        let x = ast.push(Node::Field { parent: a, field: "X".into() });
        let b = ast.push(Node::Variable { name: "B".into() });
        let call = ast.push(Node::Call { name: "Max".into(), args: vec![x, b] });
        let method = ast.push(Node::Method { receiver: x, name: "Len".into(), args: vec![] });
        let both = ast.push(Node::Binary { op: BinaryOp::Gt, left: call, right: method });
        let reads: Vec<String> = ast.read_paths(both).iter().map(ToString::to_string).collect();
        assert_eq!(reads, vec!["A.X", "B"]);
    }

    #[test]
    fn test_from_nodes_rejects_dangling_ids() {
        let nodes = vec![Node::Negation { inner: NodeId(7) }];
        assert!(matches!(Ast::from_nodes(nodes), Err(BuildError::DanglingNode { .. })));
    }

    #[test]
    fn test_from_nodes_rejects_cycles_but_allows_forward_ids() {
        let own = vec![Node::Negation { inner: NodeId(0) }];
        assert_eq!(Ast::from_nodes(own).unwrap_err(), BuildError::CyclicNode { id: NodeId(0) });

        let pair = vec![
            Node::Group { inner: NodeId(1) },
            Node::Negation { inner: NodeId(0) },
        ];
        assert!(matches!(Ast::from_nodes(pair), Err(BuildError::CyclicNode { .. })));

        let forward = vec![
            Node::Binary { op: BinaryOp::And, left: NodeId(1), right: NodeId(2) },
            Node::Constant { literal: Literal::Bool(true) },
            Node::Group { inner: NodeId(1) },
        ];
        assert_eq!(Ast::from_nodes(forward).unwrap().len(), 3);
    }

    #[test]
    fn test_volatile_detection() {
        let mut ast = Ast::new();
        let now = ast.push(Node::Call { name: "Now".into(), args: vec![] });
        let year = ast.push(Node::Call { name: "GetTimeYear".into(), args: vec![now] });
        let lit = ast.push(Node::Constant { literal: Literal::Int(1) });
        assert!(ast.is_volatile(year));
        assert!(!ast.is_volatile(lit));
    }

    #[test]
    fn test_literal_equality_uses_float_bits() {
        assert_eq!(Literal::Float(f64::NAN), Literal::Float(f64::NAN));
        assert_ne!(Literal::Float(0.0), Literal::Float(-0.0));
        assert_ne!(Literal::Int(1), Literal::Float(1.0));
    }
}
