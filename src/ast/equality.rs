//! Structural equality, canonical keys and snapshot text.

use super::{Ast, Node, NodeId};

/// The form of `node` used as a deduplication key.
///
/// Operands of `&&` and `||` are ordered by id so that `a && b` and
/// `b && a` share one entry once `a` and `b` are themselves deduplicated.
pub(crate) fn canonical(node: &Node) -> Node {
    match node {
        Node::Binary { op, left, right } if op.is_logical() && right < left => Node::Binary {
            op: *op,
            left: *right,
            right: *left,
        },
        other => other.clone(),
    }
}

impl Ast {
    /// Recursive structural equality between a node of this arena and a
    /// node of `other` (which may be the same arena).
    #[must_use]
    pub fn structurally_equal(&self, a: NodeId, other: &Self, b: NodeId) -> bool {
        let (Ok(left), Ok(right)) = (self.get(a), other.get(b)) else {
            return false;
        };
        match (left, right) {
            (Node::Constant { literal: x }, Node::Constant { literal: y }) => x == y,
            (Node::Variable { name: x }, Node::Variable { name: y }) => x == y,
            (
                Node::Field { parent: p, field: f },
                Node::Field { parent: q, field: g },
            ) => f == g && self.structurally_equal(*p, other, *q),
            (
                Node::Selector { parent: p, selector: s },
                Node::Selector { parent: q, selector: t },
            ) => self.structurally_equal(*p, other, *q) && self.structurally_equal(*s, other, *t),
            (Node::Call { name: n, args: x }, Node::Call { name: m, args: y }) => {
                n == m && self.all_equal(x, other, y)
            }
            (
                Node::Method { receiver: r, name: n, args: x },
                Node::Method { receiver: s, name: m, args: y },
            ) => n == m && self.structurally_equal(*r, other, *s) && self.all_equal(x, other, y),
            (Node::Negation { inner: x }, Node::Negation { inner: y })
            | (Node::Group { inner: x }, Node::Group { inner: y }) => {
                self.structurally_equal(*x, other, *y)
            }
            (
                Node::Binary { op, left: l1, right: r1 },
                Node::Binary { op: op2, left: l2, right: r2 },
            ) => {
                op == op2
                    && ((self.structurally_equal(*l1, other, *l2)
                        && self.structurally_equal(*r1, other, *r2))
                        || (op.is_logical()
                            && self.structurally_equal(*l1, other, *r2)
                            && self.structurally_equal(*r1, other, *l2)))
            }
            (
                Node::Assignment { target: t1, op, value: v1 },
                Node::Assignment { target: t2, op: op2, value: v2 },
            ) => {
                op == op2
                    && self.structurally_equal(*t1, other, *t2)
                    && self.structurally_equal(*v1, other, *v2)
            }
            _ => false,
        }
    }

    fn all_equal(&self, xs: &[NodeId], other: &Self, ys: &[NodeId]) -> bool {
        xs.len() == ys.len()
            && xs
                .iter()
                .zip(ys)
                .all(|(x, y)| self.structurally_equal(*x, other, *y))
    }

    /// Deterministic text for the subtree at `id`.
    ///
    /// Logical operands are sorted, so two structurally equal subtrees
    /// always render identically.
    #[must_use]
    pub fn snapshot(&self, id: NodeId) -> String {
        let Ok(node) = self.get(id) else {
            return format!("<dangling {id}>");
        };
        match node {
            Node::Constant { literal } => literal.to_string(),
            Node::Variable { name } => name.clone(),
            Node::Field { parent, field } => format!("{}.{field}", self.snapshot(*parent)),
            Node::Selector { parent, selector } => {
                format!("{}[{}]", self.snapshot(*parent), self.snapshot(*selector))
            }
            Node::Call { name, args } => format!("{name}({})", self.snapshot_list(args)),
            Node::Method { receiver, name, args } => format!(
                "{}.{name}({})",
                self.snapshot(*receiver),
                self.snapshot_list(args)
            ),
            Node::Negation { inner } => format!("!{}", self.snapshot(*inner)),
            Node::Group { inner } => format!("({})", self.snapshot(*inner)),
            Node::Binary { op, left, right } => {
                let mut l = self.snapshot(*left);
                let mut r = self.snapshot(*right);
                if op.is_logical() && r < l {
                    std::mem::swap(&mut l, &mut r);
                }
                format!("{l} {op} {r}")
            }
            Node::Assignment { target, op, value } => format!(
                "{} {} {}",
                self.snapshot(*target),
                op.symbol(),
                self.snapshot(*value)
            ),
        }
    }

    fn snapshot_list(&self, ids: &[NodeId]) -> String {
        ids.iter()
            .map(|id| self.snapshot(*id))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
