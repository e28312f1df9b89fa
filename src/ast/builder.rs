//! Acceptor protocol used by rule front ends to assemble the graph.
//!
//! Composite nodes are opened with a `begin_*` call, receive their
//! children bottom-up through `accept_*` calls or nested composites and
//! are closed with [`AstBuilder::end`]. Nodes built inside a `when`
//! clause are interned into the rule context; action nodes are appended
//! as they are.

use tracing::trace;

use crate::error::BuildError;
use crate::knowledge::{RuleEntry, RuleSet};
use crate::memory::RuleContext;

use super::{AssignOp, Ast, BinaryOp, Literal, Node, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Scope {
    Header,
    When,
    Then,
}

#[derive(Debug)]
enum Frame {
    Rule {
        name: String,
        description: String,
        salience: Option<i64>,
        when: Option<NodeId>,
        then: Vec<NodeId>,
        scope: Scope,
    },
    Binary {
        op: BinaryOp,
        left: Option<NodeId>,
        right: Option<NodeId>,
    },
    Selector {
        parent: Option<NodeId>,
        selector: Option<NodeId>,
    },
    Assignment {
        op: AssignOp,
        target: Option<NodeId>,
        value: Option<NodeId>,
    },
    Field {
        field: String,
        parent: Option<NodeId>,
    },
    Negation {
        inner: Option<NodeId>,
    },
    Group {
        inner: Option<NodeId>,
    },
    Call {
        name: String,
        args: Vec<NodeId>,
    },
    Method {
        name: String,
        receiver: Option<NodeId>,
        args: Vec<NodeId>,
    },
}

impl Frame {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Rule { .. } => "rule",
            Self::Binary { .. } => "binary expression",
            Self::Selector { .. } => "selector",
            Self::Assignment { .. } => "assignment",
            Self::Field { .. } => "field access",
            Self::Negation { .. } => "negation",
            Self::Group { .. } => "group",
            Self::Call { .. } => "function call",
            Self::Method { .. } => "method call",
        }
    }
}

fn fill_pair(
    node: &'static str,
    first: &mut Option<NodeId>,
    second: &mut Option<NodeId>,
    child: NodeId,
) -> Result<(), BuildError> {
    if first.is_none() {
        *first = Some(child);
    } else if second.is_none() {
        *second = Some(child);
    } else {
        return Err(BuildError::SlotAlreadyFilled { node, slot: "both operands" });
    }
    Ok(())
}

fn fill_one(node: &'static str, slot: &mut Option<NodeId>, child: NodeId) -> Result<(), BuildError> {
    if slot.is_some() {
        return Err(BuildError::SlotAlreadyFilled { node, slot: "operand" });
    }
    *slot = Some(child);
    Ok(())
}

fn required(slot: Option<NodeId>, node: &'static str, missing: &'static str) -> Result<NodeId, BuildError> {
    slot.ok_or(BuildError::Incomplete { node, missing })
}

/// Incremental builder for one knowledge base.
pub struct AstBuilder<'kb> {
    knowledge_base: &'kb str,
    ast: &'kb mut Ast,
    memory: &'kb mut RuleContext,
    rules: &'kb mut RuleSet,
    stack: Vec<Frame>,
}

impl<'kb> AstBuilder<'kb> {
    pub(crate) fn new(
        knowledge_base: &'kb str,
        ast: &'kb mut Ast,
        memory: &'kb mut RuleContext,
        rules: &'kb mut RuleSet,
    ) -> Self {
        Self {
            knowledge_base,
            ast,
            memory,
            rules,
            stack: Vec::new(),
        }
    }

    /// Depth of open frames, the rule itself included.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn scope(&self) -> Option<Scope> {
        match self.stack.first() {
            Some(Frame::Rule { scope, .. }) => Some(*scope),
            _ => None,
        }
    }

    fn rule_frame(&mut self, operation: &'static str) -> Result<&mut Frame, BuildError> {
        match self.stack.as_mut_slice() {
            [rule @ Frame::Rule { .. }] => Ok(rule),
            [] => Err(BuildError::EmptyStack { operation }),
            [.., top] => Err(BuildError::UnexpectedChild {
                node: top.kind(),
                child: operation,
            }),
        }
    }

    /// Opens a rule.
    pub fn begin_rule(&mut self, name: impl Into<String>, description: impl Into<String>) -> Result<(), BuildError> {
        if let Some(top) = self.stack.last() {
            return Err(BuildError::UnexpectedChild {
                node: top.kind(),
                child: "rule",
            });
        }
        self.stack.push(Frame::Rule {
            name: name.into(),
            description: description.into(),
            salience: None,
            when: None,
            then: Vec::new(),
            scope: Scope::Header,
        });
        Ok(())
    }

    /// Sets the salience of the open rule.
    pub fn accept_salience(&mut self, value: i64) -> Result<(), BuildError> {
        match self.rule_frame("salience")? {
            Frame::Rule { salience: Some(_), .. } => Err(BuildError::SlotAlreadyFilled {
                node: "rule",
                slot: "salience",
            }),
            Frame::Rule { salience, .. } => {
                *salience = Some(value);
                Ok(())
            }
            _ => Err(BuildError::EmptyStack { operation: "salience" }),
        }
    }

    /// Switches the open rule to its condition.
    pub fn begin_when(&mut self) -> Result<(), BuildError> {
        self.switch_scope(Scope::When, "when")
    }

    /// Switches the open rule to its action list.
    pub fn begin_then(&mut self) -> Result<(), BuildError> {
        self.switch_scope(Scope::Then, "then")
    }

    fn switch_scope(&mut self, next: Scope, operation: &'static str) -> Result<(), BuildError> {
        match self.rule_frame(operation)? {
            Frame::Rule { scope, .. } if *scope < next => {
                *scope = next;
                Ok(())
            }
            Frame::Rule { .. } => Err(BuildError::SlotAlreadyFilled {
                node: "rule",
                slot: operation,
            }),
            _ => Err(BuildError::EmptyStack { operation }),
        }
    }

    /// Closes the open rule and registers it.
    pub fn end_rule(&mut self) -> Result<usize, BuildError> {
        self.rule_frame("end of rule")?;
        let Some(Frame::Rule {
            name,
            description,
            salience,
            when,
            then,
            ..
        }) = self.stack.pop()
        else {
            return Err(BuildError::EmptyStack { operation: "end of rule" });
        };
        let when = required(when, "rule", "when")?;
        let position = self.rules.push(
            RuleEntry {
                name,
                description,
                salience: salience.unwrap_or(0),
                when,
                then,
                retracted: false,
                deleted: false,
            },
            self.knowledge_base,
        )?;
        trace!(knowledge_base = self.knowledge_base, position, "rule entry registered");
        Ok(position)
    }

    /// Appends a leaf variable reference.
    pub fn accept_variable(&mut self, name: impl Into<String>) -> Result<NodeId, BuildError> {
        self.leaf(Node::Variable { name: name.into() })
    }

    /// Appends a constant.
    pub fn accept_constant(&mut self, literal: Literal) -> Result<NodeId, BuildError> {
        if let Literal::Float(f) = literal {
            if !f.is_finite() {
                return Err(BuildError::InvalidLiteral {
                    reason: format!("{f} is not a finite number"),
                });
            }
        }
        self.leaf(Node::Constant { literal })
    }

    fn leaf(&mut self, node: Node) -> Result<NodeId, BuildError> {
        if self.stack.is_empty() {
            return Err(BuildError::EmptyStack { operation: node.kind() });
        }
        let id = self.emit(node)?;
        self.accept(id)?;
        Ok(id)
    }

    /// Opens a binary expression.
    pub fn begin_expression(&mut self, op: BinaryOp) -> Result<(), BuildError> {
        self.open(Frame::Binary { op, left: None, right: None })
    }

    /// Opens `parent[selector]`; the first child is the parent.
    pub fn begin_selector(&mut self) -> Result<(), BuildError> {
        self.open(Frame::Selector { parent: None, selector: None })
    }

    /// Opens an assignment; the first child is the target.
    pub fn begin_assignment(&mut self, op: AssignOp) -> Result<(), BuildError> {
        self.open(Frame::Assignment { op, target: None, value: None })
    }

    /// Opens `parent.field`.
    pub fn begin_field(&mut self, field: impl Into<String>) -> Result<(), BuildError> {
        self.open(Frame::Field { field: field.into(), parent: None })
    }

    pub fn begin_negation(&mut self) -> Result<(), BuildError> {
        self.open(Frame::Negation { inner: None })
    }

    pub fn begin_group(&mut self) -> Result<(), BuildError> {
        self.open(Frame::Group { inner: None })
    }

    /// Opens a call to a built-in function; children are its arguments.
    pub fn begin_function_call(&mut self, name: impl Into<String>) -> Result<(), BuildError> {
        self.open(Frame::Call { name: name.into(), args: Vec::new() })
    }

    /// Opens a method call; the first child is the receiver.
    pub fn begin_method_call(&mut self, name: impl Into<String>) -> Result<(), BuildError> {
        self.open(Frame::Method {
            name: name.into(),
            receiver: None,
            args: Vec::new(),
        })
    }

    fn open(&mut self, frame: Frame) -> Result<(), BuildError> {
        match self.scope() {
            Some(Scope::When | Scope::Then) => {
                self.stack.push(frame);
                Ok(())
            }
            Some(Scope::Header) => Err(BuildError::UnexpectedChild {
                node: "rule header",
                child: frame.kind(),
            }),
            None => Err(BuildError::EmptyStack { operation: frame.kind() }),
        }
    }

    /// Closes the innermost composite and hands it to its parent.
    pub fn end(&mut self) -> Result<NodeId, BuildError> {
        match self.stack.last() {
            None => return Err(BuildError::EmptyStack { operation: "end" }),
            Some(Frame::Rule { .. }) => {
                return Err(BuildError::UnexpectedChild {
                    node: "rule",
                    child: "end of expression",
                })
            }
            Some(_) => {}
        }
        let frame = self.stack.pop();
        let node = match frame {
            Some(Frame::Binary { op, left, right }) => Node::Binary {
                op,
                left: required(left, "binary expression", "left operand")?,
                right: required(right, "binary expression", "right operand")?,
            },
            Some(Frame::Selector { parent, selector }) => Node::Selector {
                parent: required(parent, "selector", "parent")?,
                selector: required(selector, "selector", "selector")?,
            },
            Some(Frame::Assignment { op, target, value }) => {
                let target = required(target, "assignment", "target")?;
                let kind = self.ast.get(target)?;
                if !kind.is_variable() {
                    return Err(BuildError::UnexpectedChild {
                        node: "assignment target",
                        child: kind.kind(),
                    });
                }
                Node::Assignment {
                    target,
                    op,
                    value: required(value, "assignment", "value")?,
                }
            }
            Some(Frame::Field { field, parent }) => Node::Field {
                parent: required(parent, "field access", "parent")?,
                field,
            },
            Some(Frame::Negation { inner }) => Node::Negation {
                inner: required(inner, "negation", "operand")?,
            },
            Some(Frame::Group { inner }) => Node::Group {
                inner: required(inner, "group", "operand")?,
            },
            Some(Frame::Call { name, args }) => Node::Call { name, args },
            Some(Frame::Method { name, receiver, args }) => Node::Method {
                receiver: required(receiver, "method call", "receiver")?,
                name,
                args,
            },
            Some(Frame::Rule { .. }) | None => return Err(BuildError::EmptyStack { operation: "end" }),
        };
        let id = self.emit(node)?;
        self.accept(id)?;
        Ok(id)
    }

    fn emit(&mut self, node: Node) -> Result<NodeId, BuildError> {
        match self.scope() {
            Some(Scope::When) => Ok(self.memory.intern(self.ast, node)),
            Some(Scope::Then) => Ok(self.ast.push(node)),
            Some(Scope::Header) => Err(BuildError::UnexpectedChild {
                node: "rule header",
                child: node.kind(),
            }),
            None => Err(BuildError::EmptyStack { operation: node.kind() }),
        }
    }

    fn accept(&mut self, child: NodeId) -> Result<(), BuildError> {
        let child_kind = self.ast.get(child)?.kind();
        let Some(top) = self.stack.last_mut() else {
            return Err(BuildError::EmptyStack { operation: child_kind });
        };
        match top {
            Frame::Rule { when, then, scope, .. } => match scope {
                Scope::When => {
                    if when.is_some() {
                        return Err(BuildError::SlotAlreadyFilled { node: "rule", slot: "when" });
                    }
                    *when = Some(child);
                    Ok(())
                }
                Scope::Then => {
                    then.push(child);
                    Ok(())
                }
                Scope::Header => Err(BuildError::UnexpectedChild {
                    node: "rule header",
                    child: child_kind,
                }),
            },
            Frame::Binary { left, right, .. } => fill_pair("binary expression", left, right, child),
            Frame::Selector { parent, selector } => fill_pair("selector", parent, selector, child),
            Frame::Assignment { target, value, .. } => fill_pair("assignment", target, value, child),
            Frame::Field { parent, .. } => fill_one("field access", parent, child),
            Frame::Negation { inner } => fill_one("negation", inner, child),
            Frame::Group { inner } => fill_one("group", inner, child),
            Frame::Call { args, .. } => {
                args.push(child);
                Ok(())
            }
            Frame::Method { receiver, args, .. } => {
                if receiver.is_none() {
                    *receiver = Some(child);
                } else {
                    args.push(child);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeBase;

    #[test]
    fn test_protocol_builds_rule() {
        let mut kb = KnowledgeBase::new("Test", "1");
        let mut b = kb.builder();
        b.begin_rule("Check", "checks X").unwrap();
        b.accept_salience(10).unwrap();
        b.begin_when().unwrap();
        b.begin_expression(BinaryOp::Gt).unwrap();
        b.begin_field("X").unwrap();
        b.accept_variable("Fact").unwrap();
        b.end().unwrap();
        b.accept_constant(Literal::Int(3)).unwrap();
        b.end().unwrap();
        b.begin_then().unwrap();
        b.begin_assignment(AssignOp::Set).unwrap();
        b.begin_field("Y").unwrap();
        b.accept_variable("Fact").unwrap();
        b.end().unwrap();
        b.accept_constant(Literal::Bool(true)).unwrap();
        b.end().unwrap();
        assert_eq!(b.end_rule().unwrap(), 0);
        assert_eq!(b.depth(), 0);

        let entry = kb.rule("Check").unwrap();
        assert_eq!(entry.salience, 10);
        assert_eq!(kb.ast().snapshot(entry.when), "Fact.X > 3");
        assert_eq!(kb.ast().snapshot(entry.then[0]), "Fact.Y = true");
    }

    #[test]
    fn test_third_fill_is_rejected() {
        let mut kb = KnowledgeBase::new("Test", "1");
        let mut b = kb.builder();
        b.begin_rule("R", "").unwrap();
        b.begin_when().unwrap();
        b.begin_expression(BinaryOp::Add).unwrap();
        b.accept_constant(Literal::Int(1)).unwrap();
        b.accept_constant(Literal::Int(2)).unwrap();
        let err = b.accept_constant(Literal::Int(3)).unwrap_err();
        assert!(matches!(err, BuildError::SlotAlreadyFilled { node: "binary expression", .. }));
    }

    #[test]
    fn test_incomplete_and_misplaced_nodes() {
        let mut kb = KnowledgeBase::new("Test", "1");
        let mut b = kb.builder();
        assert!(matches!(b.accept_variable("X"), Err(BuildError::EmptyStack { .. })));
        b.begin_rule("R", "").unwrap();
        assert!(matches!(b.accept_variable("X"), Err(BuildError::UnexpectedChild { .. })));
        b.begin_when().unwrap();
        b.begin_negation().unwrap();
        assert!(matches!(b.end(), Err(BuildError::Incomplete { missing: "operand", .. })));
    }

    #[test]
    fn test_rule_without_when_is_incomplete() {
        let mut kb = KnowledgeBase::new("Test", "1");
        let mut b = kb.builder();
        b.begin_rule("R", "").unwrap();
        b.begin_when().unwrap();
        b.begin_then().unwrap();
        assert!(matches!(b.end_rule(), Err(BuildError::Incomplete { missing: "when", .. })));
        assert!(matches!(b.begin_when(), Err(BuildError::EmptyStack { .. })));
    }

    #[test]
    fn test_assignment_target_must_be_variable() {
        let mut kb = KnowledgeBase::new("Test", "1");
        let mut b = kb.builder();
        b.begin_rule("R", "").unwrap();
        b.begin_when().unwrap();
        b.accept_constant(Literal::Bool(true)).unwrap();
        b.begin_then().unwrap();
        b.begin_assignment(AssignOp::Set).unwrap();
        b.accept_constant(Literal::Int(1)).unwrap();
        b.accept_constant(Literal::Int(2)).unwrap();
        assert!(matches!(b.end(), Err(BuildError::UnexpectedChild { .. })));
    }

    #[test]
    fn test_rejects_non_finite_literals() {
        let mut kb = KnowledgeBase::new("Test", "1");
        let mut b = kb.builder();
        b.begin_rule("R", "").unwrap();
        b.begin_when().unwrap();
        assert!(matches!(
            b.accept_constant(Literal::Float(f64::INFINITY)),
            Err(BuildError::InvalidLiteral { .. })
        ));
    }

    #[test]
    fn test_when_nodes_are_shared_then_nodes_are_not() {
        let mut kb = KnowledgeBase::new("Test", "1");
        let mut b = kb.builder();
        b.begin_rule("R", "").unwrap();
        b.begin_when().unwrap();
        b.begin_expression(BinaryOp::Eq).unwrap();
        let first = b.accept_variable("A").unwrap();
        let second = b.accept_variable("A").unwrap();
        b.end().unwrap();
        b.begin_then().unwrap();
        b.begin_function_call("Log").unwrap();
        let third = b.accept_variable("A").unwrap();
        let fourth = b.accept_variable("A").unwrap();
        b.end().unwrap();
        b.end_rule().unwrap();
        assert_eq!(first, second);
        assert_ne!(third, fourth);
        assert_ne!(first, third);
    }
}
