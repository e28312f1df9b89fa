//! Evaluation of a knowledge base bound to a data context.

use tracing::warn;

use crate::access::{ValueNode, VariablePath};
use crate::context::DataContext;
use crate::error::{AccessError, RuleResult, TypeError};
use crate::knowledge::{RuleEntry, RuleSet};
use crate::math;
use crate::memory::RuleContext;
use crate::value::Value;

use super::{Ast, BinaryOp, Node, NodeId};

/// A knowledge base bound to one data context.
///
/// Obtained from [`crate::KnowledgeBase::bind`]. Nodes can only be evaluated
/// through a session, and built-in functions receive the session as their
/// handle to the running rule set.
pub struct Session<'a> {
    pub(crate) name: &'a str,
    pub(crate) ast: &'a Ast,
    pub(crate) memory: &'a mut RuleContext,
    pub(crate) rules: &'a mut RuleSet,
    pub(crate) data: &'a mut DataContext,
    current: Option<usize>,
    changed: bool,
    retracted_current: bool,
}

/// What happened while a rule's actions ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ActionOutcome {
    pub changed: bool,
    pub retracted_self: bool,
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        name: &'a str,
        ast: &'a Ast,
        memory: &'a mut RuleContext,
        rules: &'a mut RuleSet,
        data: &'a mut DataContext,
    ) -> Self {
        Self {
            name,
            ast,
            memory,
            rules,
            data,
            current: None,
            changed: false,
            retracted_current: false,
        }
    }

    /// Name of the bound knowledge base.
    #[must_use]
    pub const fn knowledge_base(&self) -> &str {
        self.name
    }

    /// Name of the rule whose actions are running, if any.
    #[must_use]
    pub fn current_rule(&self) -> Option<&str> {
        self.current
            .and_then(|i| self.rules.get(i))
            .map(|e| e.name.as_str())
    }

    #[must_use]
    pub fn data(&self) -> &DataContext {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut DataContext {
        &mut *self.data
    }

    /// Rule entries of the bound knowledge base in registration order.
    #[must_use]
    pub fn entries(&self) -> &[RuleEntry] {
        self.rules.entries()
    }

    /// Evaluates a node to a value.
    pub fn evaluate(&mut self, id: NodeId) -> RuleResult<Value> {
        Ok(self.eval_node(id)?.into_value())
    }

    /// Evaluates the `when` clause of one entry.
    pub fn evaluate_when(&mut self, entry: usize) -> RuleResult<bool> {
        let when = self.entry(entry)?.when;
        let value = self.evaluate(when)?;
        Ok(math::truthy("when", &value)?)
    }

    /// Runs the `then` list of one entry in order.
    pub(crate) fn execute_then(&mut self, entry: usize) -> RuleResult<ActionOutcome> {
        self.current = Some(entry);
        self.changed = false;
        self.retracted_current = false;
        let count = self.entry(entry)?.then.len();
        let mut result = Ok(());
        for i in 0..count {
            let id = self.entry(entry)?.then[i];
            if let Err(e) = self.evaluate(id) {
                result = Err(e);
                break;
            }
        }
        let outcome = ActionOutcome {
            changed: self.changed,
            retracted_self: self.retracted_current,
        };
        self.current = None;
        result.map(|()| outcome)
    }

    fn entry(&self, index: usize) -> RuleResult<&RuleEntry> {
        self.rules
            .get(index)
            .ok_or_else(|| crate::RuleError::internal(format!("rule entry {index} does not exist")))
    }

    /// Retracts a rule entry for the rest of the run.
    pub fn retract(&mut self, rule: &str) {
        match self.rules.position(rule) {
            Some(index) => {
                if let Some(entry) = self.rules.get_mut(index) {
                    entry.retracted = true;
                }
                if self.current == Some(index) {
                    self.retracted_current = true;
                }
            }
            None => warn!(rule, knowledge_base = self.name, "retract of unknown rule ignored"),
        }
    }

    /// Makes a retracted rule entry eligible again.
    pub fn reinstate(&mut self, rule: &str) {
        match self.rules.position(rule).and_then(|i| self.rules.get_mut(i)) {
            Some(entry) => entry.retracted = false,
            None => warn!(rule, knowledge_base = self.name, "reinstate of unknown rule ignored"),
        }
    }

    /// Announces that data under `path` changed outside an assignment.
    pub fn changed(&mut self, path: &VariablePath) {
        self.memory.invalidate(path);
        self.changed = true;
    }

    /// Stops the run once the current rule's actions finish.
    pub fn complete(&mut self) {
        self.data.complete();
    }

    fn eval_args(&mut self, args: &[NodeId]) -> RuleResult<Vec<Value>> {
        args.iter().map(|a| self.evaluate(*a)).collect()
    }

    pub(crate) fn eval_node(&mut self, id: NodeId) -> RuleResult<ValueNode> {
        if let Some(value) = self.memory.cached(id) {
            return Ok(ValueNode::detached(value.clone()));
        }
        let ast = self.ast;
        let node = match ast.get(id)? {
            Node::Constant { literal } => return Ok(ValueNode::detached(literal.to_value())),
            Node::Variable { name } => self.data.root(name)?,
            Node::Field { parent, field } => self.eval_node(*parent)?.field(field)?,
            Node::Selector { parent, selector } => {
                let parent = self.eval_node(*parent)?;
                let selector = self.evaluate(*selector)?;
                parent.select(&selector)?
            }
            Node::Call { name, args } => {
                let args = self.eval_args(args)?;
                ValueNode::detached(crate::builtins::call(self, name, &args)?)
            }
            Node::Method { receiver, name, args } => {
                let mut target = self.eval_node(*receiver)?;
                let args = self.eval_args(args)?;
                let value = target.call(name, &args)?;
                // A record method may mutate the host. It counts as a change
                // for refraction but invalidates nothing; see `changed`.
                if target.is_object() && self.current.is_some() {
                    self.changed = true;
                }
                if target.is_dirty() {
                    target.commit(self.data)?;
                    if let Some(path) = ast.variable_path(*receiver) {
                        self.note_write(&path);
                    }
                }
                ValueNode::detached(value)
            }
            Node::Negation { inner } => {
                let value = self.evaluate(*inner)?;
                ValueNode::detached(Value::Bool(!math::truthy("!", &value)?))
            }
            Node::Group { inner } => self.eval_node(*inner)?,
            Node::Binary { op, left, right } => {
                ValueNode::detached(self.eval_binary(*op, *left, *right)?)
            }
            Node::Assignment { target, op, value } => {
                self.assign(*target, op.binary(), *value)?;
                ValueNode::detached(Value::Null)
            }
        };
        if self.memory.is_tracked(id) {
            self.memory.store(id, node.value());
        }
        Ok(node)
    }

    fn eval_binary(&mut self, op: BinaryOp, left: NodeId, right: NodeId) -> RuleResult<Value> {
        if op.is_logical() {
            let l = self.evaluate(left)?;
            let l = math::truthy(op.symbol(), &l)?;
            // Short circuit.
            if (op == BinaryOp::And && !l) || (op == BinaryOp::Or && l) {
                return Ok(Value::Bool(l));
            }
            let r = self.evaluate(right)?;
            return Ok(Value::Bool(math::truthy(op.symbol(), &r)?));
        }
        let l = self.evaluate(left)?;
        let r = self.evaluate(right)?;
        Ok(apply_binary(op, &l, &r)?)
    }

    fn assign(&mut self, target: NodeId, op: Option<BinaryOp>, value: NodeId) -> RuleResult<()> {
        let ast = self.ast;
        let mut value = self.evaluate(value)?;
        if let Some(op) = op {
            let current = self.evaluate(target)?;
            value = apply_binary(op, &current, &value)?;
        }
        match ast.get(target)? {
            Node::Variable { name } => {
                let mut root = self.data.root(name)?;
                root.set_value(value)?;
                root.commit(self.data)?;
            }
            Node::Field { parent, field } => {
                let mut parent = self.eval_node(*parent)?;
                parent.set_field(field, value)?;
                parent.commit(self.data)?;
            }
            Node::Selector { parent, selector } => {
                let mut parent = self.eval_node(*parent)?;
                let selector = self.evaluate(*selector)?;
                parent.set_selected(&selector, value)?;
                parent.commit(self.data)?;
            }
            _ => {
                return Err(AccessError::NotAddressable {
                    path: ast.snapshot(target),
                }
                .into())
            }
        }
        if let Some(path) = ast.variable_path(target) {
            self.note_write(&path);
        } else {
            self.changed = true;
        }
        Ok(())
    }

    fn note_write(&mut self, path: &VariablePath) {
        self.memory.invalidate(path);
        self.changed = true;
    }
}

/// Applies a non-logical binary operator.
pub(crate) fn apply_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, TypeError> {
    use std::cmp::Ordering;

    let ordered = |accept: fn(Ordering) -> bool| -> Result<Value, TypeError> {
        Ok(Value::Bool(math::compare(op.symbol(), l, r)?.is_some_and(accept)))
    };
    match op {
        BinaryOp::Mul => math::mul(l, r),
        BinaryOp::Div => math::div(l, r),
        BinaryOp::Rem => math::rem(l, r),
        BinaryOp::Add => math::add(l, r),
        BinaryOp::Sub => math::sub(l, r),
        BinaryOp::BitAnd => math::bit_and(l, r),
        BinaryOp::BitOr => math::bit_or(l, r),
        BinaryOp::Lt => ordered(Ordering::is_lt),
        BinaryOp::Le => ordered(Ordering::is_le),
        BinaryOp::Gt => ordered(Ordering::is_gt),
        BinaryOp::Ge => ordered(Ordering::is_ge),
        BinaryOp::Eq => Ok(Value::Bool(math::equals(l, r)?)),
        BinaryOp::Ne => Ok(Value::Bool(!math::equals(l, r)?)),
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(
            math::truthy(op.symbol(), l)? && math::truthy(op.symbol(), r)?,
        )),
    }
}
