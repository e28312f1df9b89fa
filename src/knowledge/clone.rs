//! Deep copies of knowledge bases.

use std::collections::HashMap;
use std::convert::Infallible;

use tracing::error;

use crate::ast::{Ast, Node, NodeId};
use crate::memory::RuleContext;

use super::{KnowledgeBase, RuleEntry, RuleSet};

/// Original node id to copied node id, for one copy operation.
///
/// Every node reachable from a rule entry is copied exactly once; parents
/// that shared a child in the source share the copied child. A slot is
/// reserved before the children are visited, so a copied parent may sit at
/// a lower id than its children.
#[derive(Debug, Default)]
pub struct CloneTable {
    map: HashMap<NodeId, NodeId>,
    deduplicate: bool,
}

impl CloneTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that also collapses structurally equal condition subtrees.
    #[must_use]
    pub fn deduplicating() -> Self {
        Self {
            map: HashMap::new(),
            deduplicate: true,
        }
    }

    /// Copy of `id`, if it was visited.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<NodeId> {
        self.map.get(&id).copied()
    }

    /// Number of nodes copied so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Copies `source` into a fresh knowledge base with empty session state.
    pub fn copy(mut self, source: &KnowledgeBase) -> KnowledgeBase {
        let mut ast = Ast::new();
        let mut memory = RuleContext::new();
        let mut entries = Vec::with_capacity(source.entries().len());
        for entry in source.entries() {
            let when = if self.deduplicate {
                self.intern(&source.ast, entry.when, &mut ast, &mut memory)
            } else {
                self.visit(&source.ast, entry.when, &mut ast)
            };
            let then = entry
                .then
                .iter()
                .map(|id| self.visit(&source.ast, *id, &mut ast))
                .collect();
            entries.push(RuleEntry {
                name: entry.name.clone(),
                description: entry.description.clone(),
                salience: entry.salience,
                when,
                then,
                retracted: false,
                deleted: entry.deleted,
            });
        }
        if !self.deduplicate {
            for original in source.memory.tracked_ids() {
                if let Some(copy) = self.get(original) {
                    memory.register(&ast, copy);
                }
            }
        }
        KnowledgeBase::from_parts(
            source.name().to_string(),
            source.version().to_string(),
            ast,
            RuleSet::from_entries(entries, source.rules.removed()),
            memory,
        )
    }

    fn visit(&mut self, source: &Ast, id: NodeId, target: &mut Ast) -> NodeId {
        if let Some(copy) = self.get(id) {
            return copy;
        }
        let slot = target.push(Node::Constant {
            literal: crate::ast::Literal::Nil,
        });
        self.map.insert(id, slot);
        let node = match source.get(id) {
            Ok(node) => node,
            Err(e) => {
                error!(error = %e, "copying a dangling node as nil");
                return slot;
            }
        };
        let copied = match node.remap(|child| Ok::<_, Infallible>(self.visit(source, child, target))) {
            Ok(copied) => copied,
            Err(never) => match never {},
        };
        if let Err(e) = target.replace(slot, copied) {
            error!(error = %e, "reserved clone slot is missing");
        }
        slot
    }

    // Condition subtrees are rebuilt bottom-up through the rule context so
    // that equal subtrees land on one node.
    fn intern(&mut self, source: &Ast, id: NodeId, target: &mut Ast, memory: &mut RuleContext) -> NodeId {
        if let Some(copy) = self.get(id) {
            return copy;
        }
        let Ok(node) = source.get(id) else {
            return self.visit(source, id, target);
        };
        let copied = node.remap(|child| Ok::<_, Infallible>(self.intern(source, child, target, memory)));
        let copy = match copied {
            Ok(copied) => memory.intern(target, copied),
            Err(never) => match never {},
        };
        self.map.insert(id, copy);
        copy
    }
}
