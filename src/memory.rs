//! Rule context: deduplicated condition nodes and their cached values.
//!
//! Every node built inside a `when` clause is interned here. Structurally
//! equal subtrees collapse onto one node id, so a condition shared by many
//! rules is evaluated once per cycle. Assignments invalidate every cached
//! node whose read paths overlap the written path; host-side mutations
//! must be announced with `Changed(path)`.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use crate::access::VariablePath;
use crate::ast::{Ast, Node, NodeId};
use crate::value::Value;

#[derive(Debug, Clone)]
struct Tracked {
    reads: Vec<VariablePath>,
    cached: Option<Value>,
}

/// Per knowledge base registry of condition nodes.
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    index: HashMap<Node, NodeId>,
    tracked: BTreeMap<NodeId, Tracked>,
}

impl RuleContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of a structurally equal node already registered, or
    /// appends `node` to `ast` and registers it.
    ///
    /// Children of `node` must already be interned for the lookup to find
    /// shared subtrees. Nodes that depend on a volatile call are appended
    /// but never shared or cached.
    pub fn intern(&mut self, ast: &mut Ast, node: Node) -> NodeId {
        let key = crate::ast::canonical(&node);
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = ast.push(node);
        self.register(ast, id);
        id
    }

    /// Registers an existing node.
    pub fn register(&mut self, ast: &Ast, id: NodeId) {
        let Ok(node) = ast.get(id) else {
            return;
        };
        if ast.is_volatile(id) {
            return;
        }
        self.index.entry(crate::ast::canonical(node)).or_insert(id);
        if !matches!(node, Node::Constant { .. }) {
            self.tracked.entry(id).or_insert_with(|| Tracked {
                reads: ast.read_paths(id),
                cached: None,
            });
        }
    }

    /// Registers a whole subtree, children first.
    pub fn register_tree(&mut self, ast: &Ast, root: NodeId) {
        if let Ok(node) = ast.get(root) {
            for child in node.children() {
                self.register_tree(ast, child);
            }
            self.register(ast, root);
        }
    }

    #[must_use]
    pub fn is_tracked(&self, id: NodeId) -> bool {
        self.tracked.contains_key(&id)
    }

    /// Number of tracked nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Ids of tracked nodes, ascending.
    pub fn tracked_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.tracked.keys().copied()
    }

    #[must_use]
    pub fn cached(&self, id: NodeId) -> Option<&Value> {
        self.tracked.get(&id).and_then(|t| t.cached.as_ref())
    }

    pub(crate) fn store(&mut self, id: NodeId, value: &Value) {
        if let Some(tracked) = self.tracked.get_mut(&id) {
            tracked.cached = Some(value.clone());
        }
    }

    /// Drops the cached value of every node that reads something `path`
    /// may have changed. Returns the number of nodes reset.
    pub fn invalidate(&mut self, path: &VariablePath) -> usize {
        let mut reset = 0;
        for tracked in self.tracked.values_mut() {
            if tracked.cached.is_some() && tracked.reads.iter().any(|r| r.overlaps(path)) {
                tracked.cached = None;
                reset += 1;
            }
        }
        trace!(path = %path, reset, "rule context invalidated");
        reset
    }

    /// Drops every cached value.
    pub fn reset(&mut self) {
        for tracked in self.tracked.values_mut() {
            tracked.cached = None;
        }
    }

    /// Number of nodes currently holding a cached value.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.tracked.values().filter(|t| t.cached.is_some()).count()
    }
}
