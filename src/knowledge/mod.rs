//! Knowledge bases: named, versioned rule sets over one expression graph.
//!
//! A [`KnowledgeBase`] owns its node arena, its rule entries and the rule
//! context that caches condition values. Instances handed out by the
//! [`KnowledgeLibrary`] are deep copies and never share mutable state.

mod clone;
mod library;

use std::collections::HashMap;
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::ast::{Ast, AstBuilder, NodeId, RuleDef, Session};
use crate::context::DataContext;
use crate::error::BuildError;
use crate::memory::RuleContext;

pub use clone::CloneTable;
pub use library::KnowledgeLibrary;

/// Prefix given to removed rule entries.
pub const TOMBSTONE_PREFIX: &str = "__deleted__";

/// Identifier of one knowledge base instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Creates a new random instance id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One named `when`/`then` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub name: String,
    pub description: String,
    /// Firing priority; higher fires first.
    pub salience: i64,
    pub when: NodeId,
    pub then: Vec<NodeId>,
    /// Session state, never persisted.
    #[serde(skip)]
    pub retracted: bool,
    /// Set on tombstones left behind by [`KnowledgeBase::remove_rule_entry`].
    #[serde(default)]
    pub deleted: bool,
}

impl RuleEntry {
    /// Returns true when the entry takes part in conflict resolution.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.retracted && !self.deleted
    }
}

/// Rule entries in registration order with a name index.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    entries: Vec<RuleEntry>,
    index: HashMap<String, usize>,
    removed: u64,
}

impl RuleSet {
    pub(crate) fn from_entries(entries: Vec<RuleEntry>, removed: u64) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        Self {
            entries,
            index,
            removed,
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[RuleEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [RuleEntry] {
        &mut self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&RuleEntry> {
        self.entries.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut RuleEntry> {
        self.entries.get_mut(index)
    }

    /// Position of a live entry by name.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Count of entries removed so far; part of every tombstone name.
    #[must_use]
    pub const fn removed(&self) -> u64 {
        self.removed
    }

    pub(crate) fn push(&mut self, entry: RuleEntry, knowledge_base: &str) -> Result<usize, BuildError> {
        if self.index.contains_key(&entry.name) {
            return Err(BuildError::DuplicateRule {
                name: entry.name,
                knowledge_base: knowledge_base.to_string(),
            });
        }
        let position = self.entries.len();
        self.index.insert(entry.name.clone(), position);
        self.entries.push(entry);
        Ok(position)
    }

    fn remove(&mut self, name: &str) -> bool {
        let Some(position) = self.index.remove(name) else {
            return false;
        };
        let tombstone = format!("{TOMBSTONE_PREFIX}{}__{name}", self.removed);
        self.removed += 1;
        if let Some(entry) = self.entries.get_mut(position) {
            entry.name.clone_from(&tombstone);
            entry.deleted = true;
            entry.retracted = false;
        }
        self.index.insert(tombstone, position);
        true
    }
}

/// A named, versioned set of rule entries.
#[derive(Debug)]
pub struct KnowledgeBase {
    name: String,
    version: String,
    instance: InstanceId,
    pub(crate) ast: Ast,
    pub(crate) rules: RuleSet,
    pub(crate) memory: RuleContext,
}

impl KnowledgeBase {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::from_parts(name.into(), version.into(), Ast::new(), RuleSet::default(), RuleContext::new())
    }

    pub(crate) fn from_parts(
        name: String,
        version: String,
        ast: Ast,
        rules: RuleSet,
        memory: RuleContext,
    ) -> Self {
        Self {
            name,
            version,
            instance: InstanceId::new(),
            ast,
            rules,
            memory,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub const fn instance_id(&self) -> InstanceId {
        self.instance
    }

    #[must_use]
    pub const fn ast(&self) -> &Ast {
        &self.ast
    }

    #[must_use]
    pub const fn rule_context(&self) -> &RuleContext {
        &self.memory
    }

    /// All entries in registration order, tombstones included.
    #[must_use]
    pub fn entries(&self) -> &[RuleEntry] {
        self.rules.entries()
    }

    /// Looks a live entry up by name.
    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&RuleEntry> {
        self.rules
            .position(name)
            .and_then(|i| self.rules.get(i))
            .filter(|e| !e.deleted)
    }

    #[must_use]
    pub fn contains_rule(&self, name: &str) -> bool {
        self.rule(name).is_some()
    }

    /// Number of live entries.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.entries().iter().filter(|e| !e.deleted).count()
    }

    /// Starts an acceptor-protocol builder over this knowledge base.
    pub fn builder(&mut self) -> AstBuilder<'_> {
        AstBuilder::new(&self.name, &mut self.ast, &mut self.memory, &mut self.rules)
    }

    /// Adds one rule described with the fluent front end.
    pub fn add_rule(&mut self, rule: &RuleDef) -> Result<(), BuildError> {
        let mut builder = self.builder();
        rule.emit(&mut builder)?;
        Ok(())
    }

    /// Binds this knowledge base to a data context for evaluation.
    pub fn bind<'a>(&'a mut self, data: &'a mut DataContext) -> Session<'a> {
        Session::new(&self.name, &self.ast, &mut self.memory, &mut self.rules, data)
    }

    /// Permanently removes an entry, leaving a renamed tombstone behind.
    ///
    /// Returns false when no live entry has that name.
    pub fn remove_rule_entry(&mut self, name: &str) -> bool {
        let removed = self.rules.remove(name);
        if removed {
            debug!(knowledge_base = %self.name, rule = name, "rule entry removed");
        }
        removed
    }

    /// Clears cached condition values and retraction flags.
    pub fn reset(&mut self) {
        self.memory.reset();
        self.reset_retractions();
    }

    pub(crate) fn reset_retractions(&mut self) {
        for entry in self.rules.entries_mut() {
            entry.retracted = false;
        }
    }

    /// Canonical text of every entry, used for fingerprints and diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> String {
        let mut out = format!("knowledgebase {:?} version {:?}\n", self.name, self.version);
        for entry in self.entries() {
            let _ = writeln!(
                out,
                "rule {:?} {:?} salience {}{}",
                entry.name,
                entry.description,
                entry.salience,
                if entry.deleted { " deleted" } else { "" }
            );
            let _ = writeln!(out, "  when {}", self.ast.snapshot(entry.when));
            for action in &entry.then {
                let _ = writeln!(out, "  then {};", self.ast.snapshot(*action));
            }
        }
        out
    }

    /// BLAKE3 digest of [`Self::snapshot`], hex encoded.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        blake3::hash(self.snapshot().as_bytes()).to_hex().to_string()
    }

    /// Structural equality of names, entries and their expression graphs.
    #[must_use]
    pub fn structurally_equal(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.entries().len() == other.entries().len()
            && self.entries().iter().zip(other.entries()).all(|(a, b)| {
                a.name == b.name
                    && a.description == b.description
                    && a.salience == b.salience
                    && a.deleted == b.deleted
                    && a.then.len() == b.then.len()
                    && self.ast.structurally_equal(a.when, &other.ast, b.when)
                    && a.then
                        .iter()
                        .zip(&b.then)
                        .all(|(x, y)| self.ast.structurally_equal(*x, &other.ast, *y))
            })
    }

    /// Deep copy with a fresh instance id and empty session state.
    #[must_use]
    pub fn instance(&self) -> Self {
        CloneTable::new().copy(self)
    }

    /// Collapses structurally equal condition subtrees and drops nodes no
    /// entry reaches.
    pub fn normalize(&mut self) {
        let before = self.ast.len();
        let normalized = CloneTable::deduplicating().copy(self);
        self.ast = normalized.ast;
        self.rules = normalized.rules;
        self.memory = normalized.memory;
        debug!(
            knowledge_base = %self.name,
            before,
            after = self.ast.len(),
            "knowledge base normalized"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Action, Expr};

    fn rule(name: &str, salience: i64) -> RuleDef {
        RuleDef::new(name)
            .salience(salience)
            .when(Expr::var("Fact").field("X").eq(1))
            .then(Action::call("Log", [Expr::from(name)]))
    }

    #[test]
    fn test_add_and_lookup() {
        let mut kb = KnowledgeBase::new("Test", "0.1.0");
        kb.add_rule(&rule("A", 1)).unwrap();
        kb.add_rule(&rule("B", 2)).unwrap();
        assert_eq!(kb.rule_count(), 2);
        assert_eq!(kb.rule("B").unwrap().salience, 2);
        // Both rules share one condition graph.
        assert_eq!(kb.rule("A").unwrap().when, kb.rule("B").unwrap().when);
        let err = kb.add_rule(&rule("A", 3)).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateRule { .. }));
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let mut kb = KnowledgeBase::new("Test", "0.1.0");
        kb.add_rule(&rule("X", 1)).unwrap();
        assert!(kb.remove_rule_entry("X"));
        assert!(!kb.remove_rule_entry("X"));
        assert!(!kb.contains_rule("X"));
        let tombstone = &kb.entries()[0];
        assert_eq!(tombstone.name, "__deleted__0__X");
        assert!(tombstone.deleted);
        // The old name can be used again without reviving the tombstone.
        kb.add_rule(&rule("X", 5)).unwrap();
        assert_eq!(kb.entries().len(), 2);
        assert_eq!(kb.rule("X").unwrap().salience, 5);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let mut a = KnowledgeBase::new("Test", "0.1.0");
        let mut b = KnowledgeBase::new("Test", "0.1.0");
        a.add_rule(&rule("A", 1)).unwrap();
        b.add_rule(&rule("A", 1)).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(a.structurally_equal(&b));
        b.add_rule(&rule("B", 1)).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert!(!a.structurally_equal(&b));
    }

    #[test]
    fn test_snapshot_lists_entries() {
        let mut kb = KnowledgeBase::new("Test", "0.1.0");
        kb.add_rule(&rule("A", 3)).unwrap();
        let text = kb.snapshot();
        assert!(text.contains("rule \"A\" \"\" salience 3"));
        assert!(text.contains("when Fact.X == 1"));
        assert!(text.contains("then Log(\"A\");"));
    }
}
