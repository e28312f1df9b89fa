//! Process-wide registry of canonical knowledge bases.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::ast::RuleDef;
use crate::catalog;
use crate::error::{lock_err, BuildError, RuleError, RuleResult};

use super::KnowledgeBase;

type Key = (String, String);

fn key(name: &str, version: &str) -> Key {
    (name.to_string(), version.to_string())
}

/// Canonical knowledge bases by name and version.
///
/// Published bases are never mutated. Every change builds a new canonical
/// copy and swaps it in, so instances handed out earlier keep the rules they
/// were created with.
#[derive(Debug, Default)]
pub struct KnowledgeLibrary {
    bases: RwLock<HashMap<Key, Arc<KnowledgeBase>>>,
}

impl KnowledgeLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds onto the canonical base for `name`/`version` (or an empty one)
    /// and publishes the result. Nothing is published when `build` fails.
    pub fn build<F>(&self, name: &str, version: &str, build: F) -> RuleResult<()>
    where
        F: FnOnce(&mut KnowledgeBase) -> Result<(), BuildError>,
    {
        let mut bases = self.bases.write().map_err(|_| lock_err("library.build"))?;
        let mut kb = bases
            .get(&key(name, version))
            .map_or_else(|| KnowledgeBase::new(name, version), |base| base.instance());
        build(&mut kb)?;
        kb.normalize();
        debug!(
            knowledge_base = name,
            version,
            rules = kb.rule_count(),
            nodes = kb.ast().len(),
            "knowledge base published"
        );
        bases.insert(key(name, version), Arc::new(kb));
        Ok(())
    }

    /// Adds rules described with the fluent front end.
    pub fn add_rules(&self, name: &str, version: &str, rules: &[RuleDef]) -> RuleResult<()> {
        self.build(name, version, |kb| rules.iter().try_for_each(|rule| kb.add_rule(rule)))
    }

    /// Publishes a complete knowledge base, replacing any previous one.
    pub fn publish(&self, mut kb: KnowledgeBase) -> RuleResult<()> {
        kb.normalize();
        let mut bases = self.bases.write().map_err(|_| lock_err("library.publish"))?;
        bases.insert(key(kb.name(), kb.version()), Arc::new(kb));
        Ok(())
    }

    /// The canonical base, shared. Use [`Self::instance`] to run rules.
    pub fn canonical(&self, name: &str, version: &str) -> RuleResult<Option<Arc<KnowledgeBase>>> {
        let bases = self.bases.read().map_err(|_| lock_err("library.canonical"))?;
        Ok(bases.get(&key(name, version)).cloned())
    }

    #[must_use]
    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.bases
            .read()
            .is_ok_and(|bases| bases.contains_key(&key(name, version)))
    }

    /// Names and versions of every published base, sorted.
    pub fn list(&self) -> RuleResult<Vec<(String, String)>> {
        let bases = self.bases.read().map_err(|_| lock_err("library.list"))?;
        let mut keys: Vec<Key> = bases.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    /// A private deep copy of the canonical base for one session.
    pub fn instance(&self, name: &str, version: &str) -> RuleResult<KnowledgeBase> {
        let base = self.canonical(name, version)?.ok_or_else(|| {
            RuleError::configuration(format!("knowledge base {name} version {version} is not in the library"))
        })?;
        let copy = base.instance();
        debug_assert!(base.structurally_equal(&copy));
        debug!(
            knowledge_base = name,
            version,
            instance = %copy.instance_id(),
            "knowledge base instance created"
        );
        Ok(copy)
    }

    /// Removes a rule from the canonical base. Existing instances keep it.
    pub fn remove_rule_entry(&self, name: &str, version: &str, rule: &str) -> RuleResult<bool> {
        let mut bases = self.bases.write().map_err(|_| lock_err("library.remove_rule_entry"))?;
        let Some(base) = bases.get(&key(name, version)) else {
            return Ok(false);
        };
        let mut kb = base.instance();
        if !kb.remove_rule_entry(rule) {
            return Ok(false);
        }
        bases.insert(key(name, version), Arc::new(kb));
        Ok(true)
    }

    /// Writes the canonical base as a catalog.
    pub fn store(&self, name: &str, version: &str, writer: &mut impl Write) -> RuleResult<()> {
        let base = self.canonical(name, version)?.ok_or_else(|| {
            RuleError::configuration(format!("knowledge base {name} version {version} is not in the library"))
        })?;
        catalog::write_catalog(&base, writer)?;
        info!(knowledge_base = name, version, "catalog stored");
        Ok(())
    }

    /// Reads a catalog and publishes it. Fails when a base with the same
    /// name and version exists and `overwrite` is false.
    pub fn load(&self, reader: &mut impl Read, overwrite: bool) -> RuleResult<(String, String)> {
        let kb = catalog::read_catalog(reader)?;
        let k = key(kb.name(), kb.version());
        let mut bases = self.bases.write().map_err(|_| lock_err("library.load"))?;
        if !overwrite && bases.contains_key(&k) {
            return Err(RuleError::catalog(format!(
                "knowledge base {} version {} already exists",
                k.0, k.1
            )));
        }
        info!(knowledge_base = %k.0, version = %k.1, rules = kb.rule_count(), "catalog loaded");
        bases.insert(k.clone(), Arc::new(kb));
        Ok(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Action, Expr};

    fn rule(name: &str) -> RuleDef {
        RuleDef::new(name)
            .when(Expr::var("F").field("On").eq(true))
            .then(Action::set(Expr::var("F").field("On"), false))
    }

    #[test]
    fn test_instance_requires_published_base() {
        let lib = KnowledgeLibrary::new();
        let err = lib.instance("Missing", "1").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_build_is_copy_on_write() {
        let lib = KnowledgeLibrary::new();
        lib.add_rules("K", "1", &[rule("A")]).unwrap();
        let before = lib.instance("K", "1").unwrap();
        lib.add_rules("K", "1", &[rule("B")]).unwrap();
        let after = lib.instance("K", "1").unwrap();
        assert_eq!(before.rule_count(), 1);
        assert_eq!(after.rule_count(), 2);
        assert_eq!(lib.list().unwrap(), vec![("K".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_failed_build_publishes_nothing() {
        let lib = KnowledgeLibrary::new();
        lib.add_rules("K", "1", &[rule("A")]).unwrap();
        let err = lib.add_rules("K", "1", &[rule("B"), rule("A")]).unwrap_err();
        assert!(err.is_build());
        assert_eq!(lib.instance("K", "1").unwrap().rule_count(), 1);
    }

    #[test]
    fn test_remove_rule_entry_affects_future_instances_only() {
        let lib = KnowledgeLibrary::new();
        lib.add_rules("K", "1", &[rule("A"), rule("B")]).unwrap();
        let old = lib.instance("K", "1").unwrap();
        assert!(lib.remove_rule_entry("K", "1", "A").unwrap());
        assert!(!lib.remove_rule_entry("K", "1", "A").unwrap());
        assert!(old.contains_rule("A"));
        assert!(!lib.instance("K", "1").unwrap().contains_rule("A"));
    }

    #[test]
    fn test_store_and_load() {
        let lib = KnowledgeLibrary::new();
        lib.add_rules("K", "1", &[rule("A")]).unwrap();
        let mut bytes = Vec::new();
        lib.store("K", "1", &mut bytes).unwrap();

        let other = KnowledgeLibrary::new();
        let loaded = other.load(&mut bytes.as_slice(), false).unwrap();
        assert_eq!(loaded, ("K".to_string(), "1".to_string()));
        assert!(other.load(&mut bytes.as_slice(), false).is_err());
        other.load(&mut bytes.as_slice(), true).unwrap();
        let original = lib.canonical("K", "1").unwrap().unwrap();
        let copy = other.canonical("K", "1").unwrap().unwrap();
        assert!(original.structurally_equal(&copy));
    }
}
