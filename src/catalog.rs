//! Catalog persistence for knowledge bases.
//!
//! A catalog is the flattened node list plus the rule table, with node
//! references stored as indices into that list. Framing:
//!
//! ```text
//! [magic: "SALC"][version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//!
//! Loading rebuilds the rule context from the `when` clauses and checks
//! that the result has the fingerprint recorded at store time.

use std::collections::HashSet;
use std::io::{Read, Write};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::ast::{Ast, Node};
use crate::error::{RuleError, RuleResult};
use crate::knowledge::{KnowledgeBase, RuleEntry, RuleSet};
use crate::memory::RuleContext;

/// Current catalog format version.
pub const CATALOG_VERSION: u8 = 1;

/// Magic bytes opening every catalog.
pub const MAGIC: [u8; 4] = *b"SALC";

// Reject absurd lengths before allocating.
const MAX_CATALOG_SIZE: usize = 256 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct CatalogDocument {
    name: String,
    version: String,
    fingerprint: String,
    removed: u64,
    nodes: Vec<Node>,
    rules: Vec<RuleEntry>,
}

/// Serializes a knowledge base into catalog bytes.
pub fn to_bytes(kb: &KnowledgeBase) -> RuleResult<Vec<u8>> {
    let document = CatalogDocument {
        name: kb.name().to_string(),
        version: kb.version().to_string(),
        fingerprint: kb.fingerprint(),
        removed: kb.rules.removed(),
        nodes: kb.ast().nodes().to_vec(),
        rules: kb.entries().to_vec(),
    };
    let data = serde_json::to_vec(&document)
        .map_err(|e| RuleError::catalog(format!("serialization failed: {e}")))?;
    let len = u32::try_from(data.len())
        .map_err(|_| RuleError::catalog(format!("catalog of {} bytes is too large", data.len())))?;

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(MAGIC.len() + 1 + 4 + data.len() + 4);
    out.extend_from_slice(&MAGIC);
    out.push(CATALOG_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Writes a catalog.
pub fn write_catalog(kb: &KnowledgeBase, writer: &mut impl Write) -> RuleResult<()> {
    let bytes = to_bytes(kb)?;
    writer
        .write_all(&bytes)
        .and_then(|()| writer.flush())
        .map_err(|e| RuleError::catalog(format!("write failed: {e}")))
}

/// Rebuilds a knowledge base from catalog bytes.
pub fn from_bytes(bytes: &[u8]) -> RuleResult<KnowledgeBase> {
    read_catalog(&mut &bytes[..])
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8], what: &str) -> RuleResult<()> {
    reader
        .read_exact(buf)
        .map_err(|e| RuleError::catalog(format!("truncated catalog while reading {what}: {e}")))
}

/// Reads and verifies a catalog.
pub fn read_catalog(reader: &mut impl Read) -> RuleResult<KnowledgeBase> {
    let mut magic = [0u8; 4];
    read_exact(reader, &mut magic, "magic")?;
    if magic != MAGIC {
        return Err(RuleError::catalog(format!(
            "invalid magic bytes: expected {MAGIC:?}, got {magic:?}"
        )));
    }

    let mut version = [0u8; 1];
    read_exact(reader, &mut version, "version")?;
    if version[0] != CATALOG_VERSION {
        return Err(RuleError::catalog(format!(
            "unsupported catalog version: {} (expected {CATALOG_VERSION})",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    read_exact(reader, &mut len_bytes, "length")?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_CATALOG_SIZE {
        return Err(RuleError::catalog(format!(
            "catalog size {len} exceeds maximum {MAX_CATALOG_SIZE}"
        )));
    }

    let mut data = vec![0u8; len];
    read_exact(reader, &mut data, "payload")?;

    let mut crc_bytes = [0u8; 4];
    read_exact(reader, &mut crc_bytes, "checksum")?;
    let stored_crc = u32::from_le_bytes(crc_bytes);
    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();
    if stored_crc != computed_crc {
        return Err(RuleError::catalog(format!(
            "CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x} (data corrupted)"
        )));
    }

    let document: CatalogDocument = serde_json::from_slice(&data)
        .map_err(|e| RuleError::catalog(format!("deserialization failed: {e}")))?;
    rebuild(document)
}

fn rebuild(document: CatalogDocument) -> RuleResult<KnowledgeBase> {
    let ast = Ast::from_nodes(document.nodes)
        .map_err(|e| RuleError::catalog(format!("invalid node table: {e}")))?;
    let mut names = HashSet::new();
    let mut memory = RuleContext::new();
    for entry in &document.rules {
        if !names.insert(entry.name.as_str()) {
            return Err(RuleError::catalog(format!("duplicate rule entry '{}'", entry.name)));
        }
        for id in std::iter::once(entry.when).chain(entry.then.iter().copied()) {
            ast.get(id)
                .map_err(|e| RuleError::catalog(format!("rule entry '{}': {e}", entry.name)))?;
        }
        memory.register_tree(&ast, entry.when);
    }
    let kb = KnowledgeBase::from_parts(
        document.name,
        document.version,
        ast,
        RuleSet::from_entries(document.rules, document.removed),
        memory,
    );
    let fingerprint = kb.fingerprint();
    if fingerprint != document.fingerprint {
        return Err(RuleError::catalog(format!(
            "fingerprint mismatch: stored={}, rebuilt={fingerprint}",
            document.fingerprint
        )));
    }
    Ok(kb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Action, AssignOp, Expr, RuleDef};

    fn sample() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("Catalog", "2.0.0");
        kb.add_rule(
            &RuleDef::new("Tally")
                .describe("counts")
                .salience(7)
                .when(Expr::var("T").field("N").lt(10).or(Expr::var("T").field("Force").eq(true)))
                .then(Action::update(Expr::var("T").field("N"), AssignOp::Add, 1))
                .then(Action::call("Changed", [Expr::from("T.N")])),
        )
        .unwrap();
        kb.add_rule(&RuleDef::new("Gone").when(Expr::lit(true))).unwrap();
        kb.remove_rule_entry("Gone");
        kb
    }

    #[test]
    fn test_round_trip_is_structurally_equal() {
        let kb = sample();
        let bytes = to_bytes(&kb).unwrap();
        assert_eq!(&bytes[..4], b"SALC");
        let loaded = from_bytes(&bytes).unwrap();
        assert!(kb.structurally_equal(&loaded));
        assert_eq!(kb.fingerprint(), loaded.fingerprint());
        assert_eq!(loaded.rules.removed(), 1);
        assert!(!loaded.contains_rule("Gone"));
        assert_eq!(loaded.rule_context().len(), kb.rule_context().len());
    }

    #[test]
    fn test_detects_corruption() {
        let mut bytes = to_bytes(&sample()).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xFF;
        let err = from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, RuleError::Catalog { .. }));
    }

    #[test]
    fn test_rejects_bad_header_and_truncation() {
        let bytes = to_bytes(&sample()).unwrap();
        let mut wrong_magic = bytes.clone();
        wrong_magic[0] = b'X';
        assert!(from_bytes(&wrong_magic).is_err());
        let mut wrong_version = bytes.clone();
        wrong_version[4] = 99;
        assert!(from_bytes(&wrong_version).is_err());
        assert!(from_bytes(&bytes[..bytes.len() - 2]).is_err());
    }

    fn frame(document: &serde_json::Value) -> Vec<u8> {
        let data = serde_json::to_vec(document).unwrap();
        let mut hasher = Hasher::new();
        hasher.update(&data);
        let mut out = MAGIC.to_vec();
        out.push(CATALOG_VERSION);
        out.extend_from_slice(&u32::try_from(data.len()).unwrap().to_le_bytes());
        out.extend_from_slice(&data);
        out.extend_from_slice(&hasher.finalize().to_le_bytes());
        out
    }

    #[test]
    fn test_rejects_self_referencing_node() {
        let bytes = frame(&serde_json::json!({
            "name": "Loop",
            "version": "1",
            "fingerprint": "",
            "removed": 0,
            "nodes": [{"node": "negation", "inner": 0}],
            "rules": [],
        }));
        let err = from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, RuleError::Catalog { .. }));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_rejects_indirect_cycle_with_forward_ids() {
        let kb = sample();
        let mut document = serde_json::to_value(CatalogDocument {
            name: kb.name().to_string(),
            version: kb.version().to_string(),
            fingerprint: kb.fingerprint(),
            removed: kb.rules.removed(),
            nodes: kb.ast().nodes().to_vec(),
            rules: kb.entries().to_vec(),
        })
        .unwrap();
        let nodes = document["nodes"].as_array_mut().unwrap();
        let first = nodes.len();
        nodes.push(serde_json::json!({"node": "group", "inner": first + 1}));
        nodes.push(serde_json::json!({"node": "negation", "inner": first}));
        let err = from_bytes(&frame(&document)).unwrap_err();
        assert!(matches!(err, RuleError::Catalog { .. }));
    }

    #[test]
    fn test_accepts_children_above_their_parent() {
        // Copies reserve the parent slot before visiting children.
        let kb = sample().instance();
        assert!(kb
            .ast()
            .nodes()
            .iter()
            .enumerate()
            .any(|(i, n)| n.children().iter().any(|c| c.index() > i)));
        let loaded = from_bytes(&to_bytes(&kb).unwrap()).unwrap();
        assert!(kb.structurally_equal(&loaded));
    }

    #[test]
    fn test_rejects_duplicate_rule_names() {
        let kb = sample();
        let mut document = serde_json::to_value(CatalogDocument {
            name: kb.name().to_string(),
            version: kb.version().to_string(),
            fingerprint: kb.fingerprint(),
            removed: kb.rules.removed(),
            nodes: kb.ast().nodes().to_vec(),
            rules: kb.entries().to_vec(),
        })
        .unwrap();
        let rules = document["rules"].as_array_mut().unwrap();
        let copy = rules[0].clone();
        rules.push(copy);
        let err = from_bytes(&frame(&document)).unwrap_err();
        assert!(matches!(err, RuleError::Catalog { .. }));
        assert!(err.to_string().contains("duplicate rule entry 'Tally'"));
    }

    #[test]
    fn test_rejects_oversized_catalog() {
        let mut bad = MAGIC.to_vec();
        bad.push(CATALOG_VERSION);
        bad.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = from_bytes(&bad).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }
}
