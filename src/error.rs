//! Error types for salience.
//!
//! All errors are strongly typed using thiserror. Each category maps to one
//! failure family of the engine so callers can pattern match on the kind of
//! failure instead of parsing messages.

use std::fmt;

use thiserror::Error;

use crate::ast::NodeId;

/// Errors raised while assembling an AST through the acceptor protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{node} already has its {slot} assigned")]
    SlotAlreadyFilled {
        node: &'static str,
        slot: &'static str,
    },

    #[error("{node} cannot accept a {child}")]
    UnexpectedChild {
        node: &'static str,
        child: &'static str,
    },

    #[error("acceptor stack is empty while handling {operation}")]
    EmptyStack {
        operation: &'static str,
    },

    #[error("{node} is incomplete: missing {missing}")]
    Incomplete {
        node: &'static str,
        missing: &'static str,
    },

    #[error("rule entry '{name}' already exists in knowledge base '{knowledge_base}'")]
    DuplicateRule {
        name: String,
        knowledge_base: String,
    },

    #[error("node {id} does not exist in this AST")]
    DanglingNode {
        id: NodeId,
    },

    #[error("node {id} is part of a reference cycle")]
    CyclicNode {
        id: NodeId,
    },

    #[error("invalid literal: {reason}")]
    InvalidLiteral {
        reason: String,
    },
}

/// Errors raised when navigating or mutating host data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("no fact is bound under the name '{name}'")]
    UnknownFact {
        name: String,
    },

    #[error("'{path}' has no field '{field}'")]
    MissingField {
        path: String,
        field: String,
    },

    #[error("'{path}' index {index} is out of bounds (len {len})")]
    IndexOutOfBounds {
        path: String,
        index: i64,
        len: usize,
    },

    #[error("'{path}' has no key {key}")]
    MissingKey {
        path: String,
        key: String,
    },

    #[error("'{path}' is a {actual}, expected {expected}")]
    ShapeMismatch {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("'{path}' is not addressable")]
    NotAddressable {
        path: String,
    },

    #[error("'{path}' field '{field}' cannot be set: {reason}")]
    NotSettable {
        path: String,
        field: String,
        reason: String,
    },

    #[error("'{path}' has no method '{method}'")]
    UnknownMethod {
        path: String,
        method: String,
    },

    #[error("unknown function '{name}'")]
    UnknownFunction {
        name: String,
    },

    #[error("{function} expects {expected} argument(s), got {actual}")]
    Arity {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("invalid variable path '{path}': {reason}")]
    InvalidPath {
        path: String,
        reason: String,
    },

    #[error("fact lock poisoned while accessing '{path}'")]
    Poisoned {
        path: String,
    },
}

/// Errors raised when operand kinds are incompatible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("operator '{op}' cannot be applied to {left} and {right}")]
    IncompatibleOperands {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("operator '{op}' cannot be applied to {operand}")]
    IncompatibleOperand {
        op: &'static str,
        operand: &'static str,
    },

    #[error("expected a {expected} value, got {actual}")]
    Mismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("'{op}' by zero")]
    DivisionByZero {
        op: &'static str,
    },

    #[error("method '{method}' returns {count} values; multiple value returns are not supported")]
    MultipleReturn {
        method: String,
        count: usize,
    },

    #[error("argument {position} of {function}: {reason}")]
    InvalidArgument {
        function: String,
        position: usize,
        reason: String,
    },
}

/// A single diagnostic produced by a rule-text front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMessage {
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for ParseMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// Aggregated front-end diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Error)]
#[error("{} parse error(s): {}", .messages.len(), render_messages(.messages))]
pub struct ParseError {
    /// All collected diagnostics in source order.
    pub messages: Vec<ParseMessage>,
}

impl ParseError {
    /// Creates an empty error collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one diagnostic.
    pub fn push(&mut self, line: usize, column: usize, message: impl Into<String>) {
        self.messages.push(ParseMessage {
            line,
            column,
            message: message.into(),
        });
    }

    /// Returns true when no diagnostic has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Converts the collector into a result, failing when it holds diagnostics.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn render_messages(messages: &[ParseMessage]) -> String {
    messages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top-level error type for salience.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    #[error("Type error: {0}")]
    Type(#[from] TypeError),

    #[error("the engine still had rule candidates after {max_cycle} cycles; a rule keeps matching without changing the data context")]
    CycleBound {
        max_cycle: u64,
    },

    #[error("Configuration error: {reason}")]
    Configuration {
        reason: String,
    },

    #[error("Catalog error: {message}")]
    Catalog {
        message: String,
    },

    #[error("Runtime queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Runtime workers are disconnected")]
    Disconnected,

    #[error("Session timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl RuleError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Creates a catalog error.
    #[must_use]
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a build error.
    #[must_use]
    pub const fn is_build(&self) -> bool {
        matches!(self, Self::Build(_))
    }

    /// Returns true if this is an access error.
    #[must_use]
    pub const fn is_access(&self) -> bool {
        matches!(self, Self::Access(_))
    }

    /// Returns true if this is a type error.
    #[must_use]
    pub const fn is_type(&self) -> bool {
        matches!(self, Self::Type(_))
    }

    /// Returns true if the cycle bound was exceeded.
    #[must_use]
    pub const fn is_cycle_bound(&self) -> bool {
        matches!(self, Self::CycleBound { .. })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns true for failures that belong to a single rule evaluation.
    ///
    /// Loose mode contains these at the rule-entry boundary.
    #[must_use]
    pub const fn is_rule_local(&self) -> bool {
        matches!(self, Self::Access(_) | Self::Type(_))
    }
}

/// Result type alias for salience operations.
pub type RuleResult<T> = Result<T, RuleError>;

/// Maps a poisoned lock into an error carrying the lock's context.
pub(crate) fn lock_err(context: &'static str) -> RuleError {
    RuleError::internal(format!("poisoned lock: {context}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_slot() {
        let err = BuildError::SlotAlreadyFilled {
            node: "Expression",
            slot: "right operand",
        };
        let msg = format!("{err}");
        assert!(msg.contains("Expression"));
        assert!(msg.contains("already"));
    }

    #[test]
    fn test_parse_error_aggregates_positions() {
        let mut err = ParseError::new();
        assert!(err.clone().into_result().is_ok());
        err.push(3, 14, "unexpected token '&&'");
        err.push(7, 1, "missing 'then'");
        let msg = format!("{err}");
        assert!(msg.contains("2 parse error(s)"));
        assert!(msg.contains("3:14"));
        assert!(msg.contains("7:1"));
        assert!(err.into_result().is_err());
    }

    #[test]
    fn test_rule_local_classification() {
        let access: RuleError = AccessError::IndexOutOfBounds {
            path: "Fact.Items".to_string(),
            index: 4,
            len: 2,
        }
        .into();
        assert!(access.is_access());
        assert!(access.is_rule_local());

        let ty: RuleError = TypeError::DivisionByZero { op: "%" }.into();
        assert!(ty.is_type());
        assert!(ty.is_rule_local());

        let bound = RuleError::CycleBound { max_cycle: 10 };
        assert!(bound.is_cycle_bound());
        assert!(!bound.is_rule_local());
        assert!(format!("{bound}").contains("10 cycles"));

        let config = RuleError::configuration("knowledge base is absent");
        assert!(config.is_configuration());
        assert!(!config.is_rule_local());
    }

    #[test]
    fn test_lock_err_context() {
        let err = lock_err("library.instance");
        assert!(format!("{err}").contains("library.instance"));
    }
}
