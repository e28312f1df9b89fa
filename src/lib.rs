//! # Salience - an embeddable forward-chaining rule engine
//!
//! Rules pair a `when` condition with a list of `then` actions and a
//! salience. A run repeatedly evaluates every rule against a data context,
//! fires the highest-salience match and stops once nothing matches.
//!
//! ## Core Concepts
//!
//! - **Fact**: a host value bound into a [`DataContext`] under a name
//! - **KnowledgeBase**: a named, versioned rule set over one expression graph
//! - **KnowledgeLibrary**: canonical knowledge bases, handed out as private copies
//! - **RuleEngine**: the conflict-resolution cycle over one base and one context
//!
//! ## Usage
//!
//! ```
//! use salience::{Action, AssignOp, DataContext, Expr, KnowledgeLibrary, RuleDef, RuleEngine};
//!
//! let library = KnowledgeLibrary::new();
//! let total = || Expr::var("Order").field("Total");
//! library
//!     .add_rules(
//!         "Pricing",
//!         "1.0.0",
//!         &[RuleDef::new("Discount")
//!             .when(total().gt(100).and(Expr::var("Order").field("Discounted").eq(false)))
//!             .then(Action::update(total(), AssignOp::Mul, 0.9))
//!             .then(Action::set(Expr::var("Order").field("Discounted"), true))],
//!     )
//!     .unwrap();
//!
//! let mut data = DataContext::new();
//! data.add_json("Order", br#"{"Total": 200.0, "Discounted": false}"#).unwrap();
//! let mut kb = library.instance("Pricing", "1.0.0").unwrap();
//! RuleEngine::default().execute(&mut data, Some(&mut kb)).unwrap();
//! assert_eq!(data.get("Order.Total").unwrap().into_value(), salience::Value::from(180.0));
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod access;
pub mod ast;
pub mod builtins;
pub mod catalog;
pub mod context;
pub mod engine;
pub mod error;
pub mod fact;
pub mod knowledge;
pub mod math;
pub mod memory;
pub mod value;

// Re-export primary types at crate root for convenience
pub use access::{PathSegment, ValueNode, VariablePath};
pub use ast::{Action, AssignOp, Ast, AstBuilder, BinaryOp, Expr, Literal, Node, NodeId, RuleDef, Session};
pub use context::DataContext;
pub use engine::runtime::{RuntimeConfig, SessionHandle, SessionOutcome, SessionRuntime};
pub use engine::{EngineConfig, EngineListener, RuleEngine, RunReport};
pub use error::{AccessError, BuildError, ParseError, ParseMessage, RuleError, RuleResult, TypeError};
pub use fact::{Fact, FactRef, FromValue, MethodReturn};
pub use knowledge::{CloneTable, InstanceId, KnowledgeBase, KnowledgeLibrary, RuleEntry};
pub use memory::RuleContext;
pub use value::{Coercion, MapKey, Number, NumericKind, Value};
