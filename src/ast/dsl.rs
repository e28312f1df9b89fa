//! Fluent front end over the acceptor protocol.
//!
//! ```
//! use salience::{Action, Expr, KnowledgeBase, RuleDef};
//!
//! let mut kb = KnowledgeBase::new("Pricing", "1.0.0");
//! kb.add_rule(
//!     &RuleDef::new("Discount")
//!         .describe("ten percent off large orders")
//!         .salience(10)
//!         .when(Expr::var("Order").field("Total").gt(100))
//!         .then(Action::update(
//!             Expr::var("Order").field("Total"),
//!             salience::AssignOp::Mul,
//!             0.9,
//!         )),
//! )
//! .unwrap();
//! assert!(kb.contains_rule("Discount"));
//! ```

use crate::access::{PathSegment, VariablePath};
use crate::error::{AccessError, BuildError};
use crate::value::MapKey;

use super::{AssignOp, AstBuilder, BinaryOp, Literal};

/// An owned expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Literal),
    Variable(String),
    Field(Box<Expr>, String),
    Selector(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Method(Box<Expr>, String, Vec<Expr>),
    Negation(Box<Expr>),
    Group(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

macro_rules! binary_helpers {
    ($($(#[$doc:meta])* $name:ident => $op:ident),+ $(,)?) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub fn $name(self, rhs: impl Into<Expr>) -> Self {
                self.binary(BinaryOp::$op, rhs)
            }
        )+
    };
}

impl Expr {
    /// A root binding.
    pub fn var(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    pub fn lit(literal: impl Into<Literal>) -> Self {
        Self::Constant(literal.into())
    }

    #[must_use]
    pub const fn nil() -> Self {
        Self::Constant(Literal::Nil)
    }

    /// Builds a variable chain from text such as `Order.Lines[0].Price`.
    pub fn path(text: &str) -> Result<Self, AccessError> {
        let path = VariablePath::parse(text)?;
        let mut expr = Self::var(path.root_name());
        for segment in path.segments() {
            expr = match segment {
                PathSegment::Field(name) => expr.field(name.clone()),
                PathSegment::Index(i) => expr.index(Literal::Int(*i)),
                PathSegment::Key(MapKey::String(s)) => expr.index(s.as_str()),
                PathSegment::Key(MapKey::Bool(b)) => expr.index(*b),
                PathSegment::Key(MapKey::Int(i)) => expr.index(Literal::Int(*i)),
                PathSegment::Key(MapKey::UInt(_)) | PathSegment::Any => {
                    return Err(AccessError::InvalidPath {
                        path: text.to_string(),
                        reason: "selector cannot be written as a literal".to_string(),
                    })
                }
            };
        }
        Ok(expr)
    }

    /// A call to a built-in function.
    pub fn call(name: impl Into<String>, args: impl IntoIterator<Item = Self>) -> Self {
        Self::Call(name.into(), args.into_iter().collect())
    }

    #[must_use]
    pub fn field(self, name: impl Into<String>) -> Self {
        Self::Field(Box::new(self), name.into())
    }

    #[must_use]
    pub fn index(self, selector: impl Into<Self>) -> Self {
        Self::Selector(Box::new(self), Box::new(selector.into()))
    }

    #[must_use]
    pub fn method(self, name: impl Into<String>, args: impl IntoIterator<Item = Self>) -> Self {
        Self::Method(Box::new(self), name.into(), args.into_iter().collect())
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Negation(Box::new(self))
    }

    #[must_use]
    pub fn group(self) -> Self {
        Self::Group(Box::new(self))
    }

    #[must_use]
    pub fn binary(self, op: BinaryOp, rhs: impl Into<Self>) -> Self {
        Self::Binary(op, Box::new(self), Box::new(rhs.into()))
    }

    binary_helpers! {
        eq => Eq,
        ne => Ne,
        lt => Lt,
        le => Le,
        gt => Gt,
        ge => Ge,
        /// `&&`
        and => And,
        /// `||`
        or => Or,
        plus => Add,
        minus => Sub,
        times => Mul,
        divided_by => Div,
        modulo => Rem,
        bit_and => BitAnd,
        bit_or => BitOr,
    }

    pub(crate) fn emit(&self, b: &mut AstBuilder<'_>) -> Result<(), BuildError> {
        match self {
            Self::Constant(literal) => b.accept_constant(literal.clone()).map(drop),
            Self::Variable(name) => b.accept_variable(name.clone()).map(drop),
            Self::Field(parent, name) => {
                b.begin_field(name.clone())?;
                parent.emit(b)?;
                b.end().map(drop)
            }
            Self::Selector(parent, selector) => {
                b.begin_selector()?;
                parent.emit(b)?;
                selector.emit(b)?;
                b.end().map(drop)
            }
            Self::Call(name, args) => {
                b.begin_function_call(name.clone())?;
                for arg in args {
                    arg.emit(b)?;
                }
                b.end().map(drop)
            }
            Self::Method(receiver, name, args) => {
                b.begin_method_call(name.clone())?;
                receiver.emit(b)?;
                for arg in args {
                    arg.emit(b)?;
                }
                b.end().map(drop)
            }
            Self::Negation(inner) => {
                b.begin_negation()?;
                inner.emit(b)?;
                b.end().map(drop)
            }
            Self::Group(inner) => {
                b.begin_group()?;
                inner.emit(b)?;
                b.end().map(drop)
            }
            Self::Binary(op, left, right) => {
                b.begin_expression(*op)?;
                left.emit(b)?;
                right.emit(b)?;
                b.end().map(drop)
            }
        }
    }
}

macro_rules! expr_from_literal {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Expr {
                fn from(v: $t) -> Self {
                    Self::Constant(Literal::from(v))
                }
            }
        )+
    };
}

expr_from_literal!(bool, i32, i64, f64, &str, String);

impl From<Literal> for Expr {
    fn from(literal: Literal) -> Self {
        Self::Constant(literal)
    }
}

/// One entry of a `then` list.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Assign {
        target: Expr,
        op: AssignOp,
        value: Expr,
    },
    /// A call evaluated for its side effects.
    Eval(Expr),
}

impl Action {
    /// `target = value`
    pub fn set(target: Expr, value: impl Into<Expr>) -> Self {
        Self::update(target, AssignOp::Set, value)
    }

    /// `target op= value`
    pub fn update(target: Expr, op: AssignOp, value: impl Into<Expr>) -> Self {
        Self::Assign {
            target,
            op,
            value: value.into(),
        }
    }

    /// Calls a built-in function.
    pub fn call(name: impl Into<String>, args: impl IntoIterator<Item = Expr>) -> Self {
        Self::Eval(Expr::call(name, args))
    }

    /// Evaluates any expression, typically a method call.
    #[must_use]
    pub const fn eval(expr: Expr) -> Self {
        Self::Eval(expr)
    }

    fn emit(&self, b: &mut AstBuilder<'_>) -> Result<(), BuildError> {
        match self {
            Self::Assign { target, op, value } => {
                b.begin_assignment(*op)?;
                target.emit(b)?;
                value.emit(b)?;
                b.end().map(drop)
            }
            Self::Eval(expr) => expr.emit(b),
        }
    }
}

/// A complete rule ready to be added to a knowledge base.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDef {
    pub name: String,
    pub description: String,
    pub salience: i64,
    pub when: Expr,
    pub then: Vec<Action>,
}

impl RuleDef {
    /// A rule that never matches until a condition is set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            salience: 0,
            when: Expr::lit(false),
            then: Vec::new(),
        }
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub const fn salience(mut self, salience: i64) -> Self {
        self.salience = salience;
        self
    }

    #[must_use]
    pub fn when(mut self, condition: Expr) -> Self {
        self.when = condition;
        self
    }

    /// Appends an action.
    #[must_use]
    pub fn then(mut self, action: Action) -> Self {
        self.then.push(action);
        self
    }

    pub(crate) fn emit(&self, b: &mut AstBuilder<'_>) -> Result<usize, BuildError> {
        b.begin_rule(self.name.clone(), self.description.clone())?;
        b.accept_salience(self.salience)?;
        b.begin_when()?;
        self.when.emit(b)?;
        b.begin_then()?;
        for action in &self.then {
            action.emit(b)?;
        }
        b.end_rule()
    }
}
