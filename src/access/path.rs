//! Variable paths such as `Order.Lines[0]["sku"].Price`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AccessError;
use crate::value::MapKey;

/// One navigation step below a root binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "step", content = "at", rename_all = "snake_case")]
pub enum PathSegment {
    /// `.Name`
    Field(String),
    /// `[3]`
    Index(i64),
    /// `["key"]`, `[true]`
    Key(MapKey),
    /// A selector only known at evaluation time (`[Other.Value]`).
    Any,
}

impl PathSegment {
    /// Returns true when both steps may address the same element.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Field(a), Self::Field(b)) => a == b,
            (Self::Field(a), Self::Key(MapKey::String(b)))
            | (Self::Key(MapKey::String(b)), Self::Field(a)) => a == b,
            (Self::Index(a), Self::Index(b)) => a == b,
            (Self::Index(a), Self::Key(MapKey::Int(b))) | (Self::Key(MapKey::Int(b)), Self::Index(a)) => a == b,
            (Self::Key(a), Self::Key(b)) => a == b,
            _ => false,
        }
    }
}

/// A root binding name followed by navigation steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariablePath {
    root: String,
    segments: Vec<PathSegment>,
}

impl VariablePath {
    /// A path naming a root binding.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            root: name.into(),
            segments: Vec::new(),
        }
    }

    /// Extends the path with one step.
    #[must_use]
    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self {
            root: self.root.clone(),
            segments,
        }
    }

    #[must_use]
    pub fn root_name(&self) -> &str {
        &self.root
    }

    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Returns true when a write to one path can change what the other reads.
    ///
    /// That is the case when one path is a prefix of the other, with `Any`
    /// steps matching every concrete step.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.root == other.root
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.overlaps(b))
    }

    /// Parses the textual form used by `DataContext::get` and `Changed`.
    pub fn parse(text: &str) -> Result<Self, AccessError> {
        PathParser::new(text).parse()
    }
}

impl fmt::Display for VariablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for segment in &self.segments {
            match segment {
                PathSegment::Field(name) => write!(f, ".{name}")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
                PathSegment::Key(key) => write!(f, "[{key}]")?,
                PathSegment::Any => f.write_str("[*]")?,
            }
        }
        Ok(())
    }
}

struct PathParser<'a> {
    text: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> PathParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            chars: text.char_indices().peekable(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> AccessError {
        AccessError::InvalidPath {
            path: self.text.to_string(),
            reason: reason.into(),
        }
    }

    fn parse(mut self) -> Result<VariablePath, AccessError> {
        let mut path = VariablePath::root(self.identifier()?);
        while let Some((_, c)) = self.chars.next() {
            let segment = match c {
                '.' => PathSegment::Field(self.identifier()?),
                '[' => {
                    let segment = self.selector()?;
                    match self.chars.next() {
                        Some((_, ']')) => segment,
                        _ => return Err(self.error("expected ']'")),
                    }
                }
                other => return Err(self.error(format!("unexpected '{other}'"))),
            };
            path.segments.push(segment);
        }
        Ok(path)
    }

    fn identifier(&mut self) -> Result<String, AccessError> {
        let mut ident = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            let valid = if ident.is_empty() {
                c.is_alphabetic() || c == '_'
            } else {
                c.is_alphanumeric() || c == '_'
            };
            if !valid {
                break;
            }
            ident.push(c);
            self.chars.next();
        }
        if ident.is_empty() {
            return Err(self.error("expected an identifier"));
        }
        Ok(ident)
    }

    fn selector(&mut self) -> Result<PathSegment, AccessError> {
        match self.chars.peek().map(|&(_, c)| c) {
            Some(quote @ ('"' | '\'')) => {
                self.chars.next();
                let mut key = String::new();
                loop {
                    match self.chars.next() {
                        Some((_, c)) if c == quote => break,
                        Some((_, '\\')) => match self.chars.next() {
                            Some((_, c)) => key.push(c),
                            None => return Err(self.error("unterminated escape")),
                        },
                        Some((_, c)) => key.push(c),
                        None => return Err(self.error("unterminated string key")),
                    }
                }
                Ok(PathSegment::Key(MapKey::String(key)))
            }
            Some('*') => {
                self.chars.next();
                Ok(PathSegment::Any)
            }
            Some(_) => {
                let mut raw = String::new();
                while let Some(&(_, c)) = self.chars.peek() {
                    if c == ']' {
                        break;
                    }
                    raw.push(c);
                    self.chars.next();
                }
                let raw = raw.trim();
                match raw {
                    "true" => Ok(PathSegment::Key(MapKey::Bool(true))),
                    "false" => Ok(PathSegment::Key(MapKey::Bool(false))),
                    _ => raw
                        .parse::<i64>()
                        .map(PathSegment::Index)
                        .map_err(|_| self.error(format!("invalid selector '{raw}'"))),
                }
            }
            None => Err(self.error("unterminated selector")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let path = VariablePath::parse(r#"Order.Lines[0]["sku"].Price"#).unwrap();
        assert_eq!(path.root_name(), "Order");
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Field("Lines".to_string()),
                PathSegment::Index(0),
                PathSegment::Key(MapKey::from("sku")),
                PathSegment::Field("Price".to_string()),
            ]
        );
        assert_eq!(path.to_string(), r#"Order.Lines[0]["sku"].Price"#);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(VariablePath::parse("").is_err());
        assert!(VariablePath::parse("a..b").is_err());
        assert!(VariablePath::parse("a[1").is_err());
        assert!(VariablePath::parse("a[x]").is_err());
        assert!(VariablePath::parse("a b").is_err());
    }

    #[test]
    fn test_overlap_is_prefix_based() {
        let count = VariablePath::parse("Vibo.Count").unwrap();
        let vibo = VariablePath::parse("Vibo").unwrap();
        let a = VariablePath::parse("Vibo.A").unwrap();
        assert!(count.overlaps(&vibo));
        assert!(vibo.overlaps(&count));
        assert!(!count.overlaps(&a));
        assert!(!count.overlaps(&VariablePath::parse("Other.Count").unwrap()));
    }

    #[test]
    fn test_any_selector_overlaps_concrete_steps() {
        let dynamic = VariablePath::root("Items").child(PathSegment::Any);
        assert!(dynamic.overlaps(&VariablePath::parse("Items[3]").unwrap()));
        assert!(dynamic.overlaps(&VariablePath::parse("Items['k']").unwrap()));
        let by_key = VariablePath::parse(r#"Json["name"]"#).unwrap();
        assert!(by_key.overlaps(&VariablePath::parse("Json.name").unwrap()));
    }
}
