//! The boolean condition language that gates merge rules.
//!
//! ```text
//! expr    := orTerm ( " or " orTerm )*
//! orTerm  := atom   ( " and " atom  )*
//! atom    := "not(" expr ")" | "(" expr ")" | path "=" literal | path
//! literal := '...' | "..."
//! ```
//!
//! The whole condition may be wrapped in `boolean( ... )`. Splitting on the
//! ` or ` / ` and ` delimiters ignores occurrences inside string literals,
//! parentheses and predicate brackets.

use crate::document::XmlDocument;
use crate::error::MergeError;
use crate::path::PathExpr;
use crate::scan::{parse_literal, split_top_level, strip_call};

/// A parsed condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Blank condition text; the rule always fires.
    Always,
    /// True when the path selects at least one node.
    Exists(PathExpr),
    /// True when some selected node's trimmed text equals `literal`.
    Equals { path: PathExpr, literal: String },
    Not(Box<Condition>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    /// Parses condition text. Malformed input is a [`MergeError::Expression`].
    pub fn parse(text: &str) -> Result<Self, MergeError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Condition::Always);
        }

        let body = strip_call(trimmed, "boolean").map_or(trimmed, str::trim);
        parse_expr(body).map_err(|reason| {
            MergeError::Expression(format!("{reason} in condition `{trimmed}`"))
        })
    }

    pub fn evaluate(&self, doc: &XmlDocument) -> bool {
        match self {
            Condition::Always => true,
            Condition::Exists(path) => !path.select(doc).is_empty(),
            Condition::Equals { path, literal } => path
                .select(doc)
                .into_iter()
                .any(|node| doc.text_content(node).trim() == literal),
            Condition::Not(inner) => !inner.evaluate(doc),
            Condition::And(terms) => terms.iter().all(|term| term.evaluate(doc)),
            Condition::Or(terms) => terms.iter().any(|term| term.evaluate(doc)),
        }
    }
}

/// Parses and evaluates `text` against `doc` in one step.
pub fn evaluate(doc: &XmlDocument, text: &str) -> Result<bool, MergeError> {
    Ok(Condition::parse(text)?.evaluate(doc))
}

fn parse_expr(text: &str) -> Result<Condition, String> {
    let terms = split_top_level(text, " or ")?
        .into_iter()
        .map(parse_conjunction)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(collapse(terms, Condition::Or))
}

fn parse_conjunction(text: &str) -> Result<Condition, String> {
    let atoms = split_top_level(text, " and ")?
        .into_iter()
        .map(parse_atom)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(collapse(atoms, Condition::And))
}

fn collapse(mut items: Vec<Condition>, combine: fn(Vec<Condition>) -> Condition) -> Condition {
    if items.len() == 1 {
        items.remove(0)
    } else {
        combine(items)
    }
}

fn parse_atom(text: &str) -> Result<Condition, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("missing operand".to_string());
    }

    if let Some(inner) = strip_call(text, "not") {
        return nested(inner).map(|inner| Condition::Not(Box::new(inner)));
    }
    if let Some(inner) = strip_call(text, "") {
        return nested(inner);
    }

    match split_top_level(text, "=")?.as_slice() {
        [path] => Ok(Condition::Exists(parse_path(path)?)),
        [path, literal] => {
            let literal = parse_literal(literal).ok_or_else(|| {
                format!("expected a quoted literal, found `{}`", literal.trim())
            })?;
            Ok(Condition::Equals {
                path: parse_path(path)?,
                literal: literal.to_string(),
            })
        }
        _ => Err(format!("unsupported comparison `{text}`")),
    }
}

fn nested(inner: &str) -> Result<Condition, String> {
    if inner.trim().is_empty() {
        return Err("empty parentheses".to_string());
    }
    parse_expr(inner.trim())
}

fn parse_path(text: &str) -> Result<PathExpr, String> {
    PathExpr::parse(text).map_err(|err| match err {
        MergeError::Config(message) => message,
        other => other.to_string(),
    })
}
