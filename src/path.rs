//! Parsing and evaluation of the supported XPath subset.
//!
//! Supported forms: absolute (`/A/B`), descendant (`//A`, `/A//B`) and
//! relative (`A/B`) location paths; element-name, `*`, `.` and `..` steps;
//! and the predicates `[n]`, `[last()]`, `[@attr]`, `[@attr='v']`,
//! `[child]`, `[child='v']`, `[.='v']`, `[text()]` and `[text()='v']`. Paths are always evaluated from the
//! document node.

use crate::document::{XmlDocument, XmlNode};
use crate::error::MergeError;
use crate::scan::{closing_index, parse_literal, split_top_level};
use indextree::NodeId;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][\w.\-]*(?::[A-Za-z_][\w.\-]*)?$").expect("name pattern compiles")
});

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    text: String,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    /// Set when the step was introduced by `//`.
    descendant: bool,
    kind: StepKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StepKind {
    SelfNode,
    Parent,
    Element {
        name: NameTest,
        predicates: Vec<Predicate>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    Named(String),
}

impl NameTest {
    fn matches(&self, name: &str) -> bool {
        match self {
            NameTest::Any => true,
            NameTest::Named(expected) => expected == name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Last,
    Attribute { name: String, value: Option<String> },
    Child { name: String, value: Option<String> },
    /// `[.='v']`: the node's own string value.
    SelfValue(String),
    /// `[text()]` / `[text()='v']`: some direct text child.
    Text(Option<String>),
}

impl Predicate {
    fn matches(&self, doc: &XmlDocument, node: NodeId, position: usize, size: usize) -> bool {
        match self {
            Predicate::Position(expected) => position == *expected,
            Predicate::Last => position == size,
            Predicate::Attribute { name, value } => doc
                .element(node)
                .and_then(|element| element.attribute(name))
                .is_some_and(|actual| value.as_deref().map_or(true, |v| actual == v)),
            Predicate::Child { name, value } => doc
                .children(node)
                .filter(|child| doc.element(*child).is_some_and(|el| el.name == *name))
                .any(|child| {
                    value
                        .as_deref()
                        .map_or(true, |v| doc.text_content(child) == v)
                }),
            Predicate::SelfValue(value) => doc.text_content(node) == *value,
            Predicate::Text(value) => doc
                .children(node)
                .filter(|child| {
                    matches!(
                        doc.node(*child),
                        Some(XmlNode::Text(_) | XmlNode::CData(_))
                    )
                })
                .any(|child| {
                    value
                        .as_deref()
                        .map_or(true, |v| doc.text_content(child) == v)
                }),
        }
    }
}

impl PathExpr {
    /// Parses a path expression.
    ///
    /// Blank or malformed text is a [`MergeError::Config`].
    pub fn parse(text: &str) -> Result<Self, MergeError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(MergeError::Config("path expression is blank".to_string()));
        }

        let segments =
            split_top_level(trimmed, "/").map_err(|reason| invalid_path(trimmed, &reason))?;

        let mut steps = Vec::new();
        let mut descendant = false;
        let skip = usize::from(segments.first().is_some_and(|s| s.is_empty()));

        for segment in segments.into_iter().skip(skip) {
            if segment.is_empty() {
                if descendant {
                    return Err(invalid_path(trimmed, "unexpected `///`"));
                }
                descendant = true;
                continue;
            }
            steps.push(parse_step(segment, descendant, trimmed)?);
            descendant = false;
        }

        if descendant || steps.is_empty() {
            return Err(invalid_path(trimmed, "path must end with a step"));
        }

        Ok(Self {
            text: trimmed.to_string(),
            steps,
        })
    }

    /// Returns every node the path selects, in document order and without
    /// duplicates. The document node itself is never part of the result.
    pub fn select(&self, doc: &XmlDocument) -> Vec<NodeId> {
        let mut current = vec![doc.document_node()];

        for step in &self.steps {
            let contexts = if step.descendant {
                in_document_order(doc, current.iter().flat_map(|id| doc.descendants(*id)))
            } else {
                current
            };

            let mut next = Vec::new();
            for context in contexts {
                step.collect(doc, context, &mut next);
            }
            current = in_document_order(doc, next);

            if current.is_empty() {
                break;
            }
        }

        current.retain(|id| *id != doc.document_node());
        current
    }
}

impl Step {
    fn collect(&self, doc: &XmlDocument, context: NodeId, out: &mut Vec<NodeId>) {
        match &self.kind {
            StepKind::SelfNode => out.push(context),
            StepKind::Parent => out.extend(doc.parent(context)),
            StepKind::Element { name, predicates } => {
                let mut candidates: Vec<NodeId> = doc
                    .children(context)
                    .filter(|id| doc.element(*id).is_some_and(|el| name.matches(&el.name)))
                    .collect();

                for predicate in predicates {
                    let size = candidates.len();
                    candidates = candidates
                        .into_iter()
                        .enumerate()
                        .filter(|(index, id)| predicate.matches(doc, *id, index + 1, size))
                        .map(|(_, id)| id)
                        .collect();
                }

                out.extend(candidates);
            }
        }
    }
}

fn in_document_order(doc: &XmlDocument, nodes: impl IntoIterator<Item = NodeId>) -> Vec<NodeId> {
    let wanted: HashSet<NodeId> = nodes.into_iter().collect();
    if wanted.len() <= 1 {
        return wanted.into_iter().collect();
    }
    doc.descendants(doc.document_node())
        .filter(|id| wanted.contains(id))
        .collect()
}

fn parse_step(segment: &str, descendant: bool, path: &str) -> Result<Step, MergeError> {
    let kind = match segment {
        "." => StepKind::SelfNode,
        ".." => StepKind::Parent,
        _ => {
            let (name, rest) = segment.split_at(segment.find('[').unwrap_or(segment.len()));
            let name = if name == "*" {
                NameTest::Any
            } else {
                NameTest::Named(validate_name(name, path)?.to_string())
            };
            StepKind::Element {
                name,
                predicates: parse_predicates(rest, path)?,
            }
        }
    };

    Ok(Step { descendant, kind })
}

fn parse_predicates(mut rest: &str, path: &str) -> Result<Vec<Predicate>, MergeError> {
    let mut predicates = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(predicates);
        }
        let close = closing_index(rest, '[', ']')
            .ok_or_else(|| invalid_path(path, &format!("unexpected `{rest}` after step")))?;
        predicates.push(parse_predicate(&rest[1..close], path)?);
        rest = &rest[close + 1..];
    }
}

fn parse_predicate(inner: &str, path: &str) -> Result<Predicate, MergeError> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Err(invalid_path(path, "empty predicate"));
    }
    if inner.chars().all(|c| c.is_ascii_digit()) {
        return match inner.parse::<usize>() {
            Ok(position) if position > 0 => Ok(Predicate::Position(position)),
            _ => Err(invalid_path(path, &format!("invalid position `{inner}`"))),
        };
    }
    if inner == "last()" {
        return Ok(Predicate::Last);
    }

    let parts = split_top_level(inner, "=").map_err(|reason| invalid_path(path, &reason))?;
    let (lhs, value) = match parts.as_slice() {
        [lhs] => (lhs.trim(), None),
        [lhs, rhs] => {
            let literal = parse_literal(rhs).ok_or_else(|| {
                invalid_path(path, &format!("expected a quoted literal, found `{}`", rhs.trim()))
            })?;
            (lhs.trim(), Some(literal.to_string()))
        }
        _ => return Err(invalid_path(path, &format!("unsupported predicate `{inner}`"))),
    };

    match (lhs, value) {
        (".", Some(value)) => Ok(Predicate::SelfValue(value)),
        (".", None) => Err(invalid_path(path, "`[.]` needs a comparison literal")),
        ("text()", value) => Ok(Predicate::Text(value)),
        (_, value) => predicate_on_name(lhs, value, path),
    }
}

fn predicate_on_name(lhs: &str, value: Option<String>, path: &str) -> Result<Predicate, MergeError> {
    if let Some(attribute) = lhs.strip_prefix('@') {
        Ok(Predicate::Attribute {
            name: validate_name(attribute.trim(), path)?.to_string(),
            value,
        })
    } else {
        Ok(Predicate::Child {
            name: validate_name(lhs, path)?.to_string(),
            value,
        })
    }
}

fn validate_name<'a>(name: &'a str, path: &str) -> Result<&'a str, MergeError> {
    if NAME_PATTERN.is_match(name) {
        Ok(name)
    } else {
        Err(invalid_path(
            path,
            &format!("`{name}` is not a supported name test"),
        ))
    }
}

fn invalid_path(path: &str, reason: &str) -> MergeError {
    MergeError::Config(format!("invalid path `{path}`: {reason}"))
}

impl FromStr for PathExpr {
    type Err = MergeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
