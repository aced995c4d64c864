//! Node selection with explicit cardinality contracts.

use crate::document::XmlDocument;
use crate::error::MergeError;
use crate::path::PathExpr;
use indextree::NodeId;

/// Outcome of matching a path against a document, before a call site's
/// skip-or-fail policy is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Found(NodeId),
    Absent,
    /// The path matched this many nodes (always at least two).
    Ambiguous(usize),
}

/// Finds all nodes matching `path`.
///
/// `label` names the rule field the path came from and is only used in
/// error messages. A blank path is a [`MergeError::Config`].
pub fn select_all(doc: &XmlDocument, label: &str, path: &str) -> Result<Vec<NodeId>, MergeError> {
    if path.trim().is_empty() {
        return Err(MergeError::Config(format!("{label} path is blank.")));
    }
    let expr = PathExpr::parse(path)
        .map_err(|err| MergeError::Config(format!("{label}: {}", strip_kind(err))))?;
    Ok(expr.select(doc))
}

/// Matches `path` and classifies the result by match count.
pub fn classify(doc: &XmlDocument, label: &str, path: &str) -> Result<Selection, MergeError> {
    let matches = select_all(doc, label, path)?;
    Ok(match matches.as_slice() {
        [] => Selection::Absent,
        [single] => Selection::Found(*single),
        many => Selection::Ambiguous(many.len()),
    })
}

/// Selects exactly one node.
///
/// No match yields `Ok(None)` when `skip_if_missing` is set and a
/// [`MergeError::Cardinality`] otherwise; more than one match is always a
/// [`MergeError::Cardinality`].
pub fn select_exactly_one(
    doc: &XmlDocument,
    label: &str,
    path: &str,
    skip_if_missing: bool,
) -> Result<Option<NodeId>, MergeError> {
    match classify(doc, label, path)? {
        Selection::Found(node) => Ok(Some(node)),
        Selection::Absent if skip_if_missing => Ok(None),
        Selection::Absent => Err(MergeError::Cardinality(format!(
            "{label} path matched 0 nodes: {}",
            path.trim()
        ))),
        Selection::Ambiguous(count) => Err(MergeError::Cardinality(format!(
            "{label} path matched {count} nodes (must be exactly 1): {}",
            path.trim()
        ))),
    }
}

/// Selects exactly one node, treating a missing node as an error.
pub fn require_exactly_one(
    doc: &XmlDocument,
    label: &str,
    path: &str,
) -> Result<NodeId, MergeError> {
    select_exactly_one(doc, label, path, false)?.ok_or_else(|| {
        MergeError::Cardinality(format!("{label} path matched 0 nodes: {}", path.trim()))
    })
}

/// Selects zero or one node; more than one match is a
/// [`MergeError::Cardinality`].
pub fn select_at_most_one(
    doc: &XmlDocument,
    label: &str,
    path: &str,
) -> Result<Option<NodeId>, MergeError> {
    match classify(doc, label, path)? {
        Selection::Found(node) => Ok(Some(node)),
        Selection::Absent => Ok(None),
        Selection::Ambiguous(count) => Err(MergeError::Cardinality(format!(
            "{label} path matched {count} nodes (must be 0 or 1): {}",
            path.trim()
        ))),
    }
}

fn strip_kind(err: MergeError) -> String {
    match err {
        MergeError::Config(message) => message,
        other => other.to_string(),
    }
}
