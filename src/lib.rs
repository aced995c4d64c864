//! Core library for xml-merge: a rule-driven engine that copies, replaces,
//! updates and deletes subtrees of a target XML document using content from
//! a source document.
//!
//! A merge takes three inputs: a table of [`MergeRule`]s, a source document
//! whose relevant content lives under one named element (by default
//! [`DEFAULT_SOURCE_ROOT`]), and the target document to mutate. Rules run in
//! table order; the first error aborts the run and leaves the target as it
//! was.
//!
//! ```
//! let target = "<Root><Status>Old</Status></Root>";
//! let source = "<Envelope><TemplateFieldData><Status>New</Status></TemplateFieldData></Envelope>";
//! let rules = "<Rows><Row><Action>SetValue</Action>\
//!              <SourceNode>//Status</SourceNode><TargetNode>//Status</TargetNode></Row></Rows>";
//!
//! let merged = xml_merge::merge_documents(target, source, rules, None).unwrap();
//! assert_eq!(merged, "<Root><Status>New</Status></Root>");
//! ```

pub mod condition;
pub mod document;
pub mod error;
pub mod merge;
pub mod path;
pub mod rules;
mod scan;
pub mod selector;

pub use crate::condition::Condition;
pub use crate::document::XmlDocument;
pub use crate::error::MergeError;
pub use crate::merge::MergeOutcome;
pub use crate::path::PathExpr;
pub use crate::rules::{load_rules, MergeAction, MergeRule, RuleTableFormat};
pub use crate::selector::Selection;

use std::str::FromStr;

/// Name of the element the merge-relevant source content is read from when
/// no other root is given.
pub const DEFAULT_SOURCE_ROOT: &str = "TemplateFieldData";

/// Merges three XML texts and returns the rendered target.
///
/// The source is narrowed to the first element named `source_root` (or
/// [`DEFAULT_SOURCE_ROOT`]); the rules are read from the `Row` elements of
/// `rules_xml`.
pub fn merge_documents(
    target_xml: &str,
    source_xml: &str,
    rules_xml: &str,
    source_root: Option<&str>,
) -> Result<String, MergeError> {
    let rules = load_rules(rules_xml, RuleTableFormat::Xml)?;
    let source = XmlDocument::from_str(source_xml)?
        .extract_subtree(source_root.unwrap_or(DEFAULT_SOURCE_ROOT))?;
    let mut target = XmlDocument::from_str(target_xml)?;

    target.apply_rules(&source, &rules)?;
    Ok(target.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_documents_requires_source_root() {
        let err = merge_documents(
            "<Root />",
            "<Other />",
            "<Rows />",
            None,
        )
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Source document does not contain //TemplateFieldData."
        );
    }

    #[test]
    fn merge_documents_honours_custom_source_root() {
        let merged = merge_documents(
            "<Root />",
            "<Data><Payload><Item>1</Item></Payload></Data>",
            "<Rows><Row><Action>Add</Action><SourceNode>//Item</SourceNode>\
             <TargetNode>/Root</TargetNode></Row></Rows>",
            Some("Payload"),
        )
        .unwrap();

        assert_eq!(merged, "<Root><Item>1</Item></Root>");
    }

    #[test]
    fn empty_rule_table_returns_target_unchanged() {
        let target = "<?xml version=\"1.0\"?>\n<Root>\n  <A>1</A>\n</Root>\n";
        let merged = merge_documents(
            target,
            "<TemplateFieldData />",
            "<Rows></Rows>",
            None,
        )
        .unwrap();

        assert_eq!(merged, target);
    }
}
