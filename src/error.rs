//! Defines custom error types for the merge engine.

use thiserror::Error;

#[derive(Error, Debug)]
/// Error type returned when loading documents or applying merge rules fails.
///
/// Every variant is fatal: the executor never retries and never commits a
/// partially merged tree.
pub enum MergeError {
    /// A blank or malformed path expression, a blank action, or a rule that
    /// is missing a field its action requires.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A path matched more nodes than its call site allows, or none where
    /// one was required.
    #[error("Cardinality error: {0}")]
    Cardinality(String),

    /// A node lacks the parent an operation needs, or an insertion anchor is
    /// not a child of the stated parent.
    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Unsupported merge Action: {0}")]
    UnsupportedAction(String),

    /// The condition text does not parse under the supported grammar.
    #[error("Invalid condition: {0}")]
    Expression(String),

    #[error("Source document does not contain //{0}.")]
    MissingSourceRoot(String),

    #[error("Failed to parse XML: {0}")]
    XmlParse(String),

    #[error("Failed to parse rule table: {0}")]
    RuleTableParse(String),

    #[error("Rule {index} (Action '{action}') failed: {source}")]
    RuleFailed {
        /// 1-based position of the rule in its table.
        index: usize,
        action: String,
        #[source]
        source: Box<MergeError>,
    },
}

impl MergeError {
    /// Returns the underlying error kind, looking through rule context.
    pub fn root_cause(&self) -> &MergeError {
        match self {
            MergeError::RuleFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Attaches the failing rule's position and action name.
    pub(crate) fn in_rule(self, index: usize, action: &str) -> Self {
        MergeError::RuleFailed {
            index,
            action: action.to_string(),
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_rule_context() {
        let err = MergeError::Cardinality("ambiguous".to_string()).in_rule(3, "Delete");

        assert!(matches!(err.root_cause(), MergeError::Cardinality(_)));
        assert_eq!(
            err.to_string(),
            "Rule 3 (Action 'Delete') failed: Cardinality error: ambiguous"
        );
    }

    #[test]
    fn root_cause_of_plain_error_is_itself() {
        let err = MergeError::Expression("bad".to_string());
        assert!(matches!(err.root_cause(), MergeError::Expression(_)));
    }
}
