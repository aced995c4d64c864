//! Merge rule records and the table encodings they are loaded from.

use crate::condition::Condition;
use crate::document::XmlDocument;
use crate::error::MergeError;
use crate::path::PathExpr;
use crate::selector::select_all;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Default)]
#[serde(rename_all = "PascalCase", default)]
/// One row of the merge rule table.
///
/// Every field is a trimmed string that defaults to empty. Nothing is
/// validated at load time; the executor checks what each action needs when
/// the rule runs.
pub struct MergeRule {
    /// Condition evaluated against the current target; blank means always.
    pub condition: String,
    /// One of `Add`, `UpsertTree`, `ReplaceTree`, `SetValue`, `Delete`
    /// (case-insensitive), or the aliases `UpdateTree` and `Update`.
    pub action: String,
    /// Path into the source document.
    pub source_node: String,
    /// Path into the target document.
    pub target_node: String,
    /// Parent to insert under when `UpsertTree` finds no target.
    pub target_parent: String,
    /// Optional sibling to insert before when `UpsertTree` inserts.
    pub insert_before: String,
}

impl MergeRule {
    fn trimmed(self) -> Self {
        Self {
            condition: self.condition.trim().to_string(),
            action: self.action.trim().to_string(),
            source_node: self.source_node.trim().to_string(),
            target_node: self.target_node.trim().to_string(),
            target_parent: self.target_parent.trim().to_string(),
            insert_before: self.insert_before.trim().to_string(),
        }
    }

    /// Resolves the action name, applying the fixed alias table.
    pub fn action(&self) -> Result<MergeAction, MergeError> {
        self.action.parse()
    }

    /// The path `Delete` removes: `TargetNode` if set, else `SourceNode`.
    pub fn delete_path(&self) -> &str {
        if self.target_node.is_empty() {
            &self.source_node
        } else {
            &self.target_node
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
/// The fixed set of tree mutations a rule can perform.
pub enum MergeAction {
    /// Append a copy of the source node under the target parent.
    Add,
    /// Replace the target if present, otherwise insert under `TargetParent`.
    UpsertTree,
    /// Replace an existing target with a copy of the source node.
    ReplaceTree,
    /// Copy the source node's text onto the target node.
    SetValue,
    /// Remove a node from the target.
    Delete,
}

impl FromStr for MergeAction {
    type Err = MergeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(MergeError::Config("Merge rule Action is blank.".to_string()));
        }

        let is = |candidate: &str| name.eq_ignore_ascii_case(candidate);
        if is("Add") {
            Ok(MergeAction::Add)
        } else if is("UpsertTree") {
            Ok(MergeAction::UpsertTree)
        } else if is("ReplaceTree") || is("UpdateTree") || is("Update") {
            Ok(MergeAction::ReplaceTree)
        } else if is("SetValue") {
            Ok(MergeAction::SetValue)
        } else if is("Delete") {
            Ok(MergeAction::Delete)
        } else {
            Err(MergeError::UnsupportedAction(raw.to_string()))
        }
    }
}

impl fmt::Display for MergeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeAction::Add => "Add",
            MergeAction::UpsertTree => "UpsertTree",
            MergeAction::ReplaceTree => "ReplaceTree",
            MergeAction::SetValue => "SetValue",
            MergeAction::Delete => "Delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Serialization of a rule table.
pub enum RuleTableFormat {
    /// `Row` elements with one child element per field.
    Xml,
    /// An array of objects keyed by field name.
    Json,
    Yaml,
    /// `[[Row]]` tables.
    Toml,
}

impl RuleTableFormat {
    /// Guesses the format from a file extension, defaulting to XML.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => RuleTableFormat::Json,
            Some("yaml") | Some("yml") => RuleTableFormat::Yaml,
            Some("toml") => RuleTableFormat::Toml,
            _ => RuleTableFormat::Xml,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct TomlRuleTable {
    #[serde(default, rename = "Row")]
    rows: Vec<MergeRule>,
}

/// Loads a rule table, preserving row order.
pub fn load_rules(content: &str, format: RuleTableFormat) -> Result<Vec<MergeRule>, MergeError> {
    let rules: Vec<MergeRule> = match format {
        RuleTableFormat::Xml => {
            let table = XmlDocument::from_str(content)?;
            return rules_from_document(&table);
        }
        RuleTableFormat::Json => serde_json::from_str(content)
            .map_err(|err| MergeError::RuleTableParse(err.to_string()))?,
        RuleTableFormat::Yaml => serde_yaml::from_str(content)
            .map_err(|err| MergeError::RuleTableParse(err.to_string()))?,
        RuleTableFormat::Toml => {
            let table: TomlRuleTable = toml::from_str(content)
                .map_err(|err| MergeError::RuleTableParse(err.to_string()))?;
            table.rows
        }
    };

    Ok(rules.into_iter().map(MergeRule::trimmed).collect())
}

/// Reads every `//Row` element of an XML rule table.
///
/// A field's value is the trimmed text of the row's first child element
/// with the field's name; missing fields are empty.
pub fn rules_from_document(table: &XmlDocument) -> Result<Vec<MergeRule>, MergeError> {
    let rows = select_all(table, "Rule table", "//Row")?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let field = |name: &str| {
                table
                    .children(row)
                    .find(|child| table.element(*child).is_some_and(|el| el.name == name))
                    .map(|child| table.text_content(child).trim().to_string())
                    .unwrap_or_default()
            };
            MergeRule {
                condition: field("Condition"),
                action: field("Action"),
                source_node: field("SourceNode"),
                target_node: field("TargetNode"),
                target_parent: field("TargetParent"),
                insert_before: field("InsertBefore"),
            }
        })
        .collect())
}

/// Checks every rule statically without touching any document.
///
/// Parses conditions and paths and verifies that each action has the
/// fields it always needs. The first problem is returned with its 1-based
/// rule index.
pub fn validate_rules(rules: &[MergeRule]) -> Result<(), MergeError> {
    for (position, rule) in rules.iter().enumerate() {
        validate_rule(rule).map_err(|err| err.in_rule(position + 1, &rule.action))?;
    }
    Ok(())
}

fn validate_rule(rule: &MergeRule) -> Result<(), MergeError> {
    Condition::parse(&rule.condition)?;
    let action = rule.action()?;

    let required = match action {
        MergeAction::Delete => vec![("Delete", rule.delete_path())],
        _ => vec![
            ("SourceNode", rule.source_node.as_str()),
            ("TargetNode", rule.target_node.as_str()),
        ],
    };
    for (label, path) in required {
        if path.is_empty() {
            return Err(MergeError::Config(format!("{label} path is blank.")));
        }
    }

    for (label, path) in [
        ("SourceNode", &rule.source_node),
        ("TargetNode", &rule.target_node),
        ("TargetParent", &rule.target_parent),
        ("InsertBefore", &rule.insert_before),
    ] {
        if !path.is_empty() {
            PathExpr::parse(path).map_err(|err| match err {
                MergeError::Config(message) => MergeError::Config(format!("{label}: {message}")),
                other => other,
            })?;
        }
    }

    Ok(())
}
