//! The merge executor: applies a rule table to a target document.

use crate::condition::Condition;
use crate::document::XmlDocument;
use crate::error::MergeError;
use crate::rules::{MergeAction, MergeRule};
use crate::selector::{require_exactly_one, select_at_most_one, select_exactly_one};
use indextree::NodeId;

/// Per-run counts reported by [`XmlDocument::apply_rules`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Rules that mutated the target (or deliberately left it as is, like
    /// deleting an already detached node).
    pub applied: usize,
    /// Rules whose condition evaluated to false.
    pub skipped_by_condition: usize,
    /// Rules skipped because the source node or an optional target was absent.
    pub skipped_missing: usize,
}

enum RuleEffect {
    Applied,
    SkippedByCondition,
    SkippedMissing,
}

impl XmlDocument {
    /// Applies `rules` in order, reading copied content from `source`.
    ///
    /// All rules run against a working copy of this document. If every rule
    /// succeeds the working copy replaces `self`; on the first error `self`
    /// is left untouched and the error is returned wrapped in
    /// [`MergeError::RuleFailed`].
    pub fn apply_rules(
        &mut self,
        source: &XmlDocument,
        rules: &[MergeRule],
    ) -> Result<MergeOutcome, MergeError> {
        let mut working = self.clone();
        let mut outcome = MergeOutcome::default();

        for (position, rule) in rules.iter().enumerate() {
            let index = position + 1;
            let effect = apply_rule(&mut working, source, rule, index)
                .map_err(|err| err.in_rule(index, &rule.action))?;

            match effect {
                RuleEffect::Applied => outcome.applied += 1,
                RuleEffect::SkippedByCondition => {
                    log::debug!(
                        "Rule {index} ({}) skipped: condition `{}` is false",
                        rule.action,
                        rule.condition
                    );
                    outcome.skipped_by_condition += 1;
                }
                RuleEffect::SkippedMissing => {
                    log::debug!("Rule {index} ({}) skipped: node not found", rule.action);
                    outcome.skipped_missing += 1;
                }
            }
        }

        *self = working;
        log::info!(
            "Merged {} rule(s): {} applied, {} skipped by condition, {} skipped for missing nodes",
            rules.len(),
            outcome.applied,
            outcome.skipped_by_condition,
            outcome.skipped_missing
        );
        Ok(outcome)
    }
}

fn apply_rule(
    target: &mut XmlDocument,
    source: &XmlDocument,
    rule: &MergeRule,
    index: usize,
) -> Result<RuleEffect, MergeError> {
    if !Condition::parse(&rule.condition)?.evaluate(target) {
        return Ok(RuleEffect::SkippedByCondition);
    }

    let action = rule.action()?;
    let effect = match action {
        MergeAction::Add => apply_add(target, source, rule),
        MergeAction::UpsertTree => apply_upsert(target, source, rule),
        MergeAction::ReplaceTree => apply_replace(target, source, rule),
        MergeAction::SetValue => apply_set_value(target, source, rule),
        MergeAction::Delete => apply_delete(target, rule),
    }?;

    if let RuleEffect::Applied = effect {
        log::debug!("Rule {index} ({action}) applied");
    }
    Ok(effect)
}

fn source_node(source: &XmlDocument, rule: &MergeRule) -> Result<Option<NodeId>, MergeError> {
    select_exactly_one(source, "SourceNode", &rule.source_node, true)
}

fn apply_add(
    target: &mut XmlDocument,
    source: &XmlDocument,
    rule: &MergeRule,
) -> Result<RuleEffect, MergeError> {
    let Some(source_node) = source_node(source, rule)? else {
        return Ok(RuleEffect::SkippedMissing);
    };
    let parent = require_exactly_one(target, "TargetNode", &rule.target_node)?;

    let copy = target.import_node(source, source_node, true);
    target.append_child(parent, copy)?;
    Ok(RuleEffect::Applied)
}

fn apply_upsert(
    target: &mut XmlDocument,
    source: &XmlDocument,
    rule: &MergeRule,
) -> Result<RuleEffect, MergeError> {
    let Some(source_node) = source_node(source, rule)? else {
        return Ok(RuleEffect::SkippedMissing);
    };

    if let Some(existing) = select_at_most_one(target, "TargetNode", &rule.target_node)? {
        let parent = target.parent(existing).ok_or_else(|| {
            MergeError::Structural(
                "TargetNode has no parent; cannot UpsertTree replace.".to_string(),
            )
        })?;
        let copy = target.import_node(source, source_node, true);
        target.replace_child(parent, copy, existing)?;
        return Ok(RuleEffect::Applied);
    }

    if rule.target_parent.is_empty() {
        return Err(MergeError::Config(
            "UpsertTree insert requires TargetParent when TargetNode does not exist.".to_string(),
        ));
    }
    let parent = require_exactly_one(target, "TargetParent", &rule.target_parent)?;

    if rule.insert_before.is_empty() {
        let copy = target.import_node(source, source_node, true);
        target.append_child(parent, copy)?;
        return Ok(RuleEffect::Applied);
    }

    let anchor = require_exactly_one(target, "InsertBefore", &rule.insert_before)?;
    if target.parent(anchor) != Some(parent) {
        return Err(MergeError::Structural(
            "InsertBefore node is not a child of TargetParent.".to_string(),
        ));
    }
    let copy = target.import_node(source, source_node, true);
    target.insert_before(parent, copy, anchor)?;
    Ok(RuleEffect::Applied)
}

fn apply_replace(
    target: &mut XmlDocument,
    source: &XmlDocument,
    rule: &MergeRule,
) -> Result<RuleEffect, MergeError> {
    let Some(source_node) = source_node(source, rule)? else {
        return Ok(RuleEffect::SkippedMissing);
    };
    let Some(existing) = select_exactly_one(target, "TargetNode", &rule.target_node, true)? else {
        return Ok(RuleEffect::SkippedMissing);
    };

    let parent = target.parent(existing).ok_or_else(|| {
        MergeError::Structural("TargetNode has no parent; cannot ReplaceTree.".to_string())
    })?;
    let copy = target.import_node(source, source_node, true);
    target.replace_child(parent, copy, existing)?;
    Ok(RuleEffect::Applied)
}

fn apply_set_value(
    target: &mut XmlDocument,
    source: &XmlDocument,
    rule: &MergeRule,
) -> Result<RuleEffect, MergeError> {
    let Some(source_node) = source_node(source, rule)? else {
        return Ok(RuleEffect::SkippedMissing);
    };
    let Some(target_node) = select_exactly_one(target, "TargetNode", &rule.target_node, true)?
    else {
        return Ok(RuleEffect::SkippedMissing);
    };

    let value = source.text_content(source_node);
    target.set_text_content(target_node, &value)?;
    Ok(RuleEffect::Applied)
}

fn apply_delete(target: &mut XmlDocument, rule: &MergeRule) -> Result<RuleEffect, MergeError> {
    let Some(node) = select_exactly_one(target, "Delete", rule.delete_path(), true)? else {
        return Ok(RuleEffect::SkippedMissing);
    };

    match target.parent(node) {
        Some(parent) => target.remove_child(parent, node)?,
        None => log::debug!("Delete target is already detached"),
    }
    Ok(RuleEffect::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    fn doc(xml: &str) -> XmlDocument {
        XmlDocument::from_str(xml).unwrap()
    }

    fn rule(action: &str, source: &str, target: &str) -> MergeRule {
        MergeRule {
            action: action.to_string(),
            source_node: source.to_string(),
            target_node: target.to_string(),
            ..MergeRule::default()
        }
    }

    fn upsert(source: &str, target: &str, parent: &str, before: &str) -> MergeRule {
        MergeRule {
            target_parent: parent.to_string(),
            insert_before: before.to_string(),
            ..rule("UpsertTree", source, target)
        }
    }

    const SOURCE: &str = "<TemplateFieldData><Networks><Network>Alpha</Network></Networks>\
<Status>New</Status><Obsolete /></TemplateFieldData>";

    #[test]
    fn process_add_appends_copy_under_parent() {
        let mut target = doc("<Root><Header /></Root>");
        let outcome = target
            .apply_rules(&doc(SOURCE), &[rule("Add", "//Networks", "//Root")])
            .unwrap();

        assert_eq!(
            target.render(),
            "<Root><Header /><Networks><Network>Alpha</Network></Networks></Root>"
        );
        assert_eq!(
            outcome,
            MergeOutcome {
                applied: 1,
                ..MergeOutcome::default()
            }
        );
    }

    #[test]
    fn process_add_repeated_appends_one_copy_per_run() {
        let source = doc(SOURCE);
        let mut target = doc("<Root><Status>Old</Status></Root>");
        let rules = vec![rule("Add", "//Network", "//Root"); 3];

        target.apply_rules(&source, &rules).unwrap();

        assert_eq!(
            target.render(),
            "<Root><Status>Old</Status><Network>Alpha</Network>\
<Network>Alpha</Network><Network>Alpha</Network></Root>"
        );
    }

    #[test]
    fn process_add_requires_an_existing_parent() {
        let mut target = doc("<Root />");
        let err = target
            .apply_rules(&doc(SOURCE), &[rule("Add", "//Networks", "//Missing")])
            .unwrap_err();

        assert!(matches!(err.root_cause(), MergeError::Cardinality(_)));
        assert!(err.to_string().starts_with("Rule 1 (Action 'Add') failed"));
    }

    #[test]
    fn process_set_value_replaces_text_only() {
        let mut target = doc("<Root><Status>Old</Status></Root>");
        target
            .apply_rules(&doc(SOURCE), &[rule("SetValue", "//Status", "//Status")])
            .unwrap();

        assert_eq!(target.render(), "<Root><Status>New</Status></Root>");
    }

    #[test]
    fn process_upsert_is_idempotent_when_target_exists() {
        let source = doc(SOURCE);
        let rules = [upsert("//Networks", "//Networks", "", "")];
        let mut target = doc("<Root><Networks><Network>Old</Network></Networks><Tail /></Root>");

        target.apply_rules(&source, &rules).unwrap();
        let once = target.render();
        target.apply_rules(&source, &rules).unwrap();

        assert_eq!(target.render(), once);
        assert_eq!(
            once,
            "<Root><Networks><Network>Alpha</Network></Networks><Tail /></Root>"
        );
    }

    #[test]
    fn process_upsert_inserts_before_anchor() {
        let mut target = doc("<Root><Header /><Footer /></Root>");
        target
            .apply_rules(
                &doc(SOURCE),
                &[upsert("//Status", "//Root/Status", "//Root", "//Footer")],
            )
            .unwrap();

        assert_eq!(
            target.render(),
            "<Root><Header /><Status>New</Status><Footer /></Root>"
        );
    }

    #[test]
    fn process_upsert_appends_without_anchor() {
        let mut target = doc("<Root><Header /></Root>");
        target
            .apply_rules(&doc(SOURCE), &[upsert("//Status", "//Status", "/Root", "")])
            .unwrap();

        assert_eq!(target.render(), "<Root><Header /><Status>New</Status></Root>");
    }

    #[test]
    fn process_upsert_without_parent_is_config_error() {
        let mut target = doc("<Root />");
        let err = target
            .apply_rules(&doc(SOURCE), &[upsert("//Status", "//Status", "", "")])
            .unwrap_err();

        assert!(matches!(err.root_cause(), MergeError::Config(_)));
        assert!(err
            .to_string()
            .contains("UpsertTree insert requires TargetParent"));
    }

    #[test]
    fn process_upsert_rejects_anchor_outside_parent() {
        let mut target = doc("<Root><Group><Anchor /></Group></Root>");
        let err = target
            .apply_rules(
                &doc(SOURCE),
                &[upsert("//Status", "//Status", "//Root", "//Anchor")],
            )
            .unwrap_err();

        assert!(matches!(err.root_cause(), MergeError::Structural(_)));
    }

    #[test]
    fn process_upsert_rejects_ambiguous_target() {
        let mut target = doc("<Root><Status /><Status /></Root>");
        let err = target
            .apply_rules(&doc(SOURCE), &[upsert("//Status", "//Status", "//Root", "")])
            .unwrap_err();

        assert!(err.to_string().contains("must be 0 or 1"));
    }

    #[test]
    fn process_replace_swaps_subtree() {
        let mut target = doc("<Root><Networks><Network>Old</Network></Networks></Root>");
        target
            .apply_rules(&doc(SOURCE), &[rule("update", "//Networks", "//Networks")])
            .unwrap();

        assert_eq!(
            target.render(),
            "<Root><Networks><Network>Alpha</Network></Networks></Root>"
        );
    }

    #[test]
    fn process_replace_can_swap_document_element() {
        let mut target = doc("<?xml version=\"1.0\"?>\n<Status>Old</Status>");
        target
            .apply_rules(&doc(SOURCE), &[rule("ReplaceTree", "//Status", "/Status")])
            .unwrap();

        assert_eq!(target.render(), "<?xml version=\"1.0\"?>\n<Status>New</Status>");
    }

    #[test]
    fn missing_targets_leave_tree_identical() {
        let xml = "<Root>\n  <!-- keep -->\n  <Item a=\"1\">x</Item>\n</Root>";
        let mut target = doc(xml);
        let rules = [
            rule("ReplaceTree", "//Networks", "//Networks"),
            rule("SetValue", "//Status", "//Status"),
            rule("Delete", "", "//Obsolete"),
            rule("Add", "//NotInSource", "//Root"),
        ];

        let outcome = target.apply_rules(&doc(SOURCE), &rules).unwrap();

        assert_eq!(target.render(), xml);
        assert_eq!(outcome.skipped_missing, 4);
        assert_eq!(outcome.applied, 0);
    }

    #[test]
    fn process_delete_falls_back_to_source_path() {
        let mut target = doc("<Root><Obsolete /><Keep /></Root>");
        target
            .apply_rules(&doc(SOURCE), &[rule("Delete", "//Obsolete", "")])
            .unwrap();

        assert_eq!(target.render(), "<Root><Keep /></Root>");
    }

    #[test]
    fn process_delete_ambiguous_is_cardinality_error() {
        let mut target = doc("<Root><Obsolete /><Obsolete /></Root>");
        let err = target
            .apply_rules(&doc(SOURCE), &[rule("Delete", "//Obsolete", "")])
            .unwrap_err();

        assert!(matches!(err.root_cause(), MergeError::Cardinality(_)));
    }

    #[test]
    fn conditions_gate_rules_against_current_target() {
        let mut target = doc("<Root><Flag>Y</Flag><Status>Old</Status></Root>");
        let rules = [
            MergeRule {
                condition: "//Flag='Y' and not(//Skip)".to_string(),
                ..rule("SetValue", "//Status", "//Status")
            },
            MergeRule {
                condition: "//Status='Old'".to_string(),
                ..rule("Delete", "", "//Flag")
            },
        ];

        let outcome = target.apply_rules(&doc(SOURCE), &rules).unwrap();

        assert_eq!(target.render(), "<Root><Flag>Y</Flag><Status>New</Status></Root>");
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.skipped_by_condition, 1);
    }

    #[test]
    fn failure_leaves_target_untouched() {
        let xml = "<Root><Status>Old</Status><Dup /><Dup /></Root>";
        let mut target = doc(xml);
        let rules = [
            rule("SetValue", "//Status", "//Status"),
            rule("Add", "//Networks", "//Root"),
            rule("Delete", "", "//Dup"),
        ];

        let err = target.apply_rules(&doc(SOURCE), &rules).unwrap_err();

        assert!(matches!(err, MergeError::RuleFailed { index: 3, .. }));
        assert_eq!(target.render(), xml);
    }

    #[test]
    fn blank_and_unknown_actions_fail_when_rule_fires() {
        let mut target = doc("<Root />");

        let blank = target
            .apply_rules(&doc(SOURCE), &[rule("", "//Status", "//Root")])
            .unwrap_err();
        assert!(matches!(blank.root_cause(), MergeError::Config(_)));

        let unknown = target
            .apply_rules(&doc(SOURCE), &[rule("Merge", "//Status", "//Root")])
            .unwrap_err();
        assert_eq!(
            unknown.root_cause().to_string(),
            "Unsupported merge Action: Merge"
        );

        let gated = MergeRule {
            condition: "//Nothing".to_string(),
            ..rule("Merge", "//Status", "//Root")
        };
        target.apply_rules(&doc(SOURCE), &[gated]).unwrap();
    }

    #[test]
    fn ambiguous_source_fails_even_though_missing_is_skipped() {
        let source = doc("<TemplateFieldData><Status>a</Status><Status>b</Status></TemplateFieldData>");
        let mut target = doc("<Root><Status /></Root>");
        let err = target
            .apply_rules(&source, &[rule("SetValue", "//Status", "//Status")])
            .unwrap_err();

        assert!(err.to_string().contains("SourceNode path matched 2 nodes"));
    }

    #[rstest]
    #[case::missing_parent("<Root><Header /></Root>", "//Missing", "", "TargetParent path matched 0 nodes: //Missing")]
    #[case::ambiguous_parent(
        "<Root><Group /><Group /></Root>",
        "//Group",
        "",
        "TargetParent path matched 2 nodes (must be exactly 1): //Group"
    )]
    #[case::missing_anchor("<Root><Header /></Root>", "//Root", "//Footer", "InsertBefore path matched 0 nodes: //Footer")]
    #[case::ambiguous_anchor(
        "<Root><Footer /><Footer /></Root>",
        "//Root",
        "//Footer",
        "InsertBefore path matched 2 nodes (must be exactly 1): //Footer"
    )]
    fn process_upsert_insert_requires_single_parent_and_anchor(
        #[case] xml: &str,
        #[case] parent: &str,
        #[case] before: &str,
        #[case] message: &str,
    ) {
        let mut target = doc(xml);
        let err = target
            .apply_rules(&doc(SOURCE), &[upsert("//Status", "//Status", parent, before)])
            .unwrap_err();

        assert!(matches!(err.root_cause(), MergeError::Cardinality(_)));
        assert!(
            err.to_string().contains(message),
            "unexpected error: {err}"
        );
        assert_eq!(target.render(), xml);
    }

    #[test]
    fn untouched_empty_elements_keep_their_form() {
        let xml = "<Root><Open></Open><Self/><Q a='1'/><Status>Old</Status></Root>";
        let mut target = doc(xml);
        let source = doc("<TemplateFieldData><Status></Status></TemplateFieldData>");

        target.apply_rules(&source, &[]).unwrap();
        assert_eq!(
            target.render(),
            "<Root><Open></Open><Self /><Q a=\"1\" /><Status>Old</Status></Root>"
        );

        target
            .apply_rules(&source, &[rule("SetValue", "//Status", "//Status")])
            .unwrap();
        assert_eq!(
            target.render(),
            "<Root><Open></Open><Self /><Q a=\"1\" /><Status></Status></Root>"
        );
    }
}
