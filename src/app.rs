use crate::cli::{CheckArgs, Cli, Command, EvalArgs, MergeArgs, RulesArgs, SelectArgs};
use anyhow::{anyhow, Context};
use clap::Parser;
use similar::TextDiff;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use tempfile::Builder as TempFileBuilder;
use xml_merge::rules::validate_rules;
use xml_merge::selector::{require_exactly_one, select_all};
use xml_merge::{condition, load_rules, MergeError, MergeRule, RuleTableFormat, XmlDocument};

pub fn run() -> anyhow::Result<()> {
    env_logger::init();

    let Cli { command } = Cli::parse();

    match command {
        Command::Merge(args) => process_merge(args),
        Command::Select(args) => process_select(args),
        Command::Eval(args) => process_eval(args),
        Command::Check(args) => process_check(args),
    }
}

fn process_merge(args: MergeArgs) -> anyhow::Result<()> {
    let MergeArgs {
        table,
        source,
        target,
        source_root,
        output,
        dry_run,
        diff,
    } = args;

    let rules = read_rules(&table)?;
    let source = read_document(&source)?
        .extract_subtree(&source_root)
        .map_err(map_merge_error)?;
    let original_content = read_file(&target)?;
    let mut document = XmlDocument::from_str(&original_content)
        .map_err(map_merge_error)
        .with_context(|| format!("Failed to parse target document: {}", target.display()))?;

    let outcome = document
        .apply_rules(&source, &rules)
        .map_err(map_merge_error)?;
    eprintln!(
        "Applied {} of {} rule(s) ({} skipped by condition, {} skipped for missing nodes)",
        outcome.applied,
        rules.len(),
        outcome.skipped_by_condition,
        outcome.skipped_missing
    );

    let mode = if dry_run {
        OutputMode::DryRun
    } else if diff {
        OutputMode::Diff
    } else {
        OutputMode::Write
    };
    finalize_output(mode, &output, &original_content, document.render())
}

fn process_select(args: SelectArgs) -> anyhow::Result<()> {
    let doc = read_document(&args.file)?;

    let matches = if args.exactly_one {
        vec![require_exactly_one(&doc, "Select", &args.path).map_err(map_merge_error)?]
    } else {
        select_all(&doc, "Select", &args.path).map_err(map_merge_error)?
    };

    log::debug!("Path `{}` matched {} node(s)", args.path, matches.len());
    for node in matches {
        println!("{}", doc.outer_xml(node));
    }
    Ok(())
}

fn process_eval(args: EvalArgs) -> anyhow::Result<()> {
    let doc = read_document(&args.file)?;
    let result = condition::evaluate(&doc, &args.condition).map_err(map_merge_error)?;
    println!("{}", result);
    Ok(())
}

fn process_check(args: CheckArgs) -> anyhow::Result<()> {
    let rules = read_rules(&args.table)?;
    validate_rules(&rules).map_err(map_merge_error)?;
    println!("{} rule(s) OK", rules.len());
    Ok(())
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))
}

fn read_document(path: &Path) -> anyhow::Result<XmlDocument> {
    let content = read_file(path)?;
    XmlDocument::from_str(&content)
        .map_err(map_merge_error)
        .with_context(|| format!("Failed to parse XML document: {}", path.display()))
}

fn read_rules(args: &RulesArgs) -> anyhow::Result<Vec<MergeRule>> {
    let format = args
        .rules_format
        .map(RuleTableFormat::from)
        .unwrap_or_else(|| RuleTableFormat::from_path(&args.rules));
    let content = read_file(&args.rules)?;

    let rules = load_rules(&content, format)
        .map_err(map_merge_error)
        .with_context(|| format!("Failed to load rule table: {}", args.rules.display()))?;
    log::debug!(
        "Loaded {} rule(s) from {} as {:?}",
        rules.len(),
        args.rules.display(),
        format
    );
    Ok(rules)
}

fn finalize_output(
    mode: OutputMode,
    output_path: &Path,
    original_content: &str,
    rendered_content: String,
) -> anyhow::Result<()> {
    match mode {
        OutputMode::DryRun => {
            io::stdout().write_all(rendered_content.as_bytes())?;
            return Ok(());
        }
        OutputMode::Diff => {
            let diff_output = TextDiff::from_lines(original_content, &rendered_content)
                .unified_diff()
                .header("target", "merged")
                .to_string();

            io::stdout().write_all(diff_output.as_bytes())?;
            return Ok(());
        }
        OutputMode::Write => {}
    }

    let parent_dir = match output_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        Some(_) => Path::new("."),
        None => {
            return Err(anyhow!(
                "Could not determine parent directory of {}",
                output_path.display()
            ))
        }
    };

    let mut temp_file = TempFileBuilder::new()
        .prefix(".xml-merge-")
        .suffix(".tmp")
        .tempfile_in(parent_dir)
        .with_context(|| {
            format!(
                "Failed to create temporary file in {}",
                parent_dir.display()
            )
        })?;

    temp_file
        .write_all(rendered_content.as_bytes())
        .with_context(|| "Failed to write to temporary file")?;

    temp_file
        .persist(output_path)
        .with_context(|| format!("Failed to write output file {}", output_path.display()))?;

    Ok(())
}

fn map_merge_error(err: MergeError) -> anyhow::Error {
    match err {
        // The rule context already renders its cause inline.
        err @ MergeError::RuleFailed { .. } => anyhow!(err.to_string()),
        other => anyhow!(other),
    }
}

#[derive(Clone, Copy)]
enum OutputMode {
    Write,
    DryRun,
    Diff,
}
