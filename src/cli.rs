//! Defines the command-line interface for the application.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use xml_merge::RuleTableFormat;

#[derive(Parser, Debug)]
#[command(
    name = "xml-merge",
    version,
    about = "Merge XML documents with a declarative rule table."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply a rule table to a target document using content from a source document.
    Merge(MergeArgs),
    /// Print the nodes a path expression selects.
    Select(SelectArgs),
    /// Evaluate a rule condition against a document and print `true` or `false`.
    Eval(EvalArgs),
    /// Validate a rule table without applying it.
    #[command(alias = "validate")]
    Check(CheckArgs),
}

#[derive(Args, Debug)]
pub struct RulesArgs {
    /// The rule table.
    #[arg(short, long, value_name = "RULES_PATH")]
    pub rules: PathBuf,

    /// Format of the rule table. [default: inferred from the file extension]
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub rules_format: Option<RulesFormatArg>,
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    #[command(flatten)]
    pub table: RulesArgs,

    /// The document content is copied from.
    #[arg(short, long, value_name = "SOURCE_PATH")]
    pub source: PathBuf,

    /// The document the rules are applied to. It is never modified in place.
    #[arg(short, long, value_name = "TARGET_PATH")]
    pub target: PathBuf,

    /// Element of the source document that holds the merge content.
    #[arg(long, value_name = "NAME", default_value = xml_merge::DEFAULT_SOURCE_ROOT)]
    pub source_root: String,

    /// Where to write the merged document.
    #[arg(short, long, value_name = "OUTPUT_PATH", default_value = "Output.xml")]
    pub output: PathBuf,

    /// Print the merged document to stdout instead of writing it.
    #[arg(long, conflicts_with = "diff")]
    pub dry_run: bool,

    /// Print a unified diff between the target and the merged document.
    #[arg(long, conflicts_with = "dry_run")]
    pub diff: bool,
}

#[derive(Args, Debug)]
pub struct SelectArgs {
    /// The XML document to query.
    #[arg(short, long, value_name = "FILE_PATH")]
    pub file: PathBuf,

    /// The path expression, e.g. `//Networks/Network[@type='ppo']`.
    #[arg(value_name = "PATH", allow_hyphen_values = true)]
    pub path: String,

    /// Fail unless the path matches exactly one node.
    #[arg(long)]
    pub exactly_one: bool,
}

#[derive(Args, Debug)]
pub struct EvalArgs {
    /// The XML document to evaluate against.
    #[arg(short, long, value_name = "FILE_PATH")]
    pub file: PathBuf,

    /// The condition, e.g. `//Flag='Y' and not(//Skip)`.
    #[arg(value_name = "CONDITION", allow_hyphen_values = true)]
    pub condition: String,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub table: RulesArgs,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RulesFormatArg {
    /// `Row` elements with one child element per field.
    Xml,
    /// An array of objects keyed by field name.
    Json,
    Yaml,
    /// `[[Row]]` tables.
    Toml,
}

impl From<RulesFormatArg> for RuleTableFormat {
    fn from(value: RulesFormatArg) -> Self {
        match value {
            RulesFormatArg::Xml => RuleTableFormat::Xml,
            RulesFormatArg::Json => RuleTableFormat::Json,
            RulesFormatArg::Yaml => RuleTableFormat::Yaml,
            RulesFormatArg::Toml => RuleTableFormat::Toml,
        }
    }
}
