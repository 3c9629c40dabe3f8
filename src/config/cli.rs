use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the blotter binary.
#[derive(Debug, Parser)]
#[command(
    name = "blotter",
    version,
    about = "Extended-markdown block renderer with a blob-backed payload sanitizer"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "BLOTTER_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Sanitize and render a document, printing blocks as JSON or HTML.
    Render(RenderArgs),
    /// Move inline payloads into the blob store and print the clean text.
    Sanitize(SanitizeArgs),
    /// Store a file in the blob store and print its short reference.
    Ingest(IngestArgs),
    /// Report missing, orphaned and duplicate references and repeated headings.
    Check(CheckArgs),
    /// Cast a ballot in one of a document's polls.
    Vote(VoteArgs),
    /// Print the current counts of one of a document's polls.
    Tally(TallyArgs),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Html,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Document text file.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Voter whose ballots should be reflected in poll blocks.
    #[arg(long, value_name = "ID")]
    pub voter: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct SanitizeArgs {
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Rewrite the file instead of printing the clean text.
    #[arg(long = "in-place", action = clap::ArgAction::SetTrue)]
    pub in_place: bool,
}

#[derive(Debug, Args, Clone)]
pub struct IngestArgs {
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Declared mime type; guessed from the file name when omitted.
    #[arg(long, value_name = "TYPE")]
    pub mime: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CheckArgs {
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath, required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct VoteArgs {
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    #[arg(long, value_name = "ID")]
    pub poll: String,

    /// Omit to vote under a freshly generated pseudo-identity.
    #[arg(long, value_name = "ID")]
    pub voter: Option<String>,

    #[arg(long, value_name = "TEXT")]
    pub option: String,
}

#[derive(Debug, Args, Clone)]
pub struct TallyArgs {
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    #[arg(long, value_name = "ID")]
    pub poll: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the storage directory.
    #[arg(long = "storage-directory", value_name = "PATH", global = true)]
    pub storage_directory: Option<PathBuf>,

    /// Override the minimum length of stray base64 runs that get dropped.
    #[arg(long = "sanitizer-stray-base64-min-len", value_name = "CHARS", global = true)]
    pub sanitizer_stray_base64_min_len: Option<u64>,

    /// Override the maximum number of sanitizer passes.
    #[arg(long = "sanitizer-max-passes", value_name = "COUNT", global = true)]
    pub sanitizer_max_passes: Option<u64>,

    /// Toggle embed title lookups.
    #[arg(
        long = "titles-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub titles_enabled: Option<bool>,

    /// Override how long a title lookup may take.
    #[arg(long = "titles-timeout-seconds", value_name = "SECONDS", global = true)]
    pub titles_timeout_seconds: Option<u64>,
}
