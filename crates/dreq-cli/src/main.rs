//! Data Request CLI
//!
//! Command-line surface over `dreq-content` and `dreq-query`:
//! - Transforming a raw Airtable export into `DR_<version>_content.json` and
//!   `VS_<version>_content.json`
//! - Checking, listing and exporting the content of a Data Request
//! - Producing the requested variables by experiment

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use dreq_content::io::{read_json_file, write_json_file};
use dreq_content::{transform_content, TransformConfig, UidStrategy};
use dreq_query::{
    get_requested_variables, DataRequest, FilterSpec, Operation, OpportunitySelection, PriorityLevel, ReportOptions,
    Requests, SummaryLayout, TextTable, DEFAULT_SEPARATOR,
};
use tracing::info;

mod logging;

#[derive(Parser)]
#[command(name = "dreq")]
#[command(author, version, about = "CMIP Data Request content and queries")]
struct Cli {
    /// Log level or filter directive, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform a raw export into DR and VS content files.
    Transform {
        /// Raw Airtable export (JSON)
        input: PathBuf,
        /// Content version stamped on both outputs
        #[arg(long)]
        content_version: String,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
        /// Transformation rules (JSON); built-in rules otherwise
        #[arg(long)]
        config: Option<PathBuf>,
        /// How synthetic uids are generated
        #[arg(long, value_enum)]
        uids: Option<UidArg>,
    },

    /// Dump the built-in transformation rules as JSON.
    DefaultConfig {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Run the data-quality checks of every group and opportunity.
    Check {
        #[command(flatten)]
        content: ContentArgs,
    },

    /// Print the content of the Data Request.
    Show {
        #[command(flatten)]
        content: ContentArgs,
    },

    /// List the elements of one kind matching a filter.
    List {
        #[command(flatten)]
        content: ContentArgs,
        /// Element kind (opportunities, variables, experiments, ...)
        element_type: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// Attributes printed after the id
        #[arg(short, long, value_delimiter = ',', default_value = "name")]
        columns: Vec<String>,
        /// Attributes to sort on
        #[arg(short, long, value_delimiter = ',', default_value = "id")]
        sort: Vec<String>,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_SEPARATOR)]
        separator: char,
    },

    /// Cross table of two element kinds.
    Summary {
        #[command(flatten)]
        content: ContentArgs,
        /// Kind listed on lines
        lines: String,
        /// Kind listed on columns
        columns: String,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value = "id")]
        sorting_line: String,
        #[arg(long, default_value = "name")]
        title_line: String,
        #[arg(long, default_value = "id")]
        sorting_column: String,
        #[arg(long, default_value = "name")]
        title_column: String,
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_SEPARATOR)]
        separator: char,
    },

    /// Variables requested by experiment and priority level.
    RequestedVars {
        #[command(flatten)]
        content: ContentArgs,
        /// Opportunities by uid or name (all when omitted)
        #[arg(long, value_delimiter = ',')]
        opportunities: Vec<String>,
        /// Lowest priority level included
        #[arg(long, default_value = "Low")]
        priority_cutoff: String,
        /// Require the same non-empty Core list for every experiment
        #[arg(long)]
        check_core: bool,
        /// Output JSON file
        #[arg(short, long)]
        out: PathBuf,
    },
}

/// Where the Data Request comes from: DR and VS files, or a raw export
/// transformed on the fly.
#[derive(Args)]
struct ContentArgs {
    /// Data Request content file
    #[arg(long, requires = "vs", conflicts_with = "raw")]
    dr: Option<PathBuf>,
    /// Vocabulary Server content file
    #[arg(long, requires = "dr")]
    vs: Option<PathBuf>,
    /// Raw export, transformed before loading
    #[arg(long, requires = "content_version")]
    raw: Option<PathBuf>,
    /// Content version of the raw export
    #[arg(long)]
    content_version: Option<String>,
}

impl ContentArgs {
    fn load(&self) -> Result<DataRequest> {
        match (&self.dr, &self.vs, &self.raw) {
            (Some(dr), Some(vs), _) => DataRequest::from_separated_inputs(dr.as_path(), vs.as_path())
                .with_context(|| format!("failed to load {} and {}", dr.display(), vs.display())),
            (_, _, Some(raw)) => {
                let version = self
                    .content_version
                    .as_deref()
                    .ok_or_else(|| anyhow!("--content-version is required with --raw"))?;
                DataRequest::from_input(raw.as_path(), version, &TransformConfig::default())
                    .with_context(|| format!("failed to load {}", raw.display()))
            }
            _ => bail!("either --dr and --vs, or --raw, must be given"),
        }
    }

    /// The file the report header records as its content source.
    fn content_file(&self) -> Option<PathBuf> {
        self.vs.clone().or_else(|| self.raw.clone())
    }
}

#[derive(Args)]
struct FilterArgs {
    /// `kind=value` request; repeat for several values
    #[arg(short, long = "filter", value_parser = parse_request)]
    filters: Vec<(String, String)>,
    /// How the requests combine: all or any
    #[arg(long, default_value = "all")]
    operation: String,
    /// Ignore requested values that cannot be found
    #[arg(long)]
    skip_if_missing: bool,
}

impl FilterArgs {
    fn to_spec(&self) -> Result<FilterSpec> {
        Ok(FilterSpec {
            requests: self.filters.iter().cloned().collect::<Requests>(),
            operation: self.operation.parse::<Operation>()?,
            skip_if_missing: self.skip_if_missing,
        })
    }
}

fn parse_request(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((kind, value)) if !kind.trim().is_empty() => Ok((kind.trim().to_string(), value.trim().to_string())),
        _ => Err(format!("expected `kind=value`, got `{s}`")),
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum UidArg {
    Sequential,
    Digest,
}

impl From<UidArg> for UidStrategy {
    fn from(arg: UidArg) -> Self {
        match arg {
            UidArg::Sequential => UidStrategy::Sequential,
            UidArg::Digest => UidStrategy::ContentDigest,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_json)?;

    match cli.command {
        Commands::Transform {
            input,
            content_version,
            out_dir,
            config,
            uids,
        } => cmd_transform(&input, &content_version, &out_dir, config.as_deref(), uids),
        Commands::DefaultConfig { out } => cmd_default_config(out.as_deref()),
        Commands::Check { content } => cmd_check(&content),
        Commands::Show { content } => {
            let dr = content.load()?;
            println!("{}", dr.version().cyan());
            println!("{dr}");
            Ok(())
        }
        Commands::List {
            content,
            element_type,
            filter,
            columns,
            sort,
            out,
            separator,
        } => {
            let dr = content.load()?;
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            let sort: Vec<&str> = sort.iter().map(String::as_str).collect();
            let table = dr.export_data(&element_type, &filter.to_spec()?, &columns, &sort)?;
            emit_table(&table, separator, out.as_deref())
        }
        Commands::Summary {
            content,
            lines,
            columns,
            filter,
            sorting_line,
            title_line,
            sorting_column,
            title_column,
            out,
            separator,
        } => {
            let dr = content.load()?;
            let layout = SummaryLayout {
                sorting_line,
                title_line,
                sorting_column,
                title_column,
            };
            let table = dr.export_summary(&lines, &columns, &filter.to_spec()?, &layout)?;
            emit_table(&table, separator, out.as_deref())
        }
        Commands::RequestedVars {
            content,
            opportunities,
            priority_cutoff,
            check_core,
            out,
        } => {
            let options = ReportOptions {
                opportunities: if opportunities.is_empty() {
                    OpportunitySelection::All
                } else {
                    OpportunitySelection::Only(opportunities)
                },
                priority_cutoff: priority_cutoff.parse::<PriorityLevel>()?,
                check_core,
                content_file: content.content_file(),
            };
            cmd_requested_vars(&content, &options, &out)
        }
    }
}

fn cmd_transform(
    input: &Path,
    version: &str,
    out_dir: &Path,
    config: Option<&Path>,
    uids: Option<UidArg>,
) -> Result<()> {
    eprintln!("{} {}", "Transforming".green().bold(), input.display());

    let mut config = match config {
        Some(path) => TransformConfig::from_json_file(path)
            .with_context(|| format!("failed to read rules from {}", path.display()))?,
        None => TransformConfig::default(),
    };
    if let Some(uids) = uids {
        config.uid_strategy = uids.into();
    }

    let raw = read_json_file(input).with_context(|| format!("failed to read {}", input.display()))?;
    let (dr, vs) = transform_content(&raw, version, &config)?;

    std::fs::create_dir_all(out_dir).with_context(|| format!("failed to create {}", out_dir.display()))?;
    for (prefix, document) in [("DR", &dr), ("VS", &vs)] {
        let path = out_dir.join(format!("{prefix}_{version}_content.json"));
        write_json_file(&path, document).with_context(|| format!("failed to write {}", path.display()))?;
        eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
    }
    Ok(())
}

fn cmd_default_config(out: Option<&Path>) -> Result<()> {
    let text = TransformConfig::default().to_json_string()?;
    match out {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn cmd_check(content: &ContentArgs) -> Result<()> {
    let dr = content.load()?;
    println!("{} {}", "Checking".green().bold(), dr.version());
    let problems = dr.check()?;
    for problem in &problems {
        println!("  {} {problem}", "warning:".yellow().bold());
    }
    if problems.is_empty() {
        println!("{}", "No problem found.".green());
    } else {
        println!("{} problem(s) found", problems.len().to_string().yellow());
    }
    Ok(())
}

fn cmd_requested_vars(content: &ContentArgs, options: &ReportOptions, out: &Path) -> Result<()> {
    let dr = content.load()?;
    let report = get_requested_variables(&dr, options)?;
    write_json_file(out, &report).with_context(|| format!("failed to write {}", out.display()))?;
    info!(path = %out.display(), experiments = report.experiments.len(), "wrote requested variables");

    for line in report.summary_lines() {
        println!("{line}");
    }
    eprintln!("{} {}", "wrote".green().bold(), out.display().to_string().bold());
    Ok(())
}

fn emit_table(table: &TextTable, separator: char, out: Option<&Path>) -> Result<()> {
    let text = table.to_delimited(separator);
    match out {
        Some(path) => {
            std::fs::write(path, format!("{text}\n")).with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!(
                "{} {} ({} rows)",
                "wrote".green().bold(),
                path.display().to_string().bold(),
                table.rows.len()
            );
        }
        None => println!("{text}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_parse_as_key_value_pairs() {
        assert_eq!(
            parse_request("opportunities = Ocean extras").unwrap(),
            ("opportunities".to_string(), "Ocean extras".to_string())
        );
        assert!(parse_request("no separator").is_err());
        assert!(parse_request("=value").is_err());
    }

    #[test]
    fn arguments_parse() {
        let cli = Cli::try_parse_from([
            "dreq",
            "--log-level",
            "debug",
            "list",
            "--dr",
            "dr.json",
            "--vs",
            "vs.json",
            "variables",
            "-f",
            "priority_level=High",
            "--columns",
            "name,title",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        let Commands::List { filter, columns, .. } = cli.command else {
            panic!("expected list");
        };
        assert_eq!(columns, ["name", "title"]);
        assert_eq!(filter.filters, [("priority_level".to_string(), "High".to_string())]);
        assert!(filter.to_spec().is_ok());
    }

    #[test]
    fn content_requires_a_source() {
        let cli = Cli::try_parse_from(["dreq", "check"]).unwrap();
        let Commands::Check { content } = cli.command else {
            panic!("expected check");
        };
        assert!(content.load().is_err());
        assert!(Cli::try_parse_from(["dreq", "check", "--dr", "dr.json"]).is_err());
    }
}
