//! spm - inspect and exercise service prioritization rule sets
//!
//! - `spm check` validates a rule file against the table limits
//! - `spm dump` lists the rules in evaluation order
//! - `spm classify` runs a list of classification requests and prints one
//!   JSON decision per request

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use spm_core::config::{EngineConfig, LogFormat, LoggingConfig};
use spm_core::types::ClassifierType;
use spm_mapdb::{ClassifyInput, Decision, RuleSet, RuleTable, RuleTableBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Service prioritization rule engine tools
#[derive(Parser, Debug)]
#[command(name = "spm", author, version, about, propagate_version = true)]
struct Cli {
    /// Path to the engine configuration file
    #[arg(short, long, env = "SPM_CONFIG")]
    config: Option<PathBuf>,

    /// Rule file, overrides `rules` from the configuration
    #[arg(short, long)]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the rule file and report rule counts per family.
    Check,

    /// Print the rules in evaluation order.
    Dump {
        /// Emit JSON instead of one line per rule
        #[arg(long)]
        json: bool,

        /// Only list rules of this family
        #[arg(long)]
        classifier: Option<ClassifierType>,
    },

    /// Classify each request of a YAML list.
    Classify {
        /// YAML file holding a list of requests
        #[arg(short, long)]
        input: PathBuf,

        /// Print lookup counters to stderr when done
        #[arg(long)]
        stats: bool,
    },
}

#[derive(Debug, Serialize)]
struct CheckReport {
    rules: usize,
    enabled: usize,
    families: Vec<(ClassifierType, usize)>,
}

#[derive(Debug, Serialize)]
struct ClassifyReport<'a> {
    index: usize,
    input: &'a ClassifyInput,
    decision: Decision,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging)?;

    let rules_path = cli
        .rules
        .or_else(|| config.rules.clone())
        .context("No rule file given (use --rules or set `rules` in the configuration)")?;
    let rule_set = RuleSet::from_file(&rules_path)?;

    let table = RuleTableBuilder::new()
        .config(config.table.clone())
        .metrics(config.metrics.enabled)
        .build()
        .context("Failed to create rule table")?;
    rule_set.apply(&table)?;

    match cli.command {
        Command::Check => check(&rule_set, &table),
        Command::Dump { json, classifier } => dump(&table, json, classifier),
        Command::Classify { input, stats } => classify(&table, &input, stats),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_config_builder(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let level = logging.parse_level()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    // stdout carries the command output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if let Err(e) = result {
        bail!("Failed to initialize logging: {}", e);
    }
    Ok(())
}

fn check(rule_set: &RuleSet, table: &RuleTable) -> Result<()> {
    let families = ClassifierType::ALL
        .iter()
        .map(|&family| (family, table.load().iter_family(family).count()))
        .filter(|(_, count)| *count > 0)
        .collect();

    let report = CheckReport {
        rules: rule_set.rules.len(),
        enabled: table.len(),
        families,
    };

    info!(rules = report.rules, enabled = report.enabled, "Rule file is valid");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn dump(table: &RuleTable, json: bool, classifier: Option<ClassifierType>) -> Result<()> {
    let rules: Vec<_> = table
        .rules()
        .into_iter()
        .filter(|rule| classifier.map_or(true, |c| rule.classifier == c))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
    } else {
        for rule in &rules {
            println!("{}", rule);
        }
    }
    Ok(())
}

fn classify(table: &RuleTable, input: &Path, stats: bool) -> Result<()> {
    let contents = fs::read_to_string(input)
        .with_context(|| format!("Failed to read request file: {}", input.display()))?;
    let requests: Vec<ClassifyInput> = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse request file: {}", input.display()))?;

    debug!(count = requests.len(), "Classifying requests");

    for (index, request) in requests.iter().enumerate() {
        let report = ClassifyReport {
            index,
            input: request,
            decision: table.classify(request),
        };
        println!("{}", serde_json::to_string(&report)?);
    }

    if stats {
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&table.metrics().snapshot())?
        );
    }
    Ok(())
}
