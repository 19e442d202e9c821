use std::collections::BTreeMap;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use annotrack::config::{ConfigLoader, ResolvedConfig};
use annotrack::domain::{EditionNumber, SpeciesId};
use annotrack::error::AnnotrackError;
use annotrack::oracle::{ConsistencyOracle, StoreProbe};
use annotrack::output::JsonOutput;
use annotrack::publisher::{FsPublisher, store_status};
use annotrack::store::DataStore;

#[derive(Parser)]
#[command(name = "annotrack")]
#[command(about = "Result store operations for the gene-annotation history pipeline")]
#[command(version, author)]
struct Cli {
    /// Root of the result store; overrides the config file.
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Path to annotrack.json.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show row counts per area and generation")]
    Status,
    #[command(about = "Compare raw max editions against the published aggregates (exit 4 when stale)")]
    Check(CheckArgs),
    #[command(name = "discard-staging", about = "Drop staging areas left by an interrupted run")]
    DiscardStaging,
    #[command(about = "Drop the retained previous generation (requires --yes)")]
    Cleanup(CleanupArgs),
}

#[derive(Args)]
struct CheckArgs {
    /// JSON file mapping species id to the raw source's max edition.
    #[arg(long)]
    raw_state: String,
}

#[derive(Args)]
struct CleanupArgs {
    #[arg(long)]
    yes: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<AnnotrackError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &AnnotrackError) -> u8 {
    match error {
        AnnotrackError::MissingConfig
        | AnnotrackError::ConfigRead(_)
        | AnnotrackError::ConfigParse(_) => 2,
        AnnotrackError::Filesystem(_) | AnnotrackError::StoreParse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<u8> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let store = resolve_store(cli.data_dir.as_deref(), config.as_ref())?;

    match cli.command {
        Commands::Status => {
            let status = store_status(&store).into_diagnostic()?;
            JsonOutput::print_status(&status).into_diagnostic()?;
            Ok(0)
        }
        Commands::Check(args) => {
            let raw = read_raw_state(&args.raw_state)?;
            let probe = StoreProbe::new(raw, &store);
            let report = ConsistencyOracle::check(&probe).into_diagnostic()?;
            JsonOutput::print_report(&report).into_diagnostic()?;
            Ok(if report.stale { 4 } else { 0 })
        }
        Commands::DiscardStaging => {
            let publisher = FsPublisher::new(store);
            publisher.discard_staging().into_diagnostic()?;
            Ok(0)
        }
        Commands::Cleanup(args) => {
            if !args.yes {
                return Err(miette::Report::msg(
                    "cleanup removes the retained previous generation; pass --yes to confirm",
                ));
            }
            let publisher = FsPublisher::new(store);
            publisher.cleanup_previous().into_diagnostic()?;
            Ok(0)
        }
    }
}

fn load_config(path: Option<&str>) -> miette::Result<Option<ResolvedConfig>> {
    match ConfigLoader::resolve(path) {
        Ok(config) => Ok(Some(config)),
        // No config file in the working directory is fine for store
        // operations; an explicitly named one must exist.
        Err(AnnotrackError::MissingConfig) if path.is_none() => Ok(None),
        Err(err) => Err(err).into_diagnostic(),
    }
}

fn resolve_store(
    data_dir: Option<&str>,
    config: Option<&ResolvedConfig>,
) -> miette::Result<DataStore> {
    let root = data_dir
        .map(Utf8PathBuf::from)
        .or_else(|| config.and_then(|c| c.data_dir.clone()));
    DataStore::resolve(root).into_diagnostic()
}

fn read_raw_state(path: &str) -> miette::Result<BTreeMap<SpeciesId, EditionNumber>> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AnnotrackError::Filesystem(format!("read {path}: {err}")))
        .into_diagnostic()?;
    let raw: BTreeMap<u32, u32> = serde_json::from_str(&content)
        .map_err(|err| AnnotrackError::StoreParse(format!("{path}: {err}")))
        .into_diagnostic()?;
    Ok(raw
        .into_iter()
        .map(|(species, edition)| (SpeciesId(species), EditionNumber(edition)))
        .collect())
}
