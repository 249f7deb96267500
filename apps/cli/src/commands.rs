//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing::{info, warn};

use kbforge_core::{Pipeline, PipelineConfig, ProgressReporter, RunOutcome, Stage};
use kbforge_service::ServiceClient;
use kbforge_shared::{
    AppConfig, IncidentContext, init_config, load_config, load_config_from, validate_api_key,
};
use kbforge_storage::Storage;

const GENERATE_OK: &str = "Knowledge article generated successfully.";
const GENERATE_FAILED: &str = "Failed to generate Knowledge article. Check logs for details.";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kbforge: turn resolved incidents into draft knowledge-base articles.
#[derive(Parser)]
#[command(
    name = "kbforge",
    version,
    about = "Turn resolved incidents into draft knowledge-base articles.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to load instead of ~/.kbforge/kbforge.toml.
    #[arg(long, global = true, env = "KBFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Record store database path (overrides [store].database_path).
    #[arg(long, global = true, env = "KBFORGE_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate a draft knowledge article from a resolved incident.
    Generate {
        /// Incident record identifier.
        incident_id: String,
    },

    /// Incident records.
    Incident {
        #[command(subcommand)]
        action: IncidentAction,
    },

    /// Knowledge-base containers.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Generated articles.
    Articles {
        #[command(subcommand)]
        action: ArticlesAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum IncidentAction {
    /// Import one incident (or an array of incidents) from a JSON file.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },
    /// Print a stored incident as JSON.
    Show {
        /// Incident record identifier.
        id: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum KbAction {
    /// Register a knowledge-base container.
    Add {
        /// Container title.
        title: String,
    },
    /// List knowledge-base containers.
    List,
}

#[derive(Subcommand)]
pub(crate) enum ArticlesAction {
    /// List generated articles.
    List,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "kbforge=info",
        1 => "kbforge=debug",
        _ => "kbforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so command output on stdout stays clean.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();
    let db = cli.db.as_deref();

    match cli.command {
        Command::Generate { incident_id } => {
            let config = resolve_config(config_path, db)?;
            return cmd_generate(&config, &incident_id).await;
        }
        Command::Incident { action } => {
            let storage = open_storage(&resolve_config(config_path, db)?).await?;
            match action {
                IncidentAction::Import { file } => cmd_incident_import(&storage, &file).await?,
                IncidentAction::Show { id } => cmd_incident_show(&storage, &id).await?,
            }
        }
        Command::Kb { action } => {
            let storage = open_storage(&resolve_config(config_path, db)?).await?;
            match action {
                KbAction::Add { title } => cmd_kb_add(&storage, &title).await?,
                KbAction::List => cmd_kb_list(&storage).await?,
            }
        }
        Command::Articles {
            action: ArticlesAction::List,
        } => {
            let storage = open_storage(&resolve_config(config_path, db)?).await?;
            cmd_articles_list(&storage).await?;
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init()?,
            ConfigAction::Show => cmd_config_show(config_path)?,
        },
    }

    Ok(ExitCode::SUCCESS)
}

/// Load config from `--config` or the default location, then apply `--db`.
fn resolve_config(config_path: Option<&Path>, db: Option<&Path>) -> Result<AppConfig> {
    let mut config = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(db) = db {
        config.store.database_path = db.to_string_lossy().into_owned();
    }
    Ok(config)
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let path = PathBuf::from(&config.store.database_path);
    Ok(Storage::open(&path).await?)
}

// ---------------------------------------------------------------------------
// generate
// ---------------------------------------------------------------------------

async fn cmd_generate(config: &AppConfig, incident_id: &str) -> Result<ExitCode> {
    if let Err(e) = validate_api_key(config) {
        warn!(error = %e, "calling the generative service without authorization");
    }

    let setup = async {
        let storage = open_storage(config).await?;
        let client = ServiceClient::new(&config.service)?;
        Ok::<_, color_eyre::Report>((storage, client))
    };
    let (storage, client) = match setup.await {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!(error = %e, "generate setup failed");
            eprintln!("{GENERATE_FAILED}");
            return Ok(ExitCode::FAILURE);
        }
    };

    info!(
        incident_id,
        model = %config.service.model,
        endpoint = %client.endpoint(),
        "generating knowledge article"
    );

    let pipeline = Pipeline::new(storage, client, &PipelineConfig::from(config));
    let reporter = CliProgress::new();

    match pipeline.run(incident_id, &reporter).await {
        Ok(outcome) => {
            println!();
            println!("  {GENERATE_OK}");
            println!("  Number: {}", outcome.article.number);
            println!("  ID:     {}", outcome.article.id);
            println!("  Title:  {}", outcome.title);
            println!(
                "  KB:     {}",
                outcome.knowledge_base_id.as_deref().unwrap_or("(none)")
            );
            if !outcome.linked {
                println!("  Link:   not linked to incident (see logs)");
            }
            println!("  Time:   {:.1}s", outcome.elapsed.as_secs_f64());
            println!();
            Ok(ExitCode::SUCCESS)
        }
        Err(_) => {
            // The pipeline has already logged the reason and detail.
            eprintln!("{GENERATE_FAILED}");
            Ok(ExitCode::FAILURE)
        }
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: Stage) {
        match stage {
            Stage::ContextLoaded => self.spinner.set_message("Calling generative service"),
            Stage::Failed(_) => self.spinner.finish_and_clear(),
            other => self.spinner.set_message(other.label()),
        }
    }

    fn done(&self, _outcome: &RunOutcome) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Record commands
// ---------------------------------------------------------------------------

/// An import file holds one incident or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum IncidentFile {
    One(IncidentContext),
    Many(Vec<IncidentContext>),
}

async fn cmd_incident_import(storage: &Storage, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    let incidents = match serde_json::from_str::<IncidentFile>(&content)
        .map_err(|e| eyre!("'{}' is not a valid incident file: {e}", file.display()))?
    {
        IncidentFile::One(incident) => vec![incident],
        IncidentFile::Many(incidents) => incidents,
    };

    for incident in &incidents {
        storage.insert_incident(incident).await?;
        println!("Imported {} ({})", incident.number, incident.id);
    }
    info!(count = incidents.len(), file = %file.display(), "incidents imported");
    Ok(())
}

async fn cmd_incident_show(storage: &Storage, id: &str) -> Result<()> {
    let incident = storage
        .get_incident(id)
        .await?
        .ok_or_else(|| eyre!("incident '{id}' not found"))?;
    println!("{}", serde_json::to_string_pretty(&incident)?);
    Ok(())
}

async fn cmd_kb_add(storage: &Storage, title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(eyre!("knowledge base title must not be empty"));
    }
    let id = storage.insert_knowledge_base(title).await?;
    println!("Knowledge base created: {id}");
    Ok(())
}

async fn cmd_kb_list(storage: &Storage) -> Result<()> {
    let kbs = storage.list_knowledge_bases().await?;
    if kbs.is_empty() {
        println!("No knowledge bases registered.");
        return Ok(());
    }
    for kb in kbs {
        println!("{}  {}", kb.id, kb.title);
    }
    Ok(())
}

async fn cmd_articles_list(storage: &Storage) -> Result<()> {
    let articles = storage.list_articles().await?;
    if articles.is_empty() {
        println!("No articles generated yet.");
        return Ok(());
    }
    for article in articles {
        println!(
            "{}  {:<9}  {}  {}",
            article.number,
            article.workflow_state.as_str(),
            article.id,
            article.title
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path, None)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    println!("# {}", api_key_status(&config));
    Ok(())
}

/// One-line report on whether the service API key is available.
fn api_key_status(config: &AppConfig) -> String {
    match validate_api_key(config) {
        Ok(()) => format!("API key: set (from {})", config.service.api_key_env),
        Err(_) => format!("API key: missing (set {})", config.service.api_key_env),
    }
}
