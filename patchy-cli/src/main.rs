mod cli;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ConfigCommands, TargetArgs};
use patchy_config::{ConfigLoader, LogFormat, LoggingConfig, PatchyConfig};
use patchy_core::{
    Connection, MigrateOptions, MigrationPlan, Migrator, PatchError, Status, TrackedLevel,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status when a rollback failed and the database needs an operator
const EXIT_FATAL: u8 = 2;

/// Load configuration from file or use defaults
fn load_config(config_path: Option<&PathBuf>) -> Result<PatchyConfig> {
    ConfigLoader::new().load(config_path).with_context(|| match config_path {
        Some(path) => format!("Failed to load configuration from {:?}", path),
        None => "Failed to load configuration from environment".to_string(),
    })
}

/// Initialize tracing: `--log-level`, then `RUST_LOG`, then the configured level
fn init_tracing(log_level: Option<&String>, logging: &LoggingConfig) -> Result<()> {
    let env_filter = match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", level);
            EnvFilter::new("info")
        }),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str())),
    };

    // Logs go to stderr, command output to stdout
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow!("Failed to initialize tracing: {}", e))?;

    debug!("Tracing initialized");
    Ok(())
}

/// Effective settings for one command: CLI flags over configuration
#[derive(Debug, Clone)]
struct Settings {
    database_url: String,
    connection_timeout: Duration,
    patch_dir: PathBuf,
    tracked: TrackedLevel,
}

impl Settings {
    fn resolve(config: &PatchyConfig, args: &TargetArgs) -> Result<Self> {
        let table = args
            .property_table
            .clone()
            .unwrap_or_else(|| config.patches.table.clone());
        let key = args
            .patch_key
            .clone()
            .unwrap_or_else(|| config.patches.key.clone());
        let tracked = TrackedLevel::with_key(table, key).context("Invalid level tracking settings")?;

        Ok(Self {
            database_url: args
                .database_url
                .clone()
                .unwrap_or_else(|| config.database.url.clone()),
            connection_timeout: config.database.connection_timeout,
            patch_dir: args
                .patch_dir
                .clone()
                .unwrap_or_else(|| config.patches.directory.clone()),
            tracked,
        })
    }

    fn options(&self) -> MigrateOptions {
        MigrateOptions::new(&self.patch_dir).with_tracked(self.tracked.clone())
    }
}

/// Levels are non-negative; reject anything else before doing any work
fn parse_level(level: i64) -> Result<u32> {
    u32::try_from(level).map_err(|_| {
        anyhow!(
            "--level must be a non-negative integer no larger than {}, got {}",
            u32::MAX,
            level
        )
    })
}

async fn open_connection(settings: &Settings) -> Result<Box<dyn Connection>> {
    let connect = patchy_core::connect(&settings.database_url);
    tokio::time::timeout(settings.connection_timeout, connect)
        .await
        .map_err(|_| {
            anyhow!(
                "Timed out after {}s connecting to the database",
                settings.connection_timeout.as_secs()
            )
        })?
        .context("Failed to connect to the database")
}

async fn migrate_command(settings: &Settings, level: u32) -> Result<()> {
    let mut conn = open_connection(settings).await?;
    let mut migrator = Migrator::new(&mut *conn, settings.options());

    match migrator.migrate(level).await {
        Ok(report) => {
            if report.steps_applied == 0 {
                println!("Already at level {}", report.reached);
            } else {
                println!(
                    "Migrated from level {} to level {} ({} steps, {} ms)",
                    report.from, report.reached, report.steps_applied, report.duration_ms
                );
            }
            Ok(())
        }
        Err(failure) => {
            if let Some(reached) = failure.reached {
                println!("Stopped at level {}", reached);
            }
            Err(anyhow::Error::new(failure)
                .context(format!("Migration to level {} did not complete", level)))
        }
    }
}

async fn plan_command(settings: &Settings, level: u32, json: bool) -> Result<()> {
    let mut conn = open_connection(settings).await?;
    let plan = Migrator::new(&mut *conn, settings.options())
        .plan(level)
        .await
        .context("Failed to plan migration")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn print_plan(plan: &MigrationPlan) {
    if plan.is_empty() {
        println!("Already at level {}, nothing to do", plan.current);
        return;
    }
    println!(
        "Level {} -> {}: {} step(s)",
        plan.current,
        plan.target,
        plan.len()
    );
    for step in &plan.steps {
        println!("  {}", step);
    }
}

async fn status_command(settings: &Settings, json: bool) -> Result<()> {
    let mut conn = open_connection(settings).await?;
    let status = Migrator::new(&mut *conn, settings.options())
        .status()
        .await
        .context("Failed to read status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status, &settings.tracked);
    }
    Ok(())
}

fn print_status(status: &Status, tracked: &TrackedLevel) {
    if status.tracking_table_exists {
        println!(
            "Tracked level: {} ({}.{})",
            status.level,
            tracked.table(),
            tracked.key()
        );
    } else {
        println!(
            "Tracked level: {} (table '{}' not created yet)",
            status.level,
            tracked.table()
        );
    }

    if status.patches.is_empty() {
        println!("No patches found");
        return;
    }
    println!("Patches:");
    for patch in &status.patches {
        let mark = |present: bool| if present { "yes" } else { "-" };
        println!(
            "  {:>5}  forward: {:<3}  reverse: {}",
            patch.level,
            mark(patch.forward),
            mark(patch.reverse)
        );
    }
}

fn handle_config_generate(output: Option<&PathBuf>, force: bool) -> Result<()> {
    let sample = PatchyConfig::generate_sample();
    match output {
        None => {
            print!("{}", sample);
            Ok(())
        }
        Some(path) => write_sample(path, &sample, force),
    }
}

fn write_sample(path: &Path, sample: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{:?} already exists, use --force to overwrite", path);
    }
    fs::write(path, sample).with_context(|| format!("Failed to write {:?}", path))?;
    info!("Wrote sample configuration to {:?}", path);
    Ok(())
}

fn handle_config_validate(config_file: &Path) -> Result<()> {
    ConfigLoader::new()
        .from_file(config_file)
        .with_context(|| format!("Invalid configuration in {:?}", config_file))?;
    println!("Configuration in {:?} is valid", config_file);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    init_tracing(cli.log_level.as_ref(), &config.logging)?;

    match &cli.command {
        Some(Commands::Migrate { level, target }) => {
            let level = parse_level(*level)?;
            let settings = Settings::resolve(&config, target)?;
            info!(level, dir = %settings.patch_dir.display(), "Patchy migrate");
            migrate_command(&settings, level).await
        }
        Some(Commands::Plan {
            level,
            target,
            json,
        }) => {
            let level = parse_level(*level)?;
            let settings = Settings::resolve(&config, target)?;
            plan_command(&settings, level, *json).await
        }
        Some(Commands::Status { target, json }) => {
            let settings = Settings::resolve(&config, target)?;
            status_command(&settings, *json).await
        }
        Some(Commands::Config { config_cmd }) => match config_cmd {
            ConfigCommands::Generate { output, force } => {
                handle_config_generate(output.as_ref(), *force)
            }
            ConfigCommands::Validate { config_file } => handle_config_validate(config_file),
        },
        None => {
            // If no subcommand is provided, print help
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            Ok(())
        }
    }
}

/// Whether the failure left the database needing manual inspection
fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<PatchError>()
            .is_some_and(PatchError::is_fatal)
    })
}

// One connection, strictly sequential steps
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if is_fatal(&err) {
                error!(error = %format!("{:#}", err), "Fatal error");
                eprintln!("Fatal: {:#}", err);
                ExitCode::from(EXIT_FATAL)
            } else {
                warn!(error = %format!("{:#}", err), "Command failed");
                eprintln!("Error: {:#}", err);
                ExitCode::FAILURE
            }
        }
    }
}
