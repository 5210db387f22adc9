use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobops_server::background_jobs::jobs::{
    ChangelogCleanupJob, OverdueSweepJob, ReminderSweepJob,
};
use jobops_server::background_jobs::{JobContext, JobScheduler};
use jobops_server::config::{AppConfig, CliConfig, FileConfig};
use jobops_server::notifications::{LogNotifier, Notifier};
use jobops_server::ops::{OpsStore, SqliteOpsStore, WorkflowEngine};
use jobops_server::server::{run_server, RequestsLoggingLevel, ServerConfig};
use jobops_server::user::{
    SqliteUserStore, UserRole, UserStore, UsernamePasswordCredentials,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the SQLite database files (user.db and ops.db).
    #[clap(value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values there override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Number of days to retain job change-log entries. Set to 0 to disable cleanup.
    #[clap(long, default_value_t = 90)]
    pub changelog_retention_days: u64,

    /// Create an admin account at startup, given as "username:password".
    /// Ignored if the username already exists.
    #[clap(long)]
    pub bootstrap_admin: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        port: cli_args.port,
        logging_level: cli_args.logging_level.clone(),
        changelog_retention_days: cli_args.changelog_retention_days,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening user database at {:?}...", config.user_db_path());
    let user_store = Arc::new(SqliteUserStore::new(config.user_db_path())?);

    info!("Opening ops database at {:?}...", config.ops_db_path());
    let ops_store = Arc::new(SqliteOpsStore::new(config.ops_db_path())?);

    if let Some(spec) = &cli_args.bootstrap_admin {
        let (username, password) = spec
            .split_once(':')
            .context("--bootstrap-admin must be given as username:password")?;
        match user_store.get_user_by_username(username)? {
            Some(_) => info!("Bootstrap admin {} already exists", username),
            None => {
                let user_id = user_store.create_user(username, UserRole::Admin)?;
                let credentials =
                    UsernamePasswordCredentials::from_plain_password(user_id, password)?;
                user_store.set_password_credentials(&credentials)?;
                info!("Created bootstrap admin account {}", username);
            }
        }
    }

    let notifier = Arc::new(LogNotifier) as Arc<dyn Notifier>;
    let workflow = Arc::new(WorkflowEngine::new(
        ops_store.clone() as Arc<dyn OpsStore>,
        user_store.clone() as Arc<dyn UserStore>,
        notifier.clone(),
    ));

    let shutdown_token = CancellationToken::new();
    {
        let token = shutdown_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down...");
                token.cancel();
            }
        });
    }

    let job_context = JobContext::new(
        shutdown_token.clone(),
        ops_store.clone(),
        user_store.clone(),
        workflow.clone(),
        notifier,
    );
    let mut scheduler = JobScheduler::new(ops_store.clone(), shutdown_token.clone(), job_context);
    scheduler.register_job(Arc::new(OverdueSweepJob));
    scheduler.register_job(Arc::new(ReminderSweepJob));
    if config.changelog_retention_days > 0 {
        scheduler.register_job(Arc::new(ChangelogCleanupJob::new(
            config.changelog_retention_days,
        )));
    }
    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
    };

    info!("Ready to serve at port {}!", config.port);
    run_server(
        server_config,
        workflow,
        user_store,
        shutdown_token.clone(),
    )
    .await?;

    shutdown_token.cancel();
    let _ = scheduler_handle.await;
    Ok(())
}
