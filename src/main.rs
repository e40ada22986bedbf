use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use schedsync::application::reconciler::Reconciler;
use schedsync::application::session::SessionProvider;
use schedsync::domain::models::RunReport;
use schedsync::domain::schedule::{expand, DateRange};
use schedsync::infrastructure::config;
use schedsync::infrastructure::calendar_client::ReqwestCalendarClient;
use schedsync::infrastructure::credential_store::{
    CredentialStore, KeyringCredentialStore, StoredToken,
};
use schedsync::infrastructure::error::SyncError;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schedsync", version, about = "Reconciles a declarative schedule against a remote calendar")]
struct Cli {
    /// Directory holding app.json and schedules.json
    #[arg(long, global = true, default_value = "./config")]
    config_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Expand a schedule set over a date range and apply it to the calendar
    Reconcile(ReconcileArgs),
    /// Manage the stored access token
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    /// Manage config files
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Args)]
struct ReconcileArgs {
    /// First date of the range (inclusive), YYYY-MM-DD
    #[arg(long)]
    from: NaiveDate,
    /// Last date of the range (inclusive), YYYY-MM-DD
    #[arg(long)]
    to: NaiveDate,
    /// Name of the schedule set to apply
    #[arg(long)]
    schedule: String,
    /// Calendar to write to; defaults to the configured one
    #[arg(long)]
    calendar: Option<String>,
    /// Print the run report as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Store an access token obtained elsewhere
    Set {
        #[arg(long)]
        access_token: String,
        /// Seconds until the token expires
        #[arg(long, default_value_t = 3600)]
        expires_in: i64,
        #[arg(long)]
        refresh_token: Option<String>,
    },
    /// Remove the stored token
    Clear,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write default config files if absent
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, SyncError> {
    match cli.command {
        Command::Reconcile(args) => reconcile(&cli.config_dir, args).await,
        Command::Auth { command } => {
            auth(command)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { command } => {
            match command {
                ConfigCommand::Init => {
                    let created = config::ensure_default_configs(&cli.config_dir)?;
                    if created.is_empty() {
                        println!("config files already present in {}", cli.config_dir.display());
                    } else {
                        for path in created {
                            println!("wrote {}", path.display());
                        }
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn reconcile(config_dir: &std::path::Path, args: ReconcileArgs) -> Result<ExitCode, SyncError> {
    let app_config = config::load_app_config(config_dir)?;
    let set = config::load_schedule_set(config_dir, &args.schedule)?;
    let range = DateRange::new(args.from, args.to).map_err(SyncError::InvalidPlan)?;
    let plan = expand(&range, &set).map_err(SyncError::InvalidPlan)?;

    let session = SessionProvider::new(Arc::new(KeyringCredentialStore::new()));
    let access_token = session.access_token()?;

    let client = ReqwestCalendarClient::new(Duration::from_secs(
        app_config.request_timeout_seconds,
    ))?;
    let calendar_id = args.calendar.as_deref().unwrap_or(&app_config.calendar_id);
    let reconciler = Reconciler::new(Arc::new(client), calendar_id);

    tracing::info!(
        schedule = %set.name,
        from = %args.from,
        to = %args.to,
        events = plan.len(),
        "starting reconciliation"
    );
    let report = reconciler.run(&access_token, &plan).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.has_failures() {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_report(report: &RunReport) {
    for entry in &report.entries {
        match entry.detail.as_deref() {
            Some(detail) => println!(
                "{}  {:<8}  {}  ({detail})",
                entry.date,
                format!("{}", entry.action),
                entry.title
            ),
            None => println!(
                "{}  {:<8}  {}",
                entry.date,
                format!("{}", entry.action),
                entry.title
            ),
        }
    }
    println!(
        "{} events: {} created, {} updated, {} replaced, {} skipped, {} failed",
        report.len(),
        report.count(schedsync::domain::models::Action::Created),
        report.count(schedsync::domain::models::Action::Updated),
        report.count(schedsync::domain::models::Action::Replaced),
        report.count(schedsync::domain::models::Action::Skipped),
        report.count(schedsync::domain::models::Action::Failed),
    );
}

fn auth(command: AuthCommand) -> Result<(), SyncError> {
    let store = KeyringCredentialStore::new();
    match command {
        AuthCommand::Set {
            access_token,
            expires_in,
            refresh_token,
        } => {
            if access_token.trim().is_empty() {
                return Err(SyncError::InvalidConfig(
                    "access token must not be empty".to_string(),
                ));
            }
            let token = StoredToken {
                access_token,
                refresh_token,
                expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
                scope: None,
            };
            store.save_token(&token)?;
            println!("token stored; valid until {}", token.expires_at.to_rfc3339());
        }
        AuthCommand::Clear => {
            store.delete_token()?;
            println!("stored token removed");
        }
    }
    Ok(())
}
