mod browser;
pub mod config;
mod jobs_cmd;
mod session;

use std::io::IsTerminal;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use clap::Parser;
use kala_jobs_client::JobsClient;
use kala_session::IdentityProvider;
use tracing_subscriber::EnvFilter;

pub use browser::LoopbackBrowser;
pub use jobs_cmd::JobsCli;
pub use jobs_cmd::JobsSubcommand;

use crate::config::CONFIG_FILE;
use crate::config::CliConfigOverrides;
use crate::config::KalaConfig;
use crate::config::find_kala_home;
use crate::session::Session;
use crate::session::http_client;

/// Exit code for configuration that cannot be read, parsed or validated.
pub const EXIT_CODE_INVALID_CONFIG: i32 = 3;

const DEFAULT_LOG_FILTER: &str = "warn";

/// Sign in to a Kala scheduler and manage its jobs.
#[derive(Debug, Parser)]
#[command(name = "kala", version)]
pub struct Cli {
    #[clap(flatten)]
    pub config_overrides: CliConfigOverrides,

    /// Path to the configuration file [default: $KALA_HOME/config.toml].
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Sign in through the identity provider.
    Login(LoginArgs),

    /// Forget the stored session.
    Logout,

    /// Show whether a session is stored.
    Status(StatusArgs),

    /// Manage jobs.
    Jobs(JobsCli),

    /// Show service-wide scheduler metrics.
    Metrics,
}

#[derive(Debug, clap::Parser)]
pub struct LoginArgs {
    /// Print the sign-in URL instead of opening a browser.
    #[arg(long)]
    pub no_browser: bool,
}

#[derive(Debug, clap::Parser)]
pub struct StatusArgs {
    /// Output the session state as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Logs go to stderr, filtered by `RUST_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}

struct LoadedConfig {
    config: KalaConfig,
    kala_home: PathBuf,
}

fn load_config(cli: &Cli) -> Result<LoadedConfig> {
    let kala_home = find_kala_home().context("failed to resolve KALA_HOME")?;
    let path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| kala_home.join(CONFIG_FILE));
    let overrides = cli.config_overrides.parse_overrides()?;
    let config = KalaConfig::load(&path, &overrides)?;
    Ok(LoadedConfig { config, kala_home })
}

pub async fn run_main(cli: Cli) -> Result<()> {
    let LoadedConfig { config, kala_home } = load_config(&cli)?;

    match cli.command {
        Command::Login(args) => {
            let session = Session::new(&config, &kala_home, !args.no_browser)?;
            session.sign_in().await?;
            println!("{}", describe(&session.controller.auth_state()));
        }
        Command::Logout => {
            let session = Session::new(&config, &kala_home, false)?;
            let signed_in = session.stored_state().is_authenticated;
            session.provider.clear_tokens()?;
            if signed_in {
                println!("Signed out.");
            } else {
                println!("Not signed in.");
            }
        }
        Command::Status(args) => {
            let session = Session::new(&config, &kala_home, false)?;
            let state = session.stored_state();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                println!("{}", describe(&state));
            }
        }
        Command::Jobs(jobs) => {
            let client = signed_in_client(&config, &kala_home).await?;
            jobs.run(&client).await?;
        }
        Command::Metrics => {
            let client = signed_in_client(&config, &kala_home).await?;
            let stats = client
                .metrics()
                .await
                .ok_or_else(|| anyhow!("failed to fetch metrics"))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

async fn signed_in_client(config: &KalaConfig, kala_home: &Path) -> Result<JobsClient> {
    let session = Session::new(config, kala_home, true)?;
    session.sign_in().await?;
    let mut client = JobsClient::new(config.api_origin(), session.controller.clone());
    if let Some(timeout) = config.request_timeout() {
        client = client.with_http_client(http_client(timeout)?);
    }
    Ok(client)
}

fn describe(state: &kala_session::AuthState) -> String {
    let status = state.status();
    match state.id_token.as_ref().and_then(|claims| claims.email.as_deref()) {
        Some(email) => format!("{status} as {email}"),
        None => status.to_string(),
    }
}
