//! Gantry CLI
//!
//! Command-line entry point for the runner lifecycle orchestrator.
//!
//! `gantry start` registers an ephemeral runner (with retries) and starts
//! its container; `gantry stop` unregisters and tears the container down,
//! discovering it by name when the process holds no state. Exit codes:
//! 0 success, 1 orchestration failure, 2 usage error.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gantry_runner::{
    ContainerRunnerService, OrchestrateError, REPOSITORY_ENV, RetryPolicy, RunnerConfig,
    RunnerManager,
};
use gantry_runtime::{DockerRuntime, endpoint};

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Self-hosted CI runner lifecycle orchestrator", long_about = None)]
struct Cli {
    /// Container runtime endpoint override
    #[arg(long, env = "DOCKER_HOST", global = true)]
    docker_host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an ephemeral runner and start its container
    Start {
        /// Target repository as owner/repo
        #[arg(long, env = "GITHUB_REPOSITORY")]
        repo: Option<String>,

        /// Registration token for the repository
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Base URL of the CI service
        #[arg(long, env = "GITHUB_URL", default_value = "https://github.com")]
        url: String,

        /// Registration attempts before giving up
        #[arg(long, default_value_t = 5)]
        max_retries: u32,

        /// Base delay between registration attempts, in milliseconds
        #[arg(long, default_value_t = 200)]
        retry_delay_ms: u64,
    },

    /// Unregister the runner and stop its container
    Stop,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; cancelling");
                cancel.cancel();
            }
        });
    }

    let config = RunnerConfig::from_env();
    if let Err(e) = config.validate() {
        eprintln!("{}", format!("Invalid configuration: {e}").red());
        return ExitCode::from(2);
    }

    match cli.command {
        Commands::Start {
            repo,
            token,
            url,
            max_retries,
            retry_delay_ms,
        } => {
            let Some(repo) = repo else {
                eprintln!("Missing repository (use --repo or set {REPOSITORY_ENV})");
                return ExitCode::from(2);
            };
            let Some(token) = token else {
                eprintln!("Missing registration token (use --token or set GITHUB_TOKEN)");
                return ExitCode::from(2);
            };

            let retry = RetryPolicy {
                max_retries,
                base_delay: std::time::Duration::from_millis(retry_delay_ms),
            };
            start(cli.docker_host, config, repo, token, url, retry, cancel).await
        }
        Commands::Stop => stop(cli.docker_host, config).await,
    }
}

async fn start(
    docker_host: Option<String>,
    config: RunnerConfig,
    repo: String,
    token: String,
    url: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
) -> ExitCode {
    info!(
        "start: repo={}, url={}, token={}",
        repo,
        url,
        mask_token(&token)
    );

    let Some(runtime) = connect(docker_host).await else {
        return ExitCode::from(1);
    };

    let service = ContainerRunnerService::new(runtime, config);
    let mut manager = RunnerManager::new(service);

    let env = vec![
        format!("{REPOSITORY_ENV}={repo}"),
        format!("GITHUB_URL={url}"),
    ];

    match manager
        .orchestrate_start(&token, &repo, &url, &env, retry, &cancel)
        .await
    {
        Ok(true) => {
            println!("{}", "Runner registered and started".green().bold());
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("{}", "Orchestration failed".red().bold());
            ExitCode::from(1)
        }
        Err(e @ (OrchestrateError::InvalidRetries(_) | OrchestrateError::MissingRepositoryVar)) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
        Err(OrchestrateError::Cancelled) => {
            println!("{}", "Cancelled".yellow().bold());
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("{}", format!("Orchestration error: {e:#}").red());
            ExitCode::from(1)
        }
    }
}

async fn stop(docker_host: Option<String>, config: RunnerConfig) -> ExitCode {
    let Some(runtime) = connect(docker_host).await else {
        return ExitCode::from(1);
    };

    let mut service = ContainerRunnerService::new(runtime, config);

    // A fresh process holds no registration; look for a leftover runner
    // container by name before orchestrating teardown.
    match service.adopt_container().await {
        Ok(true) => {}
        Ok(false) => info!("No runner container found; nothing to stop"),
        Err(e) => warn!("Container discovery failed: {:#}", e),
    }

    let mut manager = RunnerManager::new(service);
    match manager.orchestrate_stop().await {
        Ok(true) => {
            println!("{}", "Runner stopped".green().bold());
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("{}", "Stop failed".red().bold());
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("{}", format!("Stop error: {e:#}").red());
            ExitCode::from(1)
        }
    }
}

async fn connect(docker_host: Option<String>) -> Option<DockerRuntime> {
    match endpoint::resolve(docker_host.as_deref()).await {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            eprintln!(
                "{}",
                format!("Could not reach the container runtime: {e}").red()
            );
            None
        }
    }
}

/// Masks a token for display: first and last four characters survive
fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 8))
}
