//! Binary entry point. Parses CLI flags, loads configuration, boots the
//! [`agent_runtime::runtime::Runtime`], and runs until a shutdown signal.
//!
//! This binary wires up only the reference/demo providers the crate ships
//! ([`agent_runtime::models::ReferenceTextProvider`],
//! [`agent_runtime::memory::InMemoryProvider`]) — a real deployment embeds
//! this crate as a library and supplies its own model providers, memory
//! backend, and plugins via [`agent_runtime::runtime::Runtime::bootstrap`].

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use agent_runtime::cli::Cli;
use agent_runtime::config::Config;
use agent_runtime::memory::InMemoryProvider;
use agent_runtime::models::ReferenceTextProvider;
use agent_runtime::runtime::Runtime;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }

    // The loaded configuration's `logger` section is authoritative; CLI
    // flags/env vars only override it when explicitly set (spec.md:232).
    let log_level = cli.log_level.clone().unwrap_or_else(|| config.logger.level.clone());
    let log_format = cli.log_format.clone().unwrap_or_else(|| config.logger.format.clone());
    if let Err(e) = agent_runtime::setup_tracing(&log_level, Some(&log_format)) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "agent-runtime exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: Config) -> agent_runtime::Result<()> {
    let memory = InMemoryProvider::new();
    let model_providers: Vec<Arc<dyn agent_runtime::models::ModelProvider>> = vec![Arc::new(ReferenceTextProvider::new())];

    let runtime = Runtime::bootstrap(config, model_providers, memory, Vec::new(), &cli.templates_dir).await?;
    runtime.run_until_shutdown().await
}
