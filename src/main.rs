// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use drydock_bridge::server::BridgeState;
use drydock_bridge::{McpPromptFetcher, PromptCache, RuntimeCache, SessionStore};
use drydock_config::Config;
use drydock_mcp::http::HttpState;
use drydock_mcp::ToolServerHandler;
use drydock_sandbox::{ContainerFs, ContainerManager};
use drydock_skills::SkillRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = drydock_config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Tools { listen } => run_tools(config, listen).await,
        Commands::Bridge { listen } => run_bridge(config, listen).await,
        Commands::Skills => list_skills(&config),
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Resolve the skills root: configured path, or `./skills` as a best-effort
/// default for local runs.
fn skills_root(config: &Config) -> String {
    config
        .executor
        .skills_path
        .clone()
        .unwrap_or_else(|| "./skills".to_string())
}

// ── Tool server ───────────────────────────────────────────────────────────────

async fn run_tools(config: Config, listen: Option<String>) -> anyhow::Result<()> {
    let listen = listen.unwrap_or_else(|| config.server.tools_listen.clone());

    let manager = Arc::new(
        ContainerManager::connect(config.executor.clone())
            .await
            .context("connecting to the docker daemon")?,
    );
    manager.sweep_orphans().await;

    let skills = Arc::new(SkillRegistry::new(skills_root(&config)));
    info!(count = skills.skills().len(), "skills discovered");

    let registry = Arc::new(drydock_mcp::build_registry(manager.clone()));
    let handler = ToolServerHandler::new(registry, skills.clone());

    let state = HttpState {
        fs: Arc::new(ContainerFs::new(manager.clone())),
        manager: manager.clone(),
        skills,
        service_name: "drydock-tools".to_string(),
    };

    // Containers are removed on ctrl-c / SIGTERM before the process exits.
    let result = tokio::select! {
        r = drydock_mcp::http::serve(&listen, state, handler) => r,
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
    };
    manager.release_all().await;
    result
}

// ── Bridge ────────────────────────────────────────────────────────────────────

async fn run_bridge(config: Config, listen: Option<String>) -> anyhow::Result<()> {
    let listen = listen.unwrap_or_else(|| config.server.bridge_listen.clone());

    let model: Arc<dyn drydock_model::ModelProvider> =
        Arc::from(drydock_model::from_config(&config.model)?);
    info!(provider = model.name(), model = model.model_name(), "model client ready");

    let prompt_cache = Arc::new(PromptCache::new(
        Box::new(McpPromptFetcher::new(config.server.mcp_url.clone())),
        Duration::from_secs(config.agent.prompt_cache_ttl_secs),
    ));

    let session_timeout = Duration::from_secs(config.agent.session_timeout_secs);
    let state = BridgeState {
        sessions: Arc::new(SessionStore::new(session_timeout)),
        runtimes: Arc::new(RuntimeCache::new(
            model,
            prompt_cache.clone(),
            config.server.mcp_url.clone(),
            config.agent.max_turns,
        )),
        prompt_cache,
        service_name: config.agent.name.clone(),
        model_id: config.agent.default_model.clone(),
    };

    tokio::select! {
        r = drydock_bridge::server::serve(&listen, state, session_timeout) => r,
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}

// ── Skills listing ────────────────────────────────────────────────────────────

fn list_skills(config: &Config) -> anyhow::Result<()> {
    let root = skills_root(config);
    let registry = SkillRegistry::new(&root);
    let skills = registry.skills();
    if skills.is_empty() {
        warn!(root = %root, "no skills found");
        return Ok(());
    }
    for skill in skills.iter() {
        let version = skill.version.as_deref().unwrap_or("-");
        println!("{:<24} {:<10} {}", skill.id, version, skill.description);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
