//! CLI entry point for the buddy orchestration core.
//!
//! Reads `BUDDY_CONFIG` (or the platform default under `BUDDY_HOME`),
//! builds every collaborator, and runs the Orchestrator to completion.
//! All tracing output goes to stderr; this binary has no stdout protocol
//! of its own (adapters that need one talk over named pipes, §6).

use std::sync::Arc;

use anyhow::Context;

use fae::buddy::adapters::factory::{self, InputDeps, OutputDeps};
use fae::buddy::adapters::manager::AdapterManager;
use fae::buddy::adapters::output::PersistenceStore;
use fae::buddy::audio_coordinator::AudioDeviceCoordinator;
use fae::buddy::brain::{Brain, BrainConfig, ShutdownReason};
use fae::buddy::config::BuddyConfig;
use fae::buddy::dirs;
use fae::buddy::llm::{HttpLlmClient, LlmClient, SessionInitError};
use fae::buddy::orchestrator::Orchestrator;
use fae::buddy::queue::{FifoQueue, PriorityQueue};
use fae::buddy::router::Router;
use fae::buddy::state::GlobalState;

fn brain_config_from(config: &BuddyConfig) -> BrainConfig {
    BrainConfig {
        model_id: config.brain.model_id.clone(),
        system_instruction: config.brain.system_instruction.clone(),
        temperature: config.brain.temperature,
        archivist_interval_seconds: config.brain.archivist_interval,
        light_off_timeout_seconds: config.brain.light_off_timeout,
        ..BrainConfig::default()
    }
}

/// Builds a fresh `HttpLlmClient` session from configuration and the
/// `BUDDY_LLM_BASE_URL`/`BUDDY_LLM_API_KEY` environment variables (§5.4).
/// The base URL is required (`Configuration`); a missing API key is only
/// `Transient` since some self-hosted gateways don't need one.
fn make_session_factory(
    config: &BuddyConfig,
) -> Arc<dyn Fn() -> Result<Arc<dyn LlmClient>, SessionInitError> + Send + Sync> {
    let model_id = config.brain.model_id.clone();
    let system_instruction = config.brain.system_instruction.clone();
    let temperature = config.brain.temperature;

    Arc::new(move || {
        let base_url = std::env::var("BUDDY_LLM_BASE_URL").map_err(|_| {
            SessionInitError::Configuration("BUDDY_LLM_BASE_URL is not set".to_string())
        })?;
        let api_key = std::env::var("BUDDY_LLM_API_KEY").map_err(|_| {
            SessionInitError::Transient("BUDDY_LLM_API_KEY is not set".to_string())
        })?;
        let client: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(
            base_url,
            api_key,
            model_id.clone(),
            system_instruction.clone(),
            temperature,
        ));
        Ok(client)
    })
}

async fn run() -> anyhow::Result<ShutdownReason> {
    let config_path = BuddyConfig::default_config_path();
    let config = BuddyConfig::from_file(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let global_state = Arc::new(GlobalState::new());
    let audio_coordinator = Arc::new(AudioDeviceCoordinator::new());

    let persistence_root = dirs::resolve(std::path::Path::new("memory"));
    let persistence_store = Arc::new(PersistenceStore::open(&persistence_root));
    if persistence_store.is_degraded() {
        tracing::warn!("persistence store is running in degraded (no-op) mode");
    }

    let brain_config = brain_config_from(&config);
    let session_factory = make_session_factory(&config);
    let brain = Arc::new(Brain::new(brain_config, global_state.clone(), session_factory)?);

    let router = Arc::new(Router::new());

    let llm_for_distiller = build_distiller_llm_client(&config)?;

    let output_deps = OutputDeps {
        audio_coordinator: audio_coordinator.clone(),
        persistence_store: persistence_store.clone(),
        llm: llm_for_distiller,
    };
    let output_adapters = factory::build_output_adapters(&config.adapters.output, &output_deps, &router)?;

    let input_deps = InputDeps {
        audio_coordinator: audio_coordinator.clone(),
        global_state: global_state.clone(),
    };
    let input_adapters = factory::build_input_adapters(&config.adapters.input, &input_deps)?;

    let input_queue = Arc::new(PriorityQueue::new(config.queues.input_maxsize));
    let interrupt_queue = Arc::new(FifoQueue::new(config.queues.interrupt_maxsize));

    let manager = Arc::new(AdapterManager::new(
        input_adapters,
        output_adapters,
        interrupt_queue.clone(),
        input_queue.clone(),
    ));

    let orchestrator = Orchestrator::new(input_queue, interrupt_queue, router, manager, brain);
    orchestrator.run().await.context("orchestrator run failed")
}

/// The distiller's LLM handle is a plain `Arc<dyn LlmClient>`, independent
/// of the Brain's own session lifecycle (it never resets or degrades) --
/// built directly rather than through `SessionInitError` plumbing.
fn build_distiller_llm_client(config: &BuddyConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    let base_url = std::env::var("BUDDY_LLM_BASE_URL")
        .context("BUDDY_LLM_BASE_URL must be set for the distiller's LLM client")?;
    let api_key = std::env::var("BUDDY_LLM_API_KEY").unwrap_or_default();
    Ok(Arc::new(HttpLlmClient::new(
        base_url,
        api_key,
        config.brain.model_id.clone(),
        config.brain.system_instruction.clone(),
        config.brain.temperature,
    )))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    let reason = runtime.block_on(run());

    match reason {
        Ok(ShutdownReason::Shutdown) => {
            tracing::info!("buddy-host shut down cleanly");
            Ok(())
        }
        Ok(ShutdownReason::Restart) => {
            tracing::info!("buddy-host restarting");
            let exe = std::env::current_exe().context("resolving current executable for restart")?;
            let err = exec_replace(&exe);
            Err(anyhow::anyhow!("failed to re-exec for restart: {err}"))
        }
        Err(err) => {
            tracing::error!(error = %err, "buddy-host exited with error");
            Err(err)
        }
    }
}

#[cfg(unix)]
fn exec_replace(exe: &std::path::Path) -> std::io::Error {
    use std::os::unix::process::CommandExt;
    std::process::Command::new(exe).args(std::env::args().skip(1)).exec()
}

#[cfg(not(unix))]
fn exec_replace(exe: &std::path::Path) -> std::io::Error {
    match std::process::Command::new(exe)
        .args(std::env::args().skip(1))
        .status()
    {
        Ok(status) => {
            std::process::exit(status.code().unwrap_or(1));
        }
        Err(err) => err,
    }
}
