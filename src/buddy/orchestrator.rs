//! The Orchestrator main loop (§4.3). Grounded on the teacher's
//! `pipeline::coordinator::PipelineCoordinator::run` idiom: a consuming
//! `run(self)`, `tokio::select!` against a `CancellationToken`, and
//! `tokio::join!` to await every spawned worker at shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::buddy::adapters::manager::AdapterManager;
use crate::buddy::brain::{Brain, ShutdownReason};
use crate::buddy::queue::{FifoQueue, PriorityQueue};
use crate::buddy::router::Router;

/// How long the Orchestrator waits for an input event before running its
/// periodic timer checks (§4.3 step 3.1-3.2).
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a single adapter gets to join during shutdown before the
/// Orchestrator logs a warning and moves on (§10 "Cancellation and
/// shutdown").
const ADAPTER_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

pub struct Orchestrator {
    input_queue: Arc<PriorityQueue>,
    interrupt_queue: Arc<FifoQueue>,
    router: Arc<Router>,
    manager: Arc<AdapterManager>,
    brain: Arc<Brain>,
    running: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        input_queue: Arc<PriorityQueue>,
        interrupt_queue: Arc<FifoQueue>,
        router: Arc<Router>,
        manager: Arc<AdapterManager>,
        brain: Arc<Brain>,
    ) -> Self {
        Orchestrator {
            input_queue,
            interrupt_queue,
            router,
            manager,
            brain,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A clone-able handle callers (e.g. a signal handler) can use to
    /// request shutdown from outside the loop.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Run the main loop to completion. Consumes `self`, matching the
    /// teacher's consuming `run(mut self)` shape.
    pub async fn run(self) -> anyhow::Result<ShutdownReason> {
        let cancel = CancellationToken::new();

        self.manager.start_all().await?;
        let interrupt_handle = self.manager.clone().spawn_interrupt_worker(cancel.clone());

        // SIGINT/SIGTERM both flip the running flag and cancel the token
        // so the loop below and the interrupt worker exit together
        // (§4.3 step 2, §10 "Cancellation and shutdown").
        let signal_running = self.running.clone();
        let signal_cancel = cancel.clone();
        let signal_task = tokio::spawn(async move {
            wait_for_termination_signal().await;
            info!("termination signal received, shutting down");
            signal_running.store(false, Ordering::SeqCst);
            signal_cancel.cancel();
        });

        let reason = self.main_loop(&cancel).await;

        cancel.cancel();
        signal_task.abort();
        self.manager.stop_all().await;

        match tokio::time::timeout(ADAPTER_JOIN_TIMEOUT, interrupt_handle).await {
            Ok(join_result) => {
                if let Err(err) = join_result {
                    warn!(error = %err, "interrupt worker task panicked");
                }
            }
            Err(_) => warn!("interrupt worker did not stop within the join timeout"),
        }

        let stats = self.router.get_stats();
        info!(
            routed = stats.routed,
            dropped = stats.dropped,
            no_route = stats.no_route,
            "router statistics at shutdown"
        );

        Ok(reason)
    }

    async fn main_loop(&self, cancel: &CancellationToken) -> ShutdownReason {
        while self.running.load(Ordering::SeqCst) {
            if cancel.is_cancelled() {
                break;
            }

            let dequeued = self.input_queue.dequeue_timeout(DEQUEUE_TIMEOUT).await;
            let Some(event) = dequeued else {
                let (outputs, commands) = self.brain.tick();
                self.route_and_broadcast(outputs, commands).await;
                continue;
            };

            self.manager.handle(&event).await;
            let (outputs, commands) = self.brain.process(event).await;
            self.route_and_broadcast(outputs, commands).await;

            if let Some(reason) = self.brain.take_shutdown_request() {
                self.running.store(false, Ordering::SeqCst);
                return reason;
            }
        }
        ShutdownReason::Shutdown
    }

    async fn route_and_broadcast(
        &self,
        outputs: Vec<crate::buddy::event::Event>,
        commands: Vec<crate::buddy::event::AdapterCommand>,
    ) {
        for output in outputs {
            self.router.route(output);
        }
        for command in commands {
            self.manager.broadcast_command(command).await;
        }
    }

    /// Inject an interrupt (e.g. from a `ChannelAdapter`-style producer
    /// detecting barge-in) onto the interrupt queue.
    pub fn interrupt_queue(&self) -> Arc<FifoQueue> {
        self.interrupt_queue.clone()
    }

    pub fn input_queue(&self) -> Arc<PriorityQueue> {
        self.input_queue.clone()
    }
}

#[cfg(unix)]
async fn wait_for_termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buddy::brain::BrainConfig;
    use crate::buddy::event::{Event, EventContent, InputKind, Priority};
    use crate::buddy::llm::test_support::FakeLlmClient;
    use crate::buddy::llm::LlmClient;
    use crate::buddy::state::GlobalState;

    fn brain() -> Arc<Brain> {
        let factory = Arc::new(|| Ok(Arc::new(FakeLlmClient::new("ok")) as Arc<dyn LlmClient>));
        Arc::new(
            Brain::new(
                BrainConfig {
                    model_id: "m".into(),
                    system_instruction: "s".into(),
                    ..BrainConfig::default()
                },
                Arc::new(GlobalState::new()),
                factory,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn processes_a_shutdown_event_and_stops_the_loop() {
        let input_queue = Arc::new(PriorityQueue::new(8));
        let interrupt_queue = Arc::new(FifoQueue::new(8));
        let router = Arc::new(Router::new());
        let manager = Arc::new(AdapterManager::new(
            Vec::new(),
            Vec::new(),
            interrupt_queue.clone(),
            input_queue.clone(),
        ));
        let brain = brain();

        input_queue.offer(
            Event::input(InputKind::Shutdown, EventContent::Empty).with_priority(Priority::Critical),
        );

        let orchestrator = Orchestrator::new(input_queue, interrupt_queue, router, manager, brain);
        let cancel = CancellationToken::new();
        let reason = orchestrator.main_loop(&cancel).await;
        assert_eq!(reason, ShutdownReason::Shutdown);
    }
}
