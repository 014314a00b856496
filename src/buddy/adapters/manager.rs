//! The Adapter Manager (§4.2): adapter lifecycle, synchronous command
//! derivation/broadcast, and the dedicated interrupt worker.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::buddy::adapters::traits::{InputAdapter, OutputAdapter};
use crate::buddy::event::{AdapterCommand, Event, EventKind, InputKind, Priority};
use crate::buddy::queue::{FifoQueue, PriorityQueue};

/// Adapter-command derivation rules required of every conforming
/// implementation (§4.2): these run synchronously, before the Brain ever
/// sees the event.
fn derive_commands(event: &Event) -> Vec<AdapterCommand> {
    match event.input_kind() {
        Some(InputKind::Wakeword) => vec![
            AdapterCommand::WakewordListenStop,
            AdapterCommand::VoiceInputStart,
        ],
        Some(InputKind::ConversationEnd) => vec![AdapterCommand::WakewordListenStart],
        _ => Vec::new(),
    }
}

pub struct AdapterManager {
    input_adapters: Vec<Arc<dyn InputAdapter>>,
    output_adapters: Vec<Arc<dyn OutputAdapter>>,
    interrupt_queue: Arc<FifoQueue>,
    input_queue: Arc<PriorityQueue>,
}

impl AdapterManager {
    pub fn new(
        input_adapters: Vec<Arc<dyn InputAdapter>>,
        output_adapters: Vec<Arc<dyn OutputAdapter>>,
        interrupt_queue: Arc<FifoQueue>,
        input_queue: Arc<PriorityQueue>,
    ) -> Self {
        AdapterManager {
            input_adapters,
            output_adapters,
            interrupt_queue,
            input_queue,
        }
    }

    pub fn output_adapters(&self) -> &[Arc<dyn OutputAdapter>] {
        &self.output_adapters
    }

    /// Start outputs before inputs (§4.3 step 1) so consumers are ready to
    /// receive before producers can possibly emit anything.
    pub async fn start_all(&self) -> anyhow::Result<()> {
        for adapter in &self.output_adapters {
            info!(adapter = adapter.id(), "starting output adapter");
            adapter.start().await?;
        }
        for adapter in &self.input_adapters {
            info!(adapter = adapter.id(), "starting input adapter");
            adapter.start(self.input_queue.clone()).await?;
        }
        Ok(())
    }

    /// Stop in reverse order (§4.2).
    pub async fn stop_all(&self) {
        for adapter in &self.input_adapters {
            if let Err(err) = adapter.stop().await {
                warn!(adapter = adapter.id(), error = %err, "input adapter failed to stop cleanly");
            }
        }
        for adapter in &self.output_adapters {
            if let Err(err) = adapter.stop().await {
                warn!(adapter = adapter.id(), error = %err, "output adapter failed to stop cleanly");
            }
        }
    }

    /// Derive and synchronously broadcast the adapter commands implied by
    /// one input event (§4.2). Called by the Orchestrator before the
    /// Brain processes the same event.
    pub async fn handle(&self, event: &Event) {
        for cmd in derive_commands(event) {
            self.broadcast_command(cmd).await;
        }
    }

    /// Broadcast one command to every input and output adapter. Commands
    /// are advisory and best-effort; a `false` return from an adapter is
    /// not an error.
    pub async fn broadcast_command(&self, cmd: AdapterCommand) {
        for adapter in &self.input_adapters {
            adapter.handle_command(cmd).await;
        }
        for adapter in &self.output_adapters {
            adapter.handle_command(cmd).await;
        }
    }

    /// Spawn the dedicated interrupt worker (§4.2). On each interrupt it
    /// stops ongoing voice output and re-injects the interruption content
    /// as a high-priority `UserSpeech` input.
    pub fn spawn_interrupt_worker(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = self.interrupt_queue.dequeue() => {
                        self.broadcast_command(AdapterCommand::VoiceOutputStop).await;
                        let mut reinjected = event;
                        reinjected.kind = EventKind::Input(InputKind::UserSpeech);
                        reinjected.priority = Priority::High;
                        if !self.input_queue.offer(reinjected) {
                            warn!("input queue full, dropped re-injected interrupt content");
                        }
                    }
                }
            }
            info!("interrupt worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buddy::event::{EventContent, InputKind};

    #[test]
    fn wakeword_derives_stop_listen_then_start_input() {
        let event = Event::input(InputKind::Wakeword, EventContent::Empty);
        let commands = derive_commands(&event);
        assert_eq!(
            commands,
            vec![AdapterCommand::WakewordListenStop, AdapterCommand::VoiceInputStart]
        );
    }

    #[test]
    fn conversation_end_derives_listen_start() {
        let event = Event::input(InputKind::ConversationEnd, EventContent::Empty);
        assert_eq!(derive_commands(&event), vec![AdapterCommand::WakewordListenStart]);
    }

    #[test]
    fn unrelated_kinds_derive_nothing() {
        let event = Event::input(InputKind::SensorMovement, EventContent::Bool(true));
        assert!(derive_commands(&event).is_empty());
    }

    #[tokio::test]
    async fn interrupt_worker_reinjects_as_high_priority_user_speech() {
        let interrupt_queue = Arc::new(FifoQueue::new(4));
        let input_queue = Arc::new(PriorityQueue::new(4));
        let manager = Arc::new(AdapterManager::new(
            Vec::new(),
            Vec::new(),
            interrupt_queue.clone(),
            input_queue.clone(),
        ));
        let cancel = CancellationToken::new();
        let handle = manager.clone().spawn_interrupt_worker(cancel.clone());

        let interrupt = Event::input(InputKind::Interrupt, EventContent::Text("stop".into()));
        interrupt_queue.offer(interrupt);

        let reinjected = input_queue
            .dequeue_timeout(std::time::Duration::from_secs(1))
            .await
            .expect("interrupt should have been reinjected");
        assert_eq!(reinjected.input_kind(), Some(InputKind::UserSpeech));
        assert_eq!(reinjected.priority, Priority::High);
        assert_eq!(reinjected.content.as_text(), Some("stop"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
