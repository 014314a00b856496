//! Catch-all development logging adapter (§9.2). Subscribes to every
//! output kind and logs each event at `info`; useful for running the
//! orchestrator with no real hardware attached.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::buddy::adapters::traits::OutputAdapter;
use crate::buddy::event::{Event, OutputKind};
use crate::buddy::queue::PriorityQueue;
use crate::buddy::router::RouteTarget;

const HANDLED: &[OutputKind] = &[
    OutputKind::Speak,
    OutputKind::LedControl,
    OutputKind::SaveHistory,
    OutputKind::SaveMemory,
    OutputKind::DistillMemory,
    OutputKind::LightOn,
    OutputKind::LightOff,
];

pub struct ConsoleAdapter {
    id: &'static str,
    queue: Arc<PriorityQueue>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleAdapter {
    pub fn new() -> Self {
        ConsoleAdapter {
            id: "console",
            queue: Arc::new(PriorityQueue::new(256)),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }
}

impl Default for ConsoleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTarget for ConsoleAdapter {
    fn name(&self) -> &str {
        self.id
    }

    fn offer(&self, event: Event) -> bool {
        self.queue.offer(event)
    }
}

#[async_trait]
impl OutputAdapter for ConsoleAdapter {
    fn id(&self) -> &'static str {
        self.id
    }

    fn handled_kinds(&self) -> &'static [OutputKind] {
        HANDLED
    }

    async fn start(&self) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel mutex poisoned") = Some(cancel.clone());

        let queue = self.queue.clone();
        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = queue.dequeue() => event,
                };
                info!(kind = ?event.kind, priority = ?event.priority, content = ?event.content, "output event");
            }
            debug!("console worker stopped");
        });

        *self.task.lock().expect("task mutex poisoned") = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(cancel) = self.cancel.lock().expect("cancel mutex poisoned").take() {
            cancel.cancel();
        }
        if let Some(handle) = self.task.lock().expect("task mutex poisoned").take() {
            handle.await.ok();
        }
        Ok(())
    }
}
