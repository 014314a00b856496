//! Smart-bulb output adapter (§9.2). `LightOn`/`LightOff` target a named
//! bulb group via `event.content` (`"stanza"`, `"ingresso"`, or `"tutto"`,
//! defaulting to `"tutto"` when absent or not a string). A single transient
//! failure against the bulb controller gets one reconnect-and-retry before
//! the command is dropped.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buddy::adapters::traits::OutputAdapter;
use crate::buddy::event::{Event, OutputKind};
use crate::buddy::queue::PriorityQueue;
use crate::buddy::router::RouteTarget;

const DEFAULT_TARGET: &str = "tutto";

#[async_trait]
pub trait BulbController: Send + Sync {
    async fn set(&self, target: &str, on: bool) -> anyhow::Result<()>;
    async fn reconnect(&self) -> anyhow::Result<()>;
}

pub struct NoopBulbController;

#[async_trait]
impl BulbController for NoopBulbController {
    async fn set(&self, _target: &str, _on: bool) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

const HANDLED: &[OutputKind] = &[OutputKind::LightOn, OutputKind::LightOff];

pub struct BulbAdapter {
    id: &'static str,
    queue: Arc<PriorityQueue>,
    controller: Arc<dyn BulbController>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BulbAdapter {
    pub fn new(controller: Arc<dyn BulbController>) -> Self {
        BulbAdapter {
            id: "bulb",
            queue: Arc::new(PriorityQueue::new(32)),
            controller,
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }
}

impl RouteTarget for BulbAdapter {
    fn name(&self) -> &str {
        self.id
    }

    fn offer(&self, event: Event) -> bool {
        self.queue.offer(event)
    }
}

#[async_trait]
impl OutputAdapter for BulbAdapter {
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
        let controller = self.controller.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = queue.dequeue() => event,
                };
                let on = matches!(event.output_kind(), Some(OutputKind::LightOn));
                let target = event.content.as_text().unwrap_or(DEFAULT_TARGET).to_string();

                if let Err(e) = controller.set(&target, on).await {
                    warn!(error = %e, target = %target, "bulb command failed, attempting one reconnect");
                    if let Err(e) = controller.reconnect().await {
                        warn!(error = %e, "bulb reconnect failed, command dropped");
                        continue;
                    }
                    if let Err(e) = controller.set(&target, on).await {
                        warn!(error = %e, target = %target, "bulb command failed again after reconnect, dropped");
                    }
                }
            }
            debug!("bulb worker stopped");
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
