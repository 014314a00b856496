//! FIFO output bridge (§6, §9.2). Serializes every output event as one
//! JSON line to a named pipe. Writes are best-effort: with no reader
//! attached, opening or writing the pipe fails (`ENXIO` on Linux for a
//! FIFO with no open reader) and the event is silently dropped rather than
//! blocking the adapter or retrying forever.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use std::sync::Arc;

use crate::buddy::adapters::traits::OutputAdapter;
use crate::buddy::event::{Event, OutputKind, OutputWireFrame};
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

pub struct PipeOutAdapter {
    id: &'static str,
    path: PathBuf,
    queue: Arc<PriorityQueue>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PipeOutAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PipeOutAdapter {
            id: "pipe_out",
            path: path.into(),
            queue: Arc::new(PriorityQueue::new(256)),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }
}

impl RouteTarget for PipeOutAdapter {
    fn name(&self) -> &str {
        self.id
    }

    fn offer(&self, event: Event) -> bool {
        self.queue.offer(event)
    }
}

#[async_trait]
impl OutputAdapter for PipeOutAdapter {
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
        let path = self.path.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = queue.dequeue() => event,
                };
                let Some(frame) = OutputWireFrame::from_event(&event) else {
                    trace!("pipe-out received a non-output event; dropped");
                    continue;
                };
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        trace!(error = %e, "failed to serialize output event, dropped");
                        continue;
                    }
                };
                match tokio::fs::OpenOptions::new().write(true).open(&path).await {
                    Ok(mut file) => {
                        let mut line = json;
                        line.push('\n');
                        if let Err(e) = file.write_all(line.as_bytes()).await {
                            trace!(error = %e, "pipe-out write failed, dropped (no reader attached?)");
                        }
                    }
                    Err(e) => {
                        trace!(error = %e, "pipe-out open failed, dropped (no reader attached?)");
                    }
                }
            }
            debug!("pipe-out worker stopped");
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
