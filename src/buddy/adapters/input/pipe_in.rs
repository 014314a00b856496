//! FIFO input bridge (§6, §9.1). Reads newline-delimited JSON events from a
//! named pipe and offers each onto the input queue, mirroring the pattern
//! in the stdio command bridge: one diagnostic line logged and dropped per
//! malformed frame, the read loop never stops because of it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buddy::adapters::traits::InputAdapter;
use crate::buddy::event::{AdapterCommand, DirectOutputSpec, Event, EventContent, InputKind};
use crate::buddy::queue::PriorityQueue;

pub struct PipeInAdapter {
    id: &'static str,
    path: PathBuf,
    paused: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PipeInAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PipeInAdapter {
            id: "pipe_in",
            path: path.into(),
            paused: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Parse one line of the protocol into an event, special-casing
    /// `direct_output`: its payload is itself an output event and is
    /// carried, not unwrapped -- unwrapping a `DirectOutput` event is the
    /// Brain's job (§4.4), not the reader's.
    fn parse_line(line: &str) -> Result<Event, serde_json::Error> {
        #[derive(serde::Deserialize)]
        struct Frame {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            content: serde_json::Value,
            #[serde(default)]
            metadata: std::collections::HashMap<String, serde_json::Value>,
        }

        let frame: Frame = serde_json::from_str(line)?;
        if frame.kind == "direct_output" {
            let spec: DirectOutputSpec = serde_json::from_value(frame.content)?;
            let output = spec
                .into_event()
                .map_err(|e| serde::de::Error::custom(e.to_string()))?;
            let mut event = Event::input(InputKind::DirectOutput, EventContent::Output(Box::new(output)));
            event.metadata = frame.metadata;
            event.source = Some("pipe_in".to_string());
            return Ok(event);
        }

        let kind = match frame.kind.as_str() {
            "user_speech" => InputKind::UserSpeech,
            "wakeword" => InputKind::Wakeword,
            "conversation_end" => InputKind::ConversationEnd,
            "interrupt" => InputKind::Interrupt,
            "sensor_presence" => InputKind::SensorPresence,
            "sensor_movement" => InputKind::SensorMovement,
            "sensor_temperature" => InputKind::SensorTemperature,
            "adapter_command" => InputKind::AdapterCommand,
            "trigger_archivist" => InputKind::TriggerArchivist,
            "chat_session_reset" => InputKind::ChatSessionReset,
            "light_on" => InputKind::LightOn,
            "light_off" => InputKind::LightOff,
            "shutdown" => InputKind::Shutdown,
            "restart" => InputKind::Restart,
            other => {
                return Err(serde::de::Error::custom(format!("unknown event type: {other}")));
            }
        };
        let content: EventContent = serde_json::from_value(frame.content).unwrap_or(EventContent::Empty);
        let mut event = Event::input(kind, content);
        event.metadata = frame.metadata;
        event.source = Some("pipe_in".to_string());
        Ok(event)
    }
}

#[async_trait]
impl InputAdapter for PipeInAdapter {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn start(&self, input_queue: Arc<PriorityQueue>) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel mutex poisoned") = Some(cancel.clone());

        let path = self.path.clone();
        let paused = self.paused.clone();

        let handle = tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let file = match tokio::fs::File::open(&path).await {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to open pipe-in, retrying");
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(std::time::Duration::from_secs(1)) => continue,
                        }
                    }
                };
                let mut reader = BufReader::new(file).lines();
                loop {
                    let next = tokio::select! {
                        () = cancel.cancelled() => break,
                        line = reader.next_line() => line,
                    };
                    let line = match next {
                        Ok(Some(line)) => line,
                        Ok(None) => break, // writer closed; reopen
                        Err(e) => {
                            warn!(error = %e, "pipe-in read error");
                            break;
                        }
                    };
                    if paused.load(Ordering::SeqCst) {
                        continue;
                    }
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match PipeInAdapter::parse_line(trimmed) {
                        Ok(event) => {
                            if !input_queue.offer(event) {
                                warn!("input queue full, dropped pipe-in event");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, raw_line = %trimmed, "malformed pipe-in frame, dropped");
                        }
                    }
                }
            }
            debug!("pipe-in worker stopped");
        });

        *self.task.lock().expect("task mutex poisoned") = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(cancel) = self.cancel.lock().expect("cancel mutex poisoned").take() {
            cancel.cancel();
        }
        if let Some(handle) = self.task.lock().expect("task mutex poisoned").take() {
            handle.abort();
            let _ = handle.await;
        }
        Ok(())
    }

    async fn handle_command(&self, cmd: AdapterCommand) -> bool {
        match cmd {
            AdapterCommand::SensorPause => !self.paused.swap(true, Ordering::SeqCst),
            AdapterCommand::SensorResume => self.paused.swap(false, Ordering::SeqCst),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buddy::event::{OutputKind, Priority};

    #[test]
    fn parses_a_plain_event_frame() {
        let line = r#"{"type":"sensor_presence","content":true}"#;
        let event = PipeInAdapter::parse_line(line).unwrap();
        assert_eq!(event.input_kind(), Some(InputKind::SensorPresence));
        assert_eq!(event.content.as_bool(), Some(true));
    }

    #[test]
    fn parses_direct_output_without_unwrapping() {
        let frame = serde_json::json!({
            "type": "direct_output",
            "content": {"event_type": "speak", "content": "ciao", "priority": "HIGH"},
        });
        let event = PipeInAdapter::parse_line(&frame.to_string()).unwrap();
        assert_eq!(event.input_kind(), Some(InputKind::DirectOutput));
        let wrapped = event.content.as_output().unwrap();
        assert_eq!(wrapped.output_kind(), Some(OutputKind::Speak));
        assert_eq!(wrapped.content.as_text(), Some("ciao"));
        assert_eq!(wrapped.priority, Priority::High);
    }

    #[test]
    fn rejects_unknown_event_type() {
        let line = r#"{"type":"not_a_real_kind"}"#;
        assert!(PipeInAdapter::parse_line(line).is_err());
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        assert!(PipeInAdapter::parse_line("{not json").is_err());
    }
}
