//! Wake-word listener adapter (§9.1). Owns the shared audio device while
//! `Listening`, polling an external wake-word detector once per frame and
//! emitting `Wakeword` on a positive match. The actual detection algorithm
//! (e.g. Picovoice/Porcupine in the source system) is an external
//! collaborator (§1) reached only through [`WakewordDetector`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::buddy::adapters::traits::InputAdapter;
use crate::buddy::audio_coordinator::AudioDeviceCoordinator;
use crate::buddy::event::{AdapterCommand, Event, EventContent, InputKind, Priority};
use crate::buddy::queue::PriorityQueue;

/// Frame length while actively listening for the wake word (§9.1 "frame
/// length N"); a short poll interval is used instead while paused so the
/// stop/start toggle is observed promptly.
const ACTIVE_FRAME_INTERVAL: Duration = Duration::from_millis(250);
const PAUSED_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A single frame's worth of wake-word detection. Returns the matched
/// wake-word's name on a positive hit, `None` otherwise. Implementations
/// own whatever audio buffering they need; the adapter only calls this
/// once per frame tick.
pub trait WakewordDetector: Send + Sync {
    fn poll_frame(&self) -> Option<String>;
}

/// A detector that never fires; used when no real wake-word engine is
/// configured so the slot can still be wired up for development.
pub struct SilentDetector;

impl WakewordDetector for SilentDetector {
    fn poll_frame(&self) -> Option<String> {
        None
    }
}

pub struct WakewordAdapter {
    id: &'static str,
    wakeword_name: String,
    detector: Arc<dyn WakewordDetector>,
    coordinator: Arc<AudioDeviceCoordinator>,
    paused: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WakewordAdapter {
    pub fn new(
        wakeword_name: impl Into<String>,
        detector: Arc<dyn WakewordDetector>,
        coordinator: Arc<AudioDeviceCoordinator>,
    ) -> Self {
        WakewordAdapter {
            id: "wakeword",
            wakeword_name: wakeword_name.into(),
            detector,
            coordinator,
            paused: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl InputAdapter for WakewordAdapter {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn start(&self, input_queue: Arc<PriorityQueue>) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel mutex poisoned") = Some(cancel.clone());

        let detector = self.detector.clone();
        let coordinator = self.coordinator.clone();
        let paused = self.paused.clone();
        let wakeword_name = self.wakeword_name.clone();

        let handle = tokio::spawn(async move {
            loop {
                let interval = if paused.load(Ordering::SeqCst) {
                    PAUSED_POLL_INTERVAL
                } else {
                    ACTIVE_FRAME_INTERVAL
                };
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }

                if paused.load(Ordering::SeqCst) {
                    continue;
                }
                // A paused listener keeps the device claimed but skips the
                // detection step; while active, request_input is retried
                // every frame so TTS output naturally pre-empts us.
                if coordinator.request_input().await.is_err() {
                    continue;
                }

                if let Some(matched) = detector.poll_frame() {
                    coordinator.release().await;
                    info!(wakeword = %matched, "wake word detected");
                    let event = Event::input(InputKind::Wakeword, EventContent::Empty)
                        .with_priority(Priority::High)
                        .with_source("wakeword")
                        .with_meta("wakeword", matched.clone());
                    if !input_queue.offer(event) {
                        tracing::warn!("input queue full, dropped Wakeword event");
                    }
                }
            }
            debug!("wakeword worker stopped");
        });

        *self.task.lock().expect("task mutex poisoned") = Some(handle);
        let _ = &wakeword_name; // retained for future multi-wakeword support
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(cancel) = self.cancel.lock().expect("cancel mutex poisoned").take() {
            cancel.cancel();
        }
        self.coordinator.release().await;
        if let Some(handle) = self.task.lock().expect("task mutex poisoned").take() {
            handle.await.ok();
        }
        Ok(())
    }

    async fn handle_command(&self, cmd: AdapterCommand) -> bool {
        match cmd {
            AdapterCommand::WakewordListenStop => {
                !self.paused.swap(true, Ordering::SeqCst)
            }
            AdapterCommand::WakewordListenStart => {
                self.paused.swap(false, Ordering::SeqCst)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct ScriptedDetector {
        hits: StdMutex<Vec<String>>,
    }

    impl WakewordDetector for ScriptedDetector {
        fn poll_frame(&self) -> Option<String> {
            self.hits.lock().unwrap().pop()
        }
    }

    #[tokio::test]
    async fn emits_wakeword_on_positive_match() {
        let detector = Arc::new(ScriptedDetector {
            hits: StdMutex::new(vec!["buddy".to_string()]),
        });
        let coordinator = Arc::new(AudioDeviceCoordinator::new());
        let adapter = WakewordAdapter::new("buddy", detector, coordinator);
        let queue = Arc::new(PriorityQueue::new(8));

        adapter.start(queue.clone()).await.unwrap();
        let event = queue
            .dequeue_timeout(Duration::from_secs(2))
            .await
            .expect("expected a Wakeword event");
        assert_eq!(event.input_kind(), Some(InputKind::Wakeword));
        assert_eq!(event.priority, Priority::High);
        assert_eq!(event.meta_str("wakeword"), Some("buddy"));

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn listen_stop_then_start_is_idempotent() {
        let adapter = WakewordAdapter::new(
            "buddy",
            Arc::new(SilentDetector),
            Arc::new(AudioDeviceCoordinator::new()),
        );
        assert!(adapter.handle_command(AdapterCommand::WakewordListenStop).await);
        assert!(!adapter.handle_command(AdapterCommand::WakewordListenStop).await);
        assert!(adapter.handle_command(AdapterCommand::WakewordListenStart).await);
        assert!(!adapter.handle_command(AdapterCommand::WakewordListenStart).await);
    }
}
