//! Speech-in adapter (§9.1). Dormant until `VoiceInputStart`; runs a
//! session with an inactivity timeout that resets on recognized speech or
//! while the assistant itself is speaking (the coordinator's own voice
//! must never count as silence). The concrete speech-recognition provider
//! is an external collaborator (§1) reached only through
//! [`SpeechRecognizer`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::buddy::adapters::traits::InputAdapter;
use crate::buddy::audio_coordinator::AudioDeviceCoordinator;
use crate::buddy::event::{AdapterCommand, Event, EventContent, InputKind, Priority};
use crate::buddy::queue::PriorityQueue;

const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_SLICE: Duration = Duration::from_millis(300);

/// Recognizes speech one utterance at a time. `poll` returns within
/// roughly `slice`, yielding `None` if nothing was recognized in that
/// window so the adapter can re-check the inactivity deadline often.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn poll(&self, slice: Duration) -> Option<String>;
}

/// A recognizer that never produces an utterance; for dev/test wiring
/// without a real speech-to-text provider.
pub struct SilentRecognizer;

#[async_trait]
impl SpeechRecognizer for SilentRecognizer {
    async fn poll(&self, slice: Duration) -> Option<String> {
        tokio::time::sleep(slice).await;
        None
    }
}

pub struct SpeechInAdapter {
    id: &'static str,
    recognizer: Arc<dyn SpeechRecognizer>,
    coordinator: Arc<AudioDeviceCoordinator>,
    inactivity_timeout: Duration,
    active: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechInAdapter {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, coordinator: Arc<AudioDeviceCoordinator>) -> Self {
        SpeechInAdapter {
            id: "speech_in",
            recognizer,
            coordinator,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            active: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }
}

#[async_trait]
impl InputAdapter for SpeechInAdapter {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn start(&self, input_queue: Arc<PriorityQueue>) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel mutex poisoned") = Some(cancel.clone());

        let recognizer = self.recognizer.clone();
        let coordinator = self.coordinator.clone();
        let active = self.active.clone();
        let inactivity_timeout = self.inactivity_timeout;

        let handle = tokio::spawn(async move {
            loop {
                if !active.load(Ordering::SeqCst) {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(POLL_SLICE) => continue,
                    }
                }

                if coordinator.request_input().await.is_err() {
                    tokio::time::sleep(POLL_SLICE).await;
                    continue;
                }

                let mut last_activity = Instant::now();
                loop {
                    if !active.load(Ordering::SeqCst) {
                        break;
                    }
                    let recognized = tokio::select! {
                        () = cancel.cancelled() => None,
                        r = recognizer.poll(POLL_SLICE) => r,
                    };
                    if cancel.is_cancelled() {
                        break;
                    }

                    if coordinator.is_speaking().await {
                        last_activity = Instant::now();
                    } else if let Some(text) = recognized {
                        last_activity = Instant::now();
                        debug!(text = %text, "utterance recognized");
                        let event = Event::input(InputKind::UserSpeech, EventContent::Text(text))
                            .with_priority(Priority::High)
                            .with_source("ear");
                        if !input_queue.offer(event) {
                            tracing::warn!("input queue full, dropped UserSpeech event");
                        }
                    } else if last_activity.elapsed() >= inactivity_timeout {
                        info!("speech-in session ended on inactivity timeout");
                        active.store(false, Ordering::SeqCst);
                        let end = Event::input(InputKind::ConversationEnd, EventContent::Empty)
                            .with_priority(Priority::High)
                            .with_source("speech_in");
                        if !input_queue.offer(end) {
                            tracing::warn!("input queue full, dropped ConversationEnd event");
                        }
                        break;
                    }
                }
                coordinator.release().await;

                if cancel.is_cancelled() {
                    break;
                }
            }
            debug!("speech-in worker stopped");
        });

        *self.task.lock().expect("task mutex poisoned") = Some(handle);
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
            AdapterCommand::VoiceInputStart => !self.active.swap(true, Ordering::SeqCst),
            AdapterCommand::VoiceInputStop => self.active.swap(false, Ordering::SeqCst),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct ScriptedRecognizer {
        utterances: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechRecognizer for ScriptedRecognizer {
        async fn poll(&self, slice: Duration) -> Option<String> {
            tokio::time::sleep(slice / 4).await;
            self.utterances.lock().unwrap().pop()
        }
    }

    #[tokio::test]
    async fn emits_user_speech_then_conversation_end_on_silence() {
        let recognizer = Arc::new(ScriptedRecognizer {
            utterances: StdMutex::new(vec!["ciao".to_string()]),
        });
        let coordinator = Arc::new(AudioDeviceCoordinator::new());
        let adapter = SpeechInAdapter::new(recognizer, coordinator)
            .with_inactivity_timeout(Duration::from_millis(500));
        let queue = Arc::new(PriorityQueue::new(8));

        adapter.start(queue.clone()).await.unwrap();
        adapter.handle_command(AdapterCommand::VoiceInputStart).await;

        let speech = queue
            .dequeue_timeout(Duration::from_secs(2))
            .await
            .expect("expected UserSpeech");
        assert_eq!(speech.input_kind(), Some(InputKind::UserSpeech));
        assert_eq!(speech.content.as_text(), Some("ciao"));

        let end = queue
            .dequeue_timeout(Duration::from_secs(3))
            .await
            .expect("expected ConversationEnd after inactivity");
        assert_eq!(end.input_kind(), Some(InputKind::ConversationEnd));

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn dormant_until_voice_input_start() {
        let adapter = SpeechInAdapter::new(Arc::new(SilentRecognizer), Arc::new(AudioDeviceCoordinator::new()));
        let queue = Arc::new(PriorityQueue::new(8));
        adapter.start(queue.clone()).await.unwrap();
        let nothing = queue.dequeue_timeout(Duration::from_millis(200)).await;
        assert!(nothing.is_none());
        adapter.stop().await.unwrap();
    }
}
