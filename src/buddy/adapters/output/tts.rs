//! Speech output adapter (§9.2). Owns the shared audio device while
//! speaking; synthesis and playback are split into two narrow external
//! collaborators so either can be swapped (a cloud TTS API vs. a local
//! engine; an `aplay` subprocess vs. a native player) without touching the
//! adapter's queue/lifecycle logic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buddy::adapters::traits::OutputAdapter;
use crate::buddy::audio_coordinator::AudioDeviceCoordinator;
use crate::buddy::event::{AdapterCommand, Event, OutputKind};
use crate::buddy::queue::PriorityQueue;
use crate::buddy::router::RouteTarget;

#[async_trait]
pub trait TtsSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>>;
}

/// Plays back already-synthesized audio. Implementations should poll
/// `stop` periodically and abandon playback promptly once it is set --
/// that is how `VOICE_OUTPUT_STOP` interrupts an in-progress utterance.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, audio: &[u8], stop: &AtomicBool);
}

pub struct SilentSynthesizer;

#[async_trait]
impl TtsSynthesizer for SilentSynthesizer {
    async fn synthesize(&self, _text: &str) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

pub struct SilentPlayer;

#[async_trait]
impl AudioPlayer for SilentPlayer {
    async fn play(&self, _audio: &[u8], _stop: &AtomicBool) {}
}

const HANDLED: &[OutputKind] = &[OutputKind::Speak];

pub struct TtsAdapter {
    id: &'static str,
    queue: Arc<PriorityQueue>,
    coordinator: Arc<AudioDeviceCoordinator>,
    synthesizer: Arc<dyn TtsSynthesizer>,
    player: Arc<dyn AudioPlayer>,
    stop_flag: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TtsAdapter {
    pub fn new(
        coordinator: Arc<AudioDeviceCoordinator>,
        synthesizer: Arc<dyn TtsSynthesizer>,
        player: Arc<dyn AudioPlayer>,
    ) -> Self {
        TtsAdapter {
            id: "tts",
            queue: Arc::new(PriorityQueue::new(32)),
            coordinator,
            synthesizer,
            player,
            stop_flag: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }
}

impl RouteTarget for TtsAdapter {
    fn name(&self) -> &str {
        self.id
    }

    fn offer(&self, event: Event) -> bool {
        self.queue.offer(event)
    }
}

#[async_trait]
impl OutputAdapter for TtsAdapter {
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
        let coordinator = self.coordinator.clone();
        let synthesizer = self.synthesizer.clone();
        let player = self.player.clone();
        let stop_flag = self.stop_flag.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = queue.dequeue() => event,
                };
                let Some(text) = event.content.as_text() else {
                    warn!("Speak event without text content, dropped");
                    continue;
                };

                let audio = match synthesizer.synthesize(text).await {
                    Ok(audio) => audio,
                    Err(e) => {
                        warn!(error = %e, "speech synthesis failed, utterance dropped");
                        continue;
                    }
                };

                coordinator.request_output().await;
                stop_flag.store(false, Ordering::SeqCst);
                player.play(&audio, &stop_flag).await;
                coordinator.release().await;
            }
            debug!("tts worker stopped");
        });

        *self.task.lock().expect("task mutex poisoned") = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(cancel) = self.cancel.lock().expect("cancel mutex poisoned").take() {
            cancel.cancel();
        }
        self.stop_flag.store(true, Ordering::SeqCst);
        self.coordinator.release().await;
        if let Some(handle) = self.task.lock().expect("task mutex poisoned").take() {
            handle.await.ok();
        }
        Ok(())
    }

    async fn handle_command(&self, cmd: AdapterCommand) -> bool {
        match cmd {
            AdapterCommand::VoiceOutputStop => !self.stop_flag.swap(true, Ordering::SeqCst),
            AdapterCommand::VoiceOutputResume => self.stop_flag.swap(false, Ordering::SeqCst),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buddy::event::Priority;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingPlayer {
        plays: AtomicUsize,
    }

    #[async_trait]
    impl AudioPlayer for CountingPlayer {
        async fn play(&self, _audio: &[u8], _stop: &AtomicBool) {
            self.plays.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn speaks_queued_text_and_releases_device() {
        let coordinator = Arc::new(AudioDeviceCoordinator::new());
        let player = Arc::new(CountingPlayer {
            plays: AtomicUsize::new(0),
        });
        let adapter = TtsAdapter::new(coordinator.clone(), Arc::new(SilentSynthesizer), player.clone());
        adapter.start().await.unwrap();

        let event = Event::output(OutputKind::Speak, "ciao".into()).with_priority(Priority::High);
        assert!(adapter.offer(event));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(player.plays.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state().await, crate::buddy::audio_coordinator::AudioDeviceState::Idle);

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn voice_output_stop_is_idempotent() {
        let adapter = TtsAdapter::new(
            Arc::new(AudioDeviceCoordinator::new()),
            Arc::new(SilentSynthesizer),
            Arc::new(SilentPlayer),
        );
        assert!(adapter.handle_command(AdapterCommand::VoiceOutputStop).await);
        assert!(!adapter.handle_command(AdapterCommand::VoiceOutputStop).await);
    }
}
