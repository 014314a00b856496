//! Shared duplex audio device arbitration (§4.5). The physical device
//! cannot capture and play simultaneously, so every input adapter that
//! needs the microphone and every output adapter that needs the speaker
//! goes through this single coordinator.

use tokio::sync::{Mutex, Notify};
use tokio::time::Duration;

use crate::buddy::error::{BuddyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioDeviceState {
    Idle,
    Listening,
    Speaking,
}

struct Inner {
    state: AudioDeviceState,
    is_speaking: bool,
}

pub struct AudioDeviceCoordinator {
    inner: Mutex<Inner>,
    changed: Notify,
}

impl AudioDeviceCoordinator {
    pub fn new() -> Self {
        AudioDeviceCoordinator {
            inner: Mutex::new(Inner {
                state: AudioDeviceState::Idle,
                is_speaking: false,
            }),
            changed: Notify::new(),
        }
    }

    pub async fn state(&self) -> AudioDeviceState {
        self.inner.lock().await.state
    }

    pub async fn is_speaking(&self) -> bool {
        self.inner.lock().await.is_speaking
    }

    /// Claim the device for capture. Succeeds from `Idle` or already
    /// `Listening`; fails with `Busy` while the device is `Speaking`.
    pub async fn request_input(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            AudioDeviceState::Idle | AudioDeviceState::Listening => {
                inner.state = AudioDeviceState::Listening;
                drop(inner);
                self.changed.notify_waiters();
                Ok(())
            }
            AudioDeviceState::Speaking => Err(BuddyError::Adapter(
                "audio device busy: output in progress".into(),
            )),
        }
    }

    /// Claim the device for output. Always succeeds, pre-empting an
    /// in-progress `Listening` state — speech output takes priority over
    /// passive listening by design (§4.5).
    pub async fn request_output(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = AudioDeviceState::Speaking;
        inner.is_speaking = true;
        drop(inner);
        self.changed.notify_waiters();
    }

    /// Release the device back to `Idle` from any state.
    pub async fn release(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = AudioDeviceState::Idle;
        inner.is_speaking = false;
        drop(inner);
        self.changed.notify_waiters();
    }

    /// Wait for the device to become `Idle`, up to `timeout`. Returns
    /// `true` if it became idle, `false` on timeout.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.state().await == AudioDeviceState::Idle {
                return true;
            }
            let notified = self.changed.notified();
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return false;
            }
        }
    }
}

impl Default for AudioDeviceCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
