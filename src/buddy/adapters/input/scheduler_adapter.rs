//! Idle-conversation housekeeping and, optionally, a wall-clock light
//! schedule (§9.1). Polls process-wide state roughly once a second: once a
//! conversation has been over for long enough it fires `ChatSessionReset`
//! and `TriggerArchivist`; if the light schedule is enabled it mirrors
//! presence and the configured evening hour window into `LightOn`/`LightOff`
//! input events.
//!
//! The light schedule defaults to disabled — the Brain already owns a
//! light-off timer keyed off its own presence tracking (§4.4), and running
//! both unconditionally would let two independent mechanisms race to
//! decide the same bulb's state. Enabling this adapter's schedule is an
//! explicit opt-in for deployments that want wall-clock scheduling
//! independent of the Brain's conversation-driven timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::buddy::adapters::traits::InputAdapter;
use crate::buddy::event::{AdapterCommand, Event, EventContent, InputKind, Priority};
use crate::buddy::queue::PriorityQueue;
use crate::buddy::state::GlobalState;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RESET_INACTIVITY: Duration = Duration::from_secs(600);

struct SchedulerState {
    last_handled_conversation_end: Option<f64>,
    light_on_emitted: Option<bool>,
}

pub struct SchedulerAdapter {
    id: &'static str,
    global_state: Arc<GlobalState>,
    reset_inactivity: Duration,
    light_schedule_enabled: bool,
    evening_hour_start: u32,
    evening_hour_end: u32,
    paused: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerAdapter {
    pub fn new(global_state: Arc<GlobalState>) -> Self {
        SchedulerAdapter {
            id: "scheduler",
            global_state,
            reset_inactivity: DEFAULT_RESET_INACTIVITY,
            light_schedule_enabled: false,
            evening_hour_start: 18,
            evening_hour_end: 7,
            paused: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn with_reset_inactivity(mut self, inactivity: Duration) -> Self {
        self.reset_inactivity = inactivity;
        self
    }

    pub fn with_light_schedule(mut self, enabled: bool, hour_start: u32, hour_end: u32) -> Self {
        self.light_schedule_enabled = enabled;
        self.evening_hour_start = hour_start;
        self.evening_hour_end = hour_end;
        self
    }

    fn in_evening_window(hour: u32, start: u32, end: u32) -> bool {
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

#[async_trait]
impl InputAdapter for SchedulerAdapter {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn start(&self, input_queue: Arc<PriorityQueue>) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel mutex poisoned") = Some(cancel.clone());

        let global_state = self.global_state.clone();
        let reset_inactivity = self.reset_inactivity.as_secs_f64();
        let light_schedule_enabled = self.light_schedule_enabled;
        let evening_hour_start = self.evening_hour_start;
        let evening_hour_end = self.evening_hour_end;
        let paused = self.paused.clone();
        let state = Arc::new(Mutex::new(SchedulerState {
            last_handled_conversation_end: None,
            light_on_emitted: None,
        }));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(POLL_INTERVAL) => {}
                }
                if paused.load(Ordering::SeqCst) {
                    continue;
                }

                let now = Utc::now().timestamp_millis() as f64 / 1000.0;
                let snapshot = global_state.snapshot();

                if let Some(end_ts) = snapshot.last_conversation_end_ts {
                    let mut st = state.lock().expect("scheduler state poisoned");
                    let already_handled = st.last_handled_conversation_end == Some(end_ts);
                    if !already_handled && now - end_ts >= reset_inactivity {
                        st.last_handled_conversation_end = Some(end_ts);
                        drop(st);
                        let reset = Event::input(InputKind::ChatSessionReset, EventContent::Empty)
                            .with_priority(Priority::Low)
                            .with_source("scheduler");
                        if !input_queue.offer(reset) {
                            tracing::warn!("input queue full, dropped ChatSessionReset event");
                        }
                        let archivist = Event::input(InputKind::TriggerArchivist, EventContent::Empty)
                            .with_priority(Priority::Low)
                            .with_source("scheduler");
                        if !input_queue.offer(archivist) {
                            tracing::warn!("input queue full, dropped TriggerArchivist event");
                        }
                    }
                }

                if light_schedule_enabled {
                    let hour = Utc::now().hour();
                    let in_window = SchedulerAdapter::in_evening_window(hour, evening_hour_start, evening_hour_end);
                    let present = snapshot
                        .last_presence_ts
                        .zip(snapshot.last_absence_ts)
                        .map(|(p, a)| p > a)
                        .unwrap_or(snapshot.last_presence_ts.is_some());
                    let desired = in_window && present;

                    let mut st = state.lock().expect("scheduler state poisoned");
                    if st.light_on_emitted != Some(desired) {
                        st.light_on_emitted = Some(desired);
                        drop(st);
                        let kind = if desired { InputKind::LightOn } else { InputKind::LightOff };
                        let event = Event::input(kind, EventContent::Empty)
                            .with_priority(Priority::Low)
                            .with_source("scheduler");
                        if !input_queue.offer(event) {
                            tracing::warn!("input queue full, dropped light schedule event");
                        }
                    }
                }
            }
            debug!("scheduler worker stopped");
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

    #[test]
    fn evening_window_wraps_midnight() {
        assert!(SchedulerAdapter::in_evening_window(20, 18, 7));
        assert!(SchedulerAdapter::in_evening_window(2, 18, 7));
        assert!(!SchedulerAdapter::in_evening_window(12, 18, 7));
    }

    #[tokio::test]
    async fn fires_reset_and_archivist_after_inactivity() {
        let global_state = Arc::new(GlobalState::new());
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        global_state.record_conversation_end(now - 2.0);

        let adapter = SchedulerAdapter::new(global_state).with_reset_inactivity(Duration::from_millis(50));
        let queue = Arc::new(PriorityQueue::new(8));
        adapter.start(queue.clone()).await.unwrap();

        let first = queue
            .dequeue_timeout(Duration::from_secs(2))
            .await
            .expect("expected ChatSessionReset");
        assert_eq!(first.input_kind(), Some(InputKind::ChatSessionReset));
        let second = queue
            .dequeue_timeout(Duration::from_secs(2))
            .await
            .expect("expected TriggerArchivist");
        assert_eq!(second.input_kind(), Some(InputKind::TriggerArchivist));

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn light_schedule_disabled_by_default() {
        let global_state = Arc::new(GlobalState::new());
        global_state.record_presence(Utc::now().timestamp_millis() as f64 / 1000.0);
        let adapter = SchedulerAdapter::new(global_state);
        let queue = Arc::new(PriorityQueue::new(8));
        adapter.start(queue.clone()).await.unwrap();
        let nothing = queue.dequeue_timeout(Duration::from_millis(1200)).await;
        assert!(nothing.is_none());
        adapter.stop().await.unwrap();
    }
}
