//! Presence/movement radar adapter (§9.1). Debounces presence transitions
//! over a configurable number of consecutive identical readings; movement
//! above an energy threshold is reported independently of the presence
//! debounce window. The concrete sensor protocol is an external
//! collaborator (§1) reached only through [`RadarSensor`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::buddy::adapters::traits::InputAdapter;
use crate::buddy::event::{AdapterCommand, Event, EventContent, InputKind, Priority};
use crate::buddy::queue::PriorityQueue;

pub const DEFAULT_MOVEMENT_THRESHOLD: f64 = 15.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct RadarReading {
    pub present: bool,
    pub distance: f64,
    pub mov_distance: f64,
    pub mov_energy: f64,
    pub static_distance: f64,
    pub static_energy: f64,
}

#[async_trait]
pub trait RadarSensor: Send + Sync {
    async fn read(&self) -> RadarReading;
}

pub struct NoPresenceSensor;

#[async_trait]
impl RadarSensor for NoPresenceSensor {
    async fn read(&self) -> RadarReading {
        RadarReading::default()
    }
}

struct DebounceState {
    last_reading: Option<bool>,
    consecutive: usize,
    reported: Option<bool>,
}

pub struct RadarAdapter {
    id: &'static str,
    sensor: Arc<dyn RadarSensor>,
    interval: Duration,
    /// Number of consecutive identical readings required before a presence
    /// transition is reported (§9.1 "confirmations"; no default — this
    /// crate requires the deployer to choose one explicitly).
    confirmations: usize,
    movement_threshold: f64,
    paused: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RadarAdapter {
    pub fn new(sensor: Arc<dyn RadarSensor>, interval: Duration, confirmations: usize) -> Self {
        RadarAdapter {
            id: "radar",
            sensor,
            interval,
            confirmations: confirmations.max(1),
            movement_threshold: DEFAULT_MOVEMENT_THRESHOLD,
            paused: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn with_movement_threshold(mut self, threshold: f64) -> Self {
        self.movement_threshold = threshold;
        self
    }
}

#[async_trait]
impl InputAdapter for RadarAdapter {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn start(&self, input_queue: Arc<PriorityQueue>) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel mutex poisoned") = Some(cancel.clone());

        let sensor = self.sensor.clone();
        let interval = self.interval;
        let confirmations = self.confirmations;
        let movement_threshold = self.movement_threshold;
        let paused = self.paused.clone();

        // Debounce state lives behind a std Mutex on `self`, but the
        // worker owns its own copy captured by value since it must survive
        // past `self`'s borrow; mirrored back via an Arc<Mutex<..>> instead.
        let debounce = Arc::new(Mutex::new(DebounceState {
            last_reading: None,
            consecutive: 0,
            reported: None,
        }));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
                if paused.load(Ordering::SeqCst) {
                    continue;
                }

                let reading = sensor.read().await;
                let mut state = debounce.lock().expect("debounce mutex poisoned");
                if state.last_reading == Some(reading.present) {
                    state.consecutive += 1;
                } else {
                    state.last_reading = Some(reading.present);
                    state.consecutive = 1;
                }

                if state.consecutive >= confirmations && state.reported != Some(reading.present) {
                    state.reported = Some(reading.present);
                    drop(state);
                    let event = Event::input(InputKind::SensorPresence, EventContent::Bool(reading.present))
                        .with_priority(Priority::Low)
                        .with_source("radar")
                        .with_meta("distance", reading.distance)
                        .with_meta("mov_distance", reading.mov_distance)
                        .with_meta("mov_energy", reading.mov_energy)
                        .with_meta("static_distance", reading.static_distance)
                        .with_meta("static_energy", reading.static_energy);
                    if !input_queue.offer(event) {
                        tracing::warn!("input queue full, dropped SensorPresence event");
                    }
                } else {
                    drop(state);
                }

                if reading.mov_energy >= movement_threshold {
                    let movement = Event::input(InputKind::SensorMovement, EventContent::Bool(true))
                        .with_priority(Priority::Low)
                        .with_source("radar")
                        .with_meta("mov_energy", reading.mov_energy);
                    if !input_queue.offer(movement) {
                        tracing::warn!("input queue full, dropped SensorMovement event");
                    }
                }
            }
            debug!("radar worker stopped");
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
    use std::sync::Mutex as StdMutex;

    struct ScriptedSensor {
        readings: StdMutex<Vec<RadarReading>>,
    }

    #[async_trait]
    impl RadarSensor for ScriptedSensor {
        async fn read(&self) -> RadarReading {
            let mut readings = self.readings.lock().unwrap();
            if readings.len() > 1 {
                readings.remove(0)
            } else {
                readings[0]
            }
        }
    }

    #[tokio::test]
    async fn presence_reported_only_after_confirmations() {
        let present = RadarReading {
            present: true,
            distance: 1.2,
            mov_distance: 0.0,
            mov_energy: 0.0,
            static_distance: 1.2,
            static_energy: 30.0,
        };
        let sensor = Arc::new(ScriptedSensor {
            readings: StdMutex::new(vec![present; 5]),
        });
        let adapter = RadarAdapter::new(sensor, Duration::from_millis(10), 3);
        let queue = Arc::new(PriorityQueue::new(16));
        adapter.start(queue.clone()).await.unwrap();

        let event = queue
            .dequeue_timeout(Duration::from_secs(1))
            .await
            .expect("expected a SensorPresence event after confirmations");
        assert_eq!(event.input_kind(), Some(InputKind::SensorPresence));
        assert_eq!(event.content.as_bool(), Some(true));

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn movement_above_threshold_emitted_independently() {
        let moving = RadarReading {
            present: false,
            mov_energy: 50.0,
            ..Default::default()
        };
        let sensor = Arc::new(ScriptedSensor {
            readings: StdMutex::new(vec![moving; 5]),
        });
        let adapter = RadarAdapter::new(sensor, Duration::from_millis(10), 10);
        let queue = Arc::new(PriorityQueue::new(16));
        adapter.start(queue.clone()).await.unwrap();

        let event = queue
            .dequeue_timeout(Duration::from_secs(1))
            .await
            .expect("expected a SensorMovement event");
        assert_eq!(event.input_kind(), Some(InputKind::SensorMovement));

        adapter.stop().await.unwrap();
    }
}
