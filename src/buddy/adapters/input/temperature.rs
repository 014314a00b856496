//! Temperature/humidity sensor adapter (§9.1). Polls a sensor on a
//! configurable interval, caching the last reading for at least two
//! seconds so repeated polls never hammer the underlying hardware read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::buddy::adapters::traits::InputAdapter;
use crate::buddy::event::{AdapterCommand, Event, EventContent, InputKind, Priority};
use crate::buddy::queue::PriorityQueue;
use std::sync::Arc;

const MIN_READ_CACHE: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct TemperatureReading {
    pub temperature: f64,
    pub humidity: f64,
}

#[async_trait]
pub trait TemperatureSensor: Send + Sync {
    async fn read(&self) -> TemperatureReading;
}

pub struct FixedSensor {
    pub reading: TemperatureReading,
}

#[async_trait]
impl TemperatureSensor for FixedSensor {
    async fn read(&self) -> TemperatureReading {
        self.reading
    }
}

struct Cache {
    last: Option<TemperatureReading>,
    at: Option<Instant>,
}

pub struct TemperatureAdapter {
    id: &'static str,
    sensor: Arc<dyn TemperatureSensor>,
    poll_interval: Duration,
    paused: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TemperatureAdapter {
    pub fn new(sensor: Arc<dyn TemperatureSensor>, poll_interval: Duration) -> Self {
        TemperatureAdapter {
            id: "temperature",
            sensor,
            poll_interval,
            paused: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Read through the cache: a hardware read is skipped if the previous
    /// one happened less than [`MIN_READ_CACHE`] ago.
    async fn read_cached(sensor: &Arc<dyn TemperatureSensor>, cache: &AsyncMutex<Cache>) -> TemperatureReading {
        let mut cache = cache.lock().await;
        if let (Some(last), Some(at)) = (cache.last, cache.at) {
            if at.elapsed() < MIN_READ_CACHE {
                return last;
            }
        }
        let reading = sensor.read().await;
        cache.last = Some(reading);
        cache.at = Some(Instant::now());
        reading
    }
}

#[async_trait]
impl InputAdapter for TemperatureAdapter {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn start(&self, input_queue: Arc<PriorityQueue>) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel mutex poisoned") = Some(cancel.clone());

        let sensor = self.sensor.clone();
        let poll_interval = self.poll_interval;
        let paused = self.paused.clone();
        let cache = Arc::new(AsyncMutex::new(Cache { last: None, at: None }));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(poll_interval) => {}
                }
                if paused.load(Ordering::SeqCst) {
                    continue;
                }

                let reading = TemperatureAdapter::read_cached(&sensor, &cache).await;
                let event = Event::input(InputKind::SensorTemperature, EventContent::Number(reading.temperature))
                    .with_priority(Priority::Low)
                    .with_source("temperature")
                    .with_meta("temperature", reading.temperature)
                    .with_meta("humidity", reading.humidity)
                    .with_meta("unit", "celsius");
                if !input_queue.offer(event) {
                    tracing::warn!("input queue full, dropped SensorTemperature event");
                }
            }
            debug!("temperature worker stopped");
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
