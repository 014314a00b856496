//! LED indicator adapter (§9.2). `LedControl` events carry their intent
//! entirely in metadata: `led` (which indicator), `command` (`on`, `off`,
//! `blink`), and for `blink`, `on_time`/`off_time` seconds and either
//! `continuous: true` or a `count` of cycles to run before settling off.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buddy::adapters::traits::OutputAdapter;
use crate::buddy::event::{AdapterCommand, Event, OutputKind};
use crate::buddy::queue::PriorityQueue;
use crate::buddy::router::RouteTarget;

#[async_trait]
pub trait LedDriver: Send + Sync {
    async fn set(&self, led: &str, on: bool);
}

pub struct NoopLedDriver;

#[async_trait]
impl LedDriver for NoopLedDriver {
    async fn set(&self, _led: &str, _on: bool) {}
}

const HANDLED: &[OutputKind] = &[OutputKind::LedControl];

pub struct LedAdapter {
    id: &'static str,
    queue: Arc<PriorityQueue>,
    driver: Arc<dyn LedDriver>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
    blink_cancel: Arc<Mutex<Option<CancellationToken>>>,
}

impl LedAdapter {
    pub fn new(driver: Arc<dyn LedDriver>) -> Self {
        LedAdapter {
            id: "led",
            queue: Arc::new(PriorityQueue::new(32)),
            driver,
            cancel: Mutex::new(None),
            task: Mutex::new(None),
            blink_cancel: Arc::new(Mutex::new(None)),
        }
    }
}

impl RouteTarget for LedAdapter {
    fn name(&self) -> &str {
        self.id
    }

    fn offer(&self, event: Event) -> bool {
        self.queue.offer(event)
    }
}

fn stop_blink(blink_cancel: &Mutex<Option<CancellationToken>>) {
    if let Some(token) = blink_cancel.lock().expect("blink cancel mutex poisoned").take() {
        token.cancel();
    }
}

#[async_trait]
impl OutputAdapter for LedAdapter {
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
        let driver = self.driver.clone();
        let blink_cancel = self.blink_cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = queue.dequeue() => event,
                };

                let led = event.meta_str("led").unwrap_or("default").to_string();
                let command = event.meta_str("command").unwrap_or("off").to_string();
                stop_blink(&blink_cancel);

                match command.as_str() {
                    "on" => driver.set(&led, true).await,
                    "off" => driver.set(&led, false).await,
                    "blink" => {
                        let on_time = Duration::from_secs_f64(event.meta_f64("on_time").unwrap_or(0.5));
                        let off_time = Duration::from_secs_f64(event.meta_f64("off_time").unwrap_or(0.5));
                        let continuous = event
                            .metadata
                            .get("continuous")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false);
                        let count = event.metadata.get("count").and_then(|v| v.as_u64());

                        let blink_token = CancellationToken::new();
                        *blink_cancel.lock().expect("blink cancel mutex poisoned") = Some(blink_token.clone());
                        let driver = driver.clone();
                        tokio::spawn(async move {
                            let mut cycles = 0u64;
                            loop {
                                if !continuous {
                                    if let Some(limit) = count {
                                        if cycles >= limit {
                                            driver.set(&led, false).await;
                                            break;
                                        }
                                    }
                                }
                                tokio::select! {
                                    () = blink_token.cancelled() => break,
                                    () = async {
                                        driver.set(&led, true).await;
                                        tokio::time::sleep(on_time).await;
                                        driver.set(&led, false).await;
                                        tokio::time::sleep(off_time).await;
                                    } => {}
                                }
                                cycles += 1;
                            }
                        });
                    }
                    other => warn!(command = %other, "unrecognized LED command, dropped"),
                }
            }
            debug!("led worker stopped");
        });

        *self.task.lock().expect("task mutex poisoned") = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(cancel) = self.cancel.lock().expect("cancel mutex poisoned").take() {
            cancel.cancel();
        }
        stop_blink(&self.blink_cancel);
        if let Some(handle) = self.task.lock().expect("task mutex poisoned").take() {
            handle.await.ok();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration as StdDuration;

    struct RecordingDriver {
        calls: StdMutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl LedDriver for RecordingDriver {
        async fn set(&self, led: &str, on: bool) {
            self.calls.lock().unwrap().push((led.to_string(), on));
        }
    }

    #[tokio::test]
    async fn on_and_off_commands_drive_the_led() {
        let driver = Arc::new(RecordingDriver {
            calls: StdMutex::new(Vec::new()),
        });
        let adapter = LedAdapter::new(driver.clone());
        adapter.start().await.unwrap();

        let on = Event::output(OutputKind::LedControl, crate::buddy::event::EventContent::Empty)
            .with_meta("led", "ascolto")
            .with_meta("command", "on");
        assert!(adapter.offer(on));
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let off = Event::output(OutputKind::LedControl, crate::buddy::event::EventContent::Empty)
            .with_meta("led", "ascolto")
            .with_meta("command", "off");
        assert!(adapter.offer(off));
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let calls = driver.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("ascolto".to_string(), true), ("ascolto".to_string(), false)]);

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn count_limited_blink_settles_off() {
        let driver = Arc::new(RecordingDriver {
            calls: StdMutex::new(Vec::new()),
        });
        let adapter = LedAdapter::new(driver.clone());
        adapter.start().await.unwrap();

        let blink = Event::output(OutputKind::LedControl, crate::buddy::event::EventContent::Empty)
            .with_meta("led", "ascolto")
            .with_meta("command", "blink")
            .with_meta("on_time", 0.01)
            .with_meta("off_time", 0.01)
            .with_meta("count", 2);
        assert!(adapter.offer(blink));
        tokio::time::sleep(StdDuration::from_millis(200)).await;

        let calls = driver.calls.lock().unwrap();
        assert_eq!(calls.last(), Some(&("ascolto".to_string(), false)));

        adapter.stop().await.unwrap();
    }
}
