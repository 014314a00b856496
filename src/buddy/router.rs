//! The Event Router: a type→subscribers broadcast table (§4.1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::buddy::event::{Event, OutputKind};

/// Anything the router can hand an output event to. Output adapters
/// implement this by forwarding to their own internal bounded queue
/// (§4.2); the router never talks to an adapter's worker loop directly.
pub trait RouteTarget: Send + Sync {
    /// Adapter name, used in log lines when a route drops an event.
    fn name(&self) -> &str;

    /// Non-blocking enqueue. Returns `false` on backpressure.
    fn offer(&self, event: Event) -> bool;
}

/// Routing counters exposed for diagnostics and for the testable
/// invariant in §8 (`routed + dropped + no_route` equals attempted pairs).
#[derive(Debug, Default, Clone, Copy)]
pub struct RouterStats {
    pub routed: u64,
    pub dropped: u64,
    pub no_route: u64,
}

#[derive(Default)]
struct Counters {
    routed: AtomicU64,
    dropped: AtomicU64,
    no_route: AtomicU64,
}

/// Broadcasts output events to every subscriber registered for their kind.
pub struct Router {
    table: Mutex<HashMap<OutputKind, Vec<Arc<dyn RouteTarget>>>>,
    counters: Counters,
}

impl Router {
    pub fn new() -> Self {
        Router {
            table: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Bind a subscriber to a kind. A subscriber may appear at most once
    /// per kind; re-registering the same subscriber (by pointer identity)
    /// is a no-op.
    pub fn register(&self, kind: OutputKind, subscriber: Arc<dyn RouteTarget>) {
        let mut table = self.table.lock().expect("router table poisoned");
        let subscribers = table.entry(kind).or_default();
        if !subscribers
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &subscriber))
        {
            subscribers.push(subscriber);
        }
    }

    /// Dispatch one event to every subscriber bound to its kind. Returns
    /// the number of subscribers that accepted it. The table lock is held
    /// only to snapshot the subscriber list; `offer` calls happen without
    /// it so a slow/backed-up worker can never block routing to others.
    pub fn route(&self, event: Event) -> usize {
        let Some(kind) = event.output_kind() else {
            warn!("router.route called with a non-output event; dropping");
            return 0;
        };

        let subscribers = {
            let table = self.table.lock().expect("router table poisoned");
            table.get(&kind).cloned()
        };

        let Some(subscribers) = subscribers else {
            self.counters.no_route.fetch_add(1, Ordering::Relaxed);
            return 0;
        };
        if subscribers.is_empty() {
            self.counters.no_route.fetch_add(1, Ordering::Relaxed);
            return 0;
        }

        let mut delivered = 0;
        for subscriber in &subscribers {
            if subscriber.offer(event.clone()) {
                delivered += 1;
                self.counters.routed.fetch_add(1, Ordering::Relaxed);
            } else {
                warn!(adapter = subscriber.name(), ?kind, "route dropped, subscriber queue full");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        delivered
    }

    pub fn route_batch(&self, events: impl IntoIterator<Item = Event>) -> usize {
        events.into_iter().map(|e| self.route(e)).sum()
    }

    pub fn get_stats(&self) -> RouterStats {
        RouterStats {
            routed: self.counters.routed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            no_route: self.counters.no_route.load(Ordering::Relaxed),
        }
    }

    pub fn clear_stats(&self) {
        self.counters.routed.store(0, Ordering::Relaxed);
        self.counters.dropped.store(0, Ordering::Relaxed);
        self.counters.no_route.store(0, Ordering::Relaxed);
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
