//! Bounded queues used throughout the core: a priority queue (input queue,
//! per-subscriber output queues) and a plain FIFO (the interrupt queue).
//!
//! Both expose a non-blocking `offer() -> bool` for producers and an async
//! `dequeue_timeout` for the single consumer, matching the drop-on-full
//! policy and consumer-with-timeout pattern of §3/§8 of the spec. Modeled
//! on the hand-rolled bounded queue with drop policy in the teacher's
//! `pipeline::coordinator::LlmInputQueue` — no crate in the dependency
//! stack provides a bounded priority queue, so this is a deliberate,
//! from-scratch primitive rather than an omission.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::buddy::event::Event;

struct QueueItem {
    event: Event,
    seq: u64,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.event.priority == other.event.priority && self.seq == other.seq
    }
}
impl Eq for QueueItem {}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse priority so the numerically
        // smallest (most urgent) priority compares greatest, and reverse
        // sequence so the earliest-enqueued item among equal priorities
        // compares greatest (stable FIFO within a priority class).
        other
            .event
            .priority
            .cmp(&self.event.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct PriorityInner {
    heap: BinaryHeap<QueueItem>,
    next_seq: u64,
}

/// A bounded priority queue of events. Single consumer, many producers.
pub struct PriorityQueue {
    capacity: usize,
    inner: Mutex<PriorityInner>,
    item_available: Notify,
}

impl PriorityQueue {
    pub fn new(capacity: usize) -> Self {
        PriorityQueue {
            capacity,
            inner: Mutex::new(PriorityInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            item_available: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking enqueue. Returns `false` without blocking if the queue
    /// is already at capacity (§3, §8 "per-subscriber queue full").
    pub fn offer(&self, event: Event) -> bool {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.heap.len() >= self.capacity {
            return false;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(QueueItem { event, seq });
        drop(inner);
        self.item_available.notify_one();
        true
    }

    /// Dequeue the most urgent pending event, waiting up to `timeout_dur`
    /// for one to arrive if the queue is currently empty. Returns `None`
    /// on timeout so the caller (the Orchestrator) can run its periodic
    /// timer checks (§4.3 step 3.2).
    pub async fn dequeue_timeout(&self, timeout_dur: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout_dur;
        loop {
            let notified = self.item_available.notified();
            {
                let mut inner = self.inner.lock().expect("queue mutex poisoned");
                if let Some(item) = inner.heap.pop() {
                    return Some(item.event);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Dequeue the most urgent pending event, waiting indefinitely if the
    /// queue is currently empty. Used by output-adapter worker loops,
    /// which have nothing else to do between events (§3 "per-consumer
    /// queue", §9.2 reference output adapters).
    pub async fn dequeue(&self) -> Event {
        loop {
            let notified = self.item_available.notified();
            {
                let mut inner = self.inner.lock().expect("queue mutex poisoned");
                if let Some(item) = inner.heap.pop() {
                    return item.event;
                }
            }
            notified.await;
        }
    }
}

struct FifoInner {
    deque: VecDeque<Event>,
}

/// A bounded FIFO queue, used for the interrupt queue (§3). Unlike
/// [`PriorityQueue`] it has no priority ordering — every interrupt is
/// urgent by definition.
pub struct FifoQueue {
    capacity: usize,
    inner: Mutex<FifoInner>,
    item_available: Notify,
}

impl FifoQueue {
    pub fn new(capacity: usize) -> Self {
        FifoQueue {
            capacity,
            inner: Mutex::new(FifoInner {
                deque: VecDeque::new(),
            }),
            item_available: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").deque.len()
    }

    pub fn offer(&self, event: Event) -> bool {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.deque.len() >= self.capacity {
            return false;
        }
        inner.deque.push_back(event);
        drop(inner);
        self.item_available.notify_one();
        true
    }

    pub async fn dequeue(&self) -> Event {
        loop {
            let notified = self.item_available.notified();
            {
                let mut inner = self.inner.lock().expect("queue mutex poisoned");
                if let Some(event) = inner.deque.pop_front() {
                    return event;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buddy::event::{EventContent, InputKind, Priority};

    fn ev(p: Priority) -> Event {
        Event::input(InputKind::SensorPresence, EventContent::Bool(true)).with_priority(p)
    }

    #[tokio::test]
    async fn dequeues_in_priority_order_with_fifo_ties() {
        let q = PriorityQueue::new(16);
        assert!(q.offer(ev(Priority::Low)));
        assert!(q.offer(ev(Priority::Critical)));
        assert!(q.offer(ev(Priority::High)));
        assert!(q.offer(ev(Priority::Normal)));

        let order: Vec<Priority> = futures_order(&q).await;
        assert_eq!(
            order,
            vec![Priority::Critical, Priority::High, Priority::Normal, Priority::Low]
        );
    }

    async fn futures_order(q: &PriorityQueue) -> Vec<Priority> {
        let mut out = Vec::new();
        while let Some(e) = q.dequeue_timeout(Duration::from_millis(50)).await {
            out.push(e.priority);
        }
        out
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let q = PriorityQueue::new(16);
        for i in 0..3 {
            let mut e = ev(Priority::Normal);
            e.content = EventContent::Number(i as f64);
            assert!(q.offer(e));
        }
        let mut seen = Vec::new();
        while let Some(e) = q.dequeue_timeout(Duration::from_millis(20)).await {
            if let EventContent::Number(n) = e.content {
                seen.push(n);
            }
        }
        assert_eq!(seen, vec![0.0, 1.0, 2.0]);
    }

    #[tokio::test]
    async fn offer_returns_false_when_full() {
        let q = PriorityQueue::new(1);
        assert!(q.offer(ev(Priority::Normal)));
        assert!(!q.offer(ev(Priority::Normal)));
    }

    #[tokio::test]
    async fn dequeue_timeout_returns_none_on_empty() {
        let q = PriorityQueue::new(4);
        let result = q.dequeue_timeout(Duration::from_millis(20)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn dequeue_without_timeout_waits_for_the_most_urgent_item() {
        let q = PriorityQueue::new(16);
        assert!(q.offer(ev(Priority::Low)));
        assert!(q.offer(ev(Priority::Critical)));
        let first = q.dequeue().await;
        assert_eq!(first.priority, Priority::Critical);
        let second = q.dequeue().await;
        assert_eq!(second.priority, Priority::Low);
    }

    #[tokio::test]
    async fn fifo_queue_preserves_order_and_bounds() {
        let q = FifoQueue::new(2);
        assert!(q.offer(ev(Priority::Critical)));
        assert!(q.offer(ev(Priority::Critical)));
        assert!(!q.offer(ev(Priority::Critical)));
        q.dequeue().await;
        assert!(q.offer(ev(Priority::Critical)));
    }
}
