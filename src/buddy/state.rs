//! Process-wide shared state read and written across adapters and the
//! decision layer (§3 "Global state record"). A single mutex guards every
//! field; there is deliberately no per-field locking since contention here
//! is low (a handful of writes per sensor tick) and the invariant that
//! matters — presence/absence timestamps observed consistently together —
//! needs one lock, not several.

use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct GlobalStateSnapshot {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub last_presence_ts: Option<f64>,
    pub last_absence_ts: Option<f64>,
    pub last_conversation_start_ts: Option<f64>,
    pub last_conversation_end_ts: Option<f64>,
    pub is_light_on: bool,
}

#[derive(Debug, Default)]
struct Inner {
    snapshot: GlobalStateSnapshot,
}

/// Process-wide shared state. Cheap to clone (it's a handle, not the data).
#[derive(Debug, Default)]
pub struct GlobalState {
    inner: Mutex<Inner>,
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> GlobalStateSnapshot {
        self.inner.lock().expect("global state poisoned").snapshot.clone()
    }

    pub fn set_temperature(&self, temperature: f64, humidity: f64) {
        let mut inner = self.inner.lock().expect("global state poisoned");
        inner.snapshot.temperature = Some(temperature);
        inner.snapshot.humidity = Some(humidity);
    }

    pub fn record_presence(&self, at: f64) {
        self.inner.lock().expect("global state poisoned").snapshot.last_presence_ts = Some(at);
    }

    pub fn record_absence(&self, at: f64) {
        self.inner.lock().expect("global state poisoned").snapshot.last_absence_ts = Some(at);
    }

    pub fn record_conversation_start(&self, at: f64) {
        self.inner
            .lock()
            .expect("global state poisoned")
            .snapshot
            .last_conversation_start_ts = Some(at);
    }

    pub fn record_conversation_end(&self, at: f64) {
        self.inner
            .lock()
            .expect("global state poisoned")
            .snapshot
            .last_conversation_end_ts = Some(at);
    }

    pub fn set_light_on(&self, on: bool) {
        self.inner.lock().expect("global state poisoned").snapshot.is_light_on = on;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reads_back_presence() {
        let state = GlobalState::new();
        state.record_presence(123.0);
        state.record_absence(456.0);
        let snap = state.snapshot();
        assert_eq!(snap.last_presence_ts, Some(123.0));
        assert_eq!(snap.last_absence_ts, Some(456.0));
    }

    #[test]
    fn light_flag_defaults_off() {
        let state = GlobalState::new();
        assert!(!state.snapshot().is_light_on);
        state.set_light_on(true);
        assert!(state.snapshot().is_light_on);
    }
}
