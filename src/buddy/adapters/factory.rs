//! The adapter factory (§4.2, §11): a compile-time, class-name-keyed
//! construction table. Deliberately not a dynamic/string-keyed registry of
//! trait objects or closures -- every supported class is matched directly
//! so the full set of adapters is visible at a glance and the compiler
//! checks every arm. `class: "disabled"` is the sentinel for "build
//! nothing" (§4.2), used to turn off a slot in configuration without
//! removing it from the file.
//!
//! Router registration happens here, not by the caller, because only here
//! is the adapter's concrete type still known -- coercing an already
//! type-erased `Arc<dyn OutputAdapter>` to `Arc<dyn RouteTarget>` would
//! require trait-object upcasting, which this crate does not depend on.

use std::sync::Arc;
use std::time::Duration;

use serde_yaml::Value;

use crate::buddy::adapters::input::{
    pipe_in::PipeInAdapter,
    radar::{NoPresenceSensor, RadarAdapter},
    scheduler_adapter::SchedulerAdapter,
    speech_in::{SilentRecognizer, SpeechInAdapter},
    temperature::{FixedSensor, TemperatureAdapter, TemperatureReading},
    wakeword::{SilentDetector, WakewordAdapter},
};
use crate::buddy::adapters::output::{
    bulb::{BulbAdapter, NoopBulbController},
    console::ConsoleAdapter,
    distiller::DistillerAdapter,
    led::{LedAdapter, NoopLedDriver},
    persistence::{PersistenceAdapter, PersistenceStore},
    pipe_out::PipeOutAdapter,
    tts::{SilentPlayer, SilentSynthesizer, TtsAdapter},
};
use crate::buddy::adapters::traits::{InputAdapter, OutputAdapter};
use crate::buddy::audio_coordinator::AudioDeviceCoordinator;
use crate::buddy::config::AdapterEntry;
use crate::buddy::error::{BuddyError, Result};
use crate::buddy::llm::LlmClient;
use crate::buddy::router::Router;
use crate::buddy::state::GlobalState;

const DISABLED: &str = "disabled";

fn cfg_str<'a>(config: &'a std::collections::HashMap<String, Value>, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}

fn cfg_f64(config: &std::collections::HashMap<String, Value>, key: &str) -> Option<f64> {
    config.get(key).and_then(Value::as_f64)
}

fn cfg_u64(config: &std::collections::HashMap<String, Value>, key: &str) -> Option<u64> {
    config.get(key).and_then(Value::as_u64)
}

fn cfg_bool(config: &std::collections::HashMap<String, Value>, key: &str) -> Option<bool> {
    config.get(key).and_then(Value::as_bool)
}

fn require_u64(entry: &AdapterEntry, key: &str) -> Result<u64> {
    cfg_u64(&entry.config, key).ok_or_else(|| {
        BuddyError::Construction(format!(
            "adapter '{}' requires a '{key}' config value with no default",
            entry.class
        ))
    })
}

fn require_str<'a>(entry: &'a AdapterEntry, key: &str) -> Result<&'a str> {
    cfg_str(&entry.config, key).ok_or_else(|| {
        BuddyError::Construction(format!(
            "adapter '{}' requires a '{key}' config value with no default",
            entry.class
        ))
    })
}

/// Collaborators shared by every input adapter that needs them, built once
/// by the caller (the CLI entry point) and threaded through here.
pub struct InputDeps {
    pub audio_coordinator: Arc<AudioDeviceCoordinator>,
    pub global_state: Arc<GlobalState>,
}

/// Collaborators shared by every output adapter that needs them.
pub struct OutputDeps {
    pub audio_coordinator: Arc<AudioDeviceCoordinator>,
    pub persistence_store: Arc<PersistenceStore>,
    pub llm: Arc<dyn LlmClient>,
}

pub fn build_input_adapter(entry: &AdapterEntry, deps: &InputDeps) -> Result<Option<Arc<dyn InputAdapter>>> {
    if entry.class == DISABLED {
        return Ok(None);
    }
    let adapter: Arc<dyn InputAdapter> = match entry.class.as_str() {
        "wakeword" => {
            let wakeword_name = cfg_str(&entry.config, "wakeword_name").unwrap_or("buddy").to_string();
            Arc::new(WakewordAdapter::new(
                wakeword_name,
                Arc::new(SilentDetector),
                deps.audio_coordinator.clone(),
            ))
        }
        "speech_in" => {
            let mut adapter = SpeechInAdapter::new(Arc::new(SilentRecognizer), deps.audio_coordinator.clone());
            if let Some(secs) = cfg_f64(&entry.config, "inactivity_timeout_seconds") {
                adapter = adapter.with_inactivity_timeout(Duration::from_secs_f64(secs));
            }
            Arc::new(adapter)
        }
        "radar" => {
            let confirmations = require_u64(entry, "confirmations")? as usize;
            let interval = Duration::from_secs_f64(cfg_f64(&entry.config, "poll_interval_seconds").unwrap_or(0.5));
            let mut adapter = RadarAdapter::new(Arc::new(NoPresenceSensor), interval, confirmations);
            if let Some(threshold) = cfg_f64(&entry.config, "movement_threshold") {
                adapter = adapter.with_movement_threshold(threshold);
            }
            Arc::new(adapter)
        }
        "temperature" => {
            let interval = Duration::from_secs_f64(cfg_f64(&entry.config, "poll_interval_seconds").unwrap_or(30.0));
            let sensor = Arc::new(FixedSensor {
                reading: TemperatureReading {
                    temperature: 20.0,
                    humidity: 50.0,
                },
            });
            Arc::new(TemperatureAdapter::new(sensor, interval))
        }
        "scheduler" => {
            let mut adapter = SchedulerAdapter::new(deps.global_state.clone());
            if let Some(secs) = cfg_f64(&entry.config, "reset_inactivity_seconds") {
                adapter = adapter.with_reset_inactivity(Duration::from_secs_f64(secs));
            }
            let light_enabled = cfg_bool(&entry.config, "light_schedule_enabled").unwrap_or(false);
            let hour_start = cfg_u64(&entry.config, "evening_hour_start").unwrap_or(18) as u32;
            let hour_end = cfg_u64(&entry.config, "evening_hour_end").unwrap_or(7) as u32;
            adapter = adapter.with_light_schedule(light_enabled, hour_start, hour_end);
            Arc::new(adapter)
        }
        "pipe_in" => {
            let path = require_str(entry, "path")?;
            Arc::new(PipeInAdapter::new(path))
        }
        other => {
            return Err(BuddyError::Construction(format!(
                "no input adapter registered for class '{other}'"
            )));
        }
    };
    Ok(Some(adapter))
}

pub fn build_output_adapter(
    entry: &AdapterEntry,
    deps: &OutputDeps,
    router: &Router,
) -> Result<Option<Arc<dyn OutputAdapter>>> {
    if entry.class == DISABLED {
        return Ok(None);
    }
    match entry.class.as_str() {
        "tts" => {
            let adapter = Arc::new(TtsAdapter::new(
                deps.audio_coordinator.clone(),
                Arc::new(SilentSynthesizer),
                Arc::new(SilentPlayer),
            ));
            for kind in adapter.handled_kinds() {
                router.register(*kind, adapter.clone());
            }
            Ok(Some(adapter))
        }
        "led" => {
            let adapter = Arc::new(LedAdapter::new(Arc::new(NoopLedDriver)));
            for kind in adapter.handled_kinds() {
                router.register(*kind, adapter.clone());
            }
            Ok(Some(adapter))
        }
        "persistence" => {
            let adapter = Arc::new(PersistenceAdapter::new(deps.persistence_store.clone()));
            for kind in adapter.handled_kinds() {
                router.register(*kind, adapter.clone());
            }
            Ok(Some(adapter))
        }
        "distiller" => {
            let adapter = Arc::new(DistillerAdapter::new(deps.persistence_store.clone(), deps.llm.clone()));
            for kind in adapter.handled_kinds() {
                router.register(*kind, adapter.clone());
            }
            Ok(Some(adapter))
        }
        "bulb" => {
            let adapter = Arc::new(BulbAdapter::new(Arc::new(NoopBulbController)));
            for kind in adapter.handled_kinds() {
                router.register(*kind, adapter.clone());
            }
            Ok(Some(adapter))
        }
        "pipe_out" => {
            let path = require_str(entry, "path")?;
            let adapter = Arc::new(PipeOutAdapter::new(path));
            for kind in adapter.handled_kinds() {
                router.register(*kind, adapter.clone());
            }
            Ok(Some(adapter))
        }
        "console" => {
            let adapter = Arc::new(ConsoleAdapter::new());
            for kind in adapter.handled_kinds() {
                router.register(*kind, adapter.clone());
            }
            Ok(Some(adapter))
        }
        other => Err(BuddyError::Construction(format!(
            "no output adapter registered for class '{other}'"
        ))),
    }
}

pub fn build_input_adapters(entries: &[AdapterEntry], deps: &InputDeps) -> Result<Vec<Arc<dyn InputAdapter>>> {
    let mut adapters = Vec::new();
    for entry in entries {
        if let Some(adapter) = build_input_adapter(entry, deps)? {
            adapters.push(adapter);
        }
    }
    Ok(adapters)
}

pub fn build_output_adapters(
    entries: &[AdapterEntry],
    deps: &OutputDeps,
    router: &Router,
) -> Result<Vec<Arc<dyn OutputAdapter>>> {
    let mut adapters = Vec::new();
    for entry in entries {
        if let Some(adapter) = build_output_adapter(entry, deps, router)? {
            adapters.push(adapter);
        }
    }
    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(class: &str, config: HashMap<String, Value>) -> AdapterEntry {
        AdapterEntry {
            class: class.to_string(),
            config,
        }
    }

    #[test]
    fn disabled_sentinel_builds_nothing() {
        let deps = InputDeps {
            audio_coordinator: Arc::new(AudioDeviceCoordinator::new()),
            global_state: Arc::new(GlobalState::new()),
        };
        let result = build_input_adapter(&entry(DISABLED, HashMap::new()), &deps).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn radar_requires_confirmations() {
        let deps = InputDeps {
            audio_coordinator: Arc::new(AudioDeviceCoordinator::new()),
            global_state: Arc::new(GlobalState::new()),
        };
        let err = build_input_adapter(&entry("radar", HashMap::new()), &deps).unwrap_err();
        assert!(matches!(err, BuddyError::Construction(_)));
    }

    #[test]
    fn unknown_output_class_is_a_construction_error() {
        let store = Arc::new(PersistenceStore::open(tempfile::tempdir().unwrap().path()));
        let deps = OutputDeps {
            audio_coordinator: Arc::new(AudioDeviceCoordinator::new()),
            persistence_store: store,
            llm: Arc::new(crate::buddy::llm::test_support::FakeLlmClient::new("")),
        };
        let router = Router::new();
        let err = build_output_adapter(&entry("not_a_class", HashMap::new()), &deps, &router).unwrap_err();
        assert!(matches!(err, BuddyError::Construction(_)));
    }

    #[test]
    fn known_output_classes_all_construct() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PersistenceStore::open(dir.path()));
        let deps = OutputDeps {
            audio_coordinator: Arc::new(AudioDeviceCoordinator::new()),
            persistence_store: store,
            llm: Arc::new(crate::buddy::llm::test_support::FakeLlmClient::new("")),
        };
        let router = Router::new();
        for class in ["tts", "led", "persistence", "distiller", "bulb", "console"] {
            let result = build_output_adapter(&entry(class, HashMap::new()), &deps, &router).unwrap();
            assert!(result.is_some(), "expected '{class}' to construct");
        }
    }
}
