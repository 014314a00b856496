//! The core event algebra: priority, event kinds, and adapter commands.
//!
//! Every producer and consumer in the orchestration core exchanges values of
//! a single type, [`Event`]. Its `kind` field disambiguates whether it is an
//! input (something a sensor or input adapter observed) or an output
//! (something the decision layer wants an output adapter to do).

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::buddy::error::{BuddyError, Result};

/// Urgency ordering shared by every queue in the core. Lower numeric value
/// sorts first — `Critical` is dequeued before `Low` regardless of arrival
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// The kinds of input event a producer may inject into the input queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    UserSpeech,
    Wakeword,
    ConversationEnd,
    Interrupt,
    SensorPresence,
    SensorMovement,
    SensorTemperature,
    DirectOutput,
    AdapterCommand,
    TriggerArchivist,
    ChatSessionReset,
    LightOn,
    LightOff,
    Shutdown,
    Restart,
}

/// The kinds of output event the decision layer may emit, routed to every
/// subscribed output adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Speak,
    LedControl,
    SaveHistory,
    SaveMemory,
    DistillMemory,
    LightOn,
    LightOff,
}

/// Either half of the event algebra. Carried inside [`Event::kind`] so a
/// single queue/router can hold both input and output traffic (input
/// queues only ever hold `Input`, per-subscriber output queues only ever
/// hold `Output`, but `DirectOutput` briefly carries an `Output` event as
/// the payload of an `Input` one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Input(InputKind),
    Output(OutputKind),
}

impl From<InputKind> for EventKind {
    fn from(k: InputKind) -> Self {
        EventKind::Input(k)
    }
}

impl From<OutputKind> for EventKind {
    fn from(k: OutputKind) -> Self {
        EventKind::Output(k)
    }
}

/// The payload carried by an event. The concrete variant in use depends on
/// the event's kind (§3 of the spec); this is intentionally a loose union
/// rather than one struct per kind, mirroring the dynamically-typed wire
/// format events round-trip through (§6 pipe-in/out protocols).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventContent {
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    /// Used by `DirectOutput`, whose payload is itself an output event.
    Output(Box<Event>),
    Json(Value),
}

impl EventContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventContent::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EventContent::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_output(&self) -> Option<&Event> {
        match self {
            EventContent::Output(e) => Some(e),
            _ => None,
        }
    }
}

impl From<&str> for EventContent {
    fn from(s: &str) -> Self {
        EventContent::Text(s.to_string())
    }
}

impl From<String> for EventContent {
    fn from(s: String) -> Self {
        EventContent::Text(s)
    }
}

impl From<bool> for EventContent {
    fn from(b: bool) -> Self {
        EventContent::Bool(b)
    }
}

/// Arbitrary side-channel data attached to an event. Documented per-kind in
/// §3/§4.4 of the spec (e.g. `wakeword`, `mov_energy`, `triggered_by`).
pub type Metadata = HashMap<String, Value>;

/// A single value exchanged between producers, the orchestrator, the
/// decision layer, the router, and consumers. See module docs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub priority: Priority,
    pub kind: EventKind,
    pub content: EventContent,
    pub timestamp: f64,
    pub source: Option<String>,
    pub metadata: Metadata,
}

impl OutputKind {
    /// The wire name used in the pipe-out `type` field and the pipe-in
    /// `direct_output` frame's nested `event_type` field (§6).
    pub fn wire_name(self) -> &'static str {
        match self {
            OutputKind::Speak => "speak",
            OutputKind::LedControl => "led_control",
            OutputKind::SaveHistory => "save_history",
            OutputKind::SaveMemory => "save_memory",
            OutputKind::DistillMemory => "distill_memory",
            OutputKind::LightOn => "light_on",
            OutputKind::LightOff => "light_off",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "speak" => OutputKind::Speak,
            "led_control" => OutputKind::LedControl,
            "save_history" => OutputKind::SaveHistory,
            "save_memory" => OutputKind::SaveMemory,
            "distill_memory" => OutputKind::DistillMemory,
            "light_on" => OutputKind::LightOn,
            "light_off" => OutputKind::LightOff,
            other => {
                return Err(BuddyError::Validation(format!("unknown output event type: {other}")));
            }
        })
    }
}

impl InputKind {
    /// The wire name used in the pipe-in `type` field (§6).
    pub fn wire_name(self) -> &'static str {
        match self {
            InputKind::UserSpeech => "user_speech",
            InputKind::Wakeword => "wakeword",
            InputKind::ConversationEnd => "conversation_end",
            InputKind::Interrupt => "interrupt",
            InputKind::SensorPresence => "sensor_presence",
            InputKind::SensorMovement => "sensor_movement",
            InputKind::SensorTemperature => "sensor_temperature",
            InputKind::DirectOutput => "direct_output",
            InputKind::AdapterCommand => "adapter_command",
            InputKind::TriggerArchivist => "trigger_archivist",
            InputKind::ChatSessionReset => "chat_session_reset",
            InputKind::LightOn => "light_on",
            InputKind::LightOff => "light_off",
            InputKind::Shutdown => "shutdown",
            InputKind::Restart => "restart",
        }
    }
}

impl Event {
    /// Construct an event with the current wall-clock timestamp.
    pub fn new(priority: Priority, kind: impl Into<EventKind>, content: EventContent) -> Self {
        Event {
            priority,
            kind: kind.into(),
            content,
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
            source: None,
            metadata: Metadata::new(),
        }
    }

    pub fn input(kind: InputKind, content: EventContent) -> Self {
        Event::new(Priority::Normal, kind, content)
    }

    pub fn output(kind: OutputKind, content: EventContent) -> Self {
        Event::new(Priority::Normal, kind, content)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn meta_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }

    pub fn input_kind(&self) -> Option<InputKind> {
        match self.kind {
            EventKind::Input(k) => Some(k),
            EventKind::Output(_) => None,
        }
    }

    pub fn output_kind(&self) -> Option<OutputKind> {
        match self.kind {
            EventKind::Output(k) => Some(k),
            EventKind::Input(_) => None,
        }
    }
}

/// The closed set of advisory commands broadcast synchronously to every
/// adapter (§3, §4.2). Each adapter decides for itself whether a given
/// command applies; `handle_command` returning `false` simply means "not
/// for me" or "already in that state", never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterCommand {
    WakewordListenStart,
    WakewordListenStop,
    VoiceInputStart,
    VoiceInputStop,
    VoiceOutputStop,
    VoiceOutputResume,
    SensorPause,
    SensorResume,
    LedListening,
    LedThinking,
    LedSpeaking,
    LedIdle,
}

impl AdapterCommand {
    /// The wire name used on the pipe-in protocol and in `AdapterCommand`
    /// input-event payloads (§3, §6).
    pub fn wire_name(self) -> &'static str {
        match self {
            AdapterCommand::WakewordListenStart => "WAKEWORD_LISTEN_START",
            AdapterCommand::WakewordListenStop => "WAKEWORD_LISTEN_STOP",
            AdapterCommand::VoiceInputStart => "VOICE_INPUT_START",
            AdapterCommand::VoiceInputStop => "VOICE_INPUT_STOP",
            AdapterCommand::VoiceOutputStop => "VOICE_OUTPUT_STOP",
            AdapterCommand::VoiceOutputResume => "VOICE_OUTPUT_RESUME",
            AdapterCommand::SensorPause => "SENSOR_PAUSE",
            AdapterCommand::SensorResume => "SENSOR_RESUME",
            AdapterCommand::LedListening => "LED_LISTENING",
            AdapterCommand::LedThinking => "LED_THINKING",
            AdapterCommand::LedSpeaking => "LED_SPEAKING",
            AdapterCommand::LedIdle => "LED_IDLE",
        }
    }

    /// Parse a wire name into its command, per §3/§4.4's `AdapterCommand`
    /// input-event handling.
    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "WAKEWORD_LISTEN_START" => AdapterCommand::WakewordListenStart,
            "WAKEWORD_LISTEN_STOP" => AdapterCommand::WakewordListenStop,
            "VOICE_INPUT_START" => AdapterCommand::VoiceInputStart,
            "VOICE_INPUT_STOP" => AdapterCommand::VoiceInputStop,
            "VOICE_OUTPUT_STOP" => AdapterCommand::VoiceOutputStop,
            "VOICE_OUTPUT_RESUME" => AdapterCommand::VoiceOutputResume,
            "SENSOR_PAUSE" => AdapterCommand::SensorPause,
            "SENSOR_RESUME" => AdapterCommand::SensorResume,
            "LED_LISTENING" => AdapterCommand::LedListening,
            "LED_THINKING" => AdapterCommand::LedThinking,
            "LED_SPEAKING" => AdapterCommand::LedSpeaking,
            "LED_IDLE" => AdapterCommand::LedIdle,
            other => {
                return Err(BuddyError::Validation(format!(
                    "unrecognized adapter command: {other}"
                )));
            }
        })
    }
}

/// The on-the-wire shape of one pipe-out frame (§6): a flat `type` string
/// rather than the nested `kind` object `Event`'s own derive produces.
#[derive(Serialize)]
pub struct OutputWireFrame<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub content: &'a EventContent,
    pub timestamp: f64,
    pub priority: Priority,
    pub source: Option<&'a str>,
    pub metadata: &'a Metadata,
}

impl<'a> OutputWireFrame<'a> {
    pub fn from_event(event: &'a Event) -> Option<Self> {
        let kind = event.output_kind()?;
        Some(OutputWireFrame {
            kind: kind.wire_name(),
            content: &event.content,
            timestamp: event.timestamp,
            priority: event.priority,
            source: event.source.as_deref(),
            metadata: &event.metadata,
        })
    }
}

/// The on-the-wire shape of the `direct_output` frame's nested output spec
/// (§6): `{"event_type": "...", "content": ..., "priority": "..."}`.
#[derive(Deserialize)]
pub struct DirectOutputSpec {
    pub event_type: String,
    #[serde(default)]
    pub content: EventContent,
    #[serde(default)]
    pub priority: Priority,
}

impl Default for EventContent {
    fn default() -> Self {
        EventContent::Empty
    }
}

impl DirectOutputSpec {
    pub fn into_event(self) -> Result<Event> {
        let kind = OutputKind::parse(&self.event_type)?;
        Ok(Event::output(kind, self.content).with_priority(self.priority))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_critical_first() {
        let mut v = vec![Priority::Low, Priority::Critical, Priority::High, Priority::Normal];
        v.sort();
        assert_eq!(v, vec![Priority::Critical, Priority::High, Priority::Normal, Priority::Low]);
    }

    #[test]
    fn adapter_command_round_trips_through_wire_name() {
        for cmd in [
            AdapterCommand::WakewordListenStart,
            AdapterCommand::VoiceOutputStop,
            AdapterCommand::LedIdle,
        ] {
            let parsed = AdapterCommand::parse(cmd.wire_name()).unwrap();
            assert_eq!(parsed, cmd);
        }
    }

    #[test]
    fn unknown_command_name_is_a_validation_error() {
        assert!(AdapterCommand::parse("NOT_A_COMMAND").is_err());
    }

    #[test]
    fn output_wire_frame_uses_a_flat_type_field() {
        let event = Event::output(OutputKind::Speak, EventContent::Text("ciao".into()))
            .with_priority(Priority::High)
            .with_source("tts");
        let frame = OutputWireFrame::from_event(&event).unwrap();
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "speak");
        assert_eq!(json["priority"], "HIGH");
        assert_eq!(json["source"], "tts");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn output_wire_frame_is_none_for_an_input_event() {
        let event = Event::input(InputKind::Wakeword, EventContent::Empty);
        assert!(OutputWireFrame::from_event(&event).is_none());
    }

    #[test]
    fn direct_output_spec_parses_event_type_and_defaults_priority() {
        let spec: DirectOutputSpec =
            serde_json::from_str(r#"{"event_type": "speak", "content": "hi"}"#).unwrap();
        let event = spec.into_event().unwrap();
        assert_eq!(event.output_kind(), Some(OutputKind::Speak));
        assert_eq!(event.content.as_text(), Some("hi"));
        assert_eq!(event.priority, Priority::Normal);
    }

    #[test]
    fn direct_output_spec_rejects_unknown_event_type() {
        let spec: DirectOutputSpec =
            serde_json::from_str(r#"{"event_type": "not_real", "content": null}"#).unwrap();
        assert!(spec.into_event().is_err());
    }

    #[test]
    fn direct_output_wraps_an_output_event() {
        let inner = Event::output(OutputKind::Speak, "hello".into());
        let wrapper = Event::input(
            InputKind::DirectOutput,
            EventContent::Output(Box::new(inner.clone())),
        );
        let unwrapped = wrapper.content.as_output().unwrap();
        assert_eq!(unwrapped.output_kind(), Some(OutputKind::Speak));
        assert_eq!(unwrapped.content.as_text(), Some("hello"));
    }
}
