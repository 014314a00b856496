//! The decision layer (§4.4). Pure function-of-state: one event in, a list
//! of output events and adapter commands out. Reentrant only through its
//! own internal locking; the Orchestrator guarantees single-threaded
//! invocation (§4.4 Contract).

use std::sync::{Arc, Mutex};

use chrono::{Timelike, Utc};
use tracing::{debug, info, warn};

use crate::buddy::error::{BuddyError, Result};
use crate::buddy::event::{
    AdapterCommand, Event, EventContent, InputKind, OutputKind, Priority,
};
use crate::buddy::llm::{LlmClient, LlmOutcome, SessionInitError};
use crate::buddy::state::GlobalState;

/// Required, fail-fast Brain configuration (§4.3 "Startup fail-fast").
#[derive(Debug, Clone)]
pub struct BrainConfig {
    pub model_id: String,
    pub system_instruction: String,
    pub temperature: f64,
    pub archivist_interval_seconds: f64,
    pub light_off_timeout_seconds: f64,
    pub farewell_text: String,
    pub alexa_turn_on_phrase: String,
    pub alexa_turn_off_phrase: String,
    /// Hour-of-day window (start inclusive, end exclusive, wraps past
    /// midnight) in which new presence triggers the "turn on all lights"
    /// Alexa automation (§4.4 `SensorPresence=true`).
    pub evening_hour_start: u32,
    pub evening_hour_end: u32,
}

impl Default for BrainConfig {
    fn default() -> Self {
        BrainConfig {
            model_id: String::new(),
            system_instruction: String::new(),
            temperature: 0.7,
            archivist_interval_seconds: 3600.0,
            light_off_timeout_seconds: 180.0,
            farewell_text: "Mi sto spegnendo. A presto!".to_string(),
            alexa_turn_on_phrase: "accendi tutte le luci".to_string(),
            alexa_turn_off_phrase: "spegni tutte le luci".to_string(),
            evening_hour_start: 18,
            evening_hour_end: 7,
        }
    }
}

/// Why the Brain requested the process to stop (§4.4 `Shutdown`/`Restart`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Shutdown,
    Restart,
}

type SessionFactory = dyn Fn() -> std::result::Result<Arc<dyn LlmClient>, SessionInitError> + Send + Sync;

struct Session {
    client: Mutex<Option<Arc<dyn LlmClient>>>,
    factory: Arc<SessionFactory>,
}

impl Session {
    fn build(factory: Arc<SessionFactory>) -> Result<Self> {
        let client = match (factory)() {
            Ok(client) => Some(client),
            Err(SessionInitError::Configuration(msg)) => {
                return Err(BuddyError::Configuration(msg));
            }
            Err(SessionInitError::Transient(msg)) => {
                warn!(error = %msg, "LLM session unavailable at startup, degrading");
                None
            }
        };
        Ok(Session {
            client: Mutex::new(client),
            factory,
        })
    }

    fn reset(&self) {
        match (self.factory)() {
            Ok(client) => {
                *self.client.lock().expect("session mutex poisoned") = Some(client);
                info!("chat session reset");
            }
            Err(err) => {
                *self.client.lock().expect("session mutex poisoned") = None;
                warn!(error = %err, "chat session reset failed, leaving session unavailable");
            }
        }
    }

    fn get(&self) -> Option<Arc<dyn LlmClient>> {
        self.client.lock().expect("session mutex poisoned").clone()
    }
}

struct Timers {
    last_archivist_ts: f64,
    presence_lost_ts: Option<f64>,
}

pub struct Brain {
    config: BrainConfig,
    session: Session,
    timers: Mutex<Timers>,
    state: Arc<GlobalState>,
    shutdown: Mutex<Option<ShutdownReason>>,
}

fn now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

impl Brain {
    /// Construct the Brain. Fails fast (`Configuration`) if any required
    /// key is empty/unset, or if the session factory itself reports a
    /// configuration problem (§4.3).
    pub fn new(
        config: BrainConfig,
        state: Arc<GlobalState>,
        session_factory: Arc<SessionFactory>,
    ) -> Result<Self> {
        if config.model_id.is_empty() {
            return Err(BuddyError::Configuration("brain.model_id is required".into()));
        }
        if config.system_instruction.is_empty() {
            return Err(BuddyError::Configuration(
                "brain.system_instruction is required".into(),
            ));
        }
        if config.archivist_interval_seconds <= 0.0 {
            return Err(BuddyError::Configuration(
                "brain.archivist_interval must be positive".into(),
            ));
        }

        let session = Session::build(session_factory)?;
        Ok(Brain {
            config,
            session,
            timers: Mutex::new(Timers {
                last_archivist_ts: now(),
                presence_lost_ts: None,
            }),
            state,
            shutdown: Mutex::new(None),
        })
    }

    /// Consumes and returns the shutdown request set by the last processed
    /// event, if any. The Orchestrator polls this after routing each
    /// event's outputs (§4.3 step 3.5-3.6, §4.4 `Shutdown`/`Restart`).
    pub fn take_shutdown_request(&self) -> Option<ShutdownReason> {
        self.shutdown.lock().expect("shutdown mutex poisoned").take()
    }

    /// Process one input event, returning the output events and adapter
    /// commands it produces. Always appends the two timer checks after
    /// the per-kind handler, in fixed order (§4.4).
    pub async fn process(&self, event: Event) -> (Vec<Event>, Vec<AdapterCommand>) {
        let (mut outputs, mut commands) = self.dispatch(&event).await;
        let (timer_outputs, timer_commands) = self.run_timers();
        outputs.extend(timer_outputs);
        commands.extend(timer_commands);
        (outputs, commands)
    }

    /// Run the archivist/light-off timer checks without a preceding
    /// handler dispatch — used on a bare queue-timeout tick (§4.3 step
    /// 3.2, §4.4).
    pub fn tick(&self) -> (Vec<Event>, Vec<AdapterCommand>) {
        self.run_timers()
    }

    async fn dispatch(&self, event: &Event) -> (Vec<Event>, Vec<AdapterCommand>) {
        let Some(kind) = event.input_kind() else {
            warn!("brain.process called with a non-input event; ignoring");
            return (Vec::new(), Vec::new());
        };

        match kind {
            InputKind::DirectOutput => self.handle_direct_output(event),
            InputKind::AdapterCommand => self.handle_adapter_command(event),
            InputKind::Wakeword => self.handle_wakeword(event),
            InputKind::ConversationEnd => self.handle_conversation_end(),
            InputKind::UserSpeech => self.handle_user_speech(event).await,
            InputKind::SensorPresence => self.handle_sensor_presence(event),
            InputKind::SensorMovement => self.handle_sensor_movement(event),
            InputKind::SensorTemperature => self.handle_sensor_temperature(event),
            InputKind::TriggerArchivist => self.handle_trigger_archivist(),
            InputKind::ChatSessionReset => self.handle_chat_session_reset(),
            InputKind::LightOn => self.handle_light_passthrough(event, OutputKind::LightOn),
            InputKind::LightOff => self.handle_light_passthrough(event, OutputKind::LightOff),
            InputKind::Interrupt => {
                warn!("Interrupt event reached Brain.process; expected to be consumed by the interrupt worker");
                (Vec::new(), Vec::new())
            }
            InputKind::Shutdown => self.handle_shutdown(event, ShutdownReason::Shutdown),
            InputKind::Restart => self.handle_shutdown(event, ShutdownReason::Restart),
        }
    }

    fn handle_direct_output(&self, event: &Event) -> (Vec<Event>, Vec<AdapterCommand>) {
        match event.content.as_output() {
            Some(inner) => (vec![inner.clone()], Vec::new()),
            None => {
                warn!("DirectOutput content was not an output event; dropping");
                (Vec::new(), Vec::new())
            }
        }
    }

    fn handle_adapter_command(&self, event: &Event) -> (Vec<Event>, Vec<AdapterCommand>) {
        let Some(name) = event.content.as_text() else {
            warn!("AdapterCommand event content was not a string; dropping");
            return (Vec::new(), Vec::new());
        };
        match AdapterCommand::parse(name) {
            Ok(cmd) => (Vec::new(), vec![cmd]),
            Err(err) => {
                warn!(error = %err, "dropping AdapterCommand event with unrecognized name");
                (Vec::new(), Vec::new())
            }
        }
    }

    fn handle_wakeword(&self, event: &Event) -> (Vec<Event>, Vec<AdapterCommand>) {
        let wakeword = event.meta_str("wakeword").unwrap_or("buddy");
        debug!(wakeword, "wakeword detected");
        self.state.record_conversation_start(now());
        let led = Event::output(OutputKind::LedControl, EventContent::Empty)
            .with_meta("led", "ascolto")
            .with_meta("command", "blink")
            .with_meta("continuous", true)
            .with_meta("on_time", 0.5)
            .with_meta("off_time", 0.5);
        (
            vec![led],
            vec![AdapterCommand::WakewordListenStop, AdapterCommand::VoiceInputStart],
        )
    }

    fn handle_conversation_end(&self) -> (Vec<Event>, Vec<AdapterCommand>) {
        self.state.record_conversation_end(now());
        let led = Event::output(OutputKind::LedControl, EventContent::Empty)
            .with_meta("led", "ascolto")
            .with_meta("command", "off");
        (vec![led], vec![AdapterCommand::WakewordListenStart])
    }

    async fn handle_user_speech(&self, event: &Event) -> (Vec<Event>, Vec<AdapterCommand>) {
        let text = event.content.as_text().unwrap_or_default().to_string();
        let mut outputs = vec![Event::output(
            OutputKind::SaveHistory,
            EventContent::Empty,
        )
        .with_meta("role", "user")
        .with_meta("text", text.clone())];

        let reply = match self.session.get() {
            Some(client) => match client.send(&text).await {
                LlmOutcome::Reply(reply) => reply,
                LlmOutcome::ValidationError(msg) => {
                    warn!(error = %msg, "LLM rejected the request");
                    "Mi dispiace, non ho capito bene.".to_string()
                }
                LlmOutcome::ProviderError(msg) => {
                    warn!(error = %msg, "LLM provider error");
                    "Mi dispiace, c'è stato un problema. Riprova tra poco.".to_string()
                }
            },
            None => {
                warn!("no LLM session available, returning fallback apology");
                "Mi dispiace, non sono disponibile in questo momento.".to_string()
            }
        };

        outputs.push(
            Event::output(OutputKind::SaveHistory, EventContent::Empty)
                .with_meta("role", "model")
                .with_meta("text", reply.clone()),
        );

        if matches!(event.input_kind(), Some(InputKind::UserSpeech)) {
            outputs.push(
                Event::output(OutputKind::Speak, EventContent::Text(reply))
                    .with_priority(Priority::High)
                    .with_meta("triggered_by", "user_speech"),
            );
        }

        (outputs, Vec::new())
    }

    fn handle_sensor_presence(&self, event: &Event) -> (Vec<Event>, Vec<AdapterCommand>) {
        let present = event.content.as_bool().unwrap_or(false);
        let mut timers = self.timers.lock().expect("timers mutex poisoned");

        if present {
            self.state.record_presence(event.timestamp);
            if timers.presence_lost_ts.take().is_some() {
                debug!("presence re-detected before light-off timer elapsed, cancelling timer");
                return (Vec::new(), Vec::new());
            }
            drop(timers);

            let mov_energy = event.meta_f64("mov_energy").unwrap_or(0.0);
            let static_energy = event.meta_f64("static_energy").unwrap_or(0.0);
            let distance = event.meta_f64("distance").unwrap_or(0.0);
            debug!(mov_energy, static_energy, distance, "new presence detected");

            let hour = Utc::now().hour();
            let in_evening_window = if self.config.evening_hour_start <= self.config.evening_hour_end {
                hour >= self.config.evening_hour_start && hour < self.config.evening_hour_end
            } else {
                hour >= self.config.evening_hour_start || hour < self.config.evening_hour_end
            };

            if in_evening_window {
                return self.speak_alexa_sequence(&self.config.alexa_turn_on_phrase);
            }
            if mov_energy < 20.0 && static_energy < 20.0 {
                debug!("weak presence signal, likely false positive");
            }
            (Vec::new(), Vec::new())
        } else {
            self.state.record_absence(event.timestamp);
            if timers.presence_lost_ts.is_none() {
                timers.presence_lost_ts = Some(event.timestamp);
            }
            (Vec::new(), Vec::new())
        }
    }

    fn handle_sensor_movement(&self, _event: &Event) -> (Vec<Event>, Vec<AdapterCommand>) {
        (Vec::new(), Vec::new())
    }

    fn handle_sensor_temperature(&self, event: &Event) -> (Vec<Event>, Vec<AdapterCommand>) {
        let temperature = match &event.content {
            EventContent::Number(n) => Some(*n),
            _ => None,
        };
        if let (Some(temp), Some(humidity)) = (temperature, event.meta_f64("humidity")) {
            self.state.set_temperature(temp, humidity);
        }
        (Vec::new(), Vec::new())
    }

    fn handle_trigger_archivist(&self) -> (Vec<Event>, Vec<AdapterCommand>) {
        let mut timers = self.timers.lock().expect("timers mutex poisoned");
        timers.last_archivist_ts = now();
        drop(timers);
        (vec![self.distill_event(0.0)], Vec::new())
    }

    fn handle_chat_session_reset(&self) -> (Vec<Event>, Vec<AdapterCommand>) {
        self.session.reset();
        (Vec::new(), Vec::new())
    }

    fn handle_light_passthrough(
        &self,
        event: &Event,
        kind: OutputKind,
    ) -> (Vec<Event>, Vec<AdapterCommand>) {
        self.state.set_light_on(kind == OutputKind::LightOn);
        let output = Event::output(kind, event.content.clone()).with_priority(event.priority);
        (vec![output], Vec::new())
    }

    fn handle_shutdown(
        &self,
        event: &Event,
        reason: ShutdownReason,
    ) -> (Vec<Event>, Vec<AdapterCommand>) {
        *self.shutdown.lock().expect("shutdown mutex poisoned") = Some(reason);
        let mut outputs = Vec::new();
        if event.source.as_deref() == Some("voice") {
            outputs.push(
                Event::output(OutputKind::Speak, EventContent::Text(self.config.farewell_text.clone()))
                    .with_priority(Priority::Critical),
            );
        }
        (outputs, Vec::new())
    }

    /// The two-step "Alexa; <command>" emit (§4.4). Ordering between the
    /// wake word and the command is guaranteed structurally, not by a
    /// pause here: both land in the same per-consumer priority queue in
    /// the order returned, and the speech worker processes one event to
    /// completion before the next (§4.4 "two-step emit").
    fn speak_alexa_sequence(&self, command_phrase: &str) -> (Vec<Event>, Vec<AdapterCommand>) {
        let wake = Event::output(OutputKind::Speak, EventContent::Text("Alexa;".to_string()))
            .with_priority(Priority::High)
            .with_meta("triggered_by", "alexa_automation_wakeword");
        let command = Event::output(OutputKind::Speak, EventContent::Text(command_phrase.to_string()))
            .with_priority(Priority::High)
            .with_meta("triggered_by", "alexa_automation_command");
        (vec![wake, command], Vec::new())
    }

    fn distill_event(&self, elapsed_seconds: f64) -> Event {
        Event::output(OutputKind::DistillMemory, EventContent::Empty)
            .with_priority(Priority::Low)
            .with_meta("elapsed_seconds", elapsed_seconds)
    }

    fn run_timers(&self) -> (Vec<Event>, Vec<AdapterCommand>) {
        let mut outputs = Vec::new();
        let current = now();
        let mut timers = self.timers.lock().expect("timers mutex poisoned");

        let elapsed_since_archivist = current - timers.last_archivist_ts;
        if elapsed_since_archivist >= self.config.archivist_interval_seconds {
            outputs.push(self.distill_event(elapsed_since_archivist));
            timers.last_archivist_ts = current;
        }

        if let Some(lost_at) = timers.presence_lost_ts {
            if current - lost_at >= self.config.light_off_timeout_seconds {
                timers.presence_lost_ts = None;
                drop(timers);
                let (mut alexa_outputs, alexa_commands) =
                    self.speak_alexa_sequence(&self.config.alexa_turn_off_phrase);
                outputs.append(&mut alexa_outputs);
                return (outputs, alexa_commands);
            }
        }

        (outputs, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buddy::llm::test_support::FakeLlmClient;

    fn test_config() -> BrainConfig {
        BrainConfig {
            model_id: "test-model".into(),
            system_instruction: "be helpful".into(),
            archivist_interval_seconds: 5.0,
            light_off_timeout_seconds: 180.0,
            ..BrainConfig::default()
        }
    }

    fn brain_with_reply(reply: &str) -> Brain {
        let reply = reply.to_string();
        let factory: Arc<SessionFactory> = Arc::new(move || {
            Ok(Arc::new(FakeLlmClient::new(reply.clone())) as Arc<dyn LlmClient>)
        });
        Brain::new(test_config(), Arc::new(GlobalState::new()), factory).unwrap()
    }

    #[test]
    fn missing_model_id_is_a_configuration_error() {
        let factory: Arc<SessionFactory> =
            Arc::new(|| Ok(Arc::new(FakeLlmClient::new("x")) as Arc<dyn LlmClient>));
        let mut config = test_config();
        config.model_id.clear();
        let result = Brain::new(config, Arc::new(GlobalState::new()), factory);
        assert!(matches!(result, Err(BuddyError::Configuration(_))));
    }

    #[tokio::test]
    async fn wakeword_then_conversation_end_derive_expected_commands() {
        let brain = brain_with_reply("ciao");
        let (outputs, commands) = brain
            .process(Event::input(InputKind::Wakeword, EventContent::Empty))
            .await;
        assert_eq!(commands, vec![AdapterCommand::WakewordListenStop, AdapterCommand::VoiceInputStart]);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].output_kind(), Some(OutputKind::LedControl));

        let (_outputs, commands) = brain
            .process(Event::input(InputKind::ConversationEnd, EventContent::Empty))
            .await;
        assert_eq!(commands, vec![AdapterCommand::WakewordListenStart]);
    }

    #[tokio::test]
    async fn user_speech_emits_history_then_speak() {
        let brain = brain_with_reply("Ciao!");
        let event = Event::input(InputKind::UserSpeech, EventContent::Text("Ciao".into()))
            .with_source("voice");
        let (outputs, _commands) = brain.process(event).await;
        let kinds: Vec<_> = outputs.iter().filter_map(Event::output_kind).collect();
        assert_eq!(
            kinds,
            vec![OutputKind::SaveHistory, OutputKind::SaveHistory, OutputKind::Speak]
        );
        let speak = outputs.iter().find(|e| e.output_kind() == Some(OutputKind::Speak)).unwrap();
        assert_eq!(speak.content.as_text(), Some("Ciao!"));
        assert_eq!(speak.priority, Priority::High);
    }

    #[tokio::test]
    async fn direct_output_bypasses_the_llm() {
        let brain = brain_with_reply("should not be used");
        let inner = Event::output(OutputKind::Speak, EventContent::Text("hello".into()))
            .with_priority(Priority::High);
        let wrapper = Event::input(
            InputKind::DirectOutput,
            EventContent::Output(Box::new(inner)),
        );
        let (outputs, commands) = brain.process(wrapper).await;
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].content.as_text(), Some("hello"));
        assert!(commands.is_empty());
    }

    #[tokio::test]
    async fn unrecognized_adapter_command_name_is_dropped() {
        let brain = brain_with_reply("x");
        let event = Event::input(InputKind::AdapterCommand, EventContent::Text("NOT_REAL".into()));
        let (outputs, commands) = brain.process(event).await;
        assert!(outputs.is_empty());
        assert!(commands.is_empty());
    }

    #[tokio::test]
    async fn archivist_timer_fires_once_interval_elapses() {
        let brain = brain_with_reply("x");
        // Force last_archivist_ts far enough in the past to trigger immediately.
        {
            let mut timers = brain.timers.lock().unwrap();
            timers.last_archivist_ts = now() - 10.0;
        }
        let (outputs, _) = brain
            .process(Event::input(InputKind::SensorMovement, EventContent::Bool(true)))
            .await;
        let distill = outputs.iter().find(|e| e.output_kind() == Some(OutputKind::DistillMemory));
        assert!(distill.is_some());
    }

    #[tokio::test]
    async fn presence_true_cancels_a_running_light_off_timer() {
        let brain = brain_with_reply("x");
        brain
            .process(Event::input(InputKind::SensorPresence, EventContent::Bool(false)))
            .await;
        assert!(brain.timers.lock().unwrap().presence_lost_ts.is_some());

        brain
            .process(Event::input(InputKind::SensorPresence, EventContent::Bool(true)))
            .await;
        assert!(brain.timers.lock().unwrap().presence_lost_ts.is_none());
    }

    #[tokio::test]
    async fn repeated_absence_does_not_restart_the_timer() {
        let brain = brain_with_reply("x");
        brain
            .process(Event::input(InputKind::SensorPresence, EventContent::Bool(false)))
            .await;
        let first = brain.timers.lock().unwrap().presence_lost_ts.unwrap();
        brain
            .process(Event::input(InputKind::SensorPresence, EventContent::Bool(false)))
            .await;
        let second = brain.timers.lock().unwrap().presence_lost_ts.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn trigger_archivist_forces_distillation_regardless_of_elapsed_time() {
        let brain = brain_with_reply("x");
        let (outputs, _) = brain
            .process(Event::input(InputKind::TriggerArchivist, EventContent::Empty))
            .await;
        assert!(outputs.iter().any(|e| e.output_kind() == Some(OutputKind::DistillMemory)));
    }

    #[tokio::test]
    async fn shutdown_from_voice_source_emits_farewell() {
        let brain = brain_with_reply("x");
        let event = Event::input(InputKind::Shutdown, EventContent::Empty).with_source("voice");
        let (outputs, _) = brain.process(event).await;
        assert!(outputs.iter().any(|e| e.output_kind() == Some(OutputKind::Speak)));
        assert_eq!(brain.take_shutdown_request(), Some(ShutdownReason::Shutdown));
    }

    #[tokio::test]
    async fn shutdown_from_non_voice_source_is_silent() {
        let brain = brain_with_reply("x");
        let event = Event::input(InputKind::Shutdown, EventContent::Empty).with_source("cli");
        let (outputs, _) = brain.process(event).await;
        assert!(outputs.is_empty());
        assert_eq!(brain.take_shutdown_request(), Some(ShutdownReason::Shutdown));
    }

    #[tokio::test]
    async fn light_on_passthrough_preserves_content_and_priority() {
        let brain = brain_with_reply("x");
        let event = Event::input(InputKind::LightOn, EventContent::Text("stanza".into()))
            .with_priority(Priority::Low);
        let (outputs, _) = brain.process(event).await;
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].output_kind(), Some(OutputKind::LightOn));
        assert_eq!(outputs[0].content.as_text(), Some("stanza"));
        assert_eq!(outputs[0].priority, Priority::Low);
    }
}
