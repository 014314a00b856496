//! Event-driven orchestration core for a voice-interactive assistant
//! ("buddy"). See `SPEC_FULL.md` for the full module map; `DESIGN.md` for
//! the grounding ledger this tree was built against.

pub mod adapters;
pub mod audio_coordinator;
pub mod brain;
pub mod config;
pub mod dirs;
pub mod error;
pub mod event;
pub mod llm;
pub mod orchestrator;
pub mod queue;
pub mod router;
pub mod state;

pub use audio_coordinator::{AudioDeviceCoordinator, AudioDeviceState};
pub use brain::{Brain, BrainConfig, ShutdownReason};
pub use config::BuddyConfig;
pub use error::{BuddyError, Result};
pub use event::{AdapterCommand, Event, EventContent, EventKind, InputKind, OutputKind, Priority};
pub use orchestrator::Orchestrator;
pub use queue::{FifoQueue, PriorityQueue};
pub use router::Router;
pub use state::GlobalState;
