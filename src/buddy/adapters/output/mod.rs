//! Reference output adapters (§9.2): TTS, LED, persistence, distiller,
//! bulb, pipe-out, console. Each implements [`OutputAdapter`] and is
//! independently registrable against the subset of `OutputKind`s it
//! declares via `handled_kinds`.

pub mod bulb;
pub mod console;
pub mod distiller;
pub mod led;
pub mod persistence;
pub mod pipe_out;
pub mod tts;

pub use bulb::BulbAdapter;
pub use console::ConsoleAdapter;
pub use distiller::DistillerAdapter;
pub use led::LedAdapter;
pub use persistence::{PersistenceAdapter, PersistenceStore};
pub use pipe_out::PipeOutAdapter;
pub use tts::TtsAdapter;
