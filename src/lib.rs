//! Buddy: an event-driven orchestration core for a voice-interactive
//! assistant.
//!
//! Input adapters (wake word, speech, sensors, a JSON FIFO) turn the
//! outside world into `Event`s; the Brain decides what to do with each one;
//! output adapters (speech synthesis, LEDs, persistence, a smart bulb, a
//! JSON FIFO) carry the results back out. See `SPEC_FULL.md` for the full
//! module map and `DESIGN.md` for how each part is grounded.

pub mod buddy;
