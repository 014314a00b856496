//! Reference input adapters (§9.1): wake-word, speech-in, radar,
//! temperature, scheduler, pipe-in. Each is a real, runnable
//! implementation behind a narrow trait for the actual hardware/vendor
//! protocol it depends on, with a mock/in-memory variant for hardware-less
//! test and dev use, mirroring the teacher's and the source's own mock
//! adapters (§9 "informative" note).

pub mod pipe_in;
pub mod radar;
pub mod scheduler_adapter;
pub mod speech_in;
pub mod temperature;
pub mod wakeword;

pub use pipe_in::PipeInAdapter;
pub use radar::RadarAdapter;
pub use scheduler_adapter::SchedulerAdapter;
pub use speech_in::SpeechInAdapter;
pub use temperature::TemperatureAdapter;
pub use wakeword::WakewordAdapter;
