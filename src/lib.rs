pub mod engine; // Host lifecycle and the per-block render driver
pub mod error;
pub mod graph; // Weighted DAG of audio nodes with per-voice rendering
pub mod io;
pub mod modulator; // Control signals (envelopes, LFOs) driving node slots
pub mod nodes; // Built-in oscillator, filter and delay nodes
pub mod synth; // Voices and the bounded voice pool

pub use error::{Error, Result};

/// Upper bound on frames handled per render call by engine scratch buffers.
pub const MAX_BLOCK_SIZE: usize = 2048;

/// Default headroom passed to `Graph::prepare` during activation. As long as
/// subsequent blocks stay at or below this size, the audio-thread prepare
/// never reallocates.
pub const DEFAULT_HEADROOM: usize = 8192;
