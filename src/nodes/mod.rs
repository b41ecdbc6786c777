//! Built-in audio nodes: a wavetable oscillator, a resonant ladder filter
//! and a feedback delay. Each keeps its per-voice state in an internal map
//! so a single node instance serves the whole pool.

pub mod delay;
pub mod filter;
pub mod oscillator;

pub use delay::Delay;
pub use filter::{Filter, FilterType};
pub use oscillator::{Oscillator, Shape, WAVETABLE_SIZE};
