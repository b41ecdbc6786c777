//! External interfaces: MIDI event conversion and note-name parsing.

pub mod midi;
pub mod notes;

pub use midi::{midi_to_message, MidiEvent};
