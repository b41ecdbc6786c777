//! Note-name parsing: `"A"`, `"Bb"`, `"C#3"` and friends to frequencies.

use crate::error::{Error, Result};
use crate::synth::pool::key_frequency;

/// Octave used when a note name carries none; `"A"` is `"A4"` = 440 Hz.
const DEFAULT_OCTAVE: i32 = 4;

/// Parse a note name into a MIDI key number.
///
/// Grammar: a letter `A`-`G` (either case), an optional `#` or `b`
/// accidental, and an optional octave (`-1` through `9`). The mapping is
/// the usual MIDI one, `C-1` = 0 and `A4` = 69.
pub fn key(name: &str) -> Result<u8> {
    let mut chars = name.chars();
    let letter = chars.next().ok_or(Error::InvalidArgument)?;
    let semitone: i32 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(Error::InvalidArgument),
    };

    let rest = chars.as_str();
    let (accidental, octave_str) = match rest.chars().next() {
        Some('#') => (1, &rest[1..]),
        Some('b') => (-1, &rest[1..]),
        _ => (0, rest),
    };

    let octave = if octave_str.is_empty() {
        DEFAULT_OCTAVE
    } else {
        octave_str
            .parse::<i32>()
            .map_err(|_| Error::InvalidArgument)?
    };

    let midi = 12 * (octave + 1) + semitone + accidental;
    if !(0..=127).contains(&midi) {
        return Err(Error::InvalidArgument);
    }
    Ok(midi as u8)
}

/// Parse a note name into its equal-tempered frequency.
pub fn frequency(name: &str) -> Result<f32> {
    key(name).map(key_frequency)
}
