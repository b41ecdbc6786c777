use crate::synth::message::SynthMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    PolyphonicPressure { channel: u8, key: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    PitchBend { channel: u8, value: i16 },
    ProgramChange { channel: u8, program: u8 },
}

/// CC 123, "all notes off".
const CC_ALL_NOTES_OFF: u8 = 123;

/// Map a channel-filtered MIDI event onto a pool command. Events on other
/// channels and events the pool has no use for map to `None`.
pub fn midi_to_message(midi: MidiEvent, channel_filter: u8) -> Option<SynthMessage> {
    match midi {
        MidiEvent::NoteOn {
            channel,
            key,
            velocity,
        } if channel == channel_filter => Some(SynthMessage::NoteOn { key, velocity }),
        MidiEvent::NoteOff { channel, key, .. } if channel == channel_filter => {
            Some(SynthMessage::NoteOff { key })
        }
        MidiEvent::PolyphonicPressure {
            channel,
            key,
            pressure,
        } if channel == channel_filter => Some(SynthMessage::Aftertouch { key, pressure }),
        MidiEvent::ControlChange {
            channel,
            controller,
            ..
        } if channel == channel_filter && controller == CC_ALL_NOTES_OFF => {
            Some(SynthMessage::AllNotesOff)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_events_map_to_pool_commands() {
        assert_eq!(
            midi_to_message(
                MidiEvent::NoteOn {
                    channel: 0,
                    key: 60,
                    velocity: 100
                },
                0
            ),
            Some(SynthMessage::NoteOn {
                key: 60,
                velocity: 100
            })
        );
        assert_eq!(
            midi_to_message(
                MidiEvent::NoteOff {
                    channel: 0,
                    key: 60,
                    velocity: 0
                },
                0
            ),
            Some(SynthMessage::NoteOff { key: 60 })
        );
        assert_eq!(
            midi_to_message(
                MidiEvent::PolyphonicPressure {
                    channel: 0,
                    key: 60,
                    pressure: 90
                },
                0
            ),
            Some(SynthMessage::Aftertouch {
                key: 60,
                pressure: 90
            })
        );
    }

    #[test]
    fn other_channels_are_filtered_out() {
        assert_eq!(
            midi_to_message(
                MidiEvent::NoteOn {
                    channel: 1,
                    key: 60,
                    velocity: 100
                },
                0
            ),
            None
        );
    }

    #[test]
    fn cc_123_is_all_notes_off() {
        assert_eq!(
            midi_to_message(
                MidiEvent::ControlChange {
                    channel: 0,
                    controller: 123,
                    value: 0
                },
                0
            ),
            Some(SynthMessage::AllNotesOff)
        );
        assert_eq!(
            midi_to_message(
                MidiEvent::ControlChange {
                    channel: 0,
                    controller: 1,
                    value: 64
                },
                0
            ),
            None
        );
    }
}
