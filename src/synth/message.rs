#[cfg(feature = "rtrb")]
use rtrb::Consumer;

/// Control-thread commands drained by the engine at the top of each block.
///
/// Key ids are 0..127 and velocity/pressure are raw 0..127 bytes; the engine
/// rescales them to the (0, 1] range the voice pool expects.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SynthMessage {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8 },
    Aftertouch { key: u8, pressure: u8 },
    AllNotesOff,
}

/// Source of synth messages. The default implementation is an rtrb consumer
/// so the control thread can post events without blocking the audio thread.
pub trait MessageReceiver {
    fn pop(&mut self) -> Option<SynthMessage>;
}

#[cfg(feature = "rtrb")]
impl MessageReceiver for Consumer<SynthMessage> {
    fn pop(&mut self) -> Option<SynthMessage> {
        Consumer::pop(self).ok()
    }
}
