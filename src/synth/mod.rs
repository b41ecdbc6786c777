//! Voice management: per-key render contexts and the bounded pool that
//! assigns incoming key events to them.

pub mod message;
pub mod pool;
pub mod voice;

pub use message::{MessageReceiver, SynthMessage};
pub use pool::{key_frequency, Priority, StolenKey, VoicePool, STOLEN_STACK_CAPACITY};
pub use voice::{Voice, VoiceId};
