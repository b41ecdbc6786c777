use crate::error::{Error, Result};

/// Stable identity of a voice for the lifetime of its pool.
///
/// Per-voice state maps on nodes and modulators key on this id rather than on
/// a reference, so state survives a steal (the same hardware voice keeps
/// rendering while its key is rewritten).
pub type VoiceId = usize;

/// One per-key render context: pitch, velocity, pressure and press state.
///
/// Voices are allocated by a [`VoicePool`](super::pool::VoicePool) at pool
/// creation and live until the pool is dropped. A voice that has never been
/// pressed reads as silent: frequency, velocity and pressure are all zero.
#[derive(Debug, Clone)]
pub struct Voice {
    id: VoiceId,
    key: u8,
    frequency: f32,
    velocity: f32,
    pressure: f32,
    pressed: bool,
    repossessed: bool,
    killed: bool,
}

impl Voice {
    pub fn new(id: VoiceId) -> Self {
        Self {
            id,
            key: 0,
            frequency: 0.0,
            velocity: 0.0,
            pressure: 0.0,
            pressed: false,
            repossessed: false,
            killed: false,
        }
    }

    /// Press the voice at `frequency` Hz with `velocity` in (0, 1].
    ///
    /// Pressure starts equal to the velocity until aftertouch adjusts it.
    pub fn press(&mut self, frequency: f32, velocity: f32) -> Result<()> {
        if self.pressed || frequency <= 0.0 || velocity <= 0.0 || velocity > 1.0 {
            return Err(Error::InvalidArgument);
        }
        self.frequency = frequency;
        self.velocity = velocity;
        self.pressure = velocity;
        self.pressed = true;
        Ok(())
    }

    /// Update channel pressure while pressed. `pressure` must be in (0, 1].
    pub fn aftertouch(&mut self, pressure: f32) -> Result<()> {
        if !self.pressed || pressure <= 0.0 || pressure > 1.0 {
            return Err(Error::InvalidArgument);
        }
        self.pressure = pressure;
        Ok(())
    }

    /// Release the voice. The latched frequency is kept so envelopes can
    /// finish their release phase against it.
    pub fn release(&mut self) -> Result<()> {
        if !self.pressed {
            return Err(Error::InvalidArgument);
        }
        self.pressed = false;
        self.pressure = 0.0;
        Ok(())
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn pressure(&self) -> f32 {
        self.pressure
    }

    pub fn pressed(&self) -> bool {
        self.pressed
    }

    pub fn repossessed(&self) -> bool {
        self.repossessed
    }

    pub fn killed(&self) -> bool {
        self.killed
    }

    // Pool-internal mutators. The pool rewrites key/frequency/pressure
    // directly during steals and repossession instead of going through
    // press/release, which would reset envelope-visible state.

    pub(crate) fn assign_key(&mut self, key: u8) {
        self.key = key;
    }

    pub(crate) fn set_repossessed(&mut self, repossessed: bool) {
        self.repossessed = repossessed;
    }

    pub(crate) fn mark_killed(&mut self) {
        self.killed = true;
    }

    pub(crate) fn clear_killed(&mut self) {
        self.killed = false;
    }

    /// Restore a previously stolen key onto this voice without retriggering.
    pub(crate) fn repossess(&mut self, key: u8, frequency: f32, pressure: f32) {
        self.key = key;
        self.frequency = frequency;
        self.pressure = pressure;
        self.repossessed = true;
    }
}
