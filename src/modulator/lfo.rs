use std::any::Any;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::graph::node::{Node, Request};
use crate::modulator::{ModBank, ModCore, Modulator};
use crate::nodes::oscillator::{Oscillator, Shape};
use crate::synth::voice::{Voice, VoiceId};

/// Low-frequency oscillator modulator.
///
/// Wraps an [`Oscillator`] and drives it with internal voices, one per
/// outer voice, pressed at the LFO frequency instead of the note pitch.
/// The oscillator's -1..1 output is rescaled to the 0..1 modulator range.
pub struct Lfo {
    core: ModCore,
    osc: Oscillator,
    freq: f32,
    voices: HashMap<VoiceId, Voice>,
    // The owned oscillator has no slot bindings, so this stays empty.
    bank: ModBank,
}

impl Lfo {
    pub fn new(shape: Shape, frequency: f32) -> Self {
        Self {
            core: ModCore::new(),
            osc: Oscillator::new(shape),
            freq: frequency.max(0.0),
            voices: HashMap::new(),
            bank: ModBank::new(),
        }
    }

    pub fn frequency(&self) -> f32 {
        self.freq
    }

    pub fn set_frequency(&mut self, frequency: f32) -> Result<()> {
        if frequency < 0.0 || !frequency.is_finite() {
            return Err(Error::InvalidArgument);
        }
        self.freq = frequency;
        Ok(())
    }

    pub fn shape(&self) -> Shape {
        self.osc.shape()
    }

    pub fn set_shape(&mut self, shape: Shape) {
        self.osc.set_shape(shape);
    }
}

impl Modulator for Lfo {
    fn core(&self) -> &ModCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModCore {
        &mut self.core
    }

    fn render_steps(&mut self, request: &Request) -> Result<usize> {
        let vid = request.voice_id().ok_or(Error::InvalidArgument)?;
        let nsteps = self.core.stepbuf.len();

        if self.freq <= 0.0 {
            // No rate to oscillate at; hold the range midpoint.
            for step in self.core.stepbuf.iter_mut() {
                *step = 0.5;
            }
            return Ok(nsteps);
        }

        let voice = self.voices.entry(vid).or_insert_with(|| Voice::new(vid));
        if voice.pressed() {
            voice.release()?;
        }
        voice.press(self.freq, 1.0)?;

        // Same request, but rendered through the internal voice so the
        // oscillator runs at the LFO rate. Phase carries across blocks in
        // the oscillator's per-voice state.
        let inner = Request::new(&*voice, request.sample_rate);
        let nrendered = self
            .osc
            .render(&mut self.core.stepbuf, &inner, &mut self.bank)?;

        for step in self.core.stepbuf[..nrendered].iter_mut() {
            *step = *step / 2.0 + 0.5;
        }

        Ok(nrendered)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
