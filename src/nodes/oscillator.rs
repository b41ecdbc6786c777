use std::any::Any;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::graph::node::{Node, NodeCore, Request, Slot};
use crate::modulator::ModBank;
use crate::synth::voice::VoiceId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of samples in one wavetable cycle.
pub const WAVETABLE_SIZE: usize = 1024;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Sine,
    Triangle,
    Square,
    Saw,
}

#[derive(Debug, Clone, Copy)]
struct OscState {
    /// Normalized phase, 0..1.
    pos: f32,
    /// Current (possibly gliding) frequency in Hz.
    freq: f32,
    /// Glide target; equals `freq` when no glide is in progress.
    tofreq: f32,
    /// Per-sample frequency increment while gliding.
    glide: f32,
}

/*
Oscillator
==========

One shared wavetable per oscillator, per-voice phase and glide state. The
lookup phase is skewed by `shift` before indexing: phase 0..shift covers
the first half of the table and shift..1 the second, which drags the
waveform's peak around (square duty cycle, asymmetric triangles) without
touching the table itself.

The FREQ slot bends pitch by up to +-depth semitones around the glided
frequency; the AMP slot scales the generated block by the modulator's 0..1
output. Output is accumulated into the frame buffer on top of whatever the
upstream mix left there.
*/
pub struct Oscillator {
    core: NodeCore,
    shape: Shape,
    table: Vec<f32>,
    amplitude: f32,
    /// Peak-skew point in 0..=1. 0.5 leaves the table untouched.
    shift: f32,
    /// Pitch offset in semitones relative to the voice frequency.
    pitch: f32,
    /// Glide time constant in seconds; a retriggered voice approaches the
    /// new target at `target / (sample_rate * portamento)` Hz per sample.
    portamento: f32,
    states: HashMap<VoiceId, OscState>,
    scratch: Vec<f32>,
}

impl Oscillator {
    pub fn new(shape: Shape) -> Self {
        Self {
            core: NodeCore::new(),
            shape,
            table: Self::build_table(shape),
            amplitude: 1.0,
            shift: 0.5,
            pitch: 0.0,
            portamento: 0.0,
            states: HashMap::new(),
            scratch: Vec::new(),
        }
    }

    fn build_table(shape: Shape) -> Vec<f32> {
        let n = WAVETABLE_SIZE;
        (0..n)
            .map(|i| {
                let t = i as f32 / n as f32;
                match shape {
                    Shape::Sine => (std::f32::consts::TAU * t).sin(),
                    Shape::Triangle => (((t * 4.0) - 2.0).abs() - 1.0) * -1.0,
                    Shape::Square => {
                        if i < n / 2 {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                    Shape::Saw => 2.0 * t - 1.0,
                }
            })
            .collect()
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn set_shape(&mut self, shape: Shape) {
        if shape != self.shape {
            self.shape = shape;
            self.table = Self::build_table(shape);
        }
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn set_amplitude(&mut self, amplitude: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&amplitude) {
            return Err(Error::InvalidArgument);
        }
        self.amplitude = amplitude;
        Ok(())
    }

    pub fn shift(&self) -> f32 {
        self.shift
    }

    pub fn set_shift(&mut self, shift: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&shift) {
            return Err(Error::InvalidArgument);
        }
        self.shift = shift;
        Ok(())
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Transpose in semitones; fractional values detune.
    pub fn set_pitch(&mut self, semitones: f32) -> Result<()> {
        if !semitones.is_finite() {
            return Err(Error::InvalidArgument);
        }
        self.pitch = semitones;
        Ok(())
    }

    pub fn portamento(&self) -> f32 {
        self.portamento
    }

    pub fn set_portamento(&mut self, seconds: f32) -> Result<()> {
        if !(seconds >= 0.0 && seconds.is_finite()) {
            return Err(Error::InvalidArgument);
        }
        self.portamento = seconds;
        Ok(())
    }

}

impl Node for Oscillator {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn prepare(&mut self, nsamples: usize) {
        self.scratch.clear();
        self.scratch.reserve(nsamples);
    }

    fn render(
        &mut self,
        frames: &mut [f32],
        request: &Request,
        mods: &mut ModBank,
    ) -> Result<usize> {
        if request.sample_rate <= 0.0 {
            return Err(Error::InvalidArgument);
        }
        let vid = request.voice_id().ok_or(Error::InvalidArgument)?;
        let nframes = frames.len();

        let target = request.frequency() * (self.pitch / 12.0).exp2();
        if target <= 0.0 {
            // Nothing to generate; the upstream mix passes through.
            return Ok(nframes);
        }

        let state = self.states.entry(vid).or_insert(OscState {
            pos: 0.0,
            freq: target,
            tofreq: target,
            glide: 0.0,
        });
        if target != state.tofreq {
            if self.portamento > 0.0 {
                // Glide step scales with the target, so higher notes are
                // approached proportionally faster.
                let step = target / (request.sample_rate * self.portamento);
                state.glide = if target >= state.freq { step } else { -step };
            } else {
                state.freq = target;
                state.glide = 0.0;
            }
            state.tofreq = target;
        }

        self.scratch.clear();
        self.scratch.resize(nframes, 0.0);

        let fm = match self.core.binding(Slot::FREQ).copied() {
            Some(b) => Some(mods.modulate(b.key, 1.0, -b.depth, b.depth)?),
            None => None,
        };

        for (i, out) in self.scratch.iter_mut().enumerate() {
            if state.glide != 0.0 {
                state.freq += state.glide;
                let done = (state.glide > 0.0 && state.freq >= state.tofreq)
                    || (state.glide < 0.0 && state.freq <= state.tofreq);
                if done {
                    state.freq = state.tofreq;
                    state.glide = 0.0;
                }
            }

            let mut freq = state.freq;
            if let Some(fm) = fm {
                let semitones = fm.get(i).copied().unwrap_or(0.0);
                freq *= (semitones / 12.0).exp2();
            }

            let t = if state.pos < self.shift {
                0.5 * state.pos / self.shift
            } else {
                0.5 + 0.5 * (state.pos - self.shift) / (1.0 - self.shift)
            };
            let index = ((t * WAVETABLE_SIZE as f32) as usize).min(WAVETABLE_SIZE - 1);
            *out = self.table[index] * self.amplitude;

            state.pos += freq / request.sample_rate;
            while state.pos >= 1.0 {
                state.pos -= 1.0;
            }
        }

        if let Some(binding) = self.core.binding(Slot::AMP).copied() {
            mods.apply(binding.key, &mut self.scratch, 0.0, 1.0);
        }

        for (frame, sample) in frames.iter_mut().zip(self.scratch.iter()) {
            *frame += sample;
        }

        Ok(nframes)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
