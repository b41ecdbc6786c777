use std::any::Any;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::graph::node::{Node, NodeCore, Request};
use crate::modulator::ModBank;
use crate::synth::voice::VoiceId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which tap of the ladder is taken as output.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
}

#[derive(Debug, Clone, Copy, Default)]
struct FilterState {
    b0: f32,
    b1: f32,
    b2: f32,
    b3: f32,
    b4: f32,
    /// Set after the first rendered block; until then the ladder is seeded
    /// from the first input sample to avoid a cutoff-sweep transient.
    primed: bool,
}

/// Four-pole resonant ladder filter with per-voice coefficient state.
///
/// Coefficients are recomputed once per block from cutoff and sample rate,
/// so cutoff changes are block-quantized. The feedback path soft-clips with
/// a cubic, which keeps high resonance from blowing up.
pub struct Filter {
    core: NodeCore,
    kind: FilterType,
    frequency: f32,
    resonance: f32,
    states: HashMap<VoiceId, FilterState>,
}

impl Filter {
    /// Wide-open lowpass: cutoff 20 kHz, no resonance.
    pub fn new(kind: FilterType) -> Self {
        Self {
            core: NodeCore::new(),
            kind,
            frequency: 20_000.0,
            resonance: 0.0,
            states: HashMap::new(),
        }
    }

    pub fn kind(&self) -> FilterType {
        self.kind
    }

    pub fn set_kind(&mut self, kind: FilterType) {
        self.kind = kind;
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn set_frequency(&mut self, frequency: f32) -> Result<()> {
        if !(frequency > 0.0 && frequency.is_finite()) {
            return Err(Error::InvalidArgument);
        }
        self.frequency = frequency;
        Ok(())
    }

    pub fn resonance(&self) -> f32 {
        self.resonance
    }

    /// Resonance is typically 0..1; larger values push the feedback into
    /// the soft-clip harder rather than blowing up.
    pub fn set_resonance(&mut self, resonance: f32) -> Result<()> {
        if !resonance.is_finite() {
            return Err(Error::InvalidArgument);
        }
        self.resonance = resonance;
        Ok(())
    }
}

impl Node for Filter {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn render(
        &mut self,
        frames: &mut [f32],
        request: &Request,
        _mods: &mut ModBank,
    ) -> Result<usize> {
        let nframes = frames.len();
        if nframes == 0 {
            return Ok(0);
        }
        if request.sample_rate <= 0.0 {
            return Err(Error::InvalidArgument);
        }
        let vid = request.voice_id().ok_or(Error::InvalidArgument)?;

        let freq = self.frequency / request.sample_rate;
        let mut q = 1.0 - freq;
        let p = freq + 0.8 * freq * q;
        let f = p + p - 1.0;
        q = self.resonance * (1.0 + 0.5 * q * (1.0 - q + 5.6 * q * q));

        let state = self.states.entry(vid).or_default();
        let mut b0 = state.b0;
        let mut b1 = state.b1;
        let mut b2 = state.b2;
        let mut b3 = state.b3;
        let mut b4 = state.b4;

        let mut start = 0;
        if !state.primed {
            start = 1;
            b0 = frames[0];
            b1 = 0.0;
            b2 = 0.0;
            b3 = 0.0;
            b4 = 0.0;
            state.primed = true;
        }

        for frame in frames[start..].iter_mut() {
            let input = *frame - q * b4; // feedback
            let t1 = b1;
            b1 = (input + b0) * p - b1 * f;
            let t2 = b2;
            b2 = (b1 + t1) * p - b2 * f;
            let t1 = b3;
            b3 = (b2 + t2) * p - b3 * f;
            b4 = (b3 + t1) * p - b4 * f;
            b4 -= b4 * b4 * b4 * 0.166667; // clipping
            b0 = input;
            *frame = match self.kind {
                FilterType::Lowpass => b4,
                FilterType::Highpass => input - b4,
                FilterType::Bandpass => 3.0 * (b3 - b4),
            };
        }

        state.b0 = b0;
        state.b1 = b1;
        state.b2 = b2;
        state.b3 = b3;
        state.b4 = b4;

        Ok(nframes)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
