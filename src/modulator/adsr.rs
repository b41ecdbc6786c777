use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::graph::node::Request;
use crate::modulator::{ModCore, Modulator};
use crate::synth::voice::VoiceId;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stage of the envelope state machine for one voice.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdsrStage {
    Silent,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Copy)]
struct AdsrState {
    stage: AdsrStage,
    /// Seconds elapsed within the current stage.
    pos: f32,
    /// Release starting amplitude, latched while not releasing.
    ra: f32,
    /// Last emitted amplitude, latched while not attacking. Re-attacking
    /// from here instead of from zero avoids clicks when a note is
    /// retriggered mid-release.
    pa: f32,
    /// Frequency latched at attack; a pitch change retriggers the attack.
    freq: f32,
}

impl Default for AdsrState {
    fn default() -> Self {
        Self {
            stage: AdsrStage::Silent,
            pos: 0.0,
            ra: 0.0,
            pa: 0.0,
            freq: 0.0,
        }
    }
}

/*
Envelope shape
==============

Four linear segments, each with its own length (seconds) and target
amplitude, all scaled by the voice's current pressure:

  amplitude
    aa.p |    /\
         |   /  \______
    sa.p |  /          \~~~~~~\
         | /                   \
       0 |/_____________________\____ time
          attack decay  sustain  release

Unlike the classic ADSR, sustain is itself a ramp (da.p -> sa.p over sl
seconds) and holds sa.p afterwards; set da == sa or sl == 0 for the
textbook flat sustain. A stage with length <= 0 contributes no samples and
its slope is forced to 0 to avoid a division by zero.
*/
pub struct Adsr {
    core: ModCore,
    al: f32, // Attack length
    aa: f32, // Attack amplitude
    dl: f32, // Decay length
    da: f32, // Decay amplitude
    sl: f32, // Sustain length
    sa: f32, // Sustain amplitude
    rl: f32, // Release length
    states: HashMap<VoiceId, AdsrState>,
}

impl Adsr {
    /// All lengths zero, all amplitudes one: a flat pressure gate.
    pub fn new() -> Self {
        Self {
            core: ModCore::new(),
            al: 0.0,
            aa: 1.0,
            dl: 0.0,
            da: 1.0,
            sl: 0.0,
            sa: 1.0,
            rl: 0.0,
            states: HashMap::new(),
        }
    }

    /// Envelope with the given segment lengths in seconds and amplitudes
    /// left at full scale.
    pub fn with_lengths(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        let mut adsr = Self::new();
        adsr.al = attack.max(0.0);
        adsr.dl = decay.max(0.0);
        adsr.sl = sustain.max(0.0);
        adsr.rl = release.max(0.0);
        adsr
    }

    /// Current stage for `voice`, if the envelope has seen it.
    pub fn stage(&self, voice: VoiceId) -> Option<AdsrStage> {
        self.states.get(&voice).map(|s| s.stage)
    }

    pub fn attack_len(&self) -> f32 {
        self.al
    }

    pub fn set_attack_len(&mut self, length: f32) -> Result<()> {
        Self::check_len(length).map(|_| self.al = length)
    }

    pub fn attack_amp(&self) -> f32 {
        self.aa
    }

    pub fn set_attack_amp(&mut self, amplitude: f32) -> Result<()> {
        Self::check_amp(amplitude).map(|_| self.aa = amplitude)
    }

    pub fn decay_len(&self) -> f32 {
        self.dl
    }

    pub fn set_decay_len(&mut self, length: f32) -> Result<()> {
        Self::check_len(length).map(|_| self.dl = length)
    }

    pub fn decay_amp(&self) -> f32 {
        self.da
    }

    pub fn set_decay_amp(&mut self, amplitude: f32) -> Result<()> {
        Self::check_amp(amplitude).map(|_| self.da = amplitude)
    }

    pub fn sustain_len(&self) -> f32 {
        self.sl
    }

    pub fn set_sustain_len(&mut self, length: f32) -> Result<()> {
        Self::check_len(length).map(|_| self.sl = length)
    }

    pub fn sustain_amp(&self) -> f32 {
        self.sa
    }

    pub fn set_sustain_amp(&mut self, amplitude: f32) -> Result<()> {
        Self::check_amp(amplitude).map(|_| self.sa = amplitude)
    }

    pub fn release_len(&self) -> f32 {
        self.rl
    }

    pub fn set_release_len(&mut self, length: f32) -> Result<()> {
        Self::check_len(length).map(|_| self.rl = length)
    }

    fn check_len(length: f32) -> Result<()> {
        if length < 0.0 || !length.is_finite() {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    fn check_amp(amplitude: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&amplitude) {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for Adsr {
    fn default() -> Self {
        Self::new()
    }
}

impl Modulator for Adsr {
    fn core(&self) -> &ModCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModCore {
        &mut self.core
    }

    fn render_steps(&mut self, request: &Request) -> Result<usize> {
        let voice = request.voice.ok_or(Error::InvalidArgument)?;
        if request.sample_rate <= 0.0 {
            return Err(Error::InvalidArgument);
        }

        let state = self.states.entry(voice.id()).or_default();
        let pressed = voice.pressed();
        let pressure = voice.pressure();
        let freq = voice.frequency();

        let pa = state.pa;
        let aa = self.aa * pressure;
        let da = self.da * pressure;
        let sa = self.sa * pressure;
        let ra = state.ra;
        // Slopes for zero-length stages are never read; force them to 0 so
        // the division below stays defined.
        let aslope = if self.al > 0.0 { (aa - pa) / self.al } else { 0.0 };
        let dslope = if self.dl > 0.0 { (da - aa) / self.dl } else { 0.0 };
        let sslope = if self.sl > 0.0 { (sa - da) / self.sl } else { 0.0 };
        let rslope = if self.rl > 0.0 { ra / self.rl } else { 0.0 };

        if pressed
            && (state.stage == AdsrStage::Silent
                || state.stage == AdsrStage::Release
                || state.freq != freq)
        {
            state.stage = AdsrStage::Attack;
            state.pos = 0.0;
            state.freq = freq;
        } else if !pressed
            && state.stage != AdsrStage::Silent
            && state.stage != AdsrStage::Release
        {
            state.stage = AdsrStage::Release;
            state.pos = 0.0;
        }

        let steps = &mut self.core.stepbuf;
        let nrendered = steps.len();

        for step in steps.iter_mut() {
            // Stage completion rolls the overshoot into the next stage
            // within the same sample, so short stages stay sample-accurate.
            *step = loop {
                match state.stage {
                    AdsrStage::Attack => {
                        if state.pos < self.al {
                            break if self.al <= 0.0 {
                                aa
                            } else {
                                pa + state.pos * aslope
                            };
                        }
                        state.stage = AdsrStage::Decay;
                        while state.pos > self.al && state.pos > 0.0 && self.al > 0.0 {
                            state.pos -= self.al;
                        }
                    }
                    AdsrStage::Decay => {
                        if state.pos < self.dl {
                            break if self.dl <= 0.0 {
                                da
                            } else {
                                aa + state.pos * dslope
                            };
                        }
                        state.stage = AdsrStage::Sustain;
                        while state.pos > self.dl && state.pos > 0.0 && self.dl > 0.0 {
                            state.pos -= self.dl;
                        }
                    }
                    AdsrStage::Sustain => {
                        break if state.pos < self.sl && self.sl > 0.0 {
                            da + state.pos * sslope
                        } else {
                            sa
                        };
                    }
                    AdsrStage::Release => {
                        if state.pos < self.rl && self.rl > 0.0 {
                            break (self.rl - state.pos) * rslope;
                        }
                        state.stage = AdsrStage::Silent;
                    }
                    AdsrStage::Silent => break 0.0,
                }
            };
            state.pos += 1.0 / request.sample_rate;
        }

        if nrendered > 0 {
            let last = steps[nrendered - 1];
            if state.stage != AdsrStage::Attack {
                // Next attack restarts from here instead of from zero.
                state.pa = last;
            }
            if state.stage != AdsrStage::Release {
                state.ra = last;
            }
        }

        Ok(nrendered)
    }

    fn voice_active(&self, voice: VoiceId) -> bool {
        self.states
            .get(&voice)
            .map(|s| s.stage != AdsrStage::Silent)
            .unwrap_or(false)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
