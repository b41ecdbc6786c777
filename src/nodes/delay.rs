use std::any::Any;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::graph::node::{Node, NodeCore, Request};
use crate::modulator::ModBank;
use crate::synth::voice::VoiceId;

struct DelayState {
    ring: Vec<f32>,
    pos: usize,
}

/// Feedback delay with one ring buffer per voice.
///
/// The ring is sized `sample_rate * delay` and resized in place when the
/// delay time changes: growth splices silence at the write position so the
/// pending echo tail keeps its timing, shrinking discards the oldest
/// samples first.
pub struct Delay {
    core: NodeCore,
    feedback: f32,
    gain: f32,
    delay: f32,
    states: HashMap<VoiceId, DelayState>,
}

impl Delay {
    /// Starts inert: zero delay time renders as a pass-through.
    pub fn new() -> Self {
        Self {
            core: NodeCore::new(),
            feedback: 0.0,
            gain: 0.0,
            delay: 0.0,
            states: HashMap::new(),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Echo level mixed back into the signal.
    pub fn set_gain(&mut self, gain: f32) -> Result<()> {
        if !(gain >= 0.0 && gain.is_finite()) {
            return Err(Error::InvalidArgument);
        }
        self.gain = gain;
        Ok(())
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    pub fn set_feedback(&mut self, feedback: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&feedback) {
            return Err(Error::InvalidArgument);
        }
        self.feedback = feedback;
        Ok(())
    }

    pub fn delay(&self) -> f32 {
        self.delay
    }

    /// Delay time in seconds.
    pub fn set_delay(&mut self, seconds: f32) -> Result<()> {
        if !(seconds >= 0.0 && seconds.is_finite()) {
            return Err(Error::InvalidArgument);
        }
        self.delay = seconds;
        Ok(())
    }

    /// Fetch the ring for `vid`, resized to `length` samples.
    fn voice_ring(states: &mut HashMap<VoiceId, DelayState>, vid: VoiceId, length: usize) -> &mut DelayState {
        let state = states.entry(vid).or_insert_with(|| DelayState {
            ring: vec![0.0; length],
            pos: 0,
        });

        let curlen = state.ring.len();
        if length > curlen {
            let diff = length - curlen;
            state
                .ring
                .splice(state.pos..state.pos, std::iter::repeat(0.0).take(diff));
            state.pos = (state.pos + diff) % length;
        } else if length < curlen {
            let mut diff = curlen - length;
            if diff > state.pos {
                // Not enough samples behind the write position; take the
                // rest from the end of the buffer.
                let tail = diff - state.pos;
                state.ring.drain(curlen - tail..);
                diff = state.pos;
            }
            state.pos -= diff;
            state.ring.drain(state.pos..state.pos + diff);
        }

        state
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for Delay {
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

        let buflen = (request.sample_rate * self.delay) as usize;
        if buflen == 0 {
            return Ok(nframes);
        }

        let vid = request.voice_id().ok_or(Error::InvalidArgument)?;
        let gain = self.gain;
        let feedback = self.feedback;
        let state = Self::voice_ring(&mut self.states, vid, buflen);

        for frame in frames.iter_mut() {
            let input = *frame;
            *frame += gain * state.ring[state.pos];
            state.ring[state.pos] = input + feedback * state.ring[state.pos];
            state.pos = (state.pos + 1) % buflen;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::voice::Voice;

    const SAMPLE_RATE: f32 = 8.0;

    fn run(delay: &mut Delay, frames: &mut [f32]) {
        let mut voice = Voice::new(0);
        voice.press(440.0, 1.0).unwrap();
        let mut bank = ModBank::new();
        let n = delay
            .render(frames, &Request::new(&voice, SAMPLE_RATE), &mut bank)
            .unwrap();
        assert_eq!(n, frames.len());
    }

    #[test]
    fn zero_delay_is_a_pass_through() {
        let mut delay = Delay::new();
        let mut frames = vec![0.25; 8];
        run(&mut delay, &mut frames);
        assert_eq!(frames, vec![0.25; 8]);
    }

    #[test]
    fn impulse_echoes_after_the_delay_time() {
        let mut delay = Delay::new();
        delay.set_delay(0.5).unwrap(); // 4 samples at 8 Hz
        delay.set_gain(1.0).unwrap();

        let mut frames = vec![0.0; 8];
        frames[0] = 1.0;
        run(&mut delay, &mut frames);

        assert_eq!(frames[0], 1.0);
        assert_eq!(frames[4], 1.0, "echo lands one delay period later");
        for i in [1, 2, 3, 5, 6, 7] {
            assert_eq!(frames[i], 0.0, "frame {}", i);
        }
    }

    #[test]
    fn feedback_decays_repeated_echoes() {
        let mut delay = Delay::new();
        delay.set_delay(0.5).unwrap();
        delay.set_gain(1.0).unwrap();
        delay.set_feedback(0.5).unwrap();

        let mut frames = vec![0.0; 16];
        frames[0] = 1.0;
        run(&mut delay, &mut frames);

        assert_eq!(frames[4], 1.0);
        assert_eq!(frames[8], 0.5);
        assert_eq!(frames[12], 0.25);
    }

    #[test]
    fn ring_resizes_when_delay_time_changes() {
        let mut delay = Delay::new();
        delay.set_delay(0.5).unwrap();
        let mut frames = vec![0.0; 4];
        run(&mut delay, &mut frames);
        assert_eq!(delay.states[&0].ring.len(), 4);

        delay.set_delay(1.0).unwrap();
        run(&mut delay, &mut frames);
        assert_eq!(delay.states[&0].ring.len(), 8);

        delay.set_delay(0.25).unwrap();
        run(&mut delay, &mut frames);
        assert_eq!(delay.states[&0].ring.len(), 2);
        assert!(delay.states[&0].pos < 2);
    }

    #[test]
    fn growth_preserves_pending_echo_timing() {
        let mut delay = Delay::new();
        delay.set_delay(0.5).unwrap(); // 4 samples
        delay.set_gain(1.0).unwrap();

        // Impulse enters the ring, then the ring grows before it comes due.
        // Silence is inserted behind the pending samples, so the echo still
        // arrives 4 samples after the impulse; only new input sees the
        // longer time.
        let mut head = vec![1.0, 0.0];
        run(&mut delay, &mut head);
        delay.set_delay(1.0).unwrap(); // 8 samples

        let mut tail = vec![0.0; 10];
        run(&mut delay, &mut tail);
        let echo: Vec<usize> = tail
            .iter()
            .enumerate()
            .filter(|(_, &s)| s != 0.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(echo, vec![2], "echo 4 samples after the impulse, got {:?}", echo);
    }

    #[test]
    fn setters_validate() {
        let mut delay = Delay::new();
        assert_eq!(delay.set_gain(-1.0), Err(Error::InvalidArgument));
        assert_eq!(delay.set_feedback(1.1), Err(Error::InvalidArgument));
        assert_eq!(delay.set_delay(-0.5), Err(Error::InvalidArgument));
        assert!(delay.set_gain(0.8).is_ok());
        assert!(delay.set_feedback(1.0).is_ok());
        assert!(delay.set_delay(0.25).is_ok());
    }
}
