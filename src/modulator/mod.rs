//! Modulators: control signals evaluated at audio rate that drive node
//! parameters through slots. ADSR envelopes and LFOs are the built-in
//! sources; both keep strictly per-voice state so one shared instance can
//! serve every voice of the pool.

pub mod adsr;
pub mod lfo;

use std::any::Any;

use slotmap::{new_key_type, SlotMap};

use crate::error::{Error, Result};
use crate::graph::node::Request;
use crate::synth::voice::VoiceId;

pub use adsr::{Adsr, AdsrStage};
pub use lfo::Lfo;

new_key_type! {
    /// Opaque handle to a modulator stored in a [`ModBank`].
    pub struct ModKey;
}

/// Shared fields composed into every concrete modulator.
///
/// `stepbuf` holds the raw 0..1 control steps for the current block;
/// `modbuf` is the scaled output handed to nodes by [`ModBank::modulate`].
/// The `rendered` flag makes render idempotent within a block, so a
/// modulator shared by several slots runs its state machine exactly once
/// per voice per block.
#[derive(Debug, Default)]
pub struct ModCore {
    pub(crate) stepbuf: Vec<f32>,
    pub(crate) modbuf: Vec<f32>,
    pub(crate) rendered: bool,
}

impl ModCore {
    pub fn new() -> Self {
        Self::default()
    }

    fn prepare(&mut self, nsamples: usize) {
        self.stepbuf.clear();
        self.stepbuf.resize(nsamples, 0.0);
        self.modbuf.clear();
        self.modbuf.reserve(nsamples);
        self.rendered = false;
    }

    pub fn steps(&self) -> &[f32] {
        &self.stepbuf
    }
}

/// A control-signal generator attached to node slots.
///
/// Concrete modulators implement `render_steps`, filling the step buffer
/// with values in their declared range (0..1 for the built-ins), and may
/// override `voice_active` to report that a voice is still audibly held
/// (envelopes in their release tail).
pub trait Modulator: Send {
    fn core(&self) -> &ModCore;

    fn core_mut(&mut self) -> &mut ModCore;

    /// Fill the step buffer for the request's voice. Called at most once
    /// per block; the bank enforces idempotence via the rendered flag.
    fn render_steps(&mut self, _request: &Request) -> Result<usize> {
        Err(Error::NotImplemented)
    }

    /// Whether this modulator still holds `voice` open (e.g. an amplitude
    /// envelope that has not reached silence). Used by the driver to decide
    /// when a released voice can be reclaimed.
    fn voice_active(&self, _voice: VoiceId) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct ModEntry {
    holders: usize,
    source: Box<dyn Modulator>,
}

/// Shared-ownership container for modulators.
///
/// Nodes reference bank entries by [`ModKey`] and the bank counts holders:
/// an entry is dropped when the last node releases it. Modulators cannot
/// reference nodes, so no ownership cycles are possible by construction.
#[derive(Default)]
pub struct ModBank {
    entries: SlotMap<ModKey, ModEntry>,
}

impl ModBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: Box<dyn Modulator>) -> ModKey {
        self.entries.insert(ModEntry { holders: 0, source })
    }

    pub fn contains(&self, key: ModKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn retain_key(&mut self, key: ModKey) -> Result<()> {
        let entry = self.entries.get_mut(key).ok_or(Error::IndexOutOfBounds)?;
        entry.holders += 1;
        Ok(())
    }

    /// Drop one holder; the modulator is destroyed with its last holder.
    pub(crate) fn release_key(&mut self, key: ModKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.holders = entry.holders.saturating_sub(1);
            if entry.holders == 0 {
                self.entries.remove(key);
            }
        }
    }

    /// Reset every modulator for a block of `nsamples`: zero the step
    /// buffer, clear outputs, clear the rendered flag. May allocate.
    pub fn prepare(&mut self, nsamples: usize) {
        for entry in self.entries.values_mut() {
            entry.source.core_mut().prepare(nsamples);
        }
    }

    /// Render the modulator behind `key` for this block. Idempotent: a
    /// second call within the same block returns the current step count
    /// without re-running the source.
    pub fn render(&mut self, key: ModKey, request: &Request) -> Result<usize> {
        let entry = self.entries.get_mut(key).ok_or(Error::IndexOutOfBounds)?;
        if entry.source.core().rendered {
            return Ok(entry.source.core().stepbuf.len());
        }
        if request.voice.is_none() {
            return Err(Error::InvalidArgument);
        }
        let nrendered = entry.source.render_steps(request)?;
        entry.source.core_mut().rendered = true;
        Ok(nrendered)
    }

    /// Scale `out` by the rendered steps mapped onto `lo..up`:
    /// `out[i] *= step[i] * (up - lo) + lo`, over the shorter of the two
    /// buffers.
    pub fn apply(&self, key: ModKey, out: &mut [f32], lo: f32, up: f32) {
        let Some(entry) = self.entries.get(key) else {
            return;
        };
        let steps = &entry.source.core().stepbuf;
        for (o, s) in out.iter_mut().zip(steps.iter()) {
            *o *= s * (up - lo) + lo;
        }
    }

    /// Fill the modulation buffer with `seed`, apply the rendered steps
    /// mapped onto `lo..up`, and return the buffer.
    pub fn modulate(&mut self, key: ModKey, seed: f32, lo: f32, up: f32) -> Result<&[f32]> {
        let entry = self.entries.get_mut(key).ok_or(Error::IndexOutOfBounds)?;
        let core = entry.source.core_mut();
        let nsteps = core.stepbuf.len();
        core.modbuf.clear();
        core.modbuf.resize(nsteps, seed);
        let ModCore {
            stepbuf, modbuf, ..
        } = core;
        for (o, s) in modbuf.iter_mut().zip(stepbuf.iter()) {
            *o *= s * (up - lo) + lo;
        }
        Ok(&entry.source.core().modbuf)
    }

    pub fn get(&self, key: ModKey) -> Option<&dyn Modulator> {
        self.entries.get(key).map(|e| e.source.as_ref())
    }

    pub fn get_mut(&mut self, key: ModKey) -> Option<&mut dyn Modulator> {
        self.entries.get_mut(key).map(|e| e.source.as_mut() as &mut dyn Modulator)
    }

    /// Typed access to a stored modulator for parameter changes.
    pub fn get_as<T: Modulator + 'static>(&self, key: ModKey) -> Option<&T> {
        self.entries
            .get(key)
            .and_then(|e| e.source.as_any().downcast_ref())
    }

    pub fn get_as_mut<T: Modulator + 'static>(&mut self, key: ModKey) -> Option<&mut T> {
        self.entries
            .get_mut(key)
            .and_then(|e| e.source.as_any_mut().downcast_mut())
    }

    /// True if any modulator still holds `voice` open.
    pub fn voice_active(&self, voice: VoiceId) -> bool {
        self.entries
            .values()
            .any(|e| e.source.voice_active(voice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::voice::Voice;

    /// Counts how many times render_steps actually ran.
    struct CountingMod {
        core: ModCore,
        runs: usize,
        value: f32,
    }

    impl CountingMod {
        fn new(value: f32) -> Self {
            Self {
                core: ModCore::new(),
                runs: 0,
                value,
            }
        }
    }

    impl Modulator for CountingMod {
        fn core(&self) -> &ModCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut ModCore {
            &mut self.core
        }
        fn render_steps(&mut self, _request: &Request) -> Result<usize> {
            self.runs += 1;
            let value = self.value;
            for step in self.core.stepbuf.iter_mut() {
                *step = value;
            }
            Ok(self.core.stepbuf.len())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn render_is_idempotent_within_a_block() {
        let mut bank = ModBank::new();
        let key = bank.insert(Box::new(CountingMod::new(0.5)));
        let voice = {
            let mut v = Voice::new(0);
            v.press(440.0, 1.0).unwrap();
            v
        };
        let request = Request::new(&voice, 48_000.0);

        bank.prepare(64);
        assert_eq!(bank.render(key, &request).unwrap(), 64);
        assert_eq!(bank.render(key, &request).unwrap(), 64);
        assert_eq!(bank.get_as::<CountingMod>(key).unwrap().runs, 1);

        bank.prepare(64);
        bank.render(key, &request).unwrap();
        assert_eq!(
            bank.get_as::<CountingMod>(key).unwrap().runs,
            2,
            "prepare resets the rendered flag"
        );
    }

    #[test]
    fn render_without_voice_is_invalid() {
        let mut bank = ModBank::new();
        let key = bank.insert(Box::new(CountingMod::new(0.5)));
        bank.prepare(16);
        assert_eq!(
            bank.render(key, &Request::unvoiced(48_000.0)),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn apply_scales_into_declared_range() {
        let mut bank = ModBank::new();
        let key = bank.insert(Box::new(CountingMod::new(0.5)));
        let voice = {
            let mut v = Voice::new(0);
            v.press(440.0, 1.0).unwrap();
            v
        };
        bank.prepare(4);
        bank.render(key, &Request::new(&voice, 48_000.0)).unwrap();

        let mut out = [2.0f32; 4];
        bank.apply(key, &mut out, 1.0, 3.0);
        // step 0.5 over 1..3 -> factor 2.0
        for &o in &out {
            assert!((o - 4.0).abs() < 1e-6);
        }

        let buf = bank.modulate(key, 10.0, 0.0, 1.0).unwrap();
        for &v in buf {
            assert!((v - 5.0).abs() < 1e-6);
        }
    }

    #[test]
    fn entry_is_dropped_with_last_holder() {
        let mut bank = ModBank::new();
        let key = bank.insert(Box::new(CountingMod::new(0.1)));
        bank.retain_key(key).unwrap();
        bank.retain_key(key).unwrap();

        bank.release_key(key);
        assert!(bank.contains(key), "one holder remains");
        bank.release_key(key);
        assert!(!bank.contains(key), "last holder dropped the modulator");
    }

    #[test]
    fn prepare_sizes_step_buffer() {
        let mut bank = ModBank::new();
        let key = bank.insert(Box::new(CountingMod::new(0.0)));
        bank.prepare(128);
        assert_eq!(bank.get(key).unwrap().core().steps().len(), 128);
        bank.prepare(32);
        assert_eq!(bank.get(key).unwrap().core().steps().len(), 32);
    }
}
