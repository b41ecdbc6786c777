use std::any::Any;

use crate::error::{Error, Result};
use crate::modulator::{ModBank, ModKey};
use crate::synth::voice::{Voice, VoiceId};

/// Ephemeral render bundle: the voice being rendered plus the sample rate.
///
/// Created on the audio thread once per voice per block and never retained.
/// `voice` is optional so modulators can be ticked before any key was
/// pressed; readers on a missing voice return zero values.
#[derive(Clone, Copy)]
pub struct Request<'a> {
    pub voice: Option<&'a Voice>,
    pub sample_rate: f32,
}

impl<'a> Request<'a> {
    pub fn new(voice: &'a Voice, sample_rate: f32) -> Self {
        Self {
            voice: Some(voice),
            sample_rate,
        }
    }

    /// Request without a voice, for graphs whose nodes keep no per-voice
    /// state (test fixtures, offline bounces of static patches).
    pub fn unvoiced(sample_rate: f32) -> Self {
        Self {
            voice: None,
            sample_rate,
        }
    }

    pub fn voice_id(&self) -> Option<VoiceId> {
        self.voice.map(|v| v.id())
    }

    pub fn pressed(&self) -> bool {
        self.voice.map(|v| v.pressed()).unwrap_or(false)
    }

    pub fn frequency(&self) -> f32 {
        self.voice.map(|v| v.frequency()).unwrap_or(0.0)
    }

    pub fn pressure(&self) -> f32 {
        self.voice.map(|v| v.pressure()).unwrap_or(0.0)
    }
}

/// Node-local identifier for a modulation attachment point.
///
/// Built-in nodes use [`Slot::AMP`] and [`Slot::FREQ`]; external nodes are
/// free to define further slot ids above [`Slot::USER_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(pub u32);

impl Slot {
    /// Amplitude modulation (tremolo, envelope gain).
    pub const AMP: Slot = Slot(0);
    /// Frequency modulation (vibrato), depth measured in semitones.
    pub const FREQ: Slot = Slot(1);
    /// First id available for node-specific slots.
    pub const USER_BASE: Slot = Slot(16);
}

/// A modulator attached to one of a node's slots.
///
/// `depth` is the per-slot argument: for [`Slot::FREQ`] it is the modulation
/// swing in ± semitones, for [`Slot::AMP`] it is unused (gain is already the
/// modulator's 0..1 output).
#[derive(Debug, Clone, Copy)]
pub struct SlotBinding {
    pub slot: Slot,
    pub key: ModKey,
    pub depth: f32,
}

/// Shared fields composed into every concrete node: the slot table mapping
/// modulation attachments to modulator keys.
#[derive(Debug, Default)]
pub struct NodeCore {
    slots: Vec<SlotBinding>,
}

impl NodeCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a modulator to `slot`. At most one modulator per slot.
    pub fn bind(&mut self, slot: Slot, key: ModKey, depth: f32) -> Result<()> {
        if self.binding(slot).is_some() {
            return Err(Error::InvalidArgument);
        }
        self.slots.push(SlotBinding { slot, key, depth });
        Ok(())
    }

    pub fn binding(&self, slot: Slot) -> Option<&SlotBinding> {
        self.slots.iter().find(|b| b.slot == slot)
    }

    pub fn bindings(&self) -> &[SlotBinding] {
        &self.slots
    }
}

/// An audio-rate processor owned by a [`Graph`](crate::graph::Graph).
///
/// `render` receives the node's frame buffer already primed with the
/// weighted mix of its upstream sources; generators accumulate into it,
/// effects transform it in place. Per-voice state lives inside the concrete
/// node, keyed by [`VoiceId`], created lazily on first sight of a voice.
pub trait Node: Send {
    fn core(&self) -> &NodeCore;

    fn core_mut(&mut self) -> &mut NodeCore;

    /// Sizing/reset hook called by `Graph::prepare`. May allocate; render
    /// must not.
    fn prepare(&mut self, _nsamples: usize) {}

    /// Fill/transform `frames` for the request's voice. Returns the number
    /// of frames written. The graph has already rendered every modulator
    /// bound to this node's slots, so `mods` lookups are cheap reads.
    fn render(
        &mut self,
        _frames: &mut [f32],
        _request: &Request,
        _mods: &mut ModBank,
    ) -> Result<usize> {
        Err(Error::NotImplemented)
    }

    /// Downcasting access for control-surface parameter changes on nodes
    /// that are already boxed inside a graph.
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
