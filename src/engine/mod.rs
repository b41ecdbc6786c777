//! Render driver: owns the voice pool and the patch graph, drains control
//! messages and turns key presses into rendered audio blocks.

#[cfg(feature = "rtrb")]
use rtrb::Consumer;

use crate::error::{Error, Result};
use crate::graph::{Graph, NodeKey, Request};
use crate::synth::message::SynthMessage;
#[cfg(feature = "rtrb")]
use crate::synth::message::MessageReceiver;
use crate::synth::pool::{Priority, VoicePool};
use crate::synth::voice::VoiceId;
use crate::{DEFAULT_HEADROOM, MAX_BLOCK_SIZE};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub sample_rate: f32,
    /// Number of pool voices.
    pub polyphony: usize,
    /// Block size the graph is pre-allocated for at activation. Blocks at
    /// or below this render without allocating.
    pub headroom: usize,
    pub priority: Priority,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            polyphony: 16,
            headroom: DEFAULT_HEADROOM,
            priority: Priority::Fifo,
        }
    }
}

/*
Host lifecycle
==============

`new` wires the pool and pre-allocates the graph (the host's activation
class); `render_block` is the realtime class and must not allocate as long
as blocks stay within the configured headroom; `deactivate` releases all
held notes. Sample-rate changes belong between deactivate and the next
render, never mid-stream.
*/
pub struct Engine {
    config: EngineConfig,
    pool: VoicePool,
    graph: Graph,
    #[cfg(feature = "rtrb")]
    rx: Option<Consumer<SynthMessage>>,
    voice_scratch: Vec<VoiceId>,
    sink_scratch: Vec<NodeKey>,
}

impl Engine {
    pub fn new(config: EngineConfig, graph: Graph) -> Self {
        let mut pool = VoicePool::new(config.polyphony);
        pool.set_priority(config.priority);
        let mut engine = Self {
            config,
            pool,
            graph,
            #[cfg(feature = "rtrb")]
            rx: None,
            voice_scratch: Vec::with_capacity(config.polyphony),
            sink_scratch: Vec::new(),
        };
        engine.activate();
        engine
    }

    /// Pre-allocate for the configured headroom. Called once by `new`;
    /// call again after structural graph edits to re-establish the
    /// no-allocation guarantee.
    pub fn activate(&mut self) {
        self.graph.prepare(self.config.headroom);
    }

    /// Release every held note. The pool reclaims voices as their
    /// envelopes fall silent over the following blocks.
    pub fn deactivate(&mut self) {
        self.pool.release_all();
    }

    /// Attach the control-thread message queue.
    #[cfg(feature = "rtrb")]
    pub fn set_receiver(&mut self, rx: Consumer<SynthMessage>) {
        self.rx = Some(rx);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> f32 {
        self.config.sample_rate
    }

    /// Change the sample rate. Only meaningful between blocks; per-voice
    /// node state carries over unconverted.
    pub fn set_sample_rate(&mut self, sample_rate: f32) -> Result<()> {
        if !(sample_rate > 0.0 && sample_rate.is_finite()) {
            return Err(Error::InvalidArgument);
        }
        self.config.sample_rate = sample_rate;
        Ok(())
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn pool(&self) -> &VoicePool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut VoicePool {
        &mut self.pool
    }

    /// Apply one control message to the pool. Allocation failures (double
    /// presses, saturated zero-capacity pools) are swallowed; control
    /// traffic must never take down the audio thread.
    pub fn handle_message(&mut self, msg: SynthMessage) {
        match msg {
            SynthMessage::NoteOn { key, velocity: 0 } => {
                let _ = self.pool.release(key);
            }
            SynthMessage::NoteOn { key, velocity } => {
                let _ = self.pool.press(key, f32::from(velocity) / 127.0);
            }
            SynthMessage::NoteOff { key } => {
                let _ = self.pool.release(key);
            }
            SynthMessage::Aftertouch { key, pressure } => {
                let _ = self.pool.aftertouch(key, f32::from(pressure) / 127.0);
            }
            SynthMessage::AllNotesOff => self.pool.release_all(),
        }
    }

    /// Render one block into `outputs`, one slice per channel.
    ///
    /// Graph sinks cycle over the channels (sink 0 -> channel 0, sink 1 ->
    /// channel 1, ...), every active voice is rendered through the whole
    /// graph, and voices whose envelopes have finished are reclaimed. A
    /// voice whose render fails contributes silence for the block; the
    /// remaining voices still sound.
    pub fn render_block(&mut self, outputs: &mut [&mut [f32]]) -> Result<usize> {
        let nchannels = outputs.len();
        if nchannels == 0 {
            return Ok(0);
        }
        let nframes = outputs.iter().map(|c| c.len()).min().unwrap_or(0);
        if nframes == 0 {
            return Ok(0);
        }
        if nframes > MAX_BLOCK_SIZE {
            return Err(Error::InvalidArgument);
        }

        #[cfg(feature = "rtrb")]
        while let Some(msg) = self.rx.as_mut().and_then(MessageReceiver::pop) {
            self.handle_message(msg);
        }

        for out in outputs.iter_mut() {
            out[..nframes].fill(0.0);
        }

        self.sink_scratch.clear();
        self.sink_scratch.extend(self.graph.sinks());
        self.voice_scratch.clear();
        self.voice_scratch.extend_from_slice(self.pool.voices());

        for &vid in &self.voice_scratch {
            let Some(voice) = self.pool.voice(vid) else {
                continue;
            };
            self.graph.prepare(nframes);
            let request = Request::new(voice, self.config.sample_rate);
            let n = match self.graph.render(&request) {
                Ok(n) => n,
                Err(_) => continue,
            };
            for (index, &sink) in self.sink_scratch.iter().enumerate() {
                let Some(buffer) = self.graph.buffer(sink) else {
                    continue;
                };
                let out = &mut outputs[index % nchannels];
                for (o, s) in out.iter_mut().zip(buffer.iter()).take(n.min(nframes)) {
                    *o += s;
                }
            }
        }

        // Reclaim voices that were released and whose modulators have gone
        // silent. Voices without any bound envelope stop at note-off.
        for &vid in &self.voice_scratch {
            let Some(voice) = self.pool.voice(vid) else {
                continue;
            };
            if !voice.pressed() && !voice.killed() && !self.graph.voice_active(vid) {
                self.pool.kill(vid);
            }
        }

        Ok(nframes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Slot;
    use crate::modulator::Adsr;
    use crate::nodes::{Oscillator, Shape};

    fn sine_patch() -> Graph {
        let mut graph = Graph::new();
        graph.add_node(Box::new(Oscillator::new(Shape::Sine)));
        graph
    }

    fn config() -> EngineConfig {
        EngineConfig {
            sample_rate: 1024.0,
            polyphony: 4,
            headroom: 256,
            priority: Priority::Fifo,
        }
    }

    #[test]
    fn pressed_key_produces_audio() {
        let mut engine = Engine::new(config(), sine_patch());
        engine.handle_message(SynthMessage::NoteOn {
            key: 69,
            velocity: 127,
        });

        let mut left = vec![0.0f32; 128];
        let n = engine.render_block(&mut [&mut left]).unwrap();
        assert_eq!(n, 128);
        assert!(left.iter().any(|&s| s.abs() > 0.1));
    }

    #[test]
    fn silent_without_presses() {
        let mut engine = Engine::new(config(), sine_patch());
        let mut out = vec![1.0f32; 64];
        engine.render_block(&mut [&mut out]).unwrap();
        assert!(out.iter().all(|&s| s == 0.0), "output is cleared first");
    }

    #[test]
    fn zero_velocity_note_on_releases() {
        let mut engine = Engine::new(config(), sine_patch());
        engine.handle_message(SynthMessage::NoteOn {
            key: 60,
            velocity: 100,
        });
        engine.handle_message(SynthMessage::NoteOn {
            key: 60,
            velocity: 0,
        });
        assert!(!engine.pool().voice(0).unwrap().pressed());
    }

    #[test]
    fn unenveloped_voice_is_reclaimed_at_note_off() {
        let mut engine = Engine::new(config(), sine_patch());
        engine.handle_message(SynthMessage::NoteOn {
            key: 60,
            velocity: 100,
        });
        let mut out = vec![0.0f32; 64];
        engine.render_block(&mut [&mut out]).unwrap();
        assert_eq!(engine.pool().active_count(), 1);

        engine.handle_message(SynthMessage::NoteOff { key: 60 });
        engine.render_block(&mut [&mut out]).unwrap();
        engine.render_block(&mut [&mut out]).unwrap();
        assert_eq!(engine.pool().active_count(), 0);
    }

    #[test]
    fn enveloped_voice_survives_until_release_ends() {
        let mut graph = Graph::new();
        let osc = graph.add_node(Box::new(Oscillator::new(Shape::Sine)));
        // 0.125 s release at 1024 Hz = 128 samples = 2 blocks of 64.
        let env = graph.add_modulator(Box::new(Adsr::with_lengths(0.0, 0.0, 0.0, 0.125)));
        graph.connect_modulator(osc, Slot::AMP, env, 1.0).unwrap();

        let mut engine = Engine::new(config(), graph);
        engine.handle_message(SynthMessage::NoteOn {
            key: 60,
            velocity: 100,
        });
        let mut out = vec![0.0f32; 64];
        engine.render_block(&mut [&mut out]).unwrap();
        engine.handle_message(SynthMessage::NoteOff { key: 60 });

        engine.render_block(&mut [&mut out]).unwrap();
        assert_eq!(
            engine.pool().active_count(),
            1,
            "voice rings through its release tail"
        );
        assert!(out.iter().any(|&s| s.abs() > 1e-4));

        // One block finishes the tail, one block goes silent (and the
        // voice is marked), one more sweeps it back to the free list.
        engine.render_block(&mut [&mut out]).unwrap();
        engine.render_block(&mut [&mut out]).unwrap();
        engine.render_block(&mut [&mut out]).unwrap();
        assert_eq!(engine.pool().active_count(), 0);
    }

    #[test]
    fn sinks_cycle_over_output_channels() {
        let mut graph = Graph::new();
        graph.add_node(Box::new(Oscillator::new(Shape::Square)));
        graph.add_node(Box::new(Oscillator::new(Shape::Square)));
        let mut engine = Engine::new(config(), graph);
        engine.handle_message(SynthMessage::NoteOn {
            key: 60,
            velocity: 127,
        });

        let mut left = vec![0.0f32; 64];
        let mut right = vec![0.0f32; 64];
        engine.render_block(&mut [&mut left, &mut right]).unwrap();
        assert!(left.iter().any(|&s| s.abs() > 0.1));
        assert!(right.iter().any(|&s| s.abs() > 0.1));
    }

    #[test]
    fn oversized_blocks_are_rejected() {
        let mut engine = Engine::new(config(), sine_patch());
        let mut out = vec![0.0f32; MAX_BLOCK_SIZE + 1];
        assert_eq!(
            engine.render_block(&mut [&mut out]),
            Err(Error::InvalidArgument)
        );
    }

    #[cfg(feature = "rtrb")]
    #[test]
    fn messages_drain_from_the_ring_buffer() {
        let (mut tx, rx) = rtrb::RingBuffer::new(16);
        let mut engine = Engine::new(config(), sine_patch());
        engine.set_receiver(rx);

        tx.push(SynthMessage::NoteOn {
            key: 69,
            velocity: 127,
        })
        .unwrap();

        let mut out = vec![0.0f32; 64];
        engine.render_block(&mut [&mut out]).unwrap();
        assert!(out.iter().any(|&s| s.abs() > 0.1));
    }
}
