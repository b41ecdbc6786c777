//! Directed acyclic audio-routing graph.
//!
//! Nodes own no buffers; the graph keeps one frame buffer per node plus an
//! adjacency matrix of mix weights. Rendering walks depth-first from each
//! sink, memoizing per-node results so shared sources run once per block.
//! The graph also owns the [`ModBank`] its nodes' slots are bound into, so
//! a whole patch moves across threads as one value.

pub mod node;

use slotmap::{new_key_type, SlotMap};

use crate::error::{Error, Result};
use crate::modulator::{ModBank, ModKey, Modulator};
use crate::synth::voice::VoiceId;

pub use node::{Node, NodeCore, Request, Slot, SlotBinding};

new_key_type! {
    /// Opaque handle to a node stored in a [`Graph`].
    pub struct NodeKey;
}

/// Edge sentinel: anything below zero means "not connected". Weights of
/// exactly zero keep the edge (and the topology) but mix in nothing.
const NO_EDGE: f32 = -1.0;

pub struct Graph {
    nodes: SlotMap<NodeKey, Box<dyn Node>>,
    /// Insertion order; positions in this list index the matrix rows,
    /// columns, buffers and rendered flags.
    order: Vec<NodeKey>,
    /// `matrix[source][sink]`, `NO_EDGE` or a mix weight >= 0.
    matrix: Vec<Vec<f32>>,
    buffers: Vec<Vec<f32>>,
    rendered: Vec<bool>,
    mods: ModBank,
    nsamples: usize,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            order: Vec::new(),
            matrix: Vec::new(),
            buffers: Vec::new(),
            rendered: Vec::new(),
            mods: ModBank::new(),
            nsamples: 0,
        }
    }

    fn index_of(&self, key: NodeKey) -> Option<usize> {
        self.order.iter().position(|&k| k == key)
    }

    pub fn add_node(&mut self, node: Box<dyn Node>) -> NodeKey {
        let key = self.nodes.insert(node);
        self.order.push(key);
        for row in self.matrix.iter_mut() {
            row.push(NO_EDGE);
        }
        self.matrix.push(vec![NO_EDGE; self.order.len()]);
        self.buffers.push(vec![0.0; self.nsamples]);
        self.rendered.push(false);
        key
    }

    /// Remove a node and its edges. Modulator keys bound to its slots are
    /// released, dropping modulators this node was the last holder of.
    pub fn del_node(&mut self, key: NodeKey) -> Result<()> {
        let index = self.index_of(key).ok_or(Error::IndexOutOfBounds)?;
        let node = self
            .nodes
            .remove(key)
            .ok_or(Error::IndexOutOfBounds)?;
        for binding in node.core().bindings() {
            self.mods.release_key(binding.key);
        }
        self.order.remove(index);
        self.matrix.remove(index);
        for row in self.matrix.iter_mut() {
            row.remove(index);
        }
        self.buffers.remove(index);
        self.rendered.remove(index);
        Ok(())
    }

    pub fn has_node(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn node(&self, key: NodeKey) -> Option<&dyn Node> {
        self.nodes.get(key).map(|n| n.as_ref())
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut dyn Node> {
        self.nodes.get_mut(key).map(|n| n.as_mut() as &mut dyn Node)
    }

    /// Typed access to a node for parameter changes.
    pub fn node_as<T: Node + 'static>(&self, key: NodeKey) -> Option<&T> {
        self.nodes.get(key).and_then(|n| n.as_any().downcast_ref())
    }

    pub fn node_as_mut<T: Node + 'static>(&mut self, key: NodeKey) -> Option<&mut T> {
        self.nodes
            .get_mut(key)
            .and_then(|n| n.as_any_mut().downcast_mut())
    }

    /// True if a directed path leads from `from` to `to` (or they are the
    /// same node).
    fn path_exists(&self, from: usize, to: usize) -> bool {
        if from == to {
            return true;
        }
        if self.matrix[from][to] >= 0.0 {
            return true;
        }
        for next in 0..self.order.len() {
            if next == from || next == to || self.matrix[from][next] < 0.0 {
                continue;
            }
            if self.path_exists(next, to) {
                return true;
            }
        }
        false
    }

    /// Whether `source -> sink` may be added without forming a cycle.
    pub fn can_connect(&self, source: NodeKey, sink: NodeKey) -> bool {
        if source == sink {
            return false;
        }
        let (Some(si), Some(di)) = (self.index_of(source), self.index_of(sink)) else {
            return false;
        };
        !self.path_exists(di, si)
    }

    /// Connect `source -> sink` at full mix (weight 1.0).
    pub fn connect(&mut self, source: NodeKey, sink: NodeKey) -> Result<()> {
        if !self.can_connect(source, sink) {
            return Err(Error::InvalidArgument);
        }
        let si = self.index_of(source).ok_or(Error::IndexOutOfBounds)?;
        let di = self.index_of(sink).ok_or(Error::IndexOutOfBounds)?;
        self.matrix[si][di] = 1.0;
        Ok(())
    }

    /// Adjust the mix weight of an existing edge. Weight 0 silences the
    /// edge without changing the topology.
    pub fn set_weight(&mut self, source: NodeKey, sink: NodeKey, weight: f32) -> Result<()> {
        if !(weight >= 0.0 && weight.is_finite()) {
            return Err(Error::InvalidArgument);
        }
        let si = self.index_of(source).ok_or(Error::IndexOutOfBounds)?;
        let di = self.index_of(sink).ok_or(Error::IndexOutOfBounds)?;
        if self.matrix[si][di] < 0.0 {
            return Err(Error::InvalidArgument);
        }
        self.matrix[si][di] = weight;
        Ok(())
    }

    pub fn weight(&self, source: NodeKey, sink: NodeKey) -> Option<f32> {
        let si = self.index_of(source)?;
        let di = self.index_of(sink)?;
        let edge = self.matrix[si][di];
        (edge >= 0.0).then_some(edge)
    }

    /// A sink has no outgoing edges; its buffer is the patch output.
    pub fn is_sink(&self, key: NodeKey) -> bool {
        match self.index_of(key) {
            Some(index) => self.matrix[index].iter().all(|&e| e < 0.0),
            None => false,
        }
    }

    pub fn sinks(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.order
            .iter()
            .enumerate()
            .filter(|(i, _)| self.matrix[*i].iter().all(|&e| e < 0.0))
            .map(|(_, &k)| k)
    }

    /// Size every node buffer and modulator for a block of `nsamples` and
    /// clear the rendered flags. This is the graph's only allocation point;
    /// `render` reuses what was prepared here.
    pub fn prepare(&mut self, nsamples: usize) {
        self.nsamples = nsamples;
        for buffer in self.buffers.iter_mut() {
            buffer.clear();
            buffer.resize(nsamples, 0.0);
        }
        for (index, &key) in self.order.iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(key) {
                node.prepare(nsamples);
            }
            self.rendered[index] = false;
        }
        self.mods.prepare(nsamples);
    }

    /// Render every sink for `request`, returning the smallest frame count
    /// any sink produced. The first failing node aborts the whole render.
    pub fn render(&mut self, request: &Request) -> Result<usize> {
        let mut nrendered = 0;
        for index in 0..self.order.len() {
            if !self.matrix[index].iter().all(|&e| e < 0.0) {
                continue;
            }
            let n = self.render_index(index, request)?;
            if n == 0 {
                return Ok(0);
            }
            if nrendered == 0 || n < nrendered {
                nrendered = n;
            }
        }
        Ok(nrendered)
    }

    fn render_index(&mut self, index: usize, request: &Request) -> Result<usize> {
        if self.rendered[index] {
            return Ok(self.buffers[index].len());
        }

        let nframes = self.buffers[index].len();
        // Taking the buffer lets the recursion below borrow `self` freely;
        // it is restored before any return.
        let mut dst = std::mem::take(&mut self.buffers[index]);

        for src in 0..self.order.len() {
            if src == index {
                continue;
            }
            let mix = self.matrix[src][index];
            if mix <= 0.0 {
                continue;
            }
            let nsrc = match self.render_index(src, request) {
                Ok(n) => n,
                Err(err) => {
                    self.buffers[index] = dst;
                    return Err(err);
                }
            };
            let source = &self.buffers[src];
            for (frame, sample) in dst.iter_mut().zip(source.iter()).take(nsrc.min(nframes)) {
                *frame += sample * mix;
            }
        }

        let key = self.order[index];
        let Some(node) = self.nodes.get_mut(key) else {
            self.buffers[index] = dst;
            return Err(Error::NoData);
        };

        // Run this node's slot modulators first so its render sees them as
        // plain reads. The bank makes repeats within the block free.
        let mods = &mut self.mods;
        for binding in node.core().bindings() {
            if let Err(err) = mods.render(binding.key, request) {
                self.buffers[index] = dst;
                return Err(err);
            }
        }

        let result = node.render(&mut dst, request, mods);
        self.buffers[index] = dst;
        let n = result?;
        self.rendered[index] = true;
        Ok(n)
    }

    /// Rendered output of `key` for the current block.
    pub fn buffer(&self, key: NodeKey) -> Option<&[f32]> {
        let index = self.index_of(key)?;
        Some(&self.buffers[index])
    }

    pub fn add_modulator(&mut self, source: Box<dyn Modulator>) -> ModKey {
        self.mods.insert(source)
    }

    /// Bind a modulator to `slot` of `node` with the given depth. The node
    /// becomes a holder of the modulator.
    pub fn connect_modulator(
        &mut self,
        node: NodeKey,
        slot: Slot,
        key: ModKey,
        depth: f32,
    ) -> Result<()> {
        if !self.mods.contains(key) {
            return Err(Error::IndexOutOfBounds);
        }
        let target = self.nodes.get_mut(node).ok_or(Error::IndexOutOfBounds)?;
        target.core_mut().bind(slot, key, depth)?;
        self.mods.retain_key(key)
    }

    pub fn modulator(&self, key: ModKey) -> Option<&dyn Modulator> {
        self.mods.get(key)
    }

    pub fn modulator_mut(&mut self, key: ModKey) -> Option<&mut dyn Modulator> {
        self.mods.get_mut(key)
    }

    pub fn modulator_as<T: Modulator + 'static>(&self, key: ModKey) -> Option<&T> {
        self.mods.get_as(key)
    }

    pub fn modulator_as_mut<T: Modulator + 'static>(&mut self, key: ModKey) -> Option<&mut T> {
        self.mods.get_as_mut(key)
    }

    /// True while any modulator still holds `voice` open (envelope tails).
    pub fn voice_active(&self, voice: VoiceId) -> bool {
        self.mods.voice_active(voice)
    }
}
