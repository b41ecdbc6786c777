use crate::error::{Error, Result};
use crate::synth::voice::{Voice, VoiceId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default bound on the stolen-key stack. Pools can override it with
/// [`VoicePool::set_stolen_capacity`].
pub const STOLEN_STACK_CAPACITY: usize = 32;

/// Policy deciding which active voice is stolen when the pool saturates.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Oldest press is stolen first (insertion order).
    Fifo,
    /// Lowest current pressure is stolen first.
    Pressure,
}

/// A key that was stolen while still pressed. Kept so it can return to life
/// ("repossession") when a newer key is released.
#[derive(Debug, Clone, Copy)]
pub struct StolenKey {
    pub key: u8,
    pub pressure: f32,
}

/*
Voice allocation
================

The pool owns a fixed set of N voices, split between a free list and an
active list at all times (|free| + |active| = N). The active list doubles as
the priority order: the front is the next steal victim, the back is the most
recent press.

Saturated press: the victim is released and, if it was still pressed, its
{key, pressure} pair is pushed onto a bounded stolen stack. Releasing a newer
key while the stack is non-empty pops the top entry back onto that voice
without retriggering - the older note simply resumes sounding.

Killed voices (marked by the driver once their envelopes fall silent) are
swept back to the free list lazily, at the next `prioritize` - which runs at
block boundaries via `voices()` and before each allocation. Priority order
therefore never changes in the middle of a block.
*/
pub struct VoicePool {
    voices: Vec<Voice>,
    free: Vec<VoiceId>,
    active: Vec<VoiceId>,
    stolen: Vec<StolenKey>,
    stolen_capacity: usize,
    priority: Priority,
}

/// Equal-tempered key-to-frequency mapping with A(69) = 440 Hz.
pub fn key_frequency(key: u8) -> f32 {
    440.0 * 2.0_f32.powf((key as f32 - 69.0) / 12.0)
}

impl VoicePool {
    /// Create a pool with `polyphony` voices and FIFO steal priority.
    pub fn new(polyphony: usize) -> Self {
        let voices = (0..polyphony).map(Voice::new).collect();
        // Free list is popped from the back; reverse so voice 0 goes first.
        let free = (0..polyphony).rev().collect();
        Self {
            voices,
            free,
            active: Vec::with_capacity(polyphony),
            stolen: Vec::with_capacity(STOLEN_STACK_CAPACITY),
            stolen_capacity: STOLEN_STACK_CAPACITY,
            priority: Priority::Fifo,
        }
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Bound the stolen-key stack. Oldest entries are overwritten once the
    /// stack exceeds this capacity.
    pub fn set_stolen_capacity(&mut self, capacity: usize) {
        self.stolen_capacity = capacity;
        while self.stolen.len() > capacity {
            self.stolen.remove(0);
        }
    }

    pub fn capacity(&self) -> usize {
        self.voices.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Read access to a voice; `None` for ids outside the pool.
    pub fn voice(&self, id: VoiceId) -> Option<&Voice> {
        self.voices.get(id)
    }

    pub fn stolen(&self) -> &[StolenKey] {
        &self.stolen
    }

    /// Press `key` with `velocity` in (0, 1].
    ///
    /// Returns the id of the voice that took the press, or `None` when the
    /// pool has zero capacity. Pressing a key that is already held by a
    /// pressed voice is an error; if the holding voice is merely releasing,
    /// it is re-pressed in place and moved to the back of the priority order.
    pub fn press(&mut self, key: u8, velocity: f32) -> Result<Option<VoiceId>> {
        let frequency = key_frequency(key);

        if let Some(id) = self.find_active(key) {
            if self.voices[id].pressed() {
                return Err(Error::InvalidArgument);
            }
            self.voices[id].press(frequency, velocity)?;
            self.voices[id].clear_killed();
            self.active.retain(|&a| a != id);
            self.active.push(id);
            return Ok(Some(id));
        }

        self.prioritize();

        if let Some(id) = self.free.pop() {
            self.voices[id].assign_key(key);
            self.voices[id].set_repossessed(false);
            self.voices[id].press(frequency, velocity)?;
            self.active.push(id);
            return Ok(Some(id));
        }

        if self.active.is_empty() {
            return Ok(None);
        }

        // Steal the lowest-priority voice. A voice stolen mid-press is
        // remembered on the stack so a later release can repossess it.
        let id = self.active.remove(0);
        if self.voices[id].pressed() {
            self.push_stolen(StolenKey {
                key: self.voices[id].key(),
                pressure: self.voices[id].pressure(),
            });
            let _ = self.voices[id].release();
        }
        self.voices[id].assign_key(key);
        self.voices[id].set_repossessed(false);
        self.voices[id].press(frequency, velocity)?;
        self.active.push(id);
        Ok(Some(id))
    }

    /// Release `key`.
    ///
    /// If no active voice holds the key, any stolen-stack entries for it are
    /// dropped instead. If the stack is non-empty, the released voice is
    /// handed the most recently stolen key rather than being silenced.
    pub fn release(&mut self, key: u8) -> Result<()> {
        let id = match self.find_active(key) {
            Some(id) => id,
            None => {
                self.stolen.retain(|s| s.key != key);
                return Ok(());
            }
        };

        if let Some(stolen) = self.stolen.pop() {
            let frequency = key_frequency(stolen.key);
            self.voices[id].repossess(stolen.key, frequency, stolen.pressure);
            return Ok(());
        }

        self.voices[id].release()
    }

    /// Forward channel pressure to the voice holding `key`, if any.
    pub fn aftertouch(&mut self, key: u8, pressure: f32) -> Result<()> {
        match self.find_active(key) {
            Some(id) if self.voices[id].pressed() => self.voices[id].aftertouch(pressure),
            _ => Ok(()),
        }
    }

    /// Mark a voice for reclamation. It keeps its place in the active list
    /// until the next `prioritize` sweep moves it to the free list.
    pub fn kill(&mut self, id: VoiceId) {
        if id >= self.voices.len() {
            return;
        }
        self.voices[id].mark_killed();
        if self.voices[id].pressed() {
            let _ = self.voices[id].release();
        }
    }

    /// Release every active voice (all-notes-off).
    pub fn release_all(&mut self) {
        for &id in &self.active {
            if self.voices[id].pressed() {
                let _ = self.voices[id].release();
            }
        }
    }

    /// Reclaim killed voices and refresh the steal order, then return the
    /// active voices for this block. Iteration order is stable until the
    /// next call.
    pub fn voices(&mut self) -> &[VoiceId] {
        self.prioritize();
        &self.active
    }

    fn find_active(&self, key: u8) -> Option<VoiceId> {
        self.active
            .iter()
            .copied()
            .find(|&id| self.voices[id].key() == key)
    }

    fn push_stolen(&mut self, entry: StolenKey) {
        if self.stolen_capacity == 0 {
            return;
        }
        if self.stolen.len() >= self.stolen_capacity {
            self.stolen.remove(0);
        }
        self.stolen.push(entry);
    }

    /// Sweep killed voices back to the free list, then order the active list
    /// by steal priority. Idempotent.
    fn prioritize(&mut self) {
        let voices = &mut self.voices;
        let free = &mut self.free;
        self.active.retain(|&id| {
            if voices[id].killed() {
                voices[id].clear_killed();
                free.push(id);
                false
            } else {
                true
            }
        });

        if self.priority == Priority::Pressure {
            let voices = &self.voices;
            self.active.sort_by(|&a, &b| {
                voices[a]
                    .pressure()
                    .partial_cmp(&voices[b].pressure())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conservation_holds(pool: &VoicePool) -> bool {
        pool.free_count() + pool.active_count() == pool.capacity()
    }

    #[test]
    fn a440_is_key_69() {
        assert!((key_frequency(69) - 440.0).abs() < 1e-4);
        assert!((key_frequency(81) - 880.0).abs() < 1e-3);
        assert!((key_frequency(57) - 220.0).abs() < 1e-3);
    }

    #[test]
    fn press_allocates_from_free_list() {
        let mut pool = VoicePool::new(3);
        let id = pool.press(60, 1.0).unwrap().unwrap();
        assert!(pool.voice(id).unwrap().pressed());
        assert_eq!(pool.voice(id).unwrap().key(), 60);
        assert_eq!(pool.active_count(), 1);
        assert!(conservation_holds(&pool));
    }

    #[test]
    fn voice_lookup_out_of_range_is_none() {
        let mut pool = VoicePool::new(2);
        pool.press(60, 1.0).unwrap();
        assert!(pool.voice(0).is_some());
        assert!(pool.voice(1).is_some(), "unpressed voices are readable too");
        assert!(pool.voice(2).is_none());
        assert!(pool.voice(usize::MAX).is_none());
    }

    #[test]
    fn double_press_is_rejected() {
        let mut pool = VoicePool::new(2);
        pool.press(60, 1.0).unwrap();
        assert_eq!(pool.press(60, 0.5), Err(Error::InvalidArgument));
    }

    #[test]
    fn empty_pool_returns_none() {
        let mut pool = VoicePool::new(0);
        assert_eq!(pool.press(60, 1.0).unwrap(), None);
    }

    #[test]
    fn saturated_press_steals_oldest_and_records_it() {
        let mut pool = VoicePool::new(2);
        let first = pool.press(60, 1.0).unwrap().unwrap();
        pool.press(64, 1.0).unwrap().unwrap();

        let third = pool.press(67, 1.0).unwrap().unwrap();
        assert_eq!(third, first, "oldest voice is the steal victim");
        assert_eq!(pool.voice(third).unwrap().key(), 67);
        assert_eq!(pool.stolen().len(), 1);
        assert_eq!(pool.stolen()[0].key, 60);
        assert_eq!(pool.stolen()[0].pressure, 1.0);
        assert!(conservation_holds(&pool));
    }

    #[test]
    fn release_repossesses_stolen_key() {
        let mut pool = VoicePool::new(2);
        pool.press(60, 1.0).unwrap();
        pool.press(64, 1.0).unwrap();
        let id = pool.press(67, 1.0).unwrap().unwrap();

        pool.release(67).unwrap();
        let voice = pool.voice(id).unwrap();
        assert!(voice.repossessed());
        assert!(voice.pressed(), "repossession does not release the voice");
        assert_eq!(voice.key(), 60);
        assert_eq!(voice.pressure(), 1.0);
        assert!((voice.frequency() - key_frequency(60)).abs() < 1e-4);
        assert!(pool.stolen().is_empty());
    }

    #[test]
    fn release_of_unknown_key_drops_stolen_entries() {
        let mut pool = VoicePool::new(1);
        pool.press(60, 1.0).unwrap();
        pool.press(64, 1.0).unwrap(); // steals 60
        assert_eq!(pool.stolen().len(), 1);

        pool.release(60).unwrap();
        assert!(pool.stolen().is_empty());
        assert!(pool.voice(0).unwrap().pressed(), "current press is untouched");
    }

    #[test]
    fn repress_of_releasing_voice_reuses_it() {
        let mut pool = VoicePool::new(2);
        let id = pool.press(60, 1.0).unwrap().unwrap();
        pool.release(60).unwrap();
        assert!(!pool.voice(id).unwrap().pressed());

        let again = pool.press(60, 0.5).unwrap().unwrap();
        assert_eq!(again, id);
        assert!(pool.voice(id).unwrap().pressed());
        assert_eq!(pool.voice(id).unwrap().velocity(), 0.5);
        assert_eq!(pool.active_count(), 1, "no second voice was allocated");
    }

    #[test]
    fn killed_voices_return_to_free_list_on_prioritize() {
        let mut pool = VoicePool::new(2);
        let id = pool.press(60, 1.0).unwrap().unwrap();
        pool.kill(id);
        assert_eq!(pool.active_count(), 1, "reclamation is lazy");

        assert!(pool.voices().is_empty());
        assert_eq!(pool.free_count(), 2);
        assert!(!pool.voice(id).unwrap().killed());
        assert!(conservation_holds(&pool));
    }

    #[test]
    fn pressure_priority_steals_softest_voice() {
        let mut pool = VoicePool::new(2);
        pool.set_priority(Priority::Pressure);
        let loud = pool.press(60, 1.0).unwrap().unwrap();
        let soft = pool.press(64, 1.0).unwrap().unwrap();
        pool.aftertouch(60, 0.9).unwrap();
        pool.aftertouch(64, 0.2).unwrap();

        let id = pool.press(67, 1.0).unwrap().unwrap();
        assert_eq!(id, soft, "softest pressure is stolen first");
        assert!(pool.voice(loud).unwrap().pressed());
        assert_eq!(pool.voice(loud).unwrap().key(), 60);
    }

    #[test]
    fn stolen_stack_drops_oldest_past_capacity() {
        let mut pool = VoicePool::new(1);
        pool.set_stolen_capacity(2);
        pool.press(60, 1.0).unwrap();
        pool.press(61, 1.0).unwrap(); // steals 60
        pool.press(62, 1.0).unwrap(); // steals 61
        pool.press(63, 1.0).unwrap(); // steals 62, drops 60

        let keys: Vec<u8> = pool.stolen().iter().map(|s| s.key).collect();
        assert_eq!(keys, vec![61, 62]);
    }

    #[test]
    fn conservation_invariant_across_churn() {
        let mut pool = VoicePool::new(4);
        for key in 0..32u8 {
            pool.press(key, 1.0).unwrap();
            assert!(conservation_holds(&pool));
            if key % 3 == 0 {
                let _ = pool.release(key);
                assert!(conservation_holds(&pool));
            }
        }
        pool.release_all();
        assert!(conservation_holds(&pool));
    }
}
