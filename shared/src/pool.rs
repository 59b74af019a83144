//! Generational freelist for simulation snapshots
//!
//! Snapshots are cloned on every predicted tick and dropped as soon as they
//! are superseded. The pool keeps their storage slots around and hands out
//! [`SnapshotHandle`]s tagged with a generation, so a handle that outlived
//! its release resolves to `None` instead of aliasing a newer snapshot.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<S> {
    generation: u32,
    value: Option<S>,
}

#[derive(Debug)]
pub struct SnapshotPool<S> {
    slots: Vec<Slot<S>>,
    free: Vec<u32>,
    live: usize,
}

impl<S> SnapshotPool<S> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            live: 0,
        }
    }

    pub fn insert(&mut self, value: S) -> SnapshotHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return SnapshotHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        SnapshotHandle {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, handle: SnapshotHandle) -> Option<&S> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Frees the slot and returns its snapshot; stale handles yield `None`.
    pub fn release(&mut self, handle: SnapshotHandle) -> Option<S> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(value)
    }

    /// Number of snapshots currently checked out.
    pub fn live(&self) -> usize {
        self.live
    }
}

impl<S: Clone> SnapshotPool<S> {
    /// Stores a clone of the snapshot behind `handle`.
    pub fn duplicate(&mut self, handle: SnapshotHandle) -> Option<SnapshotHandle> {
        let copy = self.get(handle)?.clone();
        Some(self.insert(copy))
    }
}
