//! Fixed-capacity slot arena shared by the id-keyed stores.
//!
//! A slot is either free or holds a whole value. Releasing a slot drops the
//! value, so a reused slot never carries fields over from its previous
//! occupant. Freed slots are recycled most-recently-freed first.

/// Stable handle to an occupied slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u32);

impl SlotId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub struct SlotTable<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
    capacity: usize,
}

impl<T> SlotTable<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty() && self.slots.len() >= self.capacity
    }

    /// Stores `value` in a free slot. Returns the value back when the table is full.
    pub fn insert(&mut self, value: T) -> Result<SlotId, T> {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(value);
            return Ok(SlotId(index));
        }
        if self.slots.len() >= self.capacity {
            return Err(value);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Some(value));
        Ok(SlotId(index))
    }

    /// Replaces the whole value held by an occupied slot.
    pub fn replace(&mut self, id: SlotId, value: T) -> Option<T> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.is_none() {
            return None;
        }
        slot.replace(value)
    }

    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let value = self.slots.get_mut(id.index())?.take()?;
        self.free.push(id.0);
        Some(value)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<SlotId> {
        self.iter().find(|(_, value)| pred(value)).map(|(id, _)| id)
    }

    /// Occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (SlotId(index as u32), value)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotId, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|value| (SlotId(index as u32), value)))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}
