//! Bounded slot storage for world mobiles.
//!
//! Every mobile is addressed by a slot index that is reused after removal.
//! Each occupant additionally carries a monotonically increasing serial so
//! that a stale reference held by an observer can be told apart from a new
//! occupant of the same slot.

/// Fixed-capacity slot table with lowest-free-slot insertion.
#[derive(Debug)]
pub struct Repository<T> {
    slots: Vec<Option<T>>,
    population: usize,
    next_serial: u64,
}

impl<T> Repository<T> {
    /// Creates an empty repository with a fixed number of slots.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Repository {
            slots,
            population: 0,
            next_serial: 0,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.population
    }

    pub fn is_empty(&self) -> bool {
        self.population == 0
    }

    /// Whether every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.population == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Inserts the value produced by `build`, handing it the lowest free
    /// slot index and a fresh serial. Returns the assigned index, or `None`
    /// when every slot is taken.
    pub fn insert_with<F>(&mut self, build: F) -> Option<usize>
    where
        F: FnOnce(usize, u64) -> T,
    {
        let index = self.slots.iter().position(Option::is_none)?;
        let serial = self.next_serial;
        self.next_serial += 1;
        self.slots[index] = Some(build(index, serial));
        self.population += 1;
        Some(index)
    }

    /// Removes and returns the occupant of `index`, freeing the slot.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        let removed = self.slots.get_mut(index)?.take();
        if removed.is_some() {
            self.population -= 1;
        }
        removed
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Iterates occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }
}
