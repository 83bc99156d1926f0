//! Counting semaphore over simulation session slots.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Fixed pool of session slots.
///
/// A slot is held by a [`SlotPermit`] and returned when the permit drops.
#[derive(Debug)]
pub struct SessionSlots {
    available: Mutex<usize>,
    released: Condvar,
    capacity: usize,
}

impl SessionSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            available: Mutex::new(capacity),
            released: Condvar::new(),
            capacity,
        }
    }

    /// Block until a slot is free and take it.
    pub fn acquire(&self) -> SlotPermit<'_> {
        let mut available = self.lock();
        while *available == 0 {
            available = self
                .released
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *available -= 1;
        SlotPermit { slots: self }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<SlotPermit<'_>> {
        let mut available = self.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(SlotPermit { slots: self })
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        *self.lock()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self) {
        let mut available = self.lock();
        *available += 1;
        self.released.notify_one();
    }

    // A panicking worker must not wedge the pool.
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A held session slot.
#[derive(Debug)]
pub struct SlotPermit<'a> {
    slots: &'a SessionSlots,
}

impl Drop for SlotPermit<'_> {
    fn drop(&mut self) {
        self.slots.release();
    }
}
