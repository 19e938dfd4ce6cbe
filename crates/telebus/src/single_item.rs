// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Triple-buffered latest-value mailbox.
//!
//! Three slots rotate through the roles *read*, *write*, and *free* (the
//! handoff buffer). A writer always owns an exclusive write slot and a
//! reader always owns an exclusive read slot; the free slot carries the most
//! recently completed write that has not yet been picked up.
//!
//! On write completion the write slot and the free slot swap roles, so the
//! just-written value becomes the new handoff buffer. On read start, the
//! read slot and the free slot swap roles (if the free slot is dirty), so
//! the reader picks up the newest value without ever copying past the
//! writer. This gives a writer that never blocks and a reader that always
//! sees the most recently completed write.

use std::sync::{Condvar, Mutex};

/// (read_slot, write_slot) pairs; the remaining index is the free slot.
const STATES: [(usize, usize); 6] = [(0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (2, 1)];

fn free_slot(read_slot: usize, write_slot: usize) -> usize {
    3 - read_slot - write_slot
}

struct Inner<T> {
    slots: [Option<T>; 3],
    state: usize,
    /// Whether the free slot holds a write the reader hasn't consumed yet.
    dirty: bool,
    stopped: bool,
}

/// SPSC latest-value slot: writes never block, readers always see the
/// newest completed write.
pub struct SingleItem<T> {
    inner: Mutex<Inner<T>>,
    new_data: Condvar,
}

impl<T> SingleItem<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: [None, None, None],
                state: 0,
                dirty: false,
                stopped: false,
            }),
            new_data: Condvar::new(),
        }
    }

    /// Write a value. Never blocks, never fails.
    pub fn write(&self, value: T) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (read_slot, write_slot) = STATES[inner.state];
        inner.slots[write_slot] = Some(value);

        // Swap write slot and free slot: the write we just finished becomes
        // the new handoff buffer, and we claim the old handoff buffer as our
        // next write target.
        let new_write_slot = free_slot(read_slot, write_slot);
        let new_state = STATES
            .iter()
            .position(|&(r, w)| r == read_slot && w == new_write_slot)
            .expect("(read_slot, new_write_slot) is always a valid state");
        inner.state = new_state;
        inner.dirty = true;
        drop(inner);
        self.new_data.notify_one();
    }

    /// Read the most recent value written since the last successful read.
    ///
    /// If `blocking` is false and no new value is available, returns `None`
    /// immediately. If `blocking` is true, waits until a new value arrives
    /// or [`SingleItem::stop`] is called.
    pub fn read(&self, blocking: bool) -> Option<T>
    where
        T: Clone,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if inner.dirty {
                let (read_slot, write_slot) = STATES[inner.state];
                let f = free_slot(read_slot, write_slot);
                // Swap read slot and free slot: pick up the newest write.
                let new_state = STATES
                    .iter()
                    .position(|&(r, w)| r == f && w == write_slot)
                    .expect("(free_slot, write_slot) is always a valid state");
                inner.state = new_state;
                inner.dirty = false;
                let (new_read_slot, _) = STATES[new_state];
                return inner.slots[new_read_slot].clone();
            }
            if inner.stopped || !blocking {
                return None;
            }
            inner = self.new_data.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`SingleItem::read`], but moves the value out instead of cloning
    /// it, to avoid copying large payloads. Leaves the read slot empty.
    pub fn swap_read(&self, blocking: bool) -> Option<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if inner.dirty {
                let (read_slot, write_slot) = STATES[inner.state];
                let f = free_slot(read_slot, write_slot);
                let new_state = STATES
                    .iter()
                    .position(|&(r, w)| r == f && w == write_slot)
                    .expect("(free_slot, write_slot) is always a valid state");
                inner.state = new_state;
                inner.dirty = false;
                let (new_read_slot, _) = STATES[new_state];
                return inner.slots[new_read_slot].take();
            }
            if inner.stopped || !blocking {
                return None;
            }
            inner = self.new_data.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Wake any blocked reader; subsequent blocking reads return immediately.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.stopped = true;
        drop(inner);
        self.new_data.notify_all();
    }

    /// Whether a value is waiting to be read.
    pub fn has_unread(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).dirty
    }
}

impl<T> Default for SingleItem<T> {
    fn default() -> Self {
        Self::new()
    }
}
