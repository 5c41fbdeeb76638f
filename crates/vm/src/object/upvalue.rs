//! Upvalues: a mutable cell shared between a closure and the frame that
//! declared the captured local (spec §4.3).
//!
//! While the enclosing frame is still on a fiber's stack, the upvalue is
//! "open" and points directly at that stack slot, so writes through
//! either the local or the upvalue are visible to both. When the frame
//! returns, `close()` copies the current value out and the upvalue
//! becomes self-contained.

use std::cell::Cell;
use std::ptr::NonNull;

use djuru_core::{ObjHeader, ObjKind, Value};

use crate::heap::HasHeader;

#[derive(Clone, Copy)]
enum State {
    Open(NonNull<Value>),
    Closed(Value),
}

#[repr(C)]
pub struct UpvalueObj {
    pub header: ObjHeader,
    state: Cell<State>,
    /// Open-upvalue list link, ordered by descending stack address so the
    /// interpreter can close a contiguous run in one pass on scope exit.
    pub next_open: Cell<Option<NonNull<ObjHeader>>>,
}

unsafe impl HasHeader for UpvalueObj {}

impl UpvalueObj {
    #[must_use]
    pub fn new(slot: NonNull<Value>) -> UpvalueObj {
        UpvalueObj {
            header: ObjHeader::new(ObjKind::Upvalue),
            state: Cell::new(State::Open(slot)),
            next_open: Cell::new(None),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.state.get(), State::Open(_))
    }

    /// The stack slot this upvalue still points at, while open.
    #[must_use]
    pub fn open_slot(&self) -> Option<NonNull<Value>> {
        match self.state.get() {
            State::Open(slot) => Some(slot),
            State::Closed(_) => None,
        }
    }

    #[must_use]
    pub fn get(&self) -> Value {
        match self.state.get() {
            // SAFETY: while open, `slot` points into a live fiber stack
            // slot; the fiber outlives every closure capturing it (an
            // open upvalue is always closed before its frame is popped).
            State::Open(slot) => unsafe { *slot.as_ptr() },
            State::Closed(v) => v,
        }
    }

    pub fn set(&self, value: Value) {
        match self.state.get() {
            State::Open(slot) => unsafe { *slot.as_ptr() = value },
            State::Closed(_) => self.state.set(State::Closed(value)),
        }
    }

    /// Copies the current value out of the stack slot and severs the
    /// pointer; called when the owning frame's scope exits.
    pub fn close(&self) {
        if let State::Open(slot) = self.state.get() {
            let value = unsafe { *slot.as_ptr() };
            self.state.set(State::Closed(value));
        }
    }

    /// Adjusts an open upvalue's stack pointer by `delta` elements, after
    /// its owning fiber's value stack has moved to a new allocation. A
    /// no-op once the upvalue is closed.
    pub(crate) fn rebase(&self, delta: isize) {
        if let State::Open(slot) = self.state.get() {
            let rebased = unsafe { NonNull::new_unchecked(slot.as_ptr().offset(delta)) };
            self.state.set(State::Open(rebased));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_upvalue_reads_through_the_slot() {
        let mut slot = Value::number(1.0);
        let up = UpvalueObj::new(NonNull::from(&mut slot));
        assert_eq!(up.get().as_number(), Some(1.0));
        slot = Value::number(2.0);
        assert_eq!(up.get().as_number(), Some(2.0));
    }

    #[test]
    fn close_snapshots_the_current_value() {
        let mut slot = Value::number(5.0);
        let up = UpvalueObj::new(NonNull::from(&mut slot));
        up.close();
        assert!(!up.is_open());
        assert_eq!(up.get().as_number(), Some(5.0));
    }
}
