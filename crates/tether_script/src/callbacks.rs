//! Retained script callbacks
//!
//! Registries shared with host threads only ever hold a [`CallbackId`]; the
//! function itself stays here, reachable from the event-loop thread alone.

use std::collections::HashMap;
use std::fmt;

use rquickjs::{Ctx, Function, Persistent};

/// Key of a retained callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb#{}", self.0)
    }
}

#[cfg(test)]
impl CallbackId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        CallbackId(raw)
    }
}

#[derive(Default)]
pub(crate) struct CallbackStore {
    next: u64,
    slots: HashMap<CallbackId, Persistent<Function<'static>>>,
}

impl CallbackStore {
    pub fn retain<'js>(&mut self, ctx: &Ctx<'js>, function: Function<'js>) -> CallbackId {
        self.next += 1;
        let id = CallbackId(self.next);
        self.slots.insert(id, Persistent::save(ctx, function));
        id
    }

    /// A fresh reference to the callback, usable after the store's borrow
    /// is released.
    pub fn get(&self, id: CallbackId) -> Option<Persistent<Function<'static>>> {
        self.slots.get(&id).cloned()
    }

    pub fn release(&mut self, id: CallbackId) -> bool {
        self.slots.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
