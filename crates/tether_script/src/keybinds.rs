//! Key-down bindings

use std::sync::{Arc, Mutex};

use rquickjs::{Ctx, Function};
use tether_core::arena::{Arena, ArenaHandle};
use tether_core::sync::lock;
use tether_host::{Key, KeyBindId, KeyCallback, ModifierKeys};
use tracing::{debug, trace};

use crate::bridge::BridgeShared;
use crate::callbacks::CallbackId;
use crate::deferred::DeferredCall;
use crate::error::BridgeError;
use crate::event_loop::{self, LoopState};
use crate::hooks::FiringState;
use crate::runtime::log_error;

#[derive(Debug)]
pub(crate) struct KeyBindRegistration {
    pub key: Key,
    pub modifiers: ModifierKeys,
    pub callback: CallbackId,
    pub host_id: Option<KeyBindId>,
    pub state: FiringState,
}

#[derive(Default)]
pub struct KeyBindRegistry {
    arena: Mutex<Arena<KeyBindRegistration>>,
}

impl KeyBindRegistry {
    pub fn len(&self) -> usize {
        lock(&self.arena).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn contains(&self, handle: ArenaHandle) -> bool {
        lock(&self.arena).contains(handle)
    }

    pub(crate) fn take_all(&self) -> Vec<KeyBindRegistration> {
        lock(&self.arena).drain()
    }

    fn begin_firing(&self, handle: ArenaHandle) -> Option<(CallbackId, Key)> {
        let mut arena = lock(&self.arena);
        let registration = arena.get_mut(handle)?;
        if registration.state == FiringState::Firing {
            return None;
        }
        registration.state = FiringState::Firing;
        Some((registration.callback, registration.key))
    }

    fn end_firing(&self, handle: ArenaHandle) {
        if let Some(registration) = lock(&self.arena).get_mut(handle) {
            registration.state = FiringState::Idle;
        }
    }
}

/// Bind `callback` to `key` held with exactly `modifiers`.
pub(crate) fn register<'js>(
    shared: &Arc<BridgeShared>,
    local: &LoopState,
    ctx: &Ctx<'js>,
    key: Key,
    modifiers: ModifierKeys,
    callback: Function<'js>,
) -> Result<KeyBindId, BridgeError> {
    let callback = local.callbacks.borrow_mut().retain(ctx, callback);
    let handle = lock(&shared.key_binds.arena).insert(KeyBindRegistration {
        key,
        modifiers,
        callback,
        host_id: None,
        state: FiringState::Idle,
    });

    match shared.host.register_keydown(key, modifiers, host_callback(shared, handle)) {
        Ok(id) => {
            if let Some(registration) = lock(&shared.key_binds.arena).get_mut(handle) {
                registration.host_id = Some(id);
            }
            debug!(target: "script", "bound {} ({:?}) as {}", key, modifiers, id);
            Ok(id)
        }
        Err(err) => {
            lock(&shared.key_binds.arena).remove(handle);
            local.callbacks.borrow_mut().release(callback);
            Err(err.into())
        }
    }
}

pub(crate) fn unregister(shared: &BridgeShared, local: &LoopState, id: u64) -> bool {
    let removed = {
        let mut arena = lock(&shared.key_binds.arena);
        let found = arena.find(|registration| registration.host_id.map(|id| id.get()) == Some(id));
        found.and_then(|handle| arena.remove(handle))
    };
    match removed {
        Some(registration) => {
            detach(shared, &registration);
            local.callbacks.borrow_mut().release(registration.callback);
            debug!(target: "script", "unbound {} ({:?})", registration.key, registration.modifiers);
            true
        }
        None => false,
    }
}

pub(crate) fn detach(shared: &BridgeShared, registration: &KeyBindRegistration) {
    if let Some(id) = registration.host_id {
        shared.host.unregister_keydown(id);
    }
}

fn host_callback(shared: &Arc<BridgeShared>, handle: ArenaHandle) -> KeyCallback {
    let shared = Arc::downgrade(shared);
    Arc::new(move || {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match shared.local() {
            Some(local) => {
                fire(&shared, &local, handle);
            }
            None if shared.on_loop_thread() => {}
            None => {
                if shared.key_binds.contains(handle) {
                    trace!(target: "script", "deferring key bind");
                    shared.deferred.push(DeferredCall::KeyBind { registration: handle });
                }
            }
        }
    })
}

/// Run the bound callback with no arguments. Returns whether it ran.
pub(crate) fn fire(shared: &BridgeShared, local: &LoopState, handle: ArenaHandle) -> bool {
    let Some((callback, key)) = shared.key_binds.begin_firing(handle) else {
        return false;
    };
    let callback = local.callbacks.borrow().get(callback);
    let ran = match callback {
        Some(callback) => {
            event_loop::enter(shared.id, local, |ctx| {
                let called = callback
                    .restore(ctx)
                    .and_then(|function| function.call::<_, ()>(()));
                if let Err(err) = called {
                    log_error(ctx, &format!("key bind for {key} failed"), &err);
                }
            });
            true
        }
        None => false,
    };
    shared.key_binds.end_firing(handle);
    ran
}
