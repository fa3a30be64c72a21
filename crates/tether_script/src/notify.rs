//! Object-creation listeners

use std::sync::{Arc, Mutex};

use rquickjs::{Ctx, Function};
use tether_core::arena::{Arena, ArenaHandle};
use tether_core::sync::lock;
use tether_host::{ListenerId, ObjectCreatedCallback, ObjectHandle};
use tracing::{debug, trace};

use crate::bindings::object::wrap_object;
use crate::bridge::BridgeShared;
use crate::callbacks::CallbackId;
use crate::deferred::DeferredCall;
use crate::error::BridgeError;
use crate::event_loop::{self, LoopState};
use crate::runtime::log_error;

#[derive(Debug)]
pub(crate) struct ListenerRegistration {
    pub class_name: String,
    pub callback: CallbackId,
    pub host_id: Option<ListenerId>,
}

#[derive(Default)]
pub struct ListenerRegistry {
    arena: Mutex<Arena<ListenerRegistration>>,
}

impl ListenerRegistry {
    pub fn len(&self) -> usize {
        lock(&self.arena).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn take_all(&self) -> Vec<ListenerRegistration> {
        lock(&self.arena).drain()
    }

    fn lookup(&self, handle: ArenaHandle) -> Option<(CallbackId, String)> {
        lock(&self.arena)
            .get(handle)
            .map(|registration| (registration.callback, registration.class_name.clone()))
    }
}

/// Call `callback(object)` for every new object of `class_name`, subclasses
/// included.
pub(crate) fn register<'js>(
    shared: &Arc<BridgeShared>,
    local: &LoopState,
    ctx: &Ctx<'js>,
    class_name: &str,
    callback: Function<'js>,
) -> Result<ListenerId, BridgeError> {
    let callback = local.callbacks.borrow_mut().retain(ctx, callback);
    let handle = lock(&shared.listeners.arena).insert(ListenerRegistration {
        class_name: class_name.to_string(),
        callback,
        host_id: None,
    });

    match shared.host.notify_on_new_object(class_name, host_callback(shared, handle)) {
        Ok(id) => {
            if let Some(registration) = lock(&shared.listeners.arena).get_mut(handle) {
                registration.host_id = Some(id);
            }
            debug!(target: "script", "watching new '{}' objects as {}", class_name, id);
            Ok(id)
        }
        Err(err) => {
            lock(&shared.listeners.arena).remove(handle);
            local.callbacks.borrow_mut().release(callback);
            Err(err.into())
        }
    }
}

pub(crate) fn detach(shared: &BridgeShared, registration: &ListenerRegistration) {
    if let Some(id) = registration.host_id {
        shared.host.remove_object_listener(id);
    }
}

fn host_callback(shared: &Arc<BridgeShared>, handle: ArenaHandle) -> ObjectCreatedCallback {
    let shared = Arc::downgrade(shared);
    Arc::new(move |object: ObjectHandle| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match shared.local() {
            Some(local) => {
                fire(&shared, &local, handle, object);
            }
            None if shared.on_loop_thread() => {}
            None => {
                trace!(target: "script", "deferring creation of {}", object);
                shared.deferred.push(DeferredCall::ObjectCreated {
                    registration: handle,
                    object,
                });
            }
        }
    })
}

/// Run the listener with a wrapper for `object`. Returns whether it ran.
pub(crate) fn fire(shared: &BridgeShared, local: &LoopState, handle: ArenaHandle, object: ObjectHandle) -> bool {
    let Some((callback, class_name)) = shared.listeners.lookup(handle) else {
        return false;
    };
    let Some(callback) = local.callbacks.borrow().get(callback) else {
        return false;
    };
    event_loop::enter(shared.id, local, |ctx| {
        let called = callback.restore(ctx).and_then(|function| {
            let wrapper = wrap_object(ctx, local, object)?;
            function.call::<_, ()>((wrapper,))
        });
        if let Err(err) = called {
            log_error(ctx, &format!("new '{class_name}' listener failed"), &err);
        }
    });
    true
}
