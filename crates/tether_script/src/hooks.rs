//! Script hooks on reflected functions
//!
//! A registration owns up to two retained callbacks (pre and post) and the
//! host hook ids returned for them. The host holds only a closure carrying a
//! weak reference to the bridge plus the registration handle, so a slot that
//! outlives its registration resolves to nothing and does nothing.
//!
//! When the host invokes a hooked function on the event-loop thread the
//! callback runs synchronously, with the live return address. On any other
//! thread the parameters are read immediately, copied, and the call is
//! deferred to the next tick without a return address.

use std::fmt;
use std::sync::{Arc, Mutex};

use rquickjs::{Array, Ctx, Function, Value};
use tether_core::arena::{Arena, ArenaHandle};
use tether_core::sync::lock;
use tether_host::{
    Address, FunctionHandle, HookCallback, HookFrame, HookId, HostError, ObjectHandle, ObjectModel,
    PropertyDescriptor,
};
use tracing::{debug, trace};

use crate::bindings::object::{native_to_script, wrap_object};
use crate::bridge::BridgeShared;
use crate::callbacks::CallbackId;
use crate::deferred::DeferredCall;
use crate::error::BridgeError;
use crate::event_loop::{self, LoopState};
use crate::marshal::{address_to_script, read_native, NativeValue};
use crate::runtime::log_error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HookSide {
    Pre,
    Post,
}

impl fmt::Display for HookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookSide::Pre => f.write_str("pre"),
            HookSide::Post => f.write_str("post"),
        }
    }
}

/// Guards a registration against re-entering itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FiringState {
    #[default]
    Idle,
    Firing,
}

#[derive(Debug)]
pub(crate) struct HookRegistration {
    pub function: FunctionHandle,
    pub name: String,
    pub pre: Option<CallbackId>,
    pub post: Option<CallbackId>,
    pub pre_id: Option<HookId>,
    pub post_id: Option<HookId>,
    pub has_return_value: bool,
    pub state: FiringState,
}

impl HookRegistration {
    fn callback(&self, side: HookSide) -> Option<CallbackId> {
        match side {
            HookSide::Pre => self.pre,
            HookSide::Post => self.post,
        }
    }

    fn matches(&self, pre: u64, post: u64) -> bool {
        let hit = |id: Option<HookId>, wanted: u64| wanted != 0 && id.map(|id| id.get()) == Some(wanted);
        hit(self.pre_id, pre) || hit(self.post_id, post)
    }

    fn callbacks(&self) -> impl Iterator<Item = CallbackId> {
        self.pre.into_iter().chain(self.post)
    }
}

/// What one firing needs, copied out so the registry lock is not held
/// while the callback runs.
#[derive(Debug, Clone)]
pub(crate) struct FireTicket {
    pub callback: CallbackId,
    pub name: String,
    pub has_return_value: bool,
}

/// Live hook registrations.
#[derive(Default)]
pub struct HookRegistry {
    arena: Mutex<Arena<HookRegistration>>,
}

impl HookRegistry {
    pub(crate) fn insert(&self, registration: HookRegistration) -> ArenaHandle {
        lock(&self.arena).insert(registration)
    }

    pub(crate) fn remove(&self, handle: ArenaHandle) -> Option<HookRegistration> {
        lock(&self.arena).remove(handle)
    }

    pub(crate) fn contains(&self, handle: ArenaHandle) -> bool {
        lock(&self.arena).contains(handle)
    }

    fn set_host_id(&self, handle: ArenaHandle, side: HookSide, id: Option<HookId>) {
        if let Some(registration) = lock(&self.arena).get_mut(handle) {
            match side {
                HookSide::Pre => registration.pre_id = id,
                HookSide::Post => registration.post_id = id,
            }
        }
    }

    /// Registration holding either host id. Zero never matches.
    pub(crate) fn find_by_ids(&self, pre: u64, post: u64) -> Option<ArenaHandle> {
        lock(&self.arena).find(|registration| registration.matches(pre, post))
    }

    pub(crate) fn function_of(&self, handle: ArenaHandle) -> Option<FunctionHandle> {
        lock(&self.arena).get(handle).map(|registration| registration.function)
    }

    /// Mark the registration as firing. `None` if it is gone, has no
    /// callback on `side`, or is already firing.
    pub(crate) fn begin_firing(&self, handle: ArenaHandle, side: HookSide) -> Option<FireTicket> {
        let mut arena = lock(&self.arena);
        let registration = arena.get_mut(handle)?;
        let callback = registration.callback(side)?;
        if registration.state == FiringState::Firing {
            trace!(target: "script", "dropping recursive {} hook on '{}'", side, registration.name);
            return None;
        }
        registration.state = FiringState::Firing;
        Some(FireTicket {
            callback,
            name: registration.name.clone(),
            has_return_value: registration.has_return_value,
        })
    }

    pub(crate) fn end_firing(&self, handle: ArenaHandle) {
        if let Some(registration) = lock(&self.arena).get_mut(handle) {
            registration.state = FiringState::Idle;
        }
    }

    pub(crate) fn take_all(&self) -> Vec<HookRegistration> {
        lock(&self.arena).drain()
    }

    pub fn len(&self) -> usize {
        lock(&self.arena).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resets the firing state however the callback exits.
struct FiringReset<'a> {
    registry: &'a HookRegistry,
    handle: ArenaHandle,
}

impl Drop for FiringReset<'_> {
    fn drop(&mut self) {
        self.registry.end_firing(self.handle);
    }
}

/// Register script callbacks around `function`. Returns the host ids, zero
/// for an absent side.
pub(crate) fn register<'js>(
    shared: &Arc<BridgeShared>,
    local: &LoopState,
    ctx: &Ctx<'js>,
    function: FunctionHandle,
    pre: Option<Function<'js>>,
    post: Option<Function<'js>>,
) -> Result<(u64, u64), BridgeError> {
    if pre.is_none() && post.is_none() {
        return Err(BridgeError::NoCallbacks);
    }

    let model: &dyn ObjectModel = &*shared.host;
    let name = model
        .full_name(function.object())
        .unwrap_or_else(|| function.to_string());
    let has_return_value = model.function_params(function).iter().any(|p| p.is_return());

    let (pre, post) = {
        let mut store = local.callbacks.borrow_mut();
        (pre.map(|f| store.retain(ctx, f)), post.map(|f| store.retain(ctx, f)))
    };
    let handle = shared.hooks.insert(HookRegistration {
        function,
        name: name.clone(),
        pre,
        post,
        pre_id: None,
        post_id: None,
        has_return_value,
        state: FiringState::Idle,
    });

    let attached = (|| -> Result<(Option<HookId>, Option<HookId>), HostError> {
        let pre_id = match pre {
            Some(_) => Some(shared.host.register_pre_hook(function, host_callback(shared, handle, HookSide::Pre))?),
            None => None,
        };
        shared.hooks.set_host_id(handle, HookSide::Pre, pre_id);
        let post_id = match post {
            Some(_) => Some(shared.host.register_post_hook(function, host_callback(shared, handle, HookSide::Post))?),
            None => None,
        };
        shared.hooks.set_host_id(handle, HookSide::Post, post_id);
        Ok((pre_id, post_id))
    })();

    match attached {
        Ok((pre_id, post_id)) => {
            let pre_id = pre_id.map_or(0, |id| id.get());
            let post_id = post_id.map_or(0, |id| id.get());
            debug!(target: "script", "hooked '{}' (pre {}, post {})", name, pre_id, post_id);
            Ok((pre_id, post_id))
        }
        Err(err) => {
            if let Some(registration) = shared.hooks.remove(handle) {
                detach(shared, &registration);
                release(local, &registration);
            }
            Err(err.into())
        }
    }
}

/// Remove the registration holding `pre` or `post`. When `function` is
/// given the registration must belong to it.
pub(crate) fn unregister(
    shared: &BridgeShared,
    local: &LoopState,
    function: Option<FunctionHandle>,
    pre: u64,
    post: u64,
) -> bool {
    let Some(handle) = shared.hooks.find_by_ids(pre, post) else {
        return false;
    };
    if function.is_some() && shared.hooks.function_of(handle) != function {
        return false;
    }
    let Some(registration) = shared.hooks.remove(handle) else {
        return false;
    };
    detach(shared, &registration);
    release(local, &registration);
    debug!(target: "script", "unhooked '{}'", registration.name);
    true
}

/// Detach the host slots of a registration already removed from the registry.
pub(crate) fn detach(shared: &BridgeShared, registration: &HookRegistration) {
    for id in registration.pre_id.into_iter().chain(registration.post_id) {
        shared.host.unregister_hook(registration.function, id);
    }
}

pub(crate) fn release(local: &LoopState, registration: &HookRegistration) {
    let mut store = local.callbacks.borrow_mut();
    for callback in registration.callbacks() {
        store.release(callback);
    }
}

fn host_callback(shared: &Arc<BridgeShared>, handle: ArenaHandle, side: HookSide) -> HookCallback {
    let shared = Arc::downgrade(shared);
    Arc::new(move |frame: &HookFrame<'_>| {
        if let Some(shared) = shared.upgrade() {
            dispatch(&shared, handle, side, frame);
        }
    })
}

/// Slots of every non-return parameter, out-parameters at their real storage.
pub(crate) fn param_slots(model: &dyn ObjectModel, frame: &HookFrame<'_>) -> Vec<(PropertyDescriptor, Address)> {
    model
        .function_params(frame.function)
        .into_iter()
        .filter(|desc| !desc.is_return())
        .map(|desc| {
            let redirected = if desc.is_out() { frame.out_address(&desc.name) } else { None };
            let address = redirected.unwrap_or_else(|| frame.params.offset(desc.offset));
            (desc, address)
        })
        .collect()
}

fn capture(model: &dyn ObjectModel, frame: &HookFrame<'_>) -> Vec<NativeValue> {
    param_slots(model, frame)
        .iter()
        // SAFETY: the host guarantees the parameter buffer and out-param
        // storage are live for the duration of the hook call.
        .map(|(desc, address)| unsafe { read_native(model, desc, *address) })
        .collect()
}

fn dispatch(shared: &Arc<BridgeShared>, handle: ArenaHandle, side: HookSide, frame: &HookFrame<'_>) {
    let model: &dyn ObjectModel = &*shared.host;
    match shared.local() {
        Some(local) => {
            let params = capture(model, frame);
            fire(shared, &local, handle, side, frame.context, &params, frame.return_value);
        }
        None if shared.on_loop_thread() => {
            trace!(target: "script", "hook fired on a stopped engine");
        }
        None => {
            if !shared.hooks.contains(handle) {
                return;
            }
            let params = capture(model, frame);
            trace!(target: "script", "deferring {} hook from {:?}", side, std::thread::current().id());
            shared.deferred.push(DeferredCall::Hook {
                registration: handle,
                side,
                context: frame.context,
                params,
            });
        }
    }
}

/// Run the callback on `side` as `callback(context, params, returnAddress)`.
/// Returns whether it ran.
pub(crate) fn fire(
    shared: &BridgeShared,
    local: &LoopState,
    handle: ArenaHandle,
    side: HookSide,
    context: ObjectHandle,
    params: &[NativeValue],
    return_value: Option<Address>,
) -> bool {
    let Some(ticket) = shared.hooks.begin_firing(handle, side) else {
        return false;
    };
    let _reset = FiringReset {
        registry: &shared.hooks,
        handle,
    };
    let Some(callback) = local.callbacks.borrow().get(ticket.callback) else {
        return false;
    };
    let return_value = return_value.filter(|_| ticket.has_return_value);

    event_loop::enter(shared.id, local, |ctx| {
        let called = (|| -> rquickjs::Result<()> {
            let function = callback.restore(ctx)?;
            let this = wrap_object(ctx, local, context)?;
            let args = Array::new(ctx.clone())?;
            for (index, value) in params.iter().enumerate() {
                args.set(index, native_to_script(ctx, local, value)?)?;
            }
            let return_address = match return_value {
                Some(address) => address_to_script(ctx, address),
                None => Value::new_undefined(ctx.clone()),
            };
            function.call::<_, ()>((this, args, return_address))
        })();
        if let Err(err) = called {
            log_error(ctx, &format!("{} hook for '{}' failed", side, ticket.name), &err);
        }
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(pre: Option<u64>, post: Option<u64>) -> HookRegistration {
        let function = FunctionHandle(ObjectHandle::from_address(0x1000).unwrap());
        HookRegistration {
            function,
            name: "Function Game.MyClass.ExampleFunc".to_string(),
            pre: pre.map(|_| CallbackId::from_raw(1)),
            post: post.map(|_| CallbackId::from_raw(2)),
            pre_id: pre.and_then(HookId::new),
            post_id: post.and_then(HookId::new),
            has_return_value: false,
            state: FiringState::Idle,
        }
    }

    #[test]
    fn test_find_by_either_id() {
        let registry = HookRegistry::default();
        let both = registry.insert(registration(Some(3), Some(4)));
        let pre_only = registry.insert(registration(Some(7), None));

        assert_eq!(registry.find_by_ids(3, 0), Some(both));
        assert_eq!(registry.find_by_ids(0, 4), Some(both));
        assert_eq!(registry.find_by_ids(7, 0), Some(pre_only));
        assert_eq!(registry.find_by_ids(0, 0), None);
        assert_eq!(registry.find_by_ids(99, 98), None);
    }

    #[test]
    fn test_recursive_firing_is_dropped() {
        let registry = HookRegistry::default();
        let handle = registry.insert(registration(Some(1), Some(2)));

        let ticket = registry.begin_firing(handle, HookSide::Pre).unwrap();
        assert_eq!(ticket.callback, CallbackId::from_raw(1));
        assert!(registry.begin_firing(handle, HookSide::Pre).is_none());
        assert!(registry.begin_firing(handle, HookSide::Post).is_none());

        registry.end_firing(handle);
        assert!(registry.begin_firing(handle, HookSide::Post).is_some());
    }

    #[test]
    fn test_absent_side_and_removed_registration_do_not_fire() {
        let registry = HookRegistry::default();
        let handle = registry.insert(registration(None, Some(5)));
        assert!(registry.begin_firing(handle, HookSide::Pre).is_none());

        assert!(registry.remove(handle).is_some());
        assert!(registry.begin_firing(handle, HookSide::Post).is_none());
        assert!(registry.is_empty());
    }
}
