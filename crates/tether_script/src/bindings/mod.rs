//! The global script surface
//!
//! Every binding closure captures the shared bridge state and looks the
//! loop state up again when it runs. Host calls made from a binding are
//! wrapped so a host panic surfaces as a script `InternalError` instead of
//! unwinding through the interpreter.

pub(crate) mod globals;
pub(crate) mod object;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use rquickjs::{Ctx, Exception};
use tether_host::HostError;
use tracing::error;

use crate::bridge::BridgeShared;
use crate::error::BridgeError;
use crate::event_loop::{self, LoopState};

/// Install the object prototype and every global.
pub(crate) fn install<'js>(ctx: &Ctx<'js>, shared: &Arc<BridgeShared>, local: &LoopState) -> rquickjs::Result<()> {
    object::install_prototype(ctx, shared, local)?;
    globals::install(ctx, shared)
}

pub(crate) fn local_state(ctx: &Ctx<'_>, shared: &BridgeShared) -> rquickjs::Result<Rc<LoopState>> {
    event_loop::lookup(shared.id)
        .ok_or_else(|| Exception::throw_internal(ctx, "script engine is not running on this thread"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a host call, turning a panic into an `InternalError`.
pub(crate) fn host_call<T>(ctx: &Ctx<'_>, what: &str, f: impl FnOnce() -> T) -> rquickjs::Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!(target: "script", "host panicked in {}: {}", what, message);
        Exception::throw_internal(ctx, &format!("host panicked in {what}: {message}"))
    })
}

/// Map a bridge failure onto the script error taxonomy.
pub(crate) fn throw(ctx: &Ctx<'_>, error: BridgeError) -> rquickjs::Error {
    let message = error.to_string();
    match error {
        BridgeError::FunctionNotFound(_) | BridgeError::Host(HostError::UnknownClass(_)) => {
            Exception::throw_reference(ctx, &message)
        }
        BridgeError::NoCallbacks | BridgeError::Marshal(_) => Exception::throw_type(ctx, &message),
        BridgeError::Engine(err) => err,
        _ => {
            error!(target: "script", "{}", message);
            Exception::throw_internal(ctx, &message)
        }
    }
}
