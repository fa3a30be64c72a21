//! Event-loop thread state
//!
//! Script values may only be touched on the thread that initialised the
//! engine. Everything that holds script values lives in a [`LoopState`]
//! registered in a thread-local table, so host callbacks (which only carry a
//! `Send` engine id) can find it again when they run on that thread, and
//! find nothing anywhere else.
//!
//! Entering the engine locks the runtime, and that lock is not reentrant.
//! While a context is entered it is published on a thread-local stack so a
//! nested dispatch (a script calls a native function whose hook fires
//! synchronously) reuses it instead of locking again.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use rquickjs::{Ctx, Object, Persistent};

use crate::callbacks::CallbackStore;
use crate::runtime::ScriptRuntime;

/// Identity of one initialised engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EngineId(u64);

impl EngineId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        EngineId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine#{}", self.0)
    }
}

/// Script-side state of a running engine. Never leaves its thread.
pub(crate) struct LoopState {
    pub runtime: ScriptRuntime,
    pub callbacks: RefCell<CallbackStore>,
    /// Prototype shared by every object wrapper.
    pub object_proto: RefCell<Option<Persistent<Object<'static>>>>,
}

impl LoopState {
    pub fn new(runtime: ScriptRuntime) -> Self {
        Self {
            runtime,
            callbacks: RefCell::new(CallbackStore::default()),
            object_proto: RefCell::new(None),
        }
    }

    /// Drop every retained script reference. Must run before the context
    /// and runtime are freed.
    pub fn release_all(&self) {
        self.callbacks.borrow_mut().clear();
        self.object_proto.borrow_mut().take();
    }
}

thread_local! {
    static ENGINES: RefCell<HashMap<EngineId, Rc<LoopState>>> = RefCell::new(HashMap::new());
    static ENTERED: RefCell<Vec<(EngineId, Ctx<'static>)>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn attach(engine: EngineId, state: Rc<LoopState>) {
    ENGINES.with(|engines| engines.borrow_mut().insert(engine, state));
}

pub(crate) fn detach(engine: EngineId) -> Option<Rc<LoopState>> {
    ENGINES.with(|engines| engines.borrow_mut().remove(&engine))
}

/// The engine's state, if it is running on the current thread.
pub(crate) fn lookup(engine: EngineId) -> Option<Rc<LoopState>> {
    ENGINES.with(|engines| engines.borrow().get(&engine).cloned())
}

#[cfg(test)]
pub(crate) fn is_entered(engine: EngineId) -> bool {
    entered(engine).is_some()
}

fn entered(engine: EngineId) -> Option<Ctx<'static>> {
    ENTERED.with(|stack| {
        stack
            .borrow()
            .iter()
            .rev()
            .find(|(id, _)| *id == engine)
            .map(|(_, ctx)| ctx.clone())
    })
}

/// Run `f` inside the engine's root context, reusing the context if this
/// thread is already inside it.
pub(crate) fn enter<R>(engine: EngineId, state: &LoopState, f: impl for<'js> FnOnce(&Ctx<'js>) -> R) -> R {
    if let Some(ctx) = entered(engine) {
        return f(&ctx);
    }
    state.runtime.context.with(|ctx| {
        let _guard = EnterGuard::push(engine, &ctx);
        f(&ctx)
    })
}

struct EnterGuard;

impl EnterGuard {
    fn push<'js>(engine: EngineId, ctx: &Ctx<'js>) -> Self {
        // SAFETY: the erased context is popped by this guard before
        // `Context::with` returns, so it is never used outside the lock
        // that makes it valid. Values derived from it cannot escape `enter`
        // because its callback is generic over the context lifetime.
        let erased = unsafe { std::mem::transmute::<Ctx<'js>, Ctx<'static>>(ctx.clone()) };
        ENTERED.with(|stack| stack.borrow_mut().push((engine, erased)));
        EnterGuard
    }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let popped = ENTERED.with(|stack| stack.borrow_mut().pop());
        drop(popped);
    }
}
