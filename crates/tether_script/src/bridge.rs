//! State shared between the event loop and host threads

use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tether_core::time::Clock;
use tether_host::Host;

use crate::config::ScriptConfig;
use crate::deferred::{DeferralQueue, DeferredCall};
use crate::event_loop::{self, EngineId, LoopState};
use crate::hooks::HookRegistry;
use crate::keybinds::KeyBindRegistry;
use crate::modules::ModuleCache;
use crate::notify::ListenerRegistry;
use crate::timers::TimerScheduler;

/// Everything a host callback may touch from any thread. Script values are
/// never stored here, only [`crate::callbacks::CallbackId`]s.
pub(crate) struct BridgeShared {
    pub id: EngineId,
    pub host: Arc<dyn Host>,
    pub loop_thread: ThreadId,
    pub clock: Arc<dyn Clock>,
    pub config: ScriptConfig,
    pub hooks: HookRegistry,
    pub key_binds: KeyBindRegistry,
    pub listeners: ListenerRegistry,
    pub timers: TimerScheduler,
    pub deferred: DeferralQueue<DeferredCall>,
    pub modules: ModuleCache,
}

impl BridgeShared {
    pub fn new(
        id: EngineId,
        host: Arc<dyn Host>,
        clock: Arc<dyn Clock>,
        config: ScriptConfig,
        modules: ModuleCache,
    ) -> Self {
        let timers = TimerScheduler::new(std::time::Duration::from_millis(config.min_interval_ms));
        Self {
            id,
            host,
            loop_thread: thread::current().id(),
            clock,
            config,
            hooks: HookRegistry::default(),
            key_binds: KeyBindRegistry::default(),
            listeners: ListenerRegistry::default(),
            timers,
            deferred: DeferralQueue::new(),
            modules,
        }
    }

    pub fn on_loop_thread(&self) -> bool {
        thread::current().id() == self.loop_thread
    }

    /// The loop state, when called on the event-loop thread of a running
    /// engine.
    pub fn local(&self) -> Option<Rc<LoopState>> {
        if self.on_loop_thread() {
            event_loop::lookup(self.id)
        } else {
            None
        }
    }
}
