//! Engine lifecycle
//!
//! One [`ScriptEngine`] owns one QuickJS runtime and its root context. It
//! must be driven from the thread that created it; the engine is `!Send`,
//! so the compiler keeps `tick` and friends on the event-loop thread.

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use rquickjs::Module;
use tether_core::time::{Clock, MonotonicClock};
use tether_host::Host;
use tracing::{debug, error, info, warn};

use crate::bindings;
use crate::bridge::BridgeShared;
use crate::config::ScriptConfig;
use crate::deferred::DeferredCall;
use crate::error::BridgeError;
use crate::event_loop::{self, EngineId, LoopState};
use crate::modules::{normalize, FileLoader, ModuleCache, PathResolver};
use crate::runtime::{describe_error, drain_jobs, log_error, ScriptRuntime};
use crate::{hooks, keybinds, notify};

/// Outcome of [`ScriptEngine::load`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadReport {
    /// Mods whose entry module ran.
    pub loaded: Vec<String>,
    /// Mods without an entry module.
    pub skipped: Vec<String>,
    /// Mods whose entry module failed, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Work done by one [`ScriptEngine::tick`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub deferred: usize,
    pub timers_fired: usize,
    pub jobs: usize,
}

enum EngineState {
    Uninitialized,
    Running {
        shared: Arc<BridgeShared>,
        local: Rc<LoopState>,
    },
    /// Runtime or context allocation failed; stays failed for the session.
    Failed,
}

pub struct ScriptEngine {
    host: Arc<dyn Host>,
    clock: Arc<dyn Clock>,
    config: ScriptConfig,
    mods_dir: PathBuf,
    state: EngineState,
}

impl ScriptEngine {
    pub fn new(host: Arc<dyn Host>, mods_dir: impl Into<PathBuf>, config: ScriptConfig) -> Self {
        Self {
            host,
            clock: Arc::new(MonotonicClock::new()),
            config,
            mods_dir: mods_dir.into(),
            state: EngineState::Uninitialized,
        }
    }

    /// Replace the timer clock. Takes effect at the next `init`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    pub fn mods_dir(&self) -> &Path {
        &self.mods_dir
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, EngineState::Running { .. })
    }

    pub fn id(&self) -> Option<EngineId> {
        self.running().ok().map(|(shared, _)| shared.id)
    }

    fn running(&self) -> Result<(&Arc<BridgeShared>, &Rc<LoopState>), BridgeError> {
        match &self.state {
            EngineState::Running { shared, local } => Ok((shared, local)),
            EngineState::Failed => Err(BridgeError::InitFailed),
            EngineState::Uninitialized => Err(BridgeError::NotInitialized),
        }
    }

    /// Create the runtime and root context, install the module loader and
    /// the script globals.
    pub fn init(&mut self) -> Result<(), BridgeError> {
        match self.state {
            EngineState::Running { .. } => {
                warn!("script engine already initialized");
                return Ok(());
            }
            EngineState::Failed => return Err(BridgeError::InitFailed),
            EngineState::Uninitialized => {}
        }

        let runtime = match ScriptRuntime::new(&self.config) {
            Ok(runtime) => runtime,
            Err(err) => {
                error!("failed to create script runtime: {}", err);
                self.state = EngineState::Failed;
                return Err(err);
            }
        };

        let modules = ModuleCache::default();
        runtime.runtime().set_loader(
            PathResolver::new(&self.config.module_extension),
            FileLoader::new(modules.clone()),
        );

        let id = EngineId::next();
        let shared = Arc::new(BridgeShared::new(
            id,
            Arc::clone(&self.host),
            Arc::clone(&self.clock),
            self.config.clone(),
            modules,
        ));
        let local = Rc::new(LoopState::new(runtime));
        event_loop::attach(id, Rc::clone(&local));

        let installed = event_loop::enter(id, &local, |ctx| {
            bindings::install(ctx, &shared, &local).map_err(|err| BridgeError::Script(describe_error(ctx, &err)))
        });
        if let Err(err) = installed {
            error!("failed to install script globals: {}", err);
            event_loop::detach(id);
            local.release_all();
            self.state = EngineState::Failed;
            return Err(err);
        }

        info!("script engine {} initialized", id);
        self.state = EngineState::Running { shared, local };
        Ok(())
    }

    /// Execute every mod's entry module, in mod-name order.
    pub fn load(&mut self) -> Result<LoadReport, BridgeError> {
        self.running()?;

        let mut report = LoadReport::default();
        for (name, entry) in discover_entry_points(&self.mods_dir, &self.config)? {
            if !entry.is_file() {
                debug!("mod '{}' has no {}", name, entry.display());
                report.skipped.push(name);
                continue;
            }
            match self.execute_module(&entry) {
                Ok(_) => {
                    info!("loaded mod '{}'", name);
                    report.loaded.push(name);
                }
                Err(err) => {
                    error!("mod '{}' failed: {}", name, err);
                    report.failed.push((name, err.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Evaluate `source` as a global script named `name`.
    pub fn execute(&self, source: &str, name: &str) -> Result<(), BridgeError> {
        let (shared, local) = self.running()?;
        debug!("executing script '{}'", name);
        event_loop::enter(shared.id, local, |ctx| {
            ctx.eval::<(), _>(source)
                .map_err(|err| BridgeError::Script(format!("{name}: {}", describe_error(ctx, &err))))
        })
    }

    /// Evaluate `source` and render the result as a string.
    pub fn evaluate(&self, source: &str) -> Result<String, BridgeError> {
        let (shared, local) = self.running()?;
        event_loop::enter(shared.id, local, |ctx| {
            ctx.eval::<rquickjs::convert::Coerced<String>, _>(source)
                .map(|coerced| coerced.0)
                .map_err(|err| BridgeError::Script(describe_error(ctx, &err)))
        })
    }

    /// Evaluate a file as a module. Returns `false` when the module was
    /// already compiled this session.
    pub fn execute_module(&self, path: &Path) -> Result<bool, BridgeError> {
        let (shared, local) = self.running()?;

        let absolute = std::path::absolute(path).map_err(|source| BridgeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = normalize(&absolute).to_string_lossy().replace('\\', "/");
        if shared.modules.contains(&name) {
            debug!("module '{}' already loaded", name);
            return Ok(false);
        }
        let source = fs::read_to_string(&absolute).map_err(|source| BridgeError::Io {
            path: absolute.clone(),
            source,
        })?;

        event_loop::enter(shared.id, local, |ctx| {
            let evaluated = (|| -> rquickjs::Result<()> {
                let module = Module::declare(ctx.clone(), name.as_str(), source)?;
                shared.modules.record(&name);
                let (_, promise) = module.eval()?;
                match promise.finish::<()>() {
                    Err(rquickjs::Error::WouldBlock) => {
                        debug!("module '{}' is still awaiting", name);
                        Ok(())
                    }
                    other => other,
                }
            })();
            evaluated.map_err(|err| BridgeError::Script(describe_error(ctx, &err)))
        })?;
        Ok(true)
    }

    /// Replay deferred calls, fire due timers, then run pending jobs.
    pub fn tick(&self) -> Result<TickReport, BridgeError> {
        let (shared, local) = self.running()?;
        let now = shared.clock.now();

        let report = event_loop::enter(shared.id, local, |ctx| {
            let mut report = TickReport::default();

            for call in shared.deferred.drain() {
                report.deferred += 1;
                replay(shared, local, call);
            }

            let pump = shared.timers.pump(now, |timer, callback| {
                let callback = local.callbacks.borrow().get(callback);
                let Some(callback) = callback else {
                    return;
                };
                let called = callback.restore(ctx).and_then(|function| function.call::<_, ()>(()));
                if let Err(err) = called {
                    log_error(ctx, &format!("timer {} failed", timer.get()), &err);
                }
            });
            report.timers_fired = pump.fired;
            {
                let mut store = local.callbacks.borrow_mut();
                for callback in pump.released {
                    store.release(callback);
                }
            }

            report.jobs = drain_jobs(ctx, shared.config.max_jobs_per_tick);
            report
        });
        Ok(report)
    }

    /// Release every registration, then the context and the runtime.
    /// Safe to call repeatedly and before `init`.
    pub fn shutdown(&mut self) {
        let EngineState::Running { shared, local } = std::mem::replace(&mut self.state, EngineState::Uninitialized)
        else {
            return;
        };

        for registration in shared.hooks.take_all() {
            hooks::detach(&shared, &registration);
            hooks::release(&local, &registration);
        }

        let timers = shared.timers.take_all();
        {
            let mut store = local.callbacks.borrow_mut();
            for callback in timers {
                store.release(callback);
            }
        }

        for registration in shared.key_binds.take_all() {
            keybinds::detach(&shared, &registration);
            local.callbacks.borrow_mut().release(registration.callback);
        }

        for registration in shared.listeners.take_all() {
            notify::detach(&shared, &registration);
            local.callbacks.borrow_mut().release(registration.callback);
        }

        let dropped = shared.deferred.drain().len();
        if dropped > 0 {
            debug!("dropping {} deferred calls", dropped);
        }

        event_loop::detach(shared.id);
        local.release_all();
        match Rc::try_unwrap(local) {
            Ok(state) => drop(state),
            Err(_) => warn!("script context still referenced at shutdown"),
        }
        shared.modules.clear();
        info!("script engine {} shut down", shared.id);
    }

    pub fn hook_count(&self) -> usize {
        self.running().map_or(0, |(shared, _)| shared.hooks.len())
    }

    pub fn key_bind_count(&self) -> usize {
        self.running().map_or(0, |(shared, _)| shared.key_binds.len())
    }

    pub fn listener_count(&self) -> usize {
        self.running().map_or(0, |(shared, _)| shared.listeners.len())
    }

    pub fn active_timers(&self) -> usize {
        self.running().map_or(0, |(shared, _)| shared.timers.active())
    }

    pub fn pending_deferred(&self) -> usize {
        self.running().map_or(0, |(shared, _)| shared.deferred.len())
    }

    /// Callbacks currently retained for hooks, timers, key binds and listeners.
    pub fn retained_callbacks(&self) -> usize {
        self.running().map_or(0, |(_, local)| local.callbacks.borrow().len())
    }

    pub fn module_cache(&self) -> Option<ModuleCache> {
        self.running().ok().map(|(shared, _)| shared.modules.clone())
    }
}

impl Drop for ScriptEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn replay(shared: &BridgeShared, local: &LoopState, call: DeferredCall) {
    let ran = match call {
        DeferredCall::Hook {
            registration,
            side,
            context,
            params,
        } => hooks::fire(shared, local, registration, side, context, &params, None),
        DeferredCall::KeyBind { registration } => keybinds::fire(shared, local, registration),
        DeferredCall::ObjectCreated { registration, object } => notify::fire(shared, local, registration, object),
    };
    if !ran {
        debug!("deferred call skipped; its registration is gone or busy");
    }
}

/// `(mod name, entry path)` for every directory under `mods_dir`, sorted by
/// name. A missing mods directory yields nothing.
pub fn discover_entry_points(mods_dir: &Path, config: &ScriptConfig) -> Result<Vec<(String, PathBuf)>, BridgeError> {
    let entries = match fs::read_dir(mods_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!("mods directory {} does not exist", mods_dir.display());
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(BridgeError::Io {
                path: mods_dir.to_path_buf(),
                source,
            })
        }
    };

    let mut mods = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| BridgeError::Io {
            path: mods_dir.to_path_buf(),
            source,
        })?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let script = entry.path().join(&config.scripts_dir).join(&config.entry_point);
        mods.push((name, script));
    }
    mods.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(mods)
}
