//! The bridge as a host mod

use std::path::PathBuf;
use std::sync::Arc;

use tether_host::{Host, UserMod};
use tracing::{error, info, warn};

use crate::config::ScriptConfig;
use crate::engine::{LoadReport, ScriptEngine};
use crate::error::BridgeError;

/// Drives a [`ScriptEngine`] from the host's mod lifecycle.
pub struct ScriptMod {
    name: String,
    engine: ScriptEngine,
    last_load: Option<LoadReport>,
}

impl ScriptMod {
    pub fn new(host: Arc<dyn Host>, mods_dir: impl Into<PathBuf>, config: ScriptConfig) -> Self {
        Self::with_engine(ScriptEngine::new(host, mods_dir, config))
    }

    pub fn with_engine(engine: ScriptEngine) -> Self {
        Self {
            name: "TetherScript".to_string(),
            engine,
            last_load: None,
        }
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ScriptEngine {
        &mut self.engine
    }

    /// Report of the last `on_unreal_init` load.
    pub fn last_load(&self) -> Option<&LoadReport> {
        self.last_load.as_ref()
    }
}

impl UserMod for ScriptMod {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_program_start(&mut self) {
        info!("{} starting, mods from {}", self.name, self.engine.mods_dir().display());
    }

    fn on_unreal_init(&mut self) {
        if let Err(err) = self.engine.init() {
            error!("{}: engine init failed: {}", self.name, err);
            return;
        }
        match self.engine.load() {
            Ok(report) => {
                info!(
                    "{}: {} mods loaded, {} skipped, {} failed",
                    self.name,
                    report.loaded.len(),
                    report.skipped.len(),
                    report.failed.len()
                );
                self.last_load = Some(report);
            }
            Err(err) => error!("{}: loading mods failed: {}", self.name, err),
        }
    }

    fn on_update(&mut self) {
        match self.engine.tick() {
            Ok(_) | Err(BridgeError::NotInitialized) | Err(BridgeError::InitFailed) => {}
            Err(err) => warn!("{}: tick failed: {}", self.name, err),
        }
    }
}
