//! Tether Scripting Bridge
//!
//! Embeds QuickJS and connects it to a host's reflected object model:
//! - [`engine`]: lifecycle (init, load, tick, shutdown)
//! - [`modules`]: ES module resolution and the compiled-module cache
//! - [`hooks`]: script callbacks around reflected functions
//! - [`deferred`]: hand-off of host-thread events to the event loop
//! - [`timers`]: `setTimeout` / `setInterval`
//! - [`marshal`]: native slots to script values and back
//!
//! Scripts see the host through the globals installed by `bindings`
//! (`FindFirstOf`, `RegisterHook`, `CallFunction`, ...).

mod bindings;
mod bridge;
pub mod callbacks;
pub mod config;
pub mod deferred;
pub mod engine;
pub mod error;
pub mod event_loop;
pub mod ffi;
pub mod hooks;
pub mod keybinds;
pub mod marshal;
pub mod mod_entry;
pub mod modules;
pub mod notify;
pub mod runtime;
pub mod timers;

pub use config::ScriptConfig;
pub use engine::{LoadReport, ScriptEngine, TickReport};
pub use error::BridgeError;
pub use mod_entry::ScriptMod;

pub use rquickjs;
