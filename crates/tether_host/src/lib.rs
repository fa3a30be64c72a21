//! Tether Host Interfaces
//!
//! The narrow surface the scripting bridge consumes from the embedding
//! application:
//! - [`ObjectModel`]: reflected object lookup, metadata, property layout, calls
//! - [`HookSubsystem`]: pre/post interception of reflected functions
//! - [`InputSubsystem`]: key-down notifications
//! - [`UserMod`]: the mod lifecycle contract driving the bridge
//!
//! [`memory::MemoryHost`] implements all of them in-process for the runtime
//! demo and the test suites.

pub mod error;
pub mod handle;
pub mod hooks;
pub mod input;
pub mod lifecycle;
pub mod memory;
pub mod model;
pub mod property;

pub use error::HostError;
pub use handle::{Address, FunctionHandle, HookId, KeyBindId, ListenerId, ObjectHandle};
pub use hooks::{HookCallback, HookFrame, HookSubsystem, OutParam};
pub use input::{InputSubsystem, Key, KeyCallback, ModifierKeys};
pub use lifecycle::UserMod;
pub use model::{ObjectCreatedCallback, ObjectModel};
pub use property::{PropertyDescriptor, PropertyFlags, PropertyKind};

/// Everything the bridge needs from a host, behind one object.
pub trait Host: ObjectModel + HookSubsystem + InputSubsystem {}

impl<T> Host for T where T: ObjectModel + HookSubsystem + InputSubsystem {}
