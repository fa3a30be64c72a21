//! Function interception interface

use std::sync::Arc;

use crate::error::HostError;
use crate::handle::{Address, FunctionHandle, HookId, ObjectHandle};

/// Real backing storage of an out-parameter for the current call, when it
/// differs from the slot inside the parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutParam {
    pub name: String,
    pub address: Address,
}

/// Per-call context handed to hook callbacks.
#[derive(Debug, Clone, Copy)]
pub struct HookFrame<'a> {
    /// The object the function was invoked on.
    pub context: ObjectHandle,
    pub function: FunctionHandle,
    /// Base of the parameter buffer.
    pub params: Address,
    /// Address of the return value, when the function has one.
    pub return_value: Option<Address>,
    pub out_params: &'a [OutParam],
}

impl<'a> HookFrame<'a> {
    pub fn out_address(&self, name: &str) -> Option<Address> {
        self.out_params
            .iter()
            .find(|out| out.name == name)
            .map(|out| out.address)
    }
}

/// Invoked synchronously inside the intercepted call, on whatever thread
/// made the call.
pub type HookCallback = Arc<dyn Fn(&HookFrame<'_>) + Send + Sync>;

pub trait HookSubsystem: Send + Sync {
    fn register_pre_hook(
        &self,
        function: FunctionHandle,
        callback: HookCallback,
    ) -> Result<HookId, HostError>;

    fn register_post_hook(
        &self,
        function: FunctionHandle,
        callback: HookCallback,
    ) -> Result<HookId, HostError>;

    /// Detach a slot. Once this returns the callback is never invoked again
    /// by new calls.
    fn unregister_hook(&self, function: FunctionHandle, id: HookId) -> bool;
}
