//! Reflected object model interface

use std::sync::Arc;

use crate::error::HostError;
use crate::handle::{Address, FunctionHandle, ListenerId, ObjectHandle};
use crate::property::{PropertyDescriptor, PropertyKind};

/// Invoked by the host after an object of a watched class is constructed.
/// May run on any host thread.
pub type ObjectCreatedCallback = Arc<dyn Fn(ObjectHandle) + Send + Sync>;

/// Lookup, metadata and invocation over the host's reflected object graph.
///
/// All methods may be called from any thread; implementations synchronize
/// internally.
pub trait ObjectModel: Send + Sync {
    /// First live object whose class is, or derives from, `class_name`.
    fn find_first_of(&self, class_name: &str) -> Option<ObjectHandle>;

    /// Every live object whose class is, or derives from, `class_name`.
    fn find_all_of(&self, class_name: &str) -> Vec<ObjectHandle>;

    /// Object by full path (e.g. `Game.MyClass` or `Game.MyClass.ExampleFunc`).
    fn find_object(&self, path: &str) -> Option<ObjectHandle>;

    /// Function by full path.
    fn find_function(&self, path: &str) -> Option<FunctionHandle> {
        self.find_object(path).and_then(|object| self.as_function(object))
    }

    /// The object viewed as a function, if it is one.
    fn as_function(&self, object: ObjectHandle) -> Option<FunctionHandle>;

    /// Function `name` as seen from `object`'s class hierarchy.
    fn function_of(&self, object: ObjectHandle, name: &str) -> Option<FunctionHandle>;

    fn name(&self, object: ObjectHandle) -> Option<String>;

    fn full_name(&self, object: ObjectHandle) -> Option<String>;

    fn class_of(&self, object: ObjectHandle) -> Option<ObjectHandle>;

    fn is_a(&self, object: ObjectHandle, class_name: &str) -> bool;

    fn is_valid(&self, object: ObjectHandle) -> bool;

    /// Parameter descriptors in declaration order, return slot included.
    fn function_params(&self, function: FunctionHandle) -> Vec<PropertyDescriptor>;

    /// Size in bytes of the parameter buffer `function` expects.
    fn params_size(&self, function: FunctionHandle) -> usize;

    fn find_property(&self, object: ObjectHandle, name: &str) -> Option<PropertyDescriptor>;

    /// Read the host string stored in the slot at `slot`.
    ///
    /// Returns `None` if the slot does not hold a valid host string.
    fn read_string(&self, kind: PropertyKind, slot: Address) -> Option<Vec<u16>>;

    /// Replace the host string stored in the slot at `slot`.
    fn write_string(&self, kind: PropertyKind, slot: Address, units: &[u16]) -> Result<(), HostError>;

    /// Call `function` on `object` with a parameter buffer laid out per
    /// [`ObjectModel::function_params`]. Registered hooks fire around the call.
    fn invoke(
        &self,
        object: ObjectHandle,
        function: FunctionHandle,
        params: Address,
    ) -> Result<(), HostError>;

    /// Release anything the host allocated inside a parameter buffer
    /// (strings, containers). The buffer memory itself belongs to the caller.
    fn destroy_params(&self, function: FunctionHandle, params: Address);

    fn notify_on_new_object(
        &self,
        class_name: &str,
        callback: ObjectCreatedCallback,
    ) -> Result<ListenerId, HostError>;

    fn remove_object_listener(&self, id: ListenerId) -> bool;
}
