//! In-process reflected object model
//!
//! `MemoryHost` owns real native memory for every object, parameter buffer
//! and string it hands out, so callers exercise genuine address arithmetic
//! rather than a mock. Hooks, key binds and creation listeners are invoked
//! without any internal lock held, so callbacks may re-enter the host.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tether_core::sync::lock;
use tracing::{debug, trace};

use crate::error::HostError;
use crate::handle::{Address, FunctionHandle, HookId, KeyBindId, ListenerId, ObjectHandle};
use crate::hooks::{HookCallback, HookFrame, HookSubsystem, OutParam};
use crate::input::{InputSubsystem, Key, KeyCallback, ModifierKeys};
use crate::model::{ObjectCreatedCallback, ObjectModel};
use crate::property::{PropertyDescriptor, PropertyFlags, PropertyKind};

/// Outer path given to objects created with [`MemoryHost::spawn`].
pub const TRANSIENT_OUTER: &str = "Transient";

/// Native implementation of a reflected function.
pub type NativeBody = Arc<dyn Fn(&NativeCall<'_>) + Send + Sync>;

/// Plain scalar that can live in a reflected slot.
pub trait Scalar: Copy + Send + 'static {}

impl Scalar for i8 {}
impl Scalar for i16 {}
impl Scalar for i32 {}
impl Scalar for i64 {}
impl Scalar for u8 {}
impl Scalar for u16 {}
impl Scalar for u32 {}
impl Scalar for u64 {}
impl Scalar for usize {}
impl Scalar for f32 {}
impl Scalar for f64 {}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ObjectKind {
    Instance,
    Class,
    Function,
}

struct ObjectRecord {
    name: String,
    path: String,
    kind: ObjectKind,
    class: Option<ObjectHandle>,
    valid: bool,
    // Backing memory; the object's handle is this allocation's address.
    _storage: Box<[u64]>,
}

struct ClassRecord {
    name: String,
    super_class: Option<ObjectHandle>,
    properties: Vec<PropertyDescriptor>,
    instance_size: usize,
    functions: HashMap<String, FunctionHandle>,
}

struct FunctionRecord {
    params: Arc<[PropertyDescriptor]>,
    params_size: usize,
    body: Option<NativeBody>,
    pre: Vec<(HookId, HookCallback)>,
    post: Vec<(HookId, HookCallback)>,
}

#[derive(Default)]
struct World {
    objects: HashMap<ObjectHandle, ObjectRecord>,
    order: Vec<ObjectHandle>,
    paths: HashMap<String, ObjectHandle>,
    classes: HashMap<ObjectHandle, ClassRecord>,
    class_names: HashMap<String, ObjectHandle>,
    functions: HashMap<FunctionHandle, FunctionRecord>,
    listeners: Vec<(ListenerId, String, ObjectCreatedCallback)>,
    key_binds: Vec<(KeyBindId, Key, ModifierKeys, KeyCallback)>,
}

impl World {
    fn allocate(&mut self, name: &str, path: &str, kind: ObjectKind, class: Option<ObjectHandle>, size: usize) -> ObjectHandle {
        let words = size.div_ceil(8).max(1);
        let storage = vec![0u64; words].into_boxed_slice();
        let handle = ObjectHandle(Address(storage.as_ptr() as usize));
        self.objects.insert(
            handle,
            ObjectRecord {
                name: name.to_string(),
                path: path.to_string(),
                kind,
                class,
                valid: true,
                _storage: storage,
            },
        );
        self.order.push(handle);
        self.paths.insert(path.to_string(), handle);
        handle
    }

    fn live(&self, object: ObjectHandle) -> Option<&ObjectRecord> {
        self.objects.get(&object).filter(|record| record.valid)
    }

    fn class_by_name(&self, name: &str) -> Option<ObjectHandle> {
        self.class_names
            .get(name)
            .copied()
            .or_else(|| self.paths.get(name).copied().filter(|h| self.classes.contains_key(h)))
    }

    /// Walk a class and its ancestors.
    fn lineage(&self, class: ObjectHandle) -> impl Iterator<Item = (ObjectHandle, &ClassRecord)> {
        let mut next = Some(class);
        std::iter::from_fn(move || {
            let current = next?;
            let record = self.classes.get(&current)?;
            next = record.super_class;
            Some((current, record))
        })
    }

    fn is_a(&self, object: ObjectHandle, class_name: &str) -> bool {
        let Some(class) = self.live(object).and_then(|record| record.class) else {
            return false;
        };
        self.lineage(class)
            .any(|(handle, record)| record.name == class_name || self.objects.get(&handle).is_some_and(|o| o.path == class_name))
    }
}

/// In-memory host implementing [`ObjectModel`], [`HookSubsystem`] and
/// [`InputSubsystem`].
pub struct MemoryHost {
    world: RwLock<World>,
    strings: Mutex<HashSet<usize>>,
    next_id: AtomicU64,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            world: RwLock::new(World::default()),
            strings: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, World> {
        self.world.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, World> {
        self.world.write().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Start describing a class at `path` (e.g. `Game.MyClass`). The class
    /// name is the last path segment.
    pub fn class(&self, path: &str) -> ClassBuilder<'_> {
        ClassBuilder {
            host: self,
            path: path.to_string(),
            super_class: None,
            properties: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Construct an instance and notify creation listeners.
    pub fn spawn(&self, class_name: &str, name: &str) -> Result<ObjectHandle, HostError> {
        let (object, listeners) = {
            let mut world = self.write();
            let class = world
                .class_by_name(class_name)
                .ok_or_else(|| HostError::UnknownClass(class_name.to_string()))?;
            let path = format!("{TRANSIENT_OUTER}.{name}");
            if world.paths.contains_key(&path) {
                return Err(HostError::DuplicatePath { path });
            }
            let size = world.classes[&class].instance_size;
            let object = world.allocate(name, &path, ObjectKind::Instance, Some(class), size);

            let listeners: Vec<ObjectCreatedCallback> = world
                .listeners
                .iter()
                .filter(|(_, watched, _)| world.is_a(object, watched))
                .map(|(_, _, callback)| Arc::clone(callback))
                .collect();
            (object, listeners)
        };

        debug!("spawned {} as {}", name, object);
        for listener in listeners {
            listener(object);
        }
        Ok(object)
    }

    /// Mark an object destroyed. Its memory stays mapped so stale handles
    /// read zeros instead of freed memory.
    pub fn destroy(&self, object: ObjectHandle) -> bool {
        let mut world = self.write();
        let Some(record) = world.objects.get_mut(&object) else {
            return false;
        };
        let was_valid = std::mem::replace(&mut record.valid, false);
        let path = record.path.clone();
        world.paths.remove(&path);
        was_valid
    }

    /// Allocate a zeroed parameter buffer for `function`.
    pub fn new_params(&self, function: FunctionHandle) -> Result<ParamBlock, HostError> {
        let world = self.read();
        let record = world
            .functions
            .get(&function)
            .ok_or(HostError::InvalidFunction(function))?;
        Ok(ParamBlock {
            words: vec![0u64; record.params_size.div_ceil(8).max(1)],
            descriptors: Arc::clone(&record.params),
        })
    }

    /// Invoke with out-parameters redirected to caller-owned storage.
    pub fn invoke_with_out_params(
        &self,
        object: ObjectHandle,
        function: FunctionHandle,
        params: Address,
        out_params: &[OutParam],
    ) -> Result<(), HostError> {
        let (descriptors, body, pre, post) = {
            let world = self.read();
            if world.live(object).is_none() {
                return Err(HostError::InvalidObject(object));
            }
            let record = world
                .functions
                .get(&function)
                .ok_or(HostError::InvalidFunction(function))?;
            (
                Arc::clone(&record.params),
                record.body.clone(),
                record.pre.iter().map(|(_, cb)| Arc::clone(cb)).collect::<Vec<_>>(),
                record.post.iter().map(|(_, cb)| Arc::clone(cb)).collect::<Vec<_>>(),
            )
        };

        let return_value = descriptors
            .iter()
            .find(|desc| desc.is_return())
            .map(|desc| params.offset(desc.offset));
        let frame = HookFrame {
            context: object,
            function,
            params,
            return_value,
            out_params,
        };

        trace!("invoke {} on {} ({} pre, {} post)", function, object, pre.len(), post.len());
        for hook in &pre {
            hook(&frame);
        }
        if let Some(body) = body {
            body(&NativeCall {
                this: object,
                params,
                descriptors: &descriptors,
                out_params,
                host: self,
            });
        }
        for hook in &post {
            hook(&frame);
        }
        Ok(())
    }

    /// Fire every key-down binding registered for exactly this combination.
    /// Returns how many callbacks ran.
    pub fn press_key(&self, key: Key, modifiers: ModifierKeys) -> usize {
        let callbacks: Vec<KeyCallback> = self
            .read()
            .key_binds
            .iter()
            .filter(|(_, bound, required, _)| *bound == key && *required == modifiers)
            .map(|(_, _, _, callback)| Arc::clone(callback))
            .collect();
        for callback in &callbacks {
            callback();
        }
        callbacks.len()
    }

    pub fn hook_count(&self, function: FunctionHandle) -> usize {
        self.read()
            .functions
            .get(&function)
            .map(|record| record.pre.len() + record.post.len())
            .unwrap_or(0)
    }

    pub fn key_bind_count(&self) -> usize {
        self.read().key_binds.len()
    }

    pub fn listener_count(&self) -> usize {
        self.read().listeners.len()
    }

    /// Number of host strings currently allocated.
    pub fn live_strings(&self) -> usize {
        lock(&self.strings).len()
    }

    fn alloc_string(&self, units: &[u16]) -> usize {
        let raw = Box::into_raw(Box::new(units.to_vec())) as usize;
        lock(&self.strings).insert(raw);
        raw
    }

    fn free_string(&self, raw: usize) {
        if raw != 0 && lock(&self.strings).remove(&raw) {
            // SAFETY: `raw` came from Box::into_raw in alloc_string and was
            // still registered, so it has not been freed yet.
            drop(unsafe { Box::from_raw(raw as *mut Vec<u16>) });
        }
    }

    fn define(&self, builder: ClassBuilder<'_>) -> Result<ObjectHandle, HostError> {
        let mut world = self.write();
        if world.paths.contains_key(&builder.path) {
            return Err(HostError::DuplicatePath { path: builder.path });
        }
        let super_class = match &builder.super_class {
            Some(name) => Some(
                world
                    .class_by_name(name)
                    .ok_or_else(|| HostError::UnknownClass(name.clone()))?,
            ),
            None => None,
        };

        let name = builder.path.rsplit('.').next().unwrap_or(&builder.path).to_string();
        let (mut properties, base_size) = match super_class {
            Some(parent) => {
                let parent = &world.classes[&parent];
                (parent.properties.clone(), parent.instance_size)
            }
            None => (Vec::new(), 0),
        };
        let own: Vec<(String, PropertyKind, PropertyFlags)> = builder
            .properties
            .into_iter()
            .map(|(name, kind)| (name, kind, PropertyFlags::empty()))
            .collect();
        let (own, instance_size) = layout(&own, base_size);
        properties.extend(own);

        let class = world.allocate(&name, &builder.path, ObjectKind::Class, None, 64);
        let mut functions = HashMap::new();
        for function in builder.functions {
            let path = format!("{}.{}", builder.path, function.name);
            if world.paths.contains_key(&path) {
                return Err(HostError::DuplicatePath { path });
            }
            let (params, params_size) = layout(&function.params, 0);
            let object = world.allocate(&function.name, &path, ObjectKind::Function, Some(class), 64);
            let handle = FunctionHandle(object);
            world.functions.insert(
                handle,
                FunctionRecord {
                    params: params.into(),
                    params_size,
                    body: function.body,
                    pre: Vec::new(),
                    post: Vec::new(),
                },
            );
            functions.insert(function.name, handle);
        }

        debug!("defined class {} ({} bytes, {} functions)", builder.path, instance_size, functions.len());
        world.class_names.insert(name.clone(), class);
        world.classes.insert(
            class,
            ClassRecord {
                name,
                super_class,
                properties,
                instance_size,
                functions,
            },
        );
        Ok(class)
    }

    fn register_hook(
        &self,
        function: FunctionHandle,
        callback: HookCallback,
        post: bool,
    ) -> Result<HookId, HostError> {
        let id = HookId::new(self.next_id()).ok_or(HostError::InvalidFunction(function))?;
        let mut world = self.write();
        let record = world
            .functions
            .get_mut(&function)
            .ok_or(HostError::InvalidFunction(function))?;
        if post {
            record.post.push((id, callback));
        } else {
            record.pre.push((id, callback));
        }
        Ok(id)
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryHost {
    fn drop(&mut self) {
        let strings: Vec<usize> = lock(&self.strings).iter().copied().collect();
        for raw in strings {
            self.free_string(raw);
        }
    }
}

/// Assign offsets, aligning every slot to its own size (capped at 8).
fn layout(
    fields: &[(String, PropertyKind, PropertyFlags)],
    start: usize,
) -> (Vec<PropertyDescriptor>, usize) {
    let mut offset = start;
    let mut descriptors = Vec::with_capacity(fields.len());
    for (name, kind, flags) in fields {
        let size = kind.natural_size().unwrap_or(16);
        let align = size.min(8);
        offset = offset.next_multiple_of(align);
        descriptors.push(PropertyDescriptor::new(name.clone(), *kind, offset, size).with_flags(*flags));
        offset += size;
    }
    (descriptors, offset.next_multiple_of(8))
}

/// Describes a class before it is registered.
pub struct ClassBuilder<'h> {
    host: &'h MemoryHost,
    path: String,
    super_class: Option<String>,
    properties: Vec<(String, PropertyKind)>,
    functions: Vec<FunctionBuilder>,
}

impl<'h> ClassBuilder<'h> {
    pub fn extends(mut self, class_name: &str) -> Self {
        self.super_class = Some(class_name.to_string());
        self
    }

    pub fn property(mut self, name: &str, kind: PropertyKind) -> Self {
        self.properties.push((name.to_string(), kind));
        self
    }

    pub fn function(mut self, function: FunctionBuilder) -> Self {
        self.functions.push(function);
        self
    }

    pub fn build(self) -> Result<ObjectHandle, HostError> {
        self.host.define(self)
    }
}

/// Describes a reflected function: its parameter layout and optional body.
pub struct FunctionBuilder {
    name: String,
    params: Vec<(String, PropertyKind, PropertyFlags)>,
    body: Option<NativeBody>,
}

impl FunctionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            body: None,
        }
    }

    pub fn param(mut self, name: &str, kind: PropertyKind) -> Self {
        self.params.push((name.to_string(), kind, PropertyFlags::PARM));
        self
    }

    pub fn out_param(mut self, name: &str, kind: PropertyKind) -> Self {
        self.params.push((
            name.to_string(),
            kind,
            PropertyFlags::PARM | PropertyFlags::OUT_PARM,
        ));
        self
    }

    /// Adds the `ReturnValue` slot after every other parameter.
    pub fn returns(mut self, kind: PropertyKind) -> Self {
        self.params.push((
            "ReturnValue".to_string(),
            kind,
            PropertyFlags::PARM | PropertyFlags::OUT_PARM | PropertyFlags::RETURN_PARM,
        ));
        self
    }

    pub fn native(mut self, body: impl Fn(&NativeCall<'_>) + Send + Sync + 'static) -> Self {
        self.body = Some(Arc::new(body));
        self
    }
}

/// View of one in-flight call, handed to a [`NativeBody`].
pub struct NativeCall<'a> {
    this: ObjectHandle,
    params: Address,
    descriptors: &'a [PropertyDescriptor],
    out_params: &'a [OutParam],
    host: &'a MemoryHost,
}

impl<'a> NativeCall<'a> {
    pub fn this(&self) -> ObjectHandle {
        self.this
    }

    pub fn host(&self) -> &MemoryHost {
        self.host
    }

    fn slot<T: Scalar>(&self, name: &str) -> Option<Address> {
        let desc = self.descriptors.iter().find(|desc| desc.name == name)?;
        if std::mem::size_of::<T>() > desc.size {
            return None;
        }
        let redirected = desc
            .is_out()
            .then(|| self.out_params.iter().find(|out| out.name == name))
            .flatten()
            .map(|out| out.address);
        Some(redirected.unwrap_or(self.params.offset(desc.offset)))
    }

    pub fn get<T: Scalar>(&self, name: &str) -> Option<T> {
        let slot = self.slot::<T>(name)?;
        // SAFETY: the slot lies inside the caller's parameter buffer (or its
        // registered out storage) and is at least size_of::<T>() bytes.
        Some(unsafe { std::ptr::read_unaligned(slot.as_ptr::<T>()) })
    }

    pub fn set<T: Scalar>(&self, name: &str, value: T) -> bool {
        let Some(slot) = self.slot::<T>(name) else {
            return false;
        };
        // SAFETY: see `get`.
        unsafe { std::ptr::write_unaligned(slot.as_mut_ptr::<T>(), value) };
        true
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        let desc = self.descriptors.iter().find(|desc| desc.name == name)?;
        let units = self.host.read_string(desc.kind, self.params.offset(desc.offset))?;
        Some(String::from_utf16_lossy(&units))
    }

    pub fn set_string(&self, name: &str, value: &str) -> bool {
        let Some(desc) = self.descriptors.iter().find(|desc| desc.name == name) else {
            return false;
        };
        let units: Vec<u16> = value.encode_utf16().collect();
        self.host
            .write_string(desc.kind, self.params.offset(desc.offset), &units)
            .is_ok()
    }
}

/// Caller-owned parameter buffer laid out for one function.
pub struct ParamBlock {
    words: Vec<u64>,
    descriptors: Arc<[PropertyDescriptor]>,
}

impl ParamBlock {
    pub fn address(&self) -> Address {
        Address(self.words.as_ptr() as usize)
    }

    fn slot<T: Scalar>(&self, name: &str) -> Option<Address> {
        let desc = self.descriptors.iter().find(|desc| desc.name == name)?;
        (std::mem::size_of::<T>() <= desc.size).then(|| self.address().offset(desc.offset))
    }

    pub fn set<T: Scalar>(&mut self, name: &str, value: T) -> bool {
        let Some(slot) = self.slot::<T>(name) else {
            return false;
        };
        // SAFETY: slot is inside `words` with room for T.
        unsafe { std::ptr::write_unaligned(slot.as_mut_ptr::<T>(), value) };
        true
    }

    pub fn get<T: Scalar>(&self, name: &str) -> Option<T> {
        let slot = self.slot::<T>(name)?;
        // SAFETY: slot is inside `words` with room for T.
        Some(unsafe { std::ptr::read_unaligned(slot.as_ptr::<T>()) })
    }
}

impl ObjectModel for MemoryHost {
    fn find_first_of(&self, class_name: &str) -> Option<ObjectHandle> {
        let world = self.read();
        world
            .order
            .iter()
            .copied()
            .find(|object| world.live(*object).is_some_and(|r| r.kind == ObjectKind::Instance) && world.is_a(*object, class_name))
    }

    fn find_all_of(&self, class_name: &str) -> Vec<ObjectHandle> {
        let world = self.read();
        world
            .order
            .iter()
            .copied()
            .filter(|object| world.live(*object).is_some_and(|r| r.kind == ObjectKind::Instance) && world.is_a(*object, class_name))
            .collect()
    }

    fn find_object(&self, path: &str) -> Option<ObjectHandle> {
        let world = self.read();
        world
            .paths
            .get(path)
            .copied()
            .filter(|object| world.live(*object).is_some())
    }

    fn as_function(&self, object: ObjectHandle) -> Option<FunctionHandle> {
        let handle = FunctionHandle(object);
        self.read().functions.contains_key(&handle).then_some(handle)
    }

    fn function_of(&self, object: ObjectHandle, name: &str) -> Option<FunctionHandle> {
        let world = self.read();
        let record = world.live(object)?;
        // Class objects resolve against themselves.
        let class = match record.kind {
            ObjectKind::Class => object,
            _ => record.class?,
        };
        let function = world
            .lineage(class)
            .find_map(|(_, class)| class.functions.get(name).copied());
        function
    }

    fn name(&self, object: ObjectHandle) -> Option<String> {
        self.read().live(object).map(|record| record.name.clone())
    }

    fn full_name(&self, object: ObjectHandle) -> Option<String> {
        let world = self.read();
        let record = world.live(object)?;
        let class_name = match record.kind {
            ObjectKind::Instance => record
                .class
                .and_then(|class| world.classes.get(&class))
                .map(|class| class.name.as_str())
                .unwrap_or("Object"),
            ObjectKind::Class => "Class",
            ObjectKind::Function => "Function",
        };
        Some(format!("{} {}", class_name, record.path))
    }

    fn class_of(&self, object: ObjectHandle) -> Option<ObjectHandle> {
        let world = self.read();
        let record = world.live(object)?;
        match record.kind {
            ObjectKind::Instance => record.class,
            _ => None,
        }
    }

    fn is_a(&self, object: ObjectHandle, class_name: &str) -> bool {
        self.read().is_a(object, class_name)
    }

    fn is_valid(&self, object: ObjectHandle) -> bool {
        self.read().live(object).is_some()
    }

    fn function_params(&self, function: FunctionHandle) -> Vec<PropertyDescriptor> {
        self.read()
            .functions
            .get(&function)
            .map(|record| record.params.to_vec())
            .unwrap_or_default()
    }

    fn params_size(&self, function: FunctionHandle) -> usize {
        self.read()
            .functions
            .get(&function)
            .map(|record| record.params_size)
            .unwrap_or(0)
    }

    fn find_property(&self, object: ObjectHandle, name: &str) -> Option<PropertyDescriptor> {
        let world = self.read();
        let class = world.live(object)?.class?;
        world
            .classes
            .get(&class)?
            .properties
            .iter()
            .find(|desc| desc.name == name)
            .cloned()
    }

    fn read_string(&self, kind: PropertyKind, slot: Address) -> Option<Vec<u16>> {
        if !kind.is_string() || slot.is_null() {
            return None;
        }
        // SAFETY: callers pass the address of a pointer-sized string slot.
        let raw = unsafe { std::ptr::read_unaligned(slot.as_ptr::<usize>()) };
        if raw == 0 {
            return Some(Vec::new());
        }
        let strings = lock(&self.strings);
        if !strings.contains(&raw) {
            return None;
        }
        // SAFETY: registered pointers are live Box<Vec<u16>> allocations and
        // cannot be freed while the registry lock is held.
        Some(unsafe { (*(raw as *const Vec<u16>)).clone() })
    }

    fn write_string(&self, kind: PropertyKind, slot: Address, units: &[u16]) -> Result<(), HostError> {
        if !kind.is_string() || slot.is_null() {
            return Err(HostError::Rejected(format!("{kind:?} slot at {slot} does not hold a string")));
        }
        let fresh = self.alloc_string(units);
        // SAFETY: callers pass the address of a pointer-sized string slot.
        let old = unsafe {
            let old = std::ptr::read_unaligned(slot.as_ptr::<usize>());
            std::ptr::write_unaligned(slot.as_mut_ptr::<usize>(), fresh);
            old
        };
        self.free_string(old);
        Ok(())
    }

    fn invoke(
        &self,
        object: ObjectHandle,
        function: FunctionHandle,
        params: Address,
    ) -> Result<(), HostError> {
        self.invoke_with_out_params(object, function, params, &[])
    }

    fn destroy_params(&self, function: FunctionHandle, params: Address) {
        for desc in self.function_params(function) {
            if desc.kind.is_string() {
                let slot = params.offset(desc.offset);
                // SAFETY: the caller's buffer is laid out per function_params.
                let raw = unsafe { std::ptr::replace(slot.as_mut_ptr::<usize>(), 0) };
                self.free_string(raw);
            }
        }
    }

    fn notify_on_new_object(
        &self,
        class_name: &str,
        callback: ObjectCreatedCallback,
    ) -> Result<ListenerId, HostError> {
        let id = ListenerId::new(self.next_id())
            .ok_or_else(|| HostError::Rejected("listener id space exhausted".to_string()))?;
        let mut world = self.write();
        if world.class_by_name(class_name).is_none() {
            return Err(HostError::UnknownClass(class_name.to_string()));
        }
        world.listeners.push((id, class_name.to_string(), callback));
        Ok(id)
    }

    fn remove_object_listener(&self, id: ListenerId) -> bool {
        let mut world = self.write();
        let before = world.listeners.len();
        world.listeners.retain(|(listener, _, _)| *listener != id);
        world.listeners.len() != before
    }
}

impl HookSubsystem for MemoryHost {
    fn register_pre_hook(
        &self,
        function: FunctionHandle,
        callback: HookCallback,
    ) -> Result<HookId, HostError> {
        self.register_hook(function, callback, false)
    }

    fn register_post_hook(
        &self,
        function: FunctionHandle,
        callback: HookCallback,
    ) -> Result<HookId, HostError> {
        self.register_hook(function, callback, true)
    }

    fn unregister_hook(&self, function: FunctionHandle, id: HookId) -> bool {
        let mut world = self.write();
        let Some(record) = world.functions.get_mut(&function) else {
            return false;
        };
        let before = record.pre.len() + record.post.len();
        record.pre.retain(|(hook, _)| *hook != id);
        record.post.retain(|(hook, _)| *hook != id);
        record.pre.len() + record.post.len() != before
    }
}

impl InputSubsystem for MemoryHost {
    fn register_keydown(
        &self,
        key: Key,
        modifiers: ModifierKeys,
        callback: KeyCallback,
    ) -> Result<KeyBindId, HostError> {
        let id = KeyBindId::new(self.next_id())
            .ok_or_else(|| HostError::Rejected("key bind id space exhausted".to_string()))?;
        self.write().key_binds.push((id, key, modifiers, callback));
        Ok(id)
    }

    fn unregister_keydown(&self, id: KeyBindId) -> bool {
        let mut world = self.write();
        let before = world.key_binds.len();
        world.key_binds.retain(|(bind, _, _, _)| *bind != id);
        world.key_binds.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sample_host() -> MemoryHost {
        let host = MemoryHost::new();
        host.class("Engine.Actor")
            .property("Health", PropertyKind::Int)
            .property("Label", PropertyKind::Str)
            .build()
            .unwrap();
        host.class("Game.Pawn")
            .extends("Actor")
            .property("Speed", PropertyKind::Float)
            .function(
                FunctionBuilder::new("Add")
                    .param("A", PropertyKind::Int)
                    .param("B", PropertyKind::Int)
                    .returns(PropertyKind::Int)
                    .native(|call| {
                        let sum = call.get::<i32>("A").unwrap_or(0) + call.get::<i32>("B").unwrap_or(0);
                        call.set("ReturnValue", sum);
                    }),
            )
            .build()
            .unwrap();
        host
    }

    #[test]
    fn test_layout_aligns_and_inherits() {
        let host = sample_host();
        let pawn = host.spawn("Pawn", "Hero").unwrap();

        let health = host.find_property(pawn, "Health").unwrap();
        let label = host.find_property(pawn, "Label").unwrap();
        let speed = host.find_property(pawn, "Speed").unwrap();
        assert_eq!(health.offset, 0);
        assert_eq!(label.offset, 8);
        assert_eq!(speed.offset, 16);
    }

    #[test]
    fn test_lookup_by_class_and_path() {
        let host = sample_host();
        let hero = host.spawn("Pawn", "Hero").unwrap();
        let villain = host.spawn("Pawn", "Villain").unwrap();

        assert_eq!(host.find_first_of("Pawn"), Some(hero));
        assert_eq!(host.find_all_of("Actor"), vec![hero, villain]);
        assert_eq!(host.find_object("Transient.Villain"), Some(villain));
        assert!(host.is_a(hero, "Actor"));
        assert!(!host.is_a(hero, "Widget"));
        assert_eq!(host.full_name(hero).unwrap(), "Pawn Transient.Hero");
        assert!(host.find_function("Game.Pawn.Add").is_some());
    }

    #[test]
    fn test_invoke_runs_hooks_around_body() {
        let host = sample_host();
        let hero = host.spawn("Pawn", "Hero").unwrap();
        let add = host.function_of(hero, "Add").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let pre_seen = Arc::clone(&seen);
        host.register_pre_hook(add, Arc::new(move |frame: &HookFrame<'_>| {
            // SAFETY: return slot is an i32 inside the live buffer.
            let ret = unsafe { std::ptr::read_unaligned(frame.return_value.unwrap().as_ptr::<i32>()) };
            lock(&pre_seen).push(("pre", ret));
        }))
        .unwrap();
        let post_seen = Arc::clone(&seen);
        host.register_post_hook(add, Arc::new(move |frame: &HookFrame<'_>| {
            // SAFETY: as above.
            let ret = unsafe { std::ptr::read_unaligned(frame.return_value.unwrap().as_ptr::<i32>()) };
            lock(&post_seen).push(("post", ret));
        }))
        .unwrap();

        let mut params = host.new_params(add).unwrap();
        params.set("A", 2i32);
        params.set("B", 40i32);
        host.invoke(hero, add, params.address()).unwrap();

        assert_eq!(params.get::<i32>("ReturnValue"), Some(42));
        assert_eq!(*lock(&seen), vec![("pre", 0), ("post", 42)]);
    }

    #[test]
    fn test_unregister_hook_stops_delivery() {
        let host = sample_host();
        let hero = host.spawn("Pawn", "Hero").unwrap();
        let add = host.function_of(hero, "Add").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = host
            .register_pre_hook(add, Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        let params = host.new_params(add).unwrap();
        host.invoke(hero, add, params.address()).unwrap();
        assert!(host.unregister_hook(add, id));
        assert!(!host.unregister_hook(add, id));
        host.invoke(hero, add, params.address()).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_strings_are_owned_by_host() {
        let host = sample_host();
        let hero = host.spawn("Pawn", "Hero").unwrap();
        let label = host.find_property(hero, "Label").unwrap();
        let slot = hero.address().offset(label.offset);

        assert_eq!(host.read_string(PropertyKind::Str, slot), Some(Vec::new()));
        let units: Vec<u16> = "hero".encode_utf16().collect();
        host.write_string(PropertyKind::Str, slot, &units).unwrap();
        host.write_string(PropertyKind::Str, slot, &units).unwrap();

        assert_eq!(host.read_string(PropertyKind::Str, slot), Some(units));
        assert_eq!(host.live_strings(), 1);
        assert!(host.read_string(PropertyKind::Int, slot).is_none());
    }

    #[test]
    fn test_spawn_notifies_matching_listeners() {
        let host = sample_host();
        let created = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&created);
        let id = host
            .notify_on_new_object("Actor", Arc::new(move |object| lock(&sink).push(object)))
            .unwrap();

        let hero = host.spawn("Pawn", "Hero").unwrap();
        assert!(host.remove_object_listener(id));
        host.spawn("Pawn", "Villain").unwrap();

        assert_eq!(*lock(&created), vec![hero]);
        assert!(matches!(
            host.notify_on_new_object("Widget", Arc::new(|_| {})),
            Err(HostError::UnknownClass(_))
        ));
    }

    #[test]
    fn test_key_binds_match_exact_modifiers() {
        let host = MemoryHost::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = host
            .register_keydown(Key::F1, ModifierKeys::CONTROL, Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert_eq!(host.press_key(Key::F1, ModifierKeys::empty()), 0);
        assert_eq!(host.press_key(Key::F1, ModifierKeys::CONTROL), 1);
        assert!(host.unregister_keydown(id));
        assert_eq!(host.press_key(Key::F1, ModifierKeys::CONTROL), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroyed_objects_are_invalid() {
        let host = sample_host();
        let hero = host.spawn("Pawn", "Hero").unwrap();
        assert!(host.destroy(hero));
        assert!(!host.is_valid(hero));
        assert_eq!(host.find_first_of("Pawn"), None);
        assert!(matches!(
            host.invoke(hero, FunctionHandle(hero), Address::NULL),
            Err(HostError::InvalidObject(_))
        ));
    }
}
