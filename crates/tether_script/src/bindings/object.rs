//! Script-side wrappers for native objects
//!
//! A wrapper is a plain object whose `__address` property holds the native
//! address, sharing one prototype that carries the methods. Wrappers are
//! cheap and created on demand; two wrappers of the same object compare
//! unequal but report the same address.

use std::sync::Arc;

use rquickjs::function::IntoJsFunc;
use rquickjs::prelude::{Rest, This};
use rquickjs::{Ctx, Exception, Function, Object, Persistent, Value};
use tether_host::{ObjectHandle, ObjectModel, PropertyDescriptor};
use tracing::{debug, error};

use super::{host_call, local_state, throw};
use crate::bridge::BridgeShared;
use crate::error::BridgeError;
use crate::event_loop::LoopState;
use crate::ffi::ScriptHandle;
use crate::marshal::{
    from_script, handle_to_script, read_native, to_script, write_native, NativeValue, ParamBuffer, ADDRESS_KEY,
};

fn method<'js, F, P>(ctx: &Ctx<'js>, proto: &Object<'js>, name: &str, f: F) -> rquickjs::Result<()>
where
    F: IntoJsFunc<'js, P> + 'js,
{
    let function = Function::new(ctx.clone(), f)?.with_name(name)?;
    proto.set(name, function)
}

fn string_or_null<'js>(ctx: &Ctx<'js>, text: Option<String>) -> rquickjs::Result<Value<'js>> {
    match text {
        Some(text) => Ok(rquickjs::String::from_str(ctx.clone(), &text)?.into_value()),
        None => Ok(Value::new_null(ctx.clone())),
    }
}

/// Native object behind a wrapper.
pub(crate) fn handle_of(ctx: &Ctx<'_>, this: &Object<'_>) -> rquickjs::Result<ObjectHandle> {
    let raw: Option<f64> = this.get(ADDRESS_KEY)?;
    raw.and_then(ScriptHandle::from_number)
        .and_then(Option::<ObjectHandle>::from)
        .ok_or_else(|| Exception::throw_type(ctx, "not a native object wrapper"))
}

/// New wrapper for `object`.
pub(crate) fn wrap_object<'js>(ctx: &Ctx<'js>, local: &LoopState, object: ObjectHandle) -> rquickjs::Result<Value<'js>> {
    let wrapper = Object::new(ctx.clone())?;
    let proto = local.object_proto.borrow().clone();
    if let Some(proto) = proto {
        wrapper.set_prototype(Some(&proto.restore(ctx)?))?;
    }
    wrapper.set(ADDRESS_KEY, ScriptHandle::from(object).to_number())?;
    Ok(wrapper.into_value())
}

pub(crate) fn wrap_or_null<'js>(
    ctx: &Ctx<'js>,
    local: &LoopState,
    object: Option<ObjectHandle>,
) -> rquickjs::Result<Value<'js>> {
    match object {
        Some(object) => wrap_object(ctx, local, object),
        None => Ok(Value::new_null(ctx.clone())),
    }
}

pub(crate) fn native_to_script<'js>(ctx: &Ctx<'js>, local: &LoopState, value: &NativeValue) -> rquickjs::Result<Value<'js>> {
    to_script(ctx, value, |object| wrap_object(ctx, local, object))
}

/// Call the reflected function `name` on `object` with positional script
/// arguments, returning the converted return value (or `undefined`).
pub(crate) fn call_function<'js>(
    ctx: &Ctx<'js>,
    shared: &BridgeShared,
    local: &LoopState,
    object: ObjectHandle,
    name: &str,
    args: &[Value<'js>],
) -> rquickjs::Result<Value<'js>> {
    let model: &dyn ObjectModel = &*shared.host;
    let function = host_call(ctx, "CallFunction", || model.function_of(object, name))?
        .ok_or_else(|| throw(ctx, BridgeError::FunctionNotFound(format!("{object}.{name}"))))?;

    let params = host_call(ctx, "CallFunction", || model.function_params(function))?;
    let inputs: Vec<&PropertyDescriptor> = params.iter().filter(|desc| !desc.is_return()).collect();
    if args.len() > inputs.len() {
        return Err(Exception::throw_type(
            ctx,
            &format!("'{name}' takes at most {} arguments, got {}", inputs.len(), args.len()),
        ));
    }

    let size = host_call(ctx, "CallFunction", || model.params_size(function))?;
    let buffer = ParamBuffer::zeroed(size);
    let outcome = (|| -> rquickjs::Result<Value<'js>> {
        for (desc, arg) in inputs.iter().zip(args) {
            let value = from_script(arg, desc).map_err(|err| throw(ctx, err.into()))?;
            // SAFETY: the buffer is sized for the function's parameters and
            // `desc.offset` comes from the same layout.
            unsafe { write_native(model, desc, buffer.address().offset(desc.offset), &value) }
                .map_err(|err| throw(ctx, err.into()))?;
        }

        if let Err(err) = host_call(ctx, name, || model.invoke(object, function, buffer.address()))? {
            error!(target: "script", "calling '{}' on {} failed: {}", name, object, err);
            return Err(Exception::throw_internal(ctx, &format!("calling '{name}' failed: {err}")));
        }

        match params.iter().find(|desc| desc.is_return()) {
            Some(ret) => {
                // SAFETY: as above; the host wrote the return slot.
                let value = unsafe { read_native(model, ret, buffer.address().offset(ret.offset)) };
                native_to_script(ctx, local, &value)
            }
            None => Ok(Value::new_undefined(ctx.clone())),
        }
    })();

    // Runs even when marshaling failed halfway, so partially written host
    // strings are released.
    let destroyed = host_call(ctx, "CallFunction", || model.destroy_params(function, buffer.address()));
    let value = outcome?;
    destroyed?;
    Ok(value)
}

/// Build the wrapper prototype and keep it on the loop state.
pub(crate) fn install_prototype<'js>(ctx: &Ctx<'js>, shared: &Arc<BridgeShared>, local: &LoopState) -> rquickjs::Result<()> {
    let proto = Object::new(ctx.clone())?;

    {
        let shared = Arc::clone(shared);
        method(ctx, &proto, "GetName", move |ctx: Ctx<'js>, this: This<Object<'js>>| -> rquickjs::Result<Value<'js>> {
            let object = handle_of(&ctx, &this.0)?;
            let name = host_call(&ctx, "GetName", || shared.host.name(object))?;
            string_or_null(&ctx, name)
        })?;
    }

    {
        let shared = Arc::clone(shared);
        method(ctx, &proto, "GetFullName", move |ctx: Ctx<'js>, this: This<Object<'js>>| -> rquickjs::Result<Value<'js>> {
            let object = handle_of(&ctx, &this.0)?;
            let name = host_call(&ctx, "GetFullName", || shared.host.full_name(object))?;
            string_or_null(&ctx, name)
        })?;
    }

    {
        let shared = Arc::clone(shared);
        method(ctx, &proto, "toString", move |ctx: Ctx<'js>, this: This<Object<'js>>| -> rquickjs::Result<String> {
            let object = handle_of(&ctx, &this.0)?;
            let name = host_call(&ctx, "toString", || shared.host.full_name(object))?;
            Ok(name.unwrap_or_else(|| format!("[invalid {object}]")))
        })?;
    }

    {
        let shared = Arc::clone(shared);
        method(ctx, &proto, "GetClass", move |ctx: Ctx<'js>, this: This<Object<'js>>| -> rquickjs::Result<Value<'js>> {
            let local = local_state(&ctx, &shared)?;
            let object = handle_of(&ctx, &this.0)?;
            let class = host_call(&ctx, "GetClass", || shared.host.class_of(object))?;
            wrap_or_null(&ctx, &local, class)
        })?;
    }

    {
        let shared = Arc::clone(shared);
        method(
            ctx,
            &proto,
            "IsA",
            move |ctx: Ctx<'js>, this: This<Object<'js>>, class_name: String| -> rquickjs::Result<bool> {
                let object = handle_of(&ctx, &this.0)?;
                host_call(&ctx, "IsA", || shared.host.is_a(object, &class_name))
            },
        )?;
    }

    method(ctx, &proto, "GetAddress", |ctx: Ctx<'js>, this: This<Object<'js>>| -> rquickjs::Result<Value<'js>> {
        let object = handle_of(&ctx, &this.0)?;
        Ok(handle_to_script(&ctx, ScriptHandle::from(object)))
    })?;

    {
        let shared = Arc::clone(shared);
        method(ctx, &proto, "IsValid", move |ctx: Ctx<'js>, this: This<Object<'js>>| -> rquickjs::Result<bool> {
            let object = handle_of(&ctx, &this.0)?;
            host_call(&ctx, "IsValid", || shared.host.is_valid(object))
        })?;
    }

    {
        let shared = Arc::clone(shared);
        method(
            ctx,
            &proto,
            "GetPropertyValue",
            move |ctx: Ctx<'js>, this: This<Object<'js>>, name: String| -> rquickjs::Result<Value<'js>> {
                let local = local_state(&ctx, &shared)?;
                let object = handle_of(&ctx, &this.0)?;
                let model: &dyn ObjectModel = &*shared.host;
                let value = host_call(&ctx, "GetPropertyValue", || -> Option<NativeValue> {
                    if !model.is_valid(object) {
                        return None;
                    }
                    let desc = model.find_property(object, &name)?;
                    // SAFETY: a valid object owns storage covering its
                    // class's property layout.
                    Some(unsafe { read_native(model, &desc, object.address().offset(desc.offset)) })
                })?;
                match value {
                    Some(value) => native_to_script(&ctx, &local, &value),
                    None => {
                        debug!(target: "script", "no property '{}' on {}", name, object);
                        Ok(Value::new_null(ctx.clone()))
                    }
                }
            },
        )?;
    }

    {
        let shared = Arc::clone(shared);
        method(
            ctx,
            &proto,
            "SetPropertyValue",
            move |ctx: Ctx<'js>, this: This<Object<'js>>, name: String, value: Value<'js>| -> rquickjs::Result<bool> {
                let object = handle_of(&ctx, &this.0)?;
                let model: &dyn ObjectModel = &*shared.host;
                let desc = host_call(&ctx, "SetPropertyValue", || {
                    if model.is_valid(object) {
                        model.find_property(object, &name)
                    } else {
                        None
                    }
                })?;
                let Some(desc) = desc else {
                    return Ok(false);
                };
                let native = from_script(&value, &desc).map_err(|err| throw(&ctx, err.into()))?;
                host_call(&ctx, "SetPropertyValue", || {
                    // SAFETY: as for GetPropertyValue.
                    unsafe { write_native(model, &desc, object.address().offset(desc.offset), &native) }
                })?
                .map_err(|err| throw(&ctx, err.into()))?;
                Ok(true)
            },
        )?;
    }

    {
        let shared = Arc::clone(shared);
        method(
            ctx,
            &proto,
            "CallFunction",
            move |ctx: Ctx<'js>, this: This<Object<'js>>, name: String, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                let local = local_state(&ctx, &shared)?;
                let object = handle_of(&ctx, &this.0)?;
                call_function(&ctx, &shared, &local, object, &name, &args.0)
            },
        )?;
    }

    *local.object_proto.borrow_mut() = Some(Persistent::save(ctx, proto));
    Ok(())
}
