//! Global functions and constant tables

use std::sync::Arc;

use rquickjs::convert::Coerced;
use rquickjs::function::IntoJsFunc;
use rquickjs::prelude::{Opt, Rest};
use rquickjs::{Array, Ctx, Exception, Function, Object, Value};
use tether_host::{Key, ModifierKeys, ObjectHandle};
use tracing::{debug, error, info, warn, Level};

use super::object::{call_function, wrap_object, wrap_or_null};
use super::{host_call, local_state, throw};
use crate::bridge::BridgeShared;
use crate::error::BridgeError;
use crate::ffi::ScriptHandle;
use crate::marshal::address_of;
use crate::timers::TimerId;
use crate::{hooks, keybinds, notify};

fn global<'js, F, P>(ctx: &Ctx<'js>, target: &Object<'js>, name: &str, f: F) -> rquickjs::Result<()>
where
    F: IntoJsFunc<'js, P> + 'js,
{
    let function = Function::new(ctx.clone(), f)?.with_name(name)?;
    target.set(name, function)
}

fn join_args(args: &[Value<'_>]) -> String {
    args.iter()
        .map(|value| match value.get::<Coerced<String>>() {
            Ok(Coerced(text)) => text,
            Err(_) => format!("<{}>", value.type_name()),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_at(level: Level, text: &str) {
    if level == Level::ERROR {
        error!(target: "script", "{}", text);
    } else if level == Level::WARN {
        warn!(target: "script", "{}", text);
    } else if level == Level::INFO {
        info!(target: "script", "{}", text);
    } else {
        debug!(target: "script", "{}", text);
    }
}

fn is_nothing(value: &Value<'_>) -> bool {
    value.is_undefined() || value.is_null()
}

/// `undefined`/`null` mean "no callback"; anything else must be a function.
fn optional_callback<'js>(ctx: &Ctx<'js>, value: Option<Value<'js>>, what: &str) -> rquickjs::Result<Option<Function<'js>>> {
    match value {
        None => Ok(None),
        Some(value) if is_nothing(&value) => Ok(None),
        Some(value) => value
            .into_function()
            .map(Some)
            .ok_or_else(|| Exception::throw_type(ctx, &format!("{what} callback must be a function"))),
    }
}

/// Hook id argument; absent means zero.
fn hook_id(ctx: &Ctx<'_>, value: Option<&Value<'_>>) -> rquickjs::Result<u64> {
    match value {
        None => Ok(0),
        Some(value) if is_nothing(value) => Ok(0),
        Some(value) => value
            .as_number()
            .and_then(ScriptHandle::from_number)
            .map(|handle| handle.0)
            .ok_or_else(|| Exception::throw_type(ctx, "hook ids must be non-negative integers")),
    }
}

fn parse_key(ctx: &Ctx<'_>, value: &Value<'_>) -> rquickjs::Result<Key> {
    if let Some(number) = value.as_number() {
        if number.fract() == 0.0 && (0.0..=255.0).contains(&number) {
            return Ok(Key(number as u8));
        }
    } else if let Some(name) = value.as_string() {
        let name = name.to_string()?;
        return Key::from_name(&name).ok_or_else(|| Exception::throw_type(ctx, &format!("unknown key '{name}'")));
    }
    Err(Exception::throw_type(ctx, "key must be a key code or key name"))
}

fn parse_modifiers(ctx: &Ctx<'_>, value: &Value<'_>) -> rquickjs::Result<ModifierKeys> {
    let bits = |number: f64| -> rquickjs::Result<ModifierKeys> {
        let exact = number.fract() == 0.0 && (0.0..=255.0).contains(&number);
        exact
            .then(|| ModifierKeys::from_bits(number as u8))
            .flatten()
            .ok_or_else(|| Exception::throw_type(ctx, &format!("invalid modifier {number}")))
    };

    if let Some(number) = value.as_number() {
        return bits(number);
    }
    if let Some(array) = value.as_array() {
        let mut modifiers = ModifierKeys::empty();
        for item in array.iter::<Value>() {
            let number = item?
                .as_number()
                .ok_or_else(|| Exception::throw_type(ctx, "modifiers must be numbers"))?;
            modifiers |= bits(number)?;
        }
        return Ok(modifiers);
    }
    Err(Exception::throw_type(ctx, "modifiers must be a number or an array of numbers"))
}

fn install_logging<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    global(ctx, &globals, "print", |args: Rest<Value<'js>>| {
        log_at(Level::INFO, &join_args(&args.0));
    })?;

    let console = Object::new(ctx.clone())?;
    let levels = [
        ("log", Level::INFO),
        ("info", Level::INFO),
        ("warn", Level::WARN),
        ("error", Level::ERROR),
        ("debug", Level::DEBUG),
    ];
    for (name, level) in levels {
        global(ctx, &console, name, move |args: Rest<Value<'js>>| {
            log_at(level, &join_args(&args.0));
        })?;
    }
    globals.set("console", console)
}

fn install_lookups<'js>(ctx: &Ctx<'js>, shared: &Arc<BridgeShared>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    {
        let shared = Arc::clone(shared);
        global(ctx, &globals, "FindFirstOf", move |ctx: Ctx<'js>, class_name: String| -> rquickjs::Result<Value<'js>> {
            let local = local_state(&ctx, &shared)?;
            let found = host_call(&ctx, "FindFirstOf", || shared.host.find_first_of(&class_name))?;
            wrap_or_null(&ctx, &local, found)
        })?;
    }

    {
        let shared = Arc::clone(shared);
        global(ctx, &globals, "FindAllOf", move |ctx: Ctx<'js>, class_name: String| -> rquickjs::Result<Value<'js>> {
            let local = local_state(&ctx, &shared)?;
            let found = host_call(&ctx, "FindAllOf", || shared.host.find_all_of(&class_name))?;
            if found.is_empty() {
                return Ok(Value::new_null(ctx.clone()));
            }
            let array = Array::new(ctx.clone())?;
            for (index, object) in found.into_iter().enumerate() {
                array.set(index, wrap_object(&ctx, &local, object)?)?;
            }
            Ok(array.into_value())
        })?;
    }

    {
        let shared = Arc::clone(shared);
        global(ctx, &globals, "StaticFindObject", move |ctx: Ctx<'js>, path: String| -> rquickjs::Result<Value<'js>> {
            let local = local_state(&ctx, &shared)?;
            let found = host_call(&ctx, "StaticFindObject", || shared.host.find_object(&path))?;
            wrap_or_null(&ctx, &local, found)
        })?;
    }

    {
        let shared = Arc::clone(shared);
        global(
            ctx,
            &globals,
            "CallFunction",
            move |ctx: Ctx<'js>, target: Value<'js>, name: String, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                let local = local_state(&ctx, &shared)?;
                let object = address_of(&target)
                    .flatten()
                    .and_then(|address| ObjectHandle::from_address(address.0))
                    .ok_or_else(|| Exception::throw_type(&ctx, "CallFunction expects an object"))?;
                call_function(&ctx, &shared, &local, object, &name, &args.0)
            },
        )?;
    }

    Ok(())
}

fn install_hooks<'js>(ctx: &Ctx<'js>, shared: &Arc<BridgeShared>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    {
        let shared = Arc::clone(shared);
        global(
            ctx,
            &globals,
            "RegisterHook",
            move |ctx: Ctx<'js>, path: String, pre: Opt<Value<'js>>, post: Opt<Value<'js>>| -> rquickjs::Result<Vec<f64>> {
                let local = local_state(&ctx, &shared)?;
                let function = host_call(&ctx, "RegisterHook", || shared.host.find_function(&path))?
                    .ok_or_else(|| throw(&ctx, BridgeError::FunctionNotFound(path.clone())))?;
                let pre = optional_callback(&ctx, pre.0, "pre")?;
                let post = optional_callback(&ctx, post.0, "post")?;
                let (pre_id, post_id) =
                    hooks::register(&shared, &local, &ctx, function, pre, post).map_err(|err| throw(&ctx, err))?;
                Ok(vec![pre_id as f64, post_id as f64])
            },
        )?;
    }

    {
        let shared = Arc::clone(shared);
        global(
            ctx,
            &globals,
            "RegisterFunctionHook",
            move |ctx: Ctx<'js>, target: Value<'js>, pre: Opt<Value<'js>>, post: Opt<Value<'js>>| -> rquickjs::Result<Vec<f64>> {
                let local = local_state(&ctx, &shared)?;
                let object = address_of(&target)
                    .flatten()
                    .and_then(|address| ObjectHandle::from_address(address.0))
                    .ok_or_else(|| Exception::throw_type(&ctx, "RegisterFunctionHook expects a function object"))?;
                let function = host_call(&ctx, "RegisterFunctionHook", || shared.host.as_function(object))?
                    .ok_or_else(|| Exception::throw_reference(&ctx, &format!("{object} is not a function")))?;
                let pre = optional_callback(&ctx, pre.0, "pre")?;
                let post = optional_callback(&ctx, post.0, "post")?;
                let (pre_id, post_id) =
                    hooks::register(&shared, &local, &ctx, function, pre, post).map_err(|err| throw(&ctx, err))?;
                Ok(vec![pre_id as f64, post_id as f64])
            },
        )?;
    }

    {
        let shared = Arc::clone(shared);
        global(
            ctx,
            &globals,
            "UnregisterHook",
            move |ctx: Ctx<'js>, first: Value<'js>, second: Opt<Value<'js>>, third: Opt<Value<'js>>| -> rquickjs::Result<bool> {
                let local = local_state(&ctx, &shared)?;
                let (function, pre, post) = match first.as_string() {
                    Some(path) => {
                        let path = path.to_string()?;
                        let function = host_call(&ctx, "UnregisterHook", || shared.host.find_function(&path))?;
                        if function.is_none() {
                            warn!(target: "script", "UnregisterHook: function '{}' not found", path);
                            return Ok(false);
                        }
                        (function, hook_id(&ctx, second.0.as_ref())?, hook_id(&ctx, third.0.as_ref())?)
                    }
                    None => (None, hook_id(&ctx, Some(&first))?, hook_id(&ctx, second.0.as_ref())?),
                };
                Ok(hooks::unregister(&shared, &local, function, pre, post))
            },
        )?;
    }

    Ok(())
}

fn install_input<'js>(ctx: &Ctx<'js>, shared: &Arc<BridgeShared>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    {
        let shared = Arc::clone(shared);
        global(
            ctx,
            &globals,
            "RegisterKeyBind",
            move |ctx: Ctx<'js>, key: Value<'js>, second: Value<'js>, third: Opt<Value<'js>>| -> rquickjs::Result<f64> {
                let local = local_state(&ctx, &shared)?;
                let key = parse_key(&ctx, &key)?;
                let (modifiers, callback) = match second.as_function() {
                    Some(callback) => (ModifierKeys::empty(), callback.clone()),
                    None => {
                        let modifiers = parse_modifiers(&ctx, &second)?;
                        let callback = optional_callback(&ctx, third.0, "key bind")?
                            .ok_or_else(|| Exception::throw_type(&ctx, "RegisterKeyBind needs a callback"))?;
                        (modifiers, callback)
                    }
                };
                let id = keybinds::register(&shared, &local, &ctx, key, modifiers, callback)
                    .map_err(|err| throw(&ctx, err))?;
                Ok(id.get() as f64)
            },
        )?;
    }

    {
        let shared = Arc::clone(shared);
        global(ctx, &globals, "UnregisterKeyBind", move |ctx: Ctx<'js>, id: f64| -> rquickjs::Result<bool> {
            let local = local_state(&ctx, &shared)?;
            Ok(match ScriptHandle::from_number(id) {
                Some(handle) => keybinds::unregister(&shared, &local, handle.0),
                None => false,
            })
        })?;
    }

    {
        let shared = Arc::clone(shared);
        global(
            ctx,
            &globals,
            "NotifyOnNewObject",
            move |ctx: Ctx<'js>, class_name: String, callback: Function<'js>| -> rquickjs::Result<f64> {
                let local = local_state(&ctx, &shared)?;
                let id = notify::register(&shared, &local, &ctx, &class_name, callback).map_err(|err| throw(&ctx, err))?;
                Ok(id.get() as f64)
            },
        )?;
    }

    let keys = Object::new(ctx.clone())?;
    for (name, key) in Key::all() {
        keys.set(name, key.0 as i32)?;
    }
    globals.set("Key", keys)?;

    let modifiers = Object::new(ctx.clone())?;
    for (name, flag) in ModifierKeys::all().iter_names() {
        modifiers.set(name, flag.bits() as i32)?;
    }
    globals.set("ModifierKey", modifiers)
}

fn install_timers<'js>(ctx: &Ctx<'js>, shared: &Arc<BridgeShared>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    for (name, repeating) in [("setTimeout", false), ("setInterval", true)] {
        let shared = Arc::clone(shared);
        global(
            ctx,
            &globals,
            name,
            move |ctx: Ctx<'js>, callback: Function<'js>, delay: Opt<Value<'js>>| -> rquickjs::Result<f64> {
                let local = local_state(&ctx, &shared)?;
                // ToNumber semantics; NaN schedules immediately.
                let delay = match delay.0 {
                    Some(value) => value.get::<Coerced<f64>>()?.0,
                    None => 0.0,
                };
                let callback = local.callbacks.borrow_mut().retain(&ctx, callback);
                let id = shared.timers.schedule(callback, shared.clock.now(), delay, repeating);
                Ok(id.get() as f64)
            },
        )?;
    }

    for name in ["clearTimeout", "clearInterval"] {
        let shared = Arc::clone(shared);
        global(ctx, &globals, name, move |id: Opt<Value<'js>>| {
            // Unknown or malformed ids are ignored. The callback is released
            // on the next pump.
            if let Some(handle) = id.0.and_then(|id| id.as_number()).and_then(ScriptHandle::from_number) {
                shared.timers.cancel(TimerId::from_raw(handle.0));
            }
        })?;
    }

    Ok(())
}

pub(crate) fn install<'js>(ctx: &Ctx<'js>, shared: &Arc<BridgeShared>) -> rquickjs::Result<()> {
    install_logging(ctx)?;
    install_lookups(ctx, shared)?;
    install_hooks(ctx, shared)?;
    install_input(ctx, shared)?;
    install_timers(ctx, shared)?;

    let tether = Object::new(ctx.clone())?;
    tether.set("version", tether_core::VERSION)?;
    ctx.globals().set("Tether", tether)
}
