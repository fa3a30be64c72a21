//! Script runtime management
//!
//! Owns the QuickJS runtime and its single root context, and knows how to
//! turn a failed script call into something worth logging.

use rquickjs::convert::Coerced;
use rquickjs::{Context, Ctx, Runtime, Type, Value};
use tracing::error;

use crate::config::ScriptConfig;
use crate::error::BridgeError;

/// Script execution context
pub struct ScriptRuntime {
    // Field order is drop order: the context goes before its runtime.
    pub context: Context,
    runtime: Runtime,
}

impl ScriptRuntime {
    pub fn new(config: &ScriptConfig) -> Result<Self, BridgeError> {
        let runtime = Runtime::new()?;
        runtime.set_memory_limit(config.memory_limit_bytes);
        runtime.set_gc_threshold(config.gc_threshold_bytes);
        let context = Context::full(&runtime)?;

        Ok(Self { context, runtime })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }
}

/// Message and stack of a thrown value.
pub fn describe_value(value: &Value<'_>) -> String {
    if let Some(exception) = value.as_exception() {
        let message = exception.message().unwrap_or_default();
        return match exception.stack() {
            Some(stack) if !stack.trim().is_empty() => format!("{message}\n{}", stack.trim_end()),
            _ => message,
        };
    }
    match value.get::<Coerced<String>>() {
        Ok(Coerced(text)) => text,
        Err(_) => format!("<{}>", value.type_name()),
    }
}

/// Render an error returned by a script call, consuming the pending
/// exception if there is one.
pub fn describe_error(ctx: &Ctx<'_>, error: &rquickjs::Error) -> String {
    if error.is_exception() {
        describe_value(&ctx.catch())
    } else {
        error.to_string()
    }
}

/// Log a failed script call without propagating it.
pub fn log_error(ctx: &Ctx<'_>, what: &str, error: &rquickjs::Error) {
    error!(target: "script", "{}: {}", what, describe_error(ctx, error));
}

fn is_nothing(value: &Value<'_>) -> bool {
    matches!(
        value.type_of(),
        Type::Uninitialized | Type::Undefined | Type::Null
    )
}

/// Run queued promise jobs, at most `max`. A job that throws is logged and
/// the drain continues.
pub(crate) fn drain_jobs(ctx: &Ctx<'_>, max: usize) -> usize {
    let mut ran = 0;
    while ran < max && ctx.execute_pending_job() {
        ran += 1;
        let pending = ctx.catch();
        if !is_nothing(&pending) {
            error!(target: "script", "uncaught exception in job: {}", describe_value(&pending));
        }
    }
    ran
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_creates_context() {
        let runtime = ScriptRuntime::new(&ScriptConfig::default()).unwrap();
        let sum: i32 = runtime.context.with(|ctx| ctx.eval("1 + 2")).unwrap();
        assert_eq!(sum, 3);
    }

    #[test]
    fn test_describe_error_includes_message() {
        let runtime = ScriptRuntime::new(&ScriptConfig::default()).unwrap();
        let text = runtime.context.with(|ctx| {
            let err = ctx.eval::<(), _>("throw new TypeError('bad thing')").unwrap_err();
            describe_error(&ctx, &err)
        });
        assert!(text.contains("bad thing"), "{text}");
    }

    #[test]
    fn test_drain_jobs_runs_promise_reactions() {
        let runtime = ScriptRuntime::new(&ScriptConfig::default()).unwrap();
        runtime.context.with(|ctx| {
            ctx.eval::<(), _>(
                "globalThis.hits = 0; Promise.resolve().then(() => hits++); Promise.resolve().then(() => { throw new Error('job'); });",
            )
            .unwrap();
            assert_eq!(drain_jobs(&ctx, 100), 2);
            assert_eq!(ctx.globals().get::<_, i32>("hits").unwrap(), 1);
            assert_eq!(drain_jobs(&ctx, 100), 0);
        });
    }
}
