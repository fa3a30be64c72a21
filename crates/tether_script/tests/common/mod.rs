#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tether_core::time::ManualClock;
use tether_host::memory::{FunctionBuilder, MemoryHost};
use tether_host::{FunctionHandle, Host, ObjectHandle, ObjectModel, PropertyKind};
use tether_script::{ScriptConfig, ScriptEngine};
use tracing_subscriber::EnvFilter;

pub struct Fixture {
    pub host: Arc<MemoryHost>,
    pub clock: Arc<ManualClock>,
    pub mods: TempDir,
    pub engine: ScriptEngine,
    pub example: ObjectHandle,
    pub example_func: FunctionHandle,
}

/// Route bridge logs (swallowed script exceptions included) to the test
/// output. `RUST_LOG` selects what is shown; warnings and errors by default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// `Game.MyClass` with `Count`, `Label`, `ExampleFunc(Value) -> Value * 2` and
/// `Measure(Value, out Result)`, plus one instance named `Example`.
pub fn demo_host() -> Arc<MemoryHost> {
    init_tracing();
    let host = MemoryHost::new();
    host.class("Engine.Actor").build().unwrap();
    host.class("Game.MyClass")
        .extends("Actor")
        .property("Count", PropertyKind::Int)
        .property("Label", PropertyKind::Str)
        .property("Ratio", PropertyKind::Float)
        .function(
            FunctionBuilder::new("ExampleFunc")
                .param("Value", PropertyKind::Int)
                .returns(PropertyKind::Int)
                .native(|call| {
                    let value = call.get::<i32>("Value").unwrap_or(0);
                    call.set("ReturnValue", value * 2);
                }),
        )
        .function(
            FunctionBuilder::new("Measure")
                .param("Value", PropertyKind::Int)
                .out_param("Result", PropertyKind::Int)
                .native(|call| {
                    let value = call.get::<i32>("Value").unwrap_or(0);
                    call.set("Result", value + 7);
                }),
        )
        .function(FunctionBuilder::new("Reset").native(|_| {}))
        .function(FunctionBuilder::new("Explode").native(|_| panic!("native code exploded")))
        .build()
        .unwrap();
    host.spawn("MyClass", "Example").unwrap();
    Arc::new(host)
}

pub fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Initialised engine over a fresh mods directory. Nothing is loaded yet.
pub fn fixture() -> Fixture {
    let host = demo_host();
    let clock = Arc::new(ManualClock::new());
    let mods = tempfile::tempdir().unwrap();
    let mut engine = ScriptEngine::new(Arc::clone(&host) as Arc<dyn Host>, mods.path(), ScriptConfig::default())
        .with_clock(Arc::clone(&clock) as _);
    engine.init().unwrap();

    let example = host.find_first_of("MyClass").unwrap();
    let example_func = host.find_function("Game.MyClass.ExampleFunc").unwrap();
    Fixture {
        host,
        clock,
        mods,
        engine,
        example,
        example_func,
    }
}

impl Fixture {
    pub fn run(&self, source: &str) {
        self.engine.execute(source, "test.js").unwrap();
    }

    pub fn eval(&self, source: &str) -> String {
        self.engine.evaluate(source).unwrap()
    }

    /// Invoke `ExampleFunc(value)` on the example object from this thread.
    pub fn call_example(&self, value: i32) -> i32 {
        call_example(&self.host, self.example, self.example_func, value)
    }
}

pub fn call_example(host: &MemoryHost, object: ObjectHandle, function: FunctionHandle, value: i32) -> i32 {
    let mut params = host.new_params(function).unwrap();
    params.set("Value", value);
    host.invoke(object, function, params.address()).unwrap();
    params.get::<i32>("ReturnValue").unwrap()
}
