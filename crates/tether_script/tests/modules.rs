mod common;

use std::sync::Arc;

use common::{demo_host, fixture, write_file};
use tether_host::{Host, UserMod};
use tether_script::{BridgeError, ScriptConfig, ScriptEngine, ScriptMod};

#[test]
fn test_diamond_imports_compile_once() {
    let mut fx = fixture();
    let root = fx.mods.path();
    write_file(root, "Diamond/js/main.js", "import { a } from './a'; import { b } from './b.js'; globalThis.sum = a + b;");
    write_file(root, "Diamond/js/a.js", "import { shared } from './lib/shared'; export const a = shared + 1;");
    write_file(root, "Diamond/js/b.js", "import { shared } from './lib/../lib/shared.js'; export const b = shared + 2;");
    write_file(
        root,
        "Diamond/js/lib/shared.js",
        "globalThis.sharedLoads = (globalThis.sharedLoads || 0) + 1; export const shared = 10;",
    );

    let report = fx.engine.load().unwrap();
    assert_eq!(report.loaded, vec!["Diamond".to_string()]);
    assert_eq!(fx.eval("sharedLoads"), "1");
    assert_eq!(fx.eval("sum"), "23");

    let cache = fx.engine.module_cache().unwrap();
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.compilations(), 4);
    assert!(cache.paths().iter().any(|path| path.ends_with("Diamond/js/lib/shared.js")));
}

#[test]
fn test_mods_load_in_name_order_and_failures_are_isolated() {
    let mut fx = fixture();
    let root = fx.mods.path();
    write_file(root, "Zeta/js/main.js", "globalThis.order = (globalThis.order || []).concat('Zeta');");
    write_file(root, "Alpha/js/main.js", "globalThis.order = (globalThis.order || []).concat('Alpha');");
    write_file(root, "Broken/js/main.js", "import './missing'; globalThis.order = order.concat('Broken');");
    write_file(root, "Thrower/js/main.js", "throw new Error('refusing to load');");
    write_file(root, "NoScripts/readme.txt", "nothing here");

    let report = fx.engine.load().unwrap();
    assert_eq!(report.loaded, vec!["Alpha".to_string(), "Zeta".to_string()]);
    assert_eq!(report.skipped, vec!["NoScripts".to_string()]);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0].0, "Broken");
    assert!(report.failed[0].1.contains("Could not open module"), "{}", report.failed[0].1);
    assert!(report.failed[1].1.contains("refusing to load"), "{}", report.failed[1].1);
    assert_eq!(fx.eval("order.join()"), "Alpha,Zeta");
}

#[test]
fn test_executing_a_cached_module_is_a_no_op() {
    let fx = fixture();
    write_file(fx.mods.path(), "Once/js/main.js", "globalThis.runs = (globalThis.runs || 0) + 1;");
    let entry = fx.mods.path().join("Once/js/main.js");

    assert!(fx.engine.execute_module(&entry).unwrap());
    assert!(!fx.engine.execute_module(&entry).unwrap());
    assert_eq!(fx.eval("runs"), "1");
}

#[test]
fn test_top_level_await_settles_on_tick() {
    let fx = fixture();
    write_file(
        fx.mods.path(),
        "Async/js/main.js",
        "globalThis.stage = 'start'; await new Promise((resolve) => setTimeout(resolve, 10)); globalThis.stage = 'done';",
    );

    assert!(fx.engine.execute_module(&fx.mods.path().join("Async/js/main.js")).unwrap());
    assert_eq!(fx.eval("stage"), "start");

    fx.clock.advance_ms(10);
    fx.engine.tick().unwrap();
    assert_eq!(fx.eval("stage"), "done");
}

#[test]
fn test_lifecycle_errors() {
    let host = demo_host();
    let mods = tempfile::tempdir().unwrap();
    let mut engine = ScriptEngine::new(Arc::clone(&host) as Arc<dyn Host>, mods.path(), ScriptConfig::default());

    assert!(matches!(engine.load(), Err(BridgeError::NotInitialized)));
    assert!(matches!(engine.tick(), Err(BridgeError::NotInitialized)));
    engine.shutdown();

    engine.init().unwrap();
    engine.init().unwrap();
    assert!(engine.is_initialized());
    assert_eq!(engine.load().unwrap(), Default::default());

    engine.shutdown();
    assert!(matches!(engine.execute("1", "late.js"), Err(BridgeError::NotInitialized)));

    // A fresh session after shutdown starts with an empty module cache.
    engine.init().unwrap();
    assert_eq!(engine.module_cache().unwrap().len(), 0);
}

#[test]
fn test_missing_mods_directory_loads_nothing() {
    let host = demo_host();
    let mods = tempfile::tempdir().unwrap();
    let mut engine = ScriptEngine::new(
        Arc::clone(&host) as Arc<dyn Host>,
        mods.path().join("absent"),
        ScriptConfig::default(),
    );
    engine.init().unwrap();
    let report = engine.load().unwrap();
    assert!(report.loaded.is_empty() && report.failed.is_empty());
}

#[test]
fn test_failed_runtime_creation_is_permanent() {
    let host = demo_host();
    let mods = tempfile::tempdir().unwrap();
    let config = ScriptConfig {
        memory_limit_bytes: 1,
        ..ScriptConfig::default()
    };
    let mut engine = ScriptEngine::new(Arc::clone(&host) as Arc<dyn Host>, mods.path(), config);

    assert!(engine.init().is_err());
    assert!(matches!(engine.init(), Err(BridgeError::InitFailed)));
    assert!(matches!(engine.tick(), Err(BridgeError::InitFailed)));
}

#[test]
fn test_script_mod_drives_the_engine() {
    let host = demo_host();
    let mods = tempfile::tempdir().unwrap();
    write_file(mods.path(), "Alpha/js/main.js", "setTimeout(() => { globalThis.ticked = true; }, 0);");
    write_file(mods.path(), "Broken/js/main.js", "throw new Error('nope');");

    let mut script_mod = ScriptMod::new(Arc::clone(&host) as Arc<dyn Host>, mods.path(), ScriptConfig::default());
    assert_eq!(script_mod.name(), "TetherScript");

    // Ticking before init is silently ignored.
    script_mod.on_program_start();
    script_mod.on_update();
    assert!(script_mod.last_load().is_none());

    script_mod.on_unreal_init();
    let report = script_mod.last_load().unwrap();
    assert_eq!(report.loaded, vec!["Alpha".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "Broken");

    script_mod.on_update();
    assert_eq!(script_mod.engine().evaluate("globalThis.ticked === true").unwrap(), "true");
}
