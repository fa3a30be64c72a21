mod common;

use common::fixture;

#[test]
fn test_timeout_fires_once_after_delay() {
    let fx = fixture();
    fx.run("globalThis.fired = 0; globalThis.id = setTimeout(() => fired++, 100);");
    assert_eq!(fx.engine.active_timers(), 1);
    let retained = fx.engine.retained_callbacks();

    fx.clock.advance_ms(99);
    assert_eq!(fx.engine.tick().unwrap().timers_fired, 0);
    assert_eq!(fx.eval("fired"), "0");

    fx.clock.advance_ms(1);
    assert_eq!(fx.engine.tick().unwrap().timers_fired, 1);
    assert_eq!(fx.eval("fired"), "1");
    assert_eq!(fx.engine.active_timers(), 0);
    assert_eq!(fx.engine.retained_callbacks(), retained - 1);

    fx.clock.advance_ms(1_000);
    fx.engine.tick().unwrap();
    assert_eq!(fx.eval("fired"), "1");
}

#[test]
fn test_interval_repeats_until_cleared_from_inside() {
    let fx = fixture();
    fx.run(
        r#"
        globalThis.ticks = 0;
        globalThis.id = setInterval(() => {
            ticks++;
            if (ticks === 3) clearInterval(id);
        }, 50);
        "#,
    );

    for _ in 0..5 {
        fx.clock.advance_ms(50);
        fx.engine.tick().unwrap();
    }
    assert_eq!(fx.eval("ticks"), "3");
    assert_eq!(fx.engine.active_timers(), 0);
}

#[test]
fn test_clear_before_fire() {
    let fx = fixture();
    fx.run("globalThis.fired = false; clearTimeout(setTimeout(() => { fired = true; }, 10)); clearTimeout(12345); clearTimeout();");
    fx.clock.advance_ms(100);
    fx.engine.tick().unwrap();
    assert_eq!(fx.eval("fired"), "false");
}

#[test]
fn test_timer_ids_are_distinct_and_callbacks_may_schedule() {
    let fx = fixture();
    fx.run(
        r#"
        globalThis.log = [];
        const a = setTimeout(() => {
            log.push("a");
            setTimeout(() => log.push("nested"), 0);
        }, 0);
        const b = setTimeout(() => log.push("b"), -5);
        globalThis.distinct = a !== b;
        "#,
    );
    assert_eq!(fx.eval("distinct"), "true");

    fx.engine.tick().unwrap();
    assert_eq!(fx.eval("log.join()"), "a,b");
    fx.engine.tick().unwrap();
    assert_eq!(fx.eval("log.join()"), "a,b,nested");
}

#[test]
fn test_throwing_timer_does_not_stop_others() {
    let fx = fixture();
    fx.run(
        r#"
        globalThis.after = false;
        setTimeout(() => { throw new Error("timer failure"); }, 5);
        setTimeout(() => { after = true; }, 6);
        "#,
    );
    fx.clock.advance_ms(10);
    assert_eq!(fx.engine.tick().unwrap().timers_fired, 2);
    assert_eq!(fx.eval("after"), "true");
}

#[test]
fn test_tick_drains_promise_jobs() {
    let fx = fixture();
    fx.run("globalThis.settled = false; Promise.resolve().then(() => { settled = true; });");
    let report = fx.engine.tick().unwrap();
    assert!(report.jobs >= 1);
    assert_eq!(fx.eval("settled"), "true");
}

#[test]
fn test_sibling_cleared_in_same_tick_never_fires() {
    let fx = fixture();
    fx.run(
        r#"
        globalThis.log = [];
        setTimeout(() => { log.push("a"); clearTimeout(b); clearInterval(c); }, 10);
        globalThis.b = setTimeout(() => log.push("b"), 10);
        globalThis.c = setInterval(() => log.push("c"), 10);
        "#,
    );

    fx.clock.advance_ms(10);
    assert_eq!(fx.engine.tick().unwrap().timers_fired, 1);
    fx.clock.advance_ms(100);
    fx.engine.tick().unwrap();

    assert_eq!(fx.eval("log.join(',')"), "a");
    assert_eq!(fx.engine.active_timers(), 0);
}

#[test]
fn test_delay_is_coerced_like_a_number() {
    let fx = fixture();
    fx.run(
        r#"
        globalThis.log = [];
        setTimeout(() => log.push("undefined"), undefined);
        setTimeout(() => log.push("text"), "100");
        setTimeout(() => log.push("junk"), "soon");
        setTimeout(() => log.push("none"));
        "#,
    );

    fx.engine.tick().unwrap();
    assert_eq!(fx.eval("log.join(',')"), "undefined,junk,none");

    fx.clock.advance_ms(100);
    fx.engine.tick().unwrap();
    assert_eq!(fx.eval("log.join(',')"), "undefined,junk,none,text");
}
