//! Tether demo runtime
//!
//! Hosts the script bridge over an in-memory object model and drives it
//! through the mod lifecycle for a fixed number of frames.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tether_host::memory::{FunctionBuilder, MemoryHost};
use tether_host::{FunctionHandle, Host, Key, ModifierKeys, ObjectHandle, ObjectModel, PropertyKind, UserMod};
use tether_script::ScriptMod;
use tether_services::{logging, Settings};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "Run script mods against a demo object model")]
struct Cli {
    /// Settings file (JSON). Defaults apply when it does not exist.
    #[arg(long, default_value = "tether.json")]
    settings: PathBuf,

    /// Directory holding one folder per mod.
    #[arg(long, default_value = "demos/Mods")]
    mods_dir: PathBuf,

    /// Frames to simulate before shutting down.
    #[arg(long, default_value_t = 120)]
    frames: u64,

    /// Wall-clock length of one frame.
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,
}

/// A small world: `Game.Pawn` with `TakeDamage(Amount) -> Health` and one
/// instance named `Player`.
fn demo_world() -> Result<Arc<MemoryHost>> {
    let host = MemoryHost::new();
    host.class("Engine.Actor").build()?;

    let health = Arc::new(AtomicI32::new(100));
    host.class("Game.Pawn")
        .extends("Actor")
        .property("Health", PropertyKind::Int)
        .function(
            FunctionBuilder::new("TakeDamage")
                .param("Amount", PropertyKind::Int)
                .returns(PropertyKind::Int)
                .native(move |call| {
                    let amount = call.get::<i32>("Amount").unwrap_or(0);
                    let remaining = (health.load(Ordering::Relaxed) - amount).max(0);
                    health.store(remaining, Ordering::Relaxed);
                    call.set("ReturnValue", remaining);
                }),
        )
        .build()?;

    host.spawn("Pawn", "Player")?;
    Ok(Arc::new(host))
}

fn take_damage(host: &MemoryHost, pawn: ObjectHandle, function: FunctionHandle, amount: i32) -> Result<()> {
    let mut params = host.new_params(function)?;
    params.set("Amount", amount);
    host.invoke(pawn, function, params.address())?;
    debug!("Player took {} damage", amount);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = Settings::load_optional(&cli.settings)
        .with_context(|| format!("loading {}", cli.settings.display()))?;
    let from_file = loaded.is_some();
    let settings = loaded.unwrap_or_default();
    logging::init(&settings.logging);

    info!("Starting Tether v{}", tether_core::VERSION);
    if from_file {
        info!("Loaded settings from {}", cli.settings.display());
    } else {
        warn!("No settings at {}, using defaults", cli.settings.display());
    }

    let host = demo_world()?;
    let pawn = host.find_first_of("Pawn").context("demo world has no pawn")?;
    let take_damage_fn = host
        .find_function("Game.Pawn.TakeDamage")
        .context("demo world has no TakeDamage")?;

    let mut script_mod = ScriptMod::new(Arc::clone(&host) as Arc<dyn Host>, cli.mods_dir.clone(), settings.scripting);
    script_mod.on_program_start();
    script_mod.on_unreal_init();

    let frame = Duration::from_millis(cli.frame_ms);
    for index in 0..cli.frames {
        // Gameplay traffic the mods can observe through hooks and key binds.
        if index % 30 == 0 {
            take_damage(&host, pawn, take_damage_fn, 10)?;
        }
        if index == cli.frames / 2 {
            host.press_key(Key::F1, ModifierKeys::empty());
        }

        script_mod.on_update();
        std::thread::sleep(frame);
    }

    let engine = script_mod.engine();
    info!(
        "Shutting down after {} frames: {} hooks, {} key binds, {} timers active",
        cli.frames,
        engine.hook_count(),
        engine.key_bind_count(),
        engine.active_timers()
    );
    script_mod.engine_mut().shutdown();
    Ok(())
}
