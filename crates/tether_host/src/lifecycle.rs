//! Mod lifecycle contract

/// Entry points a host drives on every loaded mod.
///
/// Call order: `on_program_start` once, `on_unreal_init` once when the
/// object model becomes queryable, then `on_update` every frame. All three
/// run on the host's main (event-loop) thread.
pub trait UserMod {
    fn name(&self) -> &str;

    fn on_program_start(&mut self) {}

    fn on_unreal_init(&mut self) {}

    fn on_update(&mut self) {}
}
