//! Tether Core
//!
//! Engine-agnostic building blocks shared by the bridge crates:
//! - Injectable clocks (monotonic and manual)
//! - Stable slot arena with generational handles
//! - Poison-tolerant locking helpers

pub mod arena;
pub mod sync;
pub mod time;

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
