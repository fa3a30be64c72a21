//! Logging setup

use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::settings::LoggingSettings;

/// Install the global subscriber. `RUST_LOG` overrides the configured
/// filter. Returns `false` if a subscriber was already installed.
pub fn init(settings: &LoggingSettings) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let description = filter.to_string();
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();
    if installed {
        debug!("logging filter: {}", description);
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_refused() {
        let settings = LoggingSettings::default();
        init(&settings);
        assert!(!init(&settings));
    }
}
