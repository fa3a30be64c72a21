use std::path::PathBuf;

use tether_host::HostError;
use thiserror::Error;

/// Failures surfaced to the embedding host.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("script engine is not initialized")]
    NotInitialized,

    #[error("script engine failed to initialize earlier in this session")]
    InitFailed,

    #[error("function '{0}' not found")]
    FunctionNotFound(String),

    #[error("hook needs at least one callback")]
    NoCallbacks,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Script(String),

    #[error(transparent)]
    Engine(#[from] rquickjs::Error),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Marshal(#[from] crate::marshal::MarshalError),
}
