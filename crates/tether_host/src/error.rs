use thiserror::Error;

use crate::handle::{FunctionHandle, ObjectHandle};

/// Failures reported by host collaborators.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("object {0} is not valid")]
    InvalidObject(ObjectHandle),

    #[error("function {0} is not valid")]
    InvalidFunction(FunctionHandle),

    #[error("class '{0}' is not known to the object model")]
    UnknownClass(String),

    #[error("'{path}' is already defined")]
    DuplicatePath { path: String },

    #[error("function {function} has no native implementation")]
    NotCallable { function: FunctionHandle },

    #[error("{0}")]
    Rejected(String),
}
