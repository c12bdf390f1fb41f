use std::time::Duration;

use thiserror::Error;

use crate::Stage;

/// Errors reported by the primitives in this crate.
///
/// Blocking relay entry and pointer bookkeeping never fail; only accessing a null
/// [`crate::SharedPtr`], non-blocking access to a locked one and timed relay entry produce an
/// `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The pointer owns no object, so there is nothing to dereference.
    #[error("dereferenced a null shared pointer")]
    NullDereference,

    /// The object is locked through another handle and a non-blocking access was requested.
    #[error("shared object is locked by another guard")]
    Busy,

    /// The stage's turn did not come around before the timeout elapsed.
    #[error("stage {stage} was not scheduled within {waited:?}")]
    Timeout { stage: Stage, waited: Duration },
}

pub type Result<T> = std::result::Result<T, Error>;
