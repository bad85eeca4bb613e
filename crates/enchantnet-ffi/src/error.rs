//! Errors raised at the C boundary.

use enchantnet_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("null pointer passed for `{0}`")]
    NullArgument(&'static str),

    #[error("`{0}` is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("failed to build async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}
