use thiserror::Error;

/// Everything that can go wrong while preparing, encoding or writing a map
/// type's snapshot or delta.
///
/// Primary-key hasher binding failures of the recoverable `NOT_BINDABLE`
/// kind are *not* represented here -- per §7 of the spec they are logged
/// and swallowed, never surfaced as an `Err`. Only the fatal binding kind
/// propagates.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("I/O error while writing encoded output: {0}")]
    Io(#[from] std::io::Error),

    #[error("primary-key hasher for field path(s) {field_paths:?} failed to bind: {reason}")]
    HasherBindingFailed {
        field_paths: Vec<String>,
        reason: String,
    },

    #[error("invalid writer configuration: {0}")]
    InvalidConfig(String),

    #[error("internal invariant breach: {0}")]
    InvariantBreach(String),
}

pub type Result<T> = std::result::Result<T, WriteError>;
