//! Error types for strikeq.
//!
//! Work-function failures never show up here: they are captured as
//! [`Failure`](crate::model::Failure) and folded into the strike policy.

use thiserror::Error;

use crate::model::TaskId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("queue is not ready yet")]
    NotReady,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("task {0} is being processed")]
    Processing(TaskId),

    #[error("task {0} is not in the active window")]
    NotInWindow(TaskId),

    #[error("queue is closed")]
    Closed,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the distinguished "missing key" condition of the store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// A copy to hand to another waiter. Variants wrapping foreign error
    /// types keep only their message.
    pub(crate) fn replicate(&self) -> Error {
        match self {
            Error::Config(msg) => Error::Config(msg.clone()),
            Error::NotReady => Error::NotReady,
            Error::NotFound(key) => Error::NotFound(key.clone()),
            Error::Processing(id) => Error::Processing(*id),
            Error::NotInWindow(id) => Error::NotInWindow(*id),
            Error::Closed => Error::Closed,
            other => Error::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replicate_keeps_the_variant() {
        assert!(Error::NotFound("task 3".into()).replicate().is_not_found());
        assert!(matches!(
            Error::Processing(TaskId(2)).replicate(),
            Error::Processing(TaskId(2))
        ));
        let io = Error::Io(std::io::Error::other("disk gone"));
        assert!(matches!(io.replicate(), Error::Other(msg) if msg.contains("disk gone")));
    }
}

pub type Result<T> = std::result::Result<T, Error>;
