use std::sync::Arc;

/// Failure carried by a rejected promise.
///
/// `Error` is cheap to clone so one terminal result can reach the failure
/// handler, the completion handler and the observer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The promise was cancelled with [`Promise::cancel`](crate::Promise::cancel).
    #[error("promise was cancelled")]
    Cancelled,
    /// Every resolution handle handed to a body was dropped while the
    /// promise was still pending.
    #[error("promise was abandoned before it settled")]
    Abandoned,
    #[error("promise body panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Wraps an arbitrary application error.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(Arc::new(err))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_owned(),
                Err(_) => "non-string panic payload".to_owned(),
            },
        };
        Error::Panicked(message)
    }
}

/// `Other` compares by identity, everything else by value.
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Cancelled, Error::Cancelled) => true,
            (Error::Abandoned, Error::Abandoned) => true,
            (Error::Panicked(a), Error::Panicked(b)) => a == b,
            (Error::Message(a), Error::Message(b)) => a == b,
            (Error::Other(a), Error::Other(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Message(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::Message(message.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[derive(Debug, thiserror::Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn test_other_is_transparent() {
        let err = Error::other(DiskError);
        assert_eq!(err.to_string(), "disk on fire");
        assert_eq!(err.clone(), err);
        assert_ne!(err, Error::other(DiskError));
    }

    #[test]
    fn test_panic_payload() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(Error::from_panic(payload), Error::Panicked("boom 7".into()));
        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(Error::from_panic(payload), Error::Panicked("static".into()));
    }

    #[test]
    fn test_cancelled_sentinel() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::msg("cancelled").is_cancelled());
    }
}
