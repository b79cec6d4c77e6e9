use crate::{Error, Result};

/// Lifecycle of a promise. Once it leaves `Pending` it never changes again.
#[derive(Debug, Clone, PartialEq)]
pub enum State<T> {
    Pending,
    Resolved(T),
    Rejected(Error),
}

impl<T> State<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, State::Pending)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, State::Resolved(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, State::Rejected(_))
    }

    /// `Some` for a terminal state, `None` while pending.
    pub fn terminal_result(&self) -> Option<Result<T>>
    where
        T: Clone,
    {
        match self {
            State::Pending => None,
            State::Resolved(value) => Some(Ok(value.clone())),
            State::Rejected(err) => Some(Err(err.clone())),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Resolved(_) => "resolved",
            State::Rejected(_) => "rejected",
        }
    }
}

impl<T> Default for State<T> {
    fn default() -> Self {
        State::Pending
    }
}

impl<T> From<Result<T>> for State<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => State::Resolved(value),
            Err(err) => State::Rejected(err),
        }
    }
}
