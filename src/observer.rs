use crate::{ExecutionContext, Result};

type Reaction<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// One-shot subscription that carries a promise's terminal result somewhere
/// else, usually into a chained child promise.
pub(crate) struct Observer<T> {
    context: ExecutionContext,
    reaction: Reaction<T>,
}

impl<T: Send + 'static> Observer<T> {
    pub(crate) fn new<F>(context: ExecutionContext, reaction: F) -> Self
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        Self {
            context,
            reaction: Box::new(reaction),
        }
    }

    /// Consumes the observer, so it can fire only once.
    pub(crate) fn fire(self, result: Result<T>) {
        let reaction = self.reaction;
        self.context.dispatch(move || reaction(result));
    }
}
