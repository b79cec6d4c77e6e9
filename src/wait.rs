//! Awaiting a promise from async code.
use crate::{Promise, Result};
use std::{
    fmt::Debug,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// Future yielding the terminal result of a [`Promise`]. Any number of these
/// may wait on one promise; none of them take the callback or observer slots.
///
/// # Examples
///
/// ```
/// use promise_chain::{Promise, Runtime};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let runtime = Runtime::default();
/// let promise = Promise::<String>::pending(&runtime);
/// let waiter = promise.completion();
/// let task1 = thread::spawn(move || block_on(waiter));
/// promise.resolve("Hi".into());
/// assert_eq!(task1.join().expect("The task1 thread has panicked."), Ok("Hi".into()));
/// ```
pub struct Completion<T> {
    promise: Promise<T>,
}

impl<T: Clone + Send + 'static> Promise<T> {
    pub fn completion(&self) -> Completion<T> {
        Completion {
            promise: self.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.promise.poll_result(cx.waker()) {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

impl<T> Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Completion").field(&self.promise).finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Error, Promise, Runtime};
    use futures::executor::block_on;
    use std::thread;

    #[test]
    fn test_two_waiters_resolve() {
        let runtime = Runtime::immediate();
        let promise = Promise::<String>::pending(&runtime);
        let (a, b) = (promise.completion(), promise.completion());
        let task1 = thread::spawn(move || block_on(a));
        let task2 = thread::spawn(move || block_on(b));
        let task3 = thread::spawn(move || promise.resolve(String::from("🍓")));
        assert_eq!(task1.join().expect("The task1 thread has panicked"), Ok("🍓".into()));
        assert_eq!(task2.join().expect("The task2 thread has panicked"), Ok("🍓".into()));
        assert!(task3.join().expect("The task3 thread has panicked"));
    }

    #[test]
    fn test_waiter_sees_rejection() {
        let runtime = Runtime::immediate();
        let promise = Promise::<()>::pending(&runtime);
        let waiter = promise.completion();
        let task1 = thread::spawn(move || block_on(waiter));
        promise.reject(Error::msg("reject!!"));
        assert_eq!(
            task1.join().expect("The task1 thread has panicked"),
            Err(Error::msg("reject!!"))
        );
    }

    #[test]
    fn test_waiting_on_settled_promise() {
        let runtime = Runtime::immediate();
        let promise = Promise::resolved(&runtime, 3);
        assert_eq!(block_on(promise.completion()), Ok(3));
        assert_eq!(block_on(promise.completion()), Ok(3));
    }
}
