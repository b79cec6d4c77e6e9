//! The promise itself: a state machine, three reaction slots, one observer.
//!
//! A [`Promise`] is a cheap handle; clones share the same state. Whoever
//! drives the work holds a handle and settles it, the first settlement wins
//! and every later one is ignored.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{Promise, Runtime};
//! use futures::executor::block_on;
//!
//! let runtime = Runtime::default();
//! let answer = Promise::spawn(&runtime, || Ok(1))
//!     .then_in_background(|x| Ok(x + 1))
//!     .then(runtime.primary(), |x| Ok(x * 10));
//! assert_eq!(block_on(answer.completion()), Ok(20));
//! ```
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Waker;

use crate::observer::Observer;
use crate::{Error, ExecutionContext, Result, Runtime, State};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Whether a failure handler wants to hear about cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    IncludeCancelled,
    ExcludeCancelled,
}

impl FailurePolicy {
    fn admits(self, err: &Error) -> bool {
        match self {
            FailurePolicy::IncludeCancelled => true,
            FailurePolicy::ExcludeCancelled => !err.is_cancelled(),
        }
    }
}

type SuccessFn<T> = Box<dyn FnOnce(T) + Send + 'static>;
type FailureFn = Box<dyn FnOnce(Error) + Send + 'static>;
type CompletionFn<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

struct Slots<T> {
    state: State<T>,
    on_success: Option<SuccessFn<T>>,
    on_failure: Option<(FailurePolicy, FailureFn)>,
    on_completion: Option<CompletionFn<T>>,
    observer: Option<Observer<T>>,
    wakers: Vec<Waker>,
}

struct Inner<T> {
    id: u64,
    runtime: Runtime,
    context: ExecutionContext,
    slots: Mutex<Slots<T>>,
}

/// Everything that fires on settlement, taken out of the slots in one go.
struct Reactions<T> {
    on_success: Option<SuccessFn<T>>,
    on_failure: Option<(FailurePolicy, FailureFn)>,
    on_completion: Option<CompletionFn<T>>,
    observer: Option<Observer<T>>,
}

impl<T: Clone + Send + 'static> Reactions<T> {
    fn take(slots: &mut Slots<T>) -> Self {
        Self {
            on_success: slots.on_success.take(),
            on_failure: slots.on_failure.take(),
            on_completion: slots.on_completion.take(),
            observer: slots.observer.take(),
        }
    }

    fn has_callbacks(&self) -> bool {
        self.on_success.is_some() || self.on_failure.is_some() || self.on_completion.is_some()
    }

    // success or failure, then completion, then the observer; a panicking
    // handler is logged and does not stop the rest
    fn run(self, id: u64, result: Result<T>) {
        match &result {
            Ok(value) => {
                if let Some(handler) = self.on_success {
                    let value = value.clone();
                    shielded(id, "success", move || handler(value));
                }
            }
            Err(err) => {
                if let Some((policy, handler)) = self.on_failure {
                    if policy.admits(err) {
                        let err = err.clone();
                        shielded(id, "failure", move || handler(err));
                    }
                }
            }
        }
        if let Some(handler) = self.on_completion {
            let completion = result.clone();
            shielded(id, "completion", move || handler(completion));
        }
        if let Some(observer) = self.observer {
            observer.fire(result);
        }
    }
}

fn shielded(id: u64, slot: &str, handler: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(handler)) {
        let err = Error::from_panic(payload);
        tracing::error!("promise {} {} handler panicked: {}", id, slot, err);
    }
}

/// Eventual result of an operation that succeeds or fails exactly once.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn guarded<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(Error::from_panic(payload)))
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Builds a promise in `state` without scheduling any work.
    pub fn with_state(runtime: &Runtime, context: ExecutionContext, state: State<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                runtime: runtime.clone(),
                context,
                slots: Mutex::new(Slots {
                    state,
                    on_success: None,
                    on_failure: None,
                    on_completion: None,
                    observer: None,
                    wakers: Vec::new(),
                }),
            }),
        }
    }

    /// Pending promise on the primary context, settled by whoever holds it.
    pub fn pending(runtime: &Runtime) -> Self {
        Self::with_state(runtime, runtime.primary().clone(), State::Pending)
    }

    pub fn resolved(runtime: &Runtime, value: T) -> Self {
        Self::with_state(runtime, runtime.primary().clone(), State::Resolved(value))
    }

    pub fn rejected(runtime: &Runtime, err: Error) -> Self {
        Self::with_state(runtime, runtime.primary().clone(), State::Rejected(err))
    }

    /// Runs `body` on the primary context and settles with what it returns.
    pub fn spawn<F>(runtime: &Runtime, body: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Self::spawn_on(runtime, runtime.primary().clone(), body)
    }

    /// Like [`Promise::spawn`] on an explicit context. A panicking body
    /// rejects with [`Error::Panicked`].
    pub fn spawn_on<F>(runtime: &Runtime, context: ExecutionContext, body: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let promise = Self::with_state(runtime, context.clone(), State::Pending);
        let handle = promise.clone();
        context.dispatch(move || {
            handle.settle(guarded(body));
        });
        promise
    }

    pub fn with_callbacks<F>(runtime: &Runtime, body: F) -> Self
    where
        F: FnOnce(Resolver<T>, Rejecter<T>) + Send + 'static,
    {
        Self::with_callbacks_on(runtime, runtime.primary().clone(), body)
    }

    /// Hands `body` a [`Resolver`] and a [`Rejecter`]; it should use exactly
    /// one of them, now or later. If both are dropped while the promise is
    /// pending it rejects with [`Error::Abandoned`].
    ///
    /// ```
    /// use promise_chain::{Promise, Runtime};
    /// use futures::executor::block_on;
    /// use std::thread;
    ///
    /// let runtime = Runtime::default();
    /// let promise = Promise::<String>::with_callbacks(&runtime, |resolve, _reject| {
    ///     thread::spawn(move || resolve.resolve("🍓".into()));
    /// });
    /// assert_eq!(block_on(promise.completion()).unwrap(), "🍓");
    /// ```
    pub fn with_callbacks_on<F>(runtime: &Runtime, context: ExecutionContext, body: F) -> Self
    where
        F: FnOnce(Resolver<T>, Rejecter<T>) + Send + 'static,
    {
        let promise = Self::with_state(runtime, context.clone(), State::Pending);
        let handle = promise.clone();
        context.dispatch(move || {
            let guard = Arc::new(AbandonGuard {
                promise: handle.clone(),
            });
            let resolver = Resolver {
                promise: handle.clone(),
                _guard: Some(guard.clone()),
            };
            let rejecter = Rejecter {
                promise: handle.clone(),
                _guard: guard.clone(),
            };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || body(resolver, rejecter))) {
                handle.reject(Error::from_panic(payload));
            }
            drop(guard);
        });
        promise
    }

    pub fn with_resolver<F>(runtime: &Runtime, body: F) -> Self
    where
        F: FnOnce(Resolver<T>) + Send + 'static,
    {
        Self::with_resolver_on(runtime, runtime.primary().clone(), body)
    }

    /// Hands `body` only a [`Resolver`]. The body has no way to fail the
    /// promise, though [`Promise::cancel`] from outside still can.
    pub fn with_resolver_on<F>(runtime: &Runtime, context: ExecutionContext, body: F) -> Self
    where
        F: FnOnce(Resolver<T>) + Send + 'static,
    {
        let promise = Self::with_state(runtime, context.clone(), State::Pending);
        let handle = promise.clone();
        context.dispatch(move || {
            let resolver = Resolver {
                promise: handle.clone(),
                _guard: None,
            };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || body(resolver))) {
                handle.reject(Error::from_panic(payload));
            }
        });
        promise
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Context the reaction callbacks of this promise run on.
    pub fn context(&self) -> &ExecutionContext {
        &self.inner.context
    }

    pub fn state(&self) -> State<T> {
        self.slots().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.slots().state.is_pending()
    }

    fn slots(&self) -> MutexGuard<'_, Slots<T>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves a pending promise to its terminal state and fires whatever is
    /// attached. Returns `false`, and changes nothing, if it had already
    /// settled.
    pub fn settle(&self, result: Result<T>) -> bool {
        let mut slots = self.slots();
        if !slots.state.is_pending() {
            tracing::trace!(
                "promise {} is already {}, ignoring settlement",
                self.inner.id,
                slots.state.name()
            );
            return false;
        }
        slots.state = State::from(result.clone());
        let reactions = Reactions::take(&mut slots);
        let wakers = std::mem::take(&mut slots.wakers);
        tracing::trace!("promise {} {}", self.inner.id, slots.state.name());
        drop(slots);

        for waker in wakers {
            waker.wake();
        }
        self.notify(reactions, result);
        true
    }

    fn notify(&self, reactions: Reactions<T>, result: Result<T>) {
        if reactions.has_callbacks() {
            let id = self.inner.id;
            self.inner.context.dispatch(move || reactions.run(id, result));
        } else if let Some(observer) = reactions.observer {
            // the observer hops through its own context
            observer.fire(result);
        }
    }

    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, err: Error) -> bool {
        self.settle(Err(err))
    }

    /// Rejects with [`Error::Cancelled`]. Does not reach upstream promises.
    pub fn cancel(&self) -> bool {
        self.reject(Error::Cancelled)
    }

    /// Handler for the success value. On an already resolved promise it is
    /// dispatched right away; on a rejected one it never runs.
    pub fn on_success<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        let mut slots = self.slots();
        let Some(result) = slots.state.terminal_result() else {
            slots.on_success = Some(Box::new(handler));
            return self;
        };
        drop(slots);
        if let Ok(value) = result {
            let id = self.inner.id;
            self.inner
                .context
                .dispatch(move || shielded(id, "success", move || handler(value)));
        }
        self
    }

    pub fn on_failure<F>(&self, policy: FailurePolicy, handler: F) -> &Self
    where
        F: FnOnce(Error) + Send + 'static,
    {
        let mut slots = self.slots();
        let Some(result) = slots.state.terminal_result() else {
            slots.on_failure = Some((policy, Box::new(handler)));
            return self;
        };
        drop(slots);
        if let Err(err) = result {
            if policy.admits(&err) {
                let id = self.inner.id;
                self.inner
                    .context
                    .dispatch(move || shielded(id, "failure", move || handler(err)));
            }
        }
        self
    }

    pub fn on_completion<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let mut slots = self.slots();
        let Some(result) = slots.state.terminal_result() else {
            slots.on_completion = Some(Box::new(handler));
            return self;
        };
        drop(slots);
        let id = self.inner.id;
        self.inner
            .context
            .dispatch(move || shielded(id, "completion", move || handler(result)));
        self
    }

    /// A promise keeps one observer. Attaching another drops the previous
    /// one, and whatever it would have settled stays pending.
    fn observe(&self, observer: Observer<T>) {
        let mut slots = self.slots();
        let Some(result) = slots.state.terminal_result() else {
            if slots.observer.replace(observer).is_some() {
                tracing::debug!(
                    "promise {} replaced its observer, the earlier chain will not be notified",
                    self.inner.id
                );
            }
            return;
        };
        drop(slots);
        observer.fire(result);
    }

    /// Returns a promise settled with `transform` applied to this promise's
    /// value, or with this promise's error, in which case `transform` never
    /// runs. `transform` runs on `context`; an error or panic from it rejects
    /// the returned promise.
    ///
    /// Only the latest `then`/`then_flat` on a given promise is notified.
    pub fn then<U, F>(&self, context: &ExecutionContext, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let child = Promise::with_state(&self.inner.runtime, context.clone(), State::Pending);
        let target = child.clone();
        self.observe(Observer::new(context.clone(), move |result: Result<T>| {
            target.settle(result.and_then(|value| guarded(move || transform(value))));
        }));
        child
    }

    /// Like [`Promise::then`] for a transform that itself returns a promise.
    /// The returned promise settles with the inner promise's result, once
    /// that one settles.
    pub fn then_flat<U, F>(&self, context: &ExecutionContext, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Promise<U>> + Send + 'static,
    {
        let child = Promise::with_state(&self.inner.runtime, context.clone(), State::Pending);
        let target = child.clone();
        self.observe(Observer::new(context.clone(), move |result: Result<T>| {
            match result.and_then(|value| guarded(move || transform(value))) {
                Ok(inner) => inner.observe(Observer::new(
                    ExecutionContext::immediate(),
                    move |result: Result<U>| {
                        target.settle(result);
                    },
                )),
                Err(err) => {
                    target.reject(err);
                }
            }
        }));
        child
    }

    pub fn then_in_background<U, F>(&self, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let context = self.inner.runtime.background().clone();
        self.then(&context, transform)
    }

    pub fn then_flat_in_background<U, F>(&self, transform: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Promise<U>> + Send + 'static,
    {
        let context = self.inner.runtime.background().clone();
        self.then_flat(&context, transform)
    }

    /// Drops the value, keeping only success or failure.
    pub fn as_void(&self) -> Promise<()> {
        self.then(&ExecutionContext::immediate(), |_| Ok(()))
    }

    /// Terminal result if settled, otherwise remembers `waker` for later.
    pub(crate) fn poll_result(&self, waker: &Waker) -> Option<Result<T>> {
        let mut slots = self.slots();
        let result = slots.state.terminal_result();
        if result.is_none() && !slots.wakers.iter().any(|w| w.will_wake(waker)) {
            slots.wakers.push(waker.clone());
        }
        result
    }
}

impl<T> PartialEq for Promise<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<T> Eq for Promise<T> {}

impl<T> Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.inner.slots.try_lock() {
            Ok(slots) => slots.state.name(),
            Err(_) => "locked",
        };
        f.debug_struct("Promise")
            .field("id", &self.inner.id)
            .field("state", &state)
            .finish()
    }
}

/// Rejects the promise with [`Error::Abandoned`] once the last handle of a
/// two-sided body goes away.
struct AbandonGuard<T: Clone + Send + 'static> {
    promise: Promise<T>,
}

impl<T: Clone + Send + 'static> Drop for AbandonGuard<T> {
    fn drop(&mut self) {
        if self.promise.reject(Error::Abandoned) {
            tracing::debug!("promise {} abandoned by its body", self.promise.id());
        }
    }
}

/// Success half handed to a promise body.
#[derive(Clone)]
pub struct Resolver<T: Clone + Send + 'static> {
    promise: Promise<T>,
    _guard: Option<Arc<AbandonGuard<T>>>,
}

impl<T: Clone + Send + 'static> Resolver<T> {
    pub fn resolve(self, value: T) -> bool {
        self.promise.resolve(value)
    }

    pub fn is_pending(&self) -> bool {
        self.promise.is_pending()
    }
}

/// Failure half handed to a two-sided promise body.
#[derive(Clone)]
pub struct Rejecter<T: Clone + Send + 'static> {
    promise: Promise<T>,
    _guard: Arc<AbandonGuard<T>>,
}

impl<T: Clone + Send + 'static> Rejecter<T> {
    pub fn reject(self, err: Error) -> bool {
        self.promise.reject(err)
    }

    pub fn is_pending(&self) -> bool {
        self.promise.is_pending()
    }
}

impl<T: Clone + Send + 'static> Debug for Resolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Resolver").field(&self.promise).finish()
    }
}

impl<T: Clone + Send + 'static> Debug for Rejecter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Rejecter").field(&self.promise).finish()
    }
}
