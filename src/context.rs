//! Execution contexts decide where and when promise callbacks run.
//!
//! The core only needs two things from a context: "run this later" and, for
//! the designated immediate context, "run this now". [`Executor`] is the seam
//! applications implement; a few ready-made executors live here as well.
use std::collections::VecDeque;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    mpsc::{channel, Receiver, Sender},
    Arc, Mutex, PoisonError,
};
use std::thread;

/// Unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync + 'static {
    /// Queue `job` for later execution on whatever thread the executor owns.
    fn execute(&self, job: Job);

    /// An immediate executor runs dispatched work synchronously in place.
    fn is_immediate(&self) -> bool {
        false
    }
}

/// Shared handle to an [`Executor`].
#[derive(Clone)]
pub struct ExecutionContext {
    executor: Arc<dyn Executor>,
}

impl ExecutionContext {
    pub fn new<E: Executor>(executor: E) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    pub fn from_arc(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    pub fn immediate() -> Self {
        Self::new(Immediate)
    }

    pub fn is_immediate(&self) -> bool {
        self.executor.is_immediate()
    }

    /// Always goes through the executor, even for the immediate context.
    pub fn schedule_async<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.executor.execute(Box::new(job));
    }

    /// Runs `job` inline on the immediate context, schedules it otherwise.
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_immediate() {
            job()
        } else {
            tracing::trace!("scheduling job");
            self.schedule_async(job)
        }
    }

    pub fn same_as(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.executor, &other.executor)
    }
}

impl Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("immediate", &self.is_immediate())
            .finish()
    }
}

impl<E: Executor> From<Arc<E>> for ExecutionContext {
    fn from(executor: Arc<E>) -> Self {
        Self { executor }
    }
}

/// Runs every job on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Executor for Immediate {
    fn execute(&self, job: Job) {
        job()
    }

    fn is_immediate(&self) -> bool {
        true
    }
}

fn run_job(job: Job) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
        let err = crate::Error::from_panic(payload);
        tracing::error!("job panicked on execution context: {}", err);
    }
}

/// Fixed set of named threads pulling jobs off one channel.
///
/// With a single worker, jobs run one at a time in submission order, which is
/// what the primary context of a [`Runtime`](crate::Runtime) uses.
#[derive(Debug)]
pub struct WorkerPool {
    sender: Mutex<Sender<Job>>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize, name: &str) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let (tx, rx) = channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        for id in 0..workers {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || worker_loop(rx))?;
        }
        tracing::debug!("started worker pool {} with {} threads", name, workers);
        Ok(Self {
            sender: Mutex::new(tx),
            workers,
        })
    }

    /// One worker: a serial FIFO queue.
    pub fn serial(name: &str) -> std::io::Result<Self> {
        Self::new(1, name)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

// Exits once every sender is gone, i.e. when the pool is dropped.
fn worker_loop(rx: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let next = rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
        match next {
            Ok(job) => run_job(job),
            Err(_) => break,
        }
    }
    tracing::debug!(
        "worker {:?} shutting down",
        thread::current().name().unwrap_or("unnamed")
    );
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) {
        let sent = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(job);
        if let Err(err) = sent {
            tracing::error!("worker pool has no live workers, running job inline");
            run_job(err.0);
        }
    }
}

/// Holds jobs until [`ManualQueue::run_pending`] is called. Handy whenever
/// the exact moment a callback runs matters, tests in particular.
#[derive(Default)]
pub struct ManualQueue {
    jobs: Mutex<VecDeque<Job>>,
}

impl ManualQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the oldest queued job, if any.
    pub fn run_one(&self) -> bool {
        let job = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match job {
            Some(job) => {
                run_job(job);
                true
            }
            None => false,
        }
    }

    /// Runs queued jobs, including ones queued while running, until the queue
    /// is empty. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl Debug for ManualQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualQueue")
            .field("queued", &self.len())
            .finish()
    }
}

impl Executor for ManualQueue {
    fn execute(&self, job: Job) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionContext, ManualQueue, WorkerPool};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::channel,
        Arc,
    };
    use std::time::Duration;

    #[test]
    fn test_immediate_dispatch_runs_inline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let ctx = ExecutionContext::immediate();
        let h = hits.clone();
        ctx.dispatch(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_queue_defers_until_run() {
        let queue = ManualQueue::new();
        let ctx = ExecutionContext::from(queue.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let inner_ctx = ctx.clone();
        ctx.dispatch(move || {
            h.fetch_add(1, Ordering::SeqCst);
            let h = h.clone();
            inner_ctx.dispatch(move || {
                h.fetch_add(10, Ordering::SeqCst);
            });
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.run_pending(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 11);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_serial_pool_keeps_order() {
        let ctx = ExecutionContext::new(WorkerPool::serial("test-serial").unwrap());
        let (tx, rx) = channel();
        for i in 0..32 {
            let tx = tx.clone();
            ctx.schedule_async(move || tx.send(i).unwrap());
        }
        let got: Vec<i32> = (0..32)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(got, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_pool_survives_panicking_job() {
        let ctx = ExecutionContext::new(WorkerPool::new(1, "test-panic").unwrap());
        let (tx, rx) = channel();
        ctx.schedule_async(|| panic!("💥"));
        ctx.schedule_async(move || tx.send("🍓").unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "🍓");
    }
}
