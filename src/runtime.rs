use crate::context::{ExecutionContext, WorkerPool};

/// Knobs for the executors a default [`Runtime`] builds.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Threads in the background pool. Zero means "available parallelism".
    pub background_threads: usize,
    /// Prefix for the names of spawned threads.
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            background_threads: 0,
            thread_name: "promise".to_owned(),
        }
    }
}

impl RuntimeConfig {
    fn resolved_background_threads(&self) -> usize {
        if self.background_threads > 0 {
            return self.background_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

/// The pair of contexts promises fall back to when a call site names none.
///
/// This is a plain value passed to constructors, so tests can hand in
/// [`Runtime::immediate`] or a [`ManualQueue`](crate::ManualQueue) instead.
#[derive(Debug, Clone)]
pub struct Runtime {
    primary: ExecutionContext,
    background: ExecutionContext,
}

impl Runtime {
    pub fn new(primary: ExecutionContext, background: ExecutionContext) -> Self {
        Self {
            primary,
            background,
        }
    }

    /// Serial primary queue plus a background pool, both spawned from `config`.
    pub fn with_config(config: &RuntimeConfig) -> std::io::Result<Self> {
        let primary = WorkerPool::serial(&format!("{}-primary", config.thread_name))?;
        let background = WorkerPool::new(
            config.resolved_background_threads(),
            &format!("{}-background", config.thread_name),
        )?;
        tracing::debug!(
            "runtime started with {} background threads",
            background.workers()
        );
        Ok(Self::new(
            ExecutionContext::new(primary),
            ExecutionContext::new(background),
        ))
    }

    /// Everything runs inline on the calling thread.
    pub fn immediate() -> Self {
        let ctx = ExecutionContext::immediate();
        Self::new(ctx.clone(), ctx)
    }

    /// Both contexts share one executor.
    pub fn single(ctx: ExecutionContext) -> Self {
        Self::new(ctx.clone(), ctx)
    }

    pub fn primary(&self) -> &ExecutionContext {
        &self.primary
    }

    pub fn background(&self) -> &ExecutionContext {
        &self.background
    }
}

impl Default for Runtime {
    /// Falls back to [`Runtime::immediate`] if threads cannot be spawned.
    fn default() -> Self {
        Self::with_config(&RuntimeConfig::default()).unwrap_or_else(|err| {
            tracing::error!("failed to spawn runtime threads: {}", err);
            Self::immediate()
        })
    }
}
