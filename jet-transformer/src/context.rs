use anyhow::{Context, Result};
use rand::RngCore;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// Compute context threaded through every forward pass.
///
/// Resolved once by the caller; the core never picks a pool on its own.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pool: Option<Arc<ThreadPool>>,
}

impl ExecutionContext {
    /// Runs on rayon's global pool.
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// Runs on a dedicated pool with `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|idx| format!("jet-compute-{idx}"))
            .build()
            .with_context(|| format!("Failed to build thread pool with {num_threads} threads"))?;

        Ok(Self { pool: Some(Arc::new(pool)) })
    }

    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Executes `op` inside this context's pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("dedicated_pool", &self.pool.is_some())
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

/// Selects inference or training behaviour of regularization layers.
pub enum ForwardMode<'a> {
    /// Dropout is the identity.
    Eval,
    /// Dropout is active and draws its masks from the given source.
    Train(&'a mut (dyn RngCore + Send)),
}

impl std::fmt::Debug for ForwardMode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardMode::Eval => f.write_str("Eval"),
            ForwardMode::Train(_) => f.write_str("Train"),
        }
    }
}
