//! Concurrent evaluation runtime.
//!
//! The `InferenceEngine` evaluates one session synchronously on the calling
//! thread. Hosting services that screen many transactions at once can use
//! this small, bounded, thread-based runtime instead: the engine and its rule
//! catalogue are shared read-only, and every job gets its own session.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::{EngineError, EngineResult, ExecutionError};

use super::{Evaluation, InferenceEngine, InputFact};

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued evaluations.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1024,
        }
    }
}

enum Job {
    Evaluate {
        facts: Vec<(String, InputFact)>,
        reply: Sender<EngineResult<Evaluation>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

/// Handle returned by [`EvaluationRuntime::submit`].
pub struct EvaluationHandle {
    rx: Receiver<EngineResult<Evaluation>>,
}

impl EvaluationHandle {
    /// Waits for the evaluation to complete.
    ///
    /// # Errors
    ///
    /// Returns the evaluation's own error, or `ExecutionError::Disconnected`
    /// if the worker went away without replying.
    pub fn join(self) -> EngineResult<Evaluation> {
        self.rx
            .recv()
            .map_err(|_| EngineError::Execution(ExecutionError::Disconnected))?
    }

    /// Waits for the evaluation to complete with a timeout.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::Timeout` if no result arrives in time, plus
    /// everything [`EvaluationHandle::join`] returns.
    pub fn join_timeout(self, timeout: Duration) -> EngineResult<Evaluation> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            crossbeam_channel::RecvTimeoutError::Timeout => {
                EngineError::Execution(ExecutionError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
            crossbeam_channel::RecvTimeoutError::Disconnected => {
                EngineError::Execution(ExecutionError::Disconnected)
            }
        })?
    }
}

/// Bounded worker pool evaluating independent sessions.
pub struct EvaluationRuntime {
    engine: Arc<InferenceEngine>,
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl EvaluationRuntime {
    /// Starts the worker threads.
    ///
    /// Zero workers or capacity are raised to one.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a worker thread cannot be spawned.
    pub fn new(engine: InferenceEngine, config: RuntimeConfig) -> EngineResult<Self> {
        let engine = Arc::new(engine);
        let workers = config.workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let engine = Arc::clone(&engine);
            let handle = thread::Builder::new()
                .name(format!("riskchain-eval-{idx}"))
                .spawn(move || worker_loop(&engine, &rx))
                .map_err(|e| EngineError::internal(format!("failed to spawn worker: {e}")))?;
            handles.push(handle);
        }
        tracing::info!(workers, queue_capacity, "evaluation runtime started");

        Ok(Self {
            engine,
            tx: Some(tx),
            workers: handles,
            queue_capacity,
        })
    }

    /// Queues an evaluation of the given input facts.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::QueueFull` when the queue is at capacity and
    /// `ExecutionError::Disconnected` after shutdown.
    pub fn submit<I, K, V>(&self, facts: I) -> EngineResult<EvaluationHandle>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<InputFact>,
    {
        let facts: Vec<(String, InputFact)> = facts
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let (reply, rx) = bounded::<EngineResult<Evaluation>>(1);
        self.try_submit(Job::Evaluate { facts, reply })?;
        Ok(EvaluationHandle { rx })
    }

    /// Evaluates synchronously on a worker thread.
    ///
    /// # Errors
    ///
    /// See [`EvaluationRuntime::submit`] and [`EvaluationHandle::join`].
    pub fn evaluate<I, K, V>(&self, facts: I) -> EngineResult<Evaluation>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<InputFact>,
    {
        self.submit(facts)?.join()
    }

    /// Returns the shared engine.
    #[must_use]
    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    fn try_submit(&self, job: Job) -> EngineResult<()> {
        let Some(tx) = &self.tx else {
            return Err(ExecutionError::Disconnected.into());
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExecutionError::QueueFull {
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected.into()),
        }
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> EngineResult<Receiver<()>> {
        let (reply, rx) = bounded::<()>(1);
        self.try_submit(Job::Sleep { duration, reply })?;
        Ok(rx)
    }
}

fn worker_loop(engine: &InferenceEngine, rx: &Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Evaluate { facts, reply } => {
                let result = engine.evaluate(facts);
                let _ = reply.send(result);
            }

            #[cfg(test)]
            Job::Sleep { duration, reply } => {
                thread::sleep(duration);
                let _ = reply.send(());
            }
        }
    }
}

impl Drop for EvaluationRuntime {
    fn drop(&mut self) {
        // Closing the channel lets workers drain queued jobs, then exit.
        self.tx = None;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
