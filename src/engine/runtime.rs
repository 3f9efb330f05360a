//! Concurrent request handling.
//!
//! A reaction runs single-threaded, but independent requests have no ordering
//! between them. `SyncRuntime` runs a bounded pool of worker threads over a
//! shared [`SyncEngine`] so several reactions can proceed at once.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendError, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, SyncError, SyncResult, ValidationError};

use super::{InboundRequest, Reaction, RequestId, SyncEngine};

const QUEUE: &str = "runtime";

/// `[runtime]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued requests.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Rejects a zero worker count or queue capacity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workers == 0 || self.queue_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "runtime.workers and runtime.queue_capacity must be positive".to_string(),
            });
        }
        Ok(())
    }
}

enum Job {
    Handle {
        request: InboundRequest,
        reply: Sender<SyncResult<Reaction>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

/// Handle returned by [`SyncRuntime::submit`].
#[derive(Debug)]
pub struct ReactionHandle {
    request: RequestId,
    rx: Receiver<SyncResult<Reaction>>,
}

impl ReactionHandle {
    #[must_use]
    pub fn request(&self) -> &RequestId {
        &self.request
    }

    /// Waits for the reaction to complete.
    pub fn join(self) -> SyncResult<Reaction> {
        self.rx.recv().map_err(|_| disconnected())?
    }

    /// Waits for the reaction with a timeout.
    pub fn join_timeout(self, timeout: Duration) -> SyncResult<Reaction> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => SyncError::from(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => disconnected(),
        })?
    }
}

fn disconnected() -> SyncError {
    ExecutionError::Disconnected {
        path: QUEUE.to_string(),
    }
    .into()
}

/// A pool of worker threads handling requests against one engine.
///
/// Dropping the runtime closes the queue; queued requests are drained and
/// the workers joined.
#[derive(Debug)]
pub struct SyncRuntime {
    engine: SyncEngine,
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl SyncRuntime {
    /// Starts `config.workers` threads.
    pub fn start(engine: SyncEngine, config: &RuntimeConfig) -> SyncResult<Self> {
        config.validate()?;
        let (tx, rx) = bounded::<Job>(config.queue_capacity);

        let mut runtime = Self {
            engine,
            tx: Some(tx),
            workers: Vec::with_capacity(config.workers),
            queue_capacity: config.queue_capacity,
        };
        for idx in 0..config.workers {
            let rx: Receiver<Job> = rx.clone();
            let engine = runtime.engine.clone();
            let handle = thread::Builder::new()
                .name(format!("conceptsync-{idx}"))
                .spawn(move || worker_loop(&engine, &rx))
                .map_err(|e| ExecutionError::WorkerSpawn { reason: e.to_string() })?;
            runtime.workers.push(handle);
        }
        tracing::debug!(workers = config.workers, queue = config.queue_capacity, "runtime started");
        Ok(runtime)
    }

    /// Queues a request, blocking while the queue is full.
    pub fn submit(&self, request: InboundRequest) -> SyncResult<ReactionHandle> {
        let (job, handle) = job_for(request);
        self.sender()?.send(job).map_err(|SendError(_)| disconnected())?;
        Ok(handle)
    }

    /// Queues a request, failing with [`ExecutionError::Overloaded`] when
    /// the queue is full.
    pub fn try_submit(&self, request: InboundRequest) -> SyncResult<ReactionHandle> {
        let (job, handle) = job_for(request);
        self.try_send(job)?;
        Ok(handle)
    }

    /// Handles a request on a worker and waits for the reaction.
    pub fn handle(&self, request: InboundRequest) -> SyncResult<Reaction> {
        self.submit(request)?.join()
    }

    /// Like [`SyncRuntime::handle`], but fails fast on a full queue.
    pub fn try_handle(&self, request: InboundRequest) -> SyncResult<Reaction> {
        self.try_submit(request)?.join()
    }

    /// Handles a request, giving up waiting after `timeout`. The reaction
    /// itself still runs to completion on its worker.
    pub fn handle_timeout(&self, request: InboundRequest, timeout: Duration) -> SyncResult<Reaction> {
        self.submit(request)?.join_timeout(timeout)
    }

    #[must_use]
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    fn sender(&self) -> SyncResult<&Sender<Job>> {
        self.tx.as_ref().ok_or_else(disconnected)
    }

    fn try_send(&self, job: Job) -> SyncResult<()> {
        match self.sender()?.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExecutionError::Overloaded {
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(disconnected()),
        }
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> SyncResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.try_send(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

fn job_for(request: InboundRequest) -> (Job, ReactionHandle) {
    let (tx, rx) = bounded::<SyncResult<Reaction>>(1);
    let handle = ReactionHandle {
        request: request.id.clone(),
        rx,
    };
    (Job::Handle { request, reply: tx }, handle)
}

fn worker_loop(engine: &SyncEngine, rx: &Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Handle { request, reply } => {
                let result = engine.handle(request);
                if let Err(err) = &result {
                    tracing::warn!(error = %err, "reaction failed");
                }
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

impl Drop for SyncRuntime {
    fn drop(&mut self) {
        // Closing the channel lets workers drain queued jobs and exit.
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionRef, Outcome};
    use crate::concept::{Concept, ConceptRegistry};
    use crate::engine::request::respond_action;
    use crate::pattern::{vars, ActionPattern, Template};
    use crate::rule::{RuleSet, SyncRule};
    use crate::value::{Record, Value};

    struct Clock;

    impl Concept for Clock {
        fn name(&self) -> &str {
            "Clock"
        }

        fn perform(&self, _action: &str, _input: &Record) -> SyncResult<Outcome> {
            Ok(Outcome::success([("tick", 1)]))
        }

        fn query(&self, _query: &str, _input: &Record) -> SyncResult<Vec<Record>> {
            Ok(Vec::new())
        }
    }

    fn engine() -> SyncEngine {
        let [req, tick] = vars(["request", "tick"]);
        let request = ActionPattern::success(
            crate::engine::request::request_action(),
            Template::new().lit("path", "/tick"),
            Template::of(&[&req]),
        );
        let rules = RuleSet::from_rules([
            SyncRule::builder("TickRequest")
                .when(request.clone())
                .then(ActionRef::new("Clock", "tick"), Template::new())
                .build()
                .unwrap(),
            SyncRule::builder("TickResponse")
                .when(request)
                .when(ActionPattern::success(ActionRef::new("Clock", "tick"), Template::new(), Template::of(&[&tick])))
                .then(respond_action(), Template::of(&[&req, &tick]))
                .build()
                .unwrap(),
        ])
        .unwrap();
        SyncEngine::new(ConceptRegistry::new().with(Clock).unwrap(), rules)
    }

    #[test]
    fn test_runtime_handles_concurrent_requests() {
        let runtime = SyncRuntime::start(engine(), &RuntimeConfig::default()).unwrap();
        let handles: Vec<_> = (0..16)
            .map(|_| runtime.submit(InboundRequest::new("/tick")).unwrap())
            .collect();
        for handle in handles {
            let id = handle.request().clone();
            let reaction = handle.join().unwrap();
            assert_eq!(reaction.request, id);
            assert_eq!(reaction.response.get("tick"), Some(&Value::Int(1)));
        }
        // Three records per request, one shared log.
        assert_eq!(runtime.engine().log().len().unwrap(), 48);
    }

    #[test]
    fn test_full_queue_is_overloaded() {
        let runtime = SyncRuntime::start(
            engine(),
            &RuntimeConfig {
                workers: 1,
                queue_capacity: 1,
            },
        )
        .unwrap();

        let busy = runtime.submit_sleep(Duration::from_millis(200)).unwrap();
        // Wait until the worker has taken the sleep job so the queue slot is free.
        thread::sleep(Duration::from_millis(50));
        let queued = runtime.try_submit(InboundRequest::new("/tick")).unwrap();
        let err = runtime.try_handle(InboundRequest::new("/tick")).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Execution(ExecutionError::Overloaded { capacity: 1 })
        ));
        assert!(err.is_retryable());

        busy.recv().unwrap();
        assert!(!queued.join().unwrap().is_error());
    }

    #[test]
    fn test_join_timeout() {
        let runtime = SyncRuntime::start(
            engine(),
            &RuntimeConfig {
                workers: 1,
                queue_capacity: 4,
            },
        )
        .unwrap();
        let _busy = runtime.submit_sleep(Duration::from_millis(300)).unwrap();
        let err = runtime
            .handle_timeout(InboundRequest::new("/tick"), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Execution(ExecutionError::Timeout { duration_ms: 20 })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = SyncRuntime::start(
            engine(),
            &RuntimeConfig {
                workers: 0,
                queue_capacity: 1,
            },
        )
        .unwrap_err();
        assert!(err.is_validation());
    }
}
