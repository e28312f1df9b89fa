//! Bounded worker pool running independent rule sessions.
//!
//! Each job runs on one worker against its own knowledge base instance and
//! data context, so sessions never share mutable state. The queue is
//! bounded; a full queue rejects new work instead of blocking the caller.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::DataContext;
use crate::error::{RuleError, RuleResult};
use crate::knowledge::{KnowledgeBase, KnowledgeLibrary};

use super::{EngineConfig, RuleEngine, RunReport};

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued sessions.
    pub queue_capacity: usize,
    pub engine: EngineConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            engine: EngineConfig::default(),
        }
    }
}

/// Where a session gets its knowledge base from.
enum Source {
    Library { name: String, version: String },
    Instance(Box<KnowledgeBase>),
}

enum Job {
    Run {
        source: Source,
        data: DataContext,
        reply: Sender<RuleResult<SessionOutcome>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

/// A finished session.
#[derive(Debug)]
pub struct SessionOutcome {
    pub knowledge_base: KnowledgeBase,
    pub data: DataContext,
    pub report: RunReport,
}

fn run_session(
    engine: &RuleEngine,
    library: &KnowledgeLibrary,
    source: Source,
    mut data: DataContext,
) -> RuleResult<SessionOutcome> {
    let mut kb = match source {
        Source::Library { name, version } => library.instance(&name, &version)?,
        Source::Instance(kb) => *kb,
    };
    let report = engine.execute_with_report(&mut data, Some(&mut kb))?;
    Ok(SessionOutcome {
        knowledge_base: kb,
        data,
        report,
    })
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(
        workers: usize,
        queue_capacity: usize,
        engine: &Arc<RuleEngine>,
        library: &Arc<KnowledgeLibrary>,
    ) -> RuleResult<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let engine = Arc::clone(engine);
            let library = Arc::clone(library);
            let handle = thread::Builder::new()
                .name(format!("salience-session-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Run { source, data, reply }) => {
                            let _ = reply.send(run_session(&engine, &library, source, data));
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .map_err(|e| RuleError::internal(format!("failed to spawn session worker: {e}")))?;
            handles.push(handle);
        }

        Ok(Self {
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    fn try_submit(&self, job: Job) -> RuleResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RuleError::QueueFull {
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(RuleError::Disconnected),
        }
    }

    fn shutdown(self) {
        // Closing the channel lets workers drain queued jobs, then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Handle to a submitted session.
#[derive(Debug)]
pub struct SessionHandle {
    rx: Receiver<RuleResult<SessionOutcome>>,
}

impl SessionHandle {
    /// Waits for the session to finish.
    pub fn join(self) -> RuleResult<SessionOutcome> {
        self.rx.recv().map_err(|_| RuleError::Disconnected)?
    }

    /// Waits for the session to finish, giving up after `timeout`.
    ///
    /// The session keeps running on its worker after a timeout.
    pub fn join_timeout(self, timeout: Duration) -> RuleResult<SessionOutcome> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => RuleError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => RuleError::Disconnected,
        })?
    }
}

/// Runs sessions concurrently over instances of a shared library.
pub struct SessionRuntime {
    library: Arc<KnowledgeLibrary>,
    engine: Arc<RuleEngine>,
    pool: Option<WorkerPool>,
}

impl SessionRuntime {
    /// Starts the worker threads.
    pub fn new(library: Arc<KnowledgeLibrary>, config: RuntimeConfig) -> RuleResult<Self> {
        Self::with_engine(library, RuleEngine::new(config.engine.clone()), &config)
    }

    /// Starts the worker threads around a configured engine, listeners
    /// included. `config.engine` is ignored.
    pub fn with_engine(
        library: Arc<KnowledgeLibrary>,
        engine: RuleEngine,
        config: &RuntimeConfig,
    ) -> RuleResult<Self> {
        let engine = Arc::new(engine);
        let pool = WorkerPool::start(config.workers, config.queue_capacity, &engine, &library)?;
        debug!(
            workers = pool.workers.len(),
            queue_capacity = pool.queue_capacity,
            "session runtime started"
        );
        Ok(Self {
            library,
            engine,
            pool: Some(pool),
        })
    }

    #[must_use]
    pub fn library(&self) -> &KnowledgeLibrary {
        &self.library
    }

    #[must_use]
    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    fn enqueue(&self, source: Source, data: DataContext) -> RuleResult<SessionHandle> {
        let pool = self.pool.as_ref().ok_or(RuleError::Disconnected)?;
        let (tx, rx) = bounded::<RuleResult<SessionOutcome>>(1);
        pool.try_submit(Job::Run {
            source,
            data,
            reply: tx,
        })?;
        Ok(SessionHandle { rx })
    }

    /// Runs a fresh instance of the library's `name`/`version` base.
    pub fn submit(&self, name: &str, version: &str, data: DataContext) -> RuleResult<SessionHandle> {
        self.enqueue(
            Source::Library {
                name: name.to_string(),
                version: version.to_string(),
            },
            data,
        )
    }

    /// Runs a caller-supplied instance.
    pub fn submit_instance(&self, kb: KnowledgeBase, data: DataContext) -> RuleResult<SessionHandle> {
        self.enqueue(Source::Instance(Box::new(kb)), data)
    }

    /// Submits and waits.
    pub fn run(&self, name: &str, version: &str, data: DataContext) -> RuleResult<SessionOutcome> {
        self.submit(name, version, data)?.join()
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> RuleResult<Receiver<()>> {
        let pool = self.pool.as_ref().ok_or(RuleError::Disconnected)?;
        let (tx, rx) = bounded::<()>(1);
        pool.try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl Drop for SessionRuntime {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Action, AssignOp, Expr, RuleDef};
    use crate::value::{MapKey, Value};

    fn library() -> Arc<KnowledgeLibrary> {
        let library = KnowledgeLibrary::new();
        let n = || Expr::var("C").field("N");
        library
            .add_rules(
                "Count",
                "1",
                &[RuleDef::new("Inc").when(n().lt(25)).then(Action::update(n(), AssignOp::Add, 1))],
            )
            .unwrap();
        Arc::new(library)
    }

    fn data(start: i64) -> DataContext {
        let mut data = DataContext::new();
        data.add("C", Value::Map(std::iter::once((MapKey::from("N"), Value::from(start))).collect()));
        data
    }

    #[test]
    fn test_sessions_run_independently() {
        let runtime = SessionRuntime::new(library(), RuntimeConfig::default()).unwrap();
        let handles: Vec<_> = (0..16).map(|i| runtime.submit("Count", "1", data(i)).unwrap()).collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let outcome = handle.join_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(outcome.data.get("C.N").unwrap().into_value(), Value::from(25_i64));
            assert_eq!(outcome.report.cycles, 25 - i as u64);
        }
    }

    #[test]
    fn test_missing_base_and_cycle_bound_propagate() {
        let config = RuntimeConfig {
            workers: 1,
            queue_capacity: 4,
            engine: EngineConfig::default().with_max_cycle(3),
        };
        let runtime = SessionRuntime::new(library(), config).unwrap();
        assert!(runtime.run("Nope", "1", data(0)).unwrap_err().is_configuration());
        assert!(runtime.run("Count", "1", data(0)).unwrap_err().is_cycle_bound());
    }

    #[test]
    fn test_full_queue_is_rejected() {
        let config = RuntimeConfig {
            workers: 1,
            queue_capacity: 1,
            engine: EngineConfig::default(),
        };
        let runtime = SessionRuntime::new(library(), config).unwrap();
        let busy = runtime.submit_sleep(Duration::from_millis(200)).unwrap();
        // Give the worker time to pick up the sleep so the queue is empty.
        thread::sleep(Duration::from_millis(50));
        let queued = runtime.submit("Count", "1", data(0)).unwrap();
        let err = runtime.submit("Count", "1", data(0)).unwrap_err();
        assert_eq!(err, RuleError::QueueFull { capacity: 1 });
        busy.recv_timeout(Duration::from_secs(1)).unwrap();
        queued.join().unwrap();
    }

    #[test]
    fn test_join_timeout_and_disconnect() {
        let runtime = SessionRuntime::new(library(), RuntimeConfig::default()).unwrap();
        let _busy = runtime.submit_sleep(Duration::from_millis(100)).unwrap();
        let (_tx, rx) = bounded::<RuleResult<SessionOutcome>>(1);
        let handle = SessionHandle { rx };
        let err = handle.join_timeout(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, RuleError::Timeout { duration_ms: 10 });

        let (tx, rx) = bounded::<RuleResult<SessionOutcome>>(1);
        drop(tx);
        let handle = SessionHandle { rx };
        assert_eq!(handle.join().unwrap_err(), RuleError::Disconnected);
    }
}
