//! Procedure runtime: bounded-population task management
//!
//! Every admitted execution runs as a tokio task. DSL procedures are detached
//! from the store before the task is spawned, so store mutation never reaches
//! a running execution. Native bodies run on the blocking pool. The running
//! set is a plain vector with swap-remove; its order carries no meaning.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::analyze::{AnalysisSession, Analyzer, CallGraphAnalyzer};
use crate::config::{ProcConfig, RuntimeConfig};
use crate::interp::{ExecStatus, Interpreter, LocalInterpreter, ParamTable};
use crate::proc::Procedure;
use crate::slot::Slot;
use crate::store::{CompiledProc, Lookup, ProcStore, StoreError};

/// Handle of one admitted execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecId(u64);

impl ExecId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The running set is full. Retry once something finishes.
    AtCapacity { max: usize },
    SlotEmpty { slot: Slot },
    Store(StoreError),
    /// The scheduler could not be created.
    Spawn(String),
    /// The running-set mutex was poisoned.
    Lock,
    /// `stop_all` gave up with executions still registered.
    TeardownCeiling { attempts: usize },
    /// The scheduler has already been torn down.
    ShutDown,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::AtCapacity { max } => write!(f, "runtime is at capacity ({} running)", max),
            RuntimeError::SlotEmpty { slot } => write!(f, "slot {} holds no procedure", slot),
            RuntimeError::Store(err) => write!(f, "{}", err),
            RuntimeError::Spawn(msg) => write!(f, "failed to start scheduler: {}", msg),
            RuntimeError::Lock => write!(f, "running set lock is poisoned"),
            RuntimeError::TeardownCeiling { attempts } => {
                write!(f, "executions still running after {} stop attempts", attempts)
            }
            RuntimeError::ShutDown => write!(f, "runtime has shut down"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<StoreError> for RuntimeError {
    fn from(value: StoreError) -> Self {
        RuntimeError::Store(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The procedure ran; the status may still report a failure.
    Completed(ExecStatus),
    /// Analysis rejected the procedure before any instruction ran.
    AnalysisFailed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRecord {
    pub id: ExecId,
    pub slot: Slot,
    pub outcome: ExecOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcKind {
    Compiled,
    Dsl,
}

/// Snapshot of one running-set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningExec {
    pub id: ExecId,
    pub slot: Slot,
    pub kind: ProcKind,
}

/// Runtime statistics
#[derive(Debug, Clone)]
pub struct RuntimeStats {
    pub running: usize,
    pub max_concurrent: usize,
    pub launched: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub rejected: u64,
    /// Detached procedure copies not yet released.
    pub live_detached: usize,
    pub is_multi_threaded: bool,
}

/// Private copy of a DSL procedure owned by one execution.
#[derive(Debug)]
struct Detached {
    proc: Arc<Procedure>,
    live: Arc<AtomicUsize>,
}

impl Detached {
    fn new(proc: Procedure, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            proc: Arc::new(proc),
            live: Arc::clone(live),
        }
    }
}

impl Drop for Detached {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Compiled(CompiledProc),
    Dsl(Arc<Detached>),
}

impl Payload {
    fn kind(&self) -> ProcKind {
        match self {
            Payload::Compiled(_) => ProcKind::Compiled,
            Payload::Dsl(_) => ProcKind::Dsl,
        }
    }
}

#[derive(Debug)]
struct RunningEntry {
    id: ExecId,
    slot: Slot,
    payload: Payload,
    handle: JoinHandle<ExecOutcome>,
}

/// State shared between the runtime and the tasks it spawns.
#[derive(Debug)]
struct Shared {
    running: Mutex<Vec<RunningEntry>>,
    history: Mutex<VecDeque<ExecRecord>>,
    history_len: usize,
    launched: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    live_detached: Arc<AtomicUsize>,
}

impl Shared {
    fn new(history_len: usize) -> Self {
        Self {
            running: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(history_len)),
            history_len,
            launched: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            live_detached: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock_running(&self) -> Result<MutexGuard<'_, Vec<RunningEntry>>, RuntimeError> {
        self.running.lock().map_err(|_| RuntimeError::Lock)
    }

    /// Remove the entry for `id` if it is still registered. Only the caller
    /// that gets `Some` may record the outcome.
    fn claim(&self, id: ExecId) -> Option<RunningEntry> {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let index = running.iter().position(|entry| entry.id == id)?;
        Some(running.swap_remove(index))
    }

    /// Deregister a self-completed execution. The entry and its detached copy
    /// are released before the running set is unlocked.
    fn finish(&self, id: ExecId, outcome: &ExecOutcome) {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(index) = running.iter().position(|entry| entry.id == id) {
            let entry = running.swap_remove(index);
            self.record(entry.id, entry.slot, outcome.clone());
            drop(entry);
        }
    }

    fn record(&self, id: ExecId, slot: Slot, outcome: ExecOutcome) {
        match &outcome {
            ExecOutcome::Cancelled => self.cancelled.fetch_add(1, Ordering::Relaxed),
            _ => self.completed.fetch_add(1, Ordering::Relaxed),
        };
        debug!(target: "procrt::runtime", id = %id, slot, outcome = ?outcome, "execution finished");

        if self.history_len == 0 {
            return;
        }
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if history.len() == self.history_len {
            history.pop_front();
        }
        history.push_back(ExecRecord { id, slot, outcome });
    }
}

/// Body of every spawned execution.
async fn execute(
    shared: Arc<Shared>,
    analyzer: Arc<dyn Analyzer>,
    interpreter: Arc<dyn Interpreter>,
    id: ExecId,
    slot: Slot,
    payload: Payload,
) -> ExecOutcome {
    let outcome = match &payload {
        Payload::Compiled(proc) => ExecOutcome::Completed(ExecStatus(proc.call_blocking().await)),
        Payload::Dsl(detached) => {
            let mut session = AnalysisSession::new();
            match analyzer.analyze(slot, Arc::clone(&detached.proc), &mut session) {
                Ok(analysis) => ExecOutcome::Completed(interpreter.execute(&detached.proc, &analysis).await),
                Err(err) => {
                    warn!(target: "procrt::runtime", id = %id, slot, error = %err, "analysis failed");
                    ExecOutcome::AnalysisFailed(err.to_string())
                }
            }
        }
    };

    drop(payload);
    // A concurrent `stop` may already own the entry; it records the outcome then.
    shared.finish(id, &outcome);
    outcome
}

/// Bounded-population executor for stored procedures.
pub struct ProcRuntime {
    config: RuntimeConfig,
    store: Arc<ProcStore>,
    analyzer: Arc<dyn Analyzer>,
    interpreter: Arc<dyn Interpreter>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    scheduler: Option<Scheduler>,
}

impl ProcRuntime {
    pub fn new(
        config: RuntimeConfig,
        store: Arc<ProcStore>,
        analyzer: Arc<dyn Analyzer>,
        interpreter: Arc<dyn Interpreter>,
    ) -> Result<Self, RuntimeError> {
        let scheduler = create_scheduler(config.single_thread)?;
        debug!(
            target: "procrt::runtime",
            max_concurrent = config.max_concurrent,
            single_thread = config.single_thread,
            "runtime started"
        );
        Ok(Self {
            shared: Arc::new(Shared::new(config.history_len)),
            config,
            store,
            analyzer,
            interpreter,
            next_id: AtomicU64::new(1),
            scheduler: Some(scheduler),
        })
    }

    /// Runtime wired to a [`CallGraphAnalyzer`] and a [`LocalInterpreter`].
    pub fn with_local(config: &ProcConfig, store: Arc<ProcStore>, params: Arc<dyn ParamTable>) -> Result<Self, RuntimeError> {
        let analyzer = Arc::new(CallGraphAnalyzer::new(Arc::clone(&store)));
        let interpreter = Arc::new(LocalInterpreter::new(config.interp.clone(), params));
        Self::new(config.runtime.clone(), store, analyzer, interpreter)
    }

    pub fn store(&self) -> &Arc<ProcStore> {
        &self.store
    }

    fn scheduler(&self) -> Result<&Handle, RuntimeError> {
        self.scheduler.as_ref().map(Scheduler::handle).ok_or(RuntimeError::ShutDown)
    }

    fn reject(&self, slot: Slot) -> RuntimeError {
        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "procrt::runtime",
            slot,
            max = self.config.max_concurrent,
            "run rejected at capacity"
        );
        RuntimeError::AtCapacity {
            max: self.config.max_concurrent,
        }
    }

    /// Admit and launch the procedure in `slot`.
    ///
    /// Never queues: a full running set is rejected immediately.
    pub fn run(&self, slot: Slot) -> Result<ExecId, RuntimeError> {
        let max = self.config.max_concurrent;
        if self.shared.lock_running()?.len() >= max {
            return Err(self.reject(slot));
        }

        let payload = match self.store.get(slot)? {
            Lookup::Empty => return Err(RuntimeError::SlotEmpty { slot }),
            Lookup::Compiled(proc) => Payload::Compiled(proc),
            Lookup::Dsl(proc) => Payload::Dsl(Arc::new(Detached::new(proc, &self.shared.live_detached))),
        };

        let scheduler = self.scheduler()?;
        // Held across spawn so the task cannot deregister before it is registered.
        let mut running = self.shared.lock_running()?;
        if running.len() >= max {
            return Err(self.reject(slot));
        }

        let id = ExecId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = scheduler.spawn(execute(
            Arc::clone(&self.shared),
            Arc::clone(&self.analyzer),
            Arc::clone(&self.interpreter),
            id,
            slot,
            payload.clone(),
        ));
        let kind = payload.kind();
        running.push(RunningEntry {
            id,
            slot,
            payload,
            handle,
        });
        self.shared.launched.fetch_add(1, Ordering::Relaxed);
        debug!(target: "procrt::runtime", id = %id, slot, kind = ?kind, "execution launched");
        Ok(id)
    }

    /// Cancel one execution and wait until its task is gone.
    ///
    /// Returns `false` when `id` is not running. Must not be called from
    /// inside an async context. A native body cannot be interrupted: the
    /// execution is recorded as cancelled right away and the body finishes
    /// on its blocking thread.
    pub fn stop(&self, id: ExecId) -> Result<bool, RuntimeError> {
        let scheduler = self.scheduler()?;
        let Some(entry) = self.shared.claim(id) else {
            return Ok(false);
        };

        entry.handle.abort();
        let outcome = match scheduler.block_on(entry.handle) {
            // Finished before the abort landed; it found its entry gone and left recording to us.
            Ok(outcome) => outcome,
            Err(_) => ExecOutcome::Cancelled,
        };
        self.shared.record(entry.id, entry.slot, outcome);
        debug!(target: "procrt::runtime", id = %id, "execution stopped");
        Ok(true)
    }

    /// Stop executions until the running set is empty, returning how many were stopped.
    pub fn stop_all(&self) -> Result<usize, RuntimeError> {
        let attempts = self.config.stop_all_retry_limit;
        let mut stopped = 0;
        for _ in 0..attempts {
            let first = match self.shared.lock_running()?.first() {
                Some(entry) => entry.id,
                None => return Ok(stopped),
            };
            if self.stop(first)? {
                stopped += 1;
            }
        }

        if self.shared.lock_running()?.is_empty() {
            Ok(stopped)
        } else {
            warn!(target: "procrt::runtime", attempts, "stop_all gave up");
            Err(RuntimeError::TeardownCeiling { attempts })
        }
    }

    /// Wait until nothing is running. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> Result<bool, RuntimeError> {
        let deadline = Instant::now() + timeout;
        let shared = Arc::clone(&self.shared);
        self.scheduler()?.block_on(async move {
            loop {
                if shared.lock_running()?.is_empty() {
                    return Ok::<bool, RuntimeError>(true);
                }
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    }

    pub fn running(&self) -> Result<Vec<RunningExec>, RuntimeError> {
        let running = self.shared.lock_running()?;
        Ok(running
            .iter()
            .map(|entry| RunningExec {
                id: entry.id,
                slot: entry.slot,
                kind: entry.payload.kind(),
            })
            .collect())
    }

    /// Finished executions, oldest first.
    pub fn history(&self) -> Vec<ExecRecord> {
        match self.shared.history.lock() {
            Ok(history) => history.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn stats(&self) -> Result<RuntimeStats, RuntimeError> {
        let running = self.shared.lock_running()?.len();
        Ok(RuntimeStats {
            running,
            max_concurrent: self.config.max_concurrent,
            launched: self.shared.launched.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            cancelled: self.shared.cancelled.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            live_detached: self.shared.live_detached.load(Ordering::SeqCst),
            is_multi_threaded: self.scheduler.as_ref().is_some_and(Scheduler::is_multi_threaded),
        })
    }

    /// Stop every execution and release the scheduler.
    ///
    /// Later calls report [`RuntimeError::ShutDown`]. Inside an async context
    /// executions are aborted without waiting and still recorded as cancelled.
    pub fn shutdown(&mut self) {
        if self.scheduler.is_none() {
            return;
        }

        if Handle::try_current().is_ok() {
            let drained: Vec<RunningEntry> = match self.shared.running.lock() {
                Ok(mut running) => running.drain(..).collect(),
                Err(poisoned) => poisoned.into_inner().drain(..).collect(),
            };
            for entry in drained {
                entry.handle.abort();
                self.shared.record(entry.id, entry.slot, ExecOutcome::Cancelled);
            }
        } else if let Err(err) = self.stop_all() {
            warn!(target: "procrt::runtime", error = %err, "teardown incomplete");
        }

        if let Some(scheduler) = self.scheduler.take() {
            drop_scheduler(scheduler);
        }
        debug!(target: "procrt::runtime", "runtime shut down");
    }
}

impl Drop for ProcRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// How long teardown waits for native bodies still holding blocking threads.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Tokio scheduler owned by one runtime.
///
/// A current-thread runtime only polls tasks inside `block_on`, so it gets a
/// driver thread that blocks on it until shutdown.
struct Scheduler {
    handle: Handle,
    owner: SchedulerOwner,
}

enum SchedulerOwner {
    Pool(tokio::runtime::Runtime),
    Driver {
        shutdown: oneshot::Sender<()>,
        thread: std::thread::JoinHandle<()>,
    },
}

impl Scheduler {
    fn pool(runtime: tokio::runtime::Runtime) -> Self {
        Self {
            handle: runtime.handle().clone(),
            owner: SchedulerOwner::Pool(runtime),
        }
    }

    fn driven(runtime: tokio::runtime::Runtime) -> Result<Self, RuntimeError> {
        let handle = runtime.handle().clone();
        let (shutdown, signal) = oneshot::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("procrt-scheduler".into())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = signal.await;
                });
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
            })
            .map_err(|e| RuntimeError::Spawn(format!("scheduler thread: {}", e)))?;
        Ok(Self {
            handle,
            owner: SchedulerOwner::Driver { shutdown, thread },
        })
    }

    fn handle(&self) -> &Handle {
        &self.handle
    }

    fn is_multi_threaded(&self) -> bool {
        matches!(self.handle.runtime_flavor(), RuntimeFlavor::MultiThread)
    }

    /// Blocks; never call from inside an async context.
    fn shutdown(self) {
        match self.owner {
            SchedulerOwner::Pool(runtime) => runtime.shutdown_timeout(SHUTDOWN_GRACE),
            SchedulerOwner::Driver { shutdown, thread } => {
                let _ = shutdown.send(());
                if thread.join().is_err() {
                    warn!(target: "procrt::runtime", "scheduler thread panicked");
                }
            }
        }
    }
}

fn drop_scheduler(scheduler: Scheduler) {
    if Handle::try_current().is_ok() {
        std::thread::spawn(move || scheduler.shutdown());
    } else {
        scheduler.shutdown();
    }
}

fn create_scheduler(single_thread: bool) -> Result<Scheduler, RuntimeError> {
    let current_thread = || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RuntimeError::Spawn(format!("current-thread runtime: {}", e)))
            .and_then(Scheduler::driven)
    };
    if single_thread {
        return current_thread();
    }

    match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => Ok(Scheduler::pool(runtime)),
        Err(err) => {
            let err_msg = err.to_string();
            current_thread().map_err(|fallback_err| {
                RuntimeError::Spawn(format!(
                    "multi-thread runtime ({}) and fallback ({}) both failed",
                    err_msg, fallback_err
                ))
            })
        }
    }
}
