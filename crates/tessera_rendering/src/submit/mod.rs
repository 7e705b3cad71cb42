//! # Task Submission
//!
//! Depth-1 handoff of finished frames to an asynchronous command consumer.
//!
//! ```text
//!   producer (frame N+1)                     consumer thread
//!   ────────────────────                     ───────────────
//!   build ──▶ submit ──┐   tasks (cap 1)
//!                      ├────────────────────▶ execute(task, memory)
//!   recycle ◀──────────┘◀──────────────────── completion {memory, result}
//!                          completions (cap 1)
//! ```
//!
//! At most one task is in flight. The arena a task executes from moves to
//! the consumer thread with the task and comes back with its completion, so
//! the producer cannot touch it while the consumer reads it.
//!
//! [`TaskSubmitter::submit`] blocks until the previous task completes;
//! [`TaskSubmitter::try_submit`] refuses instead and hands the frame back.

mod disasm;
mod interpreter;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendError, Sender, TryRecvError};
use parking_lot::Mutex;
use tessera_core::FrameArena;

use crate::error::{ConsumerFault, RenderError, RenderResult};
use crate::task::TaskDescriptor;

pub use disasm::{disassemble, FaultReport};
pub use interpreter::{CommandInterpreter, ExecutionTrace, MAX_CALL_DEPTH};

/// Counters from executing one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Records executed.
    pub commands: u32,
    /// Triangles drawn.
    pub triangles: u32,
    /// Calls into lists inside task memory.
    pub calls: u32,
    /// Calls to lists outside task memory (resident assets).
    pub external_calls: u32,
    /// Branches taken.
    pub branches: u32,
    /// Segment writes executed.
    pub segments_set: u32,
}

/// Executes submitted tasks.
///
/// Implementations run on the consumer thread. `memory` is the arena the
/// task was built in and is only valid for the duration of the call.
pub trait TaskConsumer: Send {
    /// Executes one task to completion.
    ///
    /// # Errors
    ///
    /// A [`ConsumerFault`] when the stream cannot be executed.
    fn execute(&mut self, task: &TaskDescriptor, memory: &FrameArena) -> Result<ExecutionSummary, ConsumerFault>;
}

impl<F> TaskConsumer for F
where
    F: FnMut(&TaskDescriptor, &FrameArena) -> Result<ExecutionSummary, ConsumerFault> + Send,
{
    fn execute(&mut self, task: &TaskDescriptor, memory: &FrameArena) -> Result<ExecutionSummary, ConsumerFault> {
        self(task, memory)
    }
}

/// Called on the consumer thread when a task faults, while the task's
/// memory is still available.
pub type FaultHandler = Box<dyn Fn(&FaultReport) + Send>;

/// A task that finished executing.
#[derive(Debug)]
pub struct Completed {
    /// Task that ran.
    pub task: TaskDescriptor,
    /// Its memory, free for reuse.
    pub memory: FrameArena,
    /// Consumer counters.
    pub summary: ExecutionSummary,
}

/// A submission that was not accepted. Owns the task and its memory again.
#[derive(Debug)]
pub struct SubmitRejected {
    /// The refused task.
    pub task: TaskDescriptor,
    /// Its memory, still owned by the producer.
    pub memory: FrameArena,
    /// Why: [`RenderError::TaskInFlight`] or [`RenderError::ConsumerDisconnected`].
    pub reason: RenderError,
}

impl From<SubmitRejected> for RenderError {
    fn from(rejected: SubmitRejected) -> Self {
        rejected.reason
    }
}

/// Consumer-side counters, shared with the producer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumerStats {
    /// Tasks executed.
    pub tasks: u64,
    /// Tasks that faulted.
    pub faults: u64,
    /// Total time spent executing.
    pub busy: Duration,
}

struct Job {
    task: TaskDescriptor,
    memory: FrameArena,
}

struct Completion {
    task: TaskDescriptor,
    memory: FrameArena,
    result: Result<ExecutionSummary, ConsumerFault>,
}

/// Producer-side handle to the consumer thread.
pub struct TaskSubmitter {
    jobs: Option<Sender<Job>>,
    completions: Receiver<Completion>,
    worker: Option<JoinHandle<()>>,
    in_flight: Option<TaskDescriptor>,
    last_submitted: Option<TaskDescriptor>,
    timeout: Duration,
    hung: bool,
    stats: Arc<Mutex<ConsumerStats>>,
    last_fault: Arc<Mutex<Option<FaultReport>>>,
}

impl TaskSubmitter {
    /// Starts the consumer thread.
    ///
    /// # Errors
    ///
    /// [`RenderError::ConsumerSpawn`] if the thread cannot be created.
    pub fn spawn(consumer: Box<dyn TaskConsumer>, timeout: Duration) -> RenderResult<Self> {
        Self::spawn_with_handler(consumer, timeout, None)
    }

    /// Starts the consumer thread with a fault handler.
    ///
    /// # Errors
    ///
    /// [`RenderError::ConsumerSpawn`] if the thread cannot be created.
    pub fn spawn_with_handler(
        consumer: Box<dyn TaskConsumer>,
        timeout: Duration,
        on_fault: Option<FaultHandler>,
    ) -> RenderResult<Self> {
        let (job_tx, job_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let stats = Arc::new(Mutex::new(ConsumerStats::default()));
        let last_fault = Arc::new(Mutex::new(None));

        let worker_stats = Arc::clone(&stats);
        let worker_fault = Arc::clone(&last_fault);
        let worker = thread::Builder::new()
            .name("tessera-consumer".into())
            .spawn(move || Self::consumer_loop(consumer, &job_rx, &done_tx, on_fault, &worker_stats, &worker_fault))
            .map_err(|e| RenderError::ConsumerSpawn(e.to_string()))?;

        Ok(Self {
            jobs: Some(job_tx),
            completions: done_rx,
            worker: Some(worker),
            in_flight: None,
            last_submitted: None,
            timeout,
            hung: false,
            stats,
            last_fault,
        })
    }

    /// Consumer thread main loop. Exits when the producer side is dropped.
    fn consumer_loop(
        mut consumer: Box<dyn TaskConsumer>,
        jobs: &Receiver<Job>,
        completions: &Sender<Completion>,
        on_fault: Option<FaultHandler>,
        stats: &Mutex<ConsumerStats>,
        last_fault: &Mutex<Option<FaultReport>>,
    ) {
        for Job { task, memory } in jobs {
            let started = Instant::now();
            let result = consumer.execute(&task, &memory);
            let elapsed = started.elapsed();

            match &result {
                Ok(summary) => {
                    tracing::trace!(
                        frame = task.frame(),
                        commands = summary.commands,
                        triangles = summary.triangles,
                        "task complete"
                    );
                }
                Err(fault) => {
                    let report = FaultReport::capture(&task, &memory, fault.clone());
                    tracing::error!(frame = task.frame(), %fault, "consumer fault");
                    for line in &report.disassembly {
                        tracing::error!(frame = task.frame(), "  {line}");
                    }
                    if let Some(handler) = &on_fault {
                        handler(&report);
                    }
                    *last_fault.lock() = Some(report);
                }
            }

            {
                let mut s = stats.lock();
                s.tasks += 1;
                s.faults += u64::from(result.is_err());
                s.busy += elapsed;
            }

            if completions.send(Completion { task, memory, result }).is_err() {
                break;
            }
        }
    }

    /// Returns true while a task is in flight.
    #[inline]
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The task currently in flight.
    #[inline]
    #[must_use]
    pub const fn in_flight(&self) -> Option<&TaskDescriptor> {
        self.in_flight.as_ref()
    }

    /// The most recently submitted task. Cleared by the next submission.
    #[inline]
    #[must_use]
    pub const fn last_submitted(&self) -> Option<&TaskDescriptor> {
        self.last_submitted.as_ref()
    }

    /// The last fault the consumer reported, with its disassembly.
    #[must_use]
    pub fn last_fault(&self) -> Option<FaultReport> {
        self.last_fault.lock().clone()
    }

    /// Consumer counters.
    #[must_use]
    pub fn consumer_stats(&self) -> ConsumerStats {
        *self.stats.lock()
    }

    /// Submits a task, first waiting for the one in flight.
    ///
    /// Returns the previous task's completion, if there was one.
    ///
    /// # Errors
    ///
    /// Any error from [`TaskSubmitter::wait`]; the new task is not submitted
    /// in that case.
    pub fn submit(&mut self, task: TaskDescriptor, memory: FrameArena) -> RenderResult<Option<Completed>> {
        let previous = self.wait()?;
        self.send(task, memory)?;
        Ok(previous)
    }

    /// Submits a task only if nothing is in flight.
    ///
    /// # Errors
    ///
    /// [`SubmitRejected`] carrying the task and its memory back, with
    /// [`RenderError::TaskInFlight`] as the reason when another task is in
    /// flight.
    pub fn try_submit(&mut self, task: TaskDescriptor, memory: FrameArena) -> Result<(), SubmitRejected> {
        if let Some(current) = &self.in_flight {
            tracing::debug!(frame = task.frame(), in_flight = current.frame(), "submission refused");
            let reason = RenderError::TaskInFlight { frame: current.frame() };
            return Err(SubmitRejected { task, memory, reason });
        }
        self.send(task, memory)
    }

    fn send(&mut self, task: TaskDescriptor, memory: FrameArena) -> Result<(), SubmitRejected> {
        let Some(jobs) = self.jobs.as_ref() else {
            return Err(SubmitRejected { task, memory, reason: RenderError::ConsumerDisconnected });
        };
        if let Err(SendError(job)) = jobs.send(Job { task, memory }) {
            tracing::error!(frame = task.frame(), "consumer thread is gone");
            return Err(SubmitRejected {
                task: job.task,
                memory: job.memory,
                reason: RenderError::ConsumerDisconnected,
            });
        }

        // The new submission releases the previous one.
        self.last_submitted = Some(task);
        self.in_flight = Some(task);
        tracing::debug!(frame = task.frame(), %task, "task submitted");
        Ok(())
    }

    /// Collects the in-flight task's completion without blocking.
    ///
    /// # Errors
    ///
    /// [`RenderError::ConsumerFault`] if the task faulted, or
    /// [`RenderError::ConsumerDisconnected`].
    pub fn poll(&mut self) -> RenderResult<Option<Completed>> {
        let Some(task) = self.in_flight else {
            return Ok(None);
        };
        match self.completions.try_recv() {
            Ok(done) => self.complete(done).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.disconnected(task.frame())),
        }
    }

    /// Blocks until the in-flight task completes.
    ///
    /// Returns `None` when nothing is in flight.
    ///
    /// # Errors
    ///
    /// - [`RenderError::ConsumerTimeout`] if no completion arrives within
    ///   the configured timeout. The consumer is then treated as hung.
    /// - [`RenderError::ConsumerFault`] if the task faulted
    /// - [`RenderError::ConsumerDisconnected`]
    pub fn wait(&mut self) -> RenderResult<Option<Completed>> {
        let Some(task) = self.in_flight else {
            return Ok(None);
        };
        if self.hung {
            return Err(self.timed_out(task.frame()));
        }
        match self.completions.recv_timeout(self.timeout) {
            Ok(done) => self.complete(done).map(Some),
            Err(RecvTimeoutError::Timeout) => {
                self.hung = true;
                Err(self.timed_out(task.frame()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.disconnected(task.frame())),
        }
    }

    fn complete(&mut self, done: Completion) -> RenderResult<Completed> {
        self.in_flight = None;
        match done.result {
            Ok(summary) => Ok(Completed {
                task: done.task,
                memory: done.memory,
                summary,
            }),
            Err(fault) => Err(RenderError::ConsumerFault {
                frame: done.task.frame(),
                fault,
            }),
        }
    }

    fn timed_out(&self, frame: u64) -> RenderError {
        let waited_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        tracing::error!(frame, waited_ms, "consumer hung");
        RenderError::ConsumerTimeout { frame, waited_ms }
    }

    fn disconnected(&mut self, frame: u64) -> RenderError {
        self.in_flight = None;
        tracing::error!(frame, "consumer disconnected with a task in flight");
        RenderError::ConsumerDisconnected
    }
}

impl Drop for TaskSubmitter {
    fn drop(&mut self) {
        // Closing the job channel ends the consumer loop.
        self.jobs = None;
        if self.hung {
            tracing::warn!("abandoning hung consumer thread");
            return;
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("consumer thread panicked");
            }
        }
    }
}
