//! The channel event loop: a single-threaded cooperative reactor blending
//! I/O readiness dispatch, in-band task execution, and scheduled timers.
//!
//! Grounded directly in the teacher's deprecated `EventLoop<H>`
//! (`deprecated/event_loop.rs`): a `Poll` plus a notify channel plus a
//! timer wheel plus a `Handler` callback trait is the structural ancestor
//! of everything below. spec.md §4.C's main cycle, I/O-vs-task ratio, and
//! graceful-shutdown state machine are layered on top of that shape.

use std::cmp;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::event::{Event, Events};
use crate::interest::Interest;
use crate::poll::{Poll, Registry};
use crate::token::Token;
use crate::waker::Waker;

/// A unit of work submitted to an event loop. Must never block — code that
/// wants to await something submits a continuation instead (spec.md §4.C
/// "Suspension points").
pub type Task = Box<dyn FnOnce() + Send>;

const WAKE_TOKEN: Token = Token(usize::MAX);
/// Server/byte channels get a larger per-cycle read budget than anything
/// else (spec.md §4.C step 2).
pub const DEFAULT_MAX_MESSAGES_PER_READ: usize = 16;
/// Ceiling on how long a single readiness poll blocks absent other work.
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// spec.md §4.C step 4: "default 50%".
const DEFAULT_IO_RATIO: u8 = 50;

/// Graceful-shutdown lifecycle (spec.md §4.C "Cancellation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Started = 0,
    ShuttingDown = 1,
    Shutdown = 2,
    Terminated = 3,
}

impl LoopState {
    fn from_u8(v: u8) -> LoopState {
        match v {
            0 => LoopState::Started,
            1 => LoopState::ShuttingDown,
            2 => LoopState::Shutdown,
            _ => LoopState::Terminated,
        }
    }
}

/// Something that can receive a readiness event for the token it was
/// registered under. `Channel` implementations register themselves with
/// the loop's token table when attached (spec.md §4.C `register(channel)`).
pub trait Readiness: Send + Sync {
    fn handle_event(&self, event: &Event);
}

/// What a [`ScheduledEntry`] runs: a one-shot closure it owns outright, or a
/// shared, repeatable closure a periodic entry re-arms itself with every
/// time it fires (spec.md §4.C `schedule(task, delay, period)`).
enum ScheduledTask {
    Once(Mutex<Option<Task>>),
    Periodic(Arc<dyn Fn() + Send + Sync>),
}

struct ScheduledEntry {
    deadline: Instant,
    seq: u64,
    period: Option<Duration>,
    task: ScheduledTask,
    cancelled: Arc<AtomicBool>,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for ScheduledEntry {}
impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        // BinaryHeap is a max-heap; we want the earliest deadline first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A handle returned by [`EventLoop::schedule`]; dropping it does not
/// cancel the task, call [`cancel`](ScheduledHandle::cancel) explicitly.
pub struct ScheduledHandle {
    cancelled: Arc<AtomicBool>,
}

impl ScheduledHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

struct Shared {
    state: AtomicU8,
    tasks: SegQueue<Task>,
    scheduled: Mutex<BinaryHeap<Arc<ScheduledEntry>>>,
    next_seq: AtomicU64,
    waker: Waker,
    wake_pending: AtomicBool,
    registry: Registry,
    thread_id: Mutex<Option<ThreadId>>,
    last_task_submitted_at: Mutex<Instant>,
    readiness: Mutex<std::collections::HashMap<Token, Arc<dyn Readiness>>>,
}

impl Shared {
    fn wake_if_needed(&self) {
        if self
            .wake_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            if let Err(e) = self.waker.wake() {
                warn!("failed to wake event loop: {}", e);
            }
        }
    }

    fn in_event_loop(&self) -> bool {
        *self.thread_id.lock().unwrap() == Some(std::thread::current().id())
    }
}

/// A thread-safe, cloneable reference to a running [`EventLoop`]. This is
/// what gets handed to other threads (and to promises) that want to
/// `execute`/`schedule` work on the loop without being the loop.
#[derive(Clone)]
pub struct EventLoopHandle {
    shared: Arc<Shared>,
}

impl EventLoopHandle {
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub fn in_event_loop(&self) -> bool {
        self.shared.in_event_loop()
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Enqueues `task` for execution on the loop thread. Rejected once the
    /// loop has left `Started` unless submitted from the loop thread
    /// itself (spec.md §4.C "During shutting_down, new tasks are rejected
    /// unless from the loop thread").
    pub fn execute(&self, task: Task) -> Result<()> {
        let state = self.state();
        if state != LoopState::Started && !self.in_event_loop() {
            return Err(Error::RejectedExecution(state));
        }
        *self.shared.last_task_submitted_at.lock().unwrap() = Instant::now();
        self.shared.tasks.push(task);
        self.shared.wake_if_needed();
        Ok(())
    }

    /// Schedules `task` to run once after `delay`.
    pub fn schedule(&self, task: Task, delay: Duration) -> Result<ScheduledHandle> {
        self.schedule_entry(Instant::now() + delay, None, ScheduledTask::Once(Mutex::new(Some(task))))
    }

    /// Schedules `task` to run after `delay`, then every `period` until
    /// cancelled. `task` must be repeatable (`Fn`, not `FnOnce`) since the
    /// loop re-arms the same closure on each firing.
    pub fn schedule_periodic(
        &self,
        task: Arc<dyn Fn() + Send + Sync>,
        delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle> {
        self.schedule_entry(Instant::now() + delay, Some(period), ScheduledTask::Periodic(task))
    }

    fn schedule_entry(
        &self,
        deadline: Instant,
        period: Option<Duration>,
        task: ScheduledTask,
    ) -> Result<ScheduledHandle> {
        let state = self.state();
        if state != LoopState::Started && !self.in_event_loop() {
            return Err(Error::RejectedExecution(state));
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(ScheduledEntry {
            deadline,
            seq,
            period,
            task,
            cancelled: Arc::clone(&cancelled),
        });
        self.shared.scheduled.lock().unwrap().push(entry);
        self.shared.wake_if_needed();
        Ok(ScheduledHandle { cancelled })
    }

    pub fn register(&self, token: Token, handler: Arc<dyn Readiness>) {
        self.shared.readiness.lock().unwrap().insert(token, handler);
    }

    pub fn deregister(&self, token: Token) {
        self.shared.readiness.lock().unwrap().remove(&token);
    }

    /// Begins graceful shutdown. `quiet_period` must pass with no new
    /// tasks submitted before the loop advances past `ShuttingDown`;
    /// `timeout` is a hard ceiling regardless (spec.md §4.C).
    pub fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) {
        self.shared
            .state
            .store(LoopState::ShuttingDown as u8, Ordering::Release);
        *self.shared.last_task_submitted_at.lock().unwrap() = Instant::now();
        self.shared.wake_if_needed();
        let shared = Arc::clone(&self.shared);
        let deadline = Instant::now() + timeout;
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_millis(10));
            let quiet_elapsed = shared.last_task_submitted_at.lock().unwrap().elapsed() >= quiet_period;
            let past_deadline = Instant::now() >= deadline;
            if quiet_elapsed || past_deadline {
                shared.state.store(LoopState::Shutdown as u8, Ordering::Release);
                shared.wake_if_needed();
                break;
            }
        });
    }
}

/// The reactor itself. Owns the `Poll`, the local end of the task queue,
/// and the scheduled-task min-heap. Runs on exactly one thread for its
/// entire life (spec.md §4.C "Scheduling model").
pub struct EventLoop {
    poll: Poll,
    events: Events,
    shared: Arc<Shared>,
    io_ratio: u8,
}

impl EventLoop {
    pub fn new() -> std::io::Result<EventLoop> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        let shared = Arc::new(Shared {
            state: AtomicU8::new(LoopState::Started as u8),
            tasks: SegQueue::new(),
            scheduled: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            waker,
            wake_pending: AtomicBool::new(false),
            registry: poll.registry().clone(),
            thread_id: Mutex::new(None),
            last_task_submitted_at: Mutex::new(Instant::now()),
            readiness: Mutex::new(std::collections::HashMap::new()),
        });
        Ok(EventLoop {
            poll,
            events: Events::with_capacity(1024),
            shared,
            io_ratio: DEFAULT_IO_RATIO,
        })
    }

    pub fn handle(&self) -> EventLoopHandle {
        EventLoopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Runs the cooperative cycle until the loop reaches `Terminated`.
    /// This call takes over the current thread (spec.md §4.C: "the loop
    /// blocks only inside step (1), the readiness poll").
    pub fn run(&mut self) {
        *self.shared.thread_id.lock().unwrap() = Some(std::thread::current().id());
        loop {
            let state = LoopState::from_u8(self.shared.state.load(Ordering::Acquire));
            if state == LoopState::Shutdown {
                self.drain_remaining_tasks();
                self.shared
                    .state
                    .store(LoopState::Terminated as u8, Ordering::Release);
                debug!("event loop terminated");
                return;
            }
            self.tick();
        }
    }

    /// Runs exactly one iteration of the main cycle (spec.md §4.C). Exposed
    /// separately from [`run`](EventLoop::run) so tests can drive the loop
    /// deterministically without backgrounding a thread.
    pub fn tick(&mut self) {
        self.shared.wake_pending.store(false, Ordering::Release);

        let timeout = self.compute_timeout();
        let io_start = Instant::now();
        match self.poll.poll(&mut self.events, timeout) {
            Ok(_) => {}
            Err(e) => {
                warn!("poll failed: {}", e);
                return;
            }
        }

        for event in self.events.iter() {
            if event.token() == WAKE_TOKEN {
                let _ = self.shared.waker.reset();
                continue;
            }
            let handler = self.shared.readiness.lock().unwrap().get(&event.token()).cloned();
            if let Some(handler) = handler {
                trace!("dispatching event for {:?}", event.token());
                handler.handle_event(&event);
            }
        }
        let io_time = io_start.elapsed();

        self.drain_due_scheduled_tasks();
        self.run_tasks_under_ratio(io_time);
    }

    fn compute_timeout(&self) -> Option<Duration> {
        if !self.shared.tasks.is_empty() {
            return Some(Duration::ZERO);
        }
        let scheduled_head = self
            .shared
            .scheduled
            .lock()
            .unwrap()
            .peek()
            .map(|e| e.deadline.saturating_duration_since(Instant::now()));
        match scheduled_head {
            Some(d) => Some(cmp::min(d, DEFAULT_POLL_TIMEOUT)),
            None => Some(DEFAULT_POLL_TIMEOUT),
        }
    }

    fn drain_due_scheduled_tasks(&self) {
        let now = Instant::now();
        let mut scheduled = self.shared.scheduled.lock().unwrap();
        let mut due = Vec::new();
        while let Some(top) = scheduled.peek() {
            if top.deadline > now {
                break;
            }
            due.push(scheduled.pop().unwrap());
        }
        drop(scheduled);

        for entry in due {
            if entry.cancelled.load(Ordering::Relaxed) {
                continue;
            }
            match &entry.task {
                ScheduledTask::Once(task) => {
                    if let Some(task) = task.lock().unwrap().take() {
                        self.shared.tasks.push(task);
                    }
                }
                ScheduledTask::Periodic(f) => {
                    let f = Arc::clone(f);
                    self.shared.tasks.push(Box::new(move || f()));
                }
            }
            if let Some(period) = entry.period {
                let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
                let rearmed = Arc::new(ScheduledEntry {
                    // Next-fire-from-now rather than `deadline + period`: a
                    // loop that falls behind should not burst-catch-up on
                    // every missed tick.
                    deadline: Instant::now() + period,
                    seq,
                    period: Some(period),
                    task: match &entry.task {
                        ScheduledTask::Periodic(f) => ScheduledTask::Periodic(Arc::clone(f)),
                        ScheduledTask::Once(_) => unreachable!("only periodic entries carry a period"),
                    },
                    cancelled: Arc::clone(&entry.cancelled),
                });
                self.shared.scheduled.lock().unwrap().push(rearmed);
            }
        }
    }

    fn run_tasks_under_ratio(&self, io_time: Duration) {
        let budget = if self.io_ratio >= 100 {
            Duration::MAX
        } else {
            io_time * self.io_ratio as u32 / cmp::max(1, 100 - self.io_ratio as u32)
        };
        let start = Instant::now();
        loop {
            if start.elapsed() >= budget && budget != Duration::MAX {
                break;
            }
            match self.shared.tasks.pop() {
                Some(task) => task(),
                None => break,
            }
        }
    }

    fn drain_remaining_tasks(&self) {
        while let Some(task) = self.shared.tasks.pop() {
            task();
        }
    }

    pub fn set_io_ratio(&mut self, ratio: u8) {
        self.io_ratio = cmp::min(ratio, 100);
    }
}

/// Distributes channels over a fixed-size pool of loops, one per CPU core
/// by default (spec.md §4.C "distributed over a fixed-size event loop
/// group").
pub struct EventLoopGroup {
    loops: Vec<EventLoopHandle>,
    next: AtomicUsize,
}

impl EventLoopGroup {
    /// Spawns `num_threads` event loops, each on its own background
    /// thread, and returns a group that round-robins channel registration
    /// across them.
    pub fn new(num_threads: usize) -> std::io::Result<EventLoopGroup> {
        let mut loops = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let mut event_loop = EventLoop::new()?;
            let handle = event_loop.handle();
            std::thread::Builder::new()
                .name(format!("vortex-loop-{}", i))
                .spawn(move || event_loop.run())?;
            loops.push(handle);
        }
        Ok(EventLoopGroup {
            loops,
            next: AtomicUsize::new(0),
        })
    }

    pub fn default_sized() -> std::io::Result<EventLoopGroup> {
        EventLoopGroup::new(num_cpus::get().max(1))
    }

    /// Round-robin selection of the next loop a freshly-registered channel
    /// should call home (spec.md §4.C "round-robin or least-loaded
    /// policy").
    pub fn next(&self) -> EventLoopHandle {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        self.loops[idx].clone()
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) {
        for handle in &self.loops {
            handle.shutdown_gracefully(quiet_period, timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn execute_runs_on_next_tick() {
        let mut event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle();
        *event_loop.shared.thread_id.lock().unwrap() = Some(std::thread::current().id());
        let (tx, rx) = mpsc::channel();
        handle.execute(Box::new(move || tx.send(1).unwrap())).unwrap();
        event_loop.tick();
        assert_eq!(rx.try_recv(), Ok(1));
    }

    #[test]
    fn scheduled_task_runs_once_due() {
        let mut event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle();
        *event_loop.shared.thread_id.lock().unwrap() = Some(std::thread::current().id());
        let (tx, rx) = mpsc::channel();
        handle
            .schedule(Box::new(move || tx.send(()).unwrap()), Duration::from_millis(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        event_loop.tick();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn scheduled_periodic_task_fires_more_than_once() {
        let mut event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle();
        *event_loop.shared.thread_id.lock().unwrap() = Some(std::thread::current().id());
        let (tx, rx) = mpsc::channel();
        let handle_ref = handle
            .schedule_periodic(
                Arc::new(move || tx.send(()).unwrap()),
                Duration::from_millis(1),
                Duration::from_millis(1),
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        event_loop.tick();
        assert!(rx.try_recv().is_ok());
        std::thread::sleep(Duration::from_millis(5));
        event_loop.tick();
        assert!(rx.try_recv().is_ok(), "periodic task must fire again after the first tick");
        handle_ref.cancel();
    }

    #[test]
    fn rejects_execution_after_shutdown_from_other_thread() {
        let event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle();
        handle
            .shared
            .state
            .store(LoopState::Shutdown as u8, Ordering::Release);
        let result = std::thread::spawn(move || handle.execute(Box::new(|| {}))).join().unwrap();
        assert!(matches!(result, Err(Error::RejectedExecution(LoopState::Shutdown))));
    }
}
