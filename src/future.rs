//! Promise/Future: asynchronous result notification with listener dispatch.
//!
//! Grounded in spec.md §4.G and §9's "Promise listeners & reentrancy"
//! design note: complete-then-notify, CAS the state first, then iterate
//! listeners without holding a lock. The teacher has no promise type (mio
//! is synchronous-return-or-would-block only), so the shape here follows
//! the corpus's own promise/future implementations combined with spec.md's
//! exact contract.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::ThreadId;

use crate::error::{Error, Result};
use crate::event_loop::EventLoopHandle;

/// Outcome of a completed [`Promise`].
#[derive(Clone)]
pub enum Outcome<T> {
    Success(T),
    Failure(Arc<Error>),
    Cancelled,
}

impl<T: Clone> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

const UNCOMPLETED: u8 = 0;
const COMPLETED: u8 = 1;

struct Inner<T> {
    state: AtomicU8,
    cancellable: AtomicU8, // 1 = cancellable (default), 0 = uncancellable
    value: Mutex<Option<Outcome<T>>>,
    condvar: Condvar,
    listeners: Mutex<Vec<Listener<T>>>,
    executor: Option<EventLoopHandle>,
}

type Listener<T> = Box<dyn FnOnce(&Future<T>) + Send>;

/// A single-assignment cell: `uncompleted -> completed(success | failure |
/// cancelled)`, with a list of listeners invoked exactly once.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

/// The read side of a [`Promise`]; handed to callers who should only
/// observe completion, not drive it.
pub struct Future<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Future<T> {
        Future {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    pub fn new() -> Promise<T> {
        Promise {
            inner: Arc::new(Inner {
                state: AtomicU8::new(UNCOMPLETED),
                cancellable: AtomicU8::new(1),
                value: Mutex::new(None),
                condvar: Condvar::new(),
                listeners: Mutex::new(Vec::new()),
                executor: None,
            }),
        }
    }

    /// A promise bound to an event loop: listeners added before completion
    /// are dispatched on that loop rather than inline (spec.md §4.G
    /// "default: the channel's event loop").
    pub fn with_executor(executor: EventLoopHandle) -> Promise<T> {
        Promise {
            inner: Arc::new(Inner {
                state: AtomicU8::new(UNCOMPLETED),
                cancellable: AtomicU8::new(1),
                value: Mutex::new(None),
                condvar: Condvar::new(),
                listeners: Mutex::new(Vec::new()),
                executor: Some(executor),
            }),
        }
    }

    pub fn future(&self) -> Future<T> {
        Future {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Prevents future cancellation of this promise (`addFlush` applies
    /// this to queued write promises, spec.md §5).
    pub fn set_uncancellable(&self) -> bool {
        self.inner
            .cancellable
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            || self.inner.state.load(Ordering::Acquire) == UNCOMPLETED
    }

    pub fn is_cancellable(&self) -> bool {
        self.inner.cancellable.load(Ordering::Acquire) == 1
            && self.inner.state.load(Ordering::Acquire) == UNCOMPLETED
    }

    pub fn set_success(&self, value: T) -> bool {
        self.complete(Outcome::Success(value))
    }

    pub fn set_failure(&self, cause: Error) -> bool {
        self.complete(Outcome::Failure(Arc::new(cause)))
    }

    pub fn cancel(&self) -> bool {
        if !self.is_cancellable() {
            return false;
        }
        self.complete(Outcome::Cancelled)
    }

    fn complete(&self, outcome: Outcome<T>) -> bool {
        if self
            .inner
            .state
            .compare_exchange(UNCOMPLETED, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.inner.value.lock().unwrap() = Some(outcome);
        self.inner.condvar.notify_all();
        notify_listeners(&self.inner, &self.future());
        true
    }
}

impl<T> Default for Promise<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Promise<T> {
        Promise::new()
    }
}

fn notify_listeners<T: Clone + Send + 'static>(inner: &Arc<Inner<T>>, future: &Future<T>) {
    let listeners: Vec<Listener<T>> = std::mem::take(&mut *inner.listeners.lock().unwrap());
    if listeners.is_empty() {
        return;
    }
    if let Some(executor) = &inner.executor {
        let future = future.clone();
        let _ = executor.execute(Box::new(move || {
            for l in listeners {
                run_listener(l, &future);
            }
        }));
    } else {
        for l in listeners {
            run_listener(l, future);
        }
    }
}

/// A panicking listener must not prevent its siblings from running, so the
/// panic is caught and logged rather than propagated.
fn run_listener<T>(listener: Listener<T>, future: &Future<T>) {
    let future = future.clone();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&future)));
    if result.is_err() {
        log::warn!("promise listener panicked; swallowed");
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    pub fn is_done(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == COMPLETED
    }

    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.inner.value.lock().unwrap().clone()
    }

    /// Registers `listener` to run once, on completion. If the future is
    /// already complete, runs it immediately on the calling thread (spec.md
    /// §4.G: "listeners added after completion are invoked immediately on
    /// the caller").
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&Future<T>) + Send + 'static,
    {
        if self.is_done() {
            run_listener(Box::new(listener), self);
            return;
        }
        let mut listeners = self.inner.listeners.lock().unwrap();
        if self.is_done() {
            drop(listeners);
            run_listener(Box::new(listener), self);
            return;
        }
        listeners.push(Box::new(listener));
    }

    /// Blocks the calling thread until completion. Must not be called from
    /// the owning event loop's thread (spec.md §4.G: "must not be called
    /// from the channel's event loop, which would self-deadlock").
    pub fn sync(&self, loop_thread: Option<ThreadId>) -> Result<&Future<T>> {
        self.await_uninterruptibly(loop_thread)?;
        Ok(self)
    }

    fn await_uninterruptibly(&self, loop_thread: Option<ThreadId>) -> Result<()> {
        if let Some(tid) = loop_thread {
            if tid == std::thread::current().id() {
                return Err(Error::IllegalState(
                    "sync()/await() called from the channel's own event loop thread",
                ));
            }
        }
        let mut value = self.inner.value.lock().unwrap();
        while value.is_none() {
            value = self.inner.condvar.wait(value).unwrap();
        }
        Ok(())
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("done", &self.is_done())
            .finish()
    }
}

/// A promise that additionally notifies progress listeners as a write
/// makes partial progress (spec.md §4.F `progress(n)`, §4.G's "addition"
/// note on `ChannelProgressivePromise`).
pub struct ChannelProgressivePromise {
    promise: Promise<()>,
    progress_listeners: Mutex<Vec<Box<dyn FnMut(u64, u64) + Send>>>,
}

impl ChannelProgressivePromise {
    pub fn new() -> ChannelProgressivePromise {
        ChannelProgressivePromise {
            promise: Promise::new(),
            progress_listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn future(&self) -> Future<()> {
        self.promise.future()
    }

    pub fn set_success(&self) -> bool {
        self.promise.set_success(())
    }

    pub fn set_failure(&self, cause: Error) -> bool {
        self.promise.set_failure(cause)
    }

    pub fn add_progress_listener<F>(&self, listener: F)
    where
        F: FnMut(u64, u64) + Send + 'static,
    {
        self.progress_listeners.lock().unwrap().push(Box::new(listener));
    }

    pub fn notify_progress(&self, progress: u64, total: u64) {
        for l in self.progress_listeners.lock().unwrap().iter_mut() {
            l(progress, total);
        }
    }
}

impl Default for ChannelProgressivePromise {
    fn default() -> ChannelProgressivePromise {
        ChannelProgressivePromise::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_added_before_completion_fires_on_complete() {
        let promise: Promise<i32> = Promise::new();
        let fut = promise.future();
        let observed = Arc::new(Mutex::new(None));
        let observed2 = Arc::clone(&observed);
        fut.add_listener(move |f| {
            if let Some(Outcome::Success(v)) = f.outcome() {
                *observed2.lock().unwrap() = Some(v);
            }
        });
        promise.set_success(42);
        assert_eq!(*observed.lock().unwrap(), Some(42));
    }

    #[test]
    fn listener_added_after_completion_fires_immediately() {
        let promise: Promise<i32> = Promise::new();
        promise.set_success(7);
        let fut = promise.future();
        let observed = Arc::new(Mutex::new(None));
        let observed2 = Arc::clone(&observed);
        fut.add_listener(move |f| {
            if let Some(Outcome::Success(v)) = f.outcome() {
                *observed2.lock().unwrap() = Some(v);
            }
        });
        assert_eq!(*observed.lock().unwrap(), Some(7));
    }

    #[test]
    fn set_success_is_one_shot() {
        let promise: Promise<i32> = Promise::new();
        assert!(promise.set_success(1));
        assert!(!promise.set_success(2));
    }

    #[test]
    fn sync_from_loop_thread_is_rejected() {
        let promise: Promise<i32> = Promise::new();
        promise.set_success(1);
        let fut = promise.future();
        let tid = std::thread::current().id();
        assert!(matches!(fut.sync(Some(tid)), Err(Error::IllegalState(_))));
    }
}
