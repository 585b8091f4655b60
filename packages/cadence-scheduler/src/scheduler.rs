use crate::host::{HostCallback, HostDriver};
use crate::queue::TaskQueue;
use crate::task::{Priority, TaskCallback, TaskId, TaskNode, TaskResult};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Running counters, readable at any point via [`Scheduler::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub tasks_scheduled: u64,
    pub tasks_completed: u64,
    pub continuations: u64,
    pub tasks_cancelled: u64,
    pub timeout_flushes: u64,
}

struct SchedulerState<H: HostDriver> {
    host: H,
    queue: RefCell<TaskQueue>,
    // Ambient priority context. Every scoped region (task execution,
    // run_at_priority, wrapped callbacks) saves and restores these, so
    // nested and recursive calls compose.
    current_priority: Cell<Priority>,
    current_event_start: Cell<Option<f64>>,
    current_expiration: Cell<Option<f64>>,
    current_did_timeout: Cell<bool>,
    is_executing: Cell<bool>,
    is_host_scheduled: Cell<bool>,
    is_paused: Cell<bool>,
    stats: Cell<SchedulerStats>,
}

/// Cooperative, single-threaded, priority-based task scheduler.
///
/// Tasks are kept in a deadline-ordered ring; the host driver invokes the
/// flush loop, which pops and runs tasks until the queue empties, the
/// scheduler is paused, or the driver's time budget runs out. A task that
/// wants to keep going past a yield point returns
/// [`TaskResult::Pending`] and is re-queued under its original deadline.
///
/// `Scheduler` is a cheap handle; clones share the same queue and context.
pub struct Scheduler<H: HostDriver> {
    state: Rc<SchedulerState<H>>,
}

impl<H: HostDriver> Clone for Scheduler<H> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<H: HostDriver + 'static> Scheduler<H> {
    pub fn new(host: H) -> Self {
        Self {
            state: Rc::new(SchedulerState {
                host,
                queue: RefCell::new(TaskQueue::new()),
                current_priority: Cell::new(Priority::Normal),
                current_event_start: Cell::new(None),
                current_expiration: Cell::new(None),
                current_did_timeout: Cell::new(false),
                is_executing: Cell::new(false),
                is_host_scheduled: Cell::new(false),
                is_paused: Cell::new(false),
                stats: Cell::new(SchedulerStats::default()),
            }),
        }
    }

    pub fn host(&self) -> &H {
        &self.state.host
    }

    /// Current time on the host driver's monotonic clock, in milliseconds.
    pub fn now(&self) -> f64 {
        self.state.host.now()
    }

    /// Queues `callback` with a deadline derived from `priority`'s timeout
    /// offset. Inside a priority scope the offset is applied to the scope's
    /// event start time, not the current instant, so everything scheduled
    /// from one event shares one deadline. Returns a handle usable only for
    /// cancellation.
    pub fn schedule_callback(
        &self,
        priority: Priority,
        callback: impl FnOnce() -> TaskResult + 'static,
    ) -> TaskId {
        self.schedule_inner(priority, None, Box::new(callback))
    }

    /// Like [`Scheduler::schedule_callback`], with an explicit timeout in
    /// milliseconds overriding the priority's usual offset.
    pub fn schedule_callback_with_timeout(
        &self,
        priority: Priority,
        timeout_ms: f64,
        callback: impl FnOnce() -> TaskResult + 'static,
    ) -> TaskId {
        self.schedule_inner(priority, Some(timeout_ms), Box::new(callback))
    }

    fn schedule_inner(
        &self,
        priority: Priority,
        timeout_override: Option<f64>,
        callback: TaskCallback,
    ) -> TaskId {
        let start_time = self
            .state
            .current_event_start
            .get()
            .unwrap_or_else(|| self.now());
        let expiration = start_time + timeout_override.unwrap_or_else(|| priority.timeout());

        let node = TaskNode::new(priority, expiration, callback);
        let (id, became_head) = self.state.queue.borrow_mut().insert(node);
        self.bump(|s| s.tasks_scheduled += 1);
        tracing::trace!(?id, ?priority, expiration, "task scheduled");

        if became_head {
            self.ensure_host_callback_is_scheduled();
        }
        id
    }

    /// Removes a pending task. Idempotent: a stale handle (already
    /// cancelled, or already executed) is ignored. A task that has been
    /// popped and is currently executing can no longer be cancelled.
    pub fn cancel_callback(&self, id: TaskId) {
        if self.state.queue.borrow_mut().remove(id) {
            self.bump(|s| s.tasks_cancelled += 1);
            tracing::trace!(?id, "task cancelled");
        }
    }

    /// Runs `f` with `priority` installed as the ambient priority and the
    /// current instant as the event start time, restoring both afterwards
    /// (also when `f` panics). Pending immediate-priority work is drained
    /// on the way out, at the outermost scope only.
    pub fn run_at_priority<R>(&self, priority: Priority, f: impl FnOnce() -> R) -> R {
        let prev_priority = self.state.current_priority.replace(priority);
        let prev_event_start = self.state.current_event_start.replace(Some(self.now()));
        let guard = ScopeGuard {
            priority: &self.state.current_priority,
            prev_priority,
            event_start: &self.state.current_event_start,
            prev_event_start,
        };
        let result = f();
        drop(guard);
        self.flush_immediate_work();
        result
    }

    /// Runs `f` at `Normal` priority, unless the ambient priority is
    /// already less urgent than that, which is kept. Lets an urgent event
    /// hand off its follow-up work without inheriting the urgency.
    pub fn defer<R>(&self, f: impl FnOnce() -> R) -> R {
        let priority = match self.state.current_priority.get() {
            Priority::Immediate | Priority::UserBlocking | Priority::Normal => Priority::Normal,
            lower => lower,
        };
        self.run_at_priority(priority, f)
    }

    /// Captures the ambient priority at wrap time and returns a closure
    /// that reinstates it around every invocation of `f`, so a callback
    /// deferred through a timer or I/O completion keeps the priority of
    /// the call site that created it.
    pub fn wrap_callback<R>(&self, mut f: impl FnMut() -> R) -> impl FnMut() -> R {
        let scheduler = self.clone();
        let priority = self.state.current_priority.get();
        move || scheduler.run_at_priority(priority, &mut f)
    }

    pub fn current_priority(&self) -> Priority {
        self.state.current_priority.get()
    }

    /// The voluntary yield check long tasks are expected to poll. False
    /// while a timeout catch-up pass is running (the task must finish);
    /// otherwise true when a more urgent task has arrived since the
    /// current one started, or when the host's time budget is exhausted.
    pub fn should_yield(&self) -> bool {
        if self.state.current_did_timeout.get() {
            return false;
        }
        if let (Some(head), Some(current)) = (
            self.state.queue.borrow().head_expiration(),
            self.state.current_expiration.get(),
        ) && head < current
        {
            return true;
        }
        self.state.host.should_yield()
    }

    /// Suspends flushing. Queued tasks and the armed host request are left
    /// in place; they just stop being acted on.
    pub fn pause_execution(&self) {
        self.state.is_paused.set(true);
    }

    /// Resumes flushing, re-arming the host driver if work is pending.
    pub fn continue_execution(&self) {
        self.state.is_paused.set(false);
        if !self.state.queue.borrow().is_empty() {
            self.ensure_host_callback_is_scheduled();
        }
    }

    /// Handle of the most urgent pending task, if any.
    pub fn first_task(&self) -> Option<TaskId> {
        self.state.queue.borrow().first()
    }

    pub fn pending_tasks(&self) -> usize {
        self.state.queue.borrow().len()
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused.get()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.state.stats.get()
    }

    fn bump(&self, f: impl FnOnce(&mut SchedulerStats)) {
        let mut stats = self.state.stats.get();
        f(&mut stats);
        self.state.stats.set(stats);
    }

    /// Re-arms the host driver to target the current head's deadline. A
    /// no-op mid-flush: the active loop re-checks the queue itself. An
    /// armed request is cancelled first, since the head deadline may have
    /// changed.
    fn ensure_host_callback_is_scheduled(&self) {
        if self.state.is_executing.get() {
            return;
        }
        let Some(expiration) = self.state.queue.borrow().head_expiration() else {
            return;
        };
        if self.state.is_host_scheduled.get() {
            self.state.host.cancel_callback();
        } else {
            self.state.is_host_scheduled.set(true);
        }
        self.state.host.request_callback(self.host_callback(), expiration);
    }

    /// The entry point handed to the driver. Holds the scheduler weakly;
    /// a delivery after the scheduler is gone is inert, and drivers never
    /// keep the scheduler alive.
    fn host_callback(&self) -> HostCallback {
        let weak = Rc::downgrade(&self.state);
        HostCallback::new(move |did_timeout| {
            if let Some(state) = weak.upgrade() {
                Scheduler { state }.flush_work(did_timeout);
            }
        })
    }

    fn flush_work(&self, did_timeout: bool) {
        if self.state.is_paused.get() {
            return;
        }
        tracing::debug!(did_timeout, pending = self.pending_tasks(), "flush");
        if did_timeout {
            self.bump(|s| s.timeout_flushes += 1);
        }

        let prev_did_timeout = self.state.current_did_timeout.replace(did_timeout);
        self.state.is_executing.set(true);
        let guard = FlushGuard {
            scheduler: self,
            prev_did_timeout,
        };

        if did_timeout {
            // Catch-up pass: the requested deadline was missed, so drain
            // everything already expired, ignoring the yield signal. The
            // clock is re-read per pass in case tasks take long enough to
            // expire more of the queue.
            loop {
                if self.state.is_paused.get() {
                    break;
                }
                let current_time = self.now();
                if !head_expired(&self.state.queue.borrow(), current_time) {
                    break;
                }
                loop {
                    self.flush_first_callback();
                    if self.state.is_paused.get()
                        || !head_expired(&self.state.queue.borrow(), current_time)
                    {
                        break;
                    }
                }
            }
        } else if !self.state.queue.borrow().is_empty() {
            loop {
                if self.state.is_paused.get() {
                    break;
                }
                self.flush_first_callback();
                if self.state.queue.borrow().is_empty() || self.state.host.should_yield() {
                    break;
                }
            }
        }

        drop(guard);
        self.flush_immediate_work();
    }

    /// Pops the head and runs it with its own priority and expiration
    /// installed as the ambient ones. Restoration is guaranteed even if the
    /// callback panics; the panic then propagates to whatever invoked the
    /// flush. A `Pending` result is re-queued under the same priority and
    /// expiration.
    fn flush_first_callback(&self) {
        let Some(task) = self.state.queue.borrow_mut().pop_head() else {
            return;
        };
        let priority = task.priority;
        let expiration = task.expiration;

        let prev_priority = self.state.current_priority.replace(priority);
        let prev_expiration = self.state.current_expiration.replace(Some(expiration));
        let guard = TaskContextGuard {
            priority: &self.state.current_priority,
            prev_priority,
            expiration: &self.state.current_expiration,
            prev_expiration,
        };
        let result = (task.callback)();
        drop(guard);

        match result {
            TaskResult::Done => self.bump(|s| s.tasks_completed += 1),
            TaskResult::Pending(rest) => {
                self.bump(|s| s.continuations += 1);
                let node = TaskNode::new(priority, expiration, rest);
                let (id, became_head) = self.state.queue.borrow_mut().insert_continuation(node);
                tracing::trace!(?id, ?priority, expiration, "continuation re-queued");
                if became_head {
                    // No-op mid-flush; matters when a continuation shows up
                    // through a non-flush path such as the immediate drain.
                    self.ensure_host_callback_is_scheduled();
                }
            }
        }
    }

    /// Synchronously drains immediate-priority tasks at the head of the
    /// queue. Runs only at the outermost call boundary: never inside an
    /// active priority scope, never reentrantly from a flush, and not
    /// while paused. Immediate work is a synchronous obligation that must
    /// finish before control returns to the host, without the host-driver
    /// round trip.
    fn flush_immediate_work(&self) {
        if self.state.current_event_start.get().is_some()
            || self.state.is_executing.get()
            || self.state.is_paused.get()
            || self.state.queue.borrow().head_priority() != Some(Priority::Immediate)
        {
            return;
        }

        self.state.is_executing.set(true);
        let guard = FlushGuard {
            scheduler: self,
            prev_did_timeout: self.state.current_did_timeout.get(),
        };
        while !self.state.is_paused.get()
            && self.state.queue.borrow().head_priority() == Some(Priority::Immediate)
        {
            self.flush_first_callback();
        }
        drop(guard);
    }
}

fn head_expired(queue: &TaskQueue, current_time: f64) -> bool {
    matches!(queue.head_expiration(), Some(exp) if exp <= current_time)
}

/// Teardown shared by the flush loop and the immediate drain: clears the
/// executing flag, restores the timeout flag, and either re-arms the driver
/// for the remaining work or settles idle. Runs on panic as well, so a
/// failing task leaves the scheduler operational.
struct FlushGuard<'a, H: HostDriver + 'static> {
    scheduler: &'a Scheduler<H>,
    prev_did_timeout: bool,
}

impl<H: HostDriver + 'static> Drop for FlushGuard<'_, H> {
    fn drop(&mut self) {
        let state = &self.scheduler.state;
        state.is_executing.set(false);
        state.current_did_timeout.set(self.prev_did_timeout);
        if state.queue.borrow().is_empty() {
            state.is_host_scheduled.set(false);
        } else {
            self.scheduler.ensure_host_callback_is_scheduled();
        }
    }
}

struct TaskContextGuard<'a> {
    priority: &'a Cell<Priority>,
    prev_priority: Priority,
    expiration: &'a Cell<Option<f64>>,
    prev_expiration: Option<f64>,
}

impl Drop for TaskContextGuard<'_> {
    fn drop(&mut self) {
        self.priority.set(self.prev_priority);
        self.expiration.set(self.prev_expiration);
    }
}

struct ScopeGuard<'a> {
    priority: &'a Cell<Priority>,
    prev_priority: Priority,
    event_start: &'a Cell<Option<f64>>,
    prev_event_start: Option<f64>,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.priority.set(self.prev_priority);
        self.event_start.set(self.prev_event_start);
    }
}
