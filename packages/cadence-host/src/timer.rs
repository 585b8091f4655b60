use cadence_scheduler::{HostCallback, HostDriver};
use std::cell::RefCell;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to spawn timer thread: {0}")]
    TimerThread(#[from] std::io::Error),
}

/// Timer-based host driver for headless hosts with no frame pulse.
///
/// A background thread sleeps until the armed deadline and marks the
/// request due; the flush itself always runs on the host thread, through
/// [`TimerHost::poll`], [`TimerHost::wait`], or [`TimerHost::wait_timeout`].
/// The scheduler callback never crosses threads.
///
/// There is no frame budget here, so `should_yield` is always false; tasks
/// still yield voluntarily when a more urgent deadline arrives.
pub struct TimerHost {
    shared: Arc<TimerShared>,
    // Host-thread side of the armed request: the callback plus the
    // deadline it targeted.
    armed: RefCell<Option<(HostCallback, f64)>>,
    thread: Option<JoinHandle<()>>,
}

struct TimerShared {
    start: Instant,
    state: Mutex<TimerState>,
    cond: Condvar,
}

#[derive(Default)]
struct TimerState {
    deadline: Option<f64>,
    due: bool,
    shutdown: bool,
}

impl TimerShared {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl TimerHost {
    pub fn new() -> Result<Self, HostError> {
        let shared = Arc::new(TimerShared {
            start: Instant::now(),
            state: Mutex::new(TimerState::default()),
            cond: Condvar::new(),
        });
        let timer = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("cadence-timer".into())
            .spawn(move || timer_loop(&timer))?;
        Ok(Self {
            shared,
            armed: RefCell::new(None),
            thread: Some(thread),
        })
    }

    /// Delivers the armed request if its deadline has passed, without
    /// blocking. Returns whether a flush ran.
    pub fn poll(&self) -> bool {
        {
            let mut state = self.lock();
            if !state.due {
                return false;
            }
            state.due = false;
        }
        self.deliver()
    }

    /// Blocks until the armed request comes due, then delivers it.
    /// Returns false immediately when nothing is armed.
    pub fn wait(&self) -> bool {
        {
            let mut state = self.lock();
            loop {
                if state.due {
                    state.due = false;
                    break;
                }
                if state.deadline.is_none() {
                    return false;
                }
                state = self
                    .shared
                    .cond
                    .wait(state)
                    .expect("timer state poisoned");
            }
        }
        self.deliver()
    }

    /// Like [`TimerHost::wait`], but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let give_up_at = Instant::now() + timeout;
        {
            let mut state = self.lock();
            loop {
                if state.due {
                    state.due = false;
                    break;
                }
                if state.deadline.is_none() {
                    return false;
                }
                let Some(remaining) = give_up_at.checked_duration_since(Instant::now()) else {
                    return false;
                };
                let (next, _) = self
                    .shared
                    .cond
                    .wait_timeout(state, remaining)
                    .expect("timer state poisoned");
                state = next;
            }
        }
        self.deliver()
    }

    fn deliver(&self) -> bool {
        let Some((flush, deadline)) = self.armed.borrow_mut().take() else {
            return false;
        };
        flush.invoke(deadline <= self.now());
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimerState> {
        self.shared.state.lock().expect("timer state poisoned")
    }
}

impl HostDriver for TimerHost {
    fn now(&self) -> f64 {
        self.shared.now()
    }

    fn request_callback(&self, flush: HostCallback, deadline: f64) {
        *self.armed.borrow_mut() = Some((flush, deadline));
        let mut state = self.lock();
        state.deadline = Some(deadline);
        state.due = false;
        self.shared.cond.notify_all();
    }

    fn cancel_callback(&self) {
        *self.armed.borrow_mut() = None;
        let mut state = self.lock();
        state.deadline = None;
        state.due = false;
        self.shared.cond.notify_all();
    }

    fn should_yield(&self) -> bool {
        false
    }
}

impl Drop for TimerHost {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.shutdown = true;
        }
        self.shared.cond.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn timer_loop(shared: &TimerShared) {
    let mut state = shared.state.lock().expect("timer state poisoned");
    loop {
        if state.shutdown {
            return;
        }
        match state.deadline {
            Some(deadline) => {
                let remaining = deadline - shared.now();
                if remaining <= 0.0 {
                    state.deadline = None;
                    state.due = true;
                    shared.cond.notify_all();
                } else {
                    let (next, _) = shared
                        .cond
                        .wait_timeout(state, Duration::from_secs_f64(remaining / 1000.0))
                        .expect("timer state poisoned");
                    state = next;
                }
            }
            None => {
                state = shared.cond.wait(state).expect("timer state poisoned");
            }
        }
    }
}
