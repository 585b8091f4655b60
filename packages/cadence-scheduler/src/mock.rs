use crate::host::{HostCallback, HostDriver};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Deterministic host driver for tests: a manually advanced virtual clock
/// and manual delivery of the armed callback. Cloning returns another
/// handle to the same driver, so a test keeps control after handing one to
/// the scheduler.
#[derive(Clone, Default)]
pub struct MockHost {
    state: Rc<MockState>,
}

#[derive(Default)]
struct MockState {
    now: Cell<f64>,
    should_yield: Cell<bool>,
    armed: RefCell<Option<(HostCallback, f64)>>,
    requests: Cell<u64>,
    cancels: Cell<u64>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: f64) {
        self.state.now.set(self.state.now.get() + ms);
    }

    pub fn set_should_yield(&self, yield_now: bool) {
        self.state.should_yield.set(yield_now);
    }

    pub fn has_armed(&self) -> bool {
        self.state.armed.borrow().is_some()
    }

    pub fn armed_deadline(&self) -> Option<f64> {
        self.state.armed.borrow().as_ref().map(|(_, d)| *d)
    }

    pub fn request_count(&self) -> u64 {
        self.state.requests.get()
    }

    pub fn cancel_count(&self) -> u64 {
        self.state.cancels.get()
    }

    /// Delivers the armed callback with `did_timeout` computed from the
    /// virtual clock (deadline at or before now). Returns `false` when
    /// nothing was armed.
    pub fn fire(&self) -> bool {
        let Some((flush, deadline)) = self.state.armed.borrow_mut().take() else {
            return false;
        };
        flush.invoke(deadline <= self.state.now.get());
        true
    }

    /// Delivers with an explicit `did_timeout`, ignoring the clock.
    pub fn fire_with(&self, did_timeout: bool) -> bool {
        let Some((flush, _)) = self.state.armed.borrow_mut().take() else {
            return false;
        };
        flush.invoke(did_timeout);
        true
    }

    /// Advances the clock to each armed deadline and fires until the
    /// scheduler stops re-arming. Returns the number of deliveries.
    pub fn run_until_idle(&self) -> usize {
        let mut fired = 0;
        while let Some(deadline) = self.armed_deadline() {
            if deadline > self.state.now.get() {
                self.state.now.set(deadline);
            }
            self.fire();
            fired += 1;
            assert!(fired < 100_000, "scheduler never went idle");
        }
        fired
    }
}

impl HostDriver for MockHost {
    fn now(&self) -> f64 {
        self.state.now.get()
    }

    fn request_callback(&self, flush: HostCallback, deadline: f64) {
        self.state.requests.set(self.state.requests.get() + 1);
        *self.state.armed.borrow_mut() = Some((flush, deadline));
    }

    fn cancel_callback(&self) {
        self.state.cancels.set(self.state.cancels.get() + 1);
        *self.state.armed.borrow_mut() = None;
    }

    fn should_yield(&self) -> bool {
        self.state.should_yield.get()
    }
}
