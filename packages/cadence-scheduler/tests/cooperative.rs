use cadence_scheduler::{MockHost, Priority, Scheduler, TaskResult};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn yields_when_a_more_urgent_task_arrives() {
    let mock = MockHost::new();
    let scheduler = Scheduler::new(mock.clone());
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        let sched = scheduler.clone();
        scheduler.schedule_callback(Priority::Normal, move || {
            log.borrow_mut().push("long:part1");

            // A more urgent task shows up mid-execution. The host budget is
            // fine, but the urgency inversion alone must flip the yield
            // signal.
            {
                let log = log.clone();
                sched.schedule_callback(Priority::UserBlocking, move || {
                    log.borrow_mut().push("urgent");
                    TaskResult::Done
                });
            }
            assert!(sched.should_yield());

            let log = log.clone();
            TaskResult::Pending(Box::new(move || {
                log.borrow_mut().push("long:part2");
                TaskResult::Done
            }))
        });
    }

    mock.fire();
    assert_eq!(*log.borrow(), vec!["long:part1", "urgent", "long:part2"]);
}

#[test]
fn host_budget_exhaustion_stops_the_flush_loop() {
    let mock = MockHost::new();
    let scheduler = Scheduler::new(mock.clone());
    let log = Rc::new(RefCell::new(Vec::new()));

    for name in ["t1", "t2"] {
        let log = log.clone();
        scheduler.schedule_callback(Priority::Normal, move || {
            log.borrow_mut().push(name);
            TaskResult::Done
        });
    }

    mock.set_should_yield(true);
    mock.fire();
    // One task per slice once the budget reads as exhausted, and the
    // driver is re-armed for the remainder.
    assert_eq!(*log.borrow(), vec!["t1"]);
    assert!(mock.has_armed());

    mock.set_should_yield(false);
    mock.fire();
    assert_eq!(*log.borrow(), vec!["t1", "t2"]);
    assert!(!mock.has_armed());
}

#[test]
fn continuation_keeps_deadline_and_runs_before_equal_deadline_work() {
    let mock = MockHost::new();
    let scheduler = Scheduler::new(mock.clone());
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        scheduler.schedule_callback(Priority::Normal, move || {
            log.borrow_mut().push("a:start");
            let log = log.clone();
            TaskResult::Pending(Box::new(move || {
                log.borrow_mut().push("a:resume");
                TaskResult::Done
            }))
        });
    }
    {
        let log = log.clone();
        scheduler.schedule_callback(Priority::Normal, move || {
            log.borrow_mut().push("b");
            TaskResult::Done
        });
    }

    // Stop after the first task so the continuation sits in the queue.
    mock.set_should_yield(true);
    mock.fire();
    assert_eq!(*log.borrow(), vec!["a:start"]);

    // Re-queued under its original deadline (not a fresh one), and ahead
    // of the equal-deadline task it already preceded.
    assert_eq!(mock.armed_deadline(), Some(Priority::Normal.timeout()));

    mock.set_should_yield(false);
    mock.fire();
    assert_eq!(*log.borrow(), vec!["a:start", "a:resume", "b"]);

    let stats = scheduler.stats();
    assert_eq!(stats.continuations, 1);
    assert_eq!(stats.tasks_completed, 2);
}

#[test]
fn timeout_flush_drains_all_overdue_work_despite_yield_signal() {
    let mock = MockHost::new();
    let scheduler = Scheduler::new(mock.clone());
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        let sched = scheduler.clone();
        scheduler.schedule_callback(Priority::UserBlocking, move || {
            log.borrow_mut().push("user-blocking");
            // No yielding during a catch-up pass, whatever the host says.
            assert!(!sched.should_yield());
            TaskResult::Done
        });
    }
    for (priority, name) in [(Priority::Normal, "normal"), (Priority::Low, "low")] {
        let log = log.clone();
        scheduler.schedule_callback(priority, move || {
            log.borrow_mut().push(name);
            TaskResult::Done
        });
    }

    mock.set_should_yield(true);
    mock.advance(20_000.0);
    mock.fire();

    assert_eq!(*log.borrow(), vec!["user-blocking", "normal", "low"]);
    assert_eq!(scheduler.stats().timeout_flushes, 1);
    assert!(!mock.has_armed());
}

#[test]
fn pause_stops_flushing_and_continue_rearms() {
    let mock = MockHost::new();
    let scheduler = Scheduler::new(mock.clone());
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        let sched = scheduler.clone();
        scheduler.schedule_callback(Priority::Normal, move || {
            log.borrow_mut().push("t1");
            sched.pause_execution();
            TaskResult::Done
        });
    }
    {
        let log = log.clone();
        scheduler.schedule_callback(Priority::Normal, move || {
            log.borrow_mut().push("t2");
            TaskResult::Done
        });
    }

    mock.fire();
    assert_eq!(*log.borrow(), vec!["t1"]);
    assert!(scheduler.is_paused());
    assert_eq!(scheduler.pending_tasks(), 1);

    // Deliveries while paused are inert.
    mock.fire();
    assert_eq!(*log.borrow(), vec!["t1"]);

    scheduler.continue_execution();
    assert!(mock.has_armed());
    mock.fire();
    assert_eq!(*log.borrow(), vec!["t1", "t2"]);
}

#[test]
fn immediate_task_does_not_run_synchronously_at_top_level() {
    let mock = MockHost::new();
    let scheduler = Scheduler::new(mock.clone());
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        scheduler.schedule_callback(Priority::Immediate, move || {
            log.borrow_mut().push("immediate");
            TaskResult::Done
        });
    }

    // A bare schedule arms the driver (at an already-expired deadline); it
    // does not drain inline.
    assert!(log.borrow().is_empty());
    assert!(mock.has_armed());

    mock.fire();
    assert_eq!(*log.borrow(), vec!["immediate"]);
}

#[test]
fn chunked_work_interleaves_across_slices() {
    let mock = MockHost::new();
    let scheduler = Scheduler::new(mock.clone());
    let progress = Rc::new(RefCell::new(Vec::new()));

    fn step(
        scheduler: Scheduler<MockHost>,
        progress: Rc<RefCell<Vec<usize>>>,
        from: usize,
    ) -> TaskResult {
        for i in from..10 {
            progress.borrow_mut().push(i);
            if i + 1 < 10 && scheduler.should_yield() {
                let next = i + 1;
                return TaskResult::Pending(Box::new(move || {
                    step(scheduler, progress, next)
                }));
            }
        }
        TaskResult::Done
    }

    {
        let sched = scheduler.clone();
        let progress = progress.clone();
        scheduler.schedule_callback(Priority::Normal, move || step(sched, progress, 0));
    }

    // Budget exhausted after every chunk: each slice runs one chunk and
    // yields a continuation.
    mock.set_should_yield(true);
    let mut slices = 0;
    while mock.has_armed() {
        mock.fire_with(false);
        slices += 1;
        assert!(slices <= 10, "chunked task never finished");
    }

    assert_eq!(*progress.borrow(), (0..10).collect::<Vec<_>>());
    assert_eq!(slices, 10);
    assert_eq!(scheduler.stats().continuations, 9);
}
