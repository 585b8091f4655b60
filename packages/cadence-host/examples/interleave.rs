//! Chunked background work interleaved with urgent tasks on a headless
//! timer host. Run with `cargo run --example interleave`.

use cadence_host::{HostError, TimerHost};
use cadence_scheduler::{Priority, Scheduler, TaskResult};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

const TOTAL_ITEMS: usize = 1_000;
const CHUNK: usize = 250;

fn crunch(scheduler: Scheduler<TimerHost>, processed: Rc<Cell<usize>>, from: usize) -> TaskResult {
    let end = (from + CHUNK).min(TOTAL_ITEMS);
    for i in from..end {
        std::hint::black_box(i.wrapping_mul(i));
    }
    processed.set(end);
    tracing::info!(processed = end, total = TOTAL_ITEMS, "chunk complete");

    if end < TOTAL_ITEMS {
        if scheduler.should_yield() {
            tracing::info!("yielding to more urgent work");
        }
        TaskResult::Pending(Box::new(move || crunch(scheduler, processed, end)))
    } else {
        TaskResult::Done
    }
}

fn main() -> Result<(), HostError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let scheduler = Scheduler::new(TimerHost::new()?);
    let processed = Rc::new(Cell::new(0));

    {
        let sched = scheduler.clone();
        let processed = processed.clone();
        scheduler.schedule_callback_with_timeout(Priority::Normal, 10.0, move || {
            crunch(sched, processed, 0)
        });
    }
    scheduler.schedule_callback_with_timeout(Priority::UserBlocking, 5.0, || {
        tracing::info!("urgent task ran ahead of the background job");
        TaskResult::Done
    });

    while scheduler.pending_tasks() > 0 {
        scheduler.host().wait_timeout(Duration::from_secs(1));
    }

    tracing::info!(
        processed = processed.get(),
        stats = ?scheduler.stats(),
        "all work drained"
    );
    Ok(())
}
