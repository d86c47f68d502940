//! Single-threaded timer queue on a virtual millisecond clock
//!
//! Every delayed action in the engine (delayed marker spawns, arc disposal,
//! the next simulation cycle) is a boxed callback that receives the owning
//! context when it fires. The owner moves the clock forward; timers run in
//! due-time order, ties in the order they were scheduled.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use tracing::{debug, trace};

pub type Task<C> = Box<dyn FnOnce(&mut C)>;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

struct Timer<C> {
    id: TimerId,
    due_ms: u64,
    label: &'static str,
    token: Option<CancelToken>,
    task: Task<C>,
}

impl<C> PartialEq for Timer<C> {
    fn eq(&self, other: &Self) -> bool {
        self.due_ms == other.due_ms && self.id == other.id
    }
}

impl<C> Eq for Timer<C> {}

impl<C> PartialOrd for Timer<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap pops the earliest (due, id) first
impl<C> Ord for Timer<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due_ms
            .cmp(&self.due_ms)
            .then_with(|| other.id.cmp(&self.id))
    }
}

pub struct Scheduler<C> {
    now_ms: u64,
    next_id: u64,
    queue: BinaryHeap<Timer<C>>,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self {
            now_ms: 0,
            next_id: 0,
            queue: BinaryHeap::new(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Timers still waiting, cancelled ones included until their due time.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Run `task` once `delay_ms` has elapsed, unless `token` is cancelled by
    /// then.
    pub fn schedule(
        &mut self,
        delay_ms: u64,
        label: &'static str,
        token: Option<CancelToken>,
        task: impl FnOnce(&mut C) + 'static,
    ) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let due_ms = self.now_ms.saturating_add(delay_ms);
        trace!(?id, label, due_ms, "timer scheduled");
        self.queue.push(Timer {
            id,
            due_ms,
            label,
            token,
            task: Box::new(task),
        });
        id
    }

    fn pop_due(&mut self, until_ms: u64) -> Option<Timer<C>> {
        if self.queue.peek()?.due_ms > until_ms {
            return None;
        }
        let timer = self.queue.pop()?;
        self.now_ms = self.now_ms.max(timer.due_ms);
        Some(timer)
    }
}

/// Implemented by a context that owns its own scheduler.
pub trait Scheduled: Sized {
    fn scheduler(&mut self) -> &mut Scheduler<Self>;

    /// Move the clock forward by `ms`, running every timer that falls due on
    /// the way, including timers scheduled by the timers that run. Returns
    /// how many callbacks ran.
    fn advance(&mut self, ms: u64) -> usize {
        let until_ms = self.scheduler().now_ms.saturating_add(ms);
        let mut ran = 0;
        while let Some(timer) = self.scheduler().pop_due(until_ms) {
            if timer.token.as_ref().is_some_and(CancelToken::is_cancelled) {
                debug!(id = ?timer.id, label = timer.label, "timer cancelled");
                continue;
            }
            (timer.task)(self);
            ran += 1;
        }
        let scheduler = self.scheduler();
        scheduler.now_ms = scheduler.now_ms.max(until_ms);
        ran
    }
}
