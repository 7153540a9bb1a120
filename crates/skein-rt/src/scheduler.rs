// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The event loop: round-robin stepping over the task registry.
//!
//! Each round snapshots the registry in ascending-id order, steps every
//! task that is runnable at visit time, then applies the removals the
//! round deferred. The loop ends when no task remains unfinished.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use skein_tree::{Duplicate, RbTree};
use tracing::trace;

use crate::suspend::TaskContext;
use crate::task::{Task, TaskBody, TaskFrame, TaskId, TaskStatus};

/// Scheduler state shared between the loop and every task context.
///
/// One logical thread of control: interior mutability stands in for
/// locks, and the deferred-removal list keeps the registry from being
/// reshaped while a round's snapshot is being taken.
pub(crate) struct LoopState {
    pub tasks: RefCell<RbTree<TaskId, Task>>,
    /// Tasks observed finishing this round; removed once the round ends.
    pub finalized: RefCell<Vec<TaskId>>,
    pub next_id: Cell<u64>,
    pub unfinished: Cell<usize>,
}

impl LoopState {
    fn new(capacity: usize) -> Self {
        Self {
            tasks: RefCell::new(RbTree::with_capacity(capacity)),
            finalized: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            unfinished: Cell::new(0),
        }
    }

    /// Register a new task under the next free identifier.
    ///
    /// A `Duplicate` from the registry hands the record back; the retry
    /// terminates because identifiers only ever increase.
    pub(crate) fn register(&self, mut body: TaskBody) -> TaskId {
        loop {
            let id = TaskId(self.next_id.get());
            self.next_id.set(self.next_id.get() + 1);
            match self.tasks.borrow_mut().insert(id, Task::new(id, body)) {
                Ok(_) => {
                    self.unfinished.set(self.unfinished.get() + 1);
                    trace!(%id, "task registered");
                    return id;
                }
                Err(Duplicate(_, task)) => {
                    body = task.body.expect("unstarted task keeps its body");
                }
            }
        }
    }

    /// Run `f` on the record for `id`. The caller guarantees liveness; a
    /// missing record here is a scheduler defect.
    pub(crate) fn with_task<R>(&self, id: TaskId, f: impl FnOnce(&mut Task) -> R) -> R {
        let mut tasks = self.tasks.borrow_mut();
        let task = tasks.get_mut(&id).expect("stepped task is present in the registry");
        f(task)
    }

    pub(crate) fn status_of(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.borrow().get(&id).map(|t| t.status)
    }
}

/// The cooperative event loop.
///
/// Owns the task registry (tasks live nowhere else) and drives repeated
/// rounds over it until every task, transitively spawned ones included,
/// has finished.
pub struct EventLoop {
    state: Rc<LoopState>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self::with_task_capacity(0)
    }

    /// Preallocate registry slots for `capacity` concurrent tasks.
    pub fn with_task_capacity(capacity: usize) -> Self {
        Self {
            state: Rc::new(LoopState::new(capacity)),
        }
    }

    /// Register `main_body` and run scheduling rounds until no unfinished
    /// task remains. Blocks the calling context; there is no return value.
    pub fn run<F, Fut>(self, main_body: F)
    where
        F: FnOnce(TaskContext) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let state = self.state;
        state.register(Box::new(move |ctx| -> TaskFrame { Box::pin(main_body(ctx)) }));

        let mut round = Vec::new();
        loop {
            // Snapshot ascending ids; tasks spawned while the round runs
            // are first visited in the following round.
            round.clear();
            state.tasks.borrow().traverse(|id, _| round.push(*id));
            trace!(tasks = round.len(), "scheduling round");
            for &id in &round {
                step(&state, id);
            }
            // Removal is forbidden mid-traversal and mid-round; apply the
            // round's deferred removals now.
            {
                let mut tasks = state.tasks.borrow_mut();
                for id in state.finalized.borrow_mut().drain(..) {
                    let removed = tasks.remove(&id);
                    debug_assert!(removed.is_some(), "finalized task already removed");
                    trace!(%id, "task removed");
                }
            }
            if state.unfinished.get() == 0 {
                break;
            }
        }
    }
}

/// One scheduling step for `id`.
///
/// The status is re-read at visit time: a round's snapshot goes stale as
/// earlier steps run, and a task another step finished or fed must not
/// be stepped on outdated information.
fn step(state: &Rc<LoopState>, id: TaskId) {
    let Some(status) = state.status_of(id) else {
        return;
    };
    match status {
        TaskStatus::Created => {
            let body = state
                .with_task(id, |task| {
                    task.status = TaskStatus::Yielded;
                    task.body.take()
                })
                .expect("created task has a body");
            // First step: build the frame, then run to the first
            // suspension point or to completion.
            let frame = body(TaskContext::new(id, Rc::clone(state)));
            trace!(%id, "task started");
            poll_task(state, id, frame);
        }
        TaskStatus::Waiting => {
            let target = state
                .with_task(id, |task| task.waiting)
                .unwrap_or_else(|| unreachable!("waiting task has no wait target"));
            match state.status_of(target) {
                // Absent means the dependency finished and was removed.
                None | Some(TaskStatus::Done) => {
                    state.with_task(id, |task| {
                        task.waiting = None;
                        task.status = TaskStatus::Yielded;
                    });
                    resume(state, id);
                }
                Some(TaskStatus::YieldedValue) => {
                    // Mark the published value consumed; the resumed
                    // waiter picks it up before anything else runs.
                    state.with_task(target, |task| task.status = TaskStatus::Yielded);
                    state.with_task(id, |task| task.status = TaskStatus::Yielded);
                    resume(state, id);
                }
                // Dependency still underway: skip this round.
                _ => {}
            }
        }
        TaskStatus::Yielded => resume(state, id),
        // Observed by waiters or queued for removal; never stepped.
        TaskStatus::YieldedValue | TaskStatus::Done => {}
    }
}

fn resume(state: &Rc<LoopState>, id: TaskId) {
    let frame = state
        .with_task(id, |task| {
            // A published value not consumed by now is dead: its validity
            // ends when the publisher resumes.
            task.yielded_value = None;
            task.frame.take()
        })
        .expect("runnable task has a live frame");
    poll_task(state, id, frame);
}

fn poll_task(state: &Rc<LoopState>, id: TaskId, mut frame: TaskFrame) {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    match frame.as_mut().poll(&mut cx) {
        Poll::Ready(()) => {
            // The frame drop right here is the task's single stack
            // release, at the transition into Done.
            drop(frame);
            state.with_task(id, |task| {
                task.status = TaskStatus::Done;
                task.waiting = None;
                task.yielded_value = None;
            });
            state.unfinished.set(state.unfinished.get() - 1);
            state.finalized.borrow_mut().push(id);
            trace!(%id, "task finished");
        }
        Poll::Pending => {
            state.with_task(id, |task| task.frame = Some(frame));
        }
    }
}

/// Scheduling is status-driven, not waker-driven; polls get a no-op waker.
fn noop_waker() -> Waker {
    fn clone(_: *const ()) -> RawWaker {
        noop_raw_waker()
    }
    fn wake(_: *const ()) {}
    fn wake_by_ref(_: *const ()) {}
    fn drop(_: *const ()) {}

    fn noop_raw_waker() -> RawWaker {
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    unsafe { Waker::from_raw(noop_raw_waker()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_body_finishes_in_one_round() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        EventLoop::new().run(move |_ctx| async move {
            flag.set(true);
        });
        assert!(ran.get());
    }

    #[test]
    fn finished_task_is_gone_next_round() {
        // Round 1: main spawns the child and suspends (the child is not
        // in round 1's snapshot). Round 2: main resumes first (lower id),
        // then the child runs, finishes, and is removed at end of round.
        // Round 3: main observes the child gone from the registry.
        let observed = Rc::new(RefCell::new(Vec::new()));
        let log = observed.clone();
        EventLoop::new().run(move |ctx| async move {
            let child = ctx.spawn(|_ctx| async {});
            ctx.yield_now().await;
            log.borrow_mut().push(ctx.status_of(child));
            ctx.yield_now().await;
            log.borrow_mut().push(ctx.status_of(child));
        });
        assert_eq!(*observed.borrow(), [Some(TaskStatus::Created), None]);
    }

    #[test]
    fn spawned_tasks_run_even_if_creator_returns_first() {
        // The unfinished count includes Created tasks, so the loop keeps
        // running for a child its creator never waited on.
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        EventLoop::new().run(move |ctx| async move {
            ctx.spawn(move |_ctx| async move {
                flag.set(true);
            });
        });
        assert!(ran.get());
    }

    #[test]
    fn rounds_visit_tasks_in_ascending_id_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let log = order.clone();
        EventLoop::new().run(move |ctx| async move {
            for _ in 0..3 {
                let log = log.clone();
                ctx.spawn(move |ctx| async move {
                    log.borrow_mut().push(ctx.id());
                });
            }
        });
        let order = order.borrow();
        assert_eq!(order.len(), 3);
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn with_task_capacity_runs_like_new() {
        let count = Rc::new(Cell::new(0));
        let n = count.clone();
        EventLoop::with_task_capacity(8).run(move |ctx| async move {
            for _ in 0..4 {
                let n = n.clone();
                ctx.spawn(move |_ctx| async move {
                    n.set(n.get() + 1);
                });
            }
        });
        assert_eq!(count.get(), 4);
    }

    #[test]
    fn identifiers_increase_monotonically() {
        let ids = Rc::new(RefCell::new(Vec::new()));
        let log = ids.clone();
        EventLoop::new().run(move |ctx| async move {
            log.borrow_mut().push(ctx.id());
            for _ in 0..3 {
                log.borrow_mut().push(ctx.spawn(|_ctx| async {}));
            }
        });
        let ids = ids.borrow();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
