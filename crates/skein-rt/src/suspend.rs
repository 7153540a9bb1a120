// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The suspension protocol: the operations a task body may invoke.
//!
//! Each operation returns a small hand-rolled future. Returning
//! `Pending` is the task's half of the control handoff; the event
//! loop's next step of this task is the other half. Task state is
//! reached through an explicit context handle, never ambient state.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::scheduler::LoopState;
use crate::task::{TaskFrame, TaskId, TaskStatus, TaskValue};

/// Handle to a task's own record and the scheduler stepping it.
///
/// Passed to every task body; cloned into every suspension future.
#[derive(Clone)]
pub struct TaskContext {
    id: TaskId,
    state: Rc<LoopState>,
}

impl TaskContext {
    pub(crate) fn new(id: TaskId, state: Rc<LoopState>) -> Self {
        Self { id, state }
    }

    /// The calling task's identity.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Another task's current status; `None` once it has finished and
    /// left the registry.
    pub fn status_of(&self, id: TaskId) -> Option<TaskStatus> {
        self.state.status_of(id)
    }

    /// Register a new task. Its body starts running when the scheduler
    /// first steps it, receiving its own context handle.
    pub fn spawn<F, Fut>(&self, body: F) -> TaskId
    where
        F: FnOnce(TaskContext) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.state
            .register(Box::new(move |ctx| -> TaskFrame { Box::pin(body(ctx)) }))
    }

    /// Give up the current turn; execution resumes right here on this
    /// task's next step.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow { yielded: false }
    }

    /// Wait until `other` has finished. Resolves without suspending when
    /// it already has.
    pub fn join(&self, other: TaskId) -> Join {
        Join {
            ctx: self.clone(),
            other,
        }
    }

    /// Publish `value` for whoever waits on this task, then pause until
    /// the value is consumed (or this task is otherwise resumed).
    pub fn yield_value<T: Any>(&self, value: T) -> YieldValue {
        YieldValue {
            ctx: self.clone(),
            value: Some(Box::new(value)),
        }
    }

    /// Wait for `other`'s next published value. `None` means `other`
    /// finished instead of publishing; callers switch to [`TaskContext::join`].
    pub fn yield_from(&self, other: TaskId) -> YieldFrom {
        YieldFrom {
            ctx: self.clone(),
            other,
            suspended: false,
        }
    }
}

/// Future of [`TaskContext::yield_now`]: suspends exactly once.
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            Poll::Pending
        }
    }
}

/// Future of [`TaskContext::join`]: pending until the target finishes.
///
/// Re-checks the target on every resume and re-suspends if it is still
/// underway, so a resume triggered by the target merely publishing a
/// value does not end the wait.
pub struct Join {
    ctx: TaskContext,
    other: TaskId,
}

impl Future for Join {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        match self.ctx.state.status_of(self.other) {
            // Absent from the registry means finished and removed.
            None | Some(TaskStatus::Done) => {
                self.ctx.state.with_task(self.ctx.id, |task| task.waiting = None);
                Poll::Ready(())
            }
            _ => {
                let other = self.other;
                self.ctx.state.with_task(self.ctx.id, |task| {
                    task.status = TaskStatus::Waiting;
                    task.waiting = Some(other);
                });
                Poll::Pending
            }
        }
    }
}

/// Future of [`TaskContext::yield_value`]: publishes, then suspends once.
pub struct YieldValue {
    ctx: TaskContext,
    value: Option<TaskValue>,
}

impl Future for YieldValue {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        match self.value.take() {
            Some(value) => {
                self.ctx.state.with_task(self.ctx.id, |task| {
                    task.yielded_value = Some(value);
                    task.status = TaskStatus::YieldedValue;
                });
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

/// Future of [`TaskContext::yield_from`]: suspends once, then takes the
/// target's published value.
pub struct YieldFrom {
    ctx: TaskContext,
    other: TaskId,
    suspended: bool,
}

impl Future for YieldFrom {
    type Output = Option<TaskValue>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<TaskValue>> {
        if !self.suspended {
            self.suspended = true;
            let other = self.other;
            self.ctx.state.with_task(self.ctx.id, |task| {
                task.status = TaskStatus::Waiting;
                task.waiting = Some(other);
            });
            return Poll::Pending;
        }
        // Resumed: the scheduler saw the target publish (or finish).
        // Ownership of the value moves to this task here.
        let value = {
            let mut tasks = self.ctx.state.tasks.borrow_mut();
            tasks
                .get_mut(&self.other)
                .and_then(|task| task.yielded_value.take())
        };
        self.ctx.state.with_task(self.ctx.id, |task| task.waiting = None);
        Poll::Ready(value)
    }
}
