// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative single-threaded task runtime.
//!
//! Lightweight tasks scheduled round-robin by one event loop, tracked
//! in an ordered registry keyed by a monotonically increasing task id.
//! Tasks hand control back only at explicit suspension points; nothing
//! runs in parallel and nothing preempts.
//!
//! Each task is a stackless coroutine: an `async` body compiled to a
//! heap-held resume-point state machine, started lazily on the task's
//! first step and dropped when it finishes. Suspending from arbitrarily
//! nested plain calls is traded away for doing without manual stacks
//! and raw context switches.
//!
//! Components:
//! - `task`      — task identity, status, and the per-task record
//! - `scheduler` — the event loop and its round/step/removal cycle
//! - `suspend`   — the protocol bodies use: yield, join, publish, consume
//!
//! ```
//! use skein_rt::EventLoop;
//!
//! EventLoop::new().run(|ctx| async move {
//!     let greeter = ctx.spawn(|ctx| async move {
//!         ctx.yield_value("hello").await;
//!     });
//!     let word = ctx.yield_from(greeter).await.unwrap();
//!     assert_eq!(*word.downcast::<&str>().unwrap(), "hello");
//!     ctx.join(greeter).await;
//! });
//! ```

pub mod scheduler;
pub mod suspend;
pub mod task;

pub use scheduler::EventLoop;
pub use suspend::{Join, TaskContext, YieldFrom, YieldNow, YieldValue};
pub use task::{TaskId, TaskStatus, TaskValue};
