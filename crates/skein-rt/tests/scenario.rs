// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! End-to-end generator/consumer scenarios over a full event loop.

use std::cell::RefCell;
use std::rc::Rc;

use skein_rt::{EventLoop, TaskContext, TaskId};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Spawn a child that yields `0, 1, 2` in order, then returns.
fn spawn_counter(ctx: &TaskContext) -> TaskId {
    ctx.spawn(|ctx| async move {
        for i in 0..3u32 {
            ctx.yield_value(i).await;
        }
    })
}

#[test]
fn parent_drains_two_children_then_joins() {
    init_tracing();
    let drained = Rc::new(RefCell::new(Vec::new()));
    let out = drained.clone();

    EventLoop::new().run(move |ctx| async move {
        let first = spawn_counter(&ctx);
        let second = spawn_counter(&ctx);

        for child in [first, second] {
            for _ in 0..3 {
                let value = ctx.yield_from(child).await;
                let value = *value.expect("child still yielding").downcast::<u32>().unwrap();
                out.borrow_mut().push((child, value));
            }
        }
        ctx.join(first).await;
        ctx.join(second).await;
    });

    // Three values from each child, in creation order. The run()
    // returning at all is the termination half of the property.
    let drained = drained.borrow();
    let (first_child, _) = drained[0];
    assert_eq!(
        drained
            .iter()
            .map(|&(child, value)| (child == first_child, value))
            .collect::<Vec<_>>(),
        [
            (true, 0),
            (true, 1),
            (true, 2),
            (false, 0),
            (false, 1),
            (false, 2),
        ]
    );
}

#[test]
fn many_producers_with_partial_drains() {
    // A fan of producers, each drained for fewer values than it
    // yields, then joined; the leftover values are discarded as each
    // producer runs to completion.
    init_tracing();
    let total = Rc::new(RefCell::new(0u32));
    let sum = total.clone();

    EventLoop::new().run(move |ctx| async move {
        let mut producers = Vec::new();
        for _ in 0..10 {
            producers.push(ctx.spawn(|ctx| async move {
                for i in 0..10u32 {
                    ctx.yield_value(i).await;
                }
            }));
        }
        for &p in &producers {
            for _ in 0..8 {
                let value = ctx.yield_from(p).await.expect("producer still yielding");
                *sum.borrow_mut() += *value.downcast::<u32>().unwrap();
            }
        }
        for p in producers {
            ctx.join(p).await;
        }
    });

    // Each producer contributes 0+1+..+7.
    assert_eq!(*total.borrow(), 10 * 28);
}

#[test]
fn chained_generators() {
    // A middle task consumes a source generator and republishes doubled
    // values; the root consumes the middle one.
    init_tracing();
    let doubled = Rc::new(RefCell::new(Vec::new()));
    let out = doubled.clone();

    EventLoop::new().run(move |ctx| async move {
        let source = spawn_counter(&ctx);
        let middle = ctx.spawn(move |ctx| async move {
            for _ in 0..3 {
                let value = ctx.yield_from(source).await.expect("source still yielding");
                let value = *value.downcast::<u32>().unwrap();
                ctx.yield_value(value * 2).await;
            }
            ctx.join(source).await;
        });

        for _ in 0..3 {
            let value = ctx.yield_from(middle).await.expect("middle still yielding");
            out.borrow_mut().push(*value.downcast::<u32>().unwrap());
        }
        ctx.join(middle).await;
    });

    assert_eq!(*doubled.borrow(), [0, 2, 4]);
}

#[test]
fn deep_spawn_tree_terminates() {
    // Each task spawns two children until depth 4 and joins both; the
    // loop must wind the whole tree down to zero unfinished tasks.
    init_tracing();
    let leaves = Rc::new(RefCell::new(0u32));

    fn grow(ctx: &TaskContext, depth: u32, leaves: Rc<RefCell<u32>>) -> TaskId {
        ctx.spawn(move |ctx| async move {
            if depth == 0 {
                *leaves.borrow_mut() += 1;
                return;
            }
            let left = grow(&ctx, depth - 1, leaves.clone());
            let right = grow(&ctx, depth - 1, leaves.clone());
            ctx.join(left).await;
            ctx.join(right).await;
        })
    }

    let count = leaves.clone();
    EventLoop::new().run(move |ctx| async move {
        let root = grow(&ctx, 4, count);
        ctx.join(root).await;
    });

    assert_eq!(*leaves.borrow(), 16);
}
