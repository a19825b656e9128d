//! Behavioral tests for batching and the operator set.

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;
use recall_flow::{Consumer, Context, Flow};

fn record<T: Clone + 'static>(flow: &Flow<T>) -> (Consumer, Rc<RefCell<Vec<T>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let consumer = flow.consume(move |v| sink.borrow_mut().push(v));
    (consumer, seen)
}

#[test]
fn freeze_holds_back_notifications_until_thaw() {
    let ctx = Context::new();
    let source = ctx.create_state_flow(0);
    let (consumer, outputs) = record(&source);
    consumer.turn_on();
    assert!(outputs.borrow().is_empty());

    ctx.flush();
    assert_eq!(outputs.borrow().len(), 1);

    source.set(1);
    ctx.flush();
    assert_eq!(outputs.borrow().len(), 2);

    ctx.freeze();
    source.set(2);
    ctx.flush();
    assert_eq!(outputs.borrow().len(), 2);

    ctx.thaw();
    assert_eq!(outputs.borrow().len(), 3);

    source.set(3);
    ctx.flush();
    assert_eq!(*outputs.borrow(), vec![0, 1, 2, 3]);
}

#[test]
fn thaw_delivers_only_the_final_state() {
    let ctx = Context::new();
    let source = ctx.create_state_flow(0);
    let (consumer, outputs) = record(&source);
    consumer.turn_on();
    ctx.flush();

    ctx.freeze();
    for v in 1..=5 {
        source.set(v);
        ctx.flush();
    }
    ctx.thaw();
    assert_eq!(*outputs.borrow(), vec![0, 5]);
}

#[test]
fn map_follows_source() {
    let ctx = Context::new();
    let source = ctx.create_state_flow(0);
    let (consumer, outputs) = record(&source.map(|v| v + 1));
    consumer.turn_on();
    ctx.flush();
    source.set(1);
    ctx.flush();
    source.set(2);
    ctx.flush();
    assert_eq!(*outputs.borrow(), vec![1, 2, 3]);
}

#[test]
fn concat_updates_independently() {
    let ctx = Context::new();
    let a = ctx.create_state_flow(0);
    let b = ctx.create_state_flow(0);
    let (consumer, outputs) = record(&a.concat(&b));
    consumer.turn_on();
    ctx.flush();

    a.set(1);
    ctx.flush();
    b.set(2);
    ctx.flush();
    a.set(3);
    b.set(3);
    ctx.flush();
    b.set(4);
    ctx.flush();

    assert_eq!(
        *outputs.borrow(),
        vec![(0, 0), (1, 0), (1, 2), (3, 3), (3, 4)]
    );
}

#[test]
fn distinct_suppresses_repeats_but_source_sees_them() {
    let ctx = Context::new();
    let source = ctx.create_state_flow(0);
    let distinct = source.distinct_until_changed(|a, b| a == b);
    let (before_consumer, before) = record(&source);
    let (after_consumer, after) = record(&distinct);
    before_consumer.turn_on();
    after_consumer.turn_on();
    ctx.flush();
    assert_eq!(*before.borrow(), vec![0]);
    assert_eq!(*after.borrow(), vec![0]);

    source.set(1);
    ctx.flush();
    assert_eq!(*before.borrow(), vec![0, 1]);
    assert_eq!(*after.borrow(), vec![0, 1]);

    source.set(1);
    ctx.flush();
    assert_eq!(*before.borrow(), vec![0, 1, 1]);
    assert_eq!(*after.borrow(), vec![0, 1]);
}

#[test]
fn synchronous_sets_coalesce() {
    let ctx = Context::new();
    let source = ctx.create_state_flow(0);
    let (consumer, outputs) = record(&source);
    consumer.turn_on();
    source.set(1);
    source.set(2);
    assert!(outputs.borrow().is_empty());
    ctx.flush();
    assert_eq!(*outputs.borrow(), vec![2]);
    assert_eq!(ctx.pass_count(), 1);
}

#[test]
fn sets_inside_a_pass_land_in_the_next_pass() {
    let ctx = Context::new();
    let trigger = ctx.create_state_flow(0);
    let echo = ctx.create_state_flow(0);
    let (echo_consumer, echoes) = record(&echo);
    echo_consumer.turn_on();

    let forward = echo.clone();
    let relay = trigger.consume(move |v| forward.set(v * 10));
    relay.turn_on();
    ctx.flush();
    let passes = ctx.pass_count();

    trigger.set(4);
    ctx.flush();
    assert_eq!(*echoes.borrow(), vec![0, 0, 40]);
    assert_eq!(ctx.pass_count(), passes + 2);
}

#[test]
fn map_async_drops_stale_results() {
    let ctx = Context::new();
    let source = ctx.create_state_flow(0usize);

    let mut senders = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..4 {
        let (tx, rx) = oneshot::channel::<i64>();
        senders.push(Some(tx));
        receivers.push(Some(rx));
    }
    let receivers = Rc::new(RefCell::new(receivers));
    let pending = receivers.clone();

    let mapped = source.map_async(
        move |index| {
            let rx = pending.borrow_mut()[index].take();
            async move {
                match rx {
                    Some(rx) => rx.await.unwrap_or(-100),
                    None => -100,
                }
            }
        },
        -1,
    );
    let (consumer, outputs) = record(&mapped);
    consumer.turn_on();

    ctx.run_until_stalled();
    assert_eq!(*outputs.borrow(), vec![-1]);
    assert_eq!(ctx.pending_tasks(), 1);

    let _ = senders[0].take().unwrap().send(0);
    ctx.run_until_stalled();
    assert_eq!(*outputs.borrow(), vec![-1, 0]);

    source.set(1);
    ctx.run_until_stalled();
    assert_eq!(*outputs.borrow(), vec![-1, 0]);
    let _ = senders[1].take().unwrap().send(1);
    ctx.run_until_stalled();
    assert_eq!(*outputs.borrow(), vec![-1, 0, 1]);

    // Input 2 is superseded by 3 before its result arrives.
    source.set(2);
    ctx.run_until_stalled();
    source.set(3);
    ctx.run_until_stalled();
    let _ = senders[3].take().unwrap().send(3);
    ctx.run_until_stalled();
    let _ = senders[2].take().unwrap().send(2);
    ctx.run_until_stalled();

    assert_eq!(*outputs.borrow(), vec![-1, 0, 1, 3]);
    assert_eq!(ctx.pending_tasks(), 0);
}

#[test]
fn settle_drives_ready_computations() {
    let ctx = Context::new();
    let source = ctx.create_state_flow(2);
    let doubled = source.map_async(|v| async move { v * 2 }, 0);
    let (consumer, outputs) = record(&doubled);
    consumer.turn_on();
    futures::executor::block_on(ctx.settle());
    assert_eq!(*outputs.borrow(), vec![0, 4]);

    source.set(5);
    futures::executor::block_on(ctx.settle());
    assert_eq!(*outputs.borrow(), vec![0, 4, 10]);
}

#[test]
fn reheated_derived_node_recomputes() {
    let ctx = Context::new();
    let source = ctx.create_state_flow(1);
    let mapped = source.map(|v| v * 3);
    let (consumer, outputs) = record(&mapped);
    consumer.turn_on();
    ctx.flush();
    consumer.turn_off();
    source.set(2);
    ctx.flush();
    assert_eq!(mapped.get(), Some(3));
    consumer.turn_on();
    ctx.flush();
    assert_eq!(*outputs.borrow(), vec![3, 6]);
}

mod batching {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn one_notification_per_flush_with_last_value(values in proptest::collection::vec(any::<i32>(), 1..20)) {
            let ctx = Context::new();
            let source = ctx.create_state_flow(0);
            let (consumer, outputs) = record(&source.map(|v| *v));
            consumer.turn_on();
            ctx.flush();
            for v in &values {
                source.set(*v);
            }
            ctx.flush();
            let outputs = outputs.borrow();
            prop_assert_eq!(outputs.len(), 2);
            prop_assert_eq!(outputs[1], *values.last().unwrap());
        }
    }
}
