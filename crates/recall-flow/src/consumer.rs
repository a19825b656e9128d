//! External observers of a flow.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use petgraph::stable_graph::NodeIndex;

use crate::context::Context;
use crate::flow::Flow;
use crate::node::{AnyNode, NodeHandle};

/// Sink vertex: runs the callback when its flow changes while on.
struct ConsumerNode<T> {
    handle: NodeHandle,
    flow: Flow<T>,
    callback: RefCell<Box<dyn FnMut(T)>>,
}

impl<T: Clone + 'static> AnyNode for ConsumerNode<T> {
    fn index(&self) -> NodeIndex {
        self.handle.index
    }

    fn run(&self, _dirty: bool, _upstream_changed: bool) -> bool {
        if let Some(value) = self.flow.get() {
            (self.callback.borrow_mut())(value);
        }
        false
    }
}

/// Keeps one flow, and everything it depends on, hot while on.
///
/// Turning on schedules delivery of the current value at the next flush.
/// Dropping a consumer turns it off.
pub struct Consumer {
    ctx: Context,
    node: Rc<dyn AnyNode>,
    on: Cell<bool>,
}

impl Consumer {
    pub(crate) fn new<T, F>(flow: Flow<T>, callback: F) -> Self
    where
        T: Clone + 'static,
        F: FnMut(T) + 'static,
    {
        let ctx = flow.context().clone();
        let upstream = flow.index();
        let node = Rc::new_cyclic(|weak: &Weak<ConsumerNode<T>>| {
            let index = ctx.add_node(weak.clone(), &[upstream]);
            ConsumerNode {
                handle: NodeHandle {
                    ctx: ctx.clone(),
                    index,
                },
                flow,
                callback: RefCell::new(Box::new(callback)),
            }
        });
        Consumer {
            ctx,
            node,
            on: Cell::new(false),
        }
    }

    pub fn turn_on(&self) {
        if !self.on.replace(true) {
            self.ctx.heat(self.node.index());
        }
    }

    pub fn turn_off(&self) {
        if self.on.replace(false) {
            self.ctx.cool(self.node.index());
        }
    }

    pub fn is_on(&self) -> bool {
        self.on.get()
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.turn_off();
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer").field("on", &self.on.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turning_on_twice_counts_once() {
        let ctx = Context::new();
        let source = ctx.create_state_flow(0);
        let consumer = source.consume(|_| {});
        consumer.turn_on();
        consumer.turn_on();
        assert!(source.is_hot());
        consumer.turn_off();
        assert!(!source.is_hot());
    }

    #[test]
    fn off_consumer_sees_nothing() {
        let ctx = Context::new();
        let source = ctx.create_state_flow(0);
        let seen = Rc::new(Cell::new(0));
        let sink = seen.clone();
        let consumer = source.consume(move |_| sink.set(sink.get() + 1));
        consumer.turn_on();
        ctx.flush();
        consumer.turn_off();
        source.set(1);
        ctx.flush();
        assert_eq!(seen.get(), 1);
        consumer.turn_on();
        ctx.flush();
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn drop_turns_off() {
        let ctx = Context::new();
        let source = ctx.create_state_flow(0);
        {
            let consumer = source.consume(|_| {});
            consumer.turn_on();
            assert!(source.is_hot());
        }
        assert!(!source.is_hot());
    }
}
