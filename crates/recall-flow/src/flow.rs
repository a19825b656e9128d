//! Public node handles and operators.

use std::future::Future;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use futures::FutureExt;
use petgraph::stable_graph::NodeIndex;

use crate::consumer::Consumer;
use crate::context::Context;
use crate::node::{AsyncNode, DerivedNode, MonitorNode, SourceNode, ValueNode};

/// A read-only node of the flow graph.
///
/// Cloning a `Flow` clones the handle, not the node.
pub struct Flow<T> {
    ctx: Context,
    node: Rc<dyn ValueNode<T>>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Flow {
            ctx: self.ctx.clone(),
            node: self.node.clone(),
        }
    }
}

impl<T: Clone + 'static> Flow<T> {
    pub(crate) fn from_node<N: ValueNode<T> + 'static>(ctx: Context, node: Rc<N>) -> Self {
        Flow { ctx, node }
    }

    pub(crate) fn index(&self) -> NodeIndex {
        self.node.index()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Current value. `None` for a derived node that has not been computed
    /// yet, which happens while it is cold.
    pub fn get(&self) -> Option<T> {
        self.node.value()
    }

    /// Whether some consumer currently keeps this node hot.
    pub fn is_hot(&self) -> bool {
        self.ctx.is_hot(self.index())
    }

    fn derive<U, F>(&self, upstream: &[NodeIndex], compute: F) -> Flow<U>
    where
        U: Clone + 'static,
        F: Fn(Option<&U>) -> Option<U> + 'static,
    {
        let node = DerivedNode::new(&self.ctx, upstream, Box::new(compute));
        Flow::from_node(self.ctx.clone(), node)
    }

    pub fn map<U, F>(&self, f: F) -> Flow<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> U + 'static,
    {
        let upstream = self.clone();
        self.derive(&[self.index()], move |_prev| {
            upstream.get().map(|v| f(&v))
        })
    }

    /// Pairs this flow with `other`. Recomputes when either side changes,
    /// using the other side's latest value.
    pub fn concat<U>(&self, other: &Flow<U>) -> Flow<(T, U)>
    where
        U: Clone + 'static,
    {
        let (a, b) = (self.clone(), other.clone());
        self.derive(&[self.index(), other.index()], move |_prev| {
            Some((a.get()?, b.get()?))
        })
    }

    pub fn concat2<U, V>(&self, b: &Flow<U>, c: &Flow<V>) -> Flow<(T, U, V)>
    where
        U: Clone + 'static,
        V: Clone + 'static,
    {
        let (a, b2, c2) = (self.clone(), b.clone(), c.clone());
        self.derive(&[self.index(), b.index(), c.index()], move |_prev| {
            Some((a.get()?, b2.get()?, c2.get()?))
        })
    }

    /// Stops propagation when `eq(previous, next)` holds.
    pub fn distinct_until_changed<F>(&self, eq: F) -> Flow<T>
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        let upstream = self.clone();
        self.derive(&[self.index()], move |prev: Option<&T>| {
            let next = upstream.get()?;
            match prev {
                Some(prev) if eq(prev, &next) => None,
                _ => Some(next),
            }
        })
    }

    /// Runs `f` for every upstream value and publishes its result once it
    /// resolves. Holds `placeholder` until the first result arrives. A result
    /// whose input has since been superseded is dropped.
    pub fn map_async<U, F, Fut>(&self, f: F, placeholder: U) -> Flow<U>
    where
        U: Clone + 'static,
        F: Fn(T) -> Fut + 'static,
        Fut: Future<Output = U> + 'static,
    {
        let upstream = self.clone();
        let issue = Box::new(move || upstream.get().map(|v| f(v).boxed_local()));
        let node = AsyncNode::new(&self.ctx, self.index(), placeholder, issue);
        Flow::from_node(self.ctx.clone(), node)
    }

    /// Creates an observer that calls `callback` with every new value while on.
    /// The consumer starts off.
    pub fn consume<F>(&self, callback: F) -> Consumer
    where
        F: FnMut(T) + 'static,
    {
        Consumer::new(self.clone(), callback)
    }
}

// ---------------------------------------------------------------------------
// StateFlow
// ---------------------------------------------------------------------------

/// A mutable source cell.
///
/// `set` takes effect at the next propagation pass; until then [`Flow::get`]
/// keeps returning the committed value.
pub struct StateFlow<T> {
    source: Rc<SourceNode<T>>,
    flow: Flow<T>,
}

impl<T> Clone for StateFlow<T> {
    fn clone(&self) -> Self {
        StateFlow {
            source: self.source.clone(),
            flow: self.flow.clone(),
        }
    }
}

impl<T: Clone + 'static> StateFlow<T> {
    pub(crate) fn from_node(ctx: Context, source: Rc<SourceNode<T>>) -> Self {
        let flow = Flow::from_node(ctx, source.clone());
        StateFlow { source, flow }
    }

    pub fn set(&self, value: T) {
        self.source.set(value);
    }

    /// Replaces the value with `f(latest)`, where `latest` includes sets not
    /// yet propagated.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.source.latest());
        self.source.set(next);
    }

    /// The committed value.
    pub fn value(&self) -> T {
        self.source.committed()
    }

    pub fn flow(&self) -> Flow<T> {
        self.flow.clone()
    }
}

impl<T> Deref for StateFlow<T> {
    type Target = Flow<T>;

    fn deref(&self) -> &Flow<T> {
        &self.flow
    }
}

// ---------------------------------------------------------------------------
// MonitorHandle
// ---------------------------------------------------------------------------

/// Setter handed to a monitor's activate callback.
///
/// Holds the monitor weakly; sets after the monitor is dropped are ignored.
pub struct MonitorHandle<T> {
    node: Weak<MonitorNode<T>>,
}

impl<T> Clone for MonitorHandle<T> {
    fn clone(&self) -> Self {
        MonitorHandle {
            node: self.node.clone(),
        }
    }
}

impl<T: Clone + 'static> MonitorHandle<T> {
    pub(crate) fn new(node: Weak<MonitorNode<T>>) -> Self {
        MonitorHandle { node }
    }

    pub fn set(&self, value: T) {
        if let Some(node) = self.node.upgrade() {
            node.set(value);
        }
    }

    /// Applies `f` to the latest value, including sets not yet propagated.
    /// Does nothing before the first activation.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        if let Some(node) = self.node.upgrade() {
            if let Some(latest) = node.latest() {
                node.set(f(&latest));
            }
        }
    }

    pub fn latest(&self) -> Option<T> {
        self.node.upgrade().and_then(|node| node.latest())
    }

    pub fn is_alive(&self) -> bool {
        self.node.strong_count() > 0
    }
}
