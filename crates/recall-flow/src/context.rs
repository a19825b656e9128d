//! The propagation scheduler.
//!
//! A [`Context`] owns the node graph, the dirty set, the freeze counter and
//! the queue of outstanding asynchronous computations. It is a cheap `Rc`
//! handle; clones share state.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context as TaskContext, Poll};

use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::task::noop_waker_ref;
use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;

use crate::flow::{Flow, MonitorHandle, StateFlow};
use crate::node::{AnyNode, DerivedNode, MonitorNode, SourceNode};

/// Graph vertex: a weak pointer to the node plus its hot-reference count.
struct Slot {
    node: Weak<dyn AnyNode>,
    hot: usize,
}

struct Inner {
    /// Edges point from upstream to downstream.
    graph: RefCell<StableDiGraph<Slot, ()>>,
    dirty: RefCell<HashSet<NodeIndex>>,
    frozen: Cell<usize>,
    in_pass: Cell<bool>,
    passes: Cell<u64>,
    tasks: RefCell<FuturesUnordered<LocalBoxFuture<'static, ()>>>,
}

/// Handle to a flow graph and its scheduler.
#[derive(Clone)]
pub struct Context {
    inner: Rc<Inner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("nodes", &self.node_count())
            .field("frozen", &self.inner.frozen.get())
            .field("passes", &self.inner.passes.get())
            .finish()
    }
}

/// Clears the in-pass flag even if a node panics mid-pass.
struct PassGuard<'a>(&'a Cell<bool>);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Context {
    pub fn new() -> Self {
        Context {
            inner: Rc::new(Inner {
                graph: RefCell::new(StableDiGraph::default()),
                dirty: RefCell::new(HashSet::new()),
                frozen: Cell::new(0),
                in_pass: Cell::new(false),
                passes: Cell::new(0),
                tasks: RefCell::new(FuturesUnordered::new()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Node constructors
    // -----------------------------------------------------------------------

    /// Creates a mutable source cell.
    pub fn create_state_flow<T: Clone + 'static>(&self, initial: T) -> StateFlow<T> {
        let node = SourceNode::new(self, initial);
        StateFlow::from_node(self.clone(), node)
    }

    /// Creates a monitor: a source whose value comes from `activate`, run on
    /// every cold-to-hot transition, and which is retired by `deactivate` on
    /// hot-to-cold. The handle passed to `activate` lets external event
    /// sources push new values while the monitor is hot.
    pub fn monitor<T, A, D>(&self, activate: A, deactivate: D) -> Flow<T>
    where
        T: Clone + 'static,
        A: Fn(MonitorHandle<T>) -> T + 'static,
        D: Fn() + 'static,
    {
        let node = MonitorNode::new(self, Box::new(activate), Box::new(deactivate));
        Flow::from_node(self.clone(), node)
    }

    /// Concatenates the current snapshots of several list-valued flows, in order.
    pub fn flatten<T: Clone + 'static>(&self, flows: Vec<Flow<Vec<T>>>) -> Flow<Vec<T>> {
        let upstream: Vec<NodeIndex> = flows.iter().map(|f| f.index()).collect();
        let node = DerivedNode::new(
            self,
            &upstream,
            Box::new(move |_prev: Option<&Vec<T>>| {
                let mut out = Vec::new();
                for flow in &flows {
                    if let Some(items) = flow.get() {
                        out.extend(items);
                    }
                }
                Some(out)
            }),
        );
        Flow::from_node(self.clone(), node)
    }

    // -----------------------------------------------------------------------
    // Batching
    // -----------------------------------------------------------------------

    /// Suspends propagation. Calls nest; every `freeze` needs a matching `thaw`.
    pub fn freeze(&self) {
        self.inner.frozen.set(self.inner.frozen.get() + 1);
    }

    /// Undoes one `freeze`. The last thaw immediately catches up.
    pub fn thaw(&self) {
        let frozen = self.inner.frozen.get();
        if frozen == 0 {
            tracing::warn!("thaw called on a context that is not frozen");
            return;
        }
        self.inner.frozen.set(frozen - 1);
        if frozen == 1 {
            self.flush();
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get() > 0
    }

    /// Ends the current batch: runs propagation passes until no node is
    /// dirty. A no-op while frozen or when called from inside a pass; in the
    /// latter case the mutations are picked up by the running flush.
    pub fn flush(&self) {
        while !self.is_frozen() && !self.inner.in_pass.get() && self.has_dirty() {
            self.run_pass();
        }
    }

    /// Number of propagation passes run so far.
    pub fn pass_count(&self) -> u64 {
        self.inner.passes.get()
    }

    pub fn node_count(&self) -> usize {
        self.inner.graph.borrow().node_count()
    }

    fn has_dirty(&self) -> bool {
        !self.inner.dirty.borrow().is_empty()
    }

    fn run_pass(&self) {
        let dirty = std::mem::take(&mut *self.inner.dirty.borrow_mut());
        self.inner.in_pass.set(true);
        let _guard = PassGuard(&self.inner.in_pass);
        self.inner.passes.set(self.inner.passes.get() + 1);

        let order = {
            let graph = self.inner.graph.borrow();
            match toposort(&*graph, None) {
                Ok(order) => order,
                // Nodes can only depend on nodes that already exist.
                Err(cycle) => panic!("flow graph has a cycle at {:?}", cycle.node_id()),
            }
        };

        let mut changed: HashSet<NodeIndex> = HashSet::new();
        let mut visited = 0usize;
        for idx in order {
            let is_dirty = dirty.contains(&idx);
            let (node, hot, upstream_changed) = {
                let graph = self.inner.graph.borrow();
                let Some(slot) = graph.node_weight(idx) else {
                    continue;
                };
                let upstream_changed = graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .any(|up| changed.contains(&up));
                (slot.node.upgrade(), slot.hot, upstream_changed)
            };
            if !is_dirty && !upstream_changed {
                continue;
            }
            let Some(node) = node else { continue };
            if hot == 0 && !node.runs_cold() {
                continue;
            }
            visited += 1;
            if node.run(is_dirty, upstream_changed) {
                changed.insert(idx);
            }
        }
        tracing::trace!(
            pass = self.inner.passes.get(),
            visited,
            changed = changed.len(),
            "flow pass complete"
        );
    }

    // -----------------------------------------------------------------------
    // Asynchronous computations
    // -----------------------------------------------------------------------

    pub(crate) fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        self.inner.tasks.borrow_mut().push(task);
    }

    /// Number of asynchronous computations still outstanding.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    fn poll_tasks(&self, cx: &mut TaskContext<'_>) -> Poll<Option<()>> {
        let mut tasks = self.inner.tasks.borrow_mut();
        if tasks.is_empty() {
            return Poll::Ready(None);
        }
        tasks.poll_next_unpin(cx)
    }

    /// Polls outstanding asynchronous computations without blocking, flushing
    /// after every completion. Returns how many completed.
    pub fn run_until_stalled(&self) -> usize {
        let mut cx = TaskContext::from_waker(noop_waker_ref());
        let mut completed = 0;
        self.flush();
        while let Poll::Ready(Some(())) = self.poll_tasks(&mut cx) {
            completed += 1;
            self.flush();
        }
        completed
    }

    /// Drives outstanding asynchronous computations to completion, flushing
    /// after each one.
    pub async fn settle(&self) {
        self.flush();
        while (Settle { ctx: self }).await.is_some() {
            self.flush();
        }
    }

    // -----------------------------------------------------------------------
    // Graph bookkeeping (used by nodes and consumers)
    // -----------------------------------------------------------------------

    pub(crate) fn add_node(&self, node: Weak<dyn AnyNode>, upstream: &[NodeIndex]) -> NodeIndex {
        let mut graph = self.inner.graph.borrow_mut();
        let idx = graph.add_node(Slot { node, hot: 0 });
        for &up in upstream {
            graph.add_edge(up, idx, ());
        }
        idx
    }

    pub(crate) fn remove_node(&self, idx: NodeIndex) {
        if let Ok(mut graph) = self.inner.graph.try_borrow_mut() {
            graph.remove_node(idx);
        }
        self.inner.dirty.borrow_mut().remove(&idx);
    }

    pub(crate) fn mark_dirty(&self, idx: NodeIndex) {
        self.inner.dirty.borrow_mut().insert(idx);
    }

    pub(crate) fn is_hot(&self, idx: NodeIndex) -> bool {
        self.inner
            .graph
            .borrow()
            .node_weight(idx)
            .is_some_and(|slot| slot.hot > 0)
    }

    /// Adds one hot reference to `root` and everything upstream of it.
    /// Nodes that become hot are marked dirty and told about it.
    pub(crate) fn heat(&self, root: NodeIndex) {
        let newly_hot = self.adjust_hot(root, true);
        for node in &newly_hot {
            self.mark_dirty(node.index());
        }
        for node in &newly_hot {
            node.on_hot();
        }
        self.mark_dirty(root);
    }

    /// Drops one hot reference from `root` and everything upstream of it.
    pub(crate) fn cool(&self, root: NodeIndex) {
        for node in self.adjust_hot(root, false) {
            node.on_cold();
        }
    }

    /// Walks the upstream closure of `root` once per node and returns the
    /// nodes whose count crossed zero, upstream first.
    fn adjust_hot(&self, root: NodeIndex, up: bool) -> Vec<Rc<dyn AnyNode>> {
        let mut graph = self.inner.graph.borrow_mut();
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        let mut crossed = Vec::new();
        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            let Some(slot) = graph.node_weight_mut(idx) else {
                continue;
            };
            let crossed_zero = if up {
                slot.hot += 1;
                slot.hot == 1
            } else if slot.hot > 0 {
                slot.hot -= 1;
                slot.hot == 0
            } else {
                false
            };
            if crossed_zero {
                if let Some(node) = slot.node.upgrade() {
                    crossed.push(node);
                }
            }
            stack.extend(graph.neighbors_directed(idx, Direction::Incoming));
        }
        crossed.reverse();
        crossed
    }
}

struct Settle<'a> {
    ctx: &'a Context,
}

impl Future for Settle<'_> {
    type Output = Option<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        self.ctx.poll_tasks(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thaw_without_freeze_is_ignored() {
        let ctx = Context::new();
        ctx.thaw();
        assert!(!ctx.is_frozen());
    }

    #[test]
    fn nested_freeze_needs_matching_thaws() {
        let ctx = Context::new();
        let source = ctx.create_state_flow(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let consumer = source.consume(move |v| sink.borrow_mut().push(v));
        consumer.turn_on();
        ctx.flush();

        ctx.freeze();
        ctx.freeze();
        source.set(5);
        ctx.thaw();
        ctx.flush();
        assert_eq!(*seen.borrow(), vec![0]);
        ctx.thaw();
        assert_eq!(*seen.borrow(), vec![0, 5]);
    }

    #[test]
    fn dropped_nodes_leave_the_graph() {
        let ctx = Context::new();
        let source = ctx.create_state_flow(1);
        let before = ctx.node_count();
        {
            let _mapped = source.map(|v| v * 2);
            assert_eq!(ctx.node_count(), before + 1);
        }
        assert_eq!(ctx.node_count(), before);
    }

    #[test]
    fn cold_derived_nodes_are_not_recomputed() {
        let ctx = Context::new();
        let source = ctx.create_state_flow(1);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let mapped = source.map(move |v| {
            counter.set(counter.get() + 1);
            v + 1
        });
        source.set(2);
        ctx.flush();
        assert_eq!(calls.get(), 0);
        assert_eq!(mapped.get(), None);

        let consumer = mapped.consume(|_| {});
        consumer.turn_on();
        ctx.flush();
        assert_eq!(calls.get(), 1);
        assert_eq!(mapped.get(), Some(3));
    }
}
