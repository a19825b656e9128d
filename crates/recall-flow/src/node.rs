//! Node implementations behind [`Flow`](crate::Flow).

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use futures::FutureExt;
use petgraph::stable_graph::NodeIndex;

use crate::context::Context;

/// Type-erased view of a node, as seen by the scheduler.
pub(crate) trait AnyNode {
    fn index(&self) -> NodeIndex;

    /// Visits the node during a pass. `dirty` means the node itself was
    /// marked; `upstream_changed` means a direct upstream changed this pass.
    /// Returns whether downstream nodes must be revisited.
    fn run(&self, dirty: bool, upstream_changed: bool) -> bool;

    /// Source-like nodes commit pending values even when nothing observes them.
    fn runs_cold(&self) -> bool {
        false
    }

    fn on_hot(&self) {}

    fn on_cold(&self) {}
}

/// A node that carries a value of type `T`.
pub(crate) trait ValueNode<T>: AnyNode {
    /// `None` until the node has been computed for the first time.
    fn value(&self) -> Option<T>;
}

/// Graph membership of a node; removes the vertex when the node is dropped.
pub(crate) struct NodeHandle {
    pub(crate) ctx: Context,
    pub(crate) index: NodeIndex,
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        self.ctx.remove_node(self.index);
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub(crate) struct SourceNode<T> {
    handle: NodeHandle,
    value: RefCell<T>,
    pending: RefCell<Option<T>>,
}

impl<T: Clone + 'static> SourceNode<T> {
    pub(crate) fn new(ctx: &Context, initial: T) -> Rc<Self> {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let index = ctx.add_node(weak.clone(), &[]);
            SourceNode {
                handle: NodeHandle {
                    ctx: ctx.clone(),
                    index,
                },
                value: RefCell::new(initial),
                pending: RefCell::new(None),
            }
        })
    }

    pub(crate) fn set(&self, value: T) {
        *self.pending.borrow_mut() = Some(value);
        self.handle.ctx.mark_dirty(self.handle.index);
    }

    /// The most recently set value, committed or not.
    pub(crate) fn latest(&self) -> T {
        match &*self.pending.borrow() {
            Some(v) => v.clone(),
            None => self.value.borrow().clone(),
        }
    }

    pub(crate) fn committed(&self) -> T {
        self.value.borrow().clone()
    }
}

impl<T: Clone + 'static> AnyNode for SourceNode<T> {
    fn index(&self) -> NodeIndex {
        self.handle.index
    }

    fn run(&self, _dirty: bool, _upstream_changed: bool) -> bool {
        match self.pending.borrow_mut().take() {
            Some(v) => {
                *self.value.borrow_mut() = v;
                true
            }
            None => false,
        }
    }

    fn runs_cold(&self) -> bool {
        true
    }
}

impl<T: Clone + 'static> ValueNode<T> for SourceNode<T> {
    fn value(&self) -> Option<T> {
        Some(self.committed())
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub(crate) type Activate<T> = Box<dyn Fn(crate::flow::MonitorHandle<T>) -> T>;

pub(crate) struct MonitorNode<T> {
    handle: NodeHandle,
    this: Weak<MonitorNode<T>>,
    value: RefCell<Option<T>>,
    pending: RefCell<Option<T>>,
    activate: Activate<T>,
    deactivate: Box<dyn Fn()>,
}

impl<T: Clone + 'static> MonitorNode<T> {
    pub(crate) fn new(ctx: &Context, activate: Activate<T>, deactivate: Box<dyn Fn()>) -> Rc<Self> {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let index = ctx.add_node(weak.clone(), &[]);
            MonitorNode {
                handle: NodeHandle {
                    ctx: ctx.clone(),
                    index,
                },
                this: weak.clone(),
                value: RefCell::new(None),
                pending: RefCell::new(None),
                activate,
                deactivate,
            }
        })
    }

    pub(crate) fn set(&self, value: T) {
        *self.pending.borrow_mut() = Some(value);
        self.handle.ctx.mark_dirty(self.handle.index);
    }

    pub(crate) fn latest(&self) -> Option<T> {
        match &*self.pending.borrow() {
            Some(v) => Some(v.clone()),
            None => self.value.borrow().clone(),
        }
    }
}

impl<T: Clone + 'static> AnyNode for MonitorNode<T> {
    fn index(&self) -> NodeIndex {
        self.handle.index
    }

    fn run(&self, _dirty: bool, _upstream_changed: bool) -> bool {
        match self.pending.borrow_mut().take() {
            Some(v) => {
                *self.value.borrow_mut() = Some(v);
                true
            }
            None => false,
        }
    }

    fn runs_cold(&self) -> bool {
        true
    }

    fn on_hot(&self) {
        let initial = (self.activate)(crate::flow::MonitorHandle::new(self.this.clone()));
        self.set(initial);
    }

    fn on_cold(&self) {
        (self.deactivate)();
    }
}

impl<T: Clone + 'static> ValueNode<T> for MonitorNode<T> {
    fn value(&self) -> Option<T> {
        self.value.borrow().clone()
    }
}

// ---------------------------------------------------------------------------
// Derived
// ---------------------------------------------------------------------------

/// Recompute function. Receives the previous value and returns the new one,
/// or `None` to leave the value (and downstream) untouched.
pub(crate) type Compute<T> = Box<dyn Fn(Option<&T>) -> Option<T>>;

pub(crate) struct DerivedNode<T> {
    handle: NodeHandle,
    value: RefCell<Option<T>>,
    compute: Compute<T>,
}

impl<T: Clone + 'static> DerivedNode<T> {
    pub(crate) fn new(ctx: &Context, upstream: &[NodeIndex], compute: Compute<T>) -> Rc<Self> {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let index = ctx.add_node(weak.clone(), upstream);
            DerivedNode {
                handle: NodeHandle {
                    ctx: ctx.clone(),
                    index,
                },
                value: RefCell::new(None),
                compute,
            }
        })
    }
}

impl<T: Clone + 'static> AnyNode for DerivedNode<T> {
    fn index(&self) -> NodeIndex {
        self.handle.index
    }

    fn run(&self, _dirty: bool, _upstream_changed: bool) -> bool {
        let next = {
            let prev = self.value.borrow();
            (self.compute)(prev.as_ref())
        };
        match next {
            Some(v) => {
                *self.value.borrow_mut() = Some(v);
                true
            }
            None => false,
        }
    }
}

impl<T: Clone + 'static> ValueNode<T> for DerivedNode<T> {
    fn value(&self) -> Option<T> {
        self.value.borrow().clone()
    }
}

// ---------------------------------------------------------------------------
// Async map
// ---------------------------------------------------------------------------

pub(crate) type Issue<U> = Box<dyn Fn() -> Option<futures::future::LocalBoxFuture<'static, U>>>;

/// Holds the placeholder until the computation for the latest upstream value
/// resolves. Each issue bumps `generation`; results from older generations
/// are dropped on arrival.
pub(crate) struct AsyncNode<U> {
    handle: NodeHandle,
    this: Weak<AsyncNode<U>>,
    value: RefCell<U>,
    pending: RefCell<Option<(u64, U)>>,
    generation: Cell<u64>,
    needs_issue: Cell<bool>,
    issue: Issue<U>,
}

impl<U: Clone + 'static> AsyncNode<U> {
    pub(crate) fn new(ctx: &Context, upstream: NodeIndex, placeholder: U, issue: Issue<U>) -> Rc<Self> {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let index = ctx.add_node(weak.clone(), &[upstream]);
            AsyncNode {
                handle: NodeHandle {
                    ctx: ctx.clone(),
                    index,
                },
                this: weak.clone(),
                value: RefCell::new(placeholder),
                pending: RefCell::new(None),
                generation: Cell::new(0),
                needs_issue: Cell::new(false),
                issue,
            }
        })
    }

    fn start(&self) {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        self.pending.borrow_mut().take();
        let Some(fut) = (self.issue)() else {
            return;
        };
        let weak = self.this.clone();
        self.handle.ctx.spawn(
            async move {
                let result = fut.await;
                if let Some(node) = weak.upgrade() {
                    node.resolve(generation, result);
                }
            }
            .boxed_local(),
        );
    }

    fn resolve(&self, generation: u64, result: U) {
        if generation != self.generation.get() {
            tracing::trace!(generation, "discarding stale async result");
            return;
        }
        *self.pending.borrow_mut() = Some((generation, result));
        self.handle.ctx.mark_dirty(self.handle.index);
    }
}

impl<U: Clone + 'static> AnyNode for AsyncNode<U> {
    fn index(&self) -> NodeIndex {
        self.handle.index
    }

    fn run(&self, _dirty: bool, upstream_changed: bool) -> bool {
        if upstream_changed || self.needs_issue.replace(false) {
            self.start();
            return false;
        }
        let arrived = self.pending.borrow_mut().take();
        match arrived {
            Some((generation, result)) if generation == self.generation.get() => {
                *self.value.borrow_mut() = result;
                true
            }
            _ => false,
        }
    }

    fn on_hot(&self) {
        self.needs_issue.set(true);
    }

    fn on_cold(&self) {
        // Invalidate whatever is in flight.
        self.generation.set(self.generation.get() + 1);
        self.pending.borrow_mut().take();
    }
}

impl<U: Clone + 'static> ValueNode<U> for AsyncNode<U> {
    fn value(&self) -> Option<U> {
        Some(self.value.borrow().clone())
    }
}
