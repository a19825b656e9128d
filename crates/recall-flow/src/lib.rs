//! Single-threaded reactive dataflow engine.
//!
//! Values live in a DAG of nodes owned by a [`Context`]. Sources
//! ([`StateFlow`]) and monitors ([`Context::monitor`]) are set from outside;
//! derived nodes ([`Flow::map`], [`Flow::concat`], ...) recompute from their
//! upstream. A [`Consumer`] observes one node and keeps it and everything
//! upstream of it *hot*; cold derived nodes are never recomputed.
//!
//! Mutations only mark nodes dirty. Nothing propagates until the caller ends
//! the batch with [`Context::flush`], which runs propagation passes in
//! topological order until no dirty node remains. Every node is visited at
//! most once per pass, so setting a source several times before a flush
//! yields a single downstream notification carrying the last value.

mod cache;
mod consumer;
mod context;
mod flow;
mod node;

pub use cache::{CacheLease, FlowCache};
pub use consumer::Consumer;
pub use context::Context;
pub use flow::{Flow, MonitorHandle, StateFlow};
