//! Single-flight runner with one coalesced follow-up.
//!
//! [`Locker::run`] starts the task if nothing is in flight. While a run is in
//! flight, the first caller schedules exactly one follow-up run and every
//! later caller joins that same follow-up. The follow-up starts once the
//! current run has finished, so it always observes the current run's effects.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures::future::{FutureExt, LocalBoxFuture, Shared};

/// A run that every caller can await.
pub type SharedRun<T> = Shared<LocalBoxFuture<'static, T>>;

struct Slots<T: Clone> {
    current: Option<SharedRun<T>>,
    next: Option<SharedRun<T>>,
}

pub struct Locker<T: Clone> {
    slots: Rc<RefCell<Slots<T>>>,
    task: Rc<dyn Fn() -> LocalBoxFuture<'static, T>>,
}

impl<T: Clone + 'static> Locker<T> {
    pub fn new(task: impl Fn() -> LocalBoxFuture<'static, T> + 'static) -> Self {
        Locker {
            slots: Rc::new(RefCell::new(Slots {
                current: None,
                next: None,
            })),
            task: Rc::new(task),
        }
    }

    /// Requests a run and returns the run that will satisfy the request.
    pub fn run(&self) -> SharedRun<T> {
        let mut slots = self.slots.borrow_mut();
        if let Some(next) = &slots.next {
            return next.clone();
        }
        match slots.current.clone() {
            None => {
                let run = self.launch(None);
                slots.current = Some(run.clone());
                run
            }
            Some(current) => {
                let run = self.launch(Some(current));
                slots.next = Some(run.clone());
                run
            }
        }
    }

    /// Whether a run is in flight.
    pub fn is_busy(&self) -> bool {
        self.slots.borrow().current.is_some()
    }

    pub fn has_follow_up(&self) -> bool {
        self.slots.borrow().next.is_some()
    }

    fn launch(&self, after: Option<SharedRun<T>>) -> SharedRun<T> {
        let slots: Weak<RefCell<Slots<T>>> = Rc::downgrade(&self.slots);
        let task = self.task.clone();
        async move {
            if let Some(previous) = after {
                previous.await;
                if let Some(slots) = slots.upgrade() {
                    let mut slots = slots.borrow_mut();
                    slots.current = slots.next.take();
                }
            }
            let result = task().await;
            if let Some(slots) = slots.upgrade() {
                let mut slots = slots.borrow_mut();
                if slots.next.is_none() {
                    slots.current = None;
                }
            }
            result
        }
        .boxed_local()
        .shared()
    }
}
