//! The one-shot settlement state machine and the operations that chain new
//! settlements off existing ones.
use crate::queue::{Scheduler, Task, TaskQueue};
use crate::thenable::{Resolution, Resolver, Thenable};
use std::{
    cell::{Cell, RefCell},
    fmt, mem,
    rc::{Rc, Weak},
};
use tracing::{debug, trace};

type Observer<P> = Box<dyn FnOnce(P)>;

#[derive(Debug)]
enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fulfilled(_) => "fulfilled",
            Self::Rejected(_) => "rejected",
        }
    }

    fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// What a transition function was called with.
pub(crate) enum Input<T, E> {
    Fulfill(T),
    Reject(E),
    Adopt(Box<dyn Thenable<T, E>>),
}

/// A downstream settlement whose type no longer matters, kept alive by the
/// observer record that drives it.
trait Release {
    /// Gives up this handle. The last handle hands the settlement's own
    /// downstream links to `pending` instead of dropping them in place.
    fn release(self: Box<Self>, pending: &mut Vec<Link>);
}

type Link = Box<dyn Release>;

/// The paired wrappers one chaining call installs, plus the settlement they
/// drive. The wrappers only hold a weak handle to it.
struct ObserverRecord<T, E> {
    on_fulfilled: Observer<T>,
    on_rejected: Observer<E>,
    downstream: Option<Link>,
}

impl<T: 'static, E: 'static> ObserverRecord<T, E> {
    fn fulfill(self, value: T) -> Task {
        let Self {
            on_fulfilled,
            downstream,
            ..
        } = self;
        Box::new(move || {
            on_fulfilled(value);
            drop(downstream);
        })
    }

    fn reject(self, reason: E) -> Task {
        let Self {
            on_rejected,
            downstream,
            ..
        } = self;
        Box::new(move || {
            on_rejected(reason);
            drop(downstream);
        })
    }
}

struct Inner<T, E> {
    state: State<T, E>,
    observers: Vec<ObserverRecord<T, E>>,
    scheduler: Rc<dyn Scheduler>,
}

impl<T, E> Drop for Inner<T, E> {
    // A pending chain owns its whole tail; unwind it with a worklist so a
    // long chain cannot overflow the stack.
    fn drop(&mut self) {
        let mut pending: Vec<Link> = self
            .observers
            .drain(..)
            .filter_map(|record| record.downstream)
            .collect();
        while let Some(link) = pending.pop() {
            link.release(&mut pending);
        }
    }
}

/// A value that starts pending and settles exactly once, either fulfilled
/// with a `T` or rejected with an `E`.
///
/// Observers registered through [`then`](Settlement::then) and friends are
/// never run inline; they are deferred through the settlement's
/// [`Scheduler`] once it settles, in registration order. Registering on an
/// already settled value behaves as if the observer had been there all along.
///
/// Clones are handles to the same settlement. A handler that captures a
/// clone of the settlement it is registered on keeps that settlement alive
/// until it settles; if it never does, the pair leaks.
///
/// # Examples
///
/// ```
/// use settlement::{Resolution, Settlement, TaskQueue};
/// let queue = TaskQueue::new();
/// let recovered = Settlement::<String, String>::with_scheduler(queue.clone(), |_| {
///     Err("E".to_string())
/// })
/// .catch(|e| Ok(Resolution::Value(format!("caught:{e}"))));
/// assert_eq!(queue.block_on(recovered), Ok(Ok("caught:E".to_string())));
/// ```
pub struct Settlement<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Settlement<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for Settlement<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.try_borrow() {
            Ok(inner) => inner.state.name(),
            Err(_) => "transitioning",
        };
        f.debug_struct("Settlement").field("state", &state).finish()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Settlement<T, E> {
    /// Creates a settlement and runs `executor` on it synchronously.
    ///
    /// Observers are deferred onto [`TaskQueue::current`]. An `Err` returned
    /// by the executor rejects the settlement.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        Self::with_scheduler(TaskQueue::current(), executor)
    }

    /// Like [`new`](Settlement::new), deferring observers through
    /// `scheduler`. Settlements chained off this one share it.
    pub fn with_scheduler<S, F>(scheduler: S, executor: F) -> Self
    where
        S: Scheduler + 'static,
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        Self::from_scheduler(Rc::new(scheduler), executor)
    }

    fn from_scheduler<F>(scheduler: Rc<dyn Scheduler>, executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let settlement = Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                observers: vec![],
                scheduler,
            })),
        };
        if let Err(reason) = executor(Resolver::new(settlement.clone())) {
            debug!("executor failed");
            settlement.transition(Input::Reject(reason));
        }
        settlement
    }

    pub(crate) fn transition(&self, input: Input<T, E>) {
        if !self.inner.borrow().state.is_pending() {
            trace!("settlement already settled, transition ignored");
            return;
        }
        let state = match input {
            Input::Fulfill(value) => State::Fulfilled(value),
            Input::Reject(reason) => State::Rejected(reason),
            // Adoption leaves us pending; the thenable transitions us later.
            Input::Adopt(thenable) => return self.adopt(thenable),
        };
        trace!(state = state.name(), "settlement settled");
        self.inner.borrow_mut().state = state;
        self.dispatch();
    }

    fn adopt(&self, thenable: Box<dyn Thenable<T, E>>) {
        debug!("adopting a thenable");
        if let Err(reason) = thenable.settle_into(Resolver::new(self.clone())) {
            debug!("thenable failed during adoption");
            self.transition(Input::Reject(reason));
        }
    }

    /// Hands every observer for the settled outcome to the scheduler, then
    /// forgets both buffers. Does nothing while pending.
    fn dispatch(&self) {
        let (tasks, scheduler) = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let tasks: Vec<Task> = match &inner.state {
                State::Pending => return,
                State::Fulfilled(value) => mem::take(&mut inner.observers)
                    .into_iter()
                    .map(|record| record.fulfill(value.clone()))
                    .collect(),
                State::Rejected(reason) => mem::take(&mut inner.observers)
                    .into_iter()
                    .map(|record| record.reject(reason.clone()))
                    .collect(),
            };
            (tasks, Rc::clone(&inner.scheduler))
        };
        trace!(observers = tasks.len(), "dispatching observers");
        for task in tasks {
            scheduler.defer(task);
        }
    }

    fn register(&self, record: ObserverRecord<T, E>) {
        self.inner.borrow_mut().observers.push(record);
        self.dispatch();
    }

    /// Registers one observer per outcome that drives nothing downstream.
    pub(crate) fn observe(&self, on_fulfilled: Observer<T>, on_rejected: Observer<E>) {
        self.register(ObserverRecord {
            on_fulfilled,
            on_rejected,
            downstream: None,
        });
    }

    /// Registers wrappers that drive `next`. The record owns `next`; the
    /// wrappers reach it through a weak handle.
    pub(crate) fn link<U, F, R>(&self, next: &Settlement<U, E>, on_fulfilled: F, on_rejected: R)
    where
        U: Clone + 'static,
        F: FnOnce(T, Resolver<U, E>) + 'static,
        R: FnOnce(E, Resolver<U, E>) + 'static,
    {
        let (to_fulfill, to_reject) = (Rc::downgrade(&next.inner), Rc::downgrade(&next.inner));
        self.register(ObserverRecord {
            on_fulfilled: Box::new(move |value| {
                if let Some(next) = Settlement::upgrade(&to_fulfill) {
                    on_fulfilled(value, Resolver::new(next));
                }
            }),
            on_rejected: Box::new(move |reason| {
                if let Some(next) = Settlement::upgrade(&to_reject) {
                    on_rejected(reason, Resolver::new(next));
                }
            }),
            downstream: Some(Box::new(next.clone())),
        });
    }

    fn upgrade(inner: &Weak<RefCell<Inner<T, E>>>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Builds the downstream settlement and wires both wrappers to drive it.
    fn derive<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Settlement<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T, Resolver<U, E>) + 'static,
        R: FnOnce(E, Resolver<U, E>) + 'static,
    {
        let scheduler = Rc::clone(&self.inner.borrow().scheduler);
        let next = Settlement::from_scheduler(scheduler, |_| Ok(()));
        self.link(&next, on_fulfilled, on_rejected);
        next
    }

    /// Chains both a fulfillment and a rejection handler.
    ///
    /// Whichever handler runs decides the downstream outcome: `Ok` resolves
    /// it (adopting a returned thenable), `Err` rejects it.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Settlement<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.derive(
            move |value, next| next.settle(on_fulfilled(value)),
            move |reason, next| next.settle(on_rejected(reason)),
        )
    }

    /// Chains a fulfillment handler; rejections pass through untouched.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Settlement<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + 'static,
    {
        self.derive(
            move |value, next| next.settle(on_fulfilled(value)),
            |reason, next| next.reject(reason),
        )
    }

    /// Chains a rejection handler; fulfillments pass through untouched.
    pub fn catch<R>(&self, on_rejected: R) -> Settlement<T, E>
    where
        R: FnOnce(E) -> Result<Resolution<T, E>, E> + 'static,
    {
        self.derive(
            |value, next| next.resolve(value),
            move |reason, next| next.settle(on_rejected(reason)),
        )
    }

    /// A handler-less `then`: the downstream settlement mirrors this one.
    pub fn forward(&self) -> Settlement<T, E> {
        self.derive(
            |value, next| next.resolve(value),
            |reason, next| next.reject(reason),
        )
    }

    /// Runs `on_finally` on either outcome and passes the outcome on.
    ///
    /// If `on_finally` returns `Err`, that reason replaces the outcome,
    /// fulfilled or rejected.
    pub fn finally<F>(&self, on_finally: F) -> Settlement<T, E>
    where
        F: FnOnce() -> Result<(), E> + 'static,
    {
        let after_fulfilled = Rc::new(Cell::new(Some(on_finally)));
        let after_rejected = Rc::clone(&after_fulfilled);
        self.then(
            move |value| {
                run_once(&after_fulfilled)?;
                Ok(Resolution::Value(value))
            },
            move |reason| {
                run_once(&after_rejected)?;
                Err(reason)
            },
        )
    }
}

fn run_once<F, E>(slot: &Cell<Option<F>>) -> Result<(), E>
where
    F: FnOnce() -> Result<(), E>,
{
    slot.take().map_or(Ok(()), |on_finally| on_finally())
}

/// A settlement is itself a thenable, so settlements adopt each other.
impl<T: 'static, E: 'static> Release for Settlement<T, E> {
    fn release(self: Box<Self>, pending: &mut Vec<Link>) {
        // Still shared: dropping the handle only decrements the count.
        if let Ok(inner) = Rc::try_unwrap(self.inner) {
            let mut inner = inner.into_inner();
            pending.extend(
                inner
                    .observers
                    .drain(..)
                    .filter_map(|record| record.downstream),
            );
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Thenable<T, E> for Settlement<T, E> {
    fn settle_into(self: Box<Self>, resolver: Resolver<T, E>) -> Result<(), E> {
        self.link(
            resolver.settlement(),
            |value, next| next.resolve(value),
            |reason, next| next.reject(reason),
        );
        Ok(())
    }
}
