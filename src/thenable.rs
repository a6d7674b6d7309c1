//! Foreign deferred values and the transition functions handed to them.
use crate::settlement::{Input, Settlement};
use std::fmt;

/// A value whose outcome a settlement can adopt instead of using it as a
/// payload.
///
/// `settle_into` is the `then(resolve, reject)` member: it must eventually
/// call one of `resolver`'s transition functions, from now or from later.
/// Returning `Err` means it failed synchronously and rejects the adopting
/// settlement.
///
/// Any `FnOnce(Resolver<T, E>) -> Result<(), E>` closure is a thenable.
///
/// Values are never checked for this trait. A thenable is only adopted when
/// it is passed as [`Resolution::Adopt`] or [`Rejection::Adopt`]; a
/// `Settlement<Settlement<T, E>, E>` resolved with [`Resolver::resolve`]
/// keeps the inner settlement as its value.
///
/// # Examples
///
/// ```
/// use settlement::{Resolution, Resolver, Settlement, TaskQueue};
/// let queue = TaskQueue::new();
/// let adopted = Settlement::<String, ()>::with_scheduler(queue.clone(), |r| {
///     r.resolve_with(Resolution::adopt(|inner: Resolver<String, ()>| -> Result<(), ()> {
///         inner.resolve("foreign".to_string());
///         Ok(())
///     }));
///     Ok(())
/// });
/// assert_eq!(queue.block_on(adopted), Ok(Ok("foreign".to_string())));
/// ```
pub trait Thenable<T, E> {
    fn settle_into(self: Box<Self>, resolver: Resolver<T, E>) -> Result<(), E>;
}

impl<T, E, F> Thenable<T, E> for F
where
    F: FnOnce(Resolver<T, E>) -> Result<(), E>,
{
    fn settle_into(self: Box<Self>, resolver: Resolver<T, E>) -> Result<(), E> {
        (*self)(resolver)
    }
}

/// What flows into the success transition: a plain value, or a thenable to
/// adopt.
pub enum Resolution<T, E> {
    Value(T),
    Adopt(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn adopt(thenable: impl Thenable<T, E> + 'static) -> Self {
        Self::Adopt(Box::new(thenable))
    }
}

impl<T, E> From<T> for Resolution<T, E> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Adopt(_) => f.write_str("Adopt(..)"),
        }
    }
}

/// What flows into the failure transition: a plain reason, or a thenable to
/// adopt. Adoption here mirrors the thenable's outcome as is, so a
/// fulfilled thenable fulfills the settlement.
pub enum Rejection<T, E> {
    Reason(E),
    Adopt(Box<dyn Thenable<T, E>>),
}

impl<T, E> Rejection<T, E> {
    pub fn adopt(thenable: impl Thenable<T, E> + 'static) -> Self {
        Self::Adopt(Box::new(thenable))
    }
}

impl<T, E> From<E> for Rejection<T, E> {
    fn from(reason: E) -> Self {
        Self::Reason(reason)
    }
}

impl<T, E: fmt::Debug> fmt::Debug for Rejection<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reason(reason) => f.debug_tuple("Reason").field(reason).finish(),
            Self::Adopt(_) => f.write_str("Adopt(..)"),
        }
    }
}

/// The transition functions of one settlement.
///
/// Calls after the settlement has settled are ignored, so a resolver can be
/// cloned and handed out freely.
///
/// `resolve` and `reject` settle with their argument as is. Adoption only
/// happens through `resolve_with` and `reject_with`.
pub struct Resolver<T, E> {
    settlement: Settlement<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            settlement: self.settlement.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settlement", &self.settlement)
            .finish()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Resolver<T, E> {
    pub(crate) fn new(settlement: Settlement<T, E>) -> Self {
        Self { settlement }
    }

    pub(crate) fn settlement(&self) -> &Settlement<T, E> {
        &self.settlement
    }

    pub fn resolve(&self, value: T) {
        self.settlement.transition(Input::Fulfill(value));
    }

    pub fn reject(&self, reason: E) {
        self.settlement.transition(Input::Reject(reason));
    }

    pub fn resolve_with(&self, resolution: Resolution<T, E>) {
        self.settlement.transition(match resolution {
            Resolution::Value(value) => Input::Fulfill(value),
            Resolution::Adopt(thenable) => Input::Adopt(thenable),
        });
    }

    pub fn reject_with(&self, rejection: Rejection<T, E>) {
        self.settlement.transition(match rejection {
            Rejection::Reason(reason) => Input::Reject(reason),
            Rejection::Adopt(thenable) => Input::Adopt(thenable),
        });
    }

    /// Routes a handler's captured result to the matching transition.
    pub(crate) fn settle(&self, result: Result<Resolution<T, E>, E>) {
        match result {
            Ok(resolution) => self.resolve_with(resolution),
            Err(reason) => self.reject(reason),
        }
    }
}
