//! Awaiting a settlement from async code.
//!
//! `Settlement` implements [`IntoFuture`], so host combinators such as
//! `futures::future::join_all` can wait on settlements alongside other
//! futures. The future only completes once the settlement's scheduler has
//! run its observers, so whoever drives it must also drive that scheduler.
use crate::Settlement;
use std::{
    cell::RefCell,
    fmt,
    future::{Future, IntoFuture},
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

/// The future returned by `Settlement::into_future`.
///
/// # Examples
///
/// ```
/// use futures::executor::LocalPool;
/// use settlement::{Resolution, Settlement};
/// let mut pool = LocalPool::new();
/// let answer = Settlement::<i32, ()>::with_scheduler(pool.spawner(), |r| {
///     r.resolve(40);
///     Ok(())
/// })
/// .and_then(|v| Ok(Resolution::Value(v + 2)));
/// assert_eq!(pool.run_until(async { answer.await }), Ok(42));
/// ```
pub struct Settled<T, E> {
    settlement: Option<Settlement<T, E>>,
    slot: Rc<RefCell<Slot<T, E>>>,
}

struct Slot<T, E> {
    value: Option<Result<T, E>>,
    waker: Option<Waker>,
}

impl<T, E> Slot<T, E> {
    fn fill(slot: &RefCell<Self>, outcome: Result<T, E>) {
        let waker = {
            let mut slot = slot.borrow_mut();
            slot.value = Some(outcome);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake()
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> IntoFuture for Settlement<T, E> {
    type Output = Result<T, E>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        Settled {
            settlement: Some(self),
            slot: Rc::new(RefCell::new(Slot {
                value: None,
                waker: None,
            })),
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Future for Settled<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        // Subscribe lazily so an unpolled future registers nothing.
        if let Some(settlement) = this.settlement.take() {
            let (on_fulfilled, on_rejected) = (this.slot.clone(), this.slot.clone());
            settlement.observe(
                Box::new(move |value| Slot::fill(&*on_fulfilled, Ok(value))),
                Box::new(move |reason| Slot::fill(&*on_rejected, Err(reason))),
            );
        }
        let mut slot = this.slot.borrow_mut();
        match slot.value.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T, E> fmt::Debug for Settled<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled")
            .field("subscribed", &self.settlement.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{Resolution, Settlement};
    use futures::executor::LocalPool;
    use futures::future::{join_all, select, Either};
    use futures::task::LocalSpawnExt;
    use std::{cell::RefCell, future::IntoFuture, rc::Rc};

    type Sample = Settlement<i32, String>;

    #[test]
    fn test_join_all_waits_on_settlements() {
        let mut pool = LocalPool::new();
        let first = Sample::with_scheduler(pool.spawner(), |r| {
            r.resolve(1);
            Ok(())
        });
        let second = first.and_then(|v| Ok(Resolution::Value(v + 1)));
        let failed = first.and_then(|_| Err::<Resolution<i32, String>, _>("no".into()));
        let results = pool.run_until(join_all(vec![
            first.into_future(),
            second.into_future(),
            failed.into_future(),
        ]));
        assert_eq!(results, vec![Ok(1), Ok(2), Err("no".to_string())]);
    }

    #[test]
    fn test_select_takes_the_settlement_that_settles() {
        let mut pool = LocalPool::new();
        let mut captured = None;
        let never = Sample::with_scheduler(pool.spawner(), |r| {
            captured = Some(r);
            Ok(())
        });
        let ready = Sample::with_scheduler(pool.spawner(), |r| {
            r.reject("first".into());
            Ok(())
        });
        let winner = pool.run_until(select(never.into_future(), ready.into_future()));
        match winner {
            Either::Right((outcome, _)) => assert_eq!(outcome, Err("first".to_string())),
            Either::Left(_) => panic!("the pending settlement cannot win"),
        }
        assert!(captured.is_some());
    }

    #[test]
    fn test_settling_later_wakes_the_awaiting_task() {
        let mut pool = LocalPool::new();
        let mut captured = None;
        let p = Sample::with_scheduler(pool.spawner(), |r| {
            captured = Some(r);
            Ok(())
        });
        let resolver = captured.expect("executor ran");
        let waiting = p.into_future();
        let handle = Rc::new(RefCell::new(None));
        let out = handle.clone();
        pool.spawner()
            .spawn_local(async move { *out.borrow_mut() = Some(waiting.await) })
            .expect("pool accepts tasks");
        pool.run_until_stalled();
        assert!(handle.borrow().is_none());
        resolver.resolve(7);
        pool.run_until_stalled();
        assert_eq!(*handle.borrow(), Some(Ok(7)));
    }

    #[test]
    fn test_settlements_await_each_other_in_async_blocks() {
        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let base = Sample::with_scheduler(spawner.clone(), |r| {
            r.resolve(20);
            Ok(())
        });
        let sum = pool.run_until(async move {
            let a = base.clone().await?;
            let b = base.and_then(|v| Ok(Resolution::Value(v + 2))).await?;
            Ok::<_, String>(a + b)
        });
        assert_eq!(sum, Ok(42));
    }
}
