//! The "run later" primitive settlements hand their observers to.
//!
//! A settlement never invokes an observer inline with the call that settled
//! it. It defers each observer through a [`Scheduler`]. [`TaskQueue`] is the
//! default, a FIFO queue that somebody has to drain.
use crate::Error;
use futures::executor::LocalSpawner;
use futures::task::{noop_waker_ref, LocalSpawnExt};
use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    future::{Future, IntoFuture},
    pin::pin,
    rc::Rc,
    task::{Context, Poll},
};
use tracing::{trace, warn};

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Defers tasks until after the current call stack unwinds.
///
/// Implementations must preserve submission order among tasks, and must
/// never run a task from inside `defer`.
pub trait Scheduler {
    fn defer(&self, task: Task);
}

thread_local! {
    static CURRENT: TaskQueue = TaskQueue::new();
}

/// A single-threaded FIFO task queue.
///
/// # Examples
///
/// ```
/// use settlement::{Resolution, Settlement, TaskQueue};
/// let queue = TaskQueue::new();
/// let doubled = Settlement::<i32, String>::with_scheduler(queue.clone(), |r| {
///     r.resolve(21);
///     Ok(())
/// })
/// .and_then(|v| Ok(Resolution::Value(v * 2)));
/// assert_eq!(queue.block_on(doubled), Ok(Ok(42)));
/// ```
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The queue `Settlement::new` schedules onto for this thread.
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Runs the oldest queued task. Returns `false` if there was none.
    pub fn run_next(&self) -> bool {
        // The borrow must end before the task runs; tasks defer more tasks.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks, including ones queued along the way, until none are left.
    pub fn run_until_stalled(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        trace!(ran, "task queue drained");
        ran
    }

    /// Drives `future` to completion by draining this queue.
    ///
    /// Fails with [`Error::Stalled`] if the queue runs dry first: on a single
    /// thread nothing else could complete it.
    pub fn block_on<F: IntoFuture>(&self, future: F) -> Result<F::Output, Error> {
        let mut future = pin!(future.into_future());
        let mut cx = Context::from_waker(noop_waker_ref());
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Ok(output);
            }
            if !self.run_next() {
                return Err(Error::Stalled);
            }
        }
    }
}

impl Scheduler for TaskQueue {
    fn defer(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("queued", &self.len()).finish()
    }
}

/// Lets a `futures` local executor play the "run later" role.
///
/// Once the `LocalPool` behind the spawner is dropped, deferred tasks are
/// logged and discarded. Observers never run, so settlements chained off a
/// settlement using this scheduler stay pending for good.
impl Scheduler for LocalSpawner {
    fn defer(&self, task: Task) {
        if let Err(err) = self.spawn_local(async move { task() }) {
            warn!(%err, "host executor refused a deferred task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Settlement;
    use futures::executor::LocalPool;
    use std::cell::Cell;

    #[test]
    fn test_defer_never_runs_inline() {
        let queue = TaskQueue::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        queue.defer(Box::new(move || flag.set(true)));
        assert!(!ran.get());
        assert_eq!(queue.len(), 1);
        assert!(queue.run_next());
        assert!(ran.get());
        assert!(queue.is_empty());
        assert!(!queue.run_next());
    }

    #[test]
    fn test_tasks_run_in_submission_order() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(vec![]));
        for i in 0..4 {
            let log = log.clone();
            queue.defer(Box::new(move || log.borrow_mut().push(i)));
        }
        assert_eq!(queue.run_until_stalled(), 4);
        assert_eq!(*log.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_tasks_queued_while_draining_also_run() {
        let queue = TaskQueue::new();
        let log = Rc::new(RefCell::new(vec![]));
        let (inner_queue, inner_log) = (queue.clone(), log.clone());
        queue.defer(Box::new(move || {
            inner_log.borrow_mut().push("outer");
            let log = inner_log.clone();
            inner_queue.defer(Box::new(move || log.borrow_mut().push("inner")));
        }));
        assert_eq!(queue.run_until_stalled(), 2);
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_current_is_shared_within_a_thread() {
        let queue = TaskQueue::current();
        queue.defer(Box::new(|| {}));
        assert!(!TaskQueue::current().is_empty());
        TaskQueue::current().run_until_stalled();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_block_on_stalls_on_a_future_nothing_completes() {
        let queue = TaskQueue::new();
        assert_eq!(
            queue.block_on(futures::future::pending::<()>()),
            Err(Error::Stalled)
        );
    }

    #[test]
    fn test_local_spawner_defers_to_the_pool() {
        let mut pool = LocalPool::new();
        let ran = Rc::new(Cell::new(0));
        let counter = ran.clone();
        pool.spawner()
            .defer(Box::new(move || counter.set(counter.get() + 1)));
        assert_eq!(ran.get(), 0);
        pool.run_until_stalled();
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn test_spawner_without_a_pool_leaves_chains_pending() {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        drop(pool);
        let chained = Settlement::<i32, String>::with_scheduler(spawner, |r| {
            r.resolve(1);
            Ok(())
        })
        .forward();
        assert_eq!(format!("{chained:?}"), "Settlement { state: \"pending\" }");
    }
}
