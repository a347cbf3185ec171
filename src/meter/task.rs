//! Wait Gates
//!
//! A [`Task`] is a single-threaded completion signal: anyone holding a
//! clone may `finish` it, anyone may await [`Task::finished`]. Presentation
//! code hands tasks to the meter to hold playback until an animation or
//! sound completes.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tokio::task::AbortHandle;

type Callback = Box<dyn FnOnce()>;

#[derive(Default)]
struct TaskInner {
    finished: bool,
    callbacks: Vec<Callback>,
    wakers: Vec<Waker>,
    timer: Option<AbortHandle>,
}

/// Shared completion handle.
#[derive(Clone, Default)]
pub struct Task {
    inner: Rc<RefCell<TaskInner>>,
}

impl Task {
    /// Unfinished task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Task that finishes itself after `duration`.
    ///
    /// The timer runs on the current `LocalSet`; finishing the task early
    /// aborts it.
    ///
    /// # Panics
    ///
    /// Panics when called outside a `tokio::task::LocalSet`.
    pub fn delay(duration: Duration) -> Self {
        let task = Self::new();
        let timer = task.clone();
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(duration).await;
            timer.finish();
        });
        task.inner.borrow_mut().timer = Some(handle.abort_handle());
        task
    }

    /// Mark the task finished. Idempotent.
    ///
    /// Completion callbacks run synchronously, in registration order, before
    /// this returns; pending `finished()` futures are woken.
    pub fn finish(&self) {
        let (callbacks, wakers, timer) = {
            let mut inner = self.inner.borrow_mut();
            if inner.finished {
                return;
            }
            inner.finished = true;
            (
                std::mem::take(&mut inner.callbacks),
                std::mem::take(&mut inner.wakers),
                inner.timer.take(),
            )
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        for waker in wakers {
            waker.wake();
        }
        for callback in callbacks {
            callback();
        }
    }

    /// Has `finish` been called?
    pub fn is_finished(&self) -> bool {
        self.inner.borrow().finished
    }

    /// Run `callback` on completion, or now if already finished.
    pub fn on_finish(&self, callback: impl FnOnce() + 'static) {
        let mut inner = self.inner.borrow_mut();
        if inner.finished {
            drop(inner);
            callback();
        } else {
            inner.callbacks.push(Box::new(callback));
        }
    }

    /// Future resolving once the task is finished.
    pub fn finished(&self) -> Finished {
        Finished { task: self.clone() }
    }

    /// Identity of the underlying task, shared by all clones.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    /// Do both handles refer to the same task?
    pub fn ptr_eq(&self, other: &Task) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Future returned by [`Task::finished`].
#[derive(Debug)]
pub struct Finished {
    task: Task,
}

impl Future for Finished {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.task.inner.borrow_mut();
        if inner.finished {
            Poll::Ready(())
        } else {
            inner.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Anything the meter can wait on.
#[derive(Debug, Clone)]
pub enum Gate {
    /// An externally finished task.
    Task(Task),
    /// Sugar for [`Task::delay`].
    Delay(Duration),
}

impl Gate {
    /// Resolve into a task, starting the timer for delays.
    pub fn into_task(self) -> Task {
        match self {
            Gate::Task(task) => task,
            Gate::Delay(duration) => Task::delay(duration),
        }
    }
}

impl From<Task> for Gate {
    fn from(task: Task) -> Self {
        Gate::Task(task)
    }
}

impl From<&Task> for Gate {
    fn from(task: &Task) -> Self {
        Gate::Task(task.clone())
    }
}

impl From<Duration> for Gate {
    fn from(duration: Duration) -> Self {
        Gate::Delay(duration)
    }
}

/// Milliseconds.
impl From<u64> for Gate {
    fn from(millis: u64) -> Self {
        Gate::Delay(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_finish_runs_callbacks_once() {
        let task = Task::new();
        let count = Rc::new(Cell::new(0));

        let c = Rc::clone(&count);
        task.on_finish(move || c.set(c.get() + 1));

        assert!(!task.is_finished());
        task.finish();
        task.finish();

        assert!(task.is_finished());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_on_finish_after_completion_runs_now() {
        let task = Task::new();
        task.finish();

        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        task.on_finish(move || r.set(true));
        assert!(ran.get());
    }

    #[test]
    fn test_clones_share_identity() {
        let a = Task::new();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.id(), b.id());
        assert!(!a.ptr_eq(&Task::new()));

        b.finish();
        assert!(a.is_finished());
    }

    #[tokio::test]
    async fn test_finished_future_resolves() {
        let task = Task::new();
        let waiter = task.finished();

        let finisher = task.clone();
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                tokio::task::spawn_local(async move {
                    tokio::task::yield_now().await;
                    finisher.finish();
                });
                waiter.await;
            })
            .await;

        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_finishes_after_duration() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let task = Task::delay(Duration::from_millis(250));
                assert!(!task.is_finished());

                tokio::time::sleep(Duration::from_millis(100)).await;
                assert!(!task.is_finished());

                task.finished().await;
                assert!(task.is_finished());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_finish_cancels_timer() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let task = Task::delay(Duration::from_secs(60));
                task.finish();
                assert!(task.is_finished());
                assert!(task.inner.borrow().timer.is_none());
            })
            .await;
    }
}
