//! Promise-returning background tasks.
//!
//! # Responsibility
//! - Run `Task::compute` on a worker thread and settle the task's promise
//!   back on the JS thread.
//! - Turn compute errors, panics and cancellation into rejections.
//!
//! # Invariants
//! - Every queued task settles its promise exactly once, even when
//!   `Task::resolve` or `Task::reject` fails.
//! - `compute` never sees a JS value.
//!
//! # See also
//! - `threadsafe.rs` for calling back into JS more than once.

use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::host::{AsyncComplete, AsyncExecute, Host, RawAsyncWork};
use crate::logging::panic_message;
use crate::status::Status;
use crate::value::{JsDeferred, JsError, JsPromise, JsString, JsValue};
use log::{debug, error, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const CANCELLED_MESSAGE: &str = "async work cancelled";

/// CPU-bound work whose result settles a promise.
///
/// `compute` runs on a worker thread and must not touch JS; `resolve` and
/// `reject` run back on the JS thread.
pub trait Task: Send + 'static {
    type Output: Send + 'static;

    fn compute(&mut self) -> AddonResult<Self::Output>;

    fn resolve<'h>(&mut self, env: Env<'h>, output: Self::Output) -> AddonResult<JsValue<'h>>;

    /// Builds the rejection reason; defaults to `Error(err.to_string())`.
    fn reject<'h>(&mut self, env: Env<'h>, err: AddonError) -> AddonResult<JsValue<'h>> {
        JsError::from_addon_error(env, &err).map(Into::into)
    }
}

struct TaskSlot<T: Task> {
    task: T,
    outcome: Option<AddonResult<T::Output>>,
}

/// Handle to queued work.
pub struct AsyncTask<'h> {
    env: Env<'h>,
    work: RawAsyncWork,
    promise: JsPromise<'h>,
}

impl<'h> AsyncTask<'h> {
    pub fn promise(&self) -> JsPromise<'h> {
        self.promise
    }

    /// Cancels work that has not started; the promise then rejects with
    /// `Error("async work cancelled")`.
    pub fn cancel(&self) -> AddonResult<()> {
        self.env.check(self.env.host().cancel_async_work(self.work))
    }
}

/// Queues `task` and returns the promise it settles.
pub fn spawn_task<'h, T: Task>(env: Env<'h>, name: &str, task: T) -> AddonResult<AsyncTask<'h>> {
    let (deferred, promise) = env.create_promise()?;
    let slot = Arc::new(Mutex::new(TaskSlot {
        task,
        outcome: None,
    }));

    let worker_slot = Arc::clone(&slot);
    let execute: AsyncExecute = Box::new(move || {
        let mut slot = lock(&worker_slot);
        let outcome = catch_unwind(AssertUnwindSafe(|| slot.task.compute()))
            .unwrap_or_else(|payload| Err(AddonError::Panic(panic_message(payload.as_ref()))));
        slot.outcome = Some(outcome);
    });

    let raw_deferred = deferred.into_raw();
    let work_name = name.to_string();
    let complete: AsyncComplete = Box::new(move |host: &dyn Host, status: Status| {
        let env = Env::new(host);
        let deferred = JsDeferred::from_raw(env, raw_deferred);
        if let Err(err) = settle(env, deferred, &slot, status) {
            error!(
                "event=async_complete_failed module=async_work status=error name={work_name} error={err}"
            );
            env.throw_addon_error(&err);
        }
    });

    let work = env.check(env.host().create_async_work(name, execute, complete))?;
    env.check(env.host().queue_async_work(work))?;
    debug!("event=async_queued module=async_work status=ok name={name}");
    Ok(AsyncTask { env, work, promise })
}

fn settle<T: Task>(
    env: Env<'_>,
    deferred: JsDeferred<'_>,
    slot: &Mutex<TaskSlot<T>>,
    status: Status,
) -> AddonResult<()> {
    if status == Status::Cancelled {
        debug!("event=async_cancelled module=async_work status=ok");
        let cause = AddonError::Exception(CANCELLED_MESSAGE.to_string());
        let reason = JsError::new(env, CANCELLED_MESSAGE).map(Into::into);
        return deferred.reject(rejection_reason(env, reason, &cause)?);
    }
    let mut slot = lock(slot);
    let TaskSlot { task, outcome } = &mut *slot;
    let outcome = outcome
        .take()
        .unwrap_or_else(|| Err(AddonError::from(status)));
    let cause = match outcome {
        Ok(output) => match task.resolve(env, output) {
            Ok(value) => return deferred.resolve(value),
            Err(err) => err,
        },
        Err(err) => err,
    };
    let reason = task.reject(env, cause.clone());
    deferred.reject(rejection_reason(env, reason, &cause)?)
}

/// `built` when it succeeded, else an `Error` for `cause`, else its bare
/// message string. The deferred is rejected either way.
fn rejection_reason<'h>(
    env: Env<'h>,
    built: AddonResult<JsValue<'h>>,
    cause: &AddonError,
) -> AddonResult<JsValue<'h>> {
    built
        .or_else(|err| {
            warn!("event=async_reject_fallback module=async_work status=error error={err}");
            if env.is_exception_pending()? {
                env.take_exception()?;
            }
            JsError::from_addon_error(env, cause).map(Into::into)
        })
        .or_else(|_| JsString::new(env, &cause.to_string()).map(Into::into))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{spawn_task, Task};
    use crate::env::Env;
    use crate::error::{AddonError, AddonResult};
    use crate::host::{MemoryHost, PromiseState};
    use crate::value::{JsNumber, JsValue};

    struct Square(i64);

    impl Task for Square {
        type Output = i64;

        fn compute(&mut self) -> AddonResult<i64> {
            Ok(self.0 * self.0)
        }

        fn resolve<'h>(&mut self, env: Env<'h>, output: i64) -> AddonResult<JsValue<'h>> {
            JsNumber::from_i64(env, output).map(Into::into)
        }
    }

    #[test]
    fn result_resolves_on_completion() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let task = spawn_task(env, "square", Square(12)).expect("spawn");
        assert_eq!(host.promise_state(task.promise().raw()), Some(PromiseState::Pending));
        assert_eq!(host.run_until_idle(), 1);

        let Some(PromiseState::Fulfilled(value)) = host.promise_state(task.promise().raw()) else {
            panic!("promise should be fulfilled");
        };
        let number: JsNumber = env.value(value).downcast().expect("number");
        assert_eq!(number.to_i64().expect("i64"), 144);
    }

    #[test]
    fn cancel_before_start_rejects() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let task = spawn_task(env, "square", Square(3)).expect("spawn");
        task.cancel().expect("cancel");
        host.run_until_idle();

        let Some(PromiseState::Rejected(reason)) = host.promise_state(task.promise().raw()) else {
            panic!("promise should be rejected");
        };
        assert_eq!(
            env.value(reason).coerce_to_string().expect("reason"),
            "Error: async work cancelled"
        );
        assert!(matches!(task.cancel(), Err(AddonError::Status(_))));
    }

    struct BrokenReject;

    impl Task for BrokenReject {
        type Output = i64;

        fn compute(&mut self) -> AddonResult<i64> {
            Err(AddonError::invalid_arg("negative input"))
        }

        fn resolve<'h>(&mut self, env: Env<'h>, output: i64) -> AddonResult<JsValue<'h>> {
            JsNumber::from_i64(env, output).map(Into::into)
        }

        fn reject<'h>(&mut self, _env: Env<'h>, _err: AddonError) -> AddonResult<JsValue<'h>> {
            Err(AddonError::conversion("reason could not be built"))
        }
    }

    #[test]
    fn failing_reject_still_rejects_with_the_compute_error() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let task = spawn_task(env, "broken", BrokenReject).expect("spawn");
        host.run_until_idle();

        let Some(PromiseState::Rejected(reason)) = host.promise_state(task.promise().raw()) else {
            panic!("promise should be rejected");
        };
        assert_eq!(
            env.value(reason).coerce_to_string().expect("reason"),
            "Error: invalid argument: negative input"
        );
        assert!(!env.is_exception_pending().expect("exception state"));
    }
}
