//! Cross-thread calls into a JS function.
//!
//! # Responsibility
//! - Queue values from any thread and turn them into JS call arguments on
//!   the JS thread.
//! - Track thread slots through `Clone` and `Drop`.
//!
//! # Invariants
//! - After an abort or the final release, `call` fails with `Closing`.
//! - A queued value is dropped unconverted when no target function remains.
//!
//! # See also
//! - `async_work.rs` for promise-returning work on the host's worker pool.

use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::host::{Host, RawThreadsafeFunction, RawTsfnCallJs, RawTsfnFinalize, RawValue, TsfnPayload};
use crate::status::Status;
use crate::types::{CallMode, ReleaseMode};
use crate::value::{JsFunction, JsValue};
use log::{debug, warn};
use std::marker::PhantomData;
use std::sync::Arc;

/// `Send + Sync` handle that queues calls to a JS function from any thread.
///
/// Every handle holds one thread slot: `clone` acquires a slot and drop
/// releases it. The function closes once the last slot is released or any
/// handle aborts.
pub struct ThreadsafeFunction<T: Send + 'static> {
    raw: Arc<dyn RawThreadsafeFunction>,
    released: bool,
    _payload: PhantomData<fn(T)>,
}

impl<T: Send + 'static> ThreadsafeFunction<T> {
    /// `convert` turns each queued value into call arguments on the JS
    /// thread. A `max_queue_size` of 0 means unbounded.
    pub fn new<'h, F>(
        env: Env<'h>,
        function: &JsFunction<'h>,
        name: &str,
        max_queue_size: usize,
        convert: F,
    ) -> AddonResult<Self>
    where
        F: for<'a> Fn(Env<'a>, T) -> AddonResult<Vec<JsValue<'a>>> + 'static,
    {
        let call_name = name.to_string();
        let call_js: RawTsfnCallJs = Box::new(
            move |host: &dyn Host, function: Option<RawValue>, payload: TsfnPayload| {
                let env = Env::new(host);
                let Some(function) = function else {
                    return;
                };
                let outcome = payload
                    .downcast::<T>()
                    .map_err(|_| AddonError::invalid_arg("unexpected thread-safe payload type"))
                    .and_then(|value| {
                        let args = convert(env, *value)?;
                        let target: JsFunction = env.value(function).cast();
                        target.call_with_this(env.undefined()?, &args).map(|_| ())
                    });
                if let Err(err) = outcome {
                    warn!(
                        "event=tsfn_call_failed module=threadsafe status=error name={call_name} error={err}"
                    );
                    env.throw_addon_error(&err);
                }
            },
        );
        let finalize_name = name.to_string();
        let finalize: RawTsfnFinalize = Box::new(move |_host: &dyn Host| {
            debug!("event=tsfn_finalized module=threadsafe status=ok name={finalize_name}");
        });

        let raw = env.check(env.host().create_threadsafe_function(
            Some(function.raw()),
            name,
            max_queue_size,
            1,
            call_js,
            Some(finalize),
        ))?;
        Ok(Self {
            raw,
            released: false,
            _payload: PhantomData,
        })
    }

    /// Queues `value`.
    ///
    /// # Errors
    /// - `QueueFull` for a non-blocking call on a full bounded queue.
    /// - `Closing` once the function was aborted or fully released.
    pub fn call(&self, value: T, mode: CallMode) -> AddonResult<()> {
        if self.released {
            return Err(Status::Closing.into());
        }
        self.raw.call(Box::new(value), mode).map_err(AddonError::from)
    }

    /// Closes the function for every handle; queued values are dropped.
    pub fn abort(mut self) -> AddonResult<()> {
        self.released = true;
        self.raw.release(ReleaseMode::Abort).map_err(AddonError::from)
    }

    /// Keeps the event loop alive while the function is open.
    pub fn ref_env(&self, env: Env<'_>) -> AddonResult<()> {
        env.check(env.host().ref_threadsafe_function(&*self.raw))
    }

    pub fn unref_env(&self, env: Env<'_>) -> AddonResult<()> {
        env.check(env.host().unref_threadsafe_function(&*self.raw))
    }

    /// Host identifier shared by all clones.
    pub fn id(&self) -> usize {
        self.raw.handle()
    }
}

impl<T: Send + 'static> Clone for ThreadsafeFunction<T> {
    fn clone(&self) -> Self {
        let released = match self.raw.acquire() {
            Ok(()) => false,
            Err(status) => {
                warn!("event=tsfn_acquire_failed module=threadsafe status=error napi_status={status}");
                true
            }
        };
        Self {
            raw: Arc::clone(&self.raw),
            released,
            _payload: PhantomData,
        }
    }
}

impl<T: Send + 'static> Drop for ThreadsafeFunction<T> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(status) = self.raw.release(ReleaseMode::Release) {
            debug!("event=tsfn_release_failed module=threadsafe status=error napi_status={status}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ThreadsafeFunction;
    use crate::env::Env;
    use crate::host::MemoryHost;
    use crate::status::Status;
    use crate::types::CallMode;
    use crate::value::{JsArray, JsFunction, JsNumber};

    #[test]
    fn calls_from_worker_threads_reach_js() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let seen = JsArray::new(env).expect("array");
        env.global()
            .expect("global")
            .set("seen", seen)
            .expect("store");
        let sink = JsFunction::new(env, "sink", |ctx| {
            let seen: JsArray = ctx.env().global()?.get_as("seen")?;
            seen.push(ctx.arg(0))?;
            ctx.env().undefined()
        })
        .expect("function");

        let tsfn = ThreadsafeFunction::new(env, &sink, "sink", 0, |env, value: u32| {
            Ok(vec![JsNumber::from_u32(env, value)?.into()])
        })
        .expect("tsfn");
        let worker = tsfn.clone();
        std::thread::spawn(move || {
            for value in 0..3 {
                worker.call(value, CallMode::Blocking).expect("call");
            }
        })
        .join()
        .expect("worker");
        drop(tsfn);

        assert_eq!(host.run_until_idle(), 3);
        assert_eq!(seen.len().expect("len"), 3);
        assert_eq!(host.live_threadsafe_functions(), 0);
    }

    #[test]
    fn bounded_queue_reports_full_then_closing() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let sink = JsFunction::new(env, "sink", |ctx| ctx.env().undefined()).expect("function");
        let tsfn = ThreadsafeFunction::new(env, &sink, "bounded", 1, |_env, _value: u8| {
            Ok(Vec::new())
        })
        .expect("tsfn");
        let other = tsfn.clone();

        tsfn.call(1, CallMode::NonBlocking).expect("first fits");
        let full = tsfn.call(2, CallMode::NonBlocking).expect_err("queue full");
        assert_eq!(full.status(), Some(Status::QueueFull));

        tsfn.abort().expect("abort");
        let closing = other.call(3, CallMode::NonBlocking).expect_err("closing");
        assert_eq!(closing.status(), Some(Status::Closing));
    }

    #[test]
    fn ref_and_unref_toggle_event_loop_hold() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let sink = JsFunction::new(env, "sink", |ctx| ctx.env().undefined()).expect("function");
        let tsfn = ThreadsafeFunction::new(env, &sink, "ticker", 0, |_env, _value: ()| {
            Ok(Vec::new())
        })
        .expect("tsfn");
        tsfn.unref_env(env).expect("unref");
        assert_eq!(host.is_threadsafe_function_referenced(tsfn.id()), Some(false));
        tsfn.ref_env(env).expect("ref");
        assert_eq!(host.is_threadsafe_function_referenced(tsfn.id()), Some(true));
    }
}
