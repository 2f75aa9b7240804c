//! Example addon built with addonkit.
//!
//! # Responsibility
//! - Exercise the toolkit end to end inside a real Node process: plain
//!   values, serde conversion, typed functions, a class, async work and a
//!   thread-safe callback.
//!
//! # See also
//! - `addonkit_ffi::addon_module!` for the exported entry symbols.

use addonkit_core::{
    define_class, from_js, js_to_json, spawn_task, to_js, AddonError, AddonResult, CallContext,
    CallMode, ClassAccessor, ClassMethod, Env, JsBuffer, JsClass, JsFunction, JsNumber, JsObject,
    JsString, JsValue, Task, ThreadsafeFunction,
};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Sample {
    int: i64,
    string: String,
    tags: Vec<&'static str>,
    flags: Vec<bool>,
    years: Vec<u32>,
    labels: BTreeMap<&'static str, &'static str>,
    missing: Option<String>,
    /// Past `Number.MAX_SAFE_INTEGER`, so it arrives as a BigInt.
    checksum: u64,
}

fn sample() -> Sample {
    Sample {
        int: 14,
        string: "from rust".to_string(),
        tags: vec!["test", "rustacean"],
        flags: vec![false, true],
        years: vec![23, 244, 10, 2024, 2025, 2000],
        labels: BTreeMap::from([("exampleMap", "test")]),
        missing: None,
        checksum: u64::MAX,
    }
}

struct Counter {
    count: i64,
}

impl JsClass for Counter {
    const NAME: &'static str = "Counter";

    fn construct(ctx: &CallContext<'_>) -> AddonResult<Self> {
        let count = if ctx.arg(0).is_undefined()? {
            0
        } else {
            ctx.arg_as::<JsNumber>(0)?.to_i64()?
        };
        Ok(Self { count })
    }

    fn methods() -> Vec<ClassMethod<Self>> {
        vec![
            ClassMethod::new("increment", |counter: &mut Counter, ctx| {
                counter.count += 1;
                JsNumber::from_i64(ctx.env(), counter.count).map(Into::into)
            }),
            ClassMethod::new("reset", |counter: &mut Counter, ctx| {
                counter.count = 0;
                ctx.env().undefined()
            }),
        ]
    }

    fn accessors() -> Vec<ClassAccessor<Self>> {
        vec![ClassAccessor::new("value", |counter: &Counter, env| {
            JsNumber::from_i64(env, counter.count).map(Into::into)
        })]
    }
}

struct SumTask {
    values: Vec<f64>,
}

impl Task for SumTask {
    type Output = f64;

    fn compute(&mut self) -> AddonResult<f64> {
        if self.values.iter().any(|value| !value.is_finite()) {
            return Err(AddonError::invalid_arg("sumAsync expects finite numbers"));
        }
        Ok(self.values.iter().sum())
    }

    fn resolve<'h>(&mut self, env: Env<'h>, output: f64) -> AddonResult<JsValue<'h>> {
        JsNumber::from_f64(env, output).map(Into::into)
    }
}

/// `describe(...args)`: JSON text of the arguments.
fn describe<'a>(ctx: &CallContext<'a>) -> AddonResult<JsValue<'a>> {
    let mut parts = Vec::with_capacity(ctx.argc());
    for arg in ctx.args() {
        parts.push(js_to_json(*arg)?.to_string());
    }
    let text = format!("[{}]", parts.join(","));
    info!("event=describe module=demo status=ok args={}", ctx.argc());
    JsString::new(ctx.env(), &text).map(Into::into)
}

/// `sumAsync(numbers)`: promise of the sum, computed off the JS thread.
fn sum_async<'a>(ctx: &CallContext<'a>) -> AddonResult<JsValue<'a>> {
    let values: Vec<f64> = from_js(ctx.arg(0))?;
    let task = spawn_task(ctx.env(), "sumAsync", SumTask { values })?;
    Ok(task.promise().into())
}

/// `ticker(count, callback)`: calls `callback(1..=count)` from a worker thread.
fn ticker<'a>(ctx: &CallContext<'a>) -> AddonResult<JsValue<'a>> {
    let env = ctx.env();
    let count = ctx.arg_as::<JsNumber>(0)?.to_u32()?;
    let callback = ctx.arg_as::<JsFunction>(1)?;
    let tsfn = ThreadsafeFunction::new(env, &callback, "ticker", 0, |env, tick: u32| {
        Ok(vec![JsNumber::from_u32(env, tick)?.into()])
    })?;
    std::thread::spawn(move || {
        for tick in 1..=count {
            if let Err(err) = tsfn.call(tick, CallMode::Blocking) {
                warn!("event=ticker_call module=demo status=error tick={tick} error={err}");
                break;
            }
        }
    });
    env.undefined()
}

fn register(env: &Env<'_>, exports: &JsObject<'_>) -> AddonResult<()> {
    let env = *env;
    exports.set("msg", JsString::new(env, "from rust napi string")?)?;
    exports.set("bytes", JsBuffer::from_bytes(env, &[1, 0, 244, 21])?)?;
    exports.set("sample", to_js(env, &sample())?)?;
    exports.set(
        "add",
        JsFunction::typed(env, "add", |(lhs, rhs): (f64, f64)| Ok(lhs + rhs))?,
    )?;
    exports.set("describe", JsFunction::new(env, "describe", describe)?)?;
    exports.set("sumAsync", JsFunction::new(env, "sumAsync", sum_async)?)?;
    exports.set("ticker", JsFunction::new(env, "ticker", ticker)?)?;
    exports.set("Counter", define_class::<Counter>(env)?)?;
    info!("event=demo_register module=demo status=ok");
    Ok(())
}

addonkit_ffi::addon_module!(register);
