use addonkit_core::host::PromiseState;
use addonkit_core::{
    define_class, spawn_task, AddonError, AddonResult, CallContext, CallMode, ClassMethod, Env,
    JsArray, JsClass, JsFunction, JsNumber, JsObject, JsString, JsValue, MemoryHost, Status,
    Task, ThreadsafeFunction,
};

struct Parse(String);

impl Task for Parse {
    type Output = i64;

    fn compute(&mut self) -> AddonResult<i64> {
        self.0
            .trim()
            .parse()
            .map_err(|err| AddonError::conversion(format!("`{}`: {err}", self.0)))
    }

    fn resolve<'h>(&mut self, env: Env<'h>, output: i64) -> AddonResult<JsValue<'h>> {
        JsNumber::from_i64(env, output).map(Into::into)
    }
}

struct Explode;

impl Task for Explode {
    type Output = ();

    fn compute(&mut self) -> AddonResult<()> {
        panic!("worker blew up")
    }

    fn resolve<'h>(&mut self, env: Env<'h>, _output: ()) -> AddonResult<JsValue<'h>> {
        env.undefined()
    }
}

fn rejection_message(host: &MemoryHost, promise: addonkit_core::RawValue) -> String {
    let env = Env::new(host);
    match host.promise_state(promise) {
        Some(PromiseState::Rejected(reason)) => JsValue::new(env, reason)
            .cast::<JsObject>()
            .get("message")
            .unwrap()
            .coerce_to_string()
            .unwrap(),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn async_tasks_resolve_and_reject_independently() {
    let host = MemoryHost::new();
    let env = Env::new(&host);

    let good = spawn_task(env, "parse-good", Parse(" 64 ".to_string())).unwrap();
    let bad = spawn_task(env, "parse-bad", Parse("sixty".to_string())).unwrap();
    assert_eq!(host.pending_async_work(), 2);

    assert_eq!(host.run_until_idle(), 2);

    match host.promise_state(good.promise().raw()) {
        Some(PromiseState::Fulfilled(value)) => {
            let number: JsNumber = JsValue::new(env, value).downcast().unwrap();
            assert_eq!(number.to_i64().unwrap(), 64);
        }
        other => panic!("expected fulfilment, got {other:?}"),
    }
    let message = rejection_message(&host, bad.promise().raw());
    assert!(message.starts_with("value conversion failed: `sixty`"));
    assert!(host.take_uncaught_exceptions().is_empty());
}

#[test]
fn panicking_compute_rejects_with_panic_message() {
    let host = MemoryHost::new();
    let env = Env::new(&host);
    let task = spawn_task(env, "explode", Explode).unwrap();
    host.run_until_idle();
    assert_eq!(
        rejection_message(&host, task.promise().raw()),
        "panic recover: worker blew up"
    );
}

#[test]
fn threadsafe_function_delivers_values_in_order() {
    let host = MemoryHost::new();
    let env = Env::new(&host);
    let log = JsArray::new(env).unwrap();
    env.global().unwrap().set("log", log).unwrap();
    let append = JsFunction::new(env, "append", |ctx| {
        let log: JsArray = ctx.env().global()?.get_as("log")?;
        log.push(ctx.arg(0))?;
        ctx.env().undefined()
    })
    .unwrap();

    let tsfn = ThreadsafeFunction::new(env, &append, "append", 0, |env, line: String| {
        Ok(vec![JsString::new(env, &line)?.into()])
    })
    .unwrap();

    let workers: Vec<_> = (0..2)
        .map(|worker| {
            let handle = tsfn.clone();
            std::thread::spawn(move || {
                handle
                    .call(format!("worker-{worker}"), CallMode::Blocking)
                    .unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    tsfn.call("main".to_string(), CallMode::NonBlocking).unwrap();
    drop(tsfn);

    assert_eq!(host.run_until_idle(), 3);
    let mut lines: Vec<String> = log
        .to_vec()
        .unwrap()
        .into_iter()
        .map(|value| value.downcast::<JsString>().unwrap().to_string_utf8().unwrap())
        .collect();
    assert_eq!(lines.pop().as_deref(), Some("main"));
    lines.sort();
    assert_eq!(lines, vec!["worker-0", "worker-1"]);
    assert_eq!(host.live_threadsafe_functions(), 0);
}

#[test]
fn aborted_threadsafe_function_rejects_new_calls() {
    let host = MemoryHost::new();
    let env = Env::new(&host);
    let noop = JsFunction::new(env, "noop", |ctx| ctx.env().undefined()).unwrap();
    let tsfn = ThreadsafeFunction::new(env, &noop, "noop", 2, |_env, _value: u8| Ok(Vec::new()))
        .unwrap();
    let survivor = tsfn.clone();
    tsfn.call(1, CallMode::NonBlocking).unwrap();
    tsfn.abort().unwrap();

    let err = survivor.call(2, CallMode::Blocking).unwrap_err();
    assert_eq!(err.status(), Some(Status::Closing));
    assert_eq!(host.run_until_idle(), 0);
    assert_eq!(host.live_threadsafe_functions(), 0);
}

struct Stack {
    items: Vec<f64>,
}

impl JsClass for Stack {
    const NAME: &'static str = "Stack";

    fn construct(_ctx: &CallContext<'_>) -> AddonResult<Self> {
        Ok(Self { items: Vec::new() })
    }

    fn methods() -> Vec<ClassMethod<Self>> {
        vec![
            ClassMethod::new("push", |stack: &mut Stack, ctx| {
                stack.items.push(ctx.arg_as::<JsNumber>(0)?.to_f64()?);
                JsNumber::new(ctx.env(), stack.items.len()).map(Into::into)
            }),
            ClassMethod::new("pop", |stack: &mut Stack, ctx| match stack.items.pop() {
                Some(value) => JsNumber::from_f64(ctx.env(), value).map(Into::into),
                None => ctx.env().undefined(),
            }),
        ]
    }
}

#[test]
fn class_instances_keep_separate_state() {
    let host = MemoryHost::new();
    let env = Env::new(&host);
    let class = define_class::<Stack>(env).unwrap();
    let first = class.construct(&[]).unwrap();
    let second = class.construct(&[]).unwrap();
    assert!(first.instance_of(&class).unwrap());

    let push: JsFunction = first.get_as("push").unwrap();
    let pop: JsFunction = first.get_as("pop").unwrap();
    let value = JsNumber::from_f64(env, 2.5).unwrap();
    push.call_with_this(first, &[value.into()]).unwrap();

    let popped_second = pop.call_with_this(second, &[]).unwrap();
    assert!(popped_second.is_undefined().unwrap());
    let popped_first: JsNumber = pop.call_with_this(first, &[]).unwrap().downcast().unwrap();
    assert_eq!(popped_first.to_f64().unwrap(), 2.5);

    let err = push
        .call_with_this(first, &[JsString::new(env, "x").unwrap().into()])
        .unwrap_err();
    assert_eq!(
        err,
        AddonError::Exception("expected number value, got string".to_string())
    );
}
