use addonkit_core::{
    initialize_module, register, AddonError, Env, Host, JsNumber, JsObject, JsString, JsValue,
    MemoryHost, ModuleRegistry, ValueKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn pending_message(host: &MemoryHost) -> Option<String> {
    let env = Env::new(host);
    let exception = env.take_exception().unwrap()?;
    let message = exception.cast::<JsObject>().get("message").unwrap();
    Some(message.coerce_to_string().unwrap())
}

#[test]
fn returns_exports_unchanged_without_callbacks() {
    let host = MemoryHost::new();
    let exports = host.create_object().unwrap();

    let returned = ModuleRegistry::new().initialize(&host, exports);

    assert_eq!(returned, exports);
    assert_eq!(host.type_of(returned).unwrap(), ValueKind::Object);
    assert!(pending_message(&host).is_none());
}

#[test]
fn callbacks_run_in_registration_order() {
    let host = MemoryHost::new();
    let exports = host.create_object().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let registry = ModuleRegistry::new();

    for name in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        registry.register(move |env, exports| {
            order.lock().unwrap().push(name);
            exports.set(name, JsString::new(*env, name)?)
        });
    }

    let returned = registry.initialize(&host, exports);

    assert_eq!(returned, exports);
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    let env = Env::new(&host);
    let keys = JsValue::new(env, exports).cast::<JsObject>().keys().unwrap();
    assert_eq!(keys, vec!["first", "second", "third"]);
}

#[test]
fn failing_callback_throws_and_stops_the_rest() {
    let host = MemoryHost::new();
    let exports = host.create_object().unwrap();
    let later_calls = Arc::new(AtomicUsize::new(0));
    let registry = ModuleRegistry::new();

    registry.register(|env, exports| exports.set("ok", JsNumber::from_i32(*env, 1)?));
    registry.register(|_env, _exports| Err(AddonError::invalid_arg("missing feature flag")));
    let counter = Arc::clone(&later_calls);
    registry.register(move |_env, _exports| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let returned = registry.initialize(&host, exports);

    assert_eq!(returned, exports);
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        pending_message(&host).as_deref(),
        Some("invalid argument: missing feature flag")
    );
    let env = Env::new(&host);
    assert!(JsValue::new(env, exports).cast::<JsObject>().has("ok").unwrap());
}

#[test]
fn panicking_callback_is_rethrown_as_error() {
    let host = MemoryHost::new();
    let exports = host.create_object().unwrap();
    let registry = ModuleRegistry::new();
    registry.register(|_env, _exports| panic!("registration exploded"));

    let returned = registry.initialize(&host, exports);

    assert_eq!(returned, exports);
    assert_eq!(
        pending_message(&host).as_deref(),
        Some("panic recover: registration exploded")
    );
}

#[test]
fn global_registry_backs_initialize_module() {
    register(|env, exports| exports.set("answer", JsNumber::from_i32(*env, 42)?));

    let host = MemoryHost::new();
    let exports = host.create_object().unwrap();
    let returned = initialize_module(&host, exports);

    assert_eq!(returned, exports);
    let env = Env::new(&host);
    let answer: JsNumber = JsValue::new(env, exports)
        .cast::<JsObject>()
        .get_as("answer")
        .unwrap();
    assert_eq!(answer.to_i32().unwrap(), 42);
    let instance = env.module_instance().unwrap().unwrap();
    assert!(!instance.id.is_nil());
}
