use addonkit_core::{
    from_js, to_js, AddonError, Env, JsArray, JsBigInt, JsBuffer, JsFunction, JsObject, JsType,
    JsValue, MemoryHost, Property, PropertyAttributes,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    package_name: String,
    version: (u32, u32, u32),
    features: BTreeMap<String, bool>,
    checksum: u64,
    kind: Kind,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Kind {
    Library,
    Binary { entry: String },
}

#[test]
fn nested_structs_convert_both_ways() {
    let host = MemoryHost::new();
    let env = Env::new(&host);
    let manifest = Manifest {
        package_name: "addonkit-demo".to_string(),
        version: (0, 3, 1),
        features: BTreeMap::from([("napi8".to_string(), true)]),
        checksum: u64::MAX - 1,
        kind: Kind::Binary {
            entry: "index.node".to_string(),
        },
    };

    let js = to_js(env, &manifest).unwrap();
    let object: JsObject = js.downcast().unwrap();
    assert_eq!(
        object.keys().unwrap(),
        vec!["packageName", "version", "features", "checksum", "kind"]
    );
    assert_eq!(object.get("checksum").unwrap().js_type().unwrap(), JsType::BigInt);
    assert_eq!(object.get("version").unwrap().js_type().unwrap(), JsType::Array);

    let back: Manifest = from_js(js).unwrap();
    assert_eq!(back, manifest);
}

#[test]
fn lossy_bigint_cannot_be_read_back() {
    let host = MemoryHost::new();
    let env = Env::new(&host);
    let negative = JsBigInt::from_i64(env, -5).unwrap();
    let (as_unsigned, lossless) = negative.get_u64().unwrap();
    assert!(!lossless);
    assert_eq!(as_unsigned, (-5_i64) as u64);
    assert!(negative.to_u64().is_err());
    assert_eq!(from_js::<i64>(negative.into()).unwrap(), -5);
}

#[test]
fn buffers_and_holes_read_as_json_arrays() {
    let host = MemoryHost::new();
    let env = Env::new(&host);
    let buffer = JsBuffer::from_bytes(env, &[0, 127, 255]).unwrap();
    assert_eq!(from_js::<Vec<u8>>(buffer.into()).unwrap(), vec![0, 127, 255]);

    let sparse = JsArray::with_length(env, 3).unwrap();
    sparse.set(1, to_js(env, "mid").unwrap()).unwrap();
    assert_eq!(
        from_js::<serde_json::Value>(sparse.into()).unwrap(),
        json!([null, "mid", null])
    );
}

#[test]
fn non_data_values_are_conversion_errors() {
    let host = MemoryHost::new();
    let env = Env::new(&host);
    let holder = JsObject::new(env).unwrap();
    let method = JsFunction::new(env, "method", |ctx| ctx.env().undefined()).unwrap();
    holder
        .define_properties(vec![
            Property::value("visible", method).with_attributes(PropertyAttributes::ENUMERABLE),
        ])
        .unwrap();

    let err = from_js::<serde_json::Value>(holder.into()).unwrap_err();
    assert!(matches!(err, AddonError::Conversion(message) if message.contains("function")));
}

#[test]
fn undefined_and_null_map_to_none() {
    let host = MemoryHost::new();
    let env = Env::new(&host);
    let undefined: JsValue = env.undefined().unwrap();
    assert_eq!(from_js::<Option<String>>(undefined).unwrap(), None);
    assert_eq!(from_js::<Option<String>>(env.null().unwrap()).unwrap(), None);
}
