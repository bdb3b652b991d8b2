//! Tab identity — content-derived keys for navigation targets.
//!
//! key = "tab-" + hex(fnv1a64(path | stable(query) | stable(params)))
//!
//! Object keys are sorted at every depth before hashing, so the same logical
//! route always yields the same key regardless of how its maps were built.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::route::RouteLocation;

pub const TAB_KEY_PREFIX: &str = "tab-";

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// JSON text with object keys sorted at every depth.
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_stable(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn stable_map(map: &BTreeMap<String, Value>) -> String {
    let object: serde_json::Map<String, Value> =
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    stable_stringify(&Value::Object(object))
}

/// Identity key for `path` with the given query and path parameters.
pub fn tab_key(
    path: &str,
    query: &BTreeMap<String, Value>,
    params: &BTreeMap<String, Value>,
) -> String {
    let material = format!("{path}|{}|{}", stable_map(query), stable_map(params));
    format!("{TAB_KEY_PREFIX}{:016x}", fnv1a64(material.as_bytes()))
}

pub fn route_tab_key(route: &RouteLocation) -> String {
    tab_key(&route.path, &route.query, &route.params)
}
