//! Parses the seed as JSON and runs the deterministic-then-randomised
//! strategy schedule against it.
//!
//! Every deterministic strategy clones the parsed tree, mutates the clone,
//! serialises it, dispatches it, and discards the clone — the "extra_entries"
//! strategy's clone-and-swap approach, generalised to every strategy rather
//! than mixed with manual save/restore (see the JSON Design Notes).

use serde_json::Value;

use crate::engine::EngineContext;
use crate::mutate::MutKind;

const INT_TABLE: &[i64] = &[
    -128, -1, 0, 1, 16, 32, 64, 100, 127, -32768, -129, 128, 255, 256, 512, 1000, 1024, 4096,
    32767, i32::MIN as i64, -100_663_046, -32769, 32768, 65535, 65536, 100_663_045,
    i32::MAX as i64, 1337,
];

const FLOAT_TABLE: &[f64] = &[
    0.0,
    -0.0,
    0.333_333_333_333_33,
    std::f64::consts::PI,
    0.1,
    0.100_0000,
    -1.0,
    1.0,
    f64::INFINITY,
    f64::NEG_INFINITY,
    f64::NAN,
];

const FMT_STR_PAYLOADS: &[&str] = &[
    "%1$s", "%2$s", "%3$s", "%4$s", "%5$s", "%6$s", "%7$s", "%8$s", "%9$s", "%s%s%s%s%s",
    "%n%n%n%n%n",
];

const STRUCTURAL_BYTES: &[u8] = b"\\\n\",/:[]{}";

pub fn run(seed: &[u8], ctx: &mut EngineContext) -> Result<(), &'static str> {
    let root: Value = serde_json::from_slice(seed).map_err(|_| "seed is not valid JSON")?;

    extra_objects(&root, ctx);
    buffer_overflow(&root, ctx);
    bad_nums(&root, ctx);
    fmt_str(&root, ctx);
    empty(&root, ctx);
    extra_entries(&root, ctx);
    append_objects(&root, ctx);

    while ctx.should_continue() {
        match ctx.rng.rand_range(0, 1) {
            0 => bit_shift(&root, ctx),
            _ => mutations(&root, ctx),
        }
    }
    Ok(())
}

fn emit(value: &Value, ctx: &mut EngineContext) {
    if let Ok(bytes) = serde_json::to_vec(value) {
        ctx.dispatch(&bytes);
    }
}

fn extra_objects(root: &Value, ctx: &mut EngineContext) {
    let Ok(one) = serde_json::to_string(root) else { return };
    let mut out = String::from("[");
    for i in 0..101 {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&one);
    }
    out.push(']');
    ctx.dispatch(out.as_bytes());
}

/// Every `(key, path-to-parent)` pair in the tree, collected depth-first.
fn collect_object_keys(value: &Value, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
    if let Value::Object(map) = value {
        for (k, v) in map {
            prefix.push(k.clone());
            out.push(prefix.clone());
            collect_object_keys(v, prefix, out);
            prefix.pop();
        }
    } else if let Value::Array(items) = value {
        for item in items {
            collect_object_keys(item, prefix, out);
        }
    }
}

fn rename_key_at_path(root: &Value, path: &[String], new_key: &str) -> Value {
    fn go(value: &Value, path: &[String], new_key: &str) -> Value {
        match value {
            Value::Object(map) => {
                let mut new_map = serde_json::Map::new();
                for (k, v) in map {
                    if path.len() == 1 && k == &path[0] {
                        new_map.insert(new_key.to_string(), v.clone());
                    } else if !path.is_empty() && k == &path[0] {
                        new_map.insert(k.clone(), go(v, &path[1..], new_key));
                    } else {
                        new_map.insert(k.clone(), v.clone());
                    }
                }
                Value::Object(new_map)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| go(v, path, new_key)).collect())
            }
            other => other.clone(),
        }
    }
    go(root, path, new_key)
}

fn buffer_overflow(root: &Value, ctx: &mut EngineContext) {
    let mut paths = Vec::new();
    collect_object_keys(root, &mut Vec::new(), &mut paths);
    let big_key = "A".repeat(800);
    for path in &paths {
        let mutated = rename_key_at_path(root, path, &big_key);
        emit(&mutated, ctx);
    }
}

fn collect_number_paths(value: &Value, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
    match value {
        Value::Number(_) => out.push(prefix.clone()),
        Value::Object(map) => {
            for (k, v) in map {
                prefix.push(k.clone());
                collect_number_paths(v, prefix, out);
                prefix.pop();
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                prefix.push(i.to_string());
                collect_number_paths(item, prefix, out);
                prefix.pop();
            }
        }
        _ => {}
    }
}

fn set_at_path(root: &Value, path: &[String], new_value: Value) -> Value {
    fn go(value: &Value, path: &[String], new_value: &Value) -> Value {
        if path.is_empty() {
            return new_value.clone();
        }
        match value {
            Value::Object(map) => {
                let mut new_map = serde_json::Map::new();
                for (k, v) in map {
                    if k == &path[0] {
                        new_map.insert(k.clone(), go(v, &path[1..], new_value));
                    } else {
                        new_map.insert(k.clone(), v.clone());
                    }
                }
                Value::Object(new_map)
            }
            Value::Array(items) => {
                let idx: usize = path[0].parse().unwrap_or(usize::MAX);
                Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, v)| {
                            if i == idx {
                                go(v, &path[1..], new_value)
                            } else {
                                v.clone()
                            }
                        })
                        .collect(),
                )
            }
            other => other.clone(),
        }
    }
    go(root, path, &new_value)
}

fn bad_nums(root: &Value, ctx: &mut EngineContext) {
    let mut paths = Vec::new();
    collect_number_paths(root, &mut Vec::new(), &mut paths);
    for path in &paths {
        for &n in INT_TABLE {
            emit(&set_at_path(root, path, Value::from(n)), ctx);
        }
        for &f in FLOAT_TABLE {
            let v = serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(format_special_float(f)));
            emit(&set_at_path(root, path, v), ctx);
        }
    }
}

fn format_special_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f == f64::INFINITY {
        "Infinity".to_string()
    } else {
        "-Infinity".to_string()
    }
}

fn collect_string_paths(value: &Value, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
    match value {
        Value::String(_) => out.push(prefix.clone()),
        Value::Object(map) => {
            for (k, v) in map {
                prefix.push(k.clone());
                collect_string_paths(v, prefix, out);
                prefix.pop();
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                prefix.push(i.to_string());
                collect_string_paths(item, prefix, out);
                prefix.pop();
            }
        }
        _ => {}
    }
}

/// Every object entry (key) and every string value gets each payload tried
/// in turn — keys via `rename_key_at_path`, values via `set_at_path`.
fn fmt_str(root: &Value, ctx: &mut EngineContext) {
    let mut key_paths = Vec::new();
    collect_object_keys(root, &mut Vec::new(), &mut key_paths);
    for path in &key_paths {
        for payload in FMT_STR_PAYLOADS {
            emit(&rename_key_at_path(root, path, payload), ctx);
        }
    }

    let mut value_paths = Vec::new();
    collect_string_paths(root, &mut Vec::new(), &mut value_paths);
    for path in &value_paths {
        for payload in FMT_STR_PAYLOADS {
            emit(&set_at_path(root, path, Value::String((*payload).to_string())), ctx);
        }
    }
}

fn empty(root: &Value, ctx: &mut EngineContext) {
    let mut paths = Vec::new();
    collect_object_keys(root, &mut Vec::new(), &mut paths);
    for path in &paths {
        emit(&rename_key_at_path(root, path, ""), ctx);
    }
}

fn extra_entries(root: &Value, ctx: &mut EngineContext) {
    let mut mutated = root.clone();
    if let Value::Object(map) = &mut mutated {
        for _ in 0..100 {
            map.insert("extra".to_string(), Value::String("extra_value".to_string()));
        }
    }
    emit(&mutated, ctx);
}

fn append_objects(root: &Value, ctx: &mut EngineContext) {
    let Ok(one) = serde_json::to_string(root) else { return };
    let mut out = String::new();
    for i in 0..101 {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&one);
    }
    ctx.dispatch(out.as_bytes());
}

fn bit_shift(root: &Value, ctx: &mut EngineContext) {
    let Ok(mut bytes) = serde_json::to_vec(root) else { return };
    let positions: Vec<usize> = bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| STRUCTURAL_BYTES.contains(b))
        .map(|(i, _)| i)
        .collect();
    if positions.is_empty() {
        return;
    }
    let which = ctx.rng.rand_range(0, positions.len() as i64 - 1) as usize;
    let base = positions[which];
    let delta = ctx.rng.rand_range(1, 10) as usize;
    let offset = base + delta;
    if offset >= bytes.len() {
        return;
    }
    let shift = ctx.rng.rand_range(1, 7) as u32;
    bytes[offset] = bytes[offset].wrapping_shl(shift);
    ctx.dispatch(&bytes);
}

fn mutations(root: &Value, ctx: &mut EngineContext) {
    let Ok(bytes) = serde_json::to_vec(root) else { return };
    let kind: MutKind = ctx.selector.pick("json", &mut ctx.rng);
    if let Some(mutated) = ctx.selector.mutate(&bytes, kind, "json", &mut ctx.rng) {
        ctx.dispatch(&mutated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_number_paths_finds_nested_numbers() {
        let v: Value = serde_json::from_str(r#"{"n": 1, "a": [2, 3]}"#).unwrap();
        let mut out = Vec::new();
        collect_number_paths(&v, &mut Vec::new(), &mut out);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn bad_nums_table_includes_i32_boundaries() {
        assert!(INT_TABLE.contains(&(i32::MIN as i64)));
        assert!(INT_TABLE.contains(&(i32::MAX as i64)));
    }

    #[test]
    fn set_at_path_replaces_only_targeted_number() {
        let v: Value = serde_json::from_str(r#"{"n": 1}"#).unwrap();
        let out = set_at_path(&v, &["n".to_string()], Value::from(-128));
        assert_eq!(out, serde_json::json!({"n": -128}));
    }

    #[test]
    fn rename_key_at_path_only_touches_targeted_key() {
        let v: Value = serde_json::from_str(r#"{"x": "ok", "y": 1}"#).unwrap();
        let out = rename_key_at_path(&v, &["x".to_string()], "AAAA");
        assert_eq!(out["AAAA"], Value::String("ok".to_string()));
        assert_eq!(out["y"], Value::from(1));
    }

    #[test]
    fn extra_entries_adds_key_without_mutating_original() {
        let v: Value = serde_json::from_str(r#"{"n": 1}"#).unwrap();
        let mut mutated = v.clone();
        if let Value::Object(map) = &mut mutated {
            map.insert("extra".to_string(), Value::String("extra_value".to_string()));
        }
        assert!(v.get("extra").is_none());
        assert!(mutated.get("extra").is_some());
    }
}
