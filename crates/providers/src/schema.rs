//! JSON-schema plumbing: derivation from types, the strict-mode rewrite,
//! and the compact outline used as a prompt hint.

use serde_json::{json, Value};

/// Derive the JSON schema for `T` and apply the strict rewrite.
pub fn strict_schema_for<T: schemars::JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let value = serde_json::to_value(&schema).unwrap_or_else(|_| json!({ "type": "object" }));
    sanitize_strict(&value)
}

/// Rewrite a schema for strict structured output: every object node gets
/// `additionalProperties: false` and every declared property becomes
/// required, recursively through `properties`, `$defs`/`definitions`,
/// `items`/`additionalItems`/`contains`, and `anyOf`/`oneOf`/`allOf`.
///
/// Pure and idempotent; the provider contract depends on this exact shape.
pub fn sanitize_strict(schema: &Value) -> Value {
    fn walk(node: &Value) -> Value {
        match node {
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (key, value) in map {
                    let rewritten = match key.as_str() {
                        "properties" | "$defs" | "definitions" => match value {
                            Value::Object(inner) => Value::Object(
                                inner.iter().map(|(k, v)| (k.clone(), walk(v))).collect(),
                            ),
                            other => other.clone(),
                        },
                        "items" | "additionalItems" | "contains" => walk(value),
                        "anyOf" | "oneOf" | "allOf" => match value {
                            Value::Array(list) => {
                                Value::Array(list.iter().map(walk).collect())
                            }
                            other => other.clone(),
                        },
                        _ => value.clone(),
                    };
                    out.insert(key.clone(), rewritten);
                }

                let is_object_node = out.get("type").and_then(Value::as_str) == Some("object")
                    || (!out.contains_key("type") && out.contains_key("properties"));
                if is_object_node {
                    out.insert("additionalProperties".into(), Value::Bool(false));
                    let required: Vec<Value> = out
                        .get("properties")
                        .and_then(Value::as_object)
                        .map(|props| props.keys().map(|k| Value::String(k.clone())).collect())
                        .unwrap_or_default();
                    if !out.contains_key("properties") {
                        out.insert("properties".into(), json!({}));
                    }
                    out.insert("required".into(), Value::Array(required));
                }
                Value::Object(out)
            }
            Value::Array(list) => Value::Array(list.iter().map(walk).collect()),
            other => other.clone(),
        }
    }

    walk(schema)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compact outline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn resolve_ref<'a>(name: &str, root: &'a Value) -> Option<&'a Value> {
    for defs_key in ["$defs", "definitions"] {
        if let Some(node) = root.get(defs_key).and_then(|d| d.get(name)) {
            return Some(node);
        }
    }
    None
}

fn enum_values(node: &Value) -> Option<String> {
    let values = node.get("enum")?.as_array()?;
    if values.is_empty() {
        return None;
    }
    let shown: Vec<String> = values.iter().take(8).map(|v| format!("{v}")).collect();
    let mut out = shown.join(", ");
    if values.len() > 8 {
        out.push_str(", …");
    }
    Some(format!("enum[{out}]"))
}

fn string_with_format(node: &Value) -> String {
    match node.get("format").and_then(Value::as_str) {
        Some(f @ ("date" | "date-time" | "uri")) => f.to_string(),
        _ => "string".to_string(),
    }
}

fn summarize_type(node: &Value, root: &Value) -> String {
    if let Some(e) = enum_values(node) {
        return e;
    }

    for union_key in ["anyOf", "oneOf"] {
        if let Some(list) = node.get(union_key).and_then(Value::as_array) {
            let mut parts: Vec<String> = Vec::new();
            for sub in list {
                let p = summarize_type(sub, root);
                if p != "null" && !parts.contains(&p) {
                    parts.push(p);
                }
            }
            return if parts.is_empty() { "any".into() } else { parts.join("|") };
        }
    }

    if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
        let name = reference.rsplit('/').next().unwrap_or(reference);
        if let Some(target) = resolve_ref(name, root) {
            if let Some(e) = enum_values(target) {
                return e;
            }
        }
        return format!("object({name})");
    }

    match node.get("type") {
        Some(Value::String(t)) if t == "array" => {
            let items = node.get("items").unwrap_or(&Value::Null);
            format!("array[{}]", summarize_type(items, root))
        }
        Some(Value::String(t)) if t == "string" => string_with_format(node),
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => {
            let parts: Vec<String> = types
                .iter()
                .filter_map(Value::as_str)
                .filter(|t| *t != "null")
                .map(|t| {
                    if t == "string" {
                        string_with_format(node)
                    } else {
                        t.to_string()
                    }
                })
                .collect();
            if parts.is_empty() { "any".into() } else { parts.join("|") }
        }
        _ => {
            if node.get("properties").is_some() {
                "object".into()
            } else {
                "any".into()
            }
        }
    }
}

/// A terse, prompt-friendly outline of a schema: one block per object with
/// `- field: type (required|optional)` lines.
pub fn compact_outline(schema: &Value) -> String {
    let mut objects: Vec<(String, &Value)> = Vec::new();
    let root_name = schema
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Root")
        .to_string();
    objects.push((root_name, schema));
    for defs_key in ["$defs", "definitions"] {
        if let Some(defs) = schema.get(defs_key).and_then(Value::as_object) {
            for (name, node) in defs {
                objects.push((name.clone(), node));
            }
        }
    }

    let mut lines: Vec<String> = Vec::new();
    for (name, node) in objects {
        let Some(props) = node.get("properties").and_then(Value::as_object) else {
            continue;
        };
        lines.push(format!("{name}:"));
        if props.is_empty() {
            lines.push("- (no properties)".into());
            continue;
        }
        let required: Vec<&str> = node
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        for (key, field) in props {
            let kind = if required.contains(&key.as_str()) { "required" } else { "optional" };
            lines.push(format!("- {key}: {} ({kind})", summarize_type(field, schema)));
        }
    }
    lines.join("\n")
}
