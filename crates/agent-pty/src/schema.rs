//! JSON Schema for the wire protocol.
//!
//! Generated with schemars (draft 2020-12) and rewritten to draft-07
//! conventions, which more client-side validators accept:
//! - `$defs` becomes `definitions`
//! - `#/$defs/` references point at `#/definitions/`

use serde_json::{json, Map, Value};

use crate::protocol::{Request, Response};

/// Schemas for request and response lines.
pub fn protocol_schema() -> Value {
    json!({
        "request": to_draft07(schemars::schema_for!(Request).to_value()),
        "response": to_draft07(schemars::schema_for!(Response).to_value()),
    })
}

/// Rewrite a draft 2020-12 schema to draft-07 naming.
pub fn to_draft07(mut schema: Value) -> Value {
    if let Some(obj) = schema.as_object_mut() {
        if let Some(defs) = obj.remove("$defs") {
            obj.insert("definitions".to_string(), defs);
        }
        rewrite_refs(obj);
    }
    schema
}

fn rewrite_refs(obj: &mut Map<String, Value>) {
    for (key, value) in obj.iter_mut() {
        match value {
            Value::String(target) if key == "$ref" => {
                if let Some(name) = target.strip_prefix("#/$defs/") {
                    *target = format!("#/definitions/{name}");
                }
            }
            Value::Object(child) => rewrite_refs(child),
            Value::Array(items) => {
                for item in items.iter_mut() {
                    if let Value::Object(child) = item {
                        rewrite_refs(child);
                    }
                }
            }
            _ => {}
        }
    }
}
