//! JSON merge-patch (RFC 7386) diffs between an object snapshot and its
//! mutated form
//!
//! Only the fields a reconcile is allowed to change are compared: the status
//! and the metadata finalizers, labels and annotations. Spec changes made by
//! a callback are never written back.

use serde::Serialize;
use serde_json::{Map, Value};
use trellis_common::Error;

/// Which endpoint a patch is sent to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchTarget {
    /// The `/status` subresource
    Status,
    /// The main resource (metadata changes)
    Object,
}

/// A merge patch computed from a snapshot, ready to be sent with a
/// resourceVersion precondition
#[derive(Clone, Debug, PartialEq)]
pub struct StatusPatch {
    /// Endpoint to send the patch to
    pub target: PatchTarget,
    /// Merge-patch body (without the resourceVersion precondition)
    pub body: Value,
    /// True when status changes were left out because metadata changed too;
    /// the main resource endpoint ignores status, so another attempt is needed
    pub deferred_status: bool,
}

impl StatusPatch {
    /// Whether the patch carries no changes
    pub fn is_empty(&self) -> bool {
        self.body.as_object().map_or(true, Map::is_empty)
    }

    /// Patch body with `metadata.resourceVersion` set as the write precondition
    pub fn with_resource_version(&self, resource_version: Option<&str>) -> Value {
        let mut body = self.body.clone();
        if let (Some(rv), Value::Object(map)) = (resource_version, &mut body) {
            let metadata = map
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(metadata) = metadata {
                metadata.insert("resourceVersion".to_string(), Value::String(rv.to_string()));
            }
        }
        body
    }
}

/// The patchable projection of an object
pub fn project<K: Serialize>(obj: &K) -> Result<Value, Error> {
    let full = serde_json::to_value(obj)?;
    let mut metadata = Map::new();
    for field in ["finalizers", "labels", "annotations"] {
        if let Some(v) = full.pointer(&format!("/metadata/{field}")) {
            metadata.insert(field.to_string(), v.clone());
        }
    }

    let mut projection = Map::new();
    projection.insert("metadata".to_string(), Value::Object(metadata));
    if let Some(status) = full.get("status") {
        projection.insert("status".to_string(), status.clone());
    }
    Ok(Value::Object(projection))
}

/// Merge-patch diff turning `old` into `new`
///
/// Objects are diffed key by key (removed keys become `null`); every other
/// value, arrays included, is replaced wholesale.
pub fn merge_diff(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut out = Map::new();
            for (key, new_value) in new_map {
                match old_map.get(key) {
                    Some(old_value) if old_value == new_value => {}
                    Some(old_value) if old_value.is_object() && new_value.is_object() => {
                        out.insert(key.clone(), merge_diff(old_value, new_value));
                    }
                    _ => {
                        out.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    out.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(out)
        }
        _ => new.clone(),
    }
}

/// Apply a merge patch to `target` the way the API server does
///
/// `null` removes a key, objects merge recursively, anything else replaces.
pub fn merge_apply(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_apply(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Compute the single patch for an attempt from two projections
pub fn compute_patch(baseline: &Value, current: &Value) -> StatusPatch {
    let diff = merge_diff(baseline, current);
    let mut map = match diff {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let status = map.remove("status");
    let metadata = map.remove("metadata");

    match metadata {
        Some(metadata) => {
            let mut body = Map::new();
            body.insert("metadata".to_string(), metadata);
            StatusPatch {
                target: PatchTarget::Object,
                body: Value::Object(body),
                deferred_status: status.is_some(),
            }
        }
        None => {
            let mut body = Map::new();
            if let Some(status) = status {
                body.insert("status".to_string(), status);
            }
            StatusPatch {
                target: PatchTarget::Status,
                body: Value::Object(body),
                deferred_status: false,
            }
        }
    }
}
