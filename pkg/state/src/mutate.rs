//! Store-side mutation semantics shared by every backend: resource
//! version compare-and-swap, generation bumps on spec change, and the
//! removal-barrier deletion protocol.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use pkg_types::meta::KindSpec;

use crate::error::StoreError;

/// The store-relevant slice of a record's metadata.
pub(crate) struct RecordMeta {
    pub name: String,
    pub namespace: Option<String>,
    pub resource_version: u64,
    pub generation: u64,
    pub barriers: Vec<String>,
    pub deleting: bool,
}

pub(crate) fn read_meta(record: &Value) -> Result<RecordMeta, StoreError> {
    let meta = record
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or_else(|| StoreError::Malformed("no metadata object".to_string()))?;

    let name = meta
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if name.is_empty() {
        return Err(StoreError::Malformed("metadata.name is empty".to_string()));
    }

    let namespace = meta
        .get("namespace")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let barriers = meta
        .get("barriers")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(RecordMeta {
        name,
        namespace,
        resource_version: meta
            .get("resource_version")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        generation: meta.get("generation").and_then(Value::as_u64).unwrap_or(0),
        barriers,
        deleting: meta
            .get("deletion_timestamp")
            .map(|v| !v.is_null())
            .unwrap_or(false),
    })
}

fn meta_object_mut(record: &mut Value) -> Result<&mut Map<String, Value>, StoreError> {
    record
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| StoreError::Malformed("no metadata object".to_string()))
}

/// Store key of a record value.
pub(crate) fn key_of(kind: KindSpec, record: &Value) -> Result<String, StoreError> {
    let meta = read_meta(record)?;
    if kind.namespaced && meta.namespace.is_none() {
        return Err(StoreError::Malformed(format!(
            "{} {} has no namespace",
            kind.kind, meta.name
        )));
    }
    Ok(kind.key(meta.namespace.as_deref(), &meta.name))
}

/// Initialize store-owned metadata for a new record.
pub(crate) fn prepare_create(kind: KindSpec, mut record: Value) -> Result<(String, Value), StoreError> {
    let key = key_of(kind, &record)?;
    let meta = meta_object_mut(&mut record)?;
    meta.insert("uid".to_string(), json!(Uuid::new_v4().to_string()));
    meta.insert("resource_version".to_string(), json!(1));
    meta.insert("generation".to_string(), json!(1));
    meta.insert("deletion_timestamp".to_string(), Value::Null);
    let stamped = meta
        .get("creation_timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.timestamp() > 0)
        .unwrap_or(false);
    if !stamped {
        meta.insert("creation_timestamp".to_string(), json!(Utc::now()));
    }
    Ok((key, record))
}

pub(crate) enum UpdateOutcome {
    /// Persist the new revision.
    Write(Value),
    /// The last barrier was stripped on a deleting record: remove it.
    Remove(Value),
}

/// Validate and stamp a full update against the current revision.
pub(crate) fn prepare_update(
    kind: KindSpec,
    current: &Value,
    mut incoming: Value,
) -> Result<UpdateOutcome, StoreError> {
    let cur = read_meta(current)?;
    let inc = read_meta(&incoming)?;
    if inc.resource_version != cur.resource_version {
        return Err(StoreError::Conflict {
            kind: kind.kind,
            key: kind.key(cur.namespace.as_deref(), &cur.name),
            submitted: inc.resource_version,
        });
    }

    let spec_changed = current.get("spec") != incoming.get("spec");

    // Store-owned fields carry over from the current revision.
    let cur_meta = current.get("metadata").cloned().unwrap_or(Value::Null);
    let meta = meta_object_mut(&mut incoming)?;
    for field in ["uid", "creation_timestamp", "deletion_timestamp"] {
        if let Some(v) = cur_meta.get(field) {
            meta.insert(field.to_string(), v.clone());
        }
    }
    meta.insert("resource_version".to_string(), json!(cur.resource_version + 1));
    meta.insert(
        "generation".to_string(),
        json!(if spec_changed { cur.generation + 1 } else { cur.generation }),
    );

    if cur.deleting && inc.barriers.is_empty() {
        Ok(UpdateOutcome::Remove(incoming))
    } else {
        Ok(UpdateOutcome::Write(incoming))
    }
}

/// Validate and stamp a status-only update: everything except `status`
/// is taken from the current revision.
pub(crate) fn prepare_update_status(
    kind: KindSpec,
    current: &Value,
    incoming: Value,
) -> Result<Value, StoreError> {
    let cur = read_meta(current)?;
    let inc = read_meta(&incoming)?;
    if inc.resource_version != cur.resource_version {
        return Err(StoreError::Conflict {
            kind: kind.kind,
            key: kind.key(cur.namespace.as_deref(), &cur.name),
            submitted: inc.resource_version,
        });
    }

    let mut result = current.clone();
    match incoming.get("status") {
        Some(status) if !status.is_null() => {
            result
                .as_object_mut()
                .ok_or_else(|| StoreError::Malformed("record is not an object".to_string()))?
                .insert("status".to_string(), status.clone());
        }
        _ => {}
    }
    let meta = meta_object_mut(&mut result)?;
    meta.insert("resource_version".to_string(), json!(cur.resource_version + 1));
    Ok(result)
}

pub(crate) enum DeleteOutcome {
    /// No barriers: remove the record immediately.
    Remove,
    /// Barriers present: persist the tombstoned revision instead.
    Tombstone(Value),
    /// Already tombstoned; nothing to write.
    AlreadyDeleting,
}

pub(crate) fn prepare_delete(current: &Value) -> Result<DeleteOutcome, StoreError> {
    let cur = read_meta(current)?;
    if cur.barriers.is_empty() {
        return Ok(DeleteOutcome::Remove);
    }
    if cur.deleting {
        return Ok(DeleteOutcome::AlreadyDeleting);
    }
    let mut tombstone = current.clone();
    let meta = meta_object_mut(&mut tombstone)?;
    meta.insert("deletion_timestamp".to_string(), json!(Utc::now()));
    meta.insert("resource_version".to_string(), json!(cur.resource_version + 1));
    Ok(DeleteOutcome::Tombstone(tombstone))
}
