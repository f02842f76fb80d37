//! Field-map codec.
//!
//! Documents travel to and from the remote store as flat maps of
//! field name to CBOR value. Merging happens per field, so the map is the
//! unit the sync layer works with; typed records are recovered with
//! [`from_fields`], which rejects anything that does not fit the schema.

use crate::error::{ModelError, ModelResult};
use ciborium::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// A document as field name to CBOR value.
pub type FieldMap = BTreeMap<String, Value>;

/// Converts a record into a field map.
pub fn to_fields<T: Serialize>(collection: &'static str, record: &T) -> ModelResult<FieldMap> {
    let value = Value::serialized(record)
        .map_err(|e| ModelError::malformed(collection, format!("encode: {e}")))?;

    match value {
        Value::Map(entries) => entries
            .into_iter()
            .map(|(key, value)| match key {
                Value::Text(name) => Ok((name, value)),
                other => Err(ModelError::malformed(
                    collection,
                    format!("non-text field name {other:?}"),
                )),
            })
            .collect(),
        other => Err(ModelError::malformed(
            collection,
            format!("expected a map, got {other:?}"),
        )),
    }
}

/// Rebuilds a record from a field map.
pub fn from_fields<T: DeserializeOwned>(
    collection: &'static str,
    fields: &FieldMap,
) -> ModelResult<T> {
    let value = Value::Map(
        fields
            .iter()
            .map(|(name, value)| (Value::Text(name.clone()), value.clone()))
            .collect(),
    );
    value
        .deserialized()
        .map_err(|e| ModelError::malformed(collection, e.to_string()))
}

/// Encodes a field map to CBOR bytes.
pub fn encode(fields: &FieldMap) -> ModelResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(fields, &mut buf)
        .map_err(|e| ModelError::malformed("document", format!("encode: {e}")))?;
    Ok(buf)
}

/// Decodes a field map from CBOR bytes.
pub fn decode(bytes: &[u8]) -> ModelResult<FieldMap> {
    ciborium::from_reader(bytes).map_err(|e| ModelError::malformed("document", e.to_string()))
}

/// Names of fields whose values differ between `before` and `after`.
///
/// Fields present on only one side count as changed.
pub fn changed_fields(before: &FieldMap, after: &FieldMap) -> Vec<String> {
    let mut changed: Vec<String> = after
        .iter()
        .filter(|(name, value)| before.get(*name) != Some(*value))
        .map(|(name, _)| name.clone())
        .collect();
    changed.extend(
        before
            .keys()
            .filter(|name| !after.contains_key(*name))
            .cloned(),
    );
    changed.sort();
    changed
}
