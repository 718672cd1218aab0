//! Documents, writes and server timestamps.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use aquasense_core::DocPath;

use crate::error::StoreError;

/// Key of the server timestamp sentinel object.
pub const SERVER_TIMESTAMP_KEY: &str = "$server_timestamp";

/// Sentinel replaced by the commit time when written.
pub fn server_timestamp() -> Value {
    let mut map = Map::new();
    map.insert(SERVER_TIMESTAMP_KEY.to_string(), Value::Bool(true));
    Value::Object(map)
}

fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| m.len() == 1 && m.get(SERVER_TIMESTAMP_KEY) == Some(&Value::Bool(true)))
}

/// Replace every server timestamp sentinel in `value` with `now`.
pub(crate) fn resolve_server_timestamps(value: &mut Value, now: i64) {
    if is_server_timestamp(value) {
        *value = Value::from(now);
        return;
    }
    match value {
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| resolve_server_timestamps(v, now)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| resolve_server_timestamps(v, now)),
        _ => {}
    }
}

/// Serialize a model into document data. The result must be a JSON object.
pub fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    let data = serde_json::to_value(value)?;
    if !data.is_object() {
        return Err(StoreError::InvalidArgument(
            "document data must be an object".to_string(),
        ));
    }
    Ok(data)
}

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocPath,
    pub data: Value,
    /// Store sequence, assigned on creation and never reused.
    pub seq: i64,
    pub create_time: i64,
    pub update_time: i64,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Deserialize the document data into a model.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            StoreError::Internal(format!("document {} does not decode: {e}", self.path))
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct DocumentRow {
    pub seq: i64,
    pub path: String,
    pub data: String,
    pub create_time: i64,
    pub update_time: i64,
}

impl TryFrom<DocumentRow> for Document {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self, StoreError> {
        let path = DocPath::parse(&row.path)
            .map_err(|e| StoreError::Internal(format!("stored path is invalid: {e}")))?;
        let data = serde_json::from_str(&row.data)
            .map_err(|e| StoreError::Internal(format!("stored data for {path} is invalid: {e}")))?;
        Ok(Self {
            path,
            data,
            seq: row.seq,
            create_time: row.create_time,
            update_time: row.update_time,
        })
    }
}

/// One write in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Fails with already-exists if the document is present.
    Create { path: DocPath, data: Value },
    /// Create or overwrite.
    Set { path: DocPath, data: Value },
    /// Merge top-level fields into an existing document.
    Update {
        path: DocPath,
        patch: Map<String, Value>,
    },
    /// Remove the document; a missing document is not an error.
    Delete { path: DocPath },
}

impl Write {
    pub const fn path(&self) -> &DocPath {
        match self {
            Self::Create { path, .. }
            | Self::Set { path, .. }
            | Self::Update { path, .. }
            | Self::Delete { path } => path,
        }
    }

    /// `Set` from a serializable model.
    pub fn set<T: Serialize>(path: DocPath, value: &T) -> Result<Self, StoreError> {
        Ok(Self::Set {
            path,
            data: encode(value)?,
        })
    }

    /// `Create` from a serializable model.
    pub fn create<T: Serialize>(path: DocPath, value: &T) -> Result<Self, StoreError> {
        Ok(Self::Create {
            path,
            data: encode(value)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_sentinels() {
        let mut data = json!({
            "created_at": server_timestamp(),
            "nested": {"at": server_timestamp(), "keep": 3},
            "list": [server_timestamp()],
        });
        resolve_server_timestamps(&mut data, 1_700);
        assert_eq!(data, json!({"created_at": 1_700, "nested": {"at": 1_700, "keep": 3}, "list": [1_700]}));
    }

    #[test]
    fn lookalike_objects_are_kept() {
        let mut data = json!({"x": {"$server_timestamp": true, "other": 1}});
        let before = data.clone();
        resolve_server_timestamps(&mut data, 5);
        assert_eq!(data, before);
    }

    #[test]
    fn encode_rejects_scalars() {
        assert!(encode(&5).is_err());
        assert!(encode(&json!({"a": 1})).is_ok());
    }
}
