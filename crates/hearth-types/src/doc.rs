use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Document identifier (the `_id` field).
pub type DocId = String;

/// One mutation in a bulk write: set `id` to `value`, or delete it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocUpdate {
    pub id: DocId,
    pub value: Option<Value>,
    #[serde(default)]
    pub del: bool,
}

impl DocUpdate {
    pub fn put(id: impl Into<DocId>, value: Value) -> Self {
        Self {
            id: id.into(),
            value: Some(value),
            del: false,
        }
    }

    pub fn delete(id: impl Into<DocId>) -> Self {
        Self {
            id: id.into(),
            value: None,
            del: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors() {
        let put = DocUpdate::put("a", json!({"_id": "a"}));
        assert!(!put.del);
        assert!(put.value.is_some());

        let del = DocUpdate::delete("a");
        assert!(del.del);
        assert!(del.value.is_none());
    }

    #[test]
    fn del_defaults_to_false() {
        let update: DocUpdate = serde_json::from_str(r#"{"id":"x","value":1}"#).unwrap();
        assert!(!update.del);
        assert_eq!(update.value, Some(json!(1)));
    }
}
