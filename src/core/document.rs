use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::version::{self, ResourceVersion};

/// Store-managed object metadata.
///
/// Fields the store does not know about are kept in `extra` and written back
/// unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generate_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Source cluster the document belongs to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tenant: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "version::deserialize_optional"
    )]
    pub resource_version: Option<ResourceVersion>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub generation: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// A versioned JSON document.
///
/// Everything outside `metadata` is opaque to the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(flatten)]
    pub body: Map<String, JsonValue>,
}

impl Document {
    pub fn new(name: impl Into<String>) -> Self {
        let mut doc = Self::default();
        doc.metadata.name = name.into();
        doc
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = namespace.into();
        self
    }

    pub fn with_generate_name(mut self, prefix: impl Into<String>) -> Self {
        self.metadata.generate_name = prefix.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.body.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn resource_version(&self) -> Option<ResourceVersion> {
        self.metadata.resource_version
    }

    pub fn key(&self) -> DocumentKey<'_> {
        DocumentKey {
            name: &self.metadata.name,
            namespace: &self.metadata.namespace,
        }
    }

    pub fn from_json(value: JsonValue) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn to_json(&self) -> serde_json::Result<JsonValue> {
        serde_json::to_value(self)
    }
}

/// `namespace/name`, or just `name` for cluster-scoped documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentKey<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
}

impl<'a> DocumentKey<'a> {
    pub fn new(name: &'a str, namespace: &'a str) -> Self {
        Self { name, namespace }
    }
}

impl fmt::Display for DocumentKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = json!({
            "apiVersion": "wgpolicyk8s.io/v1alpha2",
            "kind": "PolicyReport",
            "metadata": {
                "name": "polr-a",
                "namespace": "default",
                "ownerReferences": [{"kind": "Pod", "name": "nginx"}],
                "resourceVersion": "42"
            },
            "summary": {"pass": 3, "fail": 1}
        });

        let doc = Document::from_json(raw.clone()).unwrap();
        assert_eq!(doc.name(), "polr-a");
        assert_eq!(doc.resource_version(), Some(ResourceVersion::new(42)));
        assert!(doc.metadata.extra.contains_key("ownerReferences"));
        assert_eq!(doc.body["summary"]["fail"], json!(1));

        assert_eq!(doc.to_json().unwrap(), raw);
    }

    #[test]
    fn test_empty_resource_version_is_absent() {
        let doc = Document::from_json(json!({
            "metadata": {"name": "a", "resourceVersion": ""}
        }))
        .unwrap();
        assert_eq!(doc.resource_version(), None);
    }

    #[test]
    fn test_key_display() {
        let doc = Document::new("polr-a").with_namespace("team-a");
        assert_eq!(doc.key().to_string(), "team-a/polr-a");
        assert_eq!(Document::new("cpolr").key().to_string(), "cpolr");
    }
}
