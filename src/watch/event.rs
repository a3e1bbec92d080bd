use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::Document;
use crate::filter::LabelSelector;

/// Kind of change carried by a [`WatchEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "ADDED"),
            Self::Modified => write!(f, "MODIFIED"),
            Self::Deleted => write!(f, "DELETED"),
        }
    }
}

/// One change, shared by every subscriber it is delivered to.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub document: Arc<Document>,
}

impl WatchEvent {
    pub fn new(event_type: EventType, document: Document) -> Self {
        Self {
            event_type,
            document: Arc::new(document),
        }
    }

    /// `{"type": "ADDED", "object": {...}}`
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        Ok(serde_json::json!({
            "type": self.event_type,
            "object": self.document.to_json()?,
        }))
    }
}

/// What a subscriber wants to see.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub tenant: String,
    /// `None` or empty means every namespace.
    pub namespace: Option<String>,
    pub selector: LabelSelector,
}

impl EventFilter {
    pub fn new(tenant: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            ..Self::default()
        }
    }

    pub fn namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        self
    }

    pub fn selector(mut self, selector: LabelSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if doc.metadata.tenant != self.tenant {
            return false;
        }
        if let Some(ns) = &self.namespace
            && doc.namespace() != ns
        {
            return false;
        }
        self.selector.matches(&doc.metadata.labels)
    }
}
