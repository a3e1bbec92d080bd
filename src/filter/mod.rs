//! Resource-version matching and label selection for List and Watch.

pub mod labels;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{Document, StoreError, StoreResult};
use crate::version::ResourceVersion;

pub use labels::LabelSelector;

/// How a requested resource version constrains a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceVersionMatch {
    /// Only items whose version equals the requested one.
    Exact,
    /// Items at or after the requested version.
    NotOlderThan,
}

impl FromStr for ResourceVersionMatch {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Exact" => Ok(Self::Exact),
            "NotOlderThan" => Ok(Self::NotOlderThan),
            other => Err(StoreError::InvalidArgument(format!(
                "unsupported resourceVersionMatch {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for ResourceVersionMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "Exact"),
            Self::NotOlderThan => write!(f, "NotOlderThan"),
        }
    }
}

/// Caller options for List, Watch and DeleteCollection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub resource_version: Option<String>,
    pub resource_version_match: Option<ResourceVersionMatch>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label_selector(mut self, selector: &str) -> Self {
        self.label_selector = Some(selector.to_string());
        self
    }

    pub fn resource_version(mut self, version: impl ToString) -> Self {
        self.resource_version = Some(version.to_string());
        self
    }

    pub fn resource_version_match(mut self, policy: ResourceVersionMatch) -> Self {
        self.resource_version_match = Some(policy);
        self
    }

    fn requested_version(&self) -> Option<&str> {
        self.resource_version
            .as_deref()
            .map(str::trim)
            .filter(|rv| !rv.is_empty())
    }

    /// A watch without a version, or with `"0"`, starts from now and
    /// replays nothing.
    pub fn is_live_watch(&self) -> bool {
        matches!(self.requested_version(), None | Some("0"))
    }
}

/// Result of a List: the items plus the list's own version.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentList {
    pub resource_version: ResourceVersion,
    pub items: Vec<Document>,
}

impl DocumentList {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(Document::name).collect()
    }
}

/// Compiled [`ListOptions`].
#[derive(Debug, Clone)]
pub struct ConsistencyFilter {
    desired: ResourceVersion,
    policy: Option<ResourceVersionMatch>,
    selector: LabelSelector,
}

impl ConsistencyFilter {
    pub fn new(options: &ListOptions) -> StoreResult<Self> {
        let desired = match options.requested_version() {
            Some(raw) => raw.parse()?,
            None => ResourceVersion::BASELINE,
        };
        let selector = match options.label_selector.as_deref() {
            Some(raw) => raw.parse()?,
            None => LabelSelector::everything(),
        };

        Ok(Self {
            desired,
            policy: options.resource_version_match,
            selector,
        })
    }

    pub fn desired(&self) -> ResourceVersion {
        self.desired
    }

    pub fn selector(&self) -> &LabelSelector {
        &self.selector
    }

    pub fn matches_labels(&self, doc: &Document) -> bool {
        self.selector.matches(&doc.metadata.labels)
    }

    pub fn matches_version(&self, doc: &Document) -> bool {
        match (self.policy, doc.resource_version()) {
            (None, _) => true,
            (Some(ResourceVersionMatch::Exact), Some(rv)) => rv == self.desired,
            (Some(ResourceVersionMatch::NotOlderThan), Some(rv)) => rv >= self.desired,
            (Some(_), None) => false,
        }
    }

    /// Filter scanned documents into a list.
    ///
    /// The list version is the highest version among every scanned
    /// document, never below the baseline, regardless of which items
    /// survive filtering. Labels are checked before versions.
    pub fn apply(&self, scanned: Vec<Document>) -> DocumentList {
        let resource_version = scanned
            .iter()
            .filter_map(Document::resource_version)
            .fold(ResourceVersion::BASELINE, std::cmp::max);

        let items = scanned
            .into_iter()
            .filter(|doc| self.matches_labels(doc))
            .filter(|doc| self.matches_version(doc))
            .collect();

        DocumentList {
            resource_version,
            items,
        }
    }
}
