//! Resource versions and the allocator that hands them out.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::StoreError;

/// Numerically ordered version token, rendered as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    /// Floor reported for an empty list.
    pub const BASELINE: ResourceVersion = ResourceVersion(1);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceVersion {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self).map_err(|e| {
            StoreError::InvalidArgument(format!("invalid resource version {:?}: {}", s, e))
        })
    }
}

impl From<u64> for ResourceVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for ResourceVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Reads `null`, a missing field, or `""` as no version.
pub fn deserialize_optional<'de, D>(deserializer: D) -> Result<Option<ResourceVersion>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Source of versions for every persisted mutation.
pub trait ResourceVersionAllocator: Send + Sync {
    /// A version strictly greater than any returned or observed before.
    fn next(&self) -> ResourceVersion;

    /// Raise the floor so that later versions exceed `seen`.
    fn observe(&self, seen: ResourceVersion);

    /// The most recent version handed out or observed.
    fn current(&self) -> ResourceVersion;
}

/// In-process atomic counter.
#[derive(Debug, Default)]
pub struct MonotonicAllocator {
    last: AtomicU64,
}

impl MonotonicAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start so that the first `next()` returns `start + 1`.
    pub fn starting_after(start: ResourceVersion) -> Self {
        Self {
            last: AtomicU64::new(start.get()),
        }
    }
}

impl ResourceVersionAllocator for MonotonicAllocator {
    fn next(&self) -> ResourceVersion {
        ResourceVersion(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn observe(&self, seen: ResourceVersion) {
        self.last.fetch_max(seen.get(), Ordering::SeqCst);
    }

    fn current(&self) -> ResourceVersion {
        ResourceVersion(self.last.load(Ordering::SeqCst))
    }
}
