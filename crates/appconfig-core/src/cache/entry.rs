//! Cached configuration entries

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an entry was last populated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    /// Filled by a cache-first read after a miss
    CacheFill,
    /// Overwritten by a background refresh
    Refresh,
    /// Written through by a create or update
    WriteThrough,
}

/// One cached configuration, keyed by configuration name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedConfiguration {
    /// Content, absent when the store reported none
    pub content: Option<Bytes>,
    /// Version token used for conditional refresh
    pub version: Option<String>,
    pub origin: EntryOrigin,
    pub fetched_at: DateTime<Utc>,
}

impl CachedConfiguration {
    pub fn new(content: Option<Bytes>, version: Option<String>, origin: EntryOrigin) -> Self {
        Self {
            content: content.filter(|c| !c.is_empty()),
            version,
            origin,
            fetched_at: Utc::now(),
        }
    }
}
