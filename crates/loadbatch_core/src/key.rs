//! Partition keys and segment identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Window generation number.
pub type Generation = u64;

/// Two-part destination of a record, e.g. dataset and table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    /// Primary identifier (dataset).
    pub primary: String,
    /// Secondary identifier (table).
    pub secondary: String,
}

impl PartitionKey {
    /// Creates a partition key.
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.primary, self.secondary)
    }
}

/// Identity of one segment: a partition key within one generation.
///
/// The key travels with the segment from creation to delivery; it is never
/// re-derived from the segment name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentId {
    /// Generation the segment was created in.
    pub generation: Generation,
    /// Unix seconds of the window boundary the segment was created in.
    pub window_start: u64,
    /// Destination of the segment's records.
    pub key: PartitionKey,
}

impl SegmentId {
    /// Creates a segment identity.
    pub fn new(generation: Generation, window_start: u64, key: PartitionKey) -> Self {
        Self {
            generation,
            window_start,
            key,
        }
    }

    /// External name of the segment and of its backing resource.
    ///
    /// Format: `{window_start}-{generation}-{primary}-{secondary}`, with both
    /// key parts escaped so that distinct keys never share a name.
    pub fn name(&self) -> String {
        self.name_for_attempt(0)
    }

    /// Name to try when earlier attempts were already taken by leftover
    /// resources. Attempt 0 is [`SegmentId::name`]; later attempts append
    /// `-{attempt}`.
    pub fn name_for_attempt(&self, attempt: u32) -> String {
        let mut name = format!(
            "{}-{}-{}-{}",
            self.window_start,
            self.generation,
            escape_component(&self.key.primary),
            escape_component(&self.key.secondary)
        );
        if attempt > 0 {
            name.push_str(&format!("-{attempt}"));
        }
        name
    }
}

/// Percent-escapes every byte outside `[A-Za-z0-9_.]`.
///
/// The output never contains `-` or a path separator, which keeps the name
/// fields unambiguous.
fn escape_component(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for byte in part.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'.' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
