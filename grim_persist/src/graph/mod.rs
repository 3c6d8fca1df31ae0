//! Identity-preserving persistence for the live script object graph.
//!
//! A payload is six count-prefixed sections in fixed order, each opened by a
//! one-byte section tag:
//!
//! ```text
//! strings | class refs | closure refs | arrays | tables | instances
//! ```
//!
//! Every object is written once and referenced elsewhere by its index in the
//! section for its kind, which is what makes shared and cyclic graphs safe.

mod deserializer;
mod inspect;
mod serializer;

use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;

use crate::cursor::{ByteReader, ByteWriter};
use crate::error::GraphError;

pub use deserializer::{DeserializeOptions, GraphDeserializer, LoadOutcome, LoadState};
pub use inspect::GraphSummary;
pub use serializer::{GraphSerializer, SerializeOptions, SerializedGraph};

/// Root table index meaning "no table merges into the globals".
pub const NO_ROOT_TABLE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Strings,
    ClassRefs,
    ClosureRefs,
    Arrays,
    Tables,
    Instances,
}

impl Section {
    fn tag(self) -> u8 {
        match self {
            Section::Strings => 0x01,
            Section::ClassRefs => 0x02,
            Section::ClosureRefs => 0x03,
            Section::Arrays => 0x04,
            Section::Tables => 0x05,
            Section::Instances => 0x06,
        }
    }

    fn write(self, writer: &mut ByteWriter) {
        writer.put_u8(self.tag());
    }

    /// Consumes the section tag, failing if it is not the one expected next.
    fn expect(self, reader: &mut ByteReader<'_>) -> Result<(), GraphError> {
        let found = reader.get_u8()?;
        if found != self.tag() {
            return Err(GraphError::UnexpectedSection {
                expected: self,
                found,
            });
        }
        Ok(())
    }
}

/// Per-kind object counts for one serialize or unserialize call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub strings: usize,
    pub classes: usize,
    pub closures: usize,
    pub arrays: usize,
    pub tables: usize,
    pub instances: usize,
    /// Member and slot writes replayed once every object existed.
    pub deferred: usize,
    /// Values dropped because they could not be named or resolved.
    pub skipped: usize,
}

/// First-seen ordering of unique objects of one kind.
struct KindTable<K, H> {
    handles: Vec<H>,
    index: HashMap<K, u32>,
}

impl<K: Hash + Eq, H> KindTable<K, H> {
    fn new() -> Self {
        KindTable {
            handles: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn get(&self, key: &K) -> Option<u32> {
        self.index.get(key).copied()
    }

    /// Returns the index for `key`, assigning the next free one on first
    /// sight. The flag reports whether the handle was new.
    fn intern(&mut self, key: K, handle: impl FnOnce() -> H) -> Result<(u32, bool), GraphError> {
        if let Some(index) = self.index.get(&key) {
            return Ok((*index, false));
        }
        let index = u32::try_from(self.handles.len())
            .map_err(|_| crate::error::StreamError::LengthOverflow(self.handles.len()))?;
        self.handles.push(handle());
        self.index.insert(key, index);
        Ok((index, true))
    }

    fn len(&self) -> usize {
        self.handles.len()
    }
}
