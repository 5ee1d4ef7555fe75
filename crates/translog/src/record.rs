use serde::{Deserialize, Serialize};

/// §4.1: "a record encoding `{kind, uid, version, source_doc|∅, seq info}`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Index,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslogRecord {
    pub kind: RecordKind,
    pub uid: Vec<u8>,
    pub version: i64,
    pub source_doc: Option<Vec<u8>>,
    pub seq_no: u64,
}

impl TranslogRecord {
    pub fn index(uid: Vec<u8>, version: i64, source_doc: Vec<u8>, seq_no: u64) -> Self {
        TranslogRecord {
            kind: RecordKind::Index,
            uid,
            version,
            source_doc: Some(source_doc),
            seq_no,
        }
    }

    pub fn delete(uid: Vec<u8>, version: i64, seq_no: u64) -> Self {
        TranslogRecord {
            kind: RecordKind::Delete,
            uid,
            version,
            source_doc: None,
            seq_no,
        }
    }
}

/// A durable pointer to one appended record: `{generation, offset}`, ordered
/// by `(generation, offset)` so callers can compare against a committed
/// location (§5's "flush fence").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub generation: u64,
    pub offset: u64,
}

/// A finite, ordered snapshot of records from a generation forward, handed
/// to the Recovery Driver (§4.4).
pub struct TranslogSnapshot {
    pub(crate) records: std::vec::IntoIter<(Location, TranslogRecord)>,
}

impl Iterator for TranslogSnapshot {
    type Item = (Location, TranslogRecord);

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }
}
