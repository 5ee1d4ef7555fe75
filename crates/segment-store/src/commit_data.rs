//! Commit userData (§6): `translog_uuid`, `translog_generation`, an optional
//! `sync_commit_id`, and the legacy `translog_id` read-compatibility key.
//!
//! The on-disk sidecar format is grounded on
//! `crates/storage/src/format/manifest.rs`'s magic + version + payload +
//! CRC32 binary envelope.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

pub const COMMIT_DATA_MAGIC: [u8; 4] = *b"SHCD";
pub const COMMIT_DATA_FORMAT_VERSION: u32 = 2;

pub const KEY_TRANSLOG_UUID: &str = "translog_uuid";
pub const KEY_TRANSLOG_GENERATION: &str = "translog_generation";
pub const KEY_SYNC_COMMIT_ID: &str = "sync_commit_id";
/// §3/invariant 6: `maxUnsafeAutoIdTimestamp` persists across commits so a
/// restart doesn't forget which auto-generated-id retries have already been
/// seen.
pub const KEY_MAX_UNSAFE_AUTO_ID_TIMESTAMP: &str = "max_unsafe_auto_id_timestamp";
/// Legacy key (§6): "accepted on read for backward compatibility... Writing
/// the legacy key is not supported."
pub const KEY_LEGACY_TRANSLOG_ID: &str = "translog_id";

#[derive(Debug, Error)]
pub enum CommitDataError {
    #[error("commit userData missing required key {0}")]
    MissingKey(&'static str),
    #[error("commit userData has invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    /// Resolved Open Question (a) in SPEC_FULL.md §9: a legacy
    /// `translog_id`-only commit is always rejected, uniformly, rather than
    /// accepted in one call site and rejected in another.
    #[error("legacy translog_id commit without translog_uuid is not supported; re-index from scratch")]
    LegacyTranslogIdUnsupported,
    #[error("commit data envelope too short")]
    TooShort,
    #[error("commit data envelope has invalid magic")]
    InvalidMagic,
    #[error("commit data envelope checksum mismatch")]
    ChecksumMismatch,
    #[error("commit data envelope unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parsed commit userData, §3's `TranslogGeneration` plus the optional
/// sync-commit marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitData {
    pub translog_uuid: String,
    pub translog_generation: u64,
    pub sync_commit_id: Option<String>,
    pub max_unsafe_auto_id_timestamp: Option<i64>,
}

impl CommitData {
    pub fn new(translog_uuid: impl Into<String>, translog_generation: u64) -> Self {
        CommitData {
            translog_uuid: translog_uuid.into(),
            translog_generation,
            sync_commit_id: None,
            max_unsafe_auto_id_timestamp: None,
        }
    }

    pub fn with_sync_commit_id(mut self, sync_commit_id: impl Into<String>) -> Self {
        self.sync_commit_id = Some(sync_commit_id.into());
        self
    }

    pub fn with_max_unsafe_auto_id_timestamp(mut self, timestamp: i64) -> Self {
        self.max_unsafe_auto_id_timestamp = Some(timestamp);
        self
    }

    pub fn to_user_data(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(KEY_TRANSLOG_UUID.to_string(), self.translog_uuid.clone());
        map.insert(
            KEY_TRANSLOG_GENERATION.to_string(),
            self.translog_generation.to_string(),
        );
        if let Some(id) = &self.sync_commit_id {
            map.insert(KEY_SYNC_COMMIT_ID.to_string(), id.clone());
        }
        if let Some(ts) = self.max_unsafe_auto_id_timestamp {
            map.insert(KEY_MAX_UNSAFE_AUTO_ID_TIMESTAMP.to_string(), ts.to_string());
        }
        map
    }

    /// §6/§9: the single parse site enforcing the resolved legacy-key
    /// policy. See `CommitDataError::LegacyTranslogIdUnsupported`.
    pub fn parse(user_data: &HashMap<String, String>) -> Result<Self, CommitDataError> {
        match user_data.get(KEY_TRANSLOG_UUID) {
            Some(uuid) => {
                let generation_str = user_data
                    .get(KEY_TRANSLOG_GENERATION)
                    .ok_or(CommitDataError::MissingKey(KEY_TRANSLOG_GENERATION))?;
                let generation: u64 = generation_str.parse().map_err(|_| CommitDataError::InvalidValue {
                    key: KEY_TRANSLOG_GENERATION,
                    value: generation_str.clone(),
                })?;
                let max_unsafe_auto_id_timestamp = user_data
                    .get(KEY_MAX_UNSAFE_AUTO_ID_TIMESTAMP)
                    .map(|v| {
                        v.parse::<i64>().map_err(|_| CommitDataError::InvalidValue {
                            key: KEY_MAX_UNSAFE_AUTO_ID_TIMESTAMP,
                            value: v.clone(),
                        })
                    })
                    .transpose()?;
                Ok(CommitData {
                    translog_uuid: uuid.clone(),
                    translog_generation: generation,
                    sync_commit_id: user_data.get(KEY_SYNC_COMMIT_ID).cloned(),
                    max_unsafe_auto_id_timestamp,
                })
            }
            None => {
                if user_data.contains_key(KEY_LEGACY_TRANSLOG_ID) {
                    Err(CommitDataError::LegacyTranslogIdUnsupported)
                } else {
                    Err(CommitDataError::MissingKey(KEY_TRANSLOG_UUID))
                }
            }
        }
    }

    /// Binary sidecar encoding, grounded on `manifest.rs`'s envelope shape.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&COMMIT_DATA_MAGIC);
        bytes.extend_from_slice(&COMMIT_DATA_FORMAT_VERSION.to_le_bytes());

        write_len_prefixed(&mut bytes, self.translog_uuid.as_bytes());
        bytes.extend_from_slice(&self.translog_generation.to_le_bytes());

        match &self.sync_commit_id {
            Some(id) => {
                bytes.push(1);
                write_len_prefixed(&mut bytes, id.as_bytes());
            }
            None => bytes.push(0),
        }

        match self.max_unsafe_auto_id_timestamp {
            Some(ts) => {
                bytes.push(1);
                bytes.extend_from_slice(&ts.to_le_bytes());
            }
            None => bytes.push(0),
        }

        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CommitDataError> {
        if bytes.len() < 4 + 4 + 4 {
            return Err(CommitDataError::TooShort);
        }
        if bytes[0..4] != COMMIT_DATA_MAGIC {
            return Err(CommitDataError::InvalidMagic);
        }
        let data = &bytes[..bytes.len() - 4];
        let stored_crc = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        if crc32fast::hash(data) != stored_crc {
            return Err(CommitDataError::ChecksumMismatch);
        }

        let mut cursor = 4;
        let version = u32::from_le_bytes(data[cursor..cursor + 4].try_into().unwrap());
        cursor += 4;
        if version != COMMIT_DATA_FORMAT_VERSION {
            return Err(CommitDataError::UnsupportedVersion(version));
        }

        let (uuid, next) = read_len_prefixed(data, cursor)?;
        cursor = next;
        let translog_uuid = String::from_utf8(uuid).map_err(|_| CommitDataError::InvalidValue {
            key: KEY_TRANSLOG_UUID,
            value: "<invalid utf8>".to_string(),
        })?;

        let translog_generation = u64::from_le_bytes(
            data.get(cursor..cursor + 8)
                .ok_or(CommitDataError::TooShort)?
                .try_into()
                .unwrap(),
        );
        cursor += 8;

        let has_sync_id = *data.get(cursor).ok_or(CommitDataError::TooShort)?;
        cursor += 1;
        let sync_commit_id = if has_sync_id == 1 {
            let (bytes, next) = read_len_prefixed(data, cursor)?;
            cursor = next;
            Some(String::from_utf8(bytes).map_err(|_| CommitDataError::InvalidValue {
                key: KEY_SYNC_COMMIT_ID,
                value: "<invalid utf8>".to_string(),
            })?)
        } else {
            None
        };

        let has_max_unsafe_ts = *data.get(cursor).ok_or(CommitDataError::TooShort)?;
        cursor += 1;
        let max_unsafe_auto_id_timestamp = if has_max_unsafe_ts == 1 {
            let ts = i64::from_le_bytes(
                data.get(cursor..cursor + 8)
                    .ok_or(CommitDataError::TooShort)?
                    .try_into()
                    .unwrap(),
            );
            Some(ts)
        } else {
            None
        };

        Ok(CommitData {
            translog_uuid,
            translog_generation,
            sync_commit_id,
            max_unsafe_auto_id_timestamp,
        })
    }

    pub fn write_to_path(&self, path: &Path) -> Result<(), CommitDataError> {
        let mut file = File::create(path)?;
        file.write_all(&self.to_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    pub fn read_from_path(path: &Path) -> Result<Self, CommitDataError> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }
}

fn write_len_prefixed(bytes: &mut Vec<u8>, payload: &[u8]) {
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(payload);
}

fn read_len_prefixed(data: &[u8], cursor: usize) -> Result<(Vec<u8>, usize), CommitDataError> {
    let len = u32::from_le_bytes(
        data.get(cursor..cursor + 4)
            .ok_or(CommitDataError::TooShort)?
            .try_into()
            .unwrap(),
    ) as usize;
    let start = cursor + 4;
    let end = start + len;
    let payload = data.get(start..end).ok_or(CommitDataError::TooShort)?.to_vec();
    Ok((payload, end))
}

#[allow(dead_code)]
fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_through_user_data() {
        let cd = CommitData::new("uuid-1", 7)
            .with_sync_commit_id("sync-1")
            .with_max_unsafe_auto_id_timestamp(12345);
        let ud = cd.to_user_data();
        let parsed = CommitData::parse(&ud).unwrap();
        assert_eq!(parsed, cd);
    }

    #[test]
    fn parse_tolerates_a_missing_max_unsafe_auto_id_timestamp() {
        let cd = CommitData::new("uuid-1", 7);
        let ud = cd.to_user_data();
        let parsed = CommitData::parse(&ud).unwrap();
        assert_eq!(parsed.max_unsafe_auto_id_timestamp, None);
    }

    #[test]
    fn parse_rejects_legacy_translog_id_without_uuid() {
        let mut ud = HashMap::new();
        ud.insert(KEY_LEGACY_TRANSLOG_ID.to_string(), "42".to_string());
        let err = CommitData::parse(&ud).unwrap_err();
        assert!(matches!(err, CommitDataError::LegacyTranslogIdUnsupported));
    }

    #[test]
    fn parse_rejects_missing_uuid_and_no_legacy_key() {
        let ud = HashMap::new();
        let err = CommitData::parse(&ud).unwrap_err();
        assert!(matches!(err, CommitDataError::MissingKey(KEY_TRANSLOG_UUID)));
    }

    #[test]
    fn binary_round_trip() {
        let cd = CommitData::new("abc-uuid", 99);
        let bytes = cd.to_bytes();
        let parsed = CommitData::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, cd);
    }

    #[test]
    fn binary_round_trip_with_sync_id_and_watermark() {
        let cd = CommitData::new("abc-uuid", 99)
            .with_sync_commit_id("sync-7")
            .with_max_unsafe_auto_id_timestamp(-1);
        let bytes = cd.to_bytes();
        let parsed = CommitData::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, cd);
    }

    #[test]
    fn binary_detects_corruption() {
        let cd = CommitData::new("abc-uuid", 99);
        let mut bytes = cd.to_bytes();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xFF;
        let err = CommitData::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, CommitDataError::ChecksumMismatch));
    }

    #[test]
    fn write_and_read_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commit.sidecar");
        let cd = CommitData::new("on-disk-uuid", 3).with_sync_commit_id("s");
        cd.write_to_path(&path).unwrap();
        let read_back = CommitData::read_from_path(&path).unwrap();
        assert_eq!(read_back, cd);
    }
}
