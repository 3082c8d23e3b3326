//! Directory files: the flushed id → log offset index.
//!
//! ```text
//! ┌──────────────┬───────────────┐
//! │ id: i32      │ offset: i32   │  × count, ascending offset
//! ├──────────────┴───────────────┤
//! │ data file name: UTF          │
//! ├──────────────────────────────┤
//! │ count: i32                   │
//! │ MAGIC1: 0xFEEDC0DE           │
//! │ MAGIC2: 0xFEEDFACE           │
//! └──────────────────────────────┘
//! ```
//!
//! A file is only accepted if its length matches the count and name
//! length exactly and both magics are present, so a torn write is always
//! detected.

use crate::error::{CoreError, CoreResult};
use crate::types::ResourceId;
use resdb_codec::{DataReader, DataWriter};
use resdb_storage::{FileBackend, StorageBackend};
use std::path::Path;

/// First trailer magic.
pub const MAGIC1: u32 = 0xFEED_C0DE;

/// Second trailer magic.
pub const MAGIC2: u32 = 0xFEED_FACE;

/// Count plus both magics.
const TRAILER_LEN: usize = 12;

/// Bytes per `(id, offset)` pair.
const PAIR_LEN: usize = 8;

/// Decoded directory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Directory {
    /// File name of the data log generation the offsets point into.
    pub data_file: String,
    /// `(id, offset)` pairs, ascending by offset.
    pub entries: Vec<(ResourceId, u64)>,
}

impl Directory {
    /// Creates a directory for `data_file`, sorting `entries` by offset.
    pub fn new(data_file: impl Into<String>, mut entries: Vec<(ResourceId, u64)>) -> Self {
        entries.sort_unstable_by_key(|&(id, offset)| (offset, id));
        Self {
            data_file: data_file.into(),
            entries,
        }
    }

    /// Largest referenced offset.
    #[must_use]
    pub fn last_offset(&self) -> Option<u64> {
        self.entries.last().map(|&(_, offset)| offset)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no resource is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the directory.
    ///
    /// # Errors
    ///
    /// Fails if an offset or the entry count does not fit in an `i32`, or
    /// the data file name is too long.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut w = DataWriter::with_capacity(self.entries.len() * PAIR_LEN + 64);
        for &(id, offset) in &self.entries {
            let offset32 =
                i32::try_from(offset).map_err(|_| CoreError::OffsetOverflow { offset })?;
            w.put_i32(id.as_i32());
            w.put_i32(offset32);
        }
        w.put_utf(Some(&self.data_file))?;
        w.put_count(self.entries.len())?;
        w.put_i32(i32::from_be_bytes(MAGIC1.to_be_bytes()));
        w.put_i32(i32::from_be_bytes(MAGIC2.to_be_bytes()));
        Ok(w.into_bytes())
    }

    /// Parses and validates a directory file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedDirectory`] on a bad trailer, a length
    /// mismatch or negative offsets.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let len = bytes.len();
        if len < TRAILER_LEN + 2 {
            return Err(CoreError::malformed_directory(format!(
                "{len} bytes is too short"
            )));
        }

        let mut trailer = DataReader::at(bytes, len - TRAILER_LEN)?;
        let count = trailer.get_i32()?;
        let magic1 = u32::from_be_bytes(trailer.get_i32()?.to_be_bytes());
        let magic2 = u32::from_be_bytes(trailer.get_i32()?.to_be_bytes());
        if magic1 != MAGIC1 || magic2 != MAGIC2 {
            return Err(CoreError::malformed_directory("bad magic"));
        }
        let count = usize::try_from(count)
            .map_err(|_| CoreError::malformed_directory(format!("negative count {count}")))?;

        let pairs_len = count
            .checked_mul(PAIR_LEN)
            .filter(|n| n + 2 + TRAILER_LEN <= len)
            .ok_or_else(|| {
                CoreError::malformed_directory(format!("{count} entries do not fit {len} bytes"))
            })?;
        let name_len = usize::from(u16::from_be_bytes([bytes[pairs_len], bytes[pairs_len + 1]]));
        let expected = pairs_len + 2 + name_len + TRAILER_LEN;
        if expected != len {
            return Err(CoreError::malformed_directory(format!(
                "length {len}, expected {expected}"
            )));
        }

        let mut r = DataReader::new(bytes);
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let id = r.get_i32()?;
            let offset = r.get_i32()?;
            let offset = u64::try_from(offset).map_err(|_| {
                CoreError::malformed_directory(format!("negative offset for id {id}"))
            })?;
            entries.push((ResourceId::new(id), offset));
        }
        let data_file = r
            .get_required_utf("data file name")
            .map_err(|e| CoreError::malformed_directory(e.to_string()))?;

        Ok(Self::new(data_file, entries))
    }

    /// Reads and validates the directory file at `path`.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or a malformed file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        Self::decode(&std::fs::read(path)?)
    }

    /// Writes the directory to a fresh file at `path` and syncs it.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or if the directory cannot be encoded.
    pub fn write(&self, path: &Path) -> CoreResult<()> {
        let bytes = self.encode()?;
        let mut backend = FileBackend::create(path)?;
        backend.append(&bytes)?;
        backend.sync()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn sample() -> Directory {
        Directory::new(
            "resData3",
            vec![
                (ResourceId::new(2), 40),
                (ResourceId::new(1), 0),
                (ResourceId::new(7), 95),
            ],
        )
    }

    #[test]
    fn entries_are_sorted_by_offset() {
        let dir = sample();
        let ids: Vec<i32> = dir.entries.iter().map(|(id, _)| id.as_i32()).collect();
        assert_eq!(ids, vec![1, 2, 7]);
        assert_eq!(dir.last_offset(), Some(95));
    }

    #[test]
    fn layout_is_exact() {
        let bytes = Directory::new("d", vec![(ResourceId::new(1), 16)])
            .encode()
            .unwrap();
        assert_eq!(
            bytes,
            vec![
                0, 0, 0, 1, 0, 0, 0, 16, // pair
                0, 1, b'd', // data file
                0, 0, 0, 1, // count
                0xFE, 0xED, 0xC0, 0xDE, 0xFE, 0xED, 0xFA, 0xCE,
            ]
        );
    }

    #[test]
    fn decode_reads_back_entries() {
        let dir = sample();
        assert_eq!(Directory::decode(&dir.encode().unwrap()).unwrap(), dir);

        let empty = Directory::new("resData0", Vec::new());
        assert_eq!(Directory::decode(&empty.encode().unwrap()).unwrap(), empty);
    }

    #[test]
    fn flipped_magic_is_rejected() {
        let mut bytes = sample().encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            Directory::decode(&bytes),
            Err(CoreError::MalformedDirectory { .. })
        ));
    }

    #[test]
    fn truncation_is_rejected() {
        let bytes = sample().encode().unwrap();
        for cut in [1, 8, 12, bytes.len() - 1] {
            assert!(Directory::decode(&bytes[..bytes.len() - cut]).is_err());
        }
    }

    #[test]
    fn oversized_count_is_rejected() {
        let mut bytes = sample().encode().unwrap();
        let count_at = bytes.len() - TRAILER_LEN;
        bytes[count_at..count_at + 4].copy_from_slice(&i32::MAX.to_be_bytes());
        assert!(matches!(
            Directory::decode(&bytes),
            Err(CoreError::MalformedDirectory { .. })
        ));
    }

    #[test]
    fn offsets_beyond_i32_fail_to_encode() {
        let dir = Directory::new("d", vec![(ResourceId::new(1), u64::from(u32::MAX))]);
        assert!(matches!(
            dir.encode(),
            Err(CoreError::OffsetOverflow { .. })
        ));
    }

    #[test]
    fn write_then_load() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("resMap0");
        sample().write(&path).unwrap();
        assert_eq!(Directory::load(&path).unwrap(), sample());
    }

    proptest! {
        #[test]
        fn torn_directories_never_decode(
            pairs in prop::collection::vec((0..100_000i32, 0..1_000_000u64), 0..64),
            generation in 0..1000u32,
            cut in 1usize..4096,
        ) {
            let entries = pairs
                .into_iter()
                .map(|(id, offset)| (ResourceId::new(id), offset))
                .collect();
            let dir = Directory::new(format!("resData{generation}"), entries);
            let bytes = dir.encode().unwrap();
            prop_assert_eq!(Directory::decode(&bytes).unwrap(), dir);

            let cut = cut % bytes.len() + 1;
            prop_assert!(Directory::decode(&bytes[..bytes.len() - cut]).is_err());
        }
    }
}
