//! On-disk representation of a packed filesystem.
//!
//! A snapshot is two artifacts:
//! - index: JSON object mapping absolute paths to `null` (directory) or
//!   `[offset, length]` (file bytes inside the blob)
//! - blob: every file's content concatenated in build order
//!
//! ```text
//! {"/a.txt": [0, 2], "/dir": null, "/dir/b.txt": [2, 3]}   +   "hibye"
//! ```

use bytes::Bytes;
use playbox_shared::errors::{PlayboxError, PlayboxResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<(u64, u64)>", into = "Option<(u64, u64)>")]
pub enum IndexEntry {
    Directory,
    File { offset: u64, length: u64 },
}

impl From<Option<(u64, u64)>> for IndexEntry {
    fn from(value: Option<(u64, u64)>) -> Self {
        match value {
            None => IndexEntry::Directory,
            Some((offset, length)) => IndexEntry::File { offset, length },
        }
    }
}

impl From<IndexEntry> for Option<(u64, u64)> {
    fn from(entry: IndexEntry) -> Self {
        match entry {
            IndexEntry::Directory => None,
            IndexEntry::File { offset, length } => Some((offset, length)),
        }
    }
}

/// Path → entry mapping. Keys are normalized absolute paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotIndex(BTreeMap<String, IndexEntry>);

impl SnapshotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<IndexEntry> {
        self.0.get(path).copied()
    }

    /// Insert an entry, returning the one it replaced.
    pub fn insert(&mut self, path: String, entry: IndexEntry) -> Option<IndexEntry> {
        self.0.insert(path, entry)
    }

    /// Drop every entry strictly beneath `path`, returning how many went.
    pub fn remove_descendants(&mut self, path: &str) -> usize {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let before = self.0.len();
        self.0.retain(|key, _| !key.starts_with(&prefix));
        before - self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, IndexEntry)> {
        self.0.iter().map(|(path, entry)| (path.as_str(), *entry))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotStats {
    pub directories: usize,
    pub files: usize,
    pub blob_bytes: usize,
}

/// An index plus the blob it points into. The blob is never mutated.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub index: SnapshotIndex,
    pub blob: Bytes,
}

impl Snapshot {
    pub fn new(index: SnapshotIndex, blob: Bytes) -> Self {
        Self { index, blob }
    }

    /// Parse a JSON index and pair it with a blob.
    pub fn from_parts(index_json: &[u8], blob: Bytes) -> PlayboxResult<Self> {
        let index: SnapshotIndex = serde_json::from_slice(index_json)
            .map_err(|e| PlayboxError::CorruptSnapshot(format!("malformed index: {}", e)))?;
        Ok(Self { index, blob })
    }

    pub fn read_from(index_path: &Path, blob_path: &Path) -> PlayboxResult<Self> {
        let index_json = std::fs::read(index_path)?;
        let blob = std::fs::read(blob_path)?;
        tracing::debug!(
            index = %index_path.display(),
            blob = %blob_path.display(),
            blob_bytes = blob.len(),
            "Read snapshot artifacts"
        );
        Self::from_parts(&index_json, Bytes::from(blob))
    }

    pub fn write_to(&self, index_path: &Path, blob_path: &Path) -> PlayboxResult<()> {
        for path in [index_path, blob_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(index_path, serde_json::to_vec(&self.index)?)?;
        std::fs::write(blob_path, &self.blob)?;
        Ok(())
    }

    /// Check that every range fits in the blob and no two ranges overlap.
    pub fn validate(&self) -> PlayboxResult<()> {
        let mut ranges = Vec::new();
        for (path, entry) in self.index.iter() {
            if let IndexEntry::File { offset, length } = entry {
                let end = checked_end(path, offset, length, self.blob.len())?;
                ranges.push((offset, end, path));
            }
        }

        ranges.sort_unstable();
        // Furthest end seen so far among non-empty ranges.
        let mut covered: Option<(u64, &str)> = None;
        for (start, end, path) in ranges {
            if start == end {
                continue;
            }
            if let Some((max_end, prev_path)) = covered {
                if start < max_end {
                    return Err(PlayboxError::CorruptSnapshot(format!(
                        "ranges of {} and {} overlap",
                        prev_path, path
                    )));
                }
            }
            if covered.is_none_or(|(max_end, _)| end > max_end) {
                covered = Some((end, path));
            }
        }
        Ok(())
    }

    /// Bytes of the file at `path`, if it is a file with an in-bounds range.
    pub fn file_bytes(&self, path: &str) -> Option<Bytes> {
        match self.index.get(path)? {
            IndexEntry::File { offset, length } => {
                let end = checked_end(path, offset, length, self.blob.len()).ok()?;
                Some(self.blob.slice(offset as usize..end as usize))
            }
            IndexEntry::Directory => None,
        }
    }

    pub fn stats(&self) -> SnapshotStats {
        let mut stats = SnapshotStats {
            blob_bytes: self.blob.len(),
            ..Default::default()
        };
        for (_, entry) in self.index.iter() {
            match entry {
                IndexEntry::Directory => stats.directories += 1,
                IndexEntry::File { .. } => stats.files += 1,
            }
        }
        stats
    }
}

/// End of `[offset, offset + length)`, or `CorruptSnapshot` if it leaves the blob.
pub(crate) fn checked_end(
    path: &str,
    offset: u64,
    length: u64,
    blob_len: usize,
) -> PlayboxResult<u64> {
    match offset.checked_add(length) {
        Some(end) if end <= blob_len as u64 => Ok(end),
        _ => Err(PlayboxError::CorruptSnapshot(format!(
            "{}: range [{}, {}] exceeds blob of {} bytes",
            path, offset, length, blob_len
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        let mut index = SnapshotIndex::new();
        index.insert("/a.txt".into(), IndexEntry::File { offset: 0, length: 2 });
        index.insert("/dir".into(), IndexEntry::Directory);
        index.insert("/dir/b.txt".into(), IndexEntry::File { offset: 2, length: 3 });
        Snapshot::new(index, Bytes::from_static(b"hibye"))
    }

    #[test]
    fn test_index_json_shape() {
        let json = serde_json::to_string(&sample().index).unwrap();
        assert_eq!(json, r#"{"/a.txt":[0,2],"/dir":null,"/dir/b.txt":[2,3]}"#);

        let parsed: SnapshotIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample().index);
    }

    #[test]
    fn test_file_bytes_slices_blob() {
        let snapshot = sample();
        assert_eq!(&snapshot.file_bytes("/dir/b.txt").unwrap()[..], b"bye");
        assert!(snapshot.file_bytes("/dir").is_none());
        assert!(snapshot.file_bytes("/nope").is_none());
    }

    #[test]
    fn test_validate_rejects_out_of_bounds() {
        let mut snapshot = sample();
        snapshot
            .index
            .insert("/big".into(), IndexEntry::File { offset: 4, length: 2 });
        let err = snapshot.validate().unwrap_err();
        assert!(matches!(err, PlayboxError::CorruptSnapshot(msg) if msg.contains("/big")));
    }

    #[test]
    fn test_validate_rejects_overflowing_range() {
        let mut snapshot = sample();
        snapshot.index.insert(
            "/wrap".into(),
            IndexEntry::File {
                offset: u64::MAX,
                length: 2,
            },
        );
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let mut snapshot = sample();
        snapshot
            .index
            .insert("/c".into(), IndexEntry::File { offset: 1, length: 2 });
        assert!(snapshot.validate().is_err());
        sample().validate().unwrap();
    }

    #[test]
    fn test_malformed_index_is_corrupt() {
        let err = Snapshot::from_parts(b"{\"/a\": \"x\"}", Bytes::new()).unwrap_err();
        assert!(matches!(err, PlayboxError::CorruptSnapshot(_)));
    }

    #[test]
    fn test_write_and_read_artifacts() {
        let dir = tempfile::TempDir::new().unwrap();
        let index_path = dir.path().join("assets/fs.json");
        let blob_path = dir.path().join("assets/fs.blob");

        sample().write_to(&index_path, &blob_path).unwrap();
        let read = Snapshot::read_from(&index_path, &blob_path).unwrap();

        assert_eq!(read.index, sample().index);
        assert_eq!(&read.blob[..], b"hibye");
        assert_eq!(
            read.stats(),
            SnapshotStats {
                directories: 1,
                files: 2,
                blob_bytes: 5
            }
        );
    }
}
