//! Runtime reconstruction of a snapshot into a [`VirtualFs`].
//!
//! File nodes are zero-copy slices of the blob. Directories are applied
//! before files so the result never depends on index ordering.

use super::format::{IndexEntry, Snapshot, checked_end};
use crate::vfs::VirtualFs;
use crate::vfs::path::parent;
use playbox_shared::errors::{PlayboxError, PlayboxResult};

/// Build the template filesystem for a session.
pub fn load_snapshot(snapshot: &Snapshot) -> PlayboxResult<VirtualFs> {
    let mut fs = VirtualFs::new();
    let corrupt = |path: &str, e: crate::vfs::VfsError| {
        PlayboxError::CorruptSnapshot(format!("{}: {}", path, e))
    };

    for (path, entry) in snapshot.index.iter() {
        if entry == IndexEntry::Directory {
            fs.mkdir_recursive(path).map_err(|e| corrupt(path, e))?;
        }
    }

    let mut files = 0usize;
    for (path, entry) in snapshot.index.iter() {
        let IndexEntry::File { offset, length } = entry else {
            continue;
        };
        let end = checked_end(path, offset, length, snapshot.blob.len())?;
        if let Some(dir) = parent(path) {
            fs.mkdir_recursive(dir).map_err(|e| corrupt(path, e))?;
        }
        fs.insert_shared(path, snapshot.blob.slice(offset as usize..end as usize))
            .map_err(|e| corrupt(path, e))?;
        files += 1;
    }

    tracing::debug!(
        entries = snapshot.index.len(),
        files,
        blob_bytes = snapshot.blob.len(),
        "Loaded snapshot into virtual filesystem"
    );
    Ok(fs)
}

impl Snapshot {
    /// Shorthand for [`load_snapshot`].
    pub fn load(&self) -> PlayboxResult<VirtualFs> {
        load_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::builder::SnapshotBuilder;
    use crate::snapshot::format::SnapshotIndex;
    use crate::vfs::VfsError;
    use bytes::Bytes;

    fn tree() -> Vec<(&'static str, &'static [u8])> {
        vec![
            ("/a.txt", b"hi".as_slice()),
            ("/dir/b.txt", b"bye".as_slice()),
            ("/dir/nested/c.bin", b"\x00\x9f\x92\x96".as_slice()),
            ("/empty.txt", b"".as_slice()),
        ]
    }

    #[test]
    fn test_round_trip_reproduces_every_file() {
        let mut builder = SnapshotBuilder::new();
        for (path, contents) in tree() {
            builder.add_file(path, contents).unwrap();
        }
        builder.add_dir("/lonely/dir").unwrap();
        let snapshot = builder.finish();

        let fs = load_snapshot(&snapshot).unwrap();

        for (path, contents) in tree() {
            assert_eq!(&fs.read_file(path).unwrap()[..], contents, "{}", path);
        }
        assert!(fs.stat("/lonely/dir").unwrap().is_directory);
    }

    #[test]
    fn test_directories_cannot_be_read_as_files() {
        let mut builder = SnapshotBuilder::new();
        builder.add_file("/dir/b.txt", b"bye").unwrap();
        let fs = builder.finish().load().unwrap();

        assert!(fs.stat("/dir").unwrap().is_directory);
        assert_eq!(
            fs.read_file("/dir"),
            Err(VfsError::IsADirectory("/dir".into()))
        );
    }

    #[test]
    fn test_out_of_bounds_range_is_corrupt() {
        let mut index = SnapshotIndex::new();
        index.insert("/x".into(), IndexEntry::File { offset: 3, length: 10 });
        let snapshot = Snapshot::new(index, Bytes::from_static(b"tiny"));

        let err = load_snapshot(&snapshot).unwrap_err();
        assert!(matches!(err, PlayboxError::CorruptSnapshot(msg) if msg.contains("/x")));
    }

    #[test]
    fn test_file_under_file_is_corrupt() {
        let mut index = SnapshotIndex::new();
        index.insert("/f".into(), IndexEntry::File { offset: 0, length: 1 });
        index.insert("/f/g".into(), IndexEntry::File { offset: 1, length: 1 });
        let snapshot = Snapshot::new(index, Bytes::from_static(b"ab"));

        assert!(matches!(
            load_snapshot(&snapshot),
            Err(PlayboxError::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn test_loaded_template_is_not_mutated_by_runs() {
        let mut builder = SnapshotBuilder::new();
        builder.add_file("/code.cr", b"print 1").unwrap();
        let snapshot = builder.finish();
        let template = snapshot.load().unwrap();

        let mut run = template.clone();
        run.write_at("/code.cr", 0, b"PRINT").unwrap();

        assert_eq!(template.read_file_text("/code.cr").unwrap(), "print 1");
        assert_eq!(&snapshot.blob[..], b"print 1");
    }
}
