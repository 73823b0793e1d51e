//! Offline snapshot construction.
//!
//! Walks host directory trees and packs them into a [`Snapshot`]. Directory
//! markers are recorded for every directory and every ancestor of a mount
//! point; file bytes are appended to the blob with a running offset.
//!
//! Colliding virtual paths resolve as last-writer-wins. The losing file's
//! bytes stay in the blob unreferenced, so ranges still never overlap. A
//! file that replaces a directory takes the directory's whole subtree with
//! it. Each collision is logged at `warn` level since it usually means two
//! mounts were pointed at the same place by accident.

use super::format::{IndexEntry, Snapshot, SnapshotIndex};
use crate::vfs::path::{components, join_components, normalize};
use bytes::Bytes;
use playbox_shared::errors::{PlayboxError, PlayboxResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

/// A host path exposed at a virtual path inside the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub virtual_path: String,
}

impl Mount {
    pub fn new(host: impl Into<PathBuf>, virtual_path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            virtual_path: virtual_path.into(),
        }
    }
}

impl FromStr for Mount {
    type Err = PlayboxError;

    /// Parse `HOST:VIRTUAL`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, virtual_path) = s.rsplit_once(':').ok_or_else(|| {
            PlayboxError::Config(format!("mount must look like HOST:VIRTUAL, got {:?}", s))
        })?;
        if host.is_empty() || !virtual_path.starts_with('/') {
            return Err(PlayboxError::Config(format!(
                "mount must look like HOST:/virtual/path, got {:?}",
                s
            )));
        }
        Ok(Mount::new(host, virtual_path))
    }
}

/// Accumulates an index and blob.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    index: SnapshotIndex,
    blob: Vec<u8>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a directory (and its ancestors).
    pub fn add_dir(&mut self, path: &str) -> PlayboxResult<()> {
        let path = normalize_virtual(path)?;
        self.ensure_parents(&path);
        if path != "/" {
            self.record(path, IndexEntry::Directory);
        }
        Ok(())
    }

    /// Append a file's bytes to the blob and record its range.
    pub fn add_file(&mut self, path: &str, contents: &[u8]) -> PlayboxResult<()> {
        let path = normalize_virtual(path)?;
        if path == "/" {
            return Err(PlayboxError::Config("cannot store a file at /".into()));
        }
        self.ensure_parents(&path);

        let entry = IndexEntry::File {
            offset: self.blob.len() as u64,
            length: contents.len() as u64,
        };
        self.blob.extend_from_slice(contents);
        self.record(path, entry);
        Ok(())
    }

    /// Recursively pack `mount.host` beneath `mount.virtual_path`.
    pub fn add_mount(&mut self, mount: &Mount) -> PlayboxResult<()> {
        let base = normalize_virtual(&mount.virtual_path)?;
        let mut files = 0usize;

        for entry in WalkDir::new(&mount.host).follow_links(true) {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| mount.host.clone());
                PlayboxError::BuildIo {
                    path,
                    source: e.into(),
                }
            })?;

            let virtual_path = virtual_path_for(&base, &mount.host, entry.path())?;
            let file_type = entry.file_type();

            if file_type.is_dir() {
                self.add_dir(&virtual_path)?;
            } else if file_type.is_file() {
                let contents =
                    std::fs::read(entry.path()).map_err(|source| PlayboxError::BuildIo {
                        path: entry.path().to_path_buf(),
                        source,
                    })?;
                self.add_file(&virtual_path, &contents)?;
                files += 1;
            } else {
                tracing::debug!(path = %entry.path().display(), "Skipping non-regular file");
            }
        }

        tracing::info!(
            host = %mount.host.display(),
            virtual_path = %base,
            files,
            "Packed mount"
        );
        Ok(())
    }

    pub fn finish(self) -> Snapshot {
        Snapshot::new(self.index, Bytes::from(self.blob))
    }

    fn ensure_parents(&mut self, path: &str) {
        let Ok(parts) = components(path) else {
            return;
        };
        for depth in 1..parts.len() {
            let ancestor = join_components(&parts[..depth]);
            match self.index.get(&ancestor) {
                Some(IndexEntry::Directory) => {}
                Some(IndexEntry::File { .. }) => {
                    tracing::warn!(path = %ancestor, "Virtual path collision: file replaced by directory");
                    self.index.insert(ancestor, IndexEntry::Directory);
                }
                None => {
                    self.index.insert(ancestor, IndexEntry::Directory);
                }
            }
        }
    }

    fn record(&mut self, path: String, entry: IndexEntry) {
        let replaced = self.index.insert(path.clone(), entry);
        match (replaced, entry) {
            (None, _) | (Some(IndexEntry::Directory), IndexEntry::Directory) => {}
            (Some(IndexEntry::Directory), IndexEntry::File { .. }) => {
                let removed = self.index.remove_descendants(&path);
                tracing::warn!(
                    path = %path,
                    removed,
                    "Virtual path collision: directory replaced by file"
                );
            }
            (Some(previous), _) => {
                tracing::warn!(
                    path = %path,
                    previous = ?previous,
                    "Virtual path collision: last write wins"
                );
            }
        }
    }
}

/// Pack every mount into one snapshot.
pub fn build_snapshot(mounts: &[Mount]) -> PlayboxResult<Snapshot> {
    let mut builder = SnapshotBuilder::new();
    for mount in mounts {
        builder.add_mount(mount)?;
    }
    let snapshot = builder.finish();
    let stats = snapshot.stats();
    tracing::info!(
        directories = stats.directories,
        files = stats.files,
        blob_bytes = stats.blob_bytes,
        "Built snapshot"
    );
    Ok(snapshot)
}

fn normalize_virtual(path: &str) -> PlayboxResult<String> {
    normalize(path).map_err(|e| PlayboxError::Config(e.to_string()))
}

fn virtual_path_for(base: &str, host_root: &Path, host_path: &Path) -> PlayboxResult<String> {
    let relative = host_path.strip_prefix(host_root).map_err(|_| {
        PlayboxError::Internal(format!(
            "{} is not beneath {}",
            host_path.display(),
            host_root.display()
        ))
    })?;

    let mut virtual_path = base.to_string();
    for component in relative.components() {
        if !virtual_path.ends_with('/') {
            virtual_path.push('/');
        }
        virtual_path.push_str(&component.as_os_str().to_string_lossy());
    }
    Ok(virtual_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_build_matches_expected_layout() {
        let mut builder = SnapshotBuilder::new();
        builder.add_file("/a.txt", b"hi").unwrap();
        builder.add_file("/dir/b.txt", b"bye").unwrap();
        let snapshot = builder.finish();

        assert_eq!(
            snapshot.index.get("/a.txt"),
            Some(IndexEntry::File { offset: 0, length: 2 })
        );
        assert_eq!(snapshot.index.get("/dir"), Some(IndexEntry::Directory));
        assert_eq!(
            snapshot.index.get("/dir/b.txt"),
            Some(IndexEntry::File { offset: 2, length: 3 })
        );
        assert_eq!(snapshot.index.len(), 3);
        assert_eq!(&snapshot.blob[..], b"hibye");
        snapshot.validate().unwrap();
    }

    #[test]
    fn test_mount_walks_host_tree() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("src");
        fs::create_dir_all(root.join("nested/deeper")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("top.cr"), b"puts 1").unwrap();
        fs::write(root.join("nested/deeper/lib.cr"), b"module Lib; end").unwrap();

        let snapshot = build_snapshot(&[Mount::new(&root, "/crystal/src")]).unwrap();

        assert_eq!(snapshot.index.get("/crystal"), Some(IndexEntry::Directory));
        assert_eq!(snapshot.index.get("/crystal/src"), Some(IndexEntry::Directory));
        assert_eq!(
            snapshot.index.get("/crystal/src/empty"),
            Some(IndexEntry::Directory)
        );
        assert_eq!(
            &snapshot.file_bytes("/crystal/src/top.cr").unwrap()[..],
            b"puts 1"
        );
        assert_eq!(
            &snapshot
                .file_bytes("/crystal/src/nested/deeper/lib.cr")
                .unwrap()[..],
            b"module Lib; end"
        );
        snapshot.validate().unwrap();
    }

    #[test]
    fn test_single_file_mount() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("crt1.o");
        fs::write(&file, b"\0asm").unwrap();

        let snapshot = build_snapshot(&[Mount::new(&file, "/lib/wasm32-wasi/crt1.o")]).unwrap();

        assert_eq!(
            snapshot.index.get("/lib/wasm32-wasi"),
            Some(IndexEntry::Directory)
        );
        assert_eq!(
            &snapshot.file_bytes("/lib/wasm32-wasi/crt1.o").unwrap()[..],
            b"\0asm"
        );
    }

    #[test]
    fn test_colliding_mounts_last_write_wins() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("first");
        let second = temp.path().join("second");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(first.join("libc.a"), b"old").unwrap();
        fs::write(second.join("libc.a"), b"newer").unwrap();

        let snapshot = build_snapshot(&[
            Mount::new(&first, "/lib/wasm32-wasi"),
            Mount::new(&second, "/lib/wasm32-wasi"),
        ])
        .unwrap();

        assert_eq!(
            &snapshot.file_bytes("/lib/wasm32-wasi/libc.a").unwrap()[..],
            b"newer"
        );
        assert_eq!(snapshot.blob.len(), 8);
        snapshot.validate().unwrap();
    }

    #[test]
    fn test_file_replacing_directory_drops_subtree() {
        let temp = TempDir::new().unwrap();
        let tree = temp.path().join("tree");
        fs::create_dir_all(tree.join("x/deep")).unwrap();
        fs::write(tree.join("x/y"), b"y").unwrap();
        fs::write(tree.join("x/deep/z"), b"z").unwrap();
        fs::write(tree.join("keep"), b"k").unwrap();
        let file = temp.path().join("x");
        fs::write(&file, b"file wins").unwrap();

        let snapshot =
            build_snapshot(&[Mount::new(&tree, "/m"), Mount::new(&file, "/m/x")]).unwrap();

        assert!(snapshot.index.get("/m/x/y").is_none());
        assert!(snapshot.index.get("/m/x/deep/z").is_none());
        snapshot.validate().unwrap();

        let loaded = snapshot.load().unwrap();
        assert_eq!(loaded.read_file_text("/m/x").unwrap(), "file wins");
        assert_eq!(loaded.read_file_text("/m/keep").unwrap(), "k");
    }

    #[test]
    fn test_remove_descendants_keeps_siblings() {
        let mut builder = SnapshotBuilder::new();
        builder.add_file("/a/b", b"1").unwrap();
        builder.add_file("/ab", b"2").unwrap();
        builder.add_file("/a", b"3").unwrap();
        let snapshot = builder.finish();

        assert!(snapshot.index.get("/a/b").is_none());
        assert!(snapshot.index.get("/ab").is_some());
        assert!(matches!(snapshot.index.get("/a"), Some(IndexEntry::File { .. })));
        snapshot.load().unwrap();
    }

    #[test]
    fn test_missing_source_is_build_io() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("does-not-exist");

        let err = build_snapshot(&[Mount::new(&missing, "/x")]).unwrap_err();
        assert!(matches!(err, PlayboxError::BuildIo { path, .. } if path == missing));
    }

    #[test]
    fn test_mount_parsing() {
        let mount: Mount = "/home/me/lib:/lib/wasm32-wasi".parse().unwrap();
        assert_eq!(mount.host, PathBuf::from("/home/me/lib"));
        assert_eq!(mount.virtual_path, "/lib/wasm32-wasi");

        assert!("no-separator".parse::<Mount>().is_err());
        assert!("/host:relative".parse::<Mount>().is_err());
    }
}
