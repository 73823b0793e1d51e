//! In-memory hierarchical filesystem.
//!
//! Every pipeline run works on its own `VirtualFs`. The template loaded from
//! a snapshot is cloned per run; cloning is cheap because snapshot-backed
//! files share the blob and only detach on first write.
//!
//! There is no locking: a `VirtualFs` has exactly one owner at a time, and
//! the pipeline moves it into each stage and back out again.

mod error;
mod node;
pub mod path;

pub use error::{VfsError, VfsResult};

use bytes::Bytes;
use node::{FileContent, Node};
use path::{components, is_within, normalize, parent};
use std::collections::BTreeMap;

/// How `write_file` treats existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
    Overwrite,
}

/// Largest size any single file may grow to.
pub const MAX_FILE_BYTES: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub is_directory: bool,
    pub len: u64,
}

#[derive(Debug, Clone)]
pub struct VirtualFs {
    root: Node,
}

impl Default for VirtualFs {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualFs {
    /// Create an empty filesystem containing only `/`.
    pub fn new() -> Self {
        Self {
            root: Node::empty_dir(),
        }
    }

    /// Create `path` and any missing ancestors. Existing directories are fine.
    pub fn mkdir_recursive(&mut self, path: &str) -> VfsResult<()> {
        let parts = components(path)?;
        let mut node = &mut self.root;
        for part in parts {
            node = match node {
                Node::Directory(children) => children
                    .entry(part.to_string())
                    .or_insert_with(Node::empty_dir),
                Node::File(_) => return Err(VfsError::NotADirectory(path.to_string())),
            };
        }
        if node.is_dir() {
            Ok(())
        } else {
            Err(VfsError::NotADirectory(path.to_string()))
        }
    }

    /// Create a single directory. The parent must exist.
    pub fn create_dir(&mut self, path: &str) -> VfsResult<()> {
        let (children, name) = self.parent_dir_mut(path)?;
        if children.contains_key(&name) {
            return Err(VfsError::AlreadyExists(path.to_string()));
        }
        children.insert(name, Node::empty_dir());
        Ok(())
    }

    pub fn write_file(&mut self, path: &str, data: &[u8], mode: WriteMode) -> VfsResult<()> {
        let (children, name) = self.parent_dir_mut(path)?;
        match children.get_mut(&name) {
            Some(Node::Directory(_)) => Err(VfsError::IsADirectory(path.to_string())),
            Some(Node::File(content)) => {
                match mode {
                    WriteMode::Overwrite => {
                        checked_end(path, 0, data.len())?;
                        *content = FileContent::Owned(data.to_vec());
                    }
                    WriteMode::Append => {
                        checked_end(path, content.len() as u64, data.len())?;
                        content.make_mut().extend_from_slice(data);
                    }
                }
                Ok(())
            }
            None => {
                checked_end(path, 0, data.len())?;
                children.insert(name, Node::File(FileContent::Owned(data.to_vec())));
                Ok(())
            }
        }
    }

    /// Place a file whose bytes stay a view into `data` until modified.
    pub(crate) fn insert_shared(&mut self, path: &str, data: Bytes) -> VfsResult<()> {
        let (children, name) = self.parent_dir_mut(path)?;
        if let Some(Node::Directory(_)) = children.get(&name) {
            return Err(VfsError::IsADirectory(path.to_string()));
        }
        children.insert(name, Node::File(FileContent::Shared(data)));
        Ok(())
    }

    /// Write `data` at `offset`, zero-filling any gap past the current end.
    ///
    /// Fails with `FileTooLarge` if the file would grow past [`MAX_FILE_BYTES`].
    pub fn write_at(&mut self, path: &str, offset: u64, data: &[u8]) -> VfsResult<()> {
        let end = checked_end(path, offset, data.len())?;
        let content = self.file_mut(path)?.make_mut();
        let start = end - data.len();
        if content.len() < end {
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(data);
        Ok(())
    }

    pub fn truncate(&mut self, path: &str, len: u64) -> VfsResult<()> {
        let len = checked_end(path, len, 0)?;
        self.file_mut(path)?.make_mut().resize(len, 0);
        Ok(())
    }

    pub fn read_file(&self, path: &str) -> VfsResult<Bytes> {
        Ok(self.file(path)?.to_bytes())
    }

    pub fn read_file_text(&self, path: &str) -> VfsResult<String> {
        let content = self.file(path)?;
        String::from_utf8(content.as_slice().to_vec())
            .map_err(|_| VfsError::InvalidData(path.to_string()))
    }

    /// Copy bytes starting at `offset` into `buf`; returns how many were copied.
    pub fn read_at(&self, path: &str, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let data = self.file(path)?.as_slice();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    pub fn stat(&self, path: &str) -> VfsResult<Metadata> {
        Ok(match self.node(path)? {
            Node::Directory(_) => Metadata {
                is_directory: true,
                len: 0,
            },
            Node::File(content) => Metadata {
                is_directory: false,
                len: content.len() as u64,
            },
        })
    }

    pub fn exists(&self, path: &str) -> bool {
        self.node(path).is_ok()
    }

    /// Names of the entries in a directory, sorted.
    pub fn list_children(&self, path: &str) -> VfsResult<Vec<String>> {
        match self.node(path)? {
            Node::Directory(children) => Ok(children.keys().cloned().collect()),
            Node::File(_) => Err(VfsError::NotADirectory(path.to_string())),
        }
    }

    pub fn remove_file(&mut self, path: &str) -> VfsResult<()> {
        let (children, name) = self.parent_dir_mut(path)?;
        match children.get(&name) {
            Some(Node::File(_)) => {
                children.remove(&name);
                Ok(())
            }
            Some(Node::Directory(_)) => Err(VfsError::IsADirectory(path.to_string())),
            None => Err(VfsError::NotFound(path.to_string())),
        }
    }

    /// Remove an empty directory.
    pub fn remove_dir(&mut self, path: &str) -> VfsResult<()> {
        let (children, name) = self.parent_dir_mut(path)?;
        match children.get(&name) {
            Some(Node::Directory(entries)) if entries.is_empty() => {
                children.remove(&name);
                Ok(())
            }
            Some(Node::Directory(_)) => Err(VfsError::DirectoryNotEmpty(path.to_string())),
            Some(Node::File(_)) => Err(VfsError::NotADirectory(path.to_string())),
            None => Err(VfsError::NotFound(path.to_string())),
        }
    }

    /// Move a file or directory. An existing file at `to` is replaced, as is
    /// an empty directory when moving a directory.
    pub fn rename(&mut self, from: &str, to: &str) -> VfsResult<()> {
        let from = normalize(from)?;
        let to = normalize(to)?;
        if from == "/" || to == "/" {
            return Err(VfsError::InvalidPath(from));
        }
        let moving_dir = self.stat(&from)?.is_directory;
        if from == to {
            return Ok(());
        }
        if is_within(&to, &from) {
            return Err(VfsError::InvalidPath(to));
        }

        let to_parent = parent(&to).unwrap_or("/");
        if !self.stat(to_parent)?.is_directory {
            return Err(VfsError::NotADirectory(to));
        }
        if let Ok(dest) = self.node(&to) {
            match (dest, moving_dir) {
                (Node::Directory(entries), true) if !entries.is_empty() => {
                    return Err(VfsError::DirectoryNotEmpty(to));
                }
                (Node::Directory(_), false) => return Err(VfsError::IsADirectory(to)),
                (Node::File(_), true) => return Err(VfsError::NotADirectory(to)),
                _ => {}
            }
        }

        let node = {
            let (children, name) = self.parent_dir_mut(&from)?;
            children
                .remove(&name)
                .ok_or_else(|| VfsError::NotFound(from.clone()))?
        };
        let (children, name) = self.parent_dir_mut(&to)?;
        children.insert(name, node);
        Ok(())
    }

    fn node(&self, path: &str) -> VfsResult<&Node> {
        let parts = components(path)?;
        let mut node = &self.root;
        for part in parts {
            node = match node {
                Node::Directory(children) => children
                    .get(part)
                    .ok_or_else(|| VfsError::NotFound(path.to_string()))?,
                Node::File(_) => return Err(VfsError::NotADirectory(path.to_string())),
            };
        }
        Ok(node)
    }

    fn file(&self, path: &str) -> VfsResult<&FileContent> {
        match self.node(path)? {
            Node::File(content) => Ok(content),
            Node::Directory(_) => Err(VfsError::IsADirectory(path.to_string())),
        }
    }

    fn file_mut(&mut self, path: &str) -> VfsResult<&mut FileContent> {
        let (children, name) = self.parent_dir_mut(path)?;
        match children.get_mut(&name) {
            Some(Node::File(content)) => Ok(content),
            Some(Node::Directory(_)) => Err(VfsError::IsADirectory(path.to_string())),
            None => Err(VfsError::NotFound(path.to_string())),
        }
    }

    /// Resolve the directory that would hold `path`, plus the final name.
    fn parent_dir_mut(&mut self, path: &str) -> VfsResult<(&mut BTreeMap<String, Node>, String)> {
        let parts = components(path)?;
        let Some((name, ancestors)) = parts.split_last() else {
            return Err(VfsError::InvalidPath(path.to_string()));
        };

        let mut node = &mut self.root;
        for part in ancestors {
            node = match node {
                Node::Directory(children) => children
                    .get_mut(*part)
                    .ok_or_else(|| VfsError::NotFound(path.to_string()))?,
                Node::File(_) => return Err(VfsError::NotADirectory(path.to_string())),
            };
        }

        match node {
            Node::Directory(children) => Ok((children, name.to_string())),
            Node::File(_) => Err(VfsError::NotADirectory(path.to_string())),
        }
    }
}

/// End offset of a write of `len` bytes at `offset`, within the size cap.
fn checked_end(path: &str, offset: u64, len: usize) -> VfsResult<usize> {
    offset
        .checked_add(len as u64)
        .filter(|end| *end <= MAX_FILE_BYTES)
        .and_then(|end| usize::try_from(end).ok())
        .ok_or_else(|| VfsError::FileTooLarge(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mkdir_recursive_is_idempotent() {
        let mut fs = VirtualFs::new();
        fs.mkdir_recursive("/a/b/c").unwrap();
        fs.mkdir_recursive("/a/b/c").unwrap();
        fs.mkdir_recursive("/a").unwrap();

        assert!(fs.stat("/a/b").unwrap().is_directory);
        assert_eq!(fs.list_children("/a").unwrap(), vec!["b"]);
    }

    #[test]
    fn test_mkdir_through_file_fails() {
        let mut fs = VirtualFs::new();
        fs.write_file("/f", b"x", WriteMode::Overwrite).unwrap();
        assert_eq!(
            fs.mkdir_recursive("/f/sub"),
            Err(VfsError::NotADirectory("/f/sub".into()))
        );
        assert_eq!(
            fs.mkdir_recursive("/f"),
            Err(VfsError::NotADirectory("/f".into()))
        );
    }

    #[test]
    fn test_write_requires_parent() {
        let mut fs = VirtualFs::new();
        let err = fs
            .write_file("/missing/file.txt", b"data", WriteMode::Overwrite)
            .unwrap_err();
        assert_eq!(err, VfsError::NotFound("/missing/file.txt".into()));
    }

    #[test]
    fn test_append_and_overwrite() {
        let mut fs = VirtualFs::new();
        fs.write_file("/log", b"one", WriteMode::Append).unwrap();
        fs.write_file("/log", b" two", WriteMode::Append).unwrap();
        assert_eq!(fs.read_file_text("/log").unwrap(), "one two");

        fs.write_file("/log", b"three", WriteMode::Overwrite).unwrap();
        assert_eq!(&fs.read_file("/log").unwrap()[..], b"three");
    }

    #[test]
    fn test_read_directory_as_file() {
        let mut fs = VirtualFs::new();
        fs.mkdir_recursive("/dir").unwrap();
        assert_eq!(
            fs.read_file("/dir"),
            Err(VfsError::IsADirectory("/dir".into()))
        );
        assert_eq!(
            fs.write_file("/dir", b"x", WriteMode::Overwrite),
            Err(VfsError::IsADirectory("/dir".into()))
        );
    }

    #[test]
    fn test_read_file_text_rejects_invalid_utf8() {
        let mut fs = VirtualFs::new();
        fs.write_file("/bin", &[0xff, 0xfe], WriteMode::Overwrite)
            .unwrap();
        assert_eq!(
            fs.read_file_text("/bin"),
            Err(VfsError::InvalidData("/bin".into()))
        );
    }

    #[test]
    fn test_clone_isolates_mutations() {
        let blob = Bytes::from_static(b"template");
        let mut template = VirtualFs::new();
        template.insert_shared("/t", blob.clone()).unwrap();

        let mut run = template.clone();
        run.write_file("/t", b"!", WriteMode::Append).unwrap();
        run.write_file("/new", b"n", WriteMode::Overwrite).unwrap();

        assert_eq!(&template.read_file("/t").unwrap()[..], b"template");
        assert!(!template.exists("/new"));
        assert_eq!(&run.read_file("/t").unwrap()[..], b"template!");
    }

    #[test]
    fn test_write_at_zero_extends() {
        let mut fs = VirtualFs::new();
        fs.write_file("/f", b"ab", WriteMode::Overwrite).unwrap();
        fs.write_at("/f", 4, b"z").unwrap();
        assert_eq!(&fs.read_file("/f").unwrap()[..], b"ab\0\0z");

        let mut buf = [0u8; 8];
        assert_eq!(fs.read_at("/f", 3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"\0z");
        assert_eq!(fs.read_at("/f", 10, &mut buf).unwrap(), 0);

        fs.truncate("/f", 1).unwrap();
        assert_eq!(fs.stat("/f").unwrap().len, 1);
    }

    #[test]
    fn test_oversized_writes_are_rejected() {
        let mut fs = VirtualFs::new();
        fs.write_file("/f", b"ab", WriteMode::Overwrite).unwrap();

        let too_large = Err(VfsError::FileTooLarge("/f".into()));
        assert_eq!(fs.write_at("/f", u64::MAX, b"x"), too_large);
        assert_eq!(fs.write_at("/f", MAX_FILE_BYTES, b"x"), too_large);
        assert_eq!(fs.truncate("/f", u64::MAX), too_large);
        assert_eq!(fs.truncate("/f", MAX_FILE_BYTES + 1), too_large);

        assert_eq!(&fs.read_file("/f").unwrap()[..], b"ab");
    }

    #[test]
    fn test_remove_and_rename() {
        let mut fs = VirtualFs::new();
        fs.mkdir_recursive("/a/b").unwrap();
        fs.write_file("/a/b/f", b"1", WriteMode::Overwrite).unwrap();

        assert_eq!(
            fs.remove_dir("/a/b"),
            Err(VfsError::DirectoryNotEmpty("/a/b".into()))
        );

        fs.rename("/a/b/f", "/a/g").unwrap();
        assert!(!fs.exists("/a/b/f"));
        assert_eq!(fs.read_file_text("/a/g").unwrap(), "1");

        fs.remove_dir("/a/b").unwrap();
        fs.remove_file("/a/g").unwrap();
        assert!(fs.list_children("/a").unwrap().is_empty());
        assert_eq!(
            fs.remove_file("/a/g"),
            Err(VfsError::NotFound("/a/g".into()))
        );
    }

    #[test]
    fn test_rename_directory_into_itself_fails() {
        let mut fs = VirtualFs::new();
        fs.mkdir_recursive("/a/b").unwrap();
        assert_eq!(
            fs.rename("/a", "/a/b/c"),
            Err(VfsError::InvalidPath("/a/b/c".into()))
        );
    }
}
