use bytes::Bytes;
use std::collections::BTreeMap;

/// File bytes: a zero-copy view into a loaded snapshot blob until the first
/// mutation, owned afterwards.
#[derive(Debug, Clone)]
pub(crate) enum FileContent {
    Shared(Bytes),
    Owned(Vec<u8>),
}

impl FileContent {
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            FileContent::Shared(bytes) => bytes,
            FileContent::Owned(vec) => vec,
        }
    }

    pub(crate) fn to_bytes(&self) -> Bytes {
        match self {
            FileContent::Shared(bytes) => bytes.clone(),
            FileContent::Owned(vec) => Bytes::copy_from_slice(vec),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Detach from the shared blob so the content can be edited in place.
    pub(crate) fn make_mut(&mut self) -> &mut Vec<u8> {
        if let FileContent::Shared(bytes) = self {
            let owned = bytes.to_vec();
            *self = FileContent::Owned(owned);
        }
        match self {
            FileContent::Owned(vec) => vec,
            FileContent::Shared(_) => unreachable!("content was just made owned"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Directory(BTreeMap<String, Node>),
    File(FileContent),
}

impl Node {
    pub(crate) fn empty_dir() -> Self {
        Node::Directory(BTreeMap::new())
    }

    pub(crate) fn is_dir(&self) -> bool {
        matches!(self, Node::Directory(_))
    }
}
