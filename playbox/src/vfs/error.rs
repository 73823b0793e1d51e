use playbox_shared::errors::PlayboxError;

/// Filesystem errors, each carrying the offending path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VfsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("file exists: {0}")]
    AlreadyExists(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid UTF-8 in {0}")]
    InvalidData(String),

    #[error("file too large: {0}")]
    FileTooLarge(String),
}

pub type VfsResult<T> = Result<T, VfsError>;

impl From<VfsError> for PlayboxError {
    fn from(err: VfsError) -> Self {
        PlayboxError::Vfs(err.to_string())
    }
}
