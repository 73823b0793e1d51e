use crate::vfs::VfsError;

/// WASI preview 1 error numbers used by the binding layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[repr(u16)]
pub enum Errno {
    #[error("bad file descriptor")]
    Badf = 8,
    #[error("file exists")]
    Exist = 20,
    #[error("bad address")]
    Fault = 21,
    #[error("file too large")]
    Fbig = 22,
    #[error("illegal byte sequence")]
    Ilseq = 25,
    #[error("invalid argument")]
    Inval = 28,
    #[error("is a directory")]
    Isdir = 31,
    #[error("too many open files")]
    Mfile = 33,
    #[error("no such file or directory")]
    Noent = 44,
    #[error("not a directory")]
    Notdir = 54,
    #[error("directory not empty")]
    Notempty = 55,
    #[error("not supported")]
    Notsup = 58,
    #[error("invalid seek")]
    Spipe = 70,
    #[error("capabilities insufficient")]
    Notcapable = 76,
}

impl Errno {
    /// The numeric value handed back to the module.
    pub fn raw(self) -> i32 {
        self as u16 as i32
    }
}

impl From<VfsError> for Errno {
    fn from(err: VfsError) -> Self {
        match err {
            VfsError::NotFound(_) => Errno::Noent,
            VfsError::IsADirectory(_) => Errno::Isdir,
            VfsError::NotADirectory(_) => Errno::Notdir,
            VfsError::AlreadyExists(_) => Errno::Exist,
            VfsError::DirectoryNotEmpty(_) => Errno::Notempty,
            VfsError::InvalidPath(_) => Errno::Inval,
            VfsError::InvalidData(_) => Errno::Ilseq,
            VfsError::FileTooLarge(_) => Errno::Fbig,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_values_match_wasi() {
        assert_eq!(Errno::Badf.raw(), 8);
        assert_eq!(Errno::Noent.raw(), 44);
        assert_eq!(Errno::Notcapable.raw(), 76);
    }

    #[test]
    fn test_vfs_errors_map_to_errno() {
        assert_eq!(Errno::from(VfsError::NotFound("/x".into())), Errno::Noent);
        assert_eq!(Errno::from(VfsError::IsADirectory("/x".into())), Errno::Isdir);
        assert_eq!(
            Errno::from(VfsError::DirectoryNotEmpty("/x".into())),
            Errno::Notempty
        );
        assert_eq!(Errno::from(VfsError::FileTooLarge("/x".into())), Errno::Fbig);
        assert_eq!(Errno::Fbig.raw(), 22);
    }
}
