// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the flashvfs adapter layer

use libc::c_int;

/// Adapter-boundary error type.
///
/// The vocabulary is fixed: every failure an entry point can report maps onto
/// one of these variants, and `errno` gives host bindings the numeric code.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("volume not mounted")]
    NotMounted,
    #[error("read-only volume")]
    ReadOnly,
    #[error("no space left")]
    NoSpace,
    #[error("io error")]
    Io,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("directory not empty")]
    NotEmpty,
    #[error("not implemented")]
    NotImplemented,
    #[error("unsupported")]
    Unsupported,
    #[error("out of memory")]
    NoMemory,
    #[error("too many levels of indirection")]
    TooManyLinks,
}

impl FsError {
    /// POSIX errno value for host bindings.
    pub fn errno(self) -> c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            // An unmounted volume has no namespace to resolve against.
            FsError::NotMounted => libc::ENOENT,
            FsError::ReadOnly => libc::EROFS,
            FsError::NoSpace => libc::ENOSPC,
            FsError::Io => libc::EIO,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::NotImplemented => libc::ENOSYS,
            FsError::Unsupported => libc::ENOTSUP,
            FsError::NoMemory => libc::ENOMEM,
            FsError::TooManyLinks => libc::ELOOP,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_covers_the_fixed_vocabulary() {
        assert_eq!(FsError::NotFound.errno(), libc::ENOENT);
        assert_eq!(FsError::NotMounted.errno(), libc::ENOENT);
        assert_eq!(FsError::AlreadyExists.errno(), libc::EEXIST);
        assert_eq!(FsError::ReadOnly.errno(), libc::EROFS);
        assert_eq!(FsError::NoSpace.errno(), libc::ENOSPC);
        assert_eq!(FsError::NotEmpty.errno(), libc::ENOTEMPTY);
        assert_eq!(FsError::NotImplemented.errno(), libc::ENOSYS);
        assert_eq!(FsError::Unsupported.errno(), libc::ENOTSUP);
        assert_eq!(FsError::TooManyLinks.errno(), libc::ELOOP);
    }
}
