//! Error reporting.
//!
//! Every public operation fails with an [`FsError`]. Variants fall into two
//! caller-visible categories: domain failures the caller can recover from
//! with different arguments, and state, type, or capacity errors. The
//! stable integer contract over those categories is [`FsError::code`].

use std::io;

use thiserror::Error;

/// Failure of a public file-system operation.
#[derive(Debug, Error)]
pub enum FsError {
    /// A volume is already mounted on this handle.
    #[error("file system is already mounted")]
    AlreadyMounted,

    /// The operation needs a mounted volume.
    #[error("file system is not mounted")]
    NotMounted,

    /// The requested device size is outside the supported range.
    #[error("device size {0} is out of range")]
    DeviceSize(u32),

    /// The superblock or inode table read from disk is not a volume this
    /// build understands.
    #[error("not a valid volume image")]
    BadVolume,

    /// The name is empty, too long, or contains a NUL byte.
    #[error("invalid name")]
    BadName,

    /// No inode carries that name.
    #[error("no such name")]
    NotFound,

    /// An inode already carries that name.
    #[error("name already in use")]
    AlreadyExists,

    /// The inode table is full.
    #[error("out of inodes")]
    OutOfInodes,

    /// No free data block is left on the volume.
    #[error("out of data blocks")]
    OutOfBlocks,

    /// The descriptor does not name an allocated inode.
    #[error("invalid descriptor {0}")]
    BadDescriptor(usize),

    /// The file is not open.
    #[error("file is not open")]
    NotOpen,

    /// The file must be closed for this operation.
    #[error("file is open")]
    Busy,

    /// The session's open mode conflicts with the requested operation.
    #[error("file is open in a conflicting mode")]
    OpenConflict,

    /// The name resolves to a symbolic link where a regular file is needed.
    #[error("not a regular file")]
    NotRegular,

    /// The name resolves to a regular file where a symbolic link is needed.
    #[error("not a symbolic link")]
    NotSymLink,

    /// The file carries no integrity checksum.
    #[error("file has no integrity checksum")]
    NoIntegrity,

    /// The file already carries an integrity checksum.
    #[error("file already has an integrity checksum")]
    HasIntegrity,

    /// The contents do not match the stored integrity checksum.
    #[error("contents corrupted: integrity check failed")]
    Corrupted,

    /// The seek pointer would leave the file's bounds.
    #[error("seek position out of range")]
    SeekRange,

    /// The block device failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FsError {
    /// Stable integer code: -1 for domain failures (a named operand does
    /// not exist or a per-file precondition fails), -2 for state, type, or
    /// capacity errors. One code per error kind regardless of call site.
    pub fn code(&self) -> i32 {
        match self {
            FsError::AlreadyMounted
            | FsError::DeviceSize(_)
            | FsError::NotFound
            | FsError::AlreadyExists
            | FsError::BadDescriptor(_)
            | FsError::NotOpen
            | FsError::Corrupted
            | FsError::SeekRange => -1,
            FsError::NotMounted
            | FsError::BadVolume
            | FsError::BadName
            | FsError::OutOfInodes
            | FsError::OutOfBlocks
            | FsError::Busy
            | FsError::OpenConflict
            | FsError::NotRegular
            | FsError::NotSymLink
            | FsError::NoIntegrity
            | FsError::HasIntegrity
            | FsError::Io(_) => -2,
        }
    }
}
