//! A simulated single-volume file system over a fixed-size block device.
//!
//! The volume holds a flat namespace of at most 48 named objects: regular
//! files up to five blocks long, and symbolic links between names. Files
//! can carry a CRC32 integrity seal that is verified when they are opened
//! through the integrity calls. All metadata persists across mount cycles
//! in a fixed little-endian on-disk layout:
//!
//! ```text
//! [ superblock | inode blocks | data blocks ]
//! ```
//!
//! A volume lives on any device implementing [`BlockIo`]; [`FileDisk`]
//! backs one with a regular file, [`MemDisk`] with memory. [`FlatFs`] is
//! the volume handle carrying the public operations.
//!
//! ```no_run
//! use flatfs::{FileDisk, FlatFs, Whence};
//!
//! # fn main() -> Result<(), flatfs::FsError> {
//! let disk = FileDisk::create("disk.img", 300)?;
//! let mut fs = FlatFs::new(disk);
//! fs.mkfs(300 * 2048)?;
//! fs.mount()?;
//!
//! let fd = fs.create("/hello.txt")?;
//! fs.open("/hello.txt")?;
//! fs.write(fd, b"hello")?;
//! fs.seek(fd, Whence::Begin)?;
//! let mut buf = [0; 5];
//! fs.read(fd, &mut buf)?;
//! fs.close(fd)?;
//! fs.unmount()?;
//! # Ok(())
//! # }
//! ```

pub mod bio;
pub mod bitmap;
mod error;
pub mod fs;
pub mod param;

pub use crate::bio::{Block, BlockIo, FileDisk, MemDisk, ZERO_BLOCK};
pub use crate::error::FsError;
pub use crate::fs::{FlatFs, InodeType, Stat, Whence};
