//! Volume geometry.
//!
//! Every constant here is part of the on-disk contract: changing any of
//! them invalidates existing volume images.

/// Block size in bytes, the device's transfer unit.
pub const BSIZE: usize = 2048;

/// Maximum number of named objects on a volume.
pub const NINODES: usize = 48;

/// Serialized inodes per metadata block.
pub const IPB: usize = 16;

/// Number of blocks holding the inode table.
pub const NIBLOCKS: usize = NINODES / IPB;

/// Maximum name length, terminator included.
pub const NAMELEN: usize = 32;

/// Identifies a formatted volume.
pub const FSMAGIC: u32 = 1234;

/// Smallest device a volume fits on, in bytes.
pub const MINDEVICE: u32 = 460 * 1024;

/// Largest supported device, in bytes.
pub const MAXDEVICE: u32 = 600 * 1024;

/// Block slots per inode: one direct plus four indirect.
pub const MAXBLOCKS: usize = 5;

/// Maximum file size in bytes.
pub const MAXFILE: usize = MAXBLOCKS * BSIZE;

/// Data-block count of the largest volume; sizes the block bitmap.
pub const MAXDATABLOCKS: usize = MAXDEVICE as usize / BSIZE - 1 - NIBLOCKS;
