//! On-disk superblock.

use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes};

use crate::error::FsError;
use crate::param::{BSIZE, FSMAGIC, MAXDATABLOCKS, NIBLOCKS, NINODES};

type Le32 = U32<LittleEndian>;

/// Bytes of the inode allocation map.
const IMAP_BYTES: usize = NINODES / 8;

/// Bytes of the data-block allocation map, sized for the largest volume.
const BMAP_BYTES: usize = MAXDATABLOCKS / 8;

const SB_PAD: usize = BSIZE - 6 * 4 - IMAP_BYTES - BMAP_BYTES;

/// Disk layout:
/// [ superblock | inode blocks | data blocks ]
///
/// The superblock is block 0. It describes the volume geometry and carries
/// both allocation bitmaps; all integers are little-endian on disk and the
/// record fills exactly one block.
#[repr(C)]
#[derive(Clone, AsBytes, FromBytes)]
pub struct Superblock {
    /// Must be [`FSMAGIC`].
    magic: Le32,
    /// Number of inodes.
    ninodes: Le32,
    /// Number of blocks holding the inode table.
    niblocks: Le32,
    /// Number of data blocks.
    ndata: Le32,
    /// Physical index of the first data block.
    first_data: Le32,
    /// Total device size in bytes.
    device_size: Le32,
    /// Bit `i` set means inode `i` is allocated. LSB-first per byte.
    pub(super) inode_map: [u8; IMAP_BYTES],
    /// Bit `j` set means data block `j` is allocated. LSB-first per byte.
    pub(super) block_map: [u8; BMAP_BYTES],
    _pad: [u8; SB_PAD],
}

const_assert_eq!(core::mem::size_of::<Superblock>(), BSIZE);

impl Superblock {
    /// Computes the geometry for a `device_size`-byte device with empty
    /// allocation maps. The caller validates the size bounds.
    pub fn new(device_size: u32) -> Superblock {
        let total_blocks = device_size / BSIZE as u32;
        Superblock {
            magic: FSMAGIC.into(),
            ninodes: (NINODES as u32).into(),
            niblocks: (NIBLOCKS as u32).into(),
            ndata: (total_blocks - 1 - NIBLOCKS as u32).into(),
            first_data: (1 + NIBLOCKS as u32).into(),
            device_size: device_size.into(),
            inode_map: [0; IMAP_BYTES],
            block_map: [0; BMAP_BYTES],
            _pad: [0; SB_PAD],
        }
    }

    /// Checks that this is a formatted volume this build can mount: the
    /// magic number matches and the counts agree with the stated device
    /// size.
    pub fn validate(&self) -> Result<(), FsError> {
        if self.magic.get() != FSMAGIC {
            return Err(FsError::BadVolume);
        }
        let total_blocks = self.device_size.get() / BSIZE as u32;
        if total_blocks <= 1 + NIBLOCKS as u32 {
            return Err(FsError::BadVolume);
        }
        if self.ninodes.get() != NINODES as u32
            || self.niblocks.get() != NIBLOCKS as u32
            || self.first_data.get() != 1 + NIBLOCKS as u32
            || self.ndata.get() != total_blocks - 1 - NIBLOCKS as u32
            || self.ndata.get() as usize > MAXDATABLOCKS
        {
            return Err(FsError::BadVolume);
        }
        Ok(())
    }

    /// Number of data blocks on the volume.
    pub fn ndata(&self) -> u32 {
        self.ndata.get()
    }

    /// Physical index of the first data block.
    pub fn first_data(&self) -> u32 {
        self.first_data.get()
    }

    /// Total device size in bytes.
    pub fn device_size(&self) -> u32 {
        self.device_size.get()
    }

    /// Physical block carrying data-block index `idx`.
    pub fn dblock(&self, idx: i32) -> u32 {
        debug_assert!(idx >= 0 && (idx as u32) < self.ndata.get());
        self.first_data.get() + idx as u32
    }
}
