//! Inode records and session state.
//!
//! An inode describes one named object: a regular file or a symbolic link.
//! The on-disk table lives in the blocks after the superblock, [`IPB`]
//! records per block in ascending index order, and the whole table is held
//! in memory while the volume is mounted.
//!
//! The on-disk record ([`Dinode`]) and the in-memory record ([`Inode`])
//! are separate types: the wire form has fixed little-endian fields and
//! padding, the memory form has native integers and an `Option` for the
//! integrity checksum. Per-inode session state ([`Session`]) is runtime
//! only and never persisted.

use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, I32, U32};
use zerocopy::{AsBytes, FromBytes};

use crate::error::FsError;
use crate::param::{BSIZE, IPB, MAXBLOCKS, NAMELEN};

type Le32 = I32<LittleEndian>;
type Leu32 = U32<LittleEndian>;

/// Slot value meaning "no data block wired".
pub const NO_BLOCK: i32 = -1;

/// Serialized inode size in bytes.
pub const INODE_SIZE: usize = core::mem::size_of::<Dinode>();

const INODE_PAD: usize = BSIZE / IPB - 10 * 4 - NAMELEN;

const T_REGULAR: i32 = 0;
const T_SYMLINK: i32 = 1;

/// What an inode names. The zero encoding is `Regular`, so a freed
/// (zeroed) record decodes as an empty regular file.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InodeType {
    Regular,
    SymLink,
}

/// On-disk inode record. Field order and widths are fixed, integers are
/// little-endian, and [`IPB`] records pack one metadata block exactly.
#[repr(C)]
#[derive(AsBytes, FromBytes)]
pub struct Dinode {
    typ: Le32,
    /// NUL-terminated name, zero-padded.
    name: [u8; NAMELEN],
    /// Target inode id, meaningful for symbolic links only.
    target: Le32,
    /// File size in bytes, regular files only.
    size: Le32,
    /// Block slots: the direct block first, then the four indirect slots.
    addrs: [Le32; MAXBLOCKS],
    includes_integrity: Le32,
    /// CRC32 of the contents at the last sealing point.
    integrity: Leu32,
    _pad: [u8; INODE_PAD],
}

const_assert_eq!(INODE_SIZE, BSIZE / IPB);
const_assert_eq!(INODE_SIZE * IPB, BSIZE);

impl Dinode {
    /// Packs `ip` into its wire form.
    pub fn encode(ip: &Inode) -> Dinode {
        let typ = match ip.typ {
            InodeType::Regular => T_REGULAR,
            InodeType::SymLink => T_SYMLINK,
        };
        Dinode {
            typ: typ.into(),
            name: ip.name,
            target: ip.target.into(),
            size: (ip.size as i32).into(),
            addrs: ip.addrs.map(Into::into),
            includes_integrity: (ip.integrity.is_some() as i32).into(),
            integrity: ip.integrity.unwrap_or(0).into(),
            _pad: [0; INODE_PAD],
        }
    }

    /// Unpacks the wire form. Fails on a type tag this build does not
    /// know, which marks the whole table as unreadable.
    pub fn decode(&self) -> Result<Inode, FsError> {
        let typ = match self.typ.get() {
            T_REGULAR => InodeType::Regular,
            T_SYMLINK => InodeType::SymLink,
            _ => return Err(FsError::BadVolume),
        };
        Ok(Inode {
            typ,
            name: self.name,
            target: self.target.get(),
            size: self.size.get() as u32,
            addrs: self.addrs.map(|a| a.get()),
            integrity: if self.includes_integrity.get() != 0 {
                Some(self.integrity.get())
            } else {
                None
            },
        })
    }
}

/// In-memory inode. Every table slot holds one whether or not it is
/// allocated; releasing an inode writes back the zeroed record, which is
/// what keeps name resolution from matching freed slots.
#[derive(Clone)]
pub struct Inode {
    pub typ: InodeType,
    name: [u8; NAMELEN],
    pub target: i32,
    pub size: u32,
    pub addrs: [i32; MAXBLOCKS],
    /// CRC32 of the contents at the last sealing point, if sealed.
    pub integrity: Option<u32>,
}

impl Default for Inode {
    fn default() -> Self {
        Inode {
            typ: InodeType::Regular,
            name: [0; NAMELEN],
            target: 0,
            size: 0,
            addrs: [0; MAXBLOCKS],
            integrity: None,
        }
    }
}

impl Inode {
    /// Stores `name` NUL-padded. The caller has validated the length.
    pub fn set_name(&mut self, name: &str) {
        debug_assert!(!name.is_empty() && name.len() < NAMELEN);
        self.name = [0; NAMELEN];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
    }

    /// The stored name, up to its terminator.
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAMELEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    /// Exact match against a query name. Queries that cannot be stored
    /// (empty or overlong) match nothing, so a zeroed record is inert.
    pub fn name_is(&self, q: &str) -> bool {
        let q = q.as_bytes();
        !q.is_empty()
            && q.len() < NAMELEN
            && &self.name[..q.len()] == q
            && self.name[q.len()] == 0
    }

    /// Bytes the wired slots can hold. For a regular file the slots fill
    /// in order, so this is also the limit `size` may reach.
    pub fn capacity(&self) -> u32 {
        self.addrs.iter().filter(|&&a| a != NO_BLOCK).count() as u32 * BSIZE as u32
    }
}

/// Session open mode. A descriptor is plain-open, integrity-open, or
/// closed; the two open modes exclude each other by construction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpenMode {
    Closed,
    Plain,
    Integrity,
}

/// Per-inode runtime state: open mode and seek pointer. Lives only in the
/// mounted handle; unmount and inode release clear it.
#[derive(Clone, Copy)]
pub struct Session {
    pub mode: OpenMode,
    pub seek: u32,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            mode: OpenMode::Closed,
            seek: 0,
        }
    }
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.mode != OpenMode::Closed
    }
}
