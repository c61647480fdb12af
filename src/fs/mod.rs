//! Flat-namespace file system over a block device.
//!
//! Layers, bottom up:
//!   + Bitmaps: allocators for inodes and raw data blocks.
//!   + Inodes: a fixed table of records, one per named object.
//!   + Names: a single flat namespace, resolved by linear scan.
//!   + Links: symbolic indirection between names, star-shaped.
//!   + Integrity: CRC32 sealing of file contents, verified at open.
//!
//! All persistent state lives in the superblock (block 0) and the inode
//! table (the blocks after it); both are held in memory while mounted and
//! flushed on unmount. A crash before unmount loses every change made
//! since mount.
//!
//! Descriptors are inode indices. There is no separate descriptor table,
//! so a descriptor is stable across close and reopen, and any value in
//! `[0, NINODES)` is a candidate that must be checked against the
//! allocation bitmap.

mod inode;
mod superblock;

pub use self::inode::{Inode, InodeType, NO_BLOCK};
pub use self::superblock::Superblock;

use std::cmp;

use array_macro::array;
use arrayvec::ArrayVec;
use crc::{Crc, CRC_32_ISO_HDLC};
use log::{debug, warn};
use zerocopy::{AsBytes, FromBytes};

use self::inode::{Dinode, OpenMode, Session, INODE_SIZE};
use crate::bio::{Block, BlockIo, ZERO_BLOCK};
use crate::bitmap;
use crate::error::FsError;
use crate::param::{
    BSIZE, IPB, MAXBLOCKS, MAXDEVICE, MAXFILE, MINDEVICE, NAMELEN, NIBLOCKS, NINODES,
};

/// Checksum function used to seal file contents.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Seek origin for [`FlatFs::seek`].
#[derive(Clone, Copy, Debug)]
pub enum Whence {
    /// Move relative to the current position; fails when the result
    /// leaves `[0, size]`.
    Cur(i64),
    /// Jump to the end of the file.
    End,
    /// Jump to the beginning of the file.
    Begin,
}

/// A named object's metadata, reported after link dereference.
#[derive(Clone, Copy, Debug)]
pub struct Stat {
    pub typ: InodeType,
    pub size: u32,
    pub has_integrity: bool,
}

/// A single-volume file system bound to one block device.
///
/// The handle owns the device together with the in-memory copies of the
/// superblock, the inode table, and the per-inode session table. `mount`
/// and `unmount` are the lifecycle boundaries; every other operation
/// requires a mounted volume. The API is strictly single-session, which
/// `&mut self` enforces at compile time.
pub struct FlatFs<D: BlockIo> {
    dev: D,
    sb: Superblock,
    inodes: [Inode; NINODES],
    sessions: [Session; NINODES],
    mounted: bool,
}

impl<D: BlockIo> FlatFs<D> {
    /// Binds a handle to `dev`. Nothing is read until `mount`.
    pub fn new(dev: D) -> Self {
        FlatFs {
            dev,
            sb: Superblock::new_zeroed(),
            inodes: array![Inode::default(); NINODES],
            sessions: [Session::default(); NINODES],
            mounted: false,
        }
    }

    /// Whether a volume is currently mounted on this handle.
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Consumes the handle and returns the device.
    pub fn into_inner(self) -> D {
        self.dev
    }

    /// Formats the device as an empty volume of `device_size` bytes:
    /// fresh superblock, zeroed inode table, zeroed data blocks. The
    /// mounted state is not changed.
    pub fn mkfs(&mut self, device_size: u32) -> Result<(), FsError> {
        if device_size < MINDEVICE || device_size > MAXDEVICE {
            return Err(FsError::DeviceSize(device_size));
        }
        self.sb = Superblock::new(device_size);
        self.inodes = array![Inode::default(); NINODES];
        self.write_metadata()?;
        // Zero-fill the data region so reformatting a used device is
        // deterministic.
        for idx in 0..self.sb.ndata() {
            self.dev
                .write_block(self.sb.first_data() + idx, &ZERO_BLOCK)?;
        }
        debug!(
            "mkfs: {} bytes, {} data blocks",
            device_size,
            self.sb.ndata()
        );
        Ok(())
    }

    /// Reads the superblock and inode table into memory and opens the
    /// session. Fails if a volume is already mounted on this handle or the
    /// device does not hold a valid volume.
    pub fn mount(&mut self) -> Result<(), FsError> {
        if self.mounted {
            return Err(FsError::AlreadyMounted);
        }
        self.read_metadata()?;
        self.sb.validate()?;
        self.validate_tables()?;
        self.mounted = true;
        debug!("mount: {} bytes", self.sb.device_size());
        Ok(())
    }

    /// Flushes the metadata back to disk, drops all session state, and
    /// closes the session.
    pub fn unmount(&mut self) -> Result<(), FsError> {
        self.check_mounted()?;
        self.write_metadata()?;
        self.sessions = [Session::default(); NINODES];
        self.mounted = false;
        debug!("unmount");
        Ok(())
    }

    /// Creates an empty regular file and returns its inode id, which is
    /// also the descriptor the open calls hand out.
    ///
    /// Every regular file owns its direct block from birth, even at size
    /// zero; a file can therefore only be created while a data block is
    /// available.
    pub fn create(&mut self, name: &str) -> Result<usize, FsError> {
        self.check_mounted()?;
        validate_name(name)?;
        if self.namei(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let id = self.ialloc()?;
        let direct = match self.balloc() {
            Ok(idx) => idx,
            Err(e) => {
                // The inode must not leak when the block allocation fails.
                self.ifree(id);
                return Err(e);
            }
        };
        let ip = &mut self.inodes[id];
        ip.typ = InodeType::Regular;
        ip.set_name(name);
        ip.target = 0;
        ip.size = 0;
        ip.addrs = [NO_BLOCK; MAXBLOCKS];
        ip.addrs[0] = direct;
        ip.integrity = None;
        self.sessions[id] = Session::default();
        Ok(id)
    }

    /// Removes the regular file `name`: returns its data blocks to the
    /// allocator, removes every symbolic link pointing at it, and frees
    /// the inode last.
    pub fn remove(&mut self, name: &str) -> Result<(), FsError> {
        self.check_mounted()?;
        let id = self.lookup(name)?;
        if self.inodes[id].typ != InodeType::Regular {
            return Err(FsError::NotRegular);
        }
        for slot in 0..MAXBLOCKS {
            let idx = self.inodes[id].addrs[slot];
            if idx != NO_BLOCK {
                self.bfree(idx)?;
            }
        }
        self.remove_links_to(id);
        self.ifree(id);
        Ok(())
    }

    /// Opens `name` and returns its descriptor with the seek pointer at
    /// zero. Symbolic links open their target. Re-opening an open file
    /// just resets the seek pointer, but a session opened with integrity
    /// must go through `close_integrity` first.
    pub fn open(&mut self, name: &str) -> Result<usize, FsError> {
        self.check_mounted()?;
        let id = self.deref_link(self.lookup(name)?);
        if self.sessions[id].mode == OpenMode::Integrity {
            return Err(FsError::OpenConflict);
        }
        self.sessions[id] = Session {
            mode: OpenMode::Plain,
            seek: 0,
        };
        Ok(id)
    }

    /// Closes a descriptor opened without integrity and resets its seek
    /// pointer. Closing an already closed file is a no-op.
    pub fn close(&mut self, fd: usize) -> Result<(), FsError> {
        self.check_mounted()?;
        let id = self.resolve_fd(fd)?;
        if self.sessions[id].mode == OpenMode::Integrity {
            return Err(FsError::OpenConflict);
        }
        self.sessions[id] = Session::default();
        Ok(())
    }

    /// Reads up to `buf.len()` bytes at the descriptor's seek pointer and
    /// advances it. Short counts happen at end of file; reading an empty
    /// file returns zero. The file does not have to be open.
    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> Result<usize, FsError> {
        self.check_mounted()?;
        let id = self.resolve_fd(fd)?;
        let seek = self.sessions[id].seek;
        let n = cmp::min(buf.len(), (self.inodes[id].size - seek) as usize);
        let read = self.read_at(id, seek, &mut buf[..n])?;
        self.sessions[id].seek += read as u32;
        Ok(read)
    }

    /// Writes `buf` at the descriptor's seek pointer, growing the file
    /// block by block up to its slot budget. Requires the file to be open
    /// in either mode.
    ///
    /// Returns the number of bytes written. The count falls short of
    /// `buf.len()` when the file or the device is full; a write whose
    /// first block cannot be allocated returns zero.
    pub fn write(&mut self, fd: usize, buf: &[u8]) -> Result<usize, FsError> {
        self.check_mounted()?;
        let id = self.resolve_fd(fd)?;
        if !self.sessions[id].is_open() {
            return Err(FsError::NotOpen);
        }

        let seek = self.sessions[id].seek;
        let n = cmp::min(buf.len(), MAXFILE - seek as usize);

        // The file is full to its wired capacity and the write starts at
        // the end: the next block must be wired before any byte is copied.
        let ip = &self.inodes[id];
        if n > 0 && ip.size > 0 && seek == ip.size && ip.size == ip.capacity() {
            if self.add_data_block(id).is_err() {
                warn!("write: no free data block, nothing written");
                return Ok(0);
            }
        }

        let mut block = ZERO_BLOCK;
        let mut tot = 0;
        while tot < n {
            let seek = self.sessions[id].seek;
            let idx = self.bmap(id, seek)?;
            let boff = seek as usize % BSIZE;
            let take = cmp::min(n - tot, BSIZE - boff);
            let bno = self.sb.dblock(idx);

            self.dev.read_block(bno, &mut block)?;
            block[boff..boff + take].copy_from_slice(&buf[tot..tot + take]);
            self.dev.write_block(bno, &block)?;

            self.sessions[id].seek += take as u32;
            tot += take;
            // Size advances with every byte written, overwrites included,
            // but never past what the wired slots can hold. Rewriting a
            // sealed file therefore changes its sealed length, which the
            // integrity check is required to catch.
            let ip = &mut self.inodes[id];
            ip.size = cmp::min(ip.size + take as u32, ip.capacity());

            let seek = self.sessions[id].seek;
            let ip = &self.inodes[id];
            if tot < n && seek == ip.size && ip.size == ip.capacity() {
                if self.add_data_block(id).is_err() {
                    warn!("write: device full, short write of {} bytes", tot);
                    return Ok(tot);
                }
            }
        }
        Ok(tot)
    }

    /// Moves the seek pointer of `fd`.
    pub fn seek(&mut self, fd: usize, whence: Whence) -> Result<(), FsError> {
        self.check_mounted()?;
        let id = self.resolve_fd(fd)?;
        let size = self.inodes[id].size;
        let session = &mut self.sessions[id];
        match whence {
            Whence::Cur(off) => {
                let pos = session.seek as i64 + off;
                if pos < 0 || pos > size as i64 {
                    return Err(FsError::SeekRange);
                }
                session.seek = pos as u32;
            }
            Whence::End => session.seek = size,
            Whence::Begin => session.seek = 0,
        }
        Ok(())
    }

    /// Creates symbolic link `link` pointing at the regular file `file`.
    /// Links to links are rejected, which keeps the topology a star and
    /// makes a single dereference hop sufficient everywhere.
    pub fn create_link(&mut self, file: &str, link: &str) -> Result<(), FsError> {
        self.check_mounted()?;
        validate_name(link)?;
        if self.namei(link).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let target = self.lookup(file)?;
        if self.inodes[target].typ != InodeType::Regular {
            return Err(FsError::NotRegular);
        }
        let id = self.ialloc()?;
        let ip = &mut self.inodes[id];
        ip.typ = InodeType::SymLink;
        ip.set_name(link);
        ip.target = target as i32;
        ip.size = 0;
        ip.addrs = [NO_BLOCK; MAXBLOCKS];
        ip.integrity = None;
        self.sessions[id] = Session::default();
        Ok(())
    }

    /// Removes the symbolic link `link`. The target file is untouched.
    pub fn remove_link(&mut self, link: &str) -> Result<(), FsError> {
        self.check_mounted()?;
        let id = self.lookup(link)?;
        if self.inodes[id].typ != InodeType::SymLink {
            return Err(FsError::NotSymLink);
        }
        self.ifree(id);
        Ok(())
    }

    /// Seals `name`: computes the CRC32 of its contents and stores it in
    /// the inode. The file must be closed and not already sealed.
    pub fn include_integrity(&mut self, name: &str) -> Result<(), FsError> {
        self.check_mounted()?;
        let id = self.deref_link(self.lookup(name)?);
        if self.inodes[id].integrity.is_some() {
            return Err(FsError::HasIntegrity);
        }
        if self.sessions[id].is_open() {
            return Err(FsError::Busy);
        }
        let sum = self.checksum(id)?;
        self.inodes[id].integrity = Some(sum);
        Ok(())
    }

    /// Recomputes the CRC32 of `name`'s contents and compares it with the
    /// sealed value. The file must be sealed and closed.
    pub fn check(&mut self, name: &str) -> Result<(), FsError> {
        self.check_mounted()?;
        let id = self.deref_link(self.lookup(name)?);
        let stored = self.inodes[id].integrity.ok_or(FsError::NoIntegrity)?;
        if self.sessions[id].is_open() {
            return Err(FsError::Busy);
        }
        if self.checksum(id)? != stored {
            warn!("check: {} does not match its stored checksum", name);
            return Err(FsError::Corrupted);
        }
        Ok(())
    }

    /// Opens a sealed file after verifying its contents and returns the
    /// descriptor. The session must be closed with `close_integrity`,
    /// which re-seals the file.
    pub fn open_integrity(&mut self, name: &str) -> Result<usize, FsError> {
        self.check_mounted()?;
        let id = self.deref_link(self.lookup(name)?);
        if self.sessions[id].is_open() {
            return Err(FsError::Busy);
        }
        let stored = self.inodes[id].integrity.ok_or(FsError::NoIntegrity)?;
        if self.checksum(id)? != stored {
            warn!("open_integrity: {} is corrupted", name);
            return Err(FsError::Corrupted);
        }
        self.sessions[id] = Session {
            mode: OpenMode::Integrity,
            seek: 0,
        };
        Ok(id)
    }

    /// Closes an integrity session: recomputes the seal over the current
    /// contents, stores it, and releases the descriptor.
    pub fn close_integrity(&mut self, fd: usize) -> Result<(), FsError> {
        self.check_mounted()?;
        let id = self.resolve_fd(fd)?;
        if self.sessions[id].mode == OpenMode::Plain {
            return Err(FsError::OpenConflict);
        }
        if self.inodes[id].integrity.is_none() {
            return Err(FsError::NoIntegrity);
        }
        if self.sessions[id].mode != OpenMode::Integrity {
            return Err(FsError::NotOpen);
        }
        let sum = self.checksum(id)?;
        self.inodes[id].integrity = Some(sum);
        self.sessions[id] = Session::default();
        Ok(())
    }

    /// Metadata of whatever `name` resolves to, links dereferenced.
    pub fn stat(&self, name: &str) -> Result<Stat, FsError> {
        self.check_mounted()?;
        let id = self.deref_link(self.lookup(name)?);
        let ip = &self.inodes[id];
        Ok(Stat {
            typ: ip.typ,
            size: ip.size,
            has_integrity: ip.integrity.is_some(),
        })
    }

    fn check_mounted(&self) -> Result<(), FsError> {
        if self.mounted {
            Ok(())
        } else {
            Err(FsError::NotMounted)
        }
    }

    /// Writes the superblock as block 0, then the inode table packed
    /// [`IPB`] records per block in ascending index order.
    fn write_metadata(&mut self) -> Result<(), FsError> {
        let mut buf = ZERO_BLOCK;
        buf.copy_from_slice(self.sb.as_bytes());
        self.dev.write_block(0, &buf)?;
        for blk in 0..NIBLOCKS {
            let mut buf = ZERO_BLOCK;
            for (j, chunk) in buf.chunks_exact_mut(INODE_SIZE).enumerate() {
                let d = Dinode::encode(&self.inodes[blk * IPB + j]);
                chunk.copy_from_slice(d.as_bytes());
            }
            self.dev.write_block(1 + blk as u32, &buf)?;
        }
        Ok(())
    }

    /// Inverse of `write_metadata`.
    fn read_metadata(&mut self) -> Result<(), FsError> {
        let mut buf = ZERO_BLOCK;
        self.dev.read_block(0, &mut buf)?;
        self.sb = Superblock::read_from(&buf[..]).ok_or(FsError::BadVolume)?;
        for blk in 0..NIBLOCKS {
            self.dev.read_block(1 + blk as u32, &mut buf)?;
            for (j, chunk) in buf.chunks_exact(INODE_SIZE).enumerate() {
                let d = Dinode::read_from(chunk).ok_or(FsError::BadVolume)?;
                self.inodes[blk * IPB + j] = d.decode()?;
            }
        }
        Ok(())
    }

    /// Cross-checks the freshly read tables before trusting them: block
    /// slots of allocated regular files must stay on the volume and link
    /// targets must be allocated regular inodes.
    fn validate_tables(&self) -> Result<(), FsError> {
        for i in 0..NINODES {
            if !bitmap::get(&self.sb.inode_map, i) {
                continue;
            }
            let ip = &self.inodes[i];
            match ip.typ {
                InodeType::Regular => {
                    for &idx in &ip.addrs {
                        if idx != NO_BLOCK && !(0..self.sb.ndata() as i32).contains(&idx) {
                            return Err(FsError::BadVolume);
                        }
                    }
                }
                InodeType::SymLink => {
                    let t = ip.target;
                    if !(0..NINODES as i32).contains(&t)
                        || !bitmap::get(&self.sb.inode_map, t as usize)
                        || self.inodes[t as usize].typ != InodeType::Regular
                    {
                        return Err(FsError::BadVolume);
                    }
                }
            }
        }
        Ok(())
    }

    /// Allocates the lowest-numbered free inode.
    fn ialloc(&mut self) -> Result<usize, FsError> {
        for i in 0..NINODES {
            if !bitmap::get(&self.sb.inode_map, i) {
                bitmap::set(&mut self.sb.inode_map, i, true);
                return Ok(i);
            }
        }
        Err(FsError::OutOfInodes)
    }

    /// Allocates the lowest-numbered free data block.
    fn balloc(&mut self) -> Result<i32, FsError> {
        for idx in 0..self.sb.ndata() as usize {
            if !bitmap::get(&self.sb.block_map, idx) {
                bitmap::set(&mut self.sb.block_map, idx, true);
                return Ok(idx as i32);
            }
        }
        Err(FsError::OutOfBlocks)
    }

    /// Releases inode `id`: clears its bitmap bit and zeroes both the
    /// record and its session, so name resolution cannot see it again.
    fn ifree(&mut self, id: usize) {
        debug_assert!(id < NINODES);
        bitmap::set(&mut self.sb.inode_map, id, false);
        self.inodes[id] = Inode::default();
        self.sessions[id] = Session::default();
    }

    /// Releases data block `idx` and zeroes it on disk.
    fn bfree(&mut self, idx: i32) -> Result<(), FsError> {
        debug_assert!(idx >= 0 && (idx as u32) < self.sb.ndata());
        bitmap::set(&mut self.sb.block_map, idx as usize, false);
        self.dev.write_block(self.sb.dblock(idx), &ZERO_BLOCK)?;
        Ok(())
    }

    /// Resolves `name` to an inode index by linear scan of the table.
    ///
    /// The scan does not consult the allocation bitmap: freed records have
    /// zeroed names, which match no valid query.
    fn namei(&self, name: &str) -> Option<usize> {
        (0..NINODES).find(|&i| self.inodes[i].name_is(name))
    }

    fn lookup(&self, name: &str) -> Result<usize, FsError> {
        self.namei(name).ok_or(FsError::NotFound)
    }

    /// Follows a symbolic link to its target; regular inodes map to
    /// themselves. Targets are regular by construction, so one hop is
    /// always enough, and a link's own session state is never used.
    fn deref_link(&self, id: usize) -> usize {
        match self.inodes[id].typ {
            InodeType::SymLink => self.inodes[id].target as usize,
            InodeType::Regular => id,
        }
    }

    /// Validates a descriptor against the allocation bitmap, then
    /// dereferences a symbolic link once.
    fn resolve_fd(&self, fd: usize) -> Result<usize, FsError> {
        if fd >= NINODES || !bitmap::get(&self.sb.inode_map, fd) {
            return Err(FsError::BadDescriptor(fd));
        }
        Ok(self.deref_link(fd))
    }

    /// Maps a byte offset within `id`'s contents to the data-block index
    /// stored in the matching inode slot.
    fn bmap(&self, id: usize, offset: u32) -> Result<i32, FsError> {
        self.inodes[id]
            .addrs
            .get(offset as usize / BSIZE)
            .copied()
            .ok_or(FsError::SeekRange)
    }

    /// Extends `id` by one data block, wiring it into the slot for the
    /// current end of file. Only indirect slots grow this way; the direct
    /// block exists from creation.
    fn add_data_block(&mut self, id: usize) -> Result<i32, FsError> {
        let idx = self.balloc()?;
        let logical = self.inodes[id].size as usize / BSIZE;
        debug_assert!((1..MAXBLOCKS).contains(&logical));
        self.inodes[id].addrs[logical] = idx;
        Ok(idx)
    }

    /// Copies file contents into `dst` starting at byte `off`, one block
    /// at a time. The caller keeps `off + dst.len()` within the file.
    fn read_at(&mut self, id: usize, mut off: u32, dst: &mut [u8]) -> Result<usize, FsError> {
        let mut block: Block = ZERO_BLOCK;
        let mut tot = 0;
        while tot < dst.len() {
            let idx = self.bmap(id, off)?;
            let boff = off as usize % BSIZE;
            let take = cmp::min(dst.len() - tot, BSIZE - boff);
            self.dev.read_block(self.sb.dblock(idx), &mut block)?;
            dst[tot..tot + take].copy_from_slice(&block[boff..boff + take]);
            tot += take;
            off += take as u32;
        }
        Ok(tot)
    }

    /// Removes every symbolic link whose target is `target`. Runs as part
    /// of file removal, before the target inode itself is freed.
    fn remove_links_to(&mut self, target: usize) {
        let links: ArrayVec<usize, NINODES> = (0..NINODES)
            .filter(|&i| {
                bitmap::get(&self.sb.inode_map, i)
                    && self.inodes[i].typ == InodeType::SymLink
                    && self.inodes[i].target as usize == target
            })
            .collect();
        for id in links {
            self.ifree(id);
        }
    }

    /// CRC32 over the whole file, read through the normal block path.
    fn checksum(&mut self, id: usize) -> Result<u32, FsError> {
        let mut data = vec![0u8; self.inodes[id].size as usize];
        self.read_at(id, 0, &mut data)?;
        Ok(CRC32.checksum(&data))
    }
}

/// Names are flat, NUL-free strings that fit the name field with its
/// terminator. A leading '/' is not special.
fn validate_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name.len() >= NAMELEN || name.as_bytes().contains(&0) {
        return Err(FsError::BadName);
    }
    Ok(())
}
