//! End-to-end tests over a file-backed device image.

use flatfs::param::{BSIZE, MAXDEVICE, MAXFILE, MINDEVICE, NINODES};
use flatfs::{FileDisk, FlatFs, FsError, Whence};
use tempfile::TempDir;

const DEV_BLOCKS: u32 = 300;
const MIN_BLOCKS: u32 = MINDEVICE / BSIZE as u32;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Formats and mounts a fresh volume on a `blocks`-block image in `dir`.
fn new_volume(dir: &TempDir, blocks: u32) -> FlatFs<FileDisk> {
    init_logging();
    let disk = FileDisk::create(dir.path().join("disk.img"), blocks).unwrap();
    let mut fs = FlatFs::new(disk);
    fs.mkfs(blocks * BSIZE as u32).unwrap();
    fs.mount().unwrap();
    fs
}

#[test]
fn format_rejects_out_of_range_devices() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let disk = FileDisk::create(dir.path().join("disk.img"), DEV_BLOCKS).unwrap();
    let mut fs = FlatFs::new(disk);
    assert!(matches!(fs.mkfs(5 * 1024), Err(FsError::DeviceSize(_))));
    assert!(matches!(fs.mkfs(1000 * 1024), Err(FsError::DeviceSize(_))));
    assert!(matches!(fs.mkfs(MINDEVICE - 1), Err(FsError::DeviceSize(_))));
    assert!(matches!(fs.mkfs(MAXDEVICE + 1), Err(FsError::DeviceSize(_))));
    fs.mkfs(300 * BSIZE as u32).unwrap();
}

#[test]
fn mount_is_exclusive_and_unmount_requires_a_mount() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    assert!(matches!(fs.mount(), Err(FsError::AlreadyMounted)));
    fs.unmount().unwrap();
    assert!(matches!(fs.unmount(), Err(FsError::NotMounted)));
    assert!(matches!(fs.create("/x"), Err(FsError::NotMounted)));
    fs.mount().unwrap();
}

#[test]
fn mount_rejects_an_unformatted_device() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let disk = FileDisk::create(dir.path().join("disk.img"), DEV_BLOCKS).unwrap();
    let mut fs = FlatFs::new(disk);
    assert!(matches!(fs.mount(), Err(FsError::BadVolume)));
}

#[test]
fn namespace_holds_exactly_48_objects() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    assert_eq!(fs.create("/test.txt").unwrap(), 0);
    assert!(matches!(fs.create("/test.txt"), Err(FsError::AlreadyExists)));
    for i in 0..NINODES - 1 {
        fs.create(&format!("/file{}.txt", i)).unwrap();
    }
    assert!(matches!(
        fs.create("/file47.txt"),
        Err(FsError::OutOfInodes)
    ));
}

#[test]
fn write_then_read_back_through_the_seek_pointer() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/test.txt").unwrap();
    assert_eq!(fs.open("/test.txt").unwrap(), fd);
    assert_eq!(fs.write(fd, &[1u8; 2048]).unwrap(), 2048);

    fs.seek(fd, Whence::Begin).unwrap();
    let mut buf = [0u8; 2048];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 2048);
    assert!(buf.iter().all(|&b| b == 1));

    // Half a block back from the end: the next read is short.
    fs.seek(fd, Whence::Cur(-1024)).unwrap();
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 1024);
    assert!(buf[..1024].iter().all(|&b| b == 1));
}

#[test]
fn multi_block_round_trip_preserves_exact_bytes() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let n = 3 * BSIZE + 123;
    let data: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();

    let fd = fs.create("/blob").unwrap();
    fs.open("/blob").unwrap();
    assert_eq!(fs.write(fd, &data).unwrap(), n);

    fs.seek(fd, Whence::Begin).unwrap();
    let mut back = vec![0u8; n];
    assert_eq!(fs.read(fd, &mut back).unwrap(), n);
    assert_eq!(back, data);
}

#[test]
fn file_size_is_capped_at_five_blocks() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/file0.txt").unwrap();
    fs.open("/file0.txt").unwrap();
    let big = vec![2u8; MAXFILE + 1];
    assert_eq!(fs.write(fd, &big).unwrap(), MAXFILE);
    // The file is full: not a single further byte lands.
    assert_eq!(fs.write(fd, &[2u8; 1]).unwrap(), 0);
    assert_eq!(fs.stat("/file0.txt").unwrap().size as usize, MAXFILE);
}

#[test]
fn rewriting_a_sealed_file_is_caught_at_integrity_open() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/file1.txt").unwrap();
    fs.open("/file1.txt").unwrap();
    fs.write(fd, &[3u8; 1024]).unwrap();
    fs.close(fd).unwrap();
    fs.include_integrity("/file1.txt").unwrap();

    // A rewrite through a plain open breaks the seal even with the same
    // fill byte: the written range advances the size.
    fs.open("/file1.txt").unwrap();
    fs.write(fd, &[3u8; 1024]).unwrap();
    fs.close(fd).unwrap();
    assert!(matches!(
        fs.open_integrity("/file1.txt"),
        Err(FsError::Corrupted)
    ));
    assert!(matches!(fs.check("/file1.txt"), Err(FsError::Corrupted)));
}

#[test]
fn removing_a_file_cascades_over_its_links() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    fs.create("/file0.txt").unwrap();
    fs.create_link("/file0.txt", "/link0").unwrap();
    fs.create_link("/file0.txt", "/link1").unwrap();
    fs.remove("/file0.txt").unwrap();
    assert!(matches!(fs.remove_link("/link0"), Err(FsError::NotFound)));
    assert!(matches!(fs.remove_link("/link1"), Err(FsError::NotFound)));
    assert!(matches!(fs.open("/link0"), Err(FsError::NotFound)));
}

#[test]
fn links_are_transparent_for_every_operation() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/data").unwrap();
    fs.create_link("/data", "/alias").unwrap();

    // A link opens its target, under the target's descriptor.
    let lfd = fs.open("/alias").unwrap();
    assert_eq!(lfd, fd);
    fs.write(lfd, b"through the link").unwrap();
    fs.close(fd).unwrap();

    let fd2 = fs.open("/data").unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(fs.read(fd2, &mut buf).unwrap(), 16);
    assert_eq!(&buf, b"through the link");
    fs.close(fd2).unwrap();
    assert_eq!(fs.stat("/alias").unwrap().size, 16);

    // Sealing through the link seals the target.
    fs.include_integrity("/alias").unwrap();
    fs.check("/data").unwrap();
}

#[test]
fn state_survives_unmount_and_remount() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("disk.img");
    {
        let disk = FileDisk::create(&path, DEV_BLOCKS).unwrap();
        let mut fs = FlatFs::new(disk);
        fs.mkfs(DEV_BLOCKS * BSIZE as u32).unwrap();
        fs.mount().unwrap();
        let fd = fs.create("/a").unwrap();
        fs.open("/a").unwrap();
        fs.write(fd, b"persistent bytes").unwrap();
        fs.close(fd).unwrap();
        fs.include_integrity("/a").unwrap();
        fs.create_link("/a", "/la").unwrap();
        fs.create("/b").unwrap();
        fs.unmount().unwrap();
    }

    let mut fs = FlatFs::new(FileDisk::open(&path).unwrap());
    fs.mount().unwrap();
    assert_eq!(fs.stat("/a").unwrap().size, 16);
    fs.check("/a").unwrap();
    let fd = fs.open("/la").unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 16);
    assert_eq!(&buf, b"persistent bytes");
    // Sessions are runtime state: /b came back closed.
    assert!(matches!(fs.write(2, b"x"), Err(FsError::NotOpen)));
}

#[test]
fn removal_persists_across_remount() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    fs.create("/gone").unwrap();
    fs.remove("/gone").unwrap();
    fs.unmount().unwrap();
    fs.mount().unwrap();
    assert!(matches!(fs.open("/gone"), Err(FsError::NotFound)));
}

#[test]
fn integrity_sessions_block_plain_opens_and_closes() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/f").unwrap();
    fs.open("/f").unwrap();
    fs.write(fd, b"sealed").unwrap();
    fs.close(fd).unwrap();
    fs.include_integrity("/f").unwrap();

    assert_eq!(fs.open_integrity("/f").unwrap(), fd);
    assert!(matches!(fs.open("/f"), Err(FsError::OpenConflict)));
    assert!(matches!(fs.close(fd), Err(FsError::OpenConflict)));
    fs.close_integrity(fd).unwrap();

    // Released: a plain session is allowed again.
    fs.open("/f").unwrap();
    fs.close(fd).unwrap();
}

#[test]
fn close_integrity_reseals_the_current_contents() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/f").unwrap();
    fs.open("/f").unwrap();
    fs.write(fd, &[5u8; 100]).unwrap();
    fs.close(fd).unwrap();
    fs.include_integrity("/f").unwrap();

    let fd = fs.open_integrity("/f").unwrap();
    fs.write(fd, &[9u8; 100]).unwrap();
    fs.close_integrity(fd).unwrap();
    fs.check("/f").unwrap();
}

#[test]
fn a_seal_stays_valid_until_contents_change() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/f").unwrap();
    fs.open("/f").unwrap();
    fs.write(fd, &[5u8; 100]).unwrap();
    fs.close(fd).unwrap();
    fs.include_integrity("/f").unwrap();

    // Opening and closing without writing leaves the seal valid.
    fs.open("/f").unwrap();
    fs.close(fd).unwrap();
    fs.check("/f").unwrap();

    fs.open("/f").unwrap();
    fs.write(fd, &[0xff; 10]).unwrap();
    fs.close(fd).unwrap();
    assert!(matches!(fs.check("/f"), Err(FsError::Corrupted)));
}

#[test]
fn integrity_preconditions() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/f").unwrap();

    assert!(matches!(fs.check("/f"), Err(FsError::NoIntegrity)));
    assert!(matches!(fs.open_integrity("/f"), Err(FsError::NoIntegrity)));

    // An empty file is sealable.
    fs.include_integrity("/f").unwrap();
    assert!(matches!(
        fs.include_integrity("/f"),
        Err(FsError::HasIntegrity)
    ));

    fs.open("/f").unwrap();
    assert!(matches!(fs.check("/f"), Err(FsError::Busy)));
    assert!(matches!(fs.open_integrity("/f"), Err(FsError::Busy)));
    // A plain session cannot be released through the integrity close.
    assert!(matches!(fs.close_integrity(fd), Err(FsError::OpenConflict)));
    fs.close(fd).unwrap();

    fs.check("/f").unwrap();
    let fd = fs.open_integrity("/f").unwrap();
    fs.close_integrity(fd).unwrap();
    assert!(matches!(fs.close_integrity(fd), Err(FsError::NotOpen)));
}

#[test]
fn reading_an_empty_or_closed_file_never_fails() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/e").unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);
    fs.open("/e").unwrap();
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);
}

#[test]
fn write_requires_an_open_session() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/f").unwrap();
    assert!(matches!(fs.write(fd, b"x"), Err(FsError::NotOpen)));
}

#[test]
fn seek_is_clamped_to_the_file_bounds() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/f").unwrap();
    fs.open("/f").unwrap();
    fs.write(fd, &[1u8; 100]).unwrap();

    fs.seek(fd, Whence::Begin).unwrap();
    assert!(matches!(fs.seek(fd, Whence::Cur(-1)), Err(FsError::SeekRange)));
    assert!(matches!(
        fs.seek(fd, Whence::Cur(101)),
        Err(FsError::SeekRange)
    ));
    fs.seek(fd, Whence::Cur(100)).unwrap();
    fs.seek(fd, Whence::End).unwrap();
    fs.seek(fd, Whence::Begin).unwrap();
}

#[test]
fn reopening_resets_the_seek_pointer() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/f").unwrap();
    fs.open("/f").unwrap();
    fs.write(fd, b"abcdef").unwrap();

    assert_eq!(fs.open("/f").unwrap(), fd);
    let mut buf = [0u8; 6];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 6);
    assert_eq!(&buf, b"abcdef");
}

#[test]
fn operations_check_the_object_type() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    fs.create("/f").unwrap();
    fs.create_link("/f", "/l").unwrap();

    assert!(matches!(fs.remove("/l"), Err(FsError::NotRegular)));
    assert!(matches!(fs.remove_link("/f"), Err(FsError::NotSymLink)));
    // No link chains: the target must be a regular file.
    assert!(matches!(
        fs.create_link("/l", "/l2"),
        Err(FsError::NotRegular)
    ));
    assert!(matches!(
        fs.create_link("/f", "/l"),
        Err(FsError::AlreadyExists)
    ));
    assert!(matches!(
        fs.create_link("/missing", "/l3"),
        Err(FsError::NotFound)
    ));
}

#[test]
fn name_hygiene() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    assert!(matches!(fs.create(""), Err(FsError::BadName)));
    let long = "x".repeat(32);
    assert!(matches!(fs.create(&long), Err(FsError::BadName)));
    let fits = "x".repeat(31);
    fs.create(&fits).unwrap();
    assert!(fs.open(&fits).is_ok());
    assert!(matches!(fs.open(""), Err(FsError::NotFound)));
    assert!(matches!(fs.open("/nope"), Err(FsError::NotFound)));
}

#[test]
fn removing_a_file_invalidates_its_descriptor() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, DEV_BLOCKS);
    let fd = fs.create("/f").unwrap();
    fs.open("/f").unwrap();
    fs.write(fd, b"bytes").unwrap();
    fs.remove("/f").unwrap();
    let mut buf = [0u8; 4];
    assert!(matches!(
        fs.read(fd, &mut buf),
        Err(FsError::BadDescriptor(_))
    ));
    assert!(matches!(fs.open("/f"), Err(FsError::NotFound)));
}

#[test]
fn the_device_fills_gracefully() {
    let dir = TempDir::new().unwrap();
    let mut fs = new_volume(&dir, MIN_BLOCKS);
    let ndata = MIN_BLOCKS as usize - 1 - 3;

    for i in 0..NINODES {
        fs.create(&format!("/f{}", i)).unwrap();
    }
    // Fill every file to its cap until the device runs dry. Writes stop at
    // block boundaries, so storage is handed out in whole blocks.
    let mut sizes = [0usize; NINODES];
    for i in 0..NINODES {
        let name = format!("/f{}", i);
        let fd = fs.open(&name).unwrap();
        sizes[i] = fs.write(fd, &vec![i as u8; MAXFILE]).unwrap();
        fs.close(fd).unwrap();
        assert_eq!(sizes[i] % BSIZE, 0);
    }
    let total: usize = sizes.iter().sum();
    assert_eq!(total, ndata * BSIZE);

    // Every file reads back exactly what it accepted, with its own fill
    // byte: no two files share a block.
    for &i in &[0, 17, NINODES - 1] {
        let name = format!("/f{}", i);
        let fd = fs.open(&name).unwrap();
        let mut back = vec![0u8; MAXFILE];
        assert_eq!(fs.read(fd, &mut back).unwrap(), sizes[i]);
        assert!(back[..sizes[i]].iter().all(|&b| b == i as u8));
        fs.close(fd).unwrap();
    }

    // Freeing one file makes its blocks available again.
    let reclaimed = sizes[0];
    fs.remove("/f0").unwrap();
    let fd = fs.create("/again").unwrap();
    fs.open("/again").unwrap();
    let wrote = fs.write(fd, &vec![0xaa; MAXFILE]).unwrap();
    assert_eq!(wrote, reclaimed.min(MAXFILE));
}
