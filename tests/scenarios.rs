//! End-to-end scenarios exercising the full stack (device -> cache ->
//! inode -> directory -> façade) the way a dispatcher-driven test suite
//! would, without a real dispatcher or disk.

use std::sync::Arc;

use rand::RngCore;

use tinyfs::clock::TickClock;
use tinyfs::device::MemBlockDevice;
use tinyfs::fs::FileSystem;

fn new_fs(sectors: u32) -> FileSystem {
    let device = Arc::new(MemBlockDevice::new(sectors));
    let clock = Arc::new(TickClock::new());
    FileSystem::format(device, clock).unwrap()
}

fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

#[test]
fn cache_effectiveness_read_pass_beats_write_pass() {
    let fs = new_fs(400);
    let root = fs.root();
    fs.create(&root, "big").unwrap();
    let mut handle = fs.open(&root, "big").unwrap();

    let payload = random_bytes(30_000);
    fs.reset_cache();
    fs.write(&mut handle, &payload);
    let write_pass_misses = fs.miss_rate();

    fs.reset_cache();
    fs.seek(&mut handle, 0);
    let mut out = vec![0u8; payload.len()];
    fs.read(&mut handle, &mut out);
    assert_eq!(out, payload);
    let read_pass_misses = fs.miss_rate();

    // The write pass touches every sector for the first time (all misses);
    // the read pass revisits sectors still resident from the write, so it
    // should miss no more often.
    assert!(read_pass_misses <= write_pass_misses);
    fs.close(handle);
}

#[test]
fn write_coalescing_bounds_device_writes() {
    let fs = new_fs(400);
    let root = fs.root();
    fs.create(&root, "big").unwrap();
    let mut handle = fs.open(&root, "big").unwrap();

    let before = fs.write_count();
    let payload = random_bytes(64_000);
    fs.write(&mut handle, &payload);
    fs.seek(&mut handle, 0);
    let mut out = vec![0u8; payload.len()];
    fs.read(&mut handle, &mut out);
    assert_eq!(out, payload);
    let after = fs.write_count();

    let attributable = after - before;
    assert!(
        attributable > 64 && attributable < 256,
        "expected coalesced device writes in (64, 256), got {}",
        attributable
    );
    fs.close(handle);
}

#[test]
fn seek_tell_round_trip() {
    let fs = new_fs(64);
    let root = fs.root();
    fs.create(&root, "f").unwrap();
    let mut handle = fs.open(&root, "f").unwrap();

    let payload = random_bytes(1234);
    fs.write(&mut handle, &payload);
    assert_eq!(fs.tell(&handle), 1234);

    fs.seek(&mut handle, 0);
    assert_eq!(fs.tell(&handle), 0);
    fs.seek(&mut handle, 197);
    assert_eq!(fs.tell(&handle), 197);
    fs.close(handle);
}

#[test]
fn extension_via_write() {
    let fs = new_fs(64);
    let root = fs.root();
    fs.create(&root, "f").unwrap();
    let mut handle = fs.open(&root, "f").unwrap();

    let buf = vec![0xabu8; 1000];
    let written = fs.write(&mut handle, &buf);
    assert_eq!(written, 1000);
    assert_eq!(fs.filesize(&handle), 1000);

    fs.seek(&mut handle, 0);
    let mut out = vec![0u8; 1000];
    fs.read(&mut handle, &mut out);
    assert_eq!(out, buf);
    fs.close(handle);
}

#[test]
fn sparse_extension_reads_zero_gap() {
    let fs = new_fs(64);
    let root = fs.root();
    fs.create(&root, "f").unwrap();
    let mut handle = fs.open(&root, "f").unwrap();

    fs.seek(&mut handle, 2048);
    let written = fs.write(&mut handle, &[1u8, 2, 3, 4]);
    assert_eq!(written, 4);
    assert_eq!(fs.filesize(&handle), 2052);

    fs.seek(&mut handle, 0);
    let mut gap = vec![0xffu8; 2048];
    let read = fs.read(&mut handle, &mut gap);
    assert_eq!(read, 2048);
    assert!(gap.iter().all(|&b| b == 0));
    fs.close(handle);
}

#[test]
fn directory_lifecycle() {
    let fs = new_fs(128);
    let root = fs.root();

    fs.mkdir(&root, "/a").unwrap();
    fs.mkdir(&root, "/a/b").unwrap();

    let mut cwd = fs.chdir(fs.root(), "/a").unwrap();
    let mut name = String::new();
    assert!(fs.readdir(&mut cwd, &mut name));
    assert_eq!(name, "b");
    assert!(!fs.readdir(&mut cwd, &mut name));

    assert!(fs.remove(&root, "/a").is_err());
    fs.remove(&root, "/a/b").unwrap();
    fs.remove(&root, "/a").unwrap();
}

#[test]
fn write_then_read_same_inode_via_two_opens_see_same_bytes() {
    let fs = new_fs(64);
    let root = fs.root();
    fs.create(&root, "f").unwrap();

    let mut writer = fs.open(&root, "f").unwrap();
    fs.write(&mut writer, b"shared state");
    fs.close(writer);

    let mut reader = fs.open(&root, "f").unwrap();
    assert_eq!(fs.inumber(&reader), {
        let probe = fs.open(&root, "f").unwrap();
        let n = fs.inumber(&probe);
        fs.close(probe);
        n
    });
    let mut out = [0u8; 12];
    fs.read(&mut reader, &mut out);
    assert_eq!(&out, b"shared state");
    fs.close(reader);
}
