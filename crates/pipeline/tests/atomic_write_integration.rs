use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tempfile::tempdir;
use tessera_pipeline::store::atomic::{is_temp_name, AtomicWriter};

const OLD: &[u8] = b"hello";
const NEW_LEN: usize = 10 * 1024 * 1024;

fn new_content() -> Vec<u8> {
    (0..NEW_LEN).map(|i| (i % 251) as u8).collect()
}

#[test]
fn concurrent_reader_never_sees_a_partial_file() {
    let tmp = tempdir().expect("tempdir should be created");
    let dest = tmp.path().join("artifact.bin");
    fs::write(&dest, OLD).expect("seed file should be written");
    let new = Arc::new(new_content());

    let done = Arc::new(AtomicBool::new(false));
    let reader = thread::spawn({
        let dest = dest.clone();
        let new = Arc::clone(&new);
        let done = Arc::clone(&done);
        move || {
            let mut observed = 0usize;
            loop {
                let finished = done.load(Ordering::SeqCst);
                let bytes = fs::read(&dest).expect("destination should always exist");
                assert!(
                    bytes == OLD || bytes == *new,
                    "reader observed {} bytes, neither old nor new content",
                    bytes.len()
                );
                observed += 1;
                if finished {
                    return observed;
                }
            }
        }
    });

    AtomicWriter::new().write(&new, &dest).expect("atomic write should succeed");
    done.store(true, Ordering::SeqCst);

    let reads = reader.join().expect("reader thread should not panic");
    assert!(reads >= 1);
    assert_eq!(fs::read(&dest).expect("final read"), *new);
}

#[test]
fn staged_write_dropped_before_rename_keeps_prior_content() {
    let tmp = tempdir().expect("tempdir should be created");
    let dest = tmp.path().join("artifact.bin");
    fs::write(&dest, OLD).expect("seed file should be written");

    let staged = AtomicWriter::new().stage(&new_content(), &dest).expect("stage should succeed");
    assert!(staged.temp_path().exists());
    staged.abort();

    assert_eq!(fs::read(&dest).expect("destination should read"), OLD);
    let leftovers: Vec<_> = fs::read_dir(tmp.path())
        .expect("dir should list")
        .filter_map(|e| e.ok()?.file_name().into_string().ok())
        .filter(|name| is_temp_name(name))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
}

#[test]
fn staged_write_before_rename_leaves_destination_absent() {
    let tmp = tempdir().expect("tempdir should be created");
    let dest = tmp.path().join("fresh.bin");

    let staged = AtomicWriter::new().stage(b"payload", &dest).expect("stage should succeed");
    assert!(!dest.exists());

    staged.commit().expect("commit should succeed");
    assert_eq!(fs::read(&dest).expect("destination should read"), b"payload");
}
