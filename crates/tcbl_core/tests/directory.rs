//! End-to-end tests against files on disk.

mod common;

use common::{config, prep_data, verify_file, PAGE};
use std::thread;
use tcbl_core::{FileStore, Tcbl, TcblError};
use tempfile::tempdir;

#[test]
fn committed_data_survives_reopen() {
    let dir = tempdir().unwrap();
    let data = prep_data(5 * PAGE, 42);
    {
        let tcbl = Tcbl::open_dir(dir.path(), config()).unwrap();
        let mut fh = tcbl.open("db").unwrap();
        fh.write(0, &data).unwrap();

        // Uncommitted work is lost when the handle goes away.
        fh.begin().unwrap();
        fh.write(0, &[0xFF; PAGE]).unwrap();
    }

    let tcbl = Tcbl::open_dir(dir.path(), config()).unwrap();
    let mut fh = tcbl.open("db").unwrap();
    verify_file(&mut fh, &data);

    assert!(dir.path().join("db").exists());
    assert!(dir.path().join("db-log").exists());
    assert!(dir.path().join("db-log-cp").exists());
}

#[test]
fn checkpoint_writes_data_file() {
    let dir = tempdir().unwrap();
    let data = prep_data(3 * PAGE + 10, 7);
    let tcbl = Tcbl::open_dir(dir.path(), config()).unwrap();
    let mut fh = tcbl.open("db").unwrap();

    fh.write(0, &data).unwrap();
    fh.checkpoint().unwrap();
    drop(fh);

    let raw = std::fs::read(dir.path().join("db")).unwrap();
    assert_eq!(raw, data);
    let log = std::fs::read(dir.path().join("db-log")).unwrap();
    assert_eq!(log.len(), 16);

    let tcbl = Tcbl::open_dir(dir.path(), config()).unwrap();
    let mut fh = tcbl.open("db").unwrap();
    verify_file(&mut fh, &data);
}

#[test]
fn separate_engines_see_each_others_commits() {
    let dir = tempdir().unwrap();
    let a = Tcbl::open_dir(dir.path(), config()).unwrap();
    let b = Tcbl::open_dir(dir.path(), config()).unwrap();
    let mut fa = a.open("db").unwrap();
    let mut fb = b.open("db").unwrap();

    fa.write(0, &[1; 2 * PAGE]).unwrap();
    verify_file(&mut fb, &[1; 2 * PAGE]);

    fa.begin().unwrap();
    fb.begin().unwrap();
    fa.write(0, &[2; PAGE]).unwrap();
    fb.write(PAGE as u64, &[3; PAGE]).unwrap();
    fa.commit().unwrap();
    assert!(matches!(fb.commit(), Err(TcblError::ConflictAbort)));

    fb.checkpoint().unwrap();
    let mut expected = vec![2; PAGE];
    expected.extend_from_slice(&[1; PAGE]);
    verify_file(&mut fa, &expected);
    verify_file(&mut fb, &expected);
}

#[test]
fn concurrent_writers_retry_until_committed() {
    let dir = tempdir().unwrap();
    let tcbl = Tcbl::open_dir(dir.path(), config()).unwrap();
    tcbl.open("db").unwrap().write(0, &[0; 4 * PAGE]).unwrap();

    thread::scope(|s| {
        for worker in 0..4u8 {
            let tcbl = &tcbl;
            s.spawn(move || {
                let mut fh = tcbl.open("db").unwrap();
                let offset = u64::from(worker) * PAGE as u64;
                for round in 0..10u8 {
                    loop {
                        let result = fh.transaction(|f| {
                            f.write(offset, &[worker * 16 + round; PAGE])
                        });
                        match result {
                            Ok(()) => break,
                            Err(e) if e.is_retryable() => continue,
                            Err(e) => panic!("unexpected error: {e}"),
                        }
                    }
                    if round % 4 == 3 {
                        fh.checkpoint().unwrap();
                    }
                }
            });
        }
    });

    let mut fh = tcbl.open("db").unwrap();
    let mut expected = Vec::new();
    for worker in 0..4u8 {
        expected.extend_from_slice(&[worker * 16 + 9; PAGE]);
    }
    verify_file(&mut fh, &expected);
}

#[test]
fn delete_removes_every_file() {
    let dir = tempdir().unwrap();
    let tcbl = Tcbl::open_dir(dir.path(), config()).unwrap();
    tcbl.open("db").unwrap().write(0, &[5; PAGE]).unwrap();

    tcbl.delete("db").unwrap();
    assert!(!tcbl.store().exists("db").unwrap());
    assert!(!dir.path().join("db-log").exists());
    assert!(!dir.path().join("db-log-cp").exists());
}
