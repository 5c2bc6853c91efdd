//! Checkpoint behavior through the `Tcbl` facade.

mod common;

use common::{config, one_handle, prep_data, two_handles, verify_file, Setup, FILE, PAGE};
use std::sync::Arc;
use tcbl_core::{FileHandle, FileStore, InMemoryStore, Tcbl, TcblError};

#[test]
fn checkpoint_preserves_contents() {
    let (_tcbl, mut fh) = one_handle();
    let data = prep_data(PAGE, 98345);

    fh.write(0, &data).unwrap();
    verify_file(&mut fh, &data);
    fh.checkpoint().unwrap();
    verify_file(&mut fh, &data);

    fh.write(PAGE as u64, &data).unwrap();
    let mut expected = data.clone();
    expected.extend_from_slice(&data);
    verify_file(&mut fh, &expected);

    fh.checkpoint().unwrap();
    verify_file(&mut fh, &expected);
}

#[test]
fn checkpoint_rejected_inside_transaction() {
    let (_tcbl, mut fh) = one_handle();
    let data = prep_data(10 * PAGE, 98345);

    fh.begin().unwrap();
    assert!(matches!(fh.checkpoint(), Err(TcblError::TxnActive)));

    fh.write(0, &data).unwrap();
    verify_file(&mut fh, &data);
    fh.commit().unwrap();

    fh.checkpoint().unwrap();
    verify_file(&mut fh, &data);
}

#[test]
fn checkpoint_of_empty_log_is_noop() {
    let (_tcbl, mut fh) = one_handle();
    fh.checkpoint().unwrap();
    fh.checkpoint().unwrap();
    assert_eq!(fh.file_size().unwrap(), 0);
    assert_eq!(fh.log_handle().log().checkpoint_seq().unwrap(), 1);
}

#[test]
fn checkpoint_moves_data_and_rotates_log() {
    let (tcbl, mut fh) = one_handle();
    let data = prep_data(3 * PAGE, 11);
    fh.write(0, &data).unwrap();

    let log = fh.log_handle().log().clone();
    assert_eq!(log.checkpoint_seq().unwrap(), 1);
    fh.checkpoint().unwrap();
    assert_eq!(log.checkpoint_seq().unwrap(), 2);
    assert_eq!(log.log_size().unwrap(), 16);

    let data_file = tcbl.store().open(FILE).unwrap();
    assert_eq!(data_file.size().unwrap(), data.len() as u64);
    let mut raw = vec![0u8; data.len()];
    data_file.read_at(0, &mut raw).unwrap();
    assert_eq!(raw, data);
}

fn checkpoint_expires_open_snapshot(setup: Setup) {
    let mut env = two_handles(setup);
    let (fh1, fh2) = (&mut env.fh1, &mut env.fh2);

    let data_len = 10 * PAGE;
    let data_in = prep_data(data_len, 98345);

    fh1.write(0, &data_in).unwrap();
    verify_file(fh1, &data_in);
    fh1.checkpoint().unwrap();
    verify_file(fh1, &data_in);
    verify_file(fh2, &data_in);

    fh2.begin().unwrap();
    verify_file(fh2, &data_in);

    fh1.begin().unwrap();
    fh1.write(data_len as u64, &data_in).unwrap();
    let mut expected_2 = data_in.clone();
    expected_2.extend_from_slice(&data_in);

    verify_file(fh1, &expected_2);
    verify_file(fh2, &data_in);

    fh1.commit().unwrap();
    verify_file(fh1, &expected_2);
    verify_file(fh2, &data_in);

    fh1.checkpoint().unwrap();
    verify_file(fh1, &expected_2);

    let mut buf = vec![0u8; data_len];
    assert!(matches!(fh2.file_size(), Err(TcblError::SnapshotExpired)));
    assert!(matches!(fh2.read(0, &mut buf), Err(TcblError::SnapshotExpired)));
    assert!(fh2.file_size().unwrap_err().is_retryable());

    fh2.abort().unwrap();
    verify_file(fh1, &expected_2);
    verify_file(fh2, &expected_2);

    // Writes need the file size, so they expire too.
    fh1.begin().unwrap();
    fh2.begin().unwrap();
    fh1.write(2 * data_len as u64, &data_in).unwrap();
    fh1.commit().unwrap();
    fh1.checkpoint().unwrap();

    assert!(matches!(fh2.write(0, &data_in), Err(TcblError::SnapshotExpired)));
    assert!(matches!(fh2.truncate(PAGE as u64), Err(TcblError::SnapshotExpired)));
    assert_eq!(fh2.log_handle().pending_len(), 0);
    fh2.abort().unwrap();

    let mut expected_3 = expected_2.clone();
    expected_3.extend_from_slice(&data_in);
    verify_file(fh1, &expected_3);
    verify_file(fh2, &expected_3);
}

#[test]
fn checkpoint_expires_open_snapshot_shared_tcbl() {
    checkpoint_expires_open_snapshot(Setup::SharedTcbl);
}

#[test]
fn checkpoint_expires_open_snapshot_separate_tcbl() {
    checkpoint_expires_open_snapshot(Setup::SeparateTcbl);
}

#[test]
fn expired_writer_cannot_commit() {
    let mut env = two_handles(Setup::SeparateTcbl);
    let (fh1, fh2) = (&mut env.fh1, &mut env.fh2);
    fh1.write(0, &[1; PAGE]).unwrap();

    fh2.begin().unwrap();
    fh2.write(0, &[2; PAGE]).unwrap();
    fh1.checkpoint().unwrap();

    assert!(matches!(fh2.commit(), Err(TcblError::ConflictAbort)));
    verify_file(fh2, &[1; PAGE]);
}

#[test]
fn shrink_then_checkpoint_truncates_data_file() {
    let (tcbl, mut fh) = one_handle();
    let data = prep_data(4 * PAGE, 5);
    fh.write(0, &data).unwrap();
    fh.checkpoint().unwrap();

    let new_size = PAGE + PAGE / 2;
    fh.truncate(new_size as u64).unwrap();
    verify_file(&mut fh, &data[..new_size]);
    fh.checkpoint().unwrap();
    verify_file(&mut fh, &data[..new_size]);

    let data_file = tcbl.store().open(FILE).unwrap();
    assert_eq!(data_file.size().unwrap(), new_size as u64);

    // Growing again exposes zeros, not the discarded bytes.
    fh.truncate(3 * PAGE as u64).unwrap();
    let mut expected = data[..new_size].to_vec();
    expected.resize(3 * PAGE, 0);
    verify_file(&mut fh, &expected);
}

#[test]
fn cached_reads_follow_checkpoints() {
    let store = Arc::new(InMemoryStore::new());
    let tcbl = Tcbl::new(store, config().cache_pages(8)).unwrap();
    let mut fh = tcbl.open(FILE).unwrap();

    fh.write(0, &[1; 2 * PAGE]).unwrap();
    fh.checkpoint().unwrap();
    verify_file(&mut fh, &[1; 2 * PAGE]);
    verify_file(&mut fh, &[1; 2 * PAGE]);

    let stats = fh.log_handle().log().cache_stats().unwrap();
    assert!(stats.hits >= 2);

    fh.write(0, &[2; PAGE]).unwrap();
    fh.checkpoint().unwrap();
    let mut expected = vec![2; PAGE];
    expected.extend_from_slice(&[1; PAGE]);
    verify_file(&mut fh, &expected);
}

#[test]
fn many_checkpoints_interleaved_with_writes() {
    let (_tcbl, mut fh) = one_handle();
    let mut model = Vec::new();
    for round in 0..12u64 {
        let page = prep_data(PAGE, round + 1);
        let offset = (round % 5) as usize * PAGE;
        if model.len() < offset + PAGE {
            model.resize(offset + PAGE, 0);
        }
        model[offset..offset + PAGE].copy_from_slice(&page);
        fh.write(offset as u64, &page).unwrap();
        if round % 3 == 2 {
            fh.checkpoint().unwrap();
        }
        verify_file(&mut fh, &model);
    }
}

#[test]
fn delete_removes_file_and_log() {
    let (tcbl, mut fh) = one_handle();
    fh.write(0, &[9; PAGE]).unwrap();
    drop(fh);

    assert!(tcbl.exists(FILE).unwrap());
    tcbl.delete(FILE).unwrap();
    assert!(!tcbl.exists(FILE).unwrap());
    assert!(!tcbl.store().exists("/test-file-log").unwrap());
    assert!(matches!(
        tcbl.delete(FILE),
        Err(TcblError::FileNotFound { .. })
    ));

    let mut fh = tcbl.open(FILE).unwrap();
    assert_eq!(fh.file_size().unwrap(), 0);
}
