//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use tcbl_core::{Config, InMemoryStore, Tcbl, TcblFile};
use tracing_subscriber::EnvFilter;

/// Page size used throughout the scenarios.
pub const PAGE: usize = 64;

/// Name of the file every scenario works on.
pub const FILE: &str = "/test-file";

/// Routes engine logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> Config {
    Config::new().page_size(PAGE)
}

/// Deterministic pseudo-random bytes from a linear congruential generator.
pub fn prep_data(len: usize, mut seed: u64) -> Vec<u8> {
    let m = 2u64 << 32;
    (0..len)
        .map(|_| {
            seed = (1_103_515_245u64.wrapping_mul(seed) + 12_345) % m;
            seed as u8
        })
        .collect()
}

/// How two handles on one file are obtained.
#[derive(Debug, Clone, Copy)]
pub enum Setup {
    /// Both handles come from one `Tcbl` and share its log.
    SharedTcbl,
    /// Each handle comes from its own `Tcbl` over the same store.
    SeparateTcbl,
}

/// Keeps the stores alive for as long as the handles are used.
pub struct TwoHandles {
    pub store: Arc<InMemoryStore>,
    pub tcbls: Vec<Tcbl>,
    pub fh1: TcblFile,
    pub fh2: TcblFile,
}

pub fn one_handle() -> (Tcbl, TcblFile) {
    init_tracing();
    let tcbl = Tcbl::in_memory(config()).unwrap();
    let fh = tcbl.open(FILE).unwrap();
    (tcbl, fh)
}

pub fn two_handles(setup: Setup) -> TwoHandles {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let (tcbls, fh1, fh2) = match setup {
        Setup::SharedTcbl => {
            let tcbl = Tcbl::new(store.clone(), config()).unwrap();
            let fh1 = tcbl.open(FILE).unwrap();
            let fh2 = tcbl.open(FILE).unwrap();
            (vec![tcbl], fh1, fh2)
        }
        Setup::SeparateTcbl => {
            let a = Tcbl::new(store.clone(), config()).unwrap();
            let b = Tcbl::new(store.clone(), config()).unwrap();
            let fh1 = a.open(FILE).unwrap();
            let fh2 = b.open(FILE).unwrap();
            (vec![a, b], fh1, fh2)
        }
    };
    TwoHandles {
        store,
        tcbls,
        fh1,
        fh2,
    }
}

pub fn verify_length(fh: &mut TcblFile, expected: usize) {
    assert_eq!(fh.file_size().unwrap(), expected as u64, "length of {}", fh.name());
}

pub fn verify_data(fh: &mut TcblFile, expected: &[u8], offset: u64) {
    let mut buf = vec![0u8; expected.len()];
    fh.read(offset, &mut buf).unwrap();
    assert!(buf == expected, "data mismatch at offset {offset}");
}

pub fn verify_file(fh: &mut TcblFile, expected: &[u8]) {
    verify_length(fh, expected.len());
    verify_data(fh, expected, 0);
}
