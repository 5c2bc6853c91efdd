//! Property tests: the logical file always matches a plain byte-vector
//! model, whatever mix of writes, truncations, transactions and
//! checkpoints produced it.

mod common;

use common::{prep_data, FILE, PAGE};
use proptest::prelude::*;
use tcbl_core::{Config, Tcbl, TcblFile};

#[derive(Debug, Clone)]
enum FileOp {
    Write { page: u64, len: usize, seed: u64 },
    Truncate { len: u64 },
    Checkpoint,
    Begin,
    Commit,
    Abort,
}

fn file_op_strategy() -> impl Strategy<Value = FileOp> {
    prop_oneof![
        4 => (0u64..12, 1usize..(3 * PAGE), any::<u64>())
            .prop_map(|(page, len, seed)| FileOp::Write { page, len, seed }),
        1 => (0u64..(12 * PAGE as u64)).prop_map(|len| FileOp::Truncate { len }),
        1 => Just(FileOp::Checkpoint),
        1 => Just(FileOp::Begin),
        1 => Just(FileOp::Commit),
        1 => Just(FileOp::Abort),
    ]
}

/// Committed and in-flight views of the file.
struct Model {
    committed: Vec<u8>,
    working: Option<Vec<u8>>,
}

impl Model {
    fn view(&mut self) -> &mut Vec<u8> {
        self.working.as_mut().unwrap_or(&mut self.committed)
    }
}

fn apply_write(model: &mut Vec<u8>, offset: usize, data: &[u8]) {
    let end = offset + data.len();
    if model.len() < end {
        model.resize(end, 0);
    }
    model[offset..end].copy_from_slice(data);
}

fn assert_matches(fh: &mut TcblFile, model: &[u8]) -> Result<(), TestCaseError> {
    prop_assert_eq!(fh.file_size().unwrap(), model.len() as u64);
    let mut buf = vec![0u8; model.len()];
    fh.read(0, &mut buf).unwrap();
    prop_assert!(buf == model);
    Ok(())
}

fn run_ops(ops: &[FileOp]) -> Result<(), TestCaseError> {
    let tcbl = Tcbl::in_memory(Config::new().page_size(PAGE).cache_pages(4)).unwrap();
    let mut fh = tcbl.open(FILE).unwrap();
    let mut model = Model {
        committed: Vec::new(),
        working: None,
    };

    for op in ops {
        match op {
            FileOp::Write { page, len, seed } => {
                let offset = *page as usize * PAGE;
                let data = prep_data(*len, *seed);
                fh.write(offset as u64, &data).unwrap();
                apply_write(model.view(), offset, &data);
            }
            FileOp::Truncate { len } => {
                fh.truncate(*len).unwrap();
                model.view().resize(*len as usize, 0);
            }
            FileOp::Checkpoint => {
                if model.working.is_some() {
                    prop_assert!(fh.checkpoint().is_err());
                } else {
                    fh.checkpoint().unwrap();
                }
            }
            FileOp::Begin => {
                if model.working.is_some() {
                    prop_assert!(fh.begin().is_err());
                } else {
                    fh.begin().unwrap();
                    model.working = Some(model.committed.clone());
                }
            }
            FileOp::Commit => match model.working.take() {
                Some(working) => {
                    fh.commit().unwrap();
                    model.committed = working;
                }
                None => prop_assert!(fh.commit().is_err()),
            },
            FileOp::Abort => match model.working.take() {
                Some(_) => fh.abort().unwrap(),
                None => prop_assert!(fh.abort().is_err()),
            },
        }
        assert_matches(&mut fh, model.view())?;
    }

    if model.working.take().is_some() {
        fh.abort().unwrap();
    }
    assert_matches(&mut fh, &model.committed)?;

    // A checkpoint never changes what a fresh handle sees.
    fh.checkpoint().unwrap();
    let mut reopened = tcbl.open(FILE).unwrap();
    assert_matches(&mut reopened, &model.committed)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn file_matches_model(ops in prop::collection::vec(file_op_strategy(), 1..40)) {
        run_ops(&ops)?;
    }

    #[test]
    fn last_committed_writer_wins(
        first in prop::collection::vec(any::<u8>(), 1..(4 * PAGE)),
        second in prop::collection::vec(any::<u8>(), 1..(4 * PAGE)),
        checkpoint_between in any::<bool>(),
    ) {
        let tcbl = Tcbl::in_memory(Config::new().page_size(PAGE)).unwrap();
        let mut a = tcbl.open(FILE).unwrap();
        let mut b = tcbl.open(FILE).unwrap();

        a.write(0, &first).unwrap();
        if checkpoint_between {
            a.checkpoint().unwrap();
        }
        b.write(0, &second).unwrap();

        let mut expected = first.clone();
        apply_write(&mut expected, 0, &second);
        assert_matches(&mut a, &expected)?;
        assert_matches(&mut b, &expected)?;
    }
}
