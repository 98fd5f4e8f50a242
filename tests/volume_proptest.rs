//! Random write-log vs. in-memory reference model, per the property-based
//! test plan: a sequence of random `(off, len)` pwrites must read back
//! exactly as if they had been applied to a plain byte vector.

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use sparsevol::{Options, Volume};
use tempfile::tempdir;

const SEGMENT_SHIFT: u32 = 10; // 1 KiB segments: cheap to cross boundaries often.
const ADDRESS_SPACE: u64 = 8 * 1024; // keeps the reference model's Vec small.

#[derive(Debug, Clone, Arbitrary)]
struct WriteOp {
    #[proptest(strategy = "0..ADDRESS_SPACE")]
    off: u64,
    #[proptest(strategy = "prop::collection::vec(any::<u8>(), 0..200)")]
    data: Vec<u8>,
}

fn write_log() -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(any::<WriteOp>(), 0..50)
}

/// Replays `ops` against a plain `Vec<u8>`, growing it with zero bytes as
/// needed. This is the reference model the volume's readback is checked
/// against.
fn apply_reference(ops: &[WriteOp]) -> Vec<u8> {
    let mut model = Vec::new();
    for op in ops {
        let end = op.off as usize + op.data.len();
        if model.len() < end {
            model.resize(end, 0);
        }
        model[op.off as usize..end].copy_from_slice(&op.data);
    }
    model
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn write_log_matches_reference_model(ops in write_log()) {
        let dir = tempdir().unwrap();
        let v = Volume::open(
            dir.path(),
            Options {
                segment_shift: SEGMENT_SHIFT,
                pool_capacity: 8,
            },
        )
        .unwrap();

        for op in &ops {
            v.pwrite(&op.data, op.off).unwrap();
        }

        let expected = apply_reference(&ops);
        let mut actual = vec![0u8; expected.len()];
        v.pread(&mut actual, 0).unwrap();

        prop_assert_eq!(actual, expected);
        prop_assert_eq!(v.provisioned_length(), expected.len() as u64);
    }
}
