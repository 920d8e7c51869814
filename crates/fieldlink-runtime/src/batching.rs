//! Batch planning.
//!
//! Input arrays are split into ordered batches; results are concatenated in
//! batch order, so output order always follows input order.

use fieldlink_core::{InputRecord, MAX_BATCH_SIZE};

/// Contiguous slice of an input array handled by one backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub index: usize,

    /// Position of the first record in the full input array
    pub offset: usize,

    pub records: Vec<InputRecord>,
}

/// Split inputs into batches of at most `min(size, 50)` records.
///
/// An empty input array yields no batches.
pub fn plan_batches(inputs: &[InputRecord], size: usize) -> Vec<Batch> {
    let size = size.clamp(1, MAX_BATCH_SIZE);
    inputs
        .chunks(size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            offset: index * size,
            records: chunk.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn inputs(n: usize) -> Vec<InputRecord> {
        (0..n).map(|i| InputRecord::with_id(i.to_string())).collect()
    }

    #[test]
    fn test_exact_multiple() {
        let batches = plan_batches(&inputs(100), 50);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].offset, 50);
        assert_eq!(batches[1].records[0].identifier_id().as_deref(), Some("50"));
    }

    #[test]
    fn test_size_capped() {
        let batches = plan_batches(&inputs(120), 500);
        let sizes: Vec<_> = batches.iter().map(|b| b.records.len()).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
    }

    #[test]
    fn test_empty() {
        assert!(plan_batches(&[], 10).is_empty());
    }

    proptest! {
        #[test]
        fn prop_batches_cover_inputs_in_order(n in 0usize..200, size in 0usize..80) {
            let all = inputs(n);
            let batches = plan_batches(&all, size);
            prop_assert!(batches.iter().all(|b| !b.records.is_empty() && b.records.len() <= MAX_BATCH_SIZE));
            let flattened: Vec<InputRecord> = batches.into_iter().flat_map(|b| b.records).collect();
            prop_assert_eq!(flattened, all);
        }
    }
}
