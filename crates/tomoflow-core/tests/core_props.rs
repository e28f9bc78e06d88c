//! Property-based tests for chunk layout and the work queue.
//!
//! - `split_rows` covers `0..total` with full chunks and one short tail
//! - output ranges are contiguous from the binned row offset, for any binning
//! - the queue is FIFO and reports `QueueFull` exactly at capacity

use std::collections::VecDeque;

use proptest::prelude::*;

use tomoflow_core::{
    split_rows, work_queue, CancellationToken, Error, Generation, ReconConfig,
};

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 100,
        ..ProptestConfig::default()
    })]

    /// Property: chunks are full except possibly the last, and sum to the total.
    #[test]
    fn prop_split_rows_covers_total(total in 0usize..500, cap in 1usize..33) {
        let rows = split_rows(total, cap);
        prop_assert_eq!(rows.iter().sum::<usize>(), total);
        prop_assert_eq!(rows.len(), total.div_ceil(cap));
        if let Some((last, full)) = rows.split_last() {
            prop_assert!(full.iter().all(|&r| r == cap));
            prop_assert!((1..=cap).contains(last));
        }
    }

    /// Property: any binning either fails validation or yields contiguous
    /// output rows starting at `start_row >> binning`.
    #[test]
    fn prop_output_rows_contiguous(
        total in 0usize..100,
        half in 1usize..8,
        start_row in any::<u32>(),
        binning in 0u32..(usize::BITS + 16),
    ) {
        let built = ReconConfig::builder()
            .projections(4, 1, 1)
            .geometry(4, 4)
            .rows(total, 2 * half)
            .addressing(start_row as usize, binning)
            .build();

        if binning >= usize::BITS {
            prop_assert!(matches!(built, Err(Error::InvalidConfig(_))));
            return Ok(());
        }
        let config = built.unwrap();
        let mut next = (start_row as usize) >> binning;
        prop_assert_eq!(config.row_offset(), next);
        for id in 0..config.total_chunks() {
            let range = config.output_rows(id);
            prop_assert_eq!(range.start, next);
            prop_assert_eq!(range.len(), config.valid_rows(id).unwrap());
            next = range.end;
        }
    }

    /// Property: generations alternate with position parity.
    #[test]
    fn prop_generation_alternates(position in 0usize..10_000) {
        prop_assert_ne!(Generation::of(position), Generation::of(position + 1));
        prop_assert_eq!(Generation::of(position), Generation::of(position + 2));
    }

    /// Property: interleaved `try_send`/`recv` behaves like a bounded FIFO.
    #[test]
    fn prop_queue_is_bounded_fifo(
        capacity in 1usize..6,
        ops in prop::collection::vec(any::<bool>(), 0..64),
    ) {
        let (tx, rx) = work_queue::<usize>(capacity);
        let cancel = CancellationToken::new();
        let mut model = VecDeque::new();
        let mut next = 0;

        for send in ops {
            if send {
                match tx.try_send(next) {
                    Ok(()) => {
                        prop_assert!(model.len() < capacity);
                        model.push_back(next);
                    }
                    Err((item, Error::QueueFull { capacity: reported })) => {
                        prop_assert_eq!(item, next);
                        prop_assert_eq!(reported, capacity);
                        prop_assert_eq!(model.len(), capacity);
                    }
                    Err((_, other)) => prop_assert!(false, "unexpected {}", other),
                }
                next += 1;
            } else if let Some(expected) = model.pop_front() {
                prop_assert_eq!(rx.recv(&cancel).unwrap(), expected);
            }
            prop_assert_eq!(rx.len(), model.len());
        }
    }
}
