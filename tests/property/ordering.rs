//! Property tests for the ordering policy.
//!
//! For arbitrary column shapes (including position gaps left by
//! deletes) and arbitrary requested indexes (including out-of-range
//! ones), placement must always yield a dense, gap-free, duplicate-free
//! column with the moved task at the clamped index.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use taskflow_proto::task::TaskId;
use taskflow_server::ordering::{place_at, positions_are_unique, tail_position};

/// Strategy: a column of up to 12 tasks with unique, possibly gapped
/// positions, plus a requested index that may exceed the column length.
fn column_and_index() -> impl Strategy<Value = (Vec<(TaskId, u32)>, usize)> {
    (
        proptest::collection::btree_set(0u32..64, 0..12),
        0usize..32,
    )
        .prop_map(|(positions, index)| {
            let column: Vec<(TaskId, u32)> = positions
                .into_iter()
                .enumerate()
                .map(|(i, position)| (TaskId(100 + i as u64), position))
                .collect();
            (column, index)
        })
}

/// Applies placement assignments to a column snapshot and returns the
/// resulting full column, moving task included.
fn resulting_column(
    column: &[(TaskId, u32)],
    moving: TaskId,
    assignments: &[(TaskId, u32)],
) -> Vec<(TaskId, u32)> {
    let mut result: Vec<(TaskId, u32)> = column
        .iter()
        .map(|&(id, old)| {
            let new = assignments
                .iter()
                .find(|&&(aid, _)| aid == id)
                .map_or(old, |&(_, p)| p);
            (id, new)
        })
        .collect();
    let moved = assignments
        .iter()
        .find(|&&(aid, _)| aid == moving)
        .expect("moving task always assigned");
    result.push(*moved);
    result.sort_by_key(|&(id, position)| (position, id));
    result
}

proptest! {
    #[test]
    fn placement_is_dense_and_unique((column, index) in column_and_index()) {
        let moving = TaskId(1);
        let assignments = place_at(&column, moving, index);
        let result = resulting_column(&column, moving, &assignments);

        // Dense, gap-free positions starting at 0.
        let positions: Vec<u32> = result.iter().map(|&(_, p)| p).collect();
        let expected: Vec<u32> = (0..result.len() as u32).collect();
        prop_assert_eq!(positions, expected);
        prop_assert!(positions_are_unique(&result));
    }

    #[test]
    fn moved_task_lands_at_clamped_index((column, index) in column_and_index()) {
        let moving = TaskId(1);
        let assignments = place_at(&column, moving, index);

        prop_assert_eq!(assignments[0].0, moving);
        let clamped = index.min(column.len()) as u32;
        prop_assert_eq!(assignments[0].1, clamped);
    }

    #[test]
    fn untouched_siblings_are_not_reassigned((column, index) in column_and_index()) {
        let moving = TaskId(1);
        let assignments = place_at(&column, moving, index);

        // Every assignment other than the moving task must actually
        // change that sibling's position.
        for &(id, new_position) in &assignments[1..] {
            let old = column
                .iter()
                .find(|&&(cid, _)| cid == id)
                .map(|&(_, p)| p)
                .expect("assignment refers to a column member");
            prop_assert_ne!(old, new_position);
        }
    }

    #[test]
    fn tail_position_exceeds_every_existing_position((column, _index) in column_and_index()) {
        let tail = tail_position(&column);
        for &(_, position) in &column {
            prop_assert!(tail > position);
        }
    }
}
