//! Ordering policy: resolves a move/reorder request into concrete
//! `position` assignments.
//!
//! Pure functions over column snapshots: no locking and no store
//! access, so the placement rules are testable in isolation. The store
//! decides *when* to place (under the owner's writer lock); this module
//! decides *where*.

use taskflow_proto::task::TaskId;

/// A column snapshot entry: a task id and its current position.
pub type ColumnEntry = (TaskId, u32);

/// Computes dense position assignments for inserting `moving` into a
/// column at a visual index.
///
/// `column` is the destination column *without* the moving task, in
/// display order (position ascending, id ascending on ties). `index` is
/// the 0-based slot the client asked for and is clamped to
/// `[0, column.len()]`, so a stale client view can never push a task out
/// of range.
///
/// Positions are re-derived as the index of each task in the resulting
/// sequence (dense, gap-free, starting at 0), never copied from the
/// client. The returned assignments cover the moving task (always,
/// first, since its column may have changed even when its rank did not) and
/// every sibling whose position changed, in ascending position order.
#[must_use]
pub fn place_at(column: &[ColumnEntry], moving: TaskId, index: usize) -> Vec<ColumnEntry> {
    let index = index.min(column.len());

    let mut assignments = Vec::new();
    let mut slot: u32 = 0;
    for (i, &(id, old_position)) in column.iter().enumerate() {
        if i == index {
            assignments.push((moving, slot));
            slot += 1;
        }
        if old_position != slot {
            assignments.push((id, slot));
        }
        slot += 1;
    }
    if index >= column.len() {
        assignments.push((moving, slot));
    }

    // Moving task first, then displaced siblings by ascending position.
    assignments.sort_by_key(|&(id, position)| (id != moving, position));
    assignments
}

/// Returns the tail position for a new task entering a column:
/// current max position + 1, or 0 for an empty column.
#[must_use]
pub fn tail_position(column: &[ColumnEntry]) -> u32 {
    column
        .iter()
        .map(|&(_, position)| position)
        .max()
        .map_or(0, |max| max + 1)
}

/// Checks that no two entries in a column share a position.
///
/// Placement output always satisfies this; the store re-runs placement
/// if a concurrent interleaving ever produced a duplicate.
#[must_use]
pub fn positions_are_unique(column: &[ColumnEntry]) -> bool {
    let mut positions: Vec<u32> = column.iter().map(|&(_, p)| p).collect();
    positions.sort_unstable();
    positions.windows(2).all(|w| w[0] != w[1])
}
