//! Dense manual ordering used by drag-and-drop reordering and the
//! `manual` sort key.

use std::collections::HashMap;

use tracing::debug;

use crate::task::{Task, TaskId};

/// Gives every task lacking a `manual_order` its index in `display`.
/// Returns how many tasks were assigned.
pub fn backfill(tasks: &mut [Task], display: &[TaskId]) -> usize {
    let positions: HashMap<TaskId, i64> = display
        .iter()
        .enumerate()
        .map(|(idx, id)| (*id, idx as i64))
        .collect();

    let mut assigned = 0;
    let mut next_unlisted = display.len() as i64;
    for task in tasks.iter_mut().filter(|t| t.manual_order.is_none()) {
        let position = match positions.get(&task.id) {
            Some(position) => *position,
            None => {
                let position = next_unlisted;
                next_unlisted += 1;
                position
            }
        };
        task.manual_order = Some(position);
        assigned += 1;
    }

    if assigned > 0 {
        debug!(assigned, "backfilled manual order");
    }
    assigned
}

/// `max(existing) + 1`, or 0 for an empty collection. `None` when the
/// largest stored order leaves no room; compact with [`apply_sequence`].
pub fn next_manual_order(tasks: &[Task]) -> Option<i64> {
    match tasks.iter().filter_map(|t| t.manual_order).max() {
        Some(max) => max.checked_add(1),
        None => Some(0),
    }
}

/// Moves the item at `from` to `to`. `None` means the move is a no-op:
/// same position, or either index outside the sequence.
pub fn move_item(sequence: &[TaskId], from: usize, to: usize) -> Option<Vec<TaskId>> {
    if is_noop_move(sequence.len(), from, to) {
        return None;
    }

    let mut moved = sequence.to_vec();
    let id = moved.remove(from);
    moved.insert(to, id);
    Some(moved)
}

pub fn is_noop_move(len: usize, from: usize, to: usize) -> bool {
    from == to || from >= len || to >= len
}

/// Rewrites `manual_order` as 0-based contiguous positions following
/// `sequence`. Tasks missing from `sequence` keep their relative manual
/// order and are placed after it, so the whole collection stays dense.
pub fn apply_sequence(tasks: &mut [Task], sequence: &[TaskId]) {
    let mut positions: HashMap<TaskId, usize> = HashMap::with_capacity(tasks.len());
    for id in sequence {
        let next = positions.len();
        positions.entry(*id).or_insert(next);
    }

    let mut rest: Vec<(Option<i64>, TaskId)> = tasks
        .iter()
        .filter(|t| !positions.contains_key(&t.id))
        .map(|t| (t.manual_order, t.id))
        .collect();
    rest.sort_by(|a, b| match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y).then(a.1.cmp(&b.1)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.1.cmp(&b.1),
    });
    for (_, id) in rest {
        let next = positions.len();
        positions.insert(id, next);
    }

    // Ids in `sequence` that name no task would leave holes; compact them.
    let mut present: Vec<(usize, usize)> = tasks
        .iter()
        .enumerate()
        .filter_map(|(idx, t)| positions.get(&t.id).map(|pos| (*pos, idx)))
        .collect();
    present.sort_unstable();
    for (dense, (_, idx)) in present.into_iter().enumerate() {
        tasks[idx].manual_order = Some(dense as i64);
    }
}
