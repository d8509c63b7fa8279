use std::{cmp::Reverse, collections::BinaryHeap};

/// Orders nodes so every parent precedes its children (Kahn's algorithm).
/// Among nodes ready at the same time the lowest input index goes first, so
/// an already-ordered list comes back unchanged.
///
/// Returns `Err(node)` with a node on a cycle when no complete order exists.
pub fn parent_first_order(parents: &[Option<usize>]) -> Result<Vec<usize>, usize> {
    let mut children = vec![Vec::new(); parents.len()];
    let mut pending = vec![0usize; parents.len()];
    let mut ready = BinaryHeap::new();

    for (index, parent) in parents.iter().enumerate() {
        match parent {
            Some(parent) => {
                children[*parent].push(index);
                pending[index] += 1;
            }
            None => ready.push(Reverse(index)),
        }
    }

    let mut order = Vec::with_capacity(parents.len());
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for child in &children[index] {
            pending[*child] -= 1;
            if pending[*child] == 0 {
                ready.push(Reverse(*child));
            }
        }
    }

    if order.len() < parents.len() {
        // A stuck node only hangs below a cycle; after `len` parent steps the
        // walk is on it.
        let mut stuck = pending
            .iter()
            .position(|count| *count > 0)
            .unwrap_or_default();
        for _ in 0..parents.len() {
            match parents[stuck] {
                Some(parent) => stuck = parent,
                None => break,
            }
        }
        return Err(stuck);
    }
    Ok(order)
}

/// Parent links rewritten for nodes laid out in `order`.
pub fn reorder_parents(parents: &[Option<usize>], order: &[usize]) -> Vec<Option<usize>> {
    let mut new_index = vec![0usize; parents.len()];
    for (position, old) in order.iter().enumerate() {
        new_index[*old] = position;
    }
    order
        .iter()
        .map(|old| parents[*old].map(|parent| new_index[parent]))
        .collect()
}

/// Nearest strict ancestor of `start` accepted by `keep`, walking `parents`.
/// The walk is bounded by the node count so malformed links cannot loop.
pub fn nearest_ancestor(
    start: usize,
    parents: &[Option<usize>],
    keep: impl Fn(usize) -> bool,
) -> Option<usize> {
    let mut cursor = parents[start];
    let mut steps = 0;
    while let Some(current) = cursor {
        if keep(current) {
            return Some(current);
        }
        steps += 1;
        if steps > parents.len() {
            return None;
        }
        cursor = parents[current];
    }
    None
}

/// Direct children of every node.
pub fn children_of(parents: &[Option<usize>]) -> Vec<Vec<usize>> {
    let mut children = vec![Vec::new(); parents.len()];
    for (index, parent) in parents.iter().enumerate() {
        if let Some(parent) = parent {
            children[*parent].push(index);
        }
    }
    children
}
