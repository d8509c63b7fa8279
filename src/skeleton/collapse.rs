/// Outcome of applying one merge directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// The child already resolves to the parent.
    Redundant,
}

/// Why a merge directive could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeConflict {
    /// The parent has itself been merged into the child, or the directive
    /// names the same bone twice.
    Cycle,
    /// The child is already merged into an unrelated bone.
    Retargeted { current: usize },
}

/// Disjoint-set over bone indices. The representative of a set is always
/// the bone everything in it was merged into.
#[derive(Debug, Clone)]
pub struct CollapseSet {
    parent: Vec<usize>,
}

impl CollapseSet {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    /// Representative of `index`, compressing the walked path.
    pub fn find(&mut self, index: usize) -> usize {
        let root = self.root(index);
        let mut cursor = index;
        while self.parent[cursor] != root {
            let next = self.parent[cursor];
            self.parent[cursor] = root;
            cursor = next;
        }
        root
    }

    /// Representative of `index` without mutating the structure.
    pub fn root(&self, index: usize) -> usize {
        let mut cursor = index;
        while self.parent[cursor] != cursor {
            cursor = self.parent[cursor];
        }
        cursor
    }

    pub fn is_representative(&self, index: usize) -> bool {
        self.parent[index] == index
    }

    /// Redirects `child` (and everything already merged into it) to
    /// `parent`'s representative.
    pub fn merge(&mut self, child: usize, parent: usize) -> Result<MergeOutcome, MergeConflict> {
        if child == parent {
            return Err(MergeConflict::Cycle);
        }
        let child_root = self.find(child);
        let parent_root = self.find(parent);

        if child_root == parent_root {
            return if child_root == child {
                Err(MergeConflict::Cycle)
            } else {
                Ok(MergeOutcome::Redundant)
            };
        }
        if child_root != child {
            return Err(MergeConflict::Retargeted {
                current: child_root,
            });
        }

        self.parent[child] = parent_root;
        Ok(MergeOutcome::Merged)
    }
}
