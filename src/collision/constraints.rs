use super::{Solid, solid_for_joint};
use crate::error::{CompileError, CompileResult};
use crate::project::{ConstraintEntry, ConstraintKind};
use crate::skeleton::GlobalBoneTable;

/// Rotational range of one axis, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimit {
    pub min: f32,
    pub max: f32,
    pub friction: f32,
}

/// Script friction is authored five times larger than the stored value.
const FRICTION_SCALE: f32 = 1.0 / 5.0;

impl AxisLimit {
    pub const FIXED: AxisLimit = AxisLimit {
        min: 0.0,
        max: 0.0,
        friction: 0.0,
    };

    fn from_entry(entry: &ConstraintEntry) -> Self {
        match entry.kind {
            ConstraintKind::Free => AxisLimit {
                min: -360.0,
                max: 360.0,
                friction: entry.friction * FRICTION_SCALE,
            },
            ConstraintKind::Fixed => AxisLimit::FIXED,
            ConstraintKind::Limit => AxisLimit {
                min: entry.min,
                max: entry.max,
                friction: entry.friction * FRICTION_SCALE,
            },
        }
    }
}

/// Limits between a child solid and its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct RagdollConstraint {
    pub parent: usize,
    pub child: usize,
    pub axes: [AxisLimit; 3],
}

/// One constraint per parent/child solid edge, in child order. Axes without
/// an entry stay fixed.
pub(super) fn build_constraints(
    entries: &[ConstraintEntry],
    solids: &[Solid],
    table: &GlobalBoneTable,
    root_name: &str,
) -> CompileResult<Vec<RagdollConstraint>> {
    let mut axes = vec![[AxisLimit::FIXED; 3]; solids.len()];

    for entry in entries {
        if entry.kind == ConstraintKind::Limit && entry.min > entry.max {
            return Err(CompileError::InvalidConstraint {
                joint: entry.joint.clone(),
                reason: format!("min {} is greater than max {}", entry.min, entry.max),
            });
        }
        let joint = table
            .resolve_name(&entry.joint)
            .ok_or_else(|| CompileError::UnresolvedBone {
                name: entry.joint.clone(),
                context: "a joint constraint".to_string(),
            })?;
        let solid = solid_for_joint(solids, table, joint).ok_or_else(|| {
            CompileError::InvalidConstraint {
                joint: entry.joint.clone(),
                reason: "no collision solid on this joint or its ancestors".to_string(),
            }
        })?;

        if solids[solid].parent.is_none() {
            if solids[solid].name.eq_ignore_ascii_case(root_name) {
                tracing::debug!("constraint on root solid \"{}\" ignored", solids[solid].name);
                continue;
            }
            return Err(CompileError::InvalidConstraint {
                joint: entry.joint.clone(),
                reason: format!("solid \"{}\" has no parent to constrain against", solids[solid].name),
            });
        }
        axes[solid][entry.axis.index()] = AxisLimit::from_entry(entry);
    }

    let constraints = solids
        .iter()
        .enumerate()
        .filter_map(|(child, solid)| {
            let parent = solid.parent?;
            if parent == child {
                tracing::debug!("skipping self constraint on \"{}\"", solid.name);
                return None;
            }
            Some(RagdollConstraint {
                parent,
                child,
                axes: axes[child],
            })
        })
        .collect();
    Ok(constraints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ConstraintAxis, SkeletonSection};
    use crate::skeleton::resolve;
    use crate::source::tests::{bone, rigid_vertex, source};

    fn chain() -> (GlobalBoneTable, Vec<Solid>) {
        let mut src = source(
            "chain",
            vec![
                bone("a", None, [0.0; 3]),
                bone("b", Some(0), [5.0, 0.0, 0.0]),
                bone("c", Some(1), [5.0, 0.0, 0.0]),
            ],
        );
        for index in 0..3 {
            src.vertices.push(rigid_vertex([index as f32 * 5.0, 0.0, 0.0], index));
        }
        let table = resolve(&[src], &SkeletonSection::default(), &[]).expect("table");
        let solids = (0..3)
            .map(|joint| {
                let mut solid = Solid::new(table.name(joint).to_string(), Some(joint), Vec::new());
                solid.parent = joint.checked_sub(1);
                solid
            })
            .collect();
        (table, solids)
    }

    fn entry(joint: &str, axis: ConstraintAxis, kind: ConstraintKind, min: f32, max: f32) -> ConstraintEntry {
        ConstraintEntry {
            joint: joint.to_string(),
            axis,
            kind,
            min,
            max,
            friction: 1.0,
        }
    }

    #[test]
    fn given_entries_when_building_then_kinds_map_to_limits() {
        let (table, solids) = chain();
        let entries = vec![
            entry("b", ConstraintAxis::X, ConstraintKind::Free, 0.0, 0.0),
            entry("c", ConstraintAxis::Z, ConstraintKind::Limit, -20.0, 80.0),
        ];

        let constraints = build_constraints(&entries, &solids, &table, "a").expect("constraints");

        assert_eq!(constraints.len(), 2);
        assert_eq!((constraints[0].parent, constraints[0].child), (0, 1));
        assert_eq!(constraints[0].axes[0], AxisLimit { min: -360.0, max: 360.0, friction: 0.2 });
        assert_eq!(constraints[0].axes[1], AxisLimit::FIXED);
        assert_eq!(constraints[1].axes[2], AxisLimit { min: -20.0, max: 80.0, friction: 0.2 });
    }

    #[test]
    fn given_inverted_limit_when_building_then_constraint_is_invalid() {
        let (table, solids) = chain();
        let entries = vec![entry("b", ConstraintAxis::Y, ConstraintKind::Limit, 10.0, -10.0)];

        let err = build_constraints(&entries, &solids, &table, "a").expect_err("inverted");
        assert!(matches!(err, CompileError::InvalidConstraint { .. }));
    }

    #[test]
    fn given_parentless_solids_when_constraining_then_only_root_is_tolerated() {
        let (table, mut solids) = chain();
        let on_root = vec![entry("a", ConstraintAxis::X, ConstraintKind::Free, 0.0, 0.0)];
        assert!(build_constraints(&on_root, &solids, &table, "a").is_ok());

        solids[2].parent = None;
        let orphan = vec![entry("c", ConstraintAxis::X, ConstraintKind::Free, 0.0, 0.0)];
        let err = build_constraints(&orphan, &solids, &table, "a").expect_err("orphan");
        assert!(matches!(err, CompileError::InvalidConstraint { .. }));
    }

    #[test]
    fn given_collapsed_self_edge_when_building_then_it_is_skipped() {
        let (table, mut solids) = chain();
        solids[1].parent = Some(1);

        let constraints = build_constraints(&[], &solids, &table, "a").expect("constraints");

        assert!(constraints.iter().all(|c| c.parent != c.child));
        assert_eq!(constraints.len(), 1);
    }
}
