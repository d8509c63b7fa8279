use std::collections::HashSet;

use super::{Solid, check_piece_budget, hull_pieces};
use crate::error::{CompileError, CompileResult};
use crate::geometry::TriangleSoup;
use crate::logging::Diagnostics;
use crate::project::CollisionSection;
use crate::skeleton::{GlobalBoneTable, JointId};
use crate::source::Source;

/// One solid per joint that ends up owning geometry, in table order.
pub(super) fn build_jointed_solids(
    section: &CollisionSection,
    table: &GlobalBoneTable,
    source: &Source,
    source_index: usize,
    diagnostics: &mut Diagnostics,
) -> CompileResult<Vec<Solid>> {
    let skipped = skipped_joints(section, table)?;
    let owners = vertex_owners(table, source, source_index, &skipped);

    let mut solids = Vec::new();
    for joint in 0..table.len() {
        if skipped.contains(&joint) {
            continue;
        }
        let soup = joint_soup(table, source, &owners, joint);
        if soup.faces.is_empty() {
            continue;
        }

        let name = table.name(joint);
        let hulls = hull_pieces(name, &soup, section.concave, section)?;
        if hulls.is_empty() {
            tracing::debug!("{name}: no collision pieces, joint pruned from the body");
            continue;
        }
        check_piece_budget(name, hulls.len(), section, diagnostics)?;
        tracing::debug!("{name}: {} convex pieces", hulls.len());
        solids.push(Solid::new(name.to_string(), Some(joint), hulls));
    }
    Ok(solids)
}

fn skipped_joints(section: &CollisionSection, table: &GlobalBoneTable) -> CompileResult<HashSet<JointId>> {
    section
        .joint_skip
        .iter()
        .map(|name| {
            table.resolve_name(name).ok_or_else(|| CompileError::UnresolvedBone {
                name: name.clone(),
                context: "collision joint skip list".to_string(),
            })
        })
        .collect()
}

/// Joint each vertex belongs to. Skipped joints hand their vertices to the
/// nearest ancestor that is not skipped.
fn vertex_owners(
    table: &GlobalBoneTable,
    source: &Source,
    source_index: usize,
    skipped: &HashSet<JointId>,
) -> Vec<Option<JointId>> {
    source
        .vertices
        .iter()
        .map(|vertex| {
            let mut joint = table.vertex_joint(source_index, vertex).unwrap_or(0);
            while skipped.contains(&joint) {
                joint = table.parent(joint)?;
            }
            Some(joint)
        })
        .collect()
}

/// Faces touching `joint`, expressed in that joint's bone space.
fn joint_soup(
    table: &GlobalBoneTable,
    source: &Source,
    owners: &[Option<JointId>],
    joint: JointId,
) -> TriangleSoup {
    let world = table.joint(joint).world;
    let mut remap = vec![usize::MAX; source.vertices.len()];
    let mut soup = TriangleSoup::default();

    for mesh in &source.meshes {
        for face in &mesh.faces {
            if !face.iter().any(|vertex| owners[*vertex] == Some(joint)) {
                continue;
            }
            let local = face.map(|vertex| {
                if remap[vertex] == usize::MAX {
                    remap[vertex] = soup.positions.len();
                    let source_vertex = &source.vertices[vertex];
                    soup.positions
                        .push(world.inverse_transform_point(&source_vertex.position.into()).coords);
                    soup.normals
                        .push(world.rotation.inverse_transform_vector(&source_vertex.normal));
                }
                remap[vertex]
            });
            soup.faces.push(local);
        }
    }
    soup
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::tests::{diagnostics, push_box};
    use crate::project::SkeletonSection;
    use crate::skeleton::resolve;
    use crate::source::tests::{bone, source};

    fn arm() -> Source {
        let mut src = source(
            "arm",
            vec![
                bone("shoulder", None, [0.0, 0.0, 50.0]),
                bone("elbow", Some(0), [10.0, 0.0, 0.0]),
                bone("hand", Some(1), [10.0, 0.0, 0.0]),
            ],
        );
        push_box(&mut src, [0.0, -2.0, 48.0], [9.0, 2.0, 52.0], 0);
        push_box(&mut src, [10.0, -2.0, 48.0], [19.0, 2.0, 52.0], 1);
        push_box(&mut src, [20.0, -2.0, 48.0], [24.0, 2.0, 52.0], 2);
        src
    }

    #[test]
    fn given_joint_geometry_when_building_then_hulls_are_in_bone_space() {
        let src = arm();
        let table = resolve(std::slice::from_ref(&src), &SkeletonSection::default(), &[]).expect("table");

        let solids = build_jointed_solids(&CollisionSection::default(), &table, &src, 0, &mut diagnostics())
            .expect("solids");

        assert_eq!(solids.len(), 3);
        let elbow = &solids[1];
        assert_eq!(elbow.name, "elbow");
        // Elbow sits at x = 10, z = 50 in model space.
        assert!((elbow.mass_center.x - 4.5).abs() < 1e-3);
        assert!(elbow.mass_center.z.abs() < 1e-3);
    }

    #[test]
    fn given_skipped_joint_when_building_then_its_geometry_joins_the_parent() {
        let src = arm();
        let table = resolve(std::slice::from_ref(&src), &SkeletonSection::default(), &[]).expect("table");
        let section = CollisionSection {
            joint_skip: vec!["hand".into()],
            ..Default::default()
        };

        let solids = build_jointed_solids(&section, &table, &src, 0, &mut diagnostics()).expect("solids");

        assert_eq!(solids.len(), 2);
        assert_eq!(solids[1].hulls.len(), 2);
    }

    #[test]
    fn given_non_concave_joint_when_building_then_one_hull_wraps_all_islands() {
        let src = arm();
        let table = resolve(std::slice::from_ref(&src), &SkeletonSection::default(), &[]).expect("table");
        let section = CollisionSection {
            concave: false,
            joint_skip: vec!["hand".into()],
            ..Default::default()
        };

        let solids = build_jointed_solids(&section, &table, &src, 0, &mut diagnostics()).expect("solids");

        assert_eq!(solids[1].hulls.len(), 1);
        assert!((solids[1].volume - 14.0 * 4.0 * 4.0).abs() < 1e-2);
    }

    #[test]
    fn given_more_islands_than_budget_when_building_then_joint_is_costly() {
        let src = arm();
        let table = resolve(std::slice::from_ref(&src), &SkeletonSection::default(), &[]).expect("table");
        let strict = CollisionSection {
            max_convex: 1,
            joint_skip: vec!["hand".into()],
            ..Default::default()
        };

        let err = build_jointed_solids(&strict, &table, &src, 0, &mut diagnostics()).expect_err("costly");
        assert!(matches!(err, CompileError::CostlyCollisionModel { pieces: 2, allowed: 1, .. }));

        let relaxed = CollisionSection { allow_costly: true, ..strict };
        let mut diag = diagnostics();
        build_jointed_solids(&relaxed, &table, &src, 0, &mut diag).expect("demoted");
        assert_eq!(diag.warning_count(), 1);
    }
}
