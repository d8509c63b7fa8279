use nalgebra::Vector3;

use super::{Solid, check_piece_budget, hull_pieces};
use crate::error::{CompileError, CompileResult};
use crate::geometry::TriangleSoup;
use crate::logging::Diagnostics;
use crate::project::CollisionSection;
use crate::skeleton::GlobalBoneTable;
use crate::source::Source;
use crate::transform::Pose;

struct Contribution {
    soup: TriangleSoup,
    concave: bool,
}

/// Merges the collision source and every extra contribution into one solid
/// attached to the root joint.
pub(super) fn build_single_body(
    section: &CollisionSection,
    table: &GlobalBoneTable,
    sources: &[Source],
    primary: usize,
    diagnostics: &mut Diagnostics,
) -> CompileResult<Solid> {
    let owner = sources[primary].id.as_str();
    let root = (!table.is_empty()).then_some(0);

    let mut contributions = vec![Contribution {
        soup: source_soup(table, &sources[primary], Vector3::zeros(), 1.0),
        concave: section.concave,
    }];
    for extra in &section.extra_sources {
        let source = sources
            .iter()
            .find(|source| source.id.eq_ignore_ascii_case(&extra.source))
            .ok_or_else(|| CompileError::InvalidDirective {
                reason: format!("extra collision source \"{}\" is not a declared source", extra.source),
            })?;
        contributions.push(Contribution {
            soup: source_soup(table, source, Vector3::from(extra.offset), extra.scale),
            concave: extra.concave,
        });
    }

    let mut hulls = Vec::new();
    if contributions.iter().any(|contribution| contribution.concave) {
        let mut concave = TriangleSoup::default();
        for contribution in contributions.iter().filter(|c| c.concave) {
            concave.append(&contribution.soup);
        }
        hulls = match hull_pieces(owner, &concave, true, section) {
            Ok(pieces) => pieces,
            Err(
                err @ (CompileError::NearPlanar { .. } | CompileError::DegenerateHull { .. }),
            ) => {
                tracing::debug!("{owner}: concave decomposition failed ({err}), using one hull");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        if !hulls.is_empty() {
            for contribution in contributions.iter().filter(|c| !c.concave) {
                hulls.extend(hull_pieces(owner, &contribution.soup, false, section)?);
            }
        } else {
            tracing::debug!("{owner}: concave decomposition produced no pieces");
        }
    }

    if hulls.is_empty() {
        let mut everything = TriangleSoup::default();
        for contribution in &contributions {
            everything.append(&contribution.soup);
        }
        hulls = hull_pieces(owner, &everything, false, section)?;
    }
    if hulls.is_empty() {
        return Err(CompileError::DegenerateHull {
            owner: owner.to_string(),
        });
    }

    check_piece_budget(owner, hulls.len(), section, diagnostics)?;
    tracing::debug!("{owner}: single body with {} convex pieces", hulls.len());
    Ok(Solid::new(owner.to_string(), root, hulls))
}

/// Every face of `source`, scaled then offset, in the root joint's space.
fn source_soup(table: &GlobalBoneTable, source: &Source, offset: Vector3<f32>, scale: f32) -> TriangleSoup {
    let root = if table.is_empty() {
        Pose::identity()
    } else {
        table.joint(0).world
    };
    let mut soup = TriangleSoup {
        positions: source
            .vertices
            .iter()
            .map(|vertex| {
                let model = vertex.position * scale + offset;
                root.inverse_transform_point(&model.into()).coords
            })
            .collect(),
        normals: source
            .vertices
            .iter()
            .map(|vertex| root.rotation.inverse_transform_vector(&vertex.normal))
            .collect(),
        faces: Vec::new(),
    };
    for mesh in &source.meshes {
        soup.faces.extend_from_slice(&mesh.faces);
    }
    soup
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::tests::{diagnostics, push_box};
    use crate::project::{ExtraCollisionSource, SkeletonSection};
    use crate::skeleton::resolve;
    use crate::source::tests::{bone, source};

    fn crates(count: usize) -> Source {
        let mut src = source("crates", vec![bone("root", None, [0.0; 3])]);
        for index in 0..count {
            let x = index as f32 * 10.0;
            push_box(&mut src, [x, 0.0, 0.0], [x + 4.0, 4.0, 4.0], 0);
        }
        src
    }

    fn section() -> CollisionSection {
        CollisionSection {
            mode: crate::project::CollisionMode::SingleBody,
            ..Default::default()
        }
    }

    #[test]
    fn given_concave_prop_when_building_then_each_island_is_a_piece() {
        let sources = vec![crates(3)];
        let table = resolve(&sources, &SkeletonSection::default(), &[]).expect("table");

        let solid = build_single_body(&section(), &table, &sources, 0, &mut diagnostics()).expect("solid");

        assert_eq!(solid.name, "crates");
        assert_eq!(solid.hulls.len(), 3);
        assert!((solid.volume - 3.0 * 64.0).abs() < 1e-2);
    }

    #[test]
    fn given_convex_only_prop_when_building_then_one_hull_covers_everything() {
        let sources = vec![crates(2)];
        let table = resolve(&sources, &SkeletonSection::default(), &[]).expect("table");
        let section = CollisionSection { concave: false, ..section() };

        let solid = build_single_body(&section, &table, &sources, 0, &mut diagnostics()).expect("solid");

        assert_eq!(solid.hulls.len(), 1);
        assert!((solid.volume - 14.0 * 16.0).abs() < 1e-2);
    }

    #[test]
    fn given_flat_island_in_concave_prop_when_building_then_one_hull_covers_everything() {
        let mut src = crates(2);
        push_box(&mut src, [0.0, 20.0, 0.0], [6.0, 26.0, 0.2], 0);
        let sources = vec![src];
        let table = resolve(&sources, &SkeletonSection::default(), &[]).expect("table");

        let solid = build_single_body(&section(), &table, &sources, 0, &mut diagnostics())
            .expect("fallback hull");

        assert_eq!(solid.hulls.len(), 1);
        assert!(solid.volume > 2.0 * 64.0);
    }

    #[test]
    fn given_extra_source_when_building_then_it_is_scaled_offset_and_hulled() {
        let mut sources = vec![crates(1)];
        let mut lid = source("lid", vec![bone("root", None, [0.0; 3])]);
        push_box(&mut lid, [0.0; 3], [1.0, 1.0, 1.0], 0);
        sources.push(lid);
        let table = resolve(&sources, &SkeletonSection::default(), &[]).expect("table");
        let section = CollisionSection {
            extra_sources: vec![ExtraCollisionSource {
                source: "lid".into(),
                offset: [0.0, 0.0, 10.0],
                scale: 2.0,
                concave: false,
            }],
            ..section()
        };

        let solid = build_single_body(&section, &table, &sources, 0, &mut diagnostics()).expect("solid");

        assert_eq!(solid.hulls.len(), 2);
        assert!((solid.hulls[1].volume - 8.0).abs() < 1e-3);
        assert!((solid.hulls[1].centroid.z - 11.0).abs() < 1e-3);
    }

    #[test]
    fn given_unknown_extra_source_when_building_then_directive_is_invalid() {
        let sources = vec![crates(1)];
        let table = resolve(&sources, &SkeletonSection::default(), &[]).expect("table");
        let section = CollisionSection {
            extra_sources: vec![ExtraCollisionSource {
                source: "missing".into(),
                offset: [0.0; 3],
                scale: 1.0,
                concave: true,
            }],
            ..section()
        };

        let err = build_single_body(&section, &table, &sources, 0, &mut diagnostics()).expect_err("unknown");
        assert!(matches!(err, CompileError::InvalidDirective { .. }));
    }
}
