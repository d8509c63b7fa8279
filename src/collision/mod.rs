//! Collision model builder: decomposes source geometry into convex solids,
//! assigns physical properties and links jointed solids with ragdoll
//! constraints.

mod constraints;
mod jointed;
mod mass;
mod single_body;

use std::collections::HashSet;

use nalgebra::Vector3;

use crate::error::{CompileError, CompileResult};
use crate::geometry::{
    ConvexHull, MIN_PIECE_VERTICES, TriangleSoup, bounding_extents, build_hull, connected_pieces,
    is_near_planar, weld_vertices,
};
use crate::logging::Diagnostics;
use crate::project::{AnimatedFriction, CollisionMode, CollisionSection};
use crate::skeleton::{GlobalBoneTable, JointId, nearest_ancestor, parent_first_order};
use crate::source::Source;

pub use constraints::{AxisLimit, RagdollConstraint};
pub use mass::{density_for, distribute_mass, CUBIC_INCHES_TO_METERS};

/// Elongation ratio beyond which a solid's spin is fully damped.
const ELONGATED_RATIO: f32 = 9.0;

/// One rigid collision body made of convex pieces.
#[derive(Debug, Clone)]
pub struct Solid {
    pub name: String,
    /// Joint the solid moves with. `None` only when the table is empty.
    pub joint: Option<JointId>,
    /// Index of the parent solid after ordering.
    pub parent: Option<usize>,
    pub hulls: Vec<ConvexHull>,
    pub volume: f32,
    pub area: f32,
    pub mass_center: Vector3<f32>,
    pub mass: f32,
    pub surface_prop: String,
    pub damping: f32,
    pub rotdamping: f32,
    pub inertia: f32,
    pub drag: Option<f32>,
    pub mass_bias: f32,
}

impl Solid {
    fn new(name: String, joint: Option<JointId>, hulls: Vec<ConvexHull>) -> Self {
        let volume: f32 = hulls.iter().map(|hull| hull.volume).sum();
        let area = hulls.iter().map(|hull| hull.area).sum();
        let mass_center = if volume > 0.0 {
            hulls
                .iter()
                .map(|hull| hull.centroid * hull.volume)
                .sum::<Vector3<f32>>()
                / volume
        } else {
            Vector3::zeros()
        };
        Self {
            name,
            joint,
            parent: None,
            hulls,
            volume,
            area,
            mass_center,
            mass: 0.0,
            surface_prop: String::new(),
            damping: 0.0,
            rotdamping: 0.0,
            inertia: 1.0,
            drag: None,
            mass_bias: 1.0,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.hulls.iter().map(|hull| hull.vertices.len()).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollisionRules {
    pub self_collisions: bool,
    /// Solid index pairs allowed to collide with each other.
    pub pairs: Vec<(usize, usize)>,
}

/// Authoring data written back for round-tripping through the editor.
#[derive(Debug, Clone, Default)]
pub struct EditParams {
    pub root_name: String,
    pub total_mass: f32,
    pub concave: bool,
    /// `(parent, child)` merge directives.
    pub merges: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct CollisionModel {
    pub mode: CollisionMode,
    /// Ordered parent-first.
    pub solids: Vec<Solid>,
    pub constraints: Vec<RagdollConstraint>,
    pub rules: CollisionRules,
    pub animated_friction: Option<AnimatedFriction>,
    pub edit: EditParams,
}

impl CollisionModel {
    pub fn piece_count(&self) -> usize {
        self.solids.iter().map(|solid| solid.hulls.len()).sum()
    }
}

/// Solid moving with `joint`, or with its nearest ancestor owning one.
pub(crate) fn solid_for_joint(
    solids: &[Solid],
    table: &GlobalBoneTable,
    joint: JointId,
) -> Option<usize> {
    let owner = |candidate: JointId| solids.iter().position(|solid| solid.joint == Some(candidate));
    owner(joint).or_else(|| {
        nearest_ancestor(joint, &table.parents(), |candidate| owner(candidate).is_some())
            .and_then(owner)
    })
}

/// Builds the collision model for `sources[primary]` (plus any extra single
/// body contributions) against the resolved bone table.
pub fn build_collision_model(
    section: &CollisionSection,
    table: &GlobalBoneTable,
    sources: &[Source],
    primary: usize,
    diagnostics: &mut Diagnostics,
) -> CompileResult<CollisionModel> {
    let source = sources.get(primary).ok_or_else(|| {
        CompileError::Internal(format!("collision source index {primary} out of range"))
    })?;

    let solids = match section.mode {
        CollisionMode::Jointed => {
            jointed::build_jointed_solids(section, table, source, primary, diagnostics)?
        }
        CollisionMode::SingleBody => {
            vec![single_body::build_single_body(section, table, sources, primary, diagnostics)?]
        }
    };
    if solids.is_empty() {
        return Err(CompileError::DegenerateHull {
            owner: source.id.clone(),
        });
    }

    let mut solids = order_solids(solids, table)?;
    for solid in &mut solids {
        apply_defaults(solid, section);
    }
    apply_joint_overrides(&mut solids, section, table, diagnostics)?;

    let total_mass = if section.automass {
        mass::automass_total(&solids, section)
    } else {
        section.total_mass
    };
    distribute_mass(&mut solids, total_mass);

    let root_name = match &section.root_bone {
        Some(name) => name.clone(),
        None => solids[0].name.clone(),
    };
    let constraints =
        constraints::build_constraints(&section.constraints, &solids, table, &root_name)?;
    let rules = collision_rules(section, &solids, table, diagnostics);

    let model = CollisionModel {
        mode: section.mode,
        solids,
        constraints,
        rules,
        animated_friction: section.animated_friction.clone(),
        edit: EditParams {
            root_name,
            total_mass,
            concave: section.concave,
            merges: table
                .merges()
                .map(|(parent, child)| (parent.to_string(), child.to_string()))
                .collect(),
        },
    };
    tracing::info!(
        "{}: collision model has {} solids, {} convex pieces, {} constraints",
        diagnostics.asset(),
        model.solids.len(),
        model.piece_count(),
        model.constraints.len()
    );
    Ok(model)
}

// ─── Pieces ───────────────────────────────────────────────────────────────────

/// Hulls one owner's geometry. With `concave` each welded island becomes its
/// own piece, otherwise every referenced vertex goes into a single piece.
fn hull_pieces(
    owner: &str,
    soup: &TriangleSoup,
    concave: bool,
    section: &CollisionSection,
) -> CompileResult<Vec<ConvexHull>> {
    let pieces = if concave {
        let weld = weld_vertices(soup, section.weld_position, section.weld_normal);
        connected_pieces(soup, &weld)
    } else {
        vec![soup.referenced_positions()]
    };

    let mut hulls = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if piece.len() < MIN_PIECE_VERTICES {
            continue;
        }
        if is_near_planar(&piece) {
            if section.remove_2d {
                tracing::debug!("{owner}: dropping 2-D piece of {} vertices", piece.len());
                continue;
            }
            return Err(CompileError::NearPlanar {
                owner: owner.to_string(),
            });
        }
        let hull = build_hull(&piece).ok_or_else(|| CompileError::DegenerateHull {
            owner: owner.to_string(),
        })?;
        hulls.push(hull);
    }
    Ok(hulls)
}

/// Fails when `pieces` exceeds the budget, unless costly models are allowed.
fn check_piece_budget(
    owner: &str,
    pieces: usize,
    section: &CollisionSection,
    diagnostics: &mut Diagnostics,
) -> CompileResult<()> {
    if pieces <= section.max_convex {
        return Ok(());
    }
    let error = CompileError::CostlyCollisionModel {
        owner: owner.to_string(),
        pieces,
        allowed: section.max_convex,
    };
    if section.allow_costly {
        diagnostics.demote(&error);
        Ok(())
    } else {
        Err(error)
    }
}

// ─── Properties ───────────────────────────────────────────────────────────────

fn apply_defaults(solid: &mut Solid, section: &CollisionSection) {
    solid.surface_prop = section.surface_prop.clone();
    solid.damping = section.damping;
    solid.rotdamping = section.rotdamping;
    solid.inertia = section.inertia;
    solid.drag = section.drag;
    solid.mass_bias = section.mass_bias;
    if let Some(center) = section.mass_center {
        solid.mass_center = Vector3::from(center);
    }

    let points: Vec<Vector3<f32>> = solid
        .hulls
        .iter()
        .flat_map(|hull| hull.vertices.iter().copied())
        .collect();
    if is_elongated(&bounding_extents(&points)) {
        solid.rotdamping = 1.0;
    }
}

/// True when the largest extent dwarfs the other two together.
fn is_elongated(extents: &Vector3<f32>) -> bool {
    let largest = extents.imax();
    let others: Vec<f32> = (0..3)
        .filter(|axis| *axis != largest)
        .map(|axis| extents[axis])
        .collect();
    let rest = (others[0] * others[0] + others[1] * others[1]).sqrt();
    rest > 0.0 && extents[largest] > ELONGATED_RATIO * rest
}

fn apply_joint_overrides(
    solids: &mut [Solid],
    section: &CollisionSection,
    table: &GlobalBoneTable,
    diagnostics: &mut Diagnostics,
) -> CompileResult<()> {
    for (name, overrides) in &section.joints {
        let joint = table
            .resolve_name(name)
            .ok_or_else(|| CompileError::UnresolvedBone {
                name: name.clone(),
                context: "collision joint overrides".to_string(),
            })?;
        let Some(solid) = solids.iter_mut().find(|solid| solid.joint == Some(joint)) else {
            diagnostics.warn(
                "override_without_solid",
                format!("joint \"{name}\" has overrides but no collision solid"),
            );
            continue;
        };
        if let Some(bias) = overrides.mass_bias {
            solid.mass_bias = bias;
        }
        if let Some(damping) = overrides.damping {
            solid.damping = damping;
        }
        if let Some(rotdamping) = overrides.rotdamping {
            solid.rotdamping = rotdamping;
        }
        if let Some(inertia) = overrides.inertia {
            solid.inertia = inertia;
        }
        if overrides.drag.is_some() {
            solid.drag = overrides.drag;
        }
        if let Some(surface) = &overrides.surface_prop {
            solid.surface_prop = surface.clone();
        }
    }
    Ok(())
}

// ─── Hierarchy ────────────────────────────────────────────────────────────────

/// Links each solid to the nearest ancestor joint owning a solid, then sorts
/// solids parent-first.
fn order_solids(solids: Vec<Solid>, table: &GlobalBoneTable) -> CompileResult<Vec<Solid>> {
    let parents = table.parents();
    let owned: Vec<Option<JointId>> = solids.iter().map(|solid| solid.joint).collect();
    let solid_of = |joint: JointId| owned.iter().position(|owner| *owner == Some(joint));

    let links: Vec<Option<usize>> = solids
        .iter()
        .map(|solid| {
            let joint = solid.joint?;
            nearest_ancestor(joint, &parents, |candidate| solid_of(candidate).is_some())
                .and_then(solid_of)
        })
        .collect();

    let order = parent_first_order(&links).map_err(|stuck| CompileError::CircularHierarchy {
        bone: solids[stuck].name.clone(),
    })?;
    let mut new_index = vec![0usize; solids.len()];
    for (position, old) in order.iter().enumerate() {
        new_index[*old] = position;
    }

    let mut slots: Vec<Option<Solid>> = solids.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(slots.len());
    for old in &order {
        let mut solid = slots[*old].take().ok_or_else(|| {
            CompileError::Internal("solid ordering visited a solid twice".to_string())
        })?;
        solid.parent = links[*old].map(|parent| new_index[parent]);
        ordered.push(solid);
    }
    Ok(ordered)
}

fn collision_rules(
    section: &CollisionSection,
    solids: &[Solid],
    table: &GlobalBoneTable,
    diagnostics: &mut Diagnostics,
) -> CollisionRules {
    let mut rules = CollisionRules {
        self_collisions: section.self_collisions,
        pairs: Vec::new(),
    };
    if !section.self_collisions {
        return rules;
    }

    let solid_named = |name: &str| {
        table
            .resolve_name(name)
            .and_then(|joint| solid_for_joint(solids, table, joint))
    };

    let mut seen = HashSet::new();
    for [first, second] in &section.collide_pairs {
        match (solid_named(first), solid_named(second)) {
            (Some(a), Some(b)) if a != b => {
                let pair = (a.min(b), a.max(b));
                if seen.insert(pair) {
                    rules.pairs.push(pair);
                }
            }
            _ => diagnostics.warn(
                "invalid_collision_pair",
                format!("collision pair \"{first}\", \"{second}\" does not name two solids"),
            ),
        }
    }
    rules
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::logging::Provenance;
    use crate::project::{ConstraintAxis, ConstraintEntry, ConstraintKind, SkeletonSection};
    use crate::skeleton::resolve;
    use crate::source::tests::{bone, source};
    use crate::source::{BoneWeight, SourceMesh, SourceVertex};

    /// Appends a closed box bound rigidly to `bone`, with shared corners.
    pub(crate) fn push_box(src: &mut Source, min: [f32; 3], max: [f32; 3], bone: usize) {
        let base = src.vertices.len();
        for index in 0..8 {
            let pick = |axis: usize| if index & (1 << axis) == 0 { min[axis] } else { max[axis] };
            src.vertices.push(SourceVertex {
                position: Vector3::new(pick(0), pick(1), pick(2)),
                normal: Vector3::z(),
                weights: vec![BoneWeight { bone, weight: 1.0 }],
            });
        }
        let quads = [
            [0, 2, 3, 1],
            [4, 5, 7, 6],
            [0, 1, 5, 4],
            [2, 6, 7, 3],
            [0, 4, 6, 2],
            [1, 3, 7, 5],
        ];
        let mut faces = Vec::new();
        for [a, b, c, d] in quads {
            faces.push([base + a, base + b, base + c]);
            faces.push([base + a, base + c, base + d]);
        }
        src.meshes.push(SourceMesh {
            name: format!("box{}", src.meshes.len()),
            material: None,
            faces,
        });
    }

    pub(crate) fn diagnostics() -> Diagnostics {
        Diagnostics::new("test_asset", Provenance::default())
    }

    fn ragdoll() -> Source {
        let mut src = source(
            "ragdoll",
            vec![
                bone("pelvis", None, [0.0, 0.0, 40.0]),
                bone("spine", Some(0), [0.0, 0.0, 10.0]),
                bone("head", Some(1), [0.0, 0.0, 20.0]),
            ],
        );
        push_box(&mut src, [-6.0, -4.0, 36.0], [6.0, 4.0, 48.0], 0);
        push_box(&mut src, [-5.0, -3.0, 50.0], [5.0, 3.0, 68.0], 1);
        push_box(&mut src, [-3.0, -3.0, 70.0], [3.0, 3.0, 76.0], 2);
        src
    }

    #[test]
    fn given_ragdoll_when_building_then_every_joint_gets_a_solid_and_an_edge() {
        let sources = vec![ragdoll()];
        let table = resolve(&sources, &SkeletonSection::default(), &[]).expect("table");
        let section = CollisionSection {
            total_mass: 90.0,
            constraints: vec![ConstraintEntry {
                joint: "head".into(),
                axis: ConstraintAxis::Y,
                kind: ConstraintKind::Limit,
                min: -30.0,
                max: 45.0,
                friction: 2.0,
            }],
            ..Default::default()
        };
        let mut diag = diagnostics();

        let model = build_collision_model(&section, &table, &sources, 0, &mut diag).expect("model");

        assert_eq!(model.solids.len(), 3);
        assert_eq!(model.solids[0].name, "pelvis");
        assert_eq!(model.solids[2].parent, Some(1));
        assert_eq!(model.constraints.len(), 2);
        for constraint in &model.constraints {
            assert_ne!(constraint.parent, constraint.child);
        }
        let head = &model.constraints[1];
        assert_eq!(head.axes[1], AxisLimit { min: -30.0, max: 45.0, friction: 2.0 });
        assert_eq!(head.axes[0], AxisLimit::FIXED);

        let total: f32 = model.solids.iter().map(|solid| solid.mass).sum();
        assert!((total - 90.0).abs() < 1e-2);
        assert!(model.solids[1].volume > model.solids[2].volume);
    }

    #[test]
    fn given_solid_far_longer_than_wide_when_building_then_rotdamping_is_forced() {
        let mut src = source("pole", vec![bone("root", None, [0.0; 3])]);
        push_box(&mut src, [0.0, 0.0, 0.0], [1.5, 1.5, 100.0], 0);
        let sources = vec![src];
        let table = resolve(&sources, &SkeletonSection::default(), &[]).expect("table");

        let model = build_collision_model(
            &CollisionSection::default(),
            &table,
            &sources,
            0,
            &mut diagnostics(),
        )
        .expect("model");

        assert_eq!(model.solids[0].rotdamping, 1.0);
        assert!(is_elongated(&Vector3::new(1.0, 1.0, 20.0)));
        assert!(!is_elongated(&Vector3::new(10.0, 10.0, 20.0)));
    }

    #[test]
    fn given_extents_with_no_width_when_checking_elongation_then_rotdamping_is_not_forced() {
        assert!(!is_elongated(&Vector3::new(0.0, 0.0, 20.0)));
        assert!(!is_elongated(&Vector3::zeros()));
    }

    #[test]
    fn given_pairs_naming_one_solid_twice_when_building_then_pair_is_warned_and_skipped() {
        let sources = vec![ragdoll()];
        let table = resolve(&sources, &SkeletonSection::default(), &[]).expect("table");
        let section = CollisionSection {
            collide_pairs: vec![
                ["pelvis".into(), "head".into()],
                ["spine".into(), "spine".into()],
                ["ghost".into(), "head".into()],
            ],
            ..Default::default()
        };
        let mut diag = diagnostics();

        let model = build_collision_model(&section, &table, &sources, 0, &mut diag).expect("model");

        assert_eq!(model.rules.pairs, vec![(0, 2)]);
        assert_eq!(diag.warning_count(), 2);
    }

    #[test]
    fn given_overrides_when_building_then_they_replace_defaults_on_that_solid() {
        let sources = vec![ragdoll()];
        let table = resolve(&sources, &SkeletonSection::default(), &[]).expect("table");
        let mut section = CollisionSection {
            damping: 0.1,
            ..Default::default()
        };
        section.joints.insert(
            "Spine".into(),
            crate::project::JointOverrides {
                damping: Some(0.8),
                surface_prop: Some("flesh".into()),
                ..Default::default()
            },
        );

        let model =
            build_collision_model(&section, &table, &sources, 0, &mut diagnostics()).expect("model");

        assert_eq!(model.solids[0].damping, 0.1);
        assert_eq!(model.solids[1].damping, 0.8);
        assert_eq!(model.solids[1].surface_prop, "flesh");
    }
}
