use super::ByteWriter;
use crate::collision::{CollisionModel, Solid};

/// Bytes in the fixed collision file header.
pub const PHY_HEADER_SIZE: usize = 16;

/// Serializes one solid's convex pieces.
///
/// Layout: `convex_count u32, mass_center f32x3`, then per convex
/// `vertex_count u32, triangle_count u32, vertices f32x3.., triangles u16x3..`.
pub fn solid_blob(solid: &Solid) -> Vec<u8> {
    let mut blob = ByteWriter::new();
    blob.u32(solid.hulls.len() as u32);
    blob.vec3(solid.mass_center.into());
    for hull in &solid.hulls {
        blob.u32(hull.vertices.len() as u32);
        blob.u32(hull.triangles.len() as u32);
        for vertex in &hull.vertices {
            blob.vec3((*vertex).into());
        }
        for triangle in &hull.triangles {
            for index in triangle {
                blob.u16(*index);
            }
        }
    }
    blob.into_bytes()
}

/// Writes the complete collision file: header, per solid blobs, the key/value
/// text section and a terminating NUL.
///
/// # Arguments
///
/// * `model` - Collision model with masses already distributed.
/// * `checksum` - Checksum shared with the animation file.
///
/// # Returns
///
/// The file contents.
pub fn encode_collision(model: &CollisionModel, checksum: i32) -> Vec<u8> {
    let mut out = ByteWriter::new();
    out.i32(PHY_HEADER_SIZE as i32);
    out.i32(0);
    out.i32(model.solids.len() as i32);
    out.i32(checksum);

    for solid in &model.solids {
        let blob = solid_blob(solid);
        out.i32(blob.len() as i32);
        out.bytes(&blob);
    }

    out.bytes(key_values(model).as_bytes());
    out.u8(0);
    tracing::debug!(
        "collision file: {} solids, {} bytes",
        model.solids.len(),
        out.len()
    );
    out.into_bytes()
}

fn key(text: &mut String, name: &str, value: impl std::fmt::Display) {
    text.push_str(&format!("\"{name}\" \"{value}\"\n"));
}

fn key_float(text: &mut String, name: &str, value: f32) {
    key(text, name, format_args!("{value:.6}"));
}

fn key_values(model: &CollisionModel) -> String {
    let mut text = String::new();

    for (index, solid) in model.solids.iter().enumerate() {
        text.push_str("solid {\n");
        key(&mut text, "index", index);
        key(&mut text, "name", &solid.name);
        if let Some(parent) = solid.parent {
            key(&mut text, "parent", &model.solids[parent].name);
        }
        key_float(&mut text, "mass", solid.mass);
        key(&mut text, "surfaceprop", &solid.surface_prop);
        key_float(&mut text, "damping", solid.damping);
        key_float(&mut text, "rotdamping", solid.rotdamping);
        if let Some(drag) = solid.drag {
            key_float(&mut text, "drag", drag);
        }
        key_float(&mut text, "inertia", solid.inertia);
        key_float(&mut text, "volume", solid.volume);
        if solid.mass_bias != 1.0 {
            key_float(&mut text, "massbias", solid.mass_bias);
        }
        text.push_str("}\n");
    }

    for constraint in &model.constraints {
        if constraint.parent == constraint.child {
            continue;
        }
        text.push_str("ragdollconstraint {\n");
        key(&mut text, "parent", constraint.parent);
        key(&mut text, "child", constraint.child);
        for (axis, limit) in ["x", "y", "z"].iter().zip(&constraint.axes) {
            key_float(&mut text, &format!("{axis}min"), limit.min);
            key_float(&mut text, &format!("{axis}max"), limit.max);
            key_float(&mut text, &format!("{axis}friction"), limit.friction);
        }
        text.push_str("}\n");
    }

    if !model.rules.self_collisions {
        text.push_str("collisionrules {\n");
        key(&mut text, "selfcollisions", 0);
        text.push_str("}\n");
    } else if !model.rules.pairs.is_empty() {
        text.push_str("collisionrules {\n");
        for (a, b) in &model.rules.pairs {
            key(&mut text, "collisionpair", format_args!("{a},{b}"));
        }
        text.push_str("}\n");
    }

    if let Some(friction) = &model.animated_friction {
        text.push_str("animatedfriction {\n");
        key_float(&mut text, "animfrictionmin", friction.min);
        key_float(&mut text, "animfrictionmax", friction.max);
        key_float(&mut text, "animfrictiontimein", friction.time_in);
        key_float(&mut text, "animfrictiontimeout", friction.time_out);
        key_float(&mut text, "animfrictiontimehold", friction.time_hold);
        text.push_str("}\n");
    }

    text.push_str("editparams {\n");
    key(&mut text, "rootname", &model.edit.root_name);
    key_float(&mut text, "totalmass", model.edit.total_mass);
    if model.edit.concave {
        key(&mut text, "concave", 1);
    }
    for (parent, child) in &model.edit.merges {
        key(&mut text, "jointmerge", format_args!("{parent},{child}"));
    }
    text.push_str("}\n");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{AxisLimit, CollisionRules, EditParams, RagdollConstraint};
    use crate::emit::ByteReader;
    use crate::geometry::build_hull;
    use crate::project::{AnimatedFriction, CollisionMode};
    use nalgebra::Vector3;

    fn cube_solid(name: &str, parent: Option<usize>) -> Solid {
        let corners: Vec<Vector3<f32>> = (0..8)
            .map(|i| Vector3::new((i & 1) as f32, ((i >> 1) & 1) as f32, ((i >> 2) & 1) as f32))
            .collect();
        let hull = build_hull(&corners).expect("cube hull");
        Solid {
            name: name.to_string(),
            joint: Some(0),
            parent,
            volume: hull.volume,
            area: hull.area,
            mass_center: hull.centroid,
            hulls: vec![hull],
            mass: 10.0,
            surface_prop: "metal".to_string(),
            damping: 0.0,
            rotdamping: 0.5,
            inertia: 1.0,
            drag: None,
            mass_bias: 1.0,
        }
    }

    fn model() -> CollisionModel {
        let mut child = cube_solid("arm", Some(0));
        child.drag = Some(0.25);
        child.mass_bias = 2.0;
        CollisionModel {
            mode: CollisionMode::Jointed,
            solids: vec![cube_solid("torso", None), child],
            constraints: vec![
                RagdollConstraint {
                    parent: 0,
                    child: 1,
                    axes: [
                        AxisLimit { min: -30.0, max: 45.0, friction: 0.2 },
                        AxisLimit::FIXED,
                        AxisLimit::FIXED,
                    ],
                },
                RagdollConstraint { parent: 1, child: 1, axes: [AxisLimit::FIXED; 3] },
            ],
            rules: CollisionRules { self_collisions: true, pairs: vec![(0, 1)] },
            animated_friction: Some(AnimatedFriction {
                min: 0.0,
                max: 5.0,
                time_in: 0.5,
                time_out: 0.5,
                time_hold: 1.0,
            }),
            edit: EditParams {
                root_name: "torso".to_string(),
                total_mass: 20.0,
                concave: true,
                merges: vec![("torso".to_string(), "belly".to_string())],
            },
        }
    }

    #[test]
    fn given_model_when_encoded_then_header_and_blobs_are_framed() {
        let model = model();
        let bytes = encode_collision(&model, 0x1234_5678);

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.i32(), Some(16));
        assert_eq!(reader.i32(), Some(0));
        assert_eq!(reader.i32(), Some(2));
        assert_eq!(reader.i32(), Some(0x1234_5678));
        for solid in &model.solids {
            let size = reader.i32().expect("blob size") as usize;
            assert_eq!(size, solid_blob(solid).len());
            let mut blob = ByteReader::new(reader.take(size).expect("blob"));
            assert_eq!(blob.u32(), Some(1));
            blob.vec3().expect("mass center");
            assert_eq!(blob.u32(), Some(8));
            assert_eq!(blob.u32(), Some(12));
        }
        assert_eq!(bytes.last(), Some(&0));
    }

    #[test]
    fn given_model_when_encoded_then_text_section_lists_solids_constraints_and_rules() {
        let text = key_values(&model());

        assert!(text.starts_with("solid {\n\"index\" \"0\"\n\"name\" \"torso\"\n"));
        assert!(text.contains("\"parent\" \"torso\"\n\"mass\" \"10.000000\""));
        assert!(text.contains("\"surfaceprop\" \"metal\""));
        assert!(text.contains("\"drag\" \"0.250000\""));
        assert!(text.contains("\"massbias\" \"2.000000\""));
        assert_eq!(text.matches("massbias").count(), 1);
        assert_eq!(text.matches("ragdollconstraint").count(), 1);
        assert!(text.contains("\"xmin\" \"-30.000000\"\n\"xmax\" \"45.000000\"\n\"xfriction\" \"0.200000\""));
        assert!(text.contains("\"collisionpair\" \"0,1\""));
        assert!(text.contains("\"animfrictionmax\" \"5.000000\""));
        assert!(text.ends_with(
            "editparams {\n\"rootname\" \"torso\"\n\"totalmass\" \"20.000000\"\n\"concave\" \"1\"\n\"jointmerge\" \"torso,belly\"\n}\n"
        ));
    }

    #[test]
    fn given_self_collisions_disabled_when_encoded_then_pairs_are_not_written() {
        let mut model = model();
        model.rules.self_collisions = false;

        let text = key_values(&model);

        assert!(text.contains("collisionrules {\n\"selfcollisions\" \"0\"\n}\n"));
        assert!(!text.contains("collisionpair"));
    }
}
