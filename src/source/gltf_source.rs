use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use gltf::{
    Document,
    animation::{Interpolation, util::ReadOutputs},
    mesh::Mode,
};
use nalgebra::{Matrix4, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};

use super::{BoneWeight, DEFAULT_FPS, Source, SourceAnimation, SourceBone, SourceMesh, SourceVertex};
use crate::transform::{Pose, pose_from_matrix, relative_pose};

// ─── Node hierarchy helpers ───────────────────────────────────────────────────

/// Build a child→parent node-index map.
fn collect_parent_index_map(document: &Document) -> HashMap<usize, usize> {
    let mut parent_map = HashMap::new();
    for parent in document.nodes() {
        for child in parent.children() {
            parent_map.insert(child.index(), parent.index());
        }
    }
    parent_map
}

/// Compute node world matrices from local transforms and parent links.
fn compute_node_world_matrices(
    local_matrices: &[Matrix4<f32>],
    parent_map: &HashMap<usize, usize>,
) -> Vec<Matrix4<f32>> {
    let mut worlds = vec![Matrix4::<f32>::identity(); local_matrices.len()];
    let mut resolved = vec![false; local_matrices.len()];

    for index in 0..local_matrices.len() {
        resolve_world_matrix(index, local_matrices, parent_map, &mut worlds, &mut resolved);
    }

    worlds
}

fn resolve_world_matrix(
    index: usize,
    local_matrices: &[Matrix4<f32>],
    parent_map: &HashMap<usize, usize>,
    worlds: &mut [Matrix4<f32>],
    resolved: &mut [bool],
) {
    if resolved[index] {
        return;
    }

    let world = if let Some(parent_index) = parent_map.get(&index).copied() {
        resolve_world_matrix(parent_index, local_matrices, parent_map, worlds, resolved);
        worlds[parent_index] * local_matrices[index]
    } else {
        local_matrices[index]
    };

    worlds[index] = world;
    resolved[index] = true;
}

/// Nearest ancestor of `node` (inclusive) that is a bone.
fn nearest_bone(
    node: usize,
    parent_map: &HashMap<usize, usize>,
    bone_by_node: &HashMap<usize, usize>,
) -> Option<usize> {
    let mut cursor = Some(node);
    let mut steps = 0;
    while let Some(current) = cursor {
        if let Some(bone) = bone_by_node.get(&current) {
            return Some(*bone);
        }
        steps += 1;
        if steps > parent_map.len() + 1 {
            return None;
        }
        cursor = parent_map.get(&current).copied();
    }
    None
}

// ─── Loader ───────────────────────────────────────────────────────────────────

pub(super) fn load_gltf_source(path: &Path, id: &str) -> Result<Source> {
    let (document, buffers, _images) =
        gltf::import(path).with_context(|| format!("failed to load glTF: {}", path.display()))?;

    let parent_map = collect_parent_index_map(&document);
    let locals: Vec<Matrix4<f32>> = document
        .nodes()
        .map(|node| Matrix4::from(node.transform().matrix()))
        .collect();
    let worlds = compute_node_world_matrices(&locals, &parent_map);

    // Skin joints are the skeleton; a skinless file treats every node as a bone.
    let joint_nodes: Vec<usize> = match document.skins().next() {
        Some(skin) => skin.joints().map(|joint| joint.index()).collect(),
        None => document.nodes().map(|node| node.index()).collect(),
    };
    let bone_by_node: HashMap<usize, usize> = joint_nodes
        .iter()
        .enumerate()
        .map(|(bone, node)| (*node, bone))
        .collect();
    let node_names: Vec<Option<String>> = document
        .nodes()
        .map(|node| node.name().map(ToOwned::to_owned))
        .collect();

    let world_poses: Vec<Pose> = joint_nodes
        .iter()
        .map(|node| pose_from_matrix(&worlds[*node]))
        .collect();
    let bone_parents: Vec<Option<usize>> = joint_nodes
        .iter()
        .map(|node| {
            parent_map
                .get(node)
                .and_then(|parent| nearest_bone(*parent, &parent_map, &bone_by_node))
        })
        .collect();

    let bones: Vec<SourceBone> = joint_nodes
        .iter()
        .enumerate()
        .map(|(bone, node)| SourceBone {
            name: node_names[*node]
                .clone()
                .unwrap_or_else(|| format!("joint{node}")),
            parent: bone_parents[bone],
            rest: match bone_parents[bone] {
                Some(parent) => relative_pose(&world_poses[parent], &world_poses[bone]),
                None => world_poses[bone],
            },
        })
        .collect();

    let mut vertices = Vec::new();
    let mut meshes = Vec::new();
    for node in document.nodes() {
        let Some(mesh) = node.mesh() else {
            continue;
        };
        let skin_joints: Option<Vec<usize>> = node
            .skin()
            .map(|skin| skin.joints().map(|joint| joint.index()).collect());
        let node_world = worlds[node.index()];
        let normal_rotation = pose_from_matrix(&node_world).rotation;
        let rigid_bone = nearest_bone(node.index(), &parent_map, &bone_by_node).unwrap_or(0);

        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                tracing::debug!(
                    "skipping non-triangle primitive in mesh {:?} of {}",
                    mesh.name(),
                    path.display()
                );
                continue;
            }
            let reader =
                primitive.reader(|buffer| buffers.get(buffer.index()).map(|b| &b.0[..]));
            let Some(positions) = reader.read_positions() else {
                continue;
            };
            let positions: Vec<[f32; 3]> = positions.collect();
            let normals: Vec<[f32; 3]> = reader
                .read_normals()
                .map(|normals| normals.collect())
                .unwrap_or_default();
            let joints: Vec<[u16; 4]> = reader
                .read_joints(0)
                .map(|joints| joints.into_u16().collect())
                .unwrap_or_default();
            let weights: Vec<[f32; 4]> = reader
                .read_weights(0)
                .map(|weights| weights.into_f32().collect())
                .unwrap_or_default();

            let base = vertices.len();
            for (index, position) in positions.iter().enumerate() {
                let normal = normals.get(index).copied().unwrap_or([0.0; 3]);
                let vertex = match (&skin_joints, joints.get(index), weights.get(index)) {
                    (Some(skin), Some(slots), Some(lanes)) => SourceVertex {
                        position: Vector3::from(*position),
                        normal: Vector3::from(normal),
                        weights: slots
                            .iter()
                            .zip(lanes.iter())
                            .filter(|(_, weight)| **weight > 0.0)
                            .filter_map(|(slot, weight)| {
                                let node = skin.get(*slot as usize)?;
                                let bone = bone_by_node.get(node)?;
                                Some(BoneWeight {
                                    bone: *bone,
                                    weight: *weight,
                                })
                            })
                            .collect(),
                    },
                    _ => SourceVertex {
                        position: node_world
                            .transform_point(&Point3::from(*position))
                            .coords,
                        normal: normal_rotation * Vector3::from(normal),
                        weights: vec![BoneWeight {
                            bone: rigid_bone,
                            weight: 1.0,
                        }],
                    },
                };
                vertices.push(vertex);
            }

            let indices: Vec<usize> = match reader.read_indices() {
                Some(indices) => indices.into_u32().map(|i| base + i as usize).collect(),
                None => (base..base + positions.len()).collect(),
            };
            meshes.push(SourceMesh {
                name: mesh
                    .name()
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| format!("mesh{}", mesh.index())),
                material: primitive.material().name().map(ToOwned::to_owned),
                faces: indices
                    .chunks_exact(3)
                    .map(|face| [face[0], face[1], face[2]])
                    .collect(),
            });
        }
    }

    let rest_locals: Vec<Pose> = bones.iter().map(|bone| bone.rest).collect();
    let mut animations = Vec::new();
    for animation in document.animations() {
        let name = animation
            .name()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("anim{}", animation.index()));
        let frames = sample_animation(&animation, &buffers, &bone_by_node, &rest_locals);
        animations.push(SourceAnimation {
            name,
            fps: DEFAULT_FPS,
            frames,
        });
    }

    Ok(Source {
        id: id.to_string(),
        path: path.to_path_buf(),
        bones,
        vertices,
        meshes,
        animations,
    })
}

// ─── Animation sampling ───────────────────────────────────────────────────────

/// Samples every channel at `DEFAULT_FPS`, starting from the rest pose so
/// bones without channels hold their bind transform.
fn sample_animation(
    animation: &gltf::Animation,
    buffers: &[gltf::buffer::Data],
    bone_by_node: &HashMap<usize, usize>,
    rest_locals: &[Pose],
) -> Vec<Vec<Pose>> {
    let mut duration = 0.0f32;
    for channel in animation.channels() {
        let reader = channel.reader(|buffer| buffers.get(buffer.index()).map(|b| &b.0[..]));
        if let Some(inputs) = reader.read_inputs() {
            duration = inputs.fold(duration, f32::max);
        }
    }
    let frame_count = (duration * DEFAULT_FPS).round() as usize + 1;
    let mut frames = vec![rest_locals.to_vec(); frame_count];

    for channel in animation.channels() {
        let Some(bone) = bone_by_node.get(&channel.target().node().index()).copied() else {
            continue;
        };
        let interpolation = channel.sampler().interpolation();
        let reader = channel.reader(|buffer| buffers.get(buffer.index()).map(|b| &b.0[..]));
        let Some(times) = reader.read_inputs().map(|inputs| inputs.collect::<Vec<f32>>()) else {
            continue;
        };

        match reader.read_outputs() {
            Some(ReadOutputs::Translations(values)) => {
                let values = keyframe_values(values.collect(), interpolation);
                for (index, frame) in frames.iter_mut().enumerate() {
                    let t = index as f32 / DEFAULT_FPS;
                    let value = sample_vec3(&times, &values, t, interpolation);
                    frame[bone].translation = Translation3::from(value);
                }
            }
            Some(ReadOutputs::Rotations(values)) => {
                let values = keyframe_values(values.into_f32().collect(), interpolation);
                for (index, frame) in frames.iter_mut().enumerate() {
                    let t = index as f32 / DEFAULT_FPS;
                    frame[bone].rotation = sample_rotation(&times, &values, t, interpolation);
                }
            }
            _ => {}
        }
    }

    frames
}

/// Cubic-spline outputs store (in-tangent, value, out-tangent) triples.
fn keyframe_values<T: Copy>(values: Vec<T>, interpolation: Interpolation) -> Vec<T> {
    match interpolation {
        Interpolation::CubicSpline => values.chunks_exact(3).map(|chunk| chunk[1]).collect(),
        _ => values,
    }
}

/// Index of the keyframe segment containing `t` and the blend within it.
fn locate(times: &[f32], t: f32, interpolation: Interpolation) -> (usize, usize, f32) {
    let last = times.len().saturating_sub(1);
    if times.is_empty() || t <= times[0] {
        return (0, 0, 0.0);
    }
    if t >= times[last] {
        return (last, last, 0.0);
    }
    let mut i = 0;
    while i < last && times[i + 1] < t {
        i += 1;
    }
    let span = times[i + 1] - times[i];
    let blend = if span > 0.0 { (t - times[i]) / span } else { 0.0 };
    match interpolation {
        Interpolation::Step => (i, i, 0.0),
        _ => (i, i + 1, blend),
    }
}

fn sample_vec3(times: &[f32], values: &[[f32; 3]], t: f32, interpolation: Interpolation) -> Vector3<f32> {
    if values.is_empty() {
        return Vector3::zeros();
    }
    let (a, b, blend) = locate(times, t, interpolation);
    let a = Vector3::from(values[a.min(values.len() - 1)]);
    let b = Vector3::from(values[b.min(values.len() - 1)]);
    a.lerp(&b, blend)
}

fn sample_rotation(
    times: &[f32],
    values: &[[f32; 4]],
    t: f32,
    interpolation: Interpolation,
) -> UnitQuaternion<f32> {
    if values.is_empty() {
        return UnitQuaternion::identity();
    }
    let quat = |v: [f32; 4]| UnitQuaternion::from_quaternion(Quaternion::new(v[3], v[0], v[1], v[2]));
    let (a, b, blend) = locate(times, t, interpolation);
    let a = quat(values[a.min(values.len() - 1)]);
    let b = quat(values[b.min(values.len() - 1)]);
    a.try_slerp(&b, blend, 1.0e-6).unwrap_or(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_keyframes_when_sampling_between_them_then_values_are_interpolated() {
        let times = [0.0, 1.0];
        let values = [[0.0, 0.0, 0.0], [2.0, 4.0, 0.0]];

        let mid = sample_vec3(&times, &values, 0.5, Interpolation::Linear);
        assert!((mid - Vector3::new(1.0, 2.0, 0.0)).norm() < 1e-6);

        let held = sample_vec3(&times, &values, 0.5, Interpolation::Step);
        assert!(held.norm() < 1e-6);

        let past = sample_vec3(&times, &values, 3.0, Interpolation::Linear);
        assert!((past - Vector3::new(2.0, 4.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn given_quarter_turn_keys_when_sampling_midpoint_then_rotation_is_halfway() {
        let times = [0.0, 1.0];
        let half = std::f32::consts::FRAC_PI_4;
        let values = [[0.0, 0.0, 0.0, 1.0], [0.0, 0.0, half.sin(), half.cos()]];

        let mid = sample_rotation(&times, &values, 0.5, Interpolation::Linear);
        assert!((mid.angle() - std::f32::consts::FRAC_PI_4).abs() < 1e-4);
    }

    #[test]
    fn given_cubic_spline_outputs_when_flattened_then_only_values_remain() {
        let values = vec![1, 2, 3, 4, 5, 6];
        assert_eq!(keyframe_values(values, Interpolation::CubicSpline), vec![2, 5]);
    }
}
