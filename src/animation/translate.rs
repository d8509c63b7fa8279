use crate::error::{CompileError, CompileResult};
use crate::skeleton::GlobalBoneTable;
use crate::source::{Source, SourceAnimation};
use crate::transform::{Pose, relative_pose, world_poses};

/// Re-expresses every frame of `animation` as local transforms of the global
/// bone table.
///
/// Joints driven by the source follow the source bone (plus realignment);
/// joints the source does not know hold their rest pose under their parent.
pub fn translate_frames(
    table: &GlobalBoneTable,
    source: &Source,
    source_index: usize,
    animation: &SourceAnimation,
) -> CompileResult<Vec<Vec<Pose>>> {
    let binding = table.binding(source_index);
    let source_parents = source.parents();
    let joints = table.joints();

    let mut frames = Vec::with_capacity(animation.frames.len());
    for (frame_index, locals) in animation.frames.iter().enumerate() {
        if locals.len() != source.bones.len() {
            return Err(CompileError::MissingFrames {
                clip: animation.name.clone(),
                reason: format!(
                    "frame {frame_index} has {} transforms for {} bones",
                    locals.len(),
                    source.bones.len()
                ),
            });
        }
        let source_world = world_poses(locals, &source_parents);

        let mut world: Vec<Pose> = Vec::with_capacity(joints.len());
        let mut local: Vec<Pose> = Vec::with_capacity(joints.len());
        for (index, joint) in joints.iter().enumerate() {
            let joint_world = match binding.global_to_local[index] {
                Some(bone) => {
                    let mut pose = source_world[bone];
                    pose.rotation *= joint.realign;
                    pose
                }
                None => match joint.parent {
                    Some(parent) => world[parent] * joint.rest,
                    None => joint.rest,
                },
            };
            local.push(match joint.parent {
                Some(parent) => relative_pose(&world[parent], &joint_world),
                None => joint_world,
            });
            world.push(joint_world);
        }
        frames.push(local);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::SkeletonSection;
    use crate::skeleton::resolve;
    use crate::source::tests::{bone, rigid_vertex, source};
    use crate::transform::pose_from_euler;
    use nalgebra::Vector3;

    #[test]
    fn given_animated_middle_bone_when_translating_then_its_motion_is_kept() {
        let mut src = source(
            "rig",
            vec![
                bone("root", None, [0.0; 3]),
                bone("twist", Some(0), [0.0, 0.0, 2.0]),
                bone("head", Some(1), [0.0, 0.0, 3.0]),
            ],
        );
        src.vertices.push(rigid_vertex([0.0; 3], 0));
        src.vertices.push(rigid_vertex([0.0, 0.0, 5.0], 2));
        let rest: Vec<Pose> = src.bones.iter().map(|b| b.rest).collect();
        let mut turned = rest.clone();
        turned[1] = pose_from_euler(Vector3::new(0.0, 0.0, 2.0), Vector3::new(0.0, 0.0, 0.5));
        src.animations.push(SourceAnimation {
            name: "turn".into(),
            fps: 30.0,
            frames: vec![rest, turned],
        });
        let sources = vec![src];
        let table = resolve(&sources, &SkeletonSection::default(), &[]).expect("table");

        let frames = translate_frames(&table, &sources[0], 0, &sources[0].animations[0]).expect("frames");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 3);
        let twist = table.find("twist").expect("animated bone survives");
        let head = table.find("head").unwrap();
        assert!((frames[1][twist].rotation.angle() - 0.5).abs() < 1e-5);
        assert!((frames[1][head].translation.vector.z - 3.0).abs() < 1e-5);
        assert!(frames[1][head].rotation.angle() < 1e-3);
    }

    #[test]
    fn given_joint_missing_from_source_when_translating_then_it_holds_rest() {
        let mut body = source("body", vec![bone("pelvis", None, [0.0; 3]), bone("tail", Some(0), [-4.0, 0.0, 0.0])]);
        body.vertices.push(rigid_vertex([0.0; 3], 0));
        body.vertices.push(rigid_vertex([-4.0, 0.0, 0.0], 1));
        let mut anim = source("anim", vec![bone("pelvis", None, [0.0; 3])]);
        anim.animations.push(SourceAnimation {
            name: "bob".into(),
            fps: 30.0,
            frames: vec![vec![Pose::translation(0.0, 0.0, 1.0)]],
        });
        let sources = vec![body, anim];
        let table = resolve(&sources, &SkeletonSection::default(), &[]).expect("table");

        let frames = translate_frames(&table, &sources[1], 1, &sources[1].animations[0]).expect("frames");

        let tail = table.find("tail").unwrap();
        assert!((frames[0][0].translation.vector.z - 1.0).abs() < 1e-6);
        assert!((frames[0][tail].translation.vector - Vector3::new(-4.0, 0.0, 0.0)).norm() < 1e-6);
    }
}
