use std::collections::HashMap;

use nalgebra::{Translation3, UnitQuaternion, Vector3};

use super::{Clip, ClipStage, Movement, solve_two_bone};
use crate::error::{CompileError, CompileResult};
use crate::project::{AxisMask, ClipCommand, SkeletonSection};
use crate::skeleton::{GlobalBoneTable, JointId};
use crate::transform::{Pose, relative_pose, smoothstep, world_poses};

/// Runs one command over the clip's frames.
pub(super) fn apply(
    command: &ClipCommand,
    clip: &mut Clip,
    skeleton: &SkeletonSection,
    table: &GlobalBoneTable,
) -> CompileResult<()> {
    match command {
        ClipCommand::ExtractMotion { bone, axes } => {
            let joint = match bone {
                Some(name) => joint_named(table, name, &clip.name)?,
                None => 0,
            };
            extract_motion(clip, joint, *axes);
            clip.advance(ClipStage::MotionExtracted);
        }
        ClipCommand::IkLock { chain, frame } => {
            let end = skeleton
                .ik_chains
                .iter()
                .find(|candidate| candidate.name.eq_ignore_ascii_case(chain))
                .ok_or_else(|| invalid(clip, format!("unknown ik chain \"{chain}\"")))?;
            let end = joint_named(table, &end.end, &clip.name)?;
            check_frame(clip, *frame)?;
            ik_lock(clip, table, end, *frame)?;
            clip.advance(ClipStage::IkBaked);
        }
        ClipCommand::LocalHierarchy {
            bone,
            parent,
            start,
            peak,
            tail,
            end,
        } => {
            if !(0.0 <= *start && start <= peak && peak <= tail && tail <= end && *end <= 1.0) {
                return Err(invalid(
                    clip,
                    format!("local hierarchy ramp {start}/{peak}/{tail}/{end} is not ordered within 0..1"),
                ));
            }
            let joint = joint_named(table, bone, &clip.name)?;
            let new_parent = joint_named(table, parent, &clip.name)?;
            if joint == new_parent {
                return Err(invalid(clip, format!("\"{bone}\" cannot follow itself")));
            }
            local_hierarchy(clip, table, joint, new_parent, [*start, *peak, *tail, *end]);
        }
        ClipCommand::FixLoop { range } => {
            fix_loop(clip, *range);
            clip.looping = true;
            clip.advance(ClipStage::LoopFixed);
        }
        ClipCommand::WeightList { weights, default } => {
            let mut listed = HashMap::new();
            for (name, weight) in weights {
                listed.insert(joint_named(table, name, &clip.name)?, *weight);
            }
            clip.weights = inherited_weights(table, &listed, *default);
        }
        ClipCommand::Derivative { scale } => {
            derivative(clip, *scale);
            clip.delta = true;
        }
        ClipCommand::Subtract { frame } => {
            check_frame(clip, *frame)?;
            subtract(clip, *frame);
            clip.delta = true;
        }
    }
    Ok(())
}

fn invalid(clip: &Clip, reason: String) -> CompileError {
    CompileError::InvalidDirective {
        reason: format!("clip \"{}\": {reason}", clip.name),
    }
}

fn joint_named(table: &GlobalBoneTable, name: &str, clip: &str) -> CompileResult<JointId> {
    table
        .resolve_name(name)
        .ok_or_else(|| CompileError::UnresolvedBone {
            name: name.to_string(),
            context: format!("clip \"{clip}\""),
        })
}

fn check_frame(clip: &Clip, frame: usize) -> CompileResult<()> {
    if frame >= clip.frame_count() {
        return Err(CompileError::MissingFrames {
            clip: clip.name.clone(),
            reason: format!("frame {frame} requested of {}", clip.frame_count()),
        });
    }
    Ok(())
}

fn masked(vector: Vector3<f32>, axes: AxisMask) -> Vector3<f32> {
    Vector3::from_fn(|axis, _| if axes.contains(axis) { vector[axis] } else { 0.0 })
}

/// Removes the straight-line travel between the first and last frame on the
/// masked axes.
fn extract_motion(clip: &mut Clip, joint: JointId, axes: AxisMask) {
    let count = clip.frame_count();
    let last = count.saturating_sub(1);
    let first_position = clip.frames[0][joint].translation.vector;
    let displacement = masked(clip.frames[last][joint].translation.vector - first_position, axes);

    if last > 0 {
        for (index, frame) in clip.frames.iter_mut().enumerate() {
            let t = index as f32 / last as f32;
            frame[joint].translation.vector -= displacement * t;
        }
    }

    let seconds = if clip.fps > 0.0 { last as f32 / clip.fps } else { 0.0 };
    clip.movement = Some(Movement {
        end_frame: last as u32,
        displacement,
        velocity: if seconds > 0.0 {
            displacement / seconds
        } else {
            Vector3::zeros()
        },
    });
    if joint == 0 {
        clip.extracted = AxisMask {
            x: clip.extracted.x || axes.x,
            y: clip.extracted.y || axes.y,
            z: clip.extracted.z || axes.z,
        };
    }
}

/// Pins the chain's end effector to where it is at `lock_frame`.
fn ik_lock(clip: &mut Clip, table: &GlobalBoneTable, end: JointId, lock_frame: usize) -> CompileResult<()> {
    let parents = table.parents();
    let (Some(mid), Some(root)) = (parents[end], parents[end].and_then(|mid| parents[mid])) else {
        return Err(invalid(
            clip,
            format!("ik chain ending at \"{}\" needs two parent joints", table.name(end)),
        ));
    };

    let target = world_poses(&clip.frames[lock_frame], &parents)[end].translation.vector;
    for frame in &mut clip.frames {
        let world = world_poses(frame, &parents);
        let (root_delta, mid_delta) = solve_two_bone(
            world[root].translation.vector,
            world[mid].translation.vector,
            world[end].translation.vector,
            target,
            &world[root].rotation,
            &world[mid].rotation,
        );
        frame[root].rotation *= root_delta;
        frame[mid].rotation *= mid_delta;
    }
    Ok(())
}

/// Blend weight of a local-hierarchy ramp at clip fraction `t`.
fn ramp_weight(t: f32, [start, peak, tail, end]: [f32; 4]) -> f32 {
    if t < start || t > end {
        0.0
    } else if t < peak {
        smoothstep((t - start) / (peak - start))
    } else if t <= tail {
        1.0
    } else if end > tail {
        smoothstep((end - t) / (end - tail))
    } else {
        1.0
    }
}

/// Makes `joint` follow `new_parent` by the ramp weight, keeping the offset
/// between them from the frame where the ramp starts.
fn local_hierarchy(
    clip: &mut Clip,
    table: &GlobalBoneTable,
    joint: JointId,
    new_parent: JointId,
    ramp: [f32; 4],
) {
    let parents = table.parents();
    let last = clip.frame_count().saturating_sub(1).max(1) as f32;
    let anchor_frame = ((ramp[0] * last).round() as usize).min(clip.frame_count() - 1);
    let anchor_world = world_poses(&clip.frames[anchor_frame], &parents);
    let offset = relative_pose(&anchor_world[new_parent], &anchor_world[joint]);

    for (index, frame) in clip.frames.iter_mut().enumerate() {
        let weight = ramp_weight(index as f32 / last, ramp);
        if weight <= 0.0 {
            continue;
        }
        let world = world_poses(frame, &parents);
        let followed = world[new_parent] * offset;
        let blended = Pose::from_parts(
            Translation3::from(
                world[joint]
                    .translation
                    .vector
                    .lerp(&followed.translation.vector, weight),
            ),
            world[joint]
                .rotation
                .try_slerp(&followed.rotation, weight, 1.0e-6)
                .unwrap_or(followed.rotation),
        );
        frame[joint] = match parents[joint] {
            Some(parent) => relative_pose(&world[parent], &blended),
            None => blended,
        };
    }
}

/// Spreads the seam between the last and first frame over the final `range`
/// frames so the clip loops cleanly.
fn fix_loop(clip: &mut Clip, range: usize) {
    let count = clip.frame_count();
    if count < 2 {
        return;
    }
    let last = count - 1;
    let range = range.clamp(1, last);
    let first = clip.frames[0].clone();
    let seam = clip.frames[last].clone();
    let extracted = clip.extracted;

    for index in (last - range + 1)..=last {
        let s = smoothstep((index - (last - range)) as f32 / range as f32);
        for (joint, pose) in clip.frames[index].iter_mut().enumerate() {
            let mut shift = first[joint].translation.vector - seam[joint].translation.vector;
            if joint == 0 {
                shift = masked(shift, AxisMask {
                    x: !extracted.x,
                    y: !extracted.y,
                    z: !extracted.z,
                });
            }
            pose.translation.vector += shift * s;

            let turn = first[joint].rotation * seam[joint].rotation.inverse();
            let partial = UnitQuaternion::identity()
                .try_slerp(&turn, s, 1.0e-6)
                .unwrap_or(turn);
            pose.rotation = partial * pose.rotation;
        }
    }
}

/// Per-joint weights; unlisted joints inherit from their parent.
fn inherited_weights(table: &GlobalBoneTable, listed: &HashMap<JointId, f32>, default: f32) -> Vec<f32> {
    let mut weights: Vec<f32> = Vec::with_capacity(table.len());
    for joint in 0..table.len() {
        let weight = match listed.get(&joint) {
            Some(weight) => *weight,
            None => table.parent(joint).map_or(default, |parent| weights[parent]),
        };
        weights.push(weight);
    }
    weights
}

/// Difference between `from` and `to`, as a local delta pose.
fn delta(from: &Pose, to: &Pose, scale: f32) -> Pose {
    let translation = (to.translation.vector - from.translation.vector) * scale;
    let turn = from.rotation.inverse() * to.rotation;
    let rotation = turn.powf(scale);
    Pose::from_parts(Translation3::from(translation), rotation)
}

fn derivative(clip: &mut Clip, scale: f32) {
    let original = clip.frames.clone();
    for (index, frame) in clip.frames.iter_mut().enumerate() {
        for (joint, pose) in frame.iter_mut().enumerate() {
            *pose = if index == 0 {
                Pose::identity()
            } else {
                delta(&original[index - 1][joint], &original[index][joint], scale)
            };
        }
    }
}

fn subtract(clip: &mut Clip, reference: usize) {
    let base = clip.frames[reference].clone();
    for frame in &mut clip.frames {
        for (joint, pose) in frame.iter_mut().enumerate() {
            *pose = delta(&base[joint], pose, 1.0);
        }
    }
}
