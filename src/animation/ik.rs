use std::f32::consts::PI;

use nalgebra::{Unit, UnitQuaternion, Vector3};

const LENGTH_EPSILON: f32 = 1.0e-4;

/// Rotation deltas that bend a two-link chain toward a target: the middle
/// joint bends until the chain spans the target distance, then the root
/// swings the bent chain onto the target.
///
/// Positions are in model space and `root_rotation`/`mid_rotation` are the
/// world rotations of the first two joints. The returned pair is applied on
/// the right of each joint's local rotation.
///
/// # Arguments
///
/// * `root` - World position of the chain root (e.g. hip).
/// * `mid` - World position of the middle joint (e.g. knee).
/// * `end` - World position of the end effector (e.g. ankle).
/// * `target` - Desired end effector position. Unreachable targets are
///   clamped to the chain's reach.
///
/// # Returns
///
/// `(root_delta, mid_delta)` local-space rotation corrections.
pub fn solve_two_bone(
    root: Vector3<f32>,
    mid: Vector3<f32>,
    end: Vector3<f32>,
    target: Vector3<f32>,
    root_rotation: &UnitQuaternion<f32>,
    mid_rotation: &UnitQuaternion<f32>,
) -> (UnitQuaternion<f32>, UnitQuaternion<f32>) {
    let upper = (mid - root).norm();
    let lower = (mid - end).norm();
    if upper < LENGTH_EPSILON || lower < LENGTH_EPSILON {
        return (UnitQuaternion::identity(), UnitQuaternion::identity());
    }
    let reach = (target - root)
        .norm()
        .clamp(LENGTH_EPSILON, upper + lower - LENGTH_EPSILON);

    let law_of_cosines = |opposite: f32, a: f32, b: f32| {
        ((opposite * opposite - a * a - b * b) / (-2.0 * a * b))
            .clamp(-1.0, 1.0)
            .acos()
    };
    let bend_now = angle_between(root - mid, end - mid);
    let bend_goal = law_of_cosines(reach, upper, lower);

    // Bend in the chain's plane, or toward the target when the chain is straight.
    let bend_axis = (end - root)
        .cross(&(mid - root))
        .try_normalize(1.0e-9)
        .or_else(|| (end - root).cross(&(target - root)).try_normalize(1.0e-9))
        .unwrap_or_else(|| perpendicular(end - root));
    let bend = UnitQuaternion::from_axis_angle(&Unit::new_unchecked(bend_axis), bend_goal - bend_now);
    let bent_end = mid + bend * (end - mid);

    let swing = UnitQuaternion::rotation_between(&(bent_end - root), &(target - root))
        .unwrap_or_else(|| {
            UnitQuaternion::from_axis_angle(&Unit::new_unchecked(perpendicular(bent_end - root)), PI)
        });

    let root_delta = root_rotation.inverse() * swing * root_rotation;
    let mid_delta = mid_rotation.inverse() * bend * mid_rotation;
    (root_delta, mid_delta)
}

fn angle_between(a: Vector3<f32>, b: Vector3<f32>) -> f32 {
    match (a.try_normalize(1.0e-9), b.try_normalize(1.0e-9)) {
        (Some(a), Some(b)) => a.dot(&b).clamp(-1.0, 1.0).acos(),
        _ => 0.0,
    }
}

/// Any unit vector orthogonal to `v`.
fn perpendicular(v: Vector3<f32>) -> Vector3<f32> {
    let helper = if v.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    v.cross(&helper).try_normalize(1.0e-9).unwrap_or_else(Vector3::z)
}
