use std::f32::consts::PI;

use nalgebra::{Isometry3, Matrix3, Matrix4, Translation3, UnitQuaternion, Vector3};

/// Rigid joint transform. Bone poses carry no scale.
pub type Pose = Isometry3<f32>;

/// Builds a pose from a position and XYZ Euler angles in radians.
pub fn pose_from_euler(position: Vector3<f32>, euler: Vector3<f32>) -> Pose {
    Isometry3::from_parts(
        Translation3::from(position),
        rotation_from_euler(euler),
    )
}

/// Converts XYZ Euler angles (radians) to a rotation.
pub fn rotation_from_euler(euler: Vector3<f32>) -> UnitQuaternion<f32> {
    UnitQuaternion::from_euler_angles(euler.x, euler.y, euler.z)
}

/// Converts a rotation back to XYZ Euler angles (radians).
pub fn euler_from_rotation(rotation: &UnitQuaternion<f32>) -> Vector3<f32> {
    let (x, y, z) = rotation.euler_angles();
    Vector3::new(x, y, z)
}

/// Wraps an angle into `[-PI, PI)`.
pub fn wrap_angle(mut angle: f32) -> f32 {
    while angle >= PI {
        angle -= PI * 2.0;
    }
    while angle < -PI {
        angle += PI * 2.0;
    }
    angle
}

/// Hermite ramp `3t^2 - 2t^3` over `t` clamped to `[0, 1]`.
pub fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    3.0 * t * t - 2.0 * t * t * t
}

/// Expresses `child_world` in the space of `parent_world`.
///
/// # Arguments
///
/// * `parent_world` - World transform of the new parent.
/// * `child_world` - World transform to re-express.
///
/// # Returns
///
/// The local transform that satisfies `parent_world * local == child_world`.
pub fn relative_pose(parent_world: &Pose, child_world: &Pose) -> Pose {
    parent_world.inverse() * child_world
}

/// Computes world poses from local poses and parent links.
///
/// Parent links must be acyclic; entries may appear in any order.
pub fn world_poses(locals: &[Pose], parents: &[Option<usize>]) -> Vec<Pose> {
    let mut worlds = vec![Pose::identity(); locals.len()];
    let mut resolved = vec![false; locals.len()];

    for index in 0..locals.len() {
        resolve_world_pose(index, locals, parents, &mut worlds, &mut resolved);
    }

    worlds
}

fn resolve_world_pose(
    index: usize,
    locals: &[Pose],
    parents: &[Option<usize>],
    worlds: &mut [Pose],
    resolved: &mut [bool],
) {
    if resolved[index] {
        return;
    }

    let world = if let Some(parent) = parents[index] {
        resolve_world_pose(parent, locals, parents, worlds, resolved);
        worlds[parent] * locals[index]
    } else {
        locals[index]
    };

    worlds[index] = world;
    resolved[index] = true;
}

/// Splits an affine matrix into a rigid pose, discarding scale and shear.
///
/// Mirrored bases are folded into a proper rotation by flipping the X axis.
pub fn pose_from_matrix(matrix: &Matrix4<f32>) -> Pose {
    let translation = Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);

    let basis_x = Vector3::new(matrix[(0, 0)], matrix[(1, 0)], matrix[(2, 0)]);
    let basis_y = Vector3::new(matrix[(0, 1)], matrix[(1, 1)], matrix[(2, 1)]);
    let basis_z = Vector3::new(matrix[(0, 2)], matrix[(1, 2)], matrix[(2, 2)]);

    let mut rot_x = normalize_or(basis_x, Vector3::x());
    let rot_y = normalize_or(basis_y, Vector3::y());
    let rot_z = normalize_or(basis_z, Vector3::z());

    if rot_x.cross(&rot_y).dot(&rot_z) < 0.0 {
        rot_x = -rot_x;
    }

    let rotation = UnitQuaternion::from_matrix(&Matrix3::from_columns(&[rot_x, rot_y, rot_z]));
    Isometry3::from_parts(Translation3::from(translation), rotation)
}

fn normalize_or(v: Vector3<f32>, fallback: Vector3<f32>) -> Vector3<f32> {
    let len = v.norm();
    if len > 1e-8 { v / len } else { fallback }
}

/// True when two poses differ by more than the given translation/rotation
/// tolerances.
pub fn poses_differ(a: &Pose, b: &Pose, position_tolerance: f32, angle_tolerance: f32) -> bool {
    let translation = (a.translation.vector - b.translation.vector).norm();
    let angle = a.rotation.angle_to(&b.rotation);
    translation > position_tolerance || angle > angle_tolerance
}
