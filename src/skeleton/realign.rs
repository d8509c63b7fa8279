use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use super::{Joint, JointId};
use crate::error::{CompileError, CompileResult};
use crate::symbols::SymbolTable;
use crate::transform::relative_pose;

const ALIGNED_TOLERANCE: f32 = 0.01;
const ORTHONORMAL_TOLERANCE: f32 = 1.0e-4;

/// Turns each joint's world X axis toward its target child and rebuilds the
/// local rest poses. Joints must already be ordered parent-first.
///
/// `targets[j]` is the child joint `j` should point at, if any. The change
/// applied to each joint is recorded in `Joint::realign`.
pub(super) fn realign_joints(
    joints: &mut [Joint],
    targets: &[Option<JointId>],
    symbols: &SymbolTable,
) -> CompileResult<()> {
    for index in 0..joints.len() {
        let Some(child) = targets[index] else {
            continue;
        };
        let offset = joints[child].rest.translation.vector;
        if offset.norm() < ALIGNED_TOLERANCE {
            continue;
        }
        if offset.x > 0.0 && offset.y.abs() <= ALIGNED_TOLERANCE && offset.z.abs() <= ALIGNED_TOLERANCE
        {
            continue;
        }

        let old_world = joints[index].world;
        let forward = (joints[child].world.translation.vector - old_world.translation.vector)
            .normalize();
        let basis = old_world.rotation.to_rotation_matrix().into_inner();
        let old_y: Vector3<f32> = basis.column(1).into_owned();
        let old_z: Vector3<f32> = basis.column(2).into_owned();

        // Keep whichever old axis is least parallel to the new forward axis.
        let (y_axis, z_axis) = if old_y.dot(&forward).abs() <= old_z.dot(&forward).abs() {
            let y = (old_y - forward * old_y.dot(&forward)).normalize();
            (y, forward.cross(&y))
        } else {
            let z = (old_z - forward * old_z.dot(&forward)).normalize();
            (z.cross(&forward), z)
        };

        let matrix = Matrix3::from_columns(&[forward, y_axis, z_axis]);
        if !is_orthonormal(&matrix) {
            return Err(CompileError::Internal(format!(
                "realigned basis for bone \"{}\" is not orthonormal",
                symbols.name(joints[index].name)
            )));
        }

        let new_rotation =
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(matrix));
        joints[index].realign = old_world.rotation.inverse() * new_rotation;
        joints[index].world.rotation = new_rotation;
    }

    for index in 0..joints.len() {
        joints[index].rest = match joints[index].parent {
            Some(parent) => relative_pose(&joints[parent].world, &joints[index].world),
            None => joints[index].world,
        };
    }

    Ok(())
}

fn is_orthonormal(matrix: &Matrix3<f32>) -> bool {
    let product = matrix.transpose() * matrix;
    (product - Matrix3::identity()).abs().max() < ORTHONORMAL_TOLERANCE
        && (matrix.determinant() - 1.0).abs() < ORTHONORMAL_TOLERANCE
}
