//! Geometry kernels used by the collision builder: convex hulls, vertex
//! welding with island splitting, and the near-planar test.

mod hull;
mod islands;

use nalgebra::{Matrix3, SymmetricEigen, Vector3};

pub use hull::{ConvexHull, build_hull};
pub use islands::{TriangleSoup, connected_pieces, weld_vertices};

/// Pieces no thicker than this along their thinnest axis are treated as 2-D.
pub const NEAR_PLANAR_THICKNESS: f32 = 1.0;

/// Smallest vertex count a convex piece is built from.
pub const MIN_PIECE_VERTICES: usize = 3;

/// Spread of `points` along the axis of least variance.
///
/// Returns `0.0` for fewer than four points, which can never enclose volume.
pub fn thinnest_extent(points: &[Vector3<f32>]) -> f32 {
    if points.len() < 4 {
        return 0.0;
    }
    let cloud: Vec<Vector3<f64>> = points.iter().map(|p| p.cast::<f64>()).collect();
    let mean = cloud.iter().sum::<Vector3<f64>>() / cloud.len() as f64;

    let mut covariance = Matrix3::<f64>::zeros();
    for point in &cloud {
        let offset = point - mean;
        covariance += offset * offset.transpose();
    }
    covariance /= cloud.len() as f64;

    let eigen = SymmetricEigen::new(covariance);
    let smallest = eigen.eigenvalues.imin();
    let axis: Vector3<f64> = eigen.eigenvectors.column(smallest).into_owned();

    let mut low = f64::INFINITY;
    let mut high = f64::NEG_INFINITY;
    for point in &cloud {
        let distance = axis.dot(point);
        low = low.min(distance);
        high = high.max(distance);
    }
    (high - low) as f32
}

/// True when every point lies within the near-planar slab.
pub fn is_near_planar(points: &[Vector3<f32>]) -> bool {
    thinnest_extent(points) <= NEAR_PLANAR_THICKNESS
}

/// Axis-aligned extents of `points`.
pub fn bounding_extents(points: &[Vector3<f32>]) -> Vector3<f32> {
    let Some(first) = points.first() else {
        return Vector3::zeros();
    };
    let (min, max) = points
        .iter()
        .fold((*first, *first), |(min, max), point| (min.inf(point), max.sup(point)));
    max - min
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Unit};

    fn slab(thickness: f32) -> Vec<Vector3<f32>> {
        let tilt = Rotation3::from_axis_angle(&Unit::new_normalize(Vector3::new(1.0, 1.0, 0.0)), 0.7);
        let mut points = Vec::new();
        for x in [-10.0, 10.0] {
            for y in [-6.0, 6.0] {
                for z in [0.0, thickness] {
                    points.push(tilt * Vector3::new(x, y, z) + Vector3::new(3.0, -2.0, 40.0));
                }
            }
        }
        points
    }

    #[test]
    fn given_tilted_thin_slab_when_testing_then_it_is_near_planar() {
        assert!(is_near_planar(&slab(0.9)));
        assert!((thinnest_extent(&slab(0.9)) - 0.9).abs() < 1e-3);
    }

    #[test]
    fn given_thick_box_when_testing_then_it_is_solid() {
        assert!(!is_near_planar(&slab(4.0)));
    }

    #[test]
    fn given_three_points_when_testing_then_they_are_planar() {
        let points = [Vector3::zeros(), Vector3::x() * 50.0, Vector3::z() * 50.0];
        assert!(is_near_planar(&points));
    }

    #[test]
    fn given_points_when_measuring_extents_then_box_size_is_returned() {
        let points = [Vector3::new(-1.0, 2.0, 0.0), Vector3::new(3.0, 0.0, 9.0)];
        assert_eq!(bounding_extents(&points), Vector3::new(4.0, 2.0, 9.0));
        assert_eq!(bounding_extents(&[]), Vector3::zeros());
    }
}
