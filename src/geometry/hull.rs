use std::collections::HashSet;

use nalgebra::Vector3;

/// Closed convex polyhedron with its integrated properties.
#[derive(Debug, Clone)]
pub struct ConvexHull {
    pub vertices: Vec<Vector3<f32>>,
    /// Counter-clockwise seen from outside.
    pub triangles: Vec<[u16; 3]>,
    pub volume: f32,
    pub area: f32,
    pub centroid: Vector3<f32>,
}

#[derive(Debug, Clone, Copy)]
struct Face {
    vertices: [usize; 3],
    normal: Vector3<f64>,
    offset: f64,
    alive: bool,
}

impl Face {
    fn new(points: &[Vector3<f64>], vertices: [usize; 3]) -> Self {
        let [a, b, c] = vertices.map(|index| points[index]);
        let normal = (b - a).cross(&(c - a)).normalize();
        Self {
            vertices,
            normal,
            offset: normal.dot(&a),
            alive: true,
        }
    }

    fn distance(&self, point: &Vector3<f64>) -> f64 {
        self.normal.dot(point) - self.offset
    }

    fn edges(&self) -> [(usize, usize); 3] {
        let [a, b, c] = self.vertices;
        [(a, b), (b, c), (c, a)]
    }
}

/// Builds the convex hull of `points` incrementally in double precision.
///
/// # Arguments
///
/// * `points` - Input cloud. Duplicates and interior points are allowed.
///
/// # Returns
///
/// `None` when the cloud does not span three dimensions, or when the hull
/// would need more vertices than a 16-bit triangle index can address.
pub fn build_hull(points: &[Vector3<f32>]) -> Option<ConvexHull> {
    let cloud: Vec<Vector3<f64>> = points.iter().map(|p| p.cast::<f64>()).collect();
    if cloud.len() < 4 {
        return None;
    }

    let mut min = cloud[0];
    let mut max = cloud[0];
    for point in &cloud {
        min = min.inf(point);
        max = max.sup(point);
    }
    let epsilon = (max - min).amax().max(1.0) * 1.0e-9;

    let simplex = initial_simplex(&cloud, epsilon)?;
    let interior = simplex.iter().map(|index| cloud[*index]).sum::<Vector3<f64>>() / 4.0;

    let mut faces: Vec<Face> = Vec::new();
    for [a, b, c] in [
        [simplex[0], simplex[1], simplex[2]],
        [simplex[0], simplex[3], simplex[1]],
        [simplex[1], simplex[3], simplex[2]],
        [simplex[2], simplex[3], simplex[0]],
    ] {
        let mut face = Face::new(&cloud, [a, b, c]);
        if face.distance(&interior) > 0.0 {
            face = Face::new(&cloud, [a, c, b]);
        }
        faces.push(face);
    }

    for (index, point) in cloud.iter().enumerate() {
        if simplex.contains(&index) {
            continue;
        }
        let visible: Vec<usize> = faces
            .iter()
            .enumerate()
            .filter(|(_, face)| face.alive && face.distance(point) > epsilon)
            .map(|(face_index, _)| face_index)
            .collect();
        if visible.is_empty() {
            continue;
        }

        let visible_edges: HashSet<(usize, usize)> = visible
            .iter()
            .flat_map(|face| faces[*face].edges())
            .collect();
        let horizon: Vec<(usize, usize)> = visible_edges
            .iter()
            .filter(|(a, b)| !visible_edges.contains(&(*b, *a)))
            .copied()
            .collect();

        for face in &visible {
            faces[*face].alive = false;
        }
        for (a, b) in horizon {
            faces.push(Face::new(&cloud, [a, b, index]));
        }
    }

    let live: Vec<&Face> = faces.iter().filter(|face| face.alive).collect();

    let mut remap = vec![usize::MAX; cloud.len()];
    let mut vertices = Vec::new();
    let mut triangles = Vec::with_capacity(live.len());
    for face in &live {
        let mut triangle = [0u16; 3];
        for (slot, vertex) in face.vertices.iter().enumerate() {
            if remap[*vertex] == usize::MAX {
                remap[*vertex] = vertices.len();
                vertices.push(points[*vertex]);
            }
            triangle[slot] = u16::try_from(remap[*vertex]).ok()?;
        }
        triangles.push(triangle);
    }

    let mut volume = 0.0f64;
    let mut area = 0.0f64;
    let mut moment = Vector3::<f64>::zeros();
    for face in &live {
        let [a, b, c] = face.vertices.map(|index| cloud[index]);
        let cross = (b - a).cross(&(c - a));
        area += cross.norm() * 0.5;
        let tetra = (a - interior).dot(&(b - interior).cross(&(c - interior))) / 6.0;
        volume += tetra;
        moment += (interior + a + b + c) * (tetra / 4.0);
    }
    if volume <= 0.0 {
        return None;
    }

    Some(ConvexHull {
        vertices,
        triangles,
        volume: volume as f32,
        area: area as f32,
        centroid: (moment / volume).cast::<f32>(),
    })
}

/// Four affinely independent points, or `None` for a flat cloud.
fn initial_simplex(cloud: &[Vector3<f64>], epsilon: f64) -> Option<[usize; 4]> {
    let first = (0..cloud.len()).min_by(|a, b| cloud[*a].x.total_cmp(&cloud[*b].x))?;

    let second = farthest(cloud, |p| (p - cloud[first]).norm())?;
    let axis = cloud[second] - cloud[first];
    if axis.norm() <= epsilon {
        return None;
    }
    let direction = axis.normalize();

    let third = farthest(cloud, |p| {
        let offset = p - cloud[first];
        (offset - direction * offset.dot(&direction)).norm()
    })?;
    let normal = axis.cross(&(cloud[third] - cloud[first]));
    if normal.norm() <= epsilon * axis.norm() {
        return None;
    }
    let normal = normal.normalize();

    let fourth = farthest(cloud, |p| normal.dot(&(p - cloud[first])).abs())?;
    if normal.dot(&(cloud[fourth] - cloud[first])).abs() <= epsilon {
        return None;
    }

    Some([first, second, third, fourth])
}

fn farthest(cloud: &[Vector3<f64>], measure: impl Fn(&Vector3<f64>) -> f64) -> Option<usize> {
    (0..cloud.len()).max_by(|a, b| measure(&cloud[*a]).total_cmp(&measure(&cloud[*b])))
}
