use nalgebra::Vector3;

/// Triangles over an indexed vertex list, all in one coordinate space.
#[derive(Debug, Clone, Default)]
pub struct TriangleSoup {
    pub positions: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub faces: Vec<[usize; 3]>,
}

impl TriangleSoup {
    /// Appends `other`, keeping its faces pointing at its own vertices.
    pub fn append(&mut self, other: &TriangleSoup) {
        let base = self.positions.len();
        self.positions.extend_from_slice(&other.positions);
        self.normals.extend_from_slice(&other.normals);
        self.faces
            .extend(other.faces.iter().map(|face| face.map(|vertex| vertex + base)));
    }

    /// Positions referenced by at least one face.
    pub fn referenced_positions(&self) -> Vec<Vector3<f32>> {
        let mut used = vec![false; self.positions.len()];
        for face in &self.faces {
            for vertex in face {
                used[*vertex] = true;
            }
        }
        self.positions
            .iter()
            .zip(used)
            .filter(|(_, used)| *used)
            .map(|(position, _)| *position)
            .collect()
    }
}

/// Maps every vertex to the lowest-index vertex it welds onto.
///
/// Two vertices weld when they are no further apart than `max_distance` and
/// the dot product of their normals exceeds `min_normal_dot`.
pub fn weld_vertices(soup: &TriangleSoup, max_distance: f32, min_normal_dot: f32) -> Vec<usize> {
    let mut table: Vec<usize> = Vec::with_capacity(soup.positions.len());
    for (index, position) in soup.positions.iter().enumerate() {
        let normal = soup.normals.get(index).copied().unwrap_or_else(Vector3::zeros);
        let target = (0..index)
            .filter(|candidate| table[*candidate] == *candidate)
            .find(|candidate| {
                let other_normal = soup
                    .normals
                    .get(*candidate)
                    .copied()
                    .unwrap_or_else(Vector3::zeros);
                (soup.positions[*candidate] - position).norm() <= max_distance
                    && other_normal.dot(&normal) > min_normal_dot
            })
            .unwrap_or(index);
        table.push(target);
    }
    table
}

/// Splits the soup into connected pieces. Faces are connected when they
/// share a welded vertex. Each piece lists the positions of its welded
/// vertices, ordered by first vertex index.
pub fn connected_pieces(soup: &TriangleSoup, weld: &[usize]) -> Vec<Vec<Vector3<f32>>> {
    let mut links: Vec<usize> = (0..soup.positions.len()).collect();

    fn root(links: &mut [usize], index: usize) -> usize {
        let mut cursor = index;
        while links[cursor] != cursor {
            links[cursor] = links[links[cursor]];
            cursor = links[cursor];
        }
        cursor
    }

    let mut used = vec![false; soup.positions.len()];
    for face in &soup.faces {
        let [a, b, c] = face.map(|vertex| weld[vertex]);
        for vertex in [a, b, c] {
            used[vertex] = true;
        }
        for other in [b, c] {
            let (left, right) = (root(&mut links, a), root(&mut links, other));
            if left != right {
                links[left.max(right)] = left.min(right);
            }
        }
    }

    let mut slot_of_root = vec![usize::MAX; soup.positions.len()];
    let mut pieces: Vec<Vec<Vector3<f32>>> = Vec::new();
    for vertex in 0..soup.positions.len() {
        if !used[vertex] {
            continue;
        }
        let island = root(&mut links, vertex);
        if slot_of_root[island] == usize::MAX {
            slot_of_root[island] = pieces.len();
            pieces.push(Vec::new());
        }
        pieces[slot_of_root[island]].push(soup.positions[vertex]);
    }
    pieces
}
