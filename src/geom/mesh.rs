/// Indexed triangle mesh with optional per-vertex and per-face attributes.
///
/// Optional columns are capability-present attributes: `None` means the
/// source never provided them, never "all zeros".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeomMesh {
    pub positions: Vec<[f64; 3]>,
    /// Triangle list, three vertex indices per triangle.
    pub indices: Vec<u32>,
    pub uvs: Option<Vec<[f64; 2]>>,
    pub normals: Option<Vec<[f64; 3]>>,
    /// One integer tag per source face (not per emitted triangle).
    pub face_tags: Option<Vec<i32>>,
}

impl GeomMesh {
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Returns true if any vertex position contains NaN or Inf values.
    #[must_use]
    pub fn has_invalid_vertices(&self) -> bool {
        self.positions
            .iter()
            .any(|p| !p[0].is_finite() || !p[1].is_finite() || !p[2].is_finite())
    }

    /// Checks that the columns can be indexed blindly: a whole number of
    /// triangles, finite positions, indices below the vertex count and vertex
    /// columns as long as `positions`.
    pub fn validate(&self) -> Result<(), MeshValidationError> {
        if self.indices.len() % 3 != 0 {
            return Err(MeshValidationError::NotTriangleList {
                len: self.indices.len(),
            });
        }
        if let Some(vertex) = self
            .positions
            .iter()
            .position(|p| p.iter().any(|c| !c.is_finite()))
        {
            return Err(MeshValidationError::NonFinitePosition { vertex });
        }

        let vertex_count = self.positions.len();
        if let Some(at) = self
            .indices
            .iter()
            .position(|&i| i as usize >= vertex_count)
        {
            return Err(MeshValidationError::IndexOutOfRange {
                triangle: at / 3,
                index: self.indices[at],
                vertex_count,
            });
        }

        let columns = [
            ("normals", self.normals.as_ref().map(Vec::len)),
            ("uvs", self.uvs.as_ref().map(Vec::len)),
        ];
        for (attribute, len) in columns {
            if let Some(got) = len.filter(|&got| got != vertex_count) {
                return Err(MeshValidationError::ColumnLength {
                    attribute,
                    expected: vertex_count,
                    got,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshValidationError {
    #[error("index buffer of length {len} is not a triangle list")]
    NotTriangleList { len: usize },
    #[error("vertex {vertex} has a non-finite position")]
    NonFinitePosition { vertex: usize },
    #[error("triangle {triangle} references vertex {index} of {vertex_count}")]
    IndexOutOfRange {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },
    #[error("{attribute} column has {got} entries for {expected} vertices")]
    ColumnLength {
        attribute: &'static str,
        expected: usize,
        got: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> GeomMesh {
        GeomMesh {
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
            ..GeomMesh::default()
        }
    }

    #[test]
    fn counts() {
        let mesh = quad();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_out_of_bounds_index() {
        let mut mesh = quad();
        mesh.indices[5] = 4;
        assert_eq!(
            mesh.validate(),
            Err(MeshValidationError::IndexOutOfRange {
                triangle: 1,
                index: 4,
                vertex_count: 4
            })
        );
    }

    #[test]
    fn validate_rejects_short_attribute_column() {
        let mut mesh = quad();
        mesh.normals = Some(vec![[0.0, 0.0, 1.0]]);
        assert_eq!(
            mesh.validate(),
            Err(MeshValidationError::ColumnLength {
                attribute: "normals",
                expected: 4,
                got: 1
            })
        );
    }

    #[test]
    fn validate_rejects_partial_triangle_and_nan() {
        let mut mesh = quad();
        mesh.indices.pop();
        assert_eq!(
            mesh.validate(),
            Err(MeshValidationError::NotTriangleList { len: 5 })
        );

        let mut mesh = quad();
        mesh.positions[2][1] = f64::INFINITY;
        assert_eq!(
            mesh.validate(),
            Err(MeshValidationError::NonFinitePosition { vertex: 2 })
        );
    }
}
