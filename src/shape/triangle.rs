use std::fmt;
use std::sync::Arc;

use super::builder::{ShapeFactory, TriangleMeshDesc};
use super::texture::{FloatTexture, TextureSample};
use crate::geom::{MeshValidationError, Point3, Transform, Vec3};

/// Texture coordinates used when a mesh has none.
const DEFAULT_UVS: [[f64; 2]; 3] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];

/// A triangle mesh stored in world space and shared by its [`Triangle`]s.
pub struct TriangleMesh {
    pub positions: Vec<Point3>,
    /// Unit-length world-space normals, flipped when `reverse_orientation`.
    pub normals: Option<Vec<Vec3>>,
    pub uvs: Option<Vec<[f64; 2]>>,
    pub indices: Vec<u32>,
    pub face_tags: Option<Vec<i32>>,
    pub alpha: Option<Arc<dyn FloatTexture>>,
    pub shadow_alpha: Option<Arc<dyn FloatTexture>>,
    pub reverse_orientation: bool,
    pub transform_swaps_handedness: bool,
}

impl TriangleMesh {
    /// Moves the object-space mesh in `desc` to world space.
    ///
    /// The mesh is validated first; triangle handles index its columns
    /// without further checks.
    pub fn from_desc(desc: TriangleMeshDesc) -> Result<Self, MeshValidationError> {
        desc.mesh.validate()?;
        let TriangleMeshDesc {
            object_to_world,
            world_to_object,
            reverse_orientation,
            mesh,
            alpha,
            shadow_alpha,
        } = desc;

        let positions = mesh
            .positions
            .iter()
            .map(|p| object_to_world.apply_point(Point3::from_array(*p)))
            .collect();

        let normals = mesh.normals.map(|normals| {
            normals
                .iter()
                .map(|n| {
                    let world = Transform::apply_normal(world_to_object, Vec3::from_array(*n));
                    let unit = world.normalized().unwrap_or(world);
                    if reverse_orientation { -unit } else { unit }
                })
                .collect()
        });

        Ok(Self {
            positions,
            normals,
            uvs: mesh.uvs,
            indices: mesh.indices,
            face_tags: mesh.face_tags,
            alpha,
            shadow_alpha,
            reverse_orientation,
            transform_swaps_handedness: object_to_world.swaps_handedness(),
        })
    }

    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[must_use]
    pub fn vertex_indices(&self, triangle: usize) -> Option<[usize; 3]> {
        let tri = self.indices.get(triangle * 3..triangle * 3 + 3)?;
        Some([tri[0] as usize, tri[1] as usize, tri[2] as usize])
    }
}

impl fmt::Debug for TriangleMesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriangleMesh")
            .field("vertex_count", &self.positions.len())
            .field("triangle_count", &self.triangle_count())
            .field("has_normals", &self.normals.is_some())
            .field("has_uvs", &self.uvs.is_some())
            .field("reverse_orientation", &self.reverse_orientation)
            .finish_non_exhaustive()
    }
}

/// One triangle of a shared [`TriangleMesh`].
#[derive(Debug, Clone)]
pub struct Triangle {
    mesh: Arc<TriangleMesh>,
    index: usize,
}

impl Triangle {
    #[must_use]
    pub fn mesh(&self) -> &Arc<TriangleMesh> {
        &self.mesh
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    fn corners(&self) -> [usize; 3] {
        // Handles exist only for validated meshes and indices below triangle_count.
        self.mesh.vertex_indices(self.index).unwrap_or([0; 3])
    }

    #[must_use]
    pub fn vertices(&self) -> [Point3; 3] {
        self.corners().map(|i| self.mesh.positions[i])
    }

    #[must_use]
    pub fn shading_normals(&self) -> Option<[Vec3; 3]> {
        let normals = self.mesh.normals.as_ref()?;
        Some(self.corners().map(|i| normals[i]))
    }

    #[must_use]
    pub fn uvs(&self) -> [[f64; 2]; 3] {
        match &self.mesh.uvs {
            Some(uvs) => self.corners().map(|i| uvs[i]),
            None => DEFAULT_UVS,
        }
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        let [p0, p1, p2] = self.vertices();
        0.5 * (p1 - p0).cross(p2 - p0).length()
    }

    /// Unit face normal from the winding order, flipped when exactly one of
    /// `reverse_orientation` and the transform's handedness swap is set.
    #[must_use]
    pub fn geometric_normal(&self) -> Option<Vec3> {
        let [p0, p1, p2] = self.vertices();
        let n = (p1 - p0).cross(p2 - p0).normalized()?;
        if self.mesh.reverse_orientation ^ self.mesh.transform_swaps_handedness {
            Some(-n)
        } else {
            Some(n)
        }
    }

    /// World-space `(min, max)` corners.
    #[must_use]
    pub fn bounds(&self) -> (Point3, Point3) {
        let [p0, p1, p2] = self.vertices();
        let min = Point3::new(
            p0.x.min(p1.x).min(p2.x),
            p0.y.min(p1.y).min(p2.y),
            p0.z.min(p1.z).min(p2.z),
        );
        let max = Point3::new(
            p0.x.max(p1.x).max(p2.x),
            p0.y.max(p1.y).max(p2.y),
            p0.z.max(p1.z).max(p2.z),
        );
        (min, max)
    }

    /// Alpha at barycentric coordinates `(b0, b1, b2)`; `1.0` without a mask.
    #[must_use]
    pub fn alpha_at(&self, barycentric: [f64; 3]) -> f64 {
        match &self.mesh.alpha {
            Some(texture) => texture.evaluate(&self.sample_at(barycentric)),
            None => 1.0,
        }
    }

    #[must_use]
    pub fn shadow_alpha_at(&self, barycentric: [f64; 3]) -> f64 {
        match &self.mesh.shadow_alpha {
            Some(texture) => texture.evaluate(&self.sample_at(barycentric)),
            None => 1.0,
        }
    }

    fn sample_at(&self, [b0, b1, b2]: [f64; 3]) -> TextureSample {
        let [p0, p1, p2] = self.vertices();
        let [uv0, uv1, uv2] = self.uvs();
        let p = p0.to_array();
        let (p1, p2) = (p1.to_array(), p2.to_array());
        TextureSample {
            p: [
                b0 * p[0] + b1 * p1[0] + b2 * p2[0],
                b0 * p[1] + b1 * p1[1] + b2 * p2[1],
                b0 * p[2] + b1 * p1[2] + b2 * p2[2],
            ],
            uv: [
                b0 * uv0[0] + b1 * uv1[0] + b2 * uv2[0],
                b0 * uv0[1] + b1 * uv1[1] + b2 * uv2[1],
            ],
        }
    }
}

/// Reference [`ShapeFactory`]: world-space mesh plus one handle per triangle.
///
/// A mesh that fails [`GeomMesh::validate`](crate::geom::GeomMesh::validate)
/// is logged and produces no shapes.
#[derive(Debug, Default)]
pub struct WorldMeshFactory {
    meshes: Vec<Arc<TriangleMesh>>,
}

impl WorldMeshFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Meshes created so far, in creation order.
    #[must_use]
    pub fn meshes(&self) -> &[Arc<TriangleMesh>] {
        &self.meshes
    }
}

impl ShapeFactory for WorldMeshFactory {
    type Shape = Triangle;

    fn create_triangle_mesh(&mut self, desc: TriangleMeshDesc) -> Vec<Triangle> {
        let mesh = match TriangleMesh::from_desc(desc) {
            Ok(mesh) => Arc::new(mesh),
            Err(err) => {
                log::error!("triangle mesh rejected: {err}");
                return Vec::new();
            }
        };
        self.meshes.push(Arc::clone(&mesh));
        (0..mesh.triangle_count())
            .map(|index| Triangle {
                mesh: Arc::clone(&mesh),
                index,
            })
            .collect()
    }
}
