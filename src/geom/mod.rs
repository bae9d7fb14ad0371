mod core;
mod displacement;
mod heightfield;
mod mesh;

pub use self::core::{Point3, Transform, Vec3};
pub use displacement::{
    DisplacementDiagnostics, DisplacementError, DisplacementOptions, UvPolicy, displace_mesh,
};
pub use heightfield::{HeightField, HeightFieldDimensionError, luminance};
pub use mesh::{GeomMesh, MeshValidationError};
