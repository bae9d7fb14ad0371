//! Height-field displacement of mesh vertices along their normals.
//!
//! Every vertex looks up its texture coordinate in a [`HeightField`] and moves
//! by the sampled value along its own normal. The sample is the nearest-lower
//! grid cell; there is no filtering, scaling or clamping of the displacement
//! itself.
//!
//! # Example
//!
//! ```ignore
//! use ply_displace::geom::{displace_mesh, DisplacementOptions, HeightField, UvPolicy};
//!
//! let field = HeightField::from_raster(&image);
//! let options = DisplacementOptions::new().uv_policy(UvPolicy::Repeat);
//! let (displaced, diag) = displace_mesh(&mesh, &field, options)?;
//! ```

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use super::heightfield::HeightField;
use super::mesh::GeomMesh;

/// What to do with texture coordinates outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UvPolicy {
    /// Clamp each component into `[0, 1]`.
    #[default]
    Clamp,
    /// Wrap each component into `[0, 1)`.
    Repeat,
    /// Fail with [`DisplacementError::UvOutOfRange`].
    Reject,
}

impl UvPolicy {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Clamp => "clamp",
            Self::Repeat => "repeat",
            Self::Reject => "reject",
        }
    }

    /// Maps `uv` into `[0, 1]`. The flag reports whether it had to be moved.
    fn resolve(self, vertex: usize, uv: [f64; 2]) -> Result<([f64; 2], bool), DisplacementError> {
        let [u, v] = uv;
        if !u.is_finite() || !v.is_finite() {
            return Err(DisplacementError::NonFiniteUv { vertex });
        }
        let inside = |c: f64| (0.0..=1.0).contains(&c);
        if inside(u) && inside(v) {
            return Ok((uv, false));
        }
        match self {
            Self::Clamp => Ok(([u.clamp(0.0, 1.0), v.clamp(0.0, 1.0)], true)),
            Self::Repeat => {
                let wrap = |c: f64| if inside(c) { c } else { c.rem_euclid(1.0) };
                Ok(([wrap(u), wrap(v)], true))
            }
            Self::Reject => Err(DisplacementError::UvOutOfRange { vertex, u, v }),
        }
    }
}

impl fmt::Display for UvPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UvPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clamp" => Ok(Self::Clamp),
            "repeat" | "wrap" => Ok(Self::Repeat),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "unknown uv mode \"{other}\" (expected clamp, repeat or reject)"
            )),
        }
    }
}

/// Options for displacement operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplacementOptions {
    /// Handling of texture coordinates outside `[0, 1]`.
    pub uv_policy: UvPolicy,
}

impl DisplacementOptions {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            uv_policy: UvPolicy::Clamp,
        }
    }

    /// Set the out-of-range texture coordinate policy.
    #[must_use]
    pub const fn uv_policy(mut self, policy: UvPolicy) -> Self {
        self.uv_policy = policy;
        self
    }
}

/// Errors that can occur during displacement operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DisplacementError {
    #[error("input mesh has no vertices")]
    EmptyMesh,

    #[error("displacement requires normals and texture coordinates; mesh has no normals")]
    MissingNormals,

    #[error("displacement requires normals and texture coordinates; mesh has no texture coordinates")]
    MissingUvs,

    #[error("mesh {attribute} length ({got}) does not match positions length ({expected})")]
    AttributeLengthMismatch {
        attribute: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("input mesh contains invalid geometry (NaN/Inf values)")]
    InvalidGeometry,

    #[error("height field is empty")]
    EmptyHeightField,

    #[error("vertex {vertex} has texture coordinate ({u}, {v}) outside [0, 1]")]
    UvOutOfRange { vertex: usize, u: f64, v: f64 },

    #[error("vertex {vertex} has a non-finite texture coordinate")]
    NonFiniteUv { vertex: usize },
}

impl DisplacementError {
    /// True for errors caused by missing or mismatched mesh columns rather
    /// than by individual values.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::EmptyMesh
                | Self::MissingNormals
                | Self::MissingUvs
                | Self::AttributeLengthMismatch { .. }
                | Self::EmptyHeightField
        )
    }
}

/// Diagnostics specific to displacement operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplacementDiagnostics {
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub min_displacement_applied: f64,
    pub max_displacement_applied: f64,
    pub avg_displacement_applied: f64,
    /// Texture coordinates moved into `[0, 1]` by the uv policy.
    pub adjusted_uv_count: usize,
    pub warnings: Vec<String>,
}

/// Displace every vertex of `mesh` along its normal by the height sampled at
/// its texture coordinate.
///
/// The result shares indices, normals, texture coordinates and face tags with
/// the input; only positions change.
///
/// # Errors
/// Returns an error if the mesh lacks normals or texture coordinates, if their
/// lengths differ from the vertex count, if the height field is empty, or if a
/// texture coordinate is non-finite or rejected by the uv policy.
pub fn displace_mesh(
    mesh: &GeomMesh,
    field: &HeightField,
    options: DisplacementOptions,
) -> Result<(GeomMesh, DisplacementDiagnostics), DisplacementError> {
    if mesh.positions.is_empty() {
        return Err(DisplacementError::EmptyMesh);
    }
    let normals = mesh
        .normals
        .as_deref()
        .ok_or(DisplacementError::MissingNormals)?;
    let uvs = mesh.uvs.as_deref().ok_or(DisplacementError::MissingUvs)?;

    let vertex_count = mesh.positions.len();
    for (attribute, got) in [("normals", normals.len()), ("uvs", uvs.len())] {
        if got != vertex_count {
            return Err(DisplacementError::AttributeLengthMismatch {
                attribute,
                expected: vertex_count,
                got,
            });
        }
    }
    if mesh.has_invalid_vertices() {
        return Err(DisplacementError::InvalidGeometry);
    }
    if field.is_empty() {
        return Err(DisplacementError::EmptyHeightField);
    }

    let mut values = Vec::with_capacity(vertex_count);
    let mut adjusted_uv_count = 0;
    for (vertex, &uv) in uvs.iter().enumerate() {
        let ([u, v], adjusted) = options.uv_policy.resolve(vertex, uv)?;
        if adjusted {
            adjusted_uv_count += 1;
        }
        let value = field
            .sample_uv(u, v)
            .ok_or(DisplacementError::UvOutOfRange { vertex, u, v })?;
        values.push(value);
    }

    let positions = apply_displacement(&mesh.positions, normals, &values);

    let mut warnings = Vec::new();
    if adjusted_uv_count > 0 {
        warnings.push(format!(
            "{adjusted_uv_count} texture coordinates outside [0, 1] were remapped ({})",
            options.uv_policy
        ));
    }

    let (min, max, avg) = summarize(&values);
    let diagnostics = DisplacementDiagnostics {
        vertex_count,
        triangle_count: mesh.triangle_count(),
        min_displacement_applied: min,
        max_displacement_applied: max,
        avg_displacement_applied: avg,
        adjusted_uv_count,
        warnings,
    };

    let result = GeomMesh {
        positions,
        indices: mesh.indices.clone(),
        uvs: mesh.uvs.clone(),
        normals: mesh.normals.clone(),
        face_tags: mesh.face_tags.clone(),
    };

    Ok((result, diagnostics))
}

/// `(min, max, mean)` of the applied values, all zero when empty.
fn summarize(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut min_value = f64::MAX;
    let mut max_value = f64::MIN;
    let mut sum = 0.0;
    for &v in values {
        min_value = min_value.min(v);
        max_value = max_value.max(v);
        sum += v;
    }
    (min_value, max_value, sum / values.len() as f64)
}

/// Apply displacement to positions along normals.
fn apply_displacement(
    positions: &[[f64; 3]],
    normals: &[[f64; 3]],
    displacement_values: &[f64],
) -> Vec<[f64; 3]> {
    positions
        .iter()
        .zip(normals.iter())
        .zip(displacement_values.iter())
        .map(|((pos, normal), &disp)| {
            [
                pos[0] + normal[0] * disp,
                pos[1] + normal[1] * disp,
                pos[2] + normal[2] * disp,
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_simple_quad_mesh() -> GeomMesh {
        GeomMesh {
            positions: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
            uvs: Some(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
            normals: Some(vec![[0.0, 0.0, 1.0]; 4]),
            face_tags: Some(vec![5]),
        }
    }

    /// 2x2 field: row 0 = [0.0, 0.25], row 1 = [0.5, 1.0].
    fn ramp_field() -> HeightField {
        HeightField::new(2, 2, vec![0.0, 0.25, 0.5, 1.0]).unwrap()
    }

    #[test]
    fn test_zero_field_is_identity() {
        let mesh = make_simple_quad_mesh();
        let field = HeightField::new(3, 3, vec![0.0; 9]).unwrap();
        let (displaced, diag) = displace_mesh(&mesh, &field, DisplacementOptions::new()).unwrap();
        assert_eq!(displaced, mesh);
        assert_eq!(diag.max_displacement_applied, 0.0);
        assert!(diag.warnings.is_empty());
    }

    #[test]
    fn test_samples_follow_uvs() {
        let mesh = make_simple_quad_mesh();
        let (displaced, diag) =
            displace_mesh(&mesh, &ramp_field(), DisplacementOptions::default()).unwrap();

        let z: Vec<f64> = displaced.positions.iter().map(|p| p[2]).collect();
        assert_eq!(z, vec![0.0, 0.25, 1.0, 0.5]);
        // x and y untouched because normals are +Z
        assert_eq!(displaced.positions[2][0], 1.0);
        assert_eq!(displaced.indices, mesh.indices);
        assert_eq!(displaced.face_tags, Some(vec![5]));

        assert_eq!(diag.vertex_count, 4);
        assert_eq!(diag.triangle_count, 2);
        assert_eq!(diag.min_displacement_applied, 0.0);
        assert_eq!(diag.max_displacement_applied, 1.0);
        assert!((diag.avg_displacement_applied - 0.4375).abs() < 1e-12);
    }

    #[test]
    fn test_displacement_follows_normal_direction() {
        let mut mesh = make_simple_quad_mesh();
        mesh.normals = Some(vec![[1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, 1.0], [0.6, 0.8, 0.0]]);
        let field = HeightField::new(1, 1, vec![0.5]).unwrap();
        let (displaced, _) = displace_mesh(&mesh, &field, DisplacementOptions::new()).unwrap();
        assert_eq!(displaced.positions[0], [0.5, 0.0, 0.0]);
        assert_eq!(displaced.positions[1], [1.0, -0.5, 0.0]);
        assert_eq!(displaced.positions[2], [1.0, 1.0, 0.5]);
        assert!((displaced.positions[3][0] - 0.3).abs() < 1e-12);
        assert!((displaced.positions[3][1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_missing_columns() {
        let mut mesh = make_simple_quad_mesh();
        mesh.uvs = None;
        let err = displace_mesh(&mesh, &ramp_field(), DisplacementOptions::new()).unwrap_err();
        assert_eq!(err, DisplacementError::MissingUvs);
        assert!(err.is_structural());

        let mut mesh = make_simple_quad_mesh();
        mesh.normals = None;
        let err = displace_mesh(&mesh, &ramp_field(), DisplacementOptions::new()).unwrap_err();
        assert_eq!(err, DisplacementError::MissingNormals);
        assert!(err.to_string().contains("normals and texture coordinates"));
    }

    #[test]
    fn test_attribute_length_mismatch() {
        let mut mesh = make_simple_quad_mesh();
        mesh.normals = Some(vec![[0.0, 0.0, 1.0]; 3]);
        assert_eq!(
            displace_mesh(&mesh, &ramp_field(), DisplacementOptions::new()),
            Err(DisplacementError::AttributeLengthMismatch {
                attribute: "normals",
                expected: 4,
                got: 3
            })
        );
    }

    #[test]
    fn test_empty_inputs() {
        let mesh = make_simple_quad_mesh();
        assert_eq!(
            displace_mesh(&mesh, &HeightField::default(), DisplacementOptions::new()),
            Err(DisplacementError::EmptyHeightField)
        );
        assert_eq!(
            displace_mesh(&GeomMesh::default(), &ramp_field(), DisplacementOptions::new()),
            Err(DisplacementError::EmptyMesh)
        );
    }

    #[test]
    fn test_invalid_geometry() {
        let mut mesh = make_simple_quad_mesh();
        mesh.positions[1][0] = f64::NAN;
        assert!(matches!(
            displace_mesh(&mesh, &ramp_field(), DisplacementOptions::new()),
            Err(DisplacementError::InvalidGeometry)
        ));
    }

    #[test]
    fn test_uv_policies() {
        let mut mesh = make_simple_quad_mesh();
        mesh.uvs = Some(vec![[1.5, 0.0], [-0.5, 0.0], [0.0, 2.0], [0.0, 0.0]]);
        let field = ramp_field();

        let (clamped, diag) = displace_mesh(&mesh, &field, DisplacementOptions::new()).unwrap();
        assert_eq!(clamped.positions[0][2], 0.25);
        assert_eq!(clamped.positions[1][2], 0.0);
        assert_eq!(clamped.positions[2][2], 0.5);
        assert_eq!(diag.adjusted_uv_count, 3);
        assert_eq!(diag.warnings.len(), 1);

        let repeat = DisplacementOptions::new().uv_policy(UvPolicy::Repeat);
        let (wrapped, _) = displace_mesh(&mesh, &field, repeat).unwrap();
        // 1.5 -> 0.5, -0.5 -> 0.5, 2.0 -> 0.0
        assert_eq!(wrapped.positions[0][2], 0.0);
        assert_eq!(wrapped.positions[1][2], 0.0);
        assert_eq!(wrapped.positions[2][2], 0.0);

        let reject = DisplacementOptions::new().uv_policy(UvPolicy::Reject);
        assert!(matches!(
            displace_mesh(&mesh, &field, reject),
            Err(DisplacementError::UvOutOfRange { vertex: 0, .. })
        ));
    }

    #[test]
    fn test_non_finite_uv_is_rejected_under_every_policy() {
        let mut mesh = make_simple_quad_mesh();
        mesh.uvs = Some(vec![[0.0, 0.0], [f64::NAN, 0.0], [1.0, 1.0], [0.0, 1.0]]);
        for policy in [UvPolicy::Clamp, UvPolicy::Repeat, UvPolicy::Reject] {
            let options = DisplacementOptions::new().uv_policy(policy);
            assert_eq!(
                displace_mesh(&mesh, &ramp_field(), options),
                Err(DisplacementError::NonFiniteUv { vertex: 1 })
            );
        }
    }

    #[test]
    fn test_uv_policy_parsing() {
        assert_eq!("clamp".parse::<UvPolicy>(), Ok(UvPolicy::Clamp));
        assert_eq!(" Repeat ".parse::<UvPolicy>(), Ok(UvPolicy::Repeat));
        assert_eq!("reject".parse::<UvPolicy>(), Ok(UvPolicy::Reject));
        assert!("mirror".parse::<UvPolicy>().is_err());
        assert_eq!(UvPolicy::default().to_string(), "clamp");
    }
}
