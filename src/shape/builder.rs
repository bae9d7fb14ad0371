use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use super::params::ParamSet;
use super::texture::{ConstantTexture, FloatTexture, TextureRegistry};
use super::ShapeError;
use crate::geom::{
    DisplacementDiagnostics, DisplacementOptions, GeomMesh, HeightField, Transform, UvPolicy,
    displace_mesh,
};
use crate::parse::ply_mesh::load_ply_mesh;
use crate::parse::ppm::RasterImage;

const MESH_PARAM: &str = "filename";
const HEIGHT_MAP_PARAM: &str = "displacementmap";
const UV_MODE_PARAM: &str = "uvmode";
const ALPHA_PARAM: &str = "alpha";
const SHADOW_ALPHA_PARAM: &str = "shadowalpha";

/// Everything a triangle mesh constructor needs.
#[derive(Clone)]
pub struct TriangleMeshDesc {
    pub object_to_world: Transform,
    pub world_to_object: Transform,
    pub reverse_orientation: bool,
    /// Object-space mesh; always carries normals and uvs after displacement.
    pub mesh: GeomMesh,
    pub alpha: Option<Arc<dyn FloatTexture>>,
    pub shadow_alpha: Option<Arc<dyn FloatTexture>>,
}

impl TriangleMeshDesc {
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.mesh.triangle_count()
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.mesh.vertex_count()
    }
}

impl fmt::Debug for TriangleMeshDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriangleMeshDesc")
            .field("reverse_orientation", &self.reverse_orientation)
            .field("vertex_count", &self.vertex_count())
            .field("triangle_count", &self.triangle_count())
            .field("alpha", &self.alpha)
            .field("shadow_alpha", &self.shadow_alpha)
            .finish_non_exhaustive()
    }
}

/// The external triangle-mesh shape constructor.
pub trait ShapeFactory {
    type Shape;

    fn create_triangle_mesh(&mut self, desc: TriangleMeshDesc) -> Vec<Self::Shape>;
}

/// Summary of a successful build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub mesh_path: String,
    pub height_map_path: String,
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub has_normals: bool,
    pub has_face_tags: bool,
    pub height_field_width: usize,
    pub height_field_height: usize,
    pub uv_policy: UvPolicy,
    pub displacement: DisplacementDiagnostics,
    pub has_alpha: bool,
    pub has_shadow_alpha: bool,
    pub shape_count: usize,
    /// Non-fatal problems: unresolved textures, unused parameters and
    /// displacement warnings.
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct ShapeBuild<S> {
    pub shapes: Vec<S>,
    pub report: BuildReport,
}

/// Builds the displaced mesh shapes, logging any failure and returning no
/// shapes in that case.
pub fn create_displacement_mesh<F: ShapeFactory>(
    object_to_world: &Transform,
    world_to_object: &Transform,
    reverse_orientation: bool,
    params: &ParamSet,
    textures: &TextureRegistry,
    factory: &mut F,
) -> Vec<F::Shape> {
    match try_create_displacement_mesh(
        object_to_world,
        world_to_object,
        reverse_orientation,
        params,
        textures,
        factory,
    ) {
        Ok(build) => build.shapes,
        Err(err) => {
            log::error!("displacement mesh not created ({:?}): {err}", err.kind());
            Vec::new()
        }
    }
}

/// Like [`create_displacement_mesh`], but reports the failure class and
/// returns a [`BuildReport`] on success.
///
/// The mesh is read before the height image, so a mesh that fails to parse
/// stops the build without touching the image file.
pub fn try_create_displacement_mesh<F: ShapeFactory>(
    object_to_world: &Transform,
    world_to_object: &Transform,
    reverse_orientation: bool,
    params: &ParamSet,
    textures: &TextureRegistry,
    factory: &mut F,
) -> Result<ShapeBuild<F::Shape>, ShapeError> {
    let mesh_path = params
        .find_one_filename(MESH_PARAM)
        .ok_or(ShapeError::MissingParameter(MESH_PARAM))?;
    let height_path = params
        .find_one_filename(HEIGHT_MAP_PARAM)
        .ok_or(ShapeError::MissingParameter(HEIGHT_MAP_PARAM))?;
    let uv_policy = match params.find_one_string(UV_MODE_PARAM) {
        Some(mode) => mode
            .parse::<UvPolicy>()
            .map_err(|reason| ShapeError::InvalidParameter {
                name: UV_MODE_PARAM,
                reason,
            })?,
        None => UvPolicy::default(),
    };

    let mesh = load_ply_mesh(&mesh_path).map_err(|source| ShapeError::Mesh {
        path: mesh_path.clone(),
        source,
    })?;

    let field = HeightField::from_raster(&RasterImage::load(&height_path)?);
    let options = DisplacementOptions::new().uv_policy(uv_policy);
    let (displaced, diagnostics) = displace_mesh(&mesh, &field, options)?;

    let mut warnings = diagnostics.warnings.clone();
    let alpha = resolve_texture(params, textures, ALPHA_PARAM, &mut warnings);
    let shadow_alpha = resolve_texture(params, textures, SHADOW_ALPHA_PARAM, &mut warnings);

    for unused in params.unused() {
        log::warn!("parameter {unused} is not used by the displacement mesh");
        warnings.push(format!("unused parameter {unused}"));
    }

    let mut report = BuildReport {
        mesh_path: display_path(&mesh_path),
        height_map_path: display_path(&height_path),
        vertex_count: displaced.vertex_count(),
        triangle_count: displaced.triangle_count(),
        has_normals: displaced.normals.is_some(),
        has_face_tags: displaced.face_tags.is_some(),
        height_field_width: field.width(),
        height_field_height: field.height(),
        uv_policy,
        displacement: diagnostics,
        has_alpha: alpha.is_some(),
        has_shadow_alpha: shadow_alpha.is_some(),
        shape_count: 0,
        warnings,
    };

    let desc = TriangleMeshDesc {
        object_to_world: *object_to_world,
        world_to_object: *world_to_object,
        reverse_orientation,
        mesh: displaced,
        alpha,
        shadow_alpha,
    };
    let shapes = factory.create_triangle_mesh(desc);
    report.shape_count = shapes.len();

    log::debug!(
        "displacement mesh \"{}\": {} vertices, {} triangles, displacement {:.4}..{:.4}",
        report.mesh_path,
        report.vertex_count,
        report.triangle_count,
        report.displacement.min_displacement_applied,
        report.displacement.max_displacement_applied
    );

    Ok(ShapeBuild { shapes, report })
}

/// A named texture wins; an unknown name is a non-fatal config problem. With
/// no name, a float override of exactly zero becomes a constant zero texture.
fn resolve_texture(
    params: &ParamSet,
    textures: &TextureRegistry,
    param: &'static str,
    warnings: &mut Vec<String>,
) -> Option<Arc<dyn FloatTexture>> {
    if let Some(name) = params.find_texture(param) {
        if let Some(texture) = textures.get(&name) {
            return Some(Arc::clone(texture));
        }
        let problem = ShapeError::UnknownTexture { param, name };
        log::warn!("{problem}; continuing without it");
        warnings.push(problem.to_string());
        return None;
    }

    if params.find_one_float(param, 1.0) == 0.0 {
        return Some(Arc::new(ConstantTexture::new(0.0)));
    }
    None
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture {
        descs: Vec<TriangleMeshDesc>,
    }

    impl ShapeFactory for Capture {
        type Shape = usize;

        fn create_triangle_mesh(&mut self, desc: TriangleMeshDesc) -> Vec<usize> {
            let shapes = (0..desc.triangle_count()).collect();
            self.descs.push(desc);
            shapes
        }
    }

    fn build(params: &ParamSet) -> Result<ShapeBuild<usize>, ShapeError> {
        try_create_displacement_mesh(
            &Transform::identity(),
            &Transform::identity(),
            false,
            params,
            &TextureRegistry::new(),
            &mut Capture::default(),
        )
    }

    #[test]
    fn missing_parameters_are_config_errors() {
        let err = build(&ParamSet::new()).unwrap_err();
        assert!(matches!(err, ShapeError::MissingParameter("filename")));
        assert_eq!(err.kind(), crate::shape::ErrorKind::Config);

        let mut params = ParamSet::new();
        params.insert_filename("filename", "mesh.ply");
        let err = build(&params).unwrap_err();
        assert!(matches!(err, ShapeError::MissingParameter("displacementmap")));
    }

    #[test]
    fn bad_uv_mode_is_rejected_before_io() {
        let mut params = ParamSet::new().with("uvmode", "mirror");
        params.insert_filename("filename", "does/not/exist.ply");
        params.insert_filename("displacementmap", "does/not/exist.ppm");
        let err = build(&params).unwrap_err();
        assert!(matches!(
            err,
            ShapeError::InvalidParameter { name: "uvmode", .. }
        ));
    }

    #[test]
    fn missing_mesh_file_yields_no_shapes() {
        let mut params = ParamSet::new();
        params.insert_filename("filename", "does/not/exist.ply");
        params.insert_filename("displacementmap", "does/not/exist.ppm");

        let err = build(&params).unwrap_err();
        assert_eq!(err.kind(), crate::shape::ErrorKind::Io);
        assert!(err.to_string().contains("exist.ply"));

        let mut factory = Capture::default();
        let shapes = create_displacement_mesh(
            &Transform::identity(),
            &Transform::identity(),
            false,
            &params,
            &TextureRegistry::new(),
            &mut factory,
        );
        assert!(shapes.is_empty());
        assert!(factory.descs.is_empty());
    }

    #[test]
    fn texture_resolution() {
        let mut registry = TextureRegistry::new();
        registry.insert("mask".to_string(), Arc::new(ConstantTexture::new(0.5)));

        let mut params = ParamSet::new();
        params.insert_texture("alpha", "mask");
        params.insert_texture("shadowalpha", "nowhere");
        let mut warnings = Vec::new();

        let alpha = resolve_texture(&params, &registry, "alpha", &mut warnings);
        assert!(alpha.is_some());
        assert!(warnings.is_empty());

        let shadow = resolve_texture(&params, &registry, "shadowalpha", &mut warnings);
        assert!(shadow.is_none());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("nowhere"));
    }

    #[test]
    fn zero_float_alpha_becomes_constant_texture() {
        let registry = TextureRegistry::new();
        let mut warnings = Vec::new();

        let params = ParamSet::new().with("alpha", 0.0).with("shadowalpha", 0.5);
        assert!(resolve_texture(&params, &registry, "alpha", &mut warnings).is_some());
        assert!(resolve_texture(&params, &registry, "shadowalpha", &mut warnings).is_none());
        assert!(resolve_texture(&ParamSet::new(), &registry, "alpha", &mut warnings).is_none());
        assert!(warnings.is_empty());
    }
}
