//! Displacement-mapped triangle mesh shapes.
//!
//! [`create_displacement_mesh`] reads a PLY mesh and a `P6` height image named
//! by a [`ParamSet`], displaces the mesh and hands the result to a
//! [`ShapeFactory`].

mod builder;
mod params;
mod texture;
mod triangle;

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::geom::DisplacementError;
use crate::parse::ply::PlyError;
use crate::parse::ppm::RasterError;

pub use builder::{
    BuildReport, ShapeBuild, ShapeFactory, TriangleMeshDesc, create_displacement_mesh,
    try_create_displacement_mesh,
};
pub use params::{ParamLookupExt, ParamMap, ParamSet, ParamValue};
pub use texture::{
    ConstantTexture, FloatTexture, HeightFieldTexture, TextureRegistry, TextureSample,
};
pub use triangle::{Triangle, TriangleMesh, WorldMeshFactory};

/// Failure classes of a shape build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// A file could not be opened or read.
    Io,
    /// A file does not follow its format grammar.
    Format,
    /// Required elements, properties or attribute columns are missing.
    Structural,
    /// A record or value is invalid.
    Data,
    /// Parameters or textures are missing or malformed.
    Config,
}

#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("missing required parameter \"{0}\"")]
    MissingParameter(&'static str),
    #[error("invalid parameter \"{name}\": {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    /// Not fatal: the build continues without the texture.
    #[error("{param}: texture \"{name}\" is not defined")]
    UnknownTexture { param: &'static str, name: String },
    #[error("PLY mesh \"{path}\": {source}")]
    Mesh {
        path: PathBuf,
        #[source]
        source: PlyError,
    },
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error("displacement failed: {0}")]
    Displacement(#[from] DisplacementError),
}

impl ShapeError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingParameter(_)
            | Self::InvalidParameter { .. }
            | Self::UnknownTexture { .. } => ErrorKind::Config,
            Self::Mesh { source, .. } => match source {
                PlyError::Io(_) => ErrorKind::Io,
                PlyError::Format(_) => ErrorKind::Format,
                PlyError::Structural(_) => ErrorKind::Structural,
                PlyError::Data { .. } => ErrorKind::Data,
            },
            Self::Raster(err) => match err {
                RasterError::Io { .. } => ErrorKind::Io,
                RasterError::Format { .. } => ErrorKind::Format,
            },
            Self::Displacement(err) => {
                if err.is_structural() {
                    ErrorKind::Structural
                } else {
                    ErrorKind::Data
                }
            }
        }
    }
}
