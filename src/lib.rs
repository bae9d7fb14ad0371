#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]

//! Displacement-mapped triangle meshes from PLY geometry and `P6` height maps.
//!
//! The pipeline reads a mesh with [`parse::ply_mesh`], turns a raster from
//! [`parse::ppm`] into a [`geom::HeightField`], moves each vertex along its
//! normal with [`geom::displace_mesh`] and hands the result to a
//! [`shape::ShapeFactory`] through [`shape::create_displacement_mesh`].

pub mod geom;
pub mod parse;
pub mod shape;

pub use geom::{DisplacementOptions, GeomMesh, HeightField, Transform, UvPolicy};
pub use shape::{
    BuildReport, ErrorKind, ParamSet, ShapeError, ShapeFactory, TextureRegistry,
    WorldMeshFactory, create_displacement_mesh, try_create_displacement_mesh,
};
